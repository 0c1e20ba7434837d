//! Acquisition controller capability.
//!
//! Two controller variants exist behind one interface: the distributed
//! worker fleet ([`crate::manager::SubsystemManager`]) and the local
//! subprocess mode ([`LocalProcessController`]). The variant is selected
//! once at construction from configuration. Callers hold an
//! `Arc<dyn AcquisitionController>` and never inspect the concrete type.

mod local;

pub use local::{ExecutionPool, LocalProcessController};

use std::future::Future;
use std::pin::Pin;

use serde_json::{json, Value};

use crate::manager::SubsystemManager;
use crate::transport::Transport;

/// Boxed future returned by controller operations, keeping the trait
/// object-safe.
pub type ControllerFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// One acquisition controller: execute a run, stop it, report status.
pub trait AcquisitionController: Send + Sync {
    /// Runs one acquisition, returning overall success.
    fn execute(&self) -> ControllerFuture<'_, bool>;

    /// Stops any in-progress acquisition, returning overall success.
    fn stop(&self) -> ControllerFuture<'_, bool>;

    /// The controller's current status document.
    fn status(&self) -> Value;
}

impl<T: Transport> AcquisitionController for SubsystemManager<T> {
    fn execute(&self) -> ControllerFuture<'_, bool> {
        Box::pin(self.execute_acquisition())
    }

    fn stop(&self) -> ControllerFuture<'_, bool> {
        Box::pin(self.stop_acquisition())
    }

    fn status(&self) -> Value {
        json!({
            "executing": self.is_executing(),
            "frames_written": self.frames_written(),
            "frame_procs": self.frame_proc_status(),
        })
    }
}
