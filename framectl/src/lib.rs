//! framectl - Control plane for detector frame-processing worker fleets
//!
//! This library drives remote frame-processing workers, grouped into named
//! subsystems, through the acquisition lifecycle (stop → configure → start)
//! over a message-correlated control channel, and aggregates per-worker
//! status into subsystem-level views.
//!
//! # High-Level API
//!
//! The [`dispatcher`] module provides the path-addressed entry point:
//!
//! ```ignore
//! use framectl::dispatcher::SubsystemDispatcher;
//! use framectl::options::ControlOptions;
//! use serde_json::json;
//!
//! let options = ControlOptions::new("configs.json")
//!     .with_subsystem("det", "127.0.0.1:5000,127.0.0.1:5001");
//! let dispatcher = SubsystemDispatcher::from_options(&options);
//!
//! // Arm and trigger one acquisition
//! dispatcher.set("subsystems/det/args", json!({"num_frames": 500})).await?;
//! dispatcher.set("execute/det", json!(true)).await?;
//! ```

pub mod controller;
pub mod dispatcher;
pub mod error;
pub mod logging;
pub mod manager;
pub mod options;
pub mod protocol;
pub mod transport;
pub mod worker;

/// Version of the framectl library and CLI.
///
/// Synchronized across all components in the workspace; defined in
/// `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
