//! Process configuration inputs for the control plane.
//!
//! These are the constructor parameters the startup layer (CLI or embedding
//! service) hands to the dispatcher: subsystem names, per-subsystem endpoint
//! lists, control timeout, status poll interval, the configuration document
//! path and the liveview capability flag.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default control timeout in seconds.
pub const DEFAULT_CTRL_TIMEOUT_SECS: f64 = 1.0;

/// Default status poll interval in seconds.
pub const DEFAULT_POLL_INTERVAL_SECS: f64 = 1.0;

/// Constructor parameters for a [`crate::dispatcher::SubsystemDispatcher`].
#[derive(Debug, Clone)]
pub struct ControlOptions {
    /// Subsystem names, in presentation order
    pub subsystems: Vec<String>,
    /// Worker endpoints per subsystem
    pub endpoints: HashMap<String, Vec<String>>,
    /// Per-request control timeout
    pub ctrl_timeout: Duration,
    /// Interval between status refreshes
    pub poll_interval: Duration,
    /// Path to the worker configuration document
    pub config_path: PathBuf,
    /// Whether liveview control is enabled for all subsystems
    pub liveview: bool,
}

impl ControlOptions {
    /// Builds options with defaults for the given configuration document.
    pub fn new(config_path: impl Into<PathBuf>) -> Self {
        Self {
            subsystems: Vec::new(),
            endpoints: HashMap::new(),
            ctrl_timeout: Duration::from_secs_f64(DEFAULT_CTRL_TIMEOUT_SECS),
            poll_interval: Duration::from_secs_f64(DEFAULT_POLL_INTERVAL_SECS),
            config_path: config_path.into(),
            liveview: false,
        }
    }

    /// Adds one subsystem with its comma-separated endpoint list.
    pub fn with_subsystem(mut self, name: &str, endpoints: &str) -> Self {
        self.subsystems.push(name.to_string());
        self.endpoints
            .insert(name.to_string(), parse_list(endpoints));
        self
    }
}

/// Splits a comma-separated list, trimming whitespace and dropping empties.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect()
}
