//! Per-subsystem worker configuration profiles.
//!
//! The configuration document is a single JSON file whose top-level keys are
//! subsystem names. Each subsystem section holds up to five named config
//! documents that are sent to workers verbatim, apart from the per-acquisition
//! field overrides applied by the client.

use std::path::Path;

use serde::Deserialize;
use serde_json::Value;

/// Declarative configuration for one subsystem's workers.
///
/// Sections are opaque JSON documents. A profile that failed to load is
/// empty: every section is absent and all control operations on the owning
/// client become no-ops returning failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigProfile {
    /// Full acquisition setup, sent by `create_acquisition` after overrides
    #[serde(default)]
    acquisition_config: Option<Value>,
    /// Document that starts a configured acquisition
    #[serde(default)]
    start_config: Option<Value>,
    /// Document that stops any in-progress capture
    #[serde(default)]
    stop_config: Option<Value>,
    /// Liveview arming document
    #[serde(default)]
    arm_config: Option<Value>,
    /// Liveview streaming document
    #[serde(default)]
    lv_config: Option<Value>,
}

impl ConfigProfile {
    /// Loads the profile for one subsystem from the configuration document.
    ///
    /// Any failure (unreadable file, malformed JSON, missing subsystem key)
    /// is logged and yields an empty profile; this never propagates an error.
    pub fn load(path: &Path, subsystem: &str) -> Self {
        let raw = match std::fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to read configuration document");
                return Self::default();
            }
        };

        let document: Value = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "Failed to parse configuration document");
                return Self::default();
            }
        };

        let Some(section) = document.get(subsystem) else {
            tracing::error!(subsystem, path = %path.display(), "No configuration found for subsystem");
            return Self::default();
        };

        match serde_json::from_value(section.clone()) {
            Ok(profile) => profile,
            Err(e) => {
                tracing::error!(subsystem, error = %e, "Malformed configuration section for subsystem");
                Self::default()
            }
        }
    }

    /// Returns true if no section loaded.
    pub fn is_empty(&self) -> bool {
        self.acquisition_config.is_none()
            && self.start_config.is_none()
            && self.stop_config.is_none()
            && self.arm_config.is_none()
            && self.lv_config.is_none()
    }

    /// The acquisition setup section.
    pub fn acquisition_config(&self) -> Option<&Value> {
        self.acquisition_config.as_ref()
    }

    /// The start section.
    pub fn start_config(&self) -> Option<&Value> {
        self.start_config.as_ref()
    }

    /// The stop section.
    pub fn stop_config(&self) -> Option<&Value> {
        self.stop_config.as_ref()
    }

    /// The liveview arming section.
    pub fn arm_config(&self) -> Option<&Value> {
        self.arm_config.as_ref()
    }

    /// The liveview streaming section.
    pub fn lv_config(&self) -> Option<&Value> {
        self.lv_config.as_ref()
    }
}
