//! Message-correlated RPC client for one frame-processing worker.
//!
//! Each request carries a fresh message id; the client then drains inbound
//! frames until one echoes that id or the control timeout expires. Frames
//! with a stale id (answers to earlier requests that timed out) and frames
//! that fail envelope decoding are discarded with a warning; neither resets
//! the timeout window.
//!
//! The control primitives (`set_config`, `create_acquisition`, ...) return
//! `bool` and log their failures; callers aggregate results across workers.

use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::ConfigProfile;
use crate::error::ControlError;
use crate::protocol::{CommandKind, RequestEnvelope, ResponseEnvelope};
use crate::transport::{ConnectionMonitor, Transport, TransportError};

/// Pause between dependent configuration steps, letting the previous command
/// take effect in the worker before the next one is sent.
const SETTLE_INTERVAL: Duration = Duration::from_millis(10);

/// Status/config section holding the file writer state.
const HDF_KEY: &str = "hdf";

/// Frame-count field overridden in the capture plugin's section.
const RX_FRAMES_KEY: &str = "rx_frames";

/// Control client for one worker endpoint.
///
/// Owned exclusively by one subsystem manager. The message-id counter
/// increases strictly on every request actually sent.
pub struct WorkerClient<T: Transport> {
    endpoint: String,
    subsystem: String,
    transport: T,
    monitor: ConnectionMonitor,
    profile: ConfigProfile,
    /// Configuration documents acknowledged by the worker, shallow-merged
    applied: Map<String, Value>,
    /// Last status document received from the worker
    status: Value,
    msg_id: u64,
    ctrl_timeout: Duration,
}

impl<T: Transport> WorkerClient<T> {
    /// Creates a client over an established transport.
    pub fn new(
        endpoint: impl Into<String>,
        subsystem: impl Into<String>,
        transport: T,
        monitor: ConnectionMonitor,
        profile: ConfigProfile,
        ctrl_timeout: Duration,
    ) -> Self {
        let endpoint = endpoint.into();
        let subsystem = subsystem.into();
        if profile.is_empty() {
            tracing::error!(
                endpoint = %endpoint,
                subsystem = %subsystem,
                "Worker has an empty configuration profile; control operations will fail"
            );
        }
        Self {
            endpoint,
            subsystem,
            transport,
            monitor,
            profile,
            applied: Map::new(),
            status: json!({}),
            msg_id: 0,
            ctrl_timeout,
        }
    }

    /// The worker's transport endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The subsystem this worker belongs to.
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Updates the control timeout used for subsequent requests.
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.ctrl_timeout = timeout;
    }

    /// The last status document received from the worker.
    pub fn cached_status(&self) -> &Value {
        &self.status
    }

    /// Sends one command and waits for the matching response.
    ///
    /// Fails immediately with [`ControlError::Disconnected`] when the
    /// connection monitor reports the link down; no transport I/O happens.
    /// Otherwise the next message id is allocated and the client receives
    /// until a response echoes that id or the deadline passes. Mismatched or
    /// malformed responses are discarded with a warning and do not extend
    /// the window.
    pub async fn send_request(
        &mut self,
        command: CommandKind,
        params: Value,
    ) -> Result<ResponseEnvelope, ControlError> {
        if !self.monitor.is_connected() {
            tracing::error!(endpoint = %self.endpoint, "Cannot send request, worker is disconnected");
            return Err(ControlError::Disconnected {
                endpoint: self.endpoint.clone(),
            });
        }

        self.msg_id += 1;
        let request = RequestEnvelope::new(command, self.msg_id, params);
        self.transport
            .send(&request)
            .await
            .map_err(|e| ControlError::Transport(e.to_string()))?;

        let deadline = Instant::now() + self.ctrl_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match tokio::time::timeout(remaining, self.transport.recv()).await {
                Err(_) => break,
                Ok(Ok(response)) if response.id == self.msg_id => return Ok(response),
                Ok(Ok(response)) => {
                    tracing::warn!(
                        received = response.id,
                        expected = self.msg_id,
                        "Discarding response with stale message id"
                    );
                }
                Ok(Err(TransportError::Malformed(reason))) => {
                    tracing::warn!(reason = %reason, "Discarding malformed response");
                }
                Ok(Err(e)) => {
                    tracing::error!(endpoint = %self.endpoint, error = %e, "Transport failure while awaiting response");
                    return Err(ControlError::Transport(e.to_string()));
                }
            }
        }

        tracing::error!(
            endpoint = %self.endpoint,
            timeout = ?self.ctrl_timeout,
            "No response from worker within timeout"
        );
        Err(ControlError::Timeout {
            endpoint: self.endpoint.clone(),
            timeout: self.ctrl_timeout,
        })
    }

    /// Applies a configuration document to the worker.
    ///
    /// Success means the worker acknowledged the document; the doc is then
    /// shallow-merged into the locally cached applied configuration.
    pub async fn set_config(&mut self, doc: Value) -> bool {
        match self.send_request(CommandKind::Configure, doc.clone()).await {
            Ok(response) if response.is_ack() => {
                if let Value::Object(map) = doc {
                    for (key, value) in map {
                        self.applied.insert(key, value);
                    }
                }
                true
            }
            Ok(response) => {
                tracing::error!(
                    endpoint = %self.endpoint,
                    msg_type = ?response.msg_type,
                    "Worker rejected configuration"
                );
                false
            }
            Err(e) => {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Failed to apply configuration");
                false
            }
        }
    }

    /// Fetches the worker's status document.
    ///
    /// On success the cached status is replaced; on failure the previous
    /// cached status is returned unchanged.
    pub async fn get_status(&mut self) -> Value {
        match self.send_request(CommandKind::Status, json!({})).await {
            Ok(response) => {
                if !response.params.is_null() {
                    self.status = response.params;
                }
            }
            Err(e) => {
                tracing::debug!(endpoint = %self.endpoint, error = %e, "Status refresh failed, keeping cached status");
            }
        }
        self.status.clone()
    }

    /// Fetches the configuration currently applied in the worker, replacing
    /// the local applied-config cache on success.
    pub async fn get_config(&mut self) -> Value {
        match self
            .send_request(CommandKind::RequestConfiguration, json!({}))
            .await
        {
            Ok(response) => {
                if let Value::Object(map) = response.params {
                    self.applied = map;
                }
            }
            Err(e) => {
                tracing::error!(endpoint = %self.endpoint, error = %e, "Failed to read back configuration");
            }
        }
        Value::Object(self.applied.clone())
    }

    /// Configures the worker for one bounded acquisition.
    ///
    /// Stops any in-progress capture, waits a settle interval for the stop to
    /// propagate, then sends the profile's acquisition section with the
    /// per-acquisition fields overridden: the capture plugin's frame count,
    /// and the writer's output path, frame count and acquisition id. This is
    /// the only place the stop+settle step happens; `start_acquisition`
    /// assumes it already ran.
    pub async fn create_acquisition(&mut self, path: &str, acquisition_id: &str, frames: u64) -> bool {
        if !self.stop_acquisition().await {
            return false;
        }
        tokio::time::sleep(SETTLE_INTERVAL).await;

        let Some(section) = self.profile.acquisition_config() else {
            tracing::error!(endpoint = %self.endpoint, "No acquisition config in profile");
            return false;
        };
        let Some(mut acquisition) = section.as_object().cloned() else {
            tracing::error!(endpoint = %self.endpoint, "Acquisition config is not an object");
            return false;
        };

        if !override_acquisition_fields(&mut acquisition, path, acquisition_id, frames) {
            tracing::error!(endpoint = %self.endpoint, "No valid capture plugin found in the acquisition config");
            return false;
        }

        tracing::debug!(endpoint = %self.endpoint, acquisition_id, frames, "Applying acquisition config");
        self.set_config(Value::Object(acquisition)).await
    }

    /// Starts a previously configured acquisition by sending the profile's
    /// start section. Assumes a stopped, configured state.
    pub async fn start_acquisition(&mut self) -> bool {
        let Some(start) = self.profile.start_config().cloned() else {
            tracing::error!(endpoint = %self.endpoint, "No start config in profile");
            return false;
        };
        tracing::debug!(endpoint = %self.endpoint, "Applying start config");
        self.set_config(start).await
    }

    /// Stops any in-progress capture by sending the profile's stop section.
    pub async fn stop_acquisition(&mut self) -> bool {
        let Some(stop) = self.profile.stop_config().cloned() else {
            tracing::error!(endpoint = %self.endpoint, "No stop config in profile");
            return false;
        };
        tracing::debug!(endpoint = %self.endpoint, "Applying stop config");
        self.set_config(stop).await
    }

    /// Arms liveview streaming: stop, settle, arm, settle, stream.
    ///
    /// Each step's failure short-circuits the remainder.
    pub async fn start_liveview(&mut self) -> bool {
        if !self.stop_acquisition().await {
            return false;
        }
        tokio::time::sleep(SETTLE_INTERVAL).await;

        let Some(arm) = self.profile.arm_config().cloned() else {
            tracing::error!(endpoint = %self.endpoint, "No arm config in profile");
            return false;
        };
        if !self.set_config(arm).await {
            return false;
        }
        tokio::time::sleep(SETTLE_INTERVAL).await;

        let Some(lv) = self.profile.lv_config().cloned() else {
            tracing::error!(endpoint = %self.endpoint, "No liveview config in profile");
            return false;
        };
        self.set_config(lv).await
    }

    /// Releases the connection monitor and the transport.
    pub async fn close(&mut self) {
        self.monitor.close();
        self.transport.close().await;
    }

    #[cfg(test)]
    pub(crate) fn transport(&self) -> &T {
        &self.transport
    }
}

/// Applies the per-acquisition overrides to a copied acquisition section.
///
/// The capture plugin is the single non-writer key of the section; its frame
/// count is set, and the writer section gets the output path, frame count
/// and acquisition id. All other fields are left as loaded. Returns false
/// when no capture plugin key exists or a section has the wrong shape.
fn override_acquisition_fields(
    acquisition: &mut Map<String, Value>,
    path: &str,
    acquisition_id: &str,
    frames: u64,
) -> bool {
    let Some(plugin_name) = acquisition.keys().find(|key| *key != HDF_KEY).cloned() else {
        return false;
    };

    let Some(plugin) = acquisition
        .get_mut(&plugin_name)
        .and_then(Value::as_object_mut)
    else {
        return false;
    };
    plugin.insert(RX_FRAMES_KEY.to_string(), json!(frames));

    let writer = acquisition
        .entry(HDF_KEY.to_string())
        .or_insert_with(|| json!({}));
    let Some(writer) = writer.as_object_mut() else {
        return false;
    };
    let file = writer.entry("file".to_string()).or_insert_with(|| json!({}));
    let Some(file) = file.as_object_mut() else {
        return false;
    };
    file.insert("path".to_string(), json!(path));
    writer.insert("frames".to_string(), json!(frames));
    writer.insert("acquisition_id".to_string(), json!(acquisition_id));

    true
}
