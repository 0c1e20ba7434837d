//! Wire protocol data model for the worker control channel.
//!
//! Every exchange with a worker is a single JSON document per frame. Requests
//! carry a monotonically increasing message id that the worker echoes back in
//! its response; the client uses the echoed id to correlate responses with
//! requests and to discard stale frames.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Message type carried by every request envelope.
pub const MSG_TYPE_CMD: &str = "cmd";

/// Commands understood by a frame-processing worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    /// Apply a configuration document
    Configure,
    /// Report the current status document
    Status,
    /// Report the currently applied configuration
    RequestConfiguration,
}

/// Response classification reported by a worker.
///
/// Workers may emit message types beyond ack/nack (notifications, logs);
/// anything unrecognised maps to [`ResponseType::Other`] and is treated as
/// a non-affirmative response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseType {
    /// Affirmative acknowledgement
    Ack,
    /// Negative acknowledgement
    Nack,
    /// Any other message type
    #[serde(other)]
    Other,
}

/// A command request sent to a worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestEnvelope {
    /// Message type, always [`MSG_TYPE_CMD`] for requests
    pub msg_type: String,
    /// The command to execute
    pub msg_val: CommandKind,
    /// Correlation id, unique and strictly increasing per client
    pub id: u64,
    /// RFC3339 timestamp recorded at send time
    pub timestamp: String,
    /// Command parameters (configuration document, or empty)
    pub params: Value,
}

impl RequestEnvelope {
    /// Builds a request envelope stamped with the current time.
    pub fn new(command: CommandKind, id: u64, params: Value) -> Self {
        Self {
            msg_type: MSG_TYPE_CMD.to_string(),
            msg_val: command,
            id,
            timestamp: Utc::now().to_rfc3339(),
            params,
        }
    }
}

/// A response received from a worker.
///
/// Extra fields on the wire (worker timestamps, diagnostics) are tolerated
/// and ignored; a frame missing `msg_type` or `id` fails deserialization and
/// is discarded by the client as malformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseEnvelope {
    /// Response classification
    pub msg_type: ResponseType,
    /// Echo of the request id this response answers
    pub id: u64,
    /// Response payload (status document, applied configuration, or empty)
    #[serde(default)]
    pub params: Value,
}

impl ResponseEnvelope {
    /// Returns true if the worker acknowledged the request.
    #[inline]
    pub fn is_ack(&self) -> bool {
        self.msg_type == ResponseType::Ack
    }
}
