//! Error types for the control plane.
//!
//! `ControlError` covers every failure a caller can observe at the
//! control-tree boundary. Worker-level control primitives deliberately
//! return `bool` (their documented contract) and log the underlying
//! `ControlError` instead of propagating it.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while driving the worker fleet.
#[derive(Debug, Error)]
pub enum ControlError {
    /// The transport link to a worker is down; the request was short-circuited
    /// before any transport I/O.
    #[error("worker at {endpoint} is disconnected")]
    Disconnected {
        /// Endpoint of the unreachable worker
        endpoint: String,
    },

    /// No response carrying the sent message id arrived within the window.
    #[error("no response from {endpoint} within timeout of {timeout:?}")]
    Timeout {
        /// Endpoint that failed to answer
        endpoint: String,
        /// The configured control timeout
        timeout: Duration,
    },

    /// Transport-level failure (channel closed, I/O error)
    #[error("transport error: {0}")]
    Transport(String),

    /// An execute trigger was rejected because the subsystem is mid-acquisition
    #[error("cannot trigger execution for {0} while acquisition is already running")]
    AlreadyExecuting(String),

    /// An execute trigger was rejected because a previous trigger has not cleared
    #[error("execution already triggered for {0}")]
    AlreadyTriggered(String),

    /// A triggered acquisition failed on at least one worker
    #[error("failed to execute acquisition for {0}")]
    ExecutionFailed(String),

    /// An explicit stop request failed on at least one worker
    #[error("failed to stop acquisition for {0}")]
    StopFailed(String),

    /// Liveview could not be armed (disabled, or a worker rejected a step)
    #[error("failed to start liveview for {0}")]
    LiveviewFailed(String),

    /// A path addressed a subsystem the dispatcher does not manage
    #[error("unknown subsystem: {0}")]
    UnknownSubsystem(String),

    /// A path did not resolve to any registered leaf
    #[error("unknown path: {0}")]
    UnknownPath(String),

    /// A write addressed a leaf without a write accessor
    #[error("cannot write read-only leaf: {0}")]
    ReadOnly(String),

    /// A write carried a value of the wrong shape for its leaf
    #[error("invalid value for {path}: {reason}")]
    InvalidValue {
        /// Leaf path the write addressed
        path: String,
        /// Why the value was rejected
        reason: String,
    },
}
