//! Transport layer for worker control channels.
//!
//! A [`Transport`] is a point-to-point message channel to one worker,
//! carrying one JSON envelope per frame. The production implementation is
//! [`TcpTransport`], a reconnecting line-delimited JSON link; the trait seam
//! exists so protocol logic can be exercised against scripted transports.
//!
//! Connection liveness is tracked out-of-band: transports emit
//! [`ConnectionEvent`]s on a channel consumed by a [`ConnectionMonitor`],
//! which the client consults before each send. Request latency and link
//! health are therefore decoupled: a timed-out request never changes the
//! connection state.

mod monitor;
mod tcp;

#[cfg(test)]
pub(crate) mod mock;

pub use monitor::ConnectionMonitor;
pub use tcp::TcpTransport;

use std::future::Future;
use thiserror::Error;

use crate::protocol::{RequestEnvelope, ResponseEnvelope};

/// Connection lifecycle events emitted by a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// The link to the worker was established or re-established
    Accepted,
    /// The link to the worker was lost
    Disconnected,
}

/// Transport-level failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The transport has shut down and will deliver no further frames
    #[error("transport closed")]
    Closed,

    /// A frame arrived but could not be decoded as a response envelope.
    ///
    /// Recoverable: the frame is discarded and the link stays up.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// I/O failure on the underlying link
    #[error("I/O error: {0}")]
    Io(String),
}

/// A point-to-point message channel to one worker.
///
/// `send` queues one request frame; `recv` resolves with the next inbound
/// response frame, pending indefinitely while none is available (callers
/// bound it with their own deadline). A malformed inbound frame yields
/// [`TransportError::Malformed`] without consuming the link.
pub trait Transport: Send + 'static {
    /// Sends one request envelope to the worker.
    fn send(
        &mut self,
        request: &RequestEnvelope,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receives the next response envelope from the worker.
    fn recv(&mut self) -> impl Future<Output = Result<ResponseEnvelope, TransportError>> + Send;

    /// Shuts the transport down, releasing the link. Idempotent.
    fn close(&mut self) -> impl Future<Output = ()> + Send;
}
