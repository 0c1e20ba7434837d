//! Scripted transport for protocol-level tests.
//!
//! `MockTransport` records every sent envelope and plays back a queue of
//! scripted responses. An empty queue leaves `recv` pending forever so
//! callers exercise their timeout paths.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

use super::{ConnectionEvent, ConnectionMonitor, Transport, TransportError};
use crate::protocol::{RequestEnvelope, ResponseEnvelope, ResponseType};

/// One scripted item in a mock transport's response queue.
pub(crate) enum Script {
    /// Deliver a well-formed response envelope
    Respond(ResponseEnvelope),
    /// Deliver a frame that fails envelope decoding
    Malformed(String),
    /// Wait before handing out the next item
    Delay(Duration),
}

/// A transport that records sends and plays back scripted responses.
pub(crate) struct MockTransport {
    pub sent: Vec<RequestEnvelope>,
    pub send_calls: Arc<AtomicUsize>,
    pub recv_calls: Arc<AtomicUsize>,
    pub script: VecDeque<Script>,
    closed: bool,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            sent: Vec::new(),
            send_calls: Arc::new(AtomicUsize::new(0)),
            recv_calls: Arc::new(AtomicUsize::new(0)),
            script: VecDeque::new(),
            closed: false,
        }
    }

    /// Queues a scripted item.
    pub fn push(&mut self, item: Script) {
        self.script.push_back(item);
    }

    /// Queues an ack for the given message id.
    pub fn push_ack(&mut self, id: u64) {
        self.push(Script::Respond(ack(id)));
    }

    /// Builds a connected monitor paired with its event feed.
    pub fn connected_monitor() -> (ConnectionMonitor, mpsc::UnboundedSender<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(ConnectionEvent::Accepted).unwrap();
        (ConnectionMonitor::new(rx), tx)
    }

    /// Builds a monitor that never saw an accept event.
    pub fn disconnected_monitor() -> ConnectionMonitor {
        let (_tx, rx) = mpsc::unbounded_channel();
        ConnectionMonitor::new(rx)
    }
}

/// An ack envelope with empty params.
pub(crate) fn ack(id: u64) -> ResponseEnvelope {
    ResponseEnvelope {
        msg_type: ResponseType::Ack,
        id,
        params: serde_json::json!({}),
    }
}

/// A nack envelope with empty params.
pub(crate) fn nack(id: u64) -> ResponseEnvelope {
    ResponseEnvelope {
        msg_type: ResponseType::Nack,
        id,
        params: serde_json::json!({}),
    }
}

/// An ack envelope carrying a status payload.
pub(crate) fn status_response(id: u64, params: serde_json::Value) -> ResponseEnvelope {
    ResponseEnvelope {
        msg_type: ResponseType::Ack,
        id,
        params,
    }
}

impl Transport for MockTransport {
    async fn send(&mut self, request: &RequestEnvelope) -> Result<(), TransportError> {
        self.send_calls.fetch_add(1, Ordering::SeqCst);
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.sent.push(request.clone());
        Ok(())
    }

    async fn recv(&mut self) -> Result<ResponseEnvelope, TransportError> {
        self.recv_calls.fetch_add(1, Ordering::SeqCst);
        loop {
            if self.closed {
                return Err(TransportError::Closed);
            }
            match self.script.pop_front() {
                Some(Script::Respond(response)) => return Ok(response),
                Some(Script::Malformed(reason)) => return Err(TransportError::Malformed(reason)),
                Some(Script::Delay(duration)) => {
                    tokio::time::sleep(duration).await;
                }
                // Script exhausted: hang until the caller's deadline fires
                None => std::future::pending::<()>().await,
            }
        }
    }

    async fn close(&mut self) {
        self.closed = true;
    }
}
