//! Reconnecting TCP transport for one worker link.
//!
//! Frames are line-delimited JSON documents. A background link task owns the
//! socket lifecycle: it dials the endpoint, reports [`ConnectionEvent`]s,
//! pumps frames in both directions, and redials with backoff after a loss.
//! The [`TcpTransport`] handle talks to the link task over channels, so
//! protocol code never blocks on socket management.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;

use super::{ConnectionEvent, Transport, TransportError};
use crate::protocol::{RequestEnvelope, ResponseEnvelope};

/// Delay before the first reconnection attempt.
const INITIAL_RECONNECT_DELAY: Duration = Duration::from_millis(250);

/// Upper bound on the reconnection backoff.
const MAX_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Largest accepted frame. Anything longer tears the connection down.
const MAX_FRAME_BYTES: usize = 1024 * 1024;

/// A reconnecting line-delimited JSON channel to one worker.
pub struct TcpTransport {
    endpoint: String,
    outgoing: mpsc::UnboundedSender<String>,
    incoming: mpsc::UnboundedReceiver<String>,
    shutdown: CancellationToken,
}

impl TcpTransport {
    /// Opens a transport to the given endpoint.
    ///
    /// Returns the transport handle and the connection-event channel to feed
    /// a [`super::ConnectionMonitor`]. The link task starts dialling
    /// immediately; must be called within a Tokio runtime.
    pub fn connect(endpoint: impl Into<String>) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let endpoint = endpoint.into();
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        let (incoming_tx, incoming_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(run_link(
            endpoint.clone(),
            outgoing_rx,
            incoming_tx,
            event_tx,
            shutdown.clone(),
        ));

        (
            Self {
                endpoint,
                outgoing: outgoing_tx,
                incoming: incoming_rx,
                shutdown,
            },
            event_rx,
        )
    }

    /// Returns the endpoint this transport dials.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for TcpTransport {
    async fn send(&mut self, request: &RequestEnvelope) -> Result<(), TransportError> {
        let line = serde_json::to_string(request).map_err(|e| TransportError::Io(e.to_string()))?;
        self.outgoing
            .send(line)
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Result<ResponseEnvelope, TransportError> {
        let line = self.incoming.recv().await.ok_or(TransportError::Closed)?;
        serde_json::from_str(&line).map_err(|e| TransportError::Malformed(e.to_string()))
    }

    async fn close(&mut self) {
        self.shutdown.cancel();
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for TcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TcpTransport")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

/// Link task: dial, pump frames, report events, redial on loss.
async fn run_link(
    endpoint: String,
    mut outgoing: mpsc::UnboundedReceiver<String>,
    incoming: mpsc::UnboundedSender<String>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    shutdown: CancellationToken,
) {
    let mut delay = INITIAL_RECONNECT_DELAY;

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match TcpStream::connect(&endpoint).await {
            Ok(stream) => {
                tracing::debug!(endpoint = %endpoint, "Worker link established");
                let _ = events.send(ConnectionEvent::Accepted);
                delay = INITIAL_RECONNECT_DELAY;

                serve_connection(stream, &mut outgoing, &incoming, &shutdown).await;

                if shutdown.is_cancelled() {
                    break;
                }
                let _ = events.send(ConnectionEvent::Disconnected);

                // Requests queued while the link was going down are stale by
                // the time it comes back; drop them rather than replay them.
                while outgoing.try_recv().is_ok() {}
            }
            Err(e) => {
                tracing::debug!(endpoint = %endpoint, error = %e, "Worker link dial failed");
            }
        }

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
        delay = (delay * 2).min(MAX_RECONNECT_DELAY);
    }

    tracing::debug!(endpoint = %endpoint, "Worker link task stopped");
}

/// Pumps frames over one established connection until it fails or shutdown.
async fn serve_connection(
    stream: TcpStream,
    outgoing: &mut mpsc::UnboundedReceiver<String>,
    incoming: &mpsc::UnboundedSender<String>,
    shutdown: &CancellationToken,
) {
    let codec = LinesCodec::new_with_max_length(MAX_FRAME_BYTES);
    let (mut sink, mut frames) = Framed::new(stream, codec).split();

    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return,

            line = outgoing.recv() => match line {
                Some(line) => {
                    if let Err(e) = sink.send(line).await {
                        tracing::warn!(error = %e, "Worker link write failed");
                        return;
                    }
                }
                // Transport handle dropped; nothing left to pump out
                None => return,
            },

            frame = frames.next() => match frame {
                Some(Ok(line)) => {
                    let _ = incoming.send(line);
                }
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Worker link read failed");
                    return;
                }
                None => {
                    tracing::debug!("Worker closed the connection");
                    return;
                }
            },
        }
    }
}
