//! Connection-health tracking for one worker link.
//!
//! The monitor consumes connect/disconnect events emitted by the transport
//! and answers `is_connected()` without touching the link itself. Checking
//! costs a non-blocking drain of any pending events plus an atomic load, so
//! the request path pays no transport round-trip and no added latency.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use tokio::sync::mpsc;

use super::ConnectionEvent;

/// Tracks the live/dead state of one worker link from transport events.
///
/// The flag reflects transport-level events only; request outcomes
/// (timeouts, nacks) never change it. A freshly constructed monitor reports
/// disconnected until the first [`ConnectionEvent::Accepted`] arrives.
pub struct ConnectionMonitor {
    events: Mutex<mpsc::UnboundedReceiver<ConnectionEvent>>,
    connected: AtomicBool,
    closed: AtomicBool,
}

impl ConnectionMonitor {
    /// Creates a monitor consuming events from the given channel.
    pub fn new(events: mpsc::UnboundedReceiver<ConnectionEvent>) -> Self {
        Self {
            events: Mutex::new(events),
            connected: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns whether the link to the worker is currently established.
    ///
    /// Drains any pending connection events first, so the answer reflects
    /// every event the transport has emitted so far. A closed monitor always
    /// reports disconnected.
    pub fn is_connected(&self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        if let Ok(mut events) = self.events.lock() {
            while let Ok(event) = events.try_recv() {
                self.apply(event);
            }
        }
        self.connected.load(Ordering::Acquire)
    }

    fn apply(&self, event: ConnectionEvent) {
        match event {
            ConnectionEvent::Accepted => {
                if !self.connected.swap(true, Ordering::AcqRel) {
                    tracing::info!("Worker connection established");
                }
            }
            ConnectionEvent::Disconnected => {
                if self.connected.swap(false, Ordering::AcqRel) {
                    tracing::warn!("Worker connection lost");
                }
            }
        }
    }

    /// Releases monitoring resources. Idempotent.
    ///
    /// After closing, no further events are accepted and the monitor reports
    /// disconnected.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        if let Ok(mut events) = self.events.lock() {
            events.close();
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for ConnectionMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionMonitor")
            .field("connected", &self.connected.load(Ordering::Acquire))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_monitor() -> (ConnectionMonitor, mpsc::UnboundedSender<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ConnectionMonitor::new(rx), tx)
    }

    #[test]
    fn test_starts_disconnected() {
        let (monitor, _tx) = create_monitor();
        assert!(!monitor.is_connected());
    }

    #[test]
    fn test_accept_event_connects() {
        let (monitor, tx) = create_monitor();

        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());
    }

    #[test]
    fn test_disconnect_event_disconnects() {
        let (monitor, tx) = create_monitor();

        tx.send(ConnectionEvent::Accepted).unwrap();
        tx.send(ConnectionEvent::Disconnected).unwrap();
        assert!(!monitor.is_connected());
    }

    #[test]
    fn test_reconnect_cycle() {
        let (monitor, tx) = create_monitor();

        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());

        tx.send(ConnectionEvent::Disconnected).unwrap();
        assert!(!monitor.is_connected());

        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());
    }

    #[test]
    fn test_events_drained_in_order() {
        let (monitor, tx) = create_monitor();

        // A burst of events settles on the last one
        tx.send(ConnectionEvent::Accepted).unwrap();
        tx.send(ConnectionEvent::Disconnected).unwrap();
        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());
    }

    #[test]
    fn test_close_is_idempotent() {
        let (monitor, tx) = create_monitor();

        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());

        monitor.close();
        assert!(!monitor.is_connected());
        monitor.close();
        assert!(!monitor.is_connected());

        // Events after close are not accepted
        assert!(tx.send(ConnectionEvent::Accepted).is_err());
    }

    #[test]
    fn test_sender_drop_reports_disconnected_state_unchanged() {
        let (monitor, tx) = create_monitor();

        tx.send(ConnectionEvent::Accepted).unwrap();
        assert!(monitor.is_connected());

        // Dropping the event source leaves the last observed state in place
        drop(tx);
        assert!(monitor.is_connected());
    }
}
