//! Per-subsystem fan-out and aggregation over a set of worker clients.
//!
//! A [`SubsystemManager`] owns every [`WorkerClient`] of one subsystem. It
//! keeps a cached status snapshot per worker, refreshed by a periodic poller
//! task, and answers aggregate questions (`is_executing`, `frames_written`)
//! from the cache alone, so aggregate reads never wait on a worker.
//!
//! Acquisition orchestration fans out to all workers and aggregates success
//! with logical AND. Configuration already applied to some workers is not
//! rolled back when a later worker fails; the aggregated failure is reported
//! instead.

use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::transport::{ConnectionMonitor, TcpTransport, Transport};
use crate::worker::{ConfigProfile, WorkerClient};

/// Status section holding the file writer state, by worker convention.
const HDF_KEY: &str = "hdf";

/// Arguments of the next triggered acquisition.
///
/// Settable through the control-tree boundary; read at trigger time.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionRequest {
    /// Output directory for acquisition files
    pub file_path: String,
    /// Acquisition identifier, also used as the file name stem
    pub file_name: String,
    /// Number of frames to capture
    pub num_frames: u64,
    /// Number of batches to split the capture into
    pub num_batches: u64,
}

impl Default for AcquisitionRequest {
    fn default() -> Self {
        Self {
            file_path: "/tmp/".to_string(),
            file_name: "test".to_string(),
            num_frames: 1000,
            num_batches: 1,
        }
    }
}

/// Fan-out manager for all workers of one subsystem.
pub struct SubsystemManager<T: Transport> {
    subsystem: String,
    endpoints: Vec<String>,
    workers: Vec<Mutex<WorkerClient<T>>>,
    /// Cached per-worker status snapshots, index-aligned with `workers`
    fp_status: RwLock<Vec<Value>>,
    request: RwLock<AcquisitionRequest>,
    ctrl_timeout: RwLock<Duration>,
    poll_interval: Duration,
    liveview: bool,
}

impl SubsystemManager<TcpTransport> {
    /// Builds a manager with one TCP-connected worker per endpoint.
    ///
    /// Each worker loads its profile from the configuration document at
    /// `config_path`. Must be called within a Tokio runtime: each transport
    /// starts its link task immediately.
    pub fn connect(
        subsystem: &str,
        endpoints: &[String],
        config_path: &Path,
        ctrl_timeout: Duration,
        poll_interval: Duration,
        liveview: bool,
    ) -> Self {
        if endpoints.is_empty() {
            tracing::error!(subsystem, "Could not parse control endpoints from configuration");
        }

        let workers = endpoints
            .iter()
            .map(|endpoint| {
                let (transport, events) = TcpTransport::connect(endpoint.clone());
                let monitor = ConnectionMonitor::new(events);
                let profile = ConfigProfile::load(config_path, subsystem);
                WorkerClient::new(endpoint.clone(), subsystem, transport, monitor, profile, ctrl_timeout)
            })
            .collect();

        Self::new(subsystem, workers, ctrl_timeout, poll_interval, liveview)
    }
}

impl<T: Transport> SubsystemManager<T> {
    /// Builds a manager over pre-constructed worker clients.
    pub fn new(
        subsystem: &str,
        workers: Vec<WorkerClient<T>>,
        ctrl_timeout: Duration,
        poll_interval: Duration,
        liveview: bool,
    ) -> Self {
        tracing::debug!(
            subsystem,
            workers = workers.len(),
            liveview,
            "Liveview control for subsystem"
        );
        let endpoints = workers
            .iter()
            .map(|worker| worker.endpoint().to_string())
            .collect();
        let fp_status = RwLock::new(vec![json!({}); workers.len()]);
        Self {
            subsystem: subsystem.to_string(),
            endpoints,
            workers: workers.into_iter().map(Mutex::new).collect(),
            fp_status,
            request: RwLock::new(AcquisitionRequest::default()),
            ctrl_timeout: RwLock::new(ctrl_timeout),
            poll_interval,
            liveview,
        }
    }

    /// The subsystem this manager drives.
    pub fn subsystem(&self) -> &str {
        &self.subsystem
    }

    /// Endpoints of the managed workers.
    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    /// The current control timeout.
    pub fn ctrl_timeout(&self) -> Duration {
        self.ctrl_timeout
            .read()
            .map(|timeout| *timeout)
            .unwrap_or_default()
    }

    /// A copy of the pending acquisition arguments.
    pub fn acquisition_request(&self) -> AcquisitionRequest {
        self.request
            .read()
            .map(|request| request.clone())
            .unwrap_or_default()
    }

    /// Mutates the pending acquisition arguments.
    pub fn update_request(&self, update: impl FnOnce(&mut AcquisitionRequest)) {
        if let Ok(mut request) = self.request.write() {
            update(&mut request);
        }
    }

    /// True when any worker's cached status reports the writer active.
    pub fn is_executing(&self) -> bool {
        let Ok(statuses) = self.fp_status.read() else {
            return false;
        };
        statuses.iter().any(|status| {
            status[HDF_KEY]
                .get("writing")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        })
    }

    /// Sum of frames written across all workers' cached status.
    pub fn frames_written(&self) -> u64 {
        let Ok(statuses) = self.fp_status.read() else {
            return 0;
        };
        statuses
            .iter()
            .map(|status| {
                status[HDF_KEY]
                    .get("frames_written")
                    .and_then(Value::as_u64)
                    .unwrap_or(0)
            })
            .sum()
    }

    /// The cached per-worker status snapshots.
    pub fn frame_proc_status(&self) -> Value {
        self.fp_status
            .read()
            .map(|statuses| json!(*statuses))
            .unwrap_or_else(|_| json!([]))
    }

    /// Polls every worker for status, updating the cached snapshots.
    ///
    /// Workers are polled concurrently so one unreachable worker bounds the
    /// refresh to a single timeout rather than one per worker; each result
    /// is written back to its own slot as it arrives.
    pub async fn refresh_status(&self) {
        let polls = self.workers.iter().enumerate().map(|(index, worker)| async move {
            let status = worker.lock().await.get_status().await;
            if let Ok(mut cached) = self.fp_status.write() {
                cached[index] = status;
            }
        });
        futures::future::join_all(polls).await;
    }

    /// Spawns the periodic status-refresh task.
    ///
    /// Runs until the token is cancelled; missed ticks are skipped rather
    /// than bunched.
    pub fn spawn_status_poller(self: Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let manager = self;
        tokio::spawn(async move {
            tracing::debug!(
                subsystem = %manager.subsystem,
                interval = ?manager.poll_interval,
                "Starting status poller"
            );
            // interval() panics on zero; clamp a degenerate configuration
            let period = manager.poll_interval.max(Duration::from_millis(1));
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        tracing::debug!(subsystem = %manager.subsystem, "Status poller stopping");
                        break;
                    }

                    _ = interval.tick() => {
                        manager.refresh_status().await;
                    }
                }
            }
        })
    }

    /// Runs one full acquisition: configure every worker, then start every
    /// worker.
    ///
    /// The output directory is created first. Create is fanned out to all
    /// workers and must succeed everywhere before any start is sent; workers
    /// already configured are not rolled back when a peer fails. Returns the
    /// logical AND of the per-worker results.
    pub async fn execute_acquisition(&self) -> bool {
        let request = self.acquisition_request();

        if let Err(e) = tokio::fs::create_dir_all(&request.file_path).await {
            tracing::error!(
                subsystem = %self.subsystem,
                path = %request.file_path,
                error = %e,
                "Failed to create acquisition output directory"
            );
            return false;
        }

        tracing::debug!(subsystem = %self.subsystem, "Executing acquisition");

        let mut all_success = true;
        for worker in &self.workers {
            let mut worker = worker.lock().await;
            if !worker
                .create_acquisition(&request.file_path, &request.file_name, request.num_frames)
                .await
            {
                tracing::error!(
                    endpoint = worker.endpoint(),
                    "Failed to create acquisition for endpoint"
                );
                all_success = false;
            }
        }

        if !all_success {
            return false;
        }

        for worker in &self.workers {
            let mut worker = worker.lock().await;
            if !worker.start_acquisition().await {
                tracing::error!(
                    endpoint = worker.endpoint(),
                    "Failed to start acquisition for endpoint"
                );
                all_success = false;
            }
        }

        self.refresh_status().await;
        all_success
    }

    /// Stops the acquisition on every worker, refreshing status afterwards.
    pub async fn stop_acquisition(&self) -> bool {
        tracing::debug!(subsystem = %self.subsystem, "Stopping acquisition");

        let mut all_success = true;
        for worker in &self.workers {
            let mut worker = worker.lock().await;
            if !worker.stop_acquisition().await {
                tracing::error!(
                    endpoint = worker.endpoint(),
                    "Failed to stop acquisition for endpoint"
                );
                all_success = false;
            }
        }

        self.refresh_status().await;
        all_success
    }

    /// Arms liveview on every worker.
    ///
    /// Available only when the liveview capability was enabled at
    /// construction; otherwise logs and reports failure.
    pub async fn start_liveview(&self) -> bool {
        if !self.liveview {
            tracing::error!(subsystem = %self.subsystem, "Liveview control is disabled");
            return false;
        }

        let mut all_success = true;
        for worker in &self.workers {
            let mut worker = worker.lock().await;
            if !worker.start_liveview().await {
                tracing::error!(
                    endpoint = worker.endpoint(),
                    "Failed to start liveview for endpoint"
                );
                all_success = false;
            }
        }
        all_success
    }

    /// Updates the control timeout on the manager and every worker.
    pub async fn set_timeout(&self, timeout: Duration) {
        tracing::debug!(subsystem = %self.subsystem, timeout = ?timeout, "Setting control timeout");
        if let Ok(mut current) = self.ctrl_timeout.write() {
            *current = timeout;
        }
        for worker in &self.workers {
            worker.lock().await.set_timeout(timeout);
        }
    }

    /// Closes every worker's transport.
    pub async fn close(&self) {
        for worker in &self.workers {
            worker.lock().await.close().await;
        }
    }

    #[cfg(test)]
    pub(crate) fn cached_status_mut(&self) -> std::sync::RwLockWriteGuard<'_, Vec<Value>> {
        self.fp_status.write().unwrap()
    }

    #[cfg(test)]
    pub(crate) fn workers(&self) -> &[Mutex<WorkerClient<T>>] {
        &self.workers
    }
}

impl<T: Transport> std::fmt::Debug for SubsystemManager<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemManager")
            .field("subsystem", &self.subsystem)
            .field("workers", &self.workers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{ack, nack, status_response, MockTransport, Script};
    use crate::worker::ConfigProfile;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_profile() -> ConfigProfile {
        serde_json::from_value(json!({
            "acquisition_config": {
                "plug": {"rx_frames": 0},
                "hdf": {"file": {"path": "/old"}, "frames": 0, "acquisition_id": "old"},
            },
            "start_config": {"hdf": {"write": true}},
            "stop_config": {"hdf": {"write": false}},
            "arm_config": {"lv": {"arm": true}},
            "lv_config": {"lv": {"stream": true}},
        }))
        .unwrap()
    }

    fn make_worker(endpoint: &str, transport: MockTransport) -> WorkerClient<MockTransport> {
        let (monitor, _events) = MockTransport::connected_monitor();
        WorkerClient::new(
            endpoint,
            "det",
            transport,
            monitor,
            test_profile(),
            Duration::from_millis(100),
        )
    }

    fn make_manager(workers: Vec<WorkerClient<MockTransport>>) -> SubsystemManager<MockTransport> {
        SubsystemManager::new(
            "det",
            workers,
            Duration::from_millis(100),
            Duration::from_millis(20),
            false,
        )
    }

    fn set_cached_status(manager: &SubsystemManager<MockTransport>, statuses: Vec<Value>) {
        *manager.fp_status.write().unwrap() = statuses;
    }

    #[tokio::test]
    async fn test_is_executing_ors_writing_flags() {
        let manager = make_manager(vec![
            make_worker("a:1", MockTransport::new()),
            make_worker("b:1", MockTransport::new()),
        ]);

        set_cached_status(&manager, vec![json!({"hdf": {"writing": true}}), json!({})]);
        assert!(manager.is_executing());

        set_cached_status(
            &manager,
            vec![json!({"hdf": {"writing": false}}), json!({})],
        );
        assert!(!manager.is_executing());
    }

    #[tokio::test]
    async fn test_frames_written_sums_counters() {
        let manager = make_manager(vec![
            make_worker("a:1", MockTransport::new()),
            make_worker("b:1", MockTransport::new()),
        ]);

        set_cached_status(
            &manager,
            vec![
                json!({"hdf": {"frames_written": 10}}),
                json!({"hdf": {"frames_written": 5}}),
            ],
        );
        assert_eq!(manager.frames_written(), 15);
    }

    #[tokio::test]
    async fn test_aggregates_tolerate_statuses_without_writer_section() {
        let manager = make_manager(vec![make_worker("a:1", MockTransport::new())]);

        set_cached_status(&manager, vec![json!({"other": 1})]);
        assert!(!manager.is_executing());
        assert_eq!(manager.frames_written(), 0);
    }

    #[tokio::test]
    async fn test_refresh_status_updates_all_slots() {
        let mut first = MockTransport::new();
        first.push(Script::Respond(status_response(
            1,
            json!({"hdf": {"writing": true, "frames_written": 3}}),
        )));
        let mut second = MockTransport::new();
        second.push(Script::Respond(status_response(
            1,
            json!({"hdf": {"writing": false, "frames_written": 9}}),
        )));

        let manager = make_manager(vec![make_worker("a:1", first), make_worker("b:1", second)]);
        manager.refresh_status().await;

        assert!(manager.is_executing());
        assert_eq!(manager.frames_written(), 12);
    }

    #[tokio::test]
    async fn test_refresh_status_keeps_slot_on_worker_timeout() {
        // One worker answers, the other's script is empty so its poll times out
        let mut first = MockTransport::new();
        first.push(Script::Respond(status_response(
            1,
            json!({"hdf": {"frames_written": 7}}),
        )));
        let second = MockTransport::new();

        let manager = make_manager(vec![make_worker("a:1", first), make_worker("b:1", second)]);
        manager.refresh_status().await;

        assert_eq!(manager.frames_written(), 7);
    }

    #[tokio::test]
    async fn test_execute_acquisition_configures_then_starts_every_worker() {
        let output = tempfile::tempdir().unwrap();
        let output_path = output.path().join("run").to_str().unwrap().to_string();

        // Per worker: stop ack, acquisition ack, start ack, then the status
        // refresh after start
        let mut transports = Vec::new();
        for _ in 0..2 {
            let mut transport = MockTransport::new();
            transport.push_ack(1);
            transport.push_ack(2);
            transport.push_ack(3);
            transport.push(Script::Respond(status_response(
                4,
                json!({"hdf": {"writing": true}}),
            )));
            transports.push(transport);
        }
        let mut it = transports.into_iter();
        let manager = make_manager(vec![
            make_worker("a:1", it.next().unwrap()),
            make_worker("b:1", it.next().unwrap()),
        ]);
        manager.update_request(|request| {
            request.file_path = output_path.clone();
            request.file_name = "run1".to_string();
            request.num_frames = 500;
        });

        assert!(manager.execute_acquisition().await);
        assert!(std::path::Path::new(&output_path).is_dir());
        assert!(manager.is_executing());

        // Every worker saw stop, acquisition config, start, status
        for worker in &manager.workers {
            let worker = worker.lock().await;
            let sent = &worker.transport().sent;
            assert_eq!(sent.len(), 4);
            assert_eq!(sent[1].params["hdf"]["acquisition_id"], "run1");
            assert_eq!(sent[1].params["plug"]["rx_frames"], 500);
            assert_eq!(sent[2].params["hdf"]["write"], true);
        }
    }

    #[tokio::test]
    async fn test_execute_acquisition_partial_create_failure_skips_start() {
        let output = tempfile::tempdir().unwrap();

        // Worker A acks everything it is asked
        let mut first = MockTransport::new();
        first.push_ack(1);
        first.push_ack(2);
        // Worker B rejects the acquisition config
        let mut second = MockTransport::new();
        second.push_ack(1);
        second.push(Script::Respond(nack(2)));

        let manager = make_manager(vec![make_worker("a:1", first), make_worker("b:1", second)]);
        manager.update_request(|request| {
            request.file_path = output.path().to_str().unwrap().to_string();
        });

        assert!(!manager.execute_acquisition().await);

        // Worker A was configured and is not rolled back; no start was sent
        let first = manager.workers[0].lock().await;
        assert_eq!(first.transport().sent.len(), 2);
        drop(first);
        let second = manager.workers[1].lock().await;
        assert_eq!(second.transport().sent.len(), 2);
    }

    #[tokio::test]
    async fn test_stop_acquisition_aggregates_and_refreshes() {
        let mut first = MockTransport::new();
        first.push_ack(1);
        first.push(Script::Respond(status_response(
            2,
            json!({"hdf": {"writing": false}}),
        )));
        let mut second = MockTransport::new();
        second.push(Script::Respond(nack(1)));

        let manager = make_manager(vec![make_worker("a:1", first), make_worker("b:1", second)]);
        set_cached_status(&manager, vec![json!({"hdf": {"writing": true}}), json!({})]);

        assert!(!manager.stop_acquisition().await);
        // The refresh after stop picked up worker A's new status
        assert!(!manager.is_executing());
    }

    #[tokio::test]
    async fn test_start_liveview_disabled_logs_and_fails() {
        let transport = MockTransport::new();
        let send_calls = transport.send_calls.clone();
        let manager = make_manager(vec![make_worker("a:1", transport)]);

        assert!(!manager.start_liveview().await);
        assert_eq!(send_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_start_liveview_enabled_runs_sequence() {
        let mut transport = MockTransport::new();
        transport.push_ack(1);
        transport.push_ack(2);
        transport.push_ack(3);

        let manager = SubsystemManager::new(
            "det",
            vec![make_worker("a:1", transport)],
            Duration::from_millis(100),
            Duration::from_millis(20),
            true,
        );

        assert!(manager.start_liveview().await);
    }

    #[tokio::test]
    async fn test_set_timeout_propagates_to_workers() {
        let manager = make_manager(vec![make_worker("a:1", MockTransport::new())]);

        manager.set_timeout(Duration::from_secs(5)).await;
        assert_eq!(manager.ctrl_timeout(), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_status_poller_refreshes_periodically() {
        let mut transport = MockTransport::new();
        transport.push(Script::Respond(status_response(
            1,
            json!({"hdf": {"frames_written": 21}}),
        )));

        let manager = Arc::new(make_manager(vec![make_worker("a:1", transport)]));
        let shutdown = CancellationToken::new();
        let poller = Arc::clone(&manager).spawn_status_poller(shutdown.clone());

        // Give the poller time to tick at least once
        tokio::time::sleep(Duration::from_millis(100)).await;
        shutdown.cancel();
        poller.await.unwrap();

        assert_eq!(manager.frames_written(), 21);
    }
}
