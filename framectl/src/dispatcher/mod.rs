//! Path-addressed routing and execution arbitration across subsystems.
//!
//! The [`SubsystemDispatcher`] owns the name→manager mapping and the one
//! edge-triggered execute flag per subsystem. Setting the execute leaf true
//! for an idle subsystem records the trigger and immediately dispatches the
//! acquisition; setting it while the subsystem is mid-acquisition is rejected
//! with an explicit error, never silently dropped.
//!
//! The check-and-set of the trigger uses an atomic compare-exchange: under a
//! multi-threaded runtime there is no suspension-free critical section to
//! lean on, so the guard is explicit.

mod registry;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::ControlError;
use crate::manager::SubsystemManager;
use crate::options::ControlOptions;
use crate::transport::{TcpTransport, Transport};
use registry::{insert_at, LeafRegistry, ManagerLeaf};

/// Routes control-tree reads and writes to subsystem managers and arbitrates
/// acquisition triggers.
pub struct SubsystemDispatcher<T: Transport> {
    /// Subsystem names in construction order
    subsystems: Vec<String>,
    managers: HashMap<String, Arc<SubsystemManager<T>>>,
    execute_flags: HashMap<String, AtomicBool>,
    registry: LeafRegistry,
}

impl SubsystemDispatcher<TcpTransport> {
    /// Builds the dispatcher and all managers from process configuration.
    ///
    /// Must be called within a Tokio runtime: worker transports start their
    /// link tasks immediately.
    pub fn from_options(options: &ControlOptions) -> Self {
        let managers = options
            .subsystems
            .iter()
            .map(|subsystem| {
                let endpoints = options.endpoints.get(subsystem).cloned().unwrap_or_default();
                tracing::debug!(subsystem = %subsystem, ?endpoints, "Endpoints for subsystem");
                Arc::new(SubsystemManager::connect(
                    subsystem,
                    &endpoints,
                    &options.config_path,
                    options.ctrl_timeout,
                    options.poll_interval,
                    options.liveview,
                ))
            })
            .collect();
        Self::new(managers)
    }
}

impl<T: Transport> SubsystemDispatcher<T> {
    /// Builds a dispatcher over pre-constructed managers.
    pub fn new(managers: Vec<Arc<SubsystemManager<T>>>) -> Self {
        let subsystems: Vec<String> = managers
            .iter()
            .map(|manager| manager.subsystem().to_string())
            .collect();
        let execute_flags = subsystems
            .iter()
            .map(|name| (name.clone(), AtomicBool::new(false)))
            .collect();
        let managers = managers
            .into_iter()
            .map(|manager| (manager.subsystem().to_string(), manager))
            .collect();
        Self {
            subsystems,
            managers,
            execute_flags,
            registry: LeafRegistry::for_manager(),
        }
    }

    /// The managed subsystem names.
    pub fn subsystems(&self) -> &[String] {
        &self.subsystems
    }

    /// The manager for one subsystem, if present.
    pub fn manager(&self, subsystem: &str) -> Option<&Arc<SubsystemManager<T>>> {
        self.managers.get(subsystem)
    }

    /// Spawns one status poller per subsystem, all tied to the same token.
    pub fn spawn_status_pollers(&self, shutdown: &CancellationToken) -> Vec<JoinHandle<()>> {
        self.subsystems
            .iter()
            .filter_map(|name| self.managers.get(name))
            .map(|manager| Arc::clone(manager).spawn_status_poller(shutdown.clone()))
            .collect()
    }

    /// Closes every manager's workers.
    pub async fn close(&self) {
        for manager in self.managers.values() {
            manager.close().await;
        }
    }

    /// Reads the value at a control-tree path.
    pub fn get(&self, path: &str) -> Result<Value, ControlError> {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match segments.split_first() {
            None => Ok(json!({
                "subsystem_list": self.subsystems,
                "subsystems": self.all_subsystem_branches(),
                "execute": self.all_execute_flags(),
            })),
            Some((&"subsystem_list", [])) => Ok(json!(self.subsystems)),
            Some((&"execute", [])) => Ok(Value::Object(self.all_execute_flags())),
            Some((&"execute", [name])) => {
                let flag = self
                    .execute_flags
                    .get(*name)
                    .ok_or_else(|| ControlError::UnknownSubsystem(name.to_string()))?;
                Ok(json!(flag.load(Ordering::Acquire)))
            }
            Some((&"subsystems", [])) => Ok(Value::Object(self.all_subsystem_branches())),
            Some((&"subsystems", [name, rest @ ..])) => {
                let manager = self
                    .managers
                    .get(*name)
                    .ok_or_else(|| ControlError::UnknownSubsystem(name.to_string()))?;
                self.read_manager_path(manager, &rest.join("/"))
            }
            _ => {
                tracing::error!(path, "Unknown control-tree path");
                Err(ControlError::UnknownPath(path.to_string()))
            }
        }
    }

    /// Writes a value at a control-tree path, returning the updated value.
    ///
    /// A write targeting the execute leaf for an idle subsystem records the
    /// trigger and dispatches the acquisition before returning; the trigger
    /// clears only when the acquisition was accepted by every worker.
    pub async fn set(&self, path: &str, data: Value) -> Result<Value, ControlError> {
        let segments: Vec<&str> = path
            .split('/')
            .filter(|segment| !segment.is_empty())
            .collect();

        match segments.split_first() {
            Some((&"execute", rest)) => {
                let writes = self.parse_execute_writes(rest, data, path)?;
                for (name, value) in &writes {
                    self.set_execute(name, *value)?;
                }
                for (name, value) in &writes {
                    if *value {
                        self.handle_execution(name).await?;
                    }
                }
                self.get(path)
            }
            Some((&"subsystems", [name, rest @ ..])) => {
                let manager = self.managers.get(*name).cloned().ok_or_else(|| {
                    tracing::error!(subsystem = %name, "Unknown subsystem in write");
                    ControlError::UnknownSubsystem(name.to_string())
                })?;
                let writes = self.flatten_writes(&rest.join("/"), data, path)?;
                for (leaf_path, value) in writes {
                    self.write_leaf(name, &manager, &leaf_path, value).await?;
                }
                self.get(path)
            }
            _ => {
                tracing::error!(path, "Subsystem not determined from path");
                Err(ControlError::UnknownPath(path.to_string()))
            }
        }
    }

    /// Sets or clears the edge-triggered execute flag for one subsystem.
    ///
    /// Setting true is rejected while the subsystem is executing, and while
    /// a previous trigger has not cleared. The check-and-set is an atomic
    /// compare-exchange, so concurrent writers cannot double-trigger.
    fn set_execute(&self, subsystem: &str, value: bool) -> Result<(), ControlError> {
        let flag = self
            .execute_flags
            .get(subsystem)
            .ok_or_else(|| ControlError::UnknownSubsystem(subsystem.to_string()))?;

        if !value {
            flag.store(false, Ordering::Release);
            tracing::debug!(subsystem, "Execution trigger cleared");
            return Ok(());
        }

        let manager = self
            .managers
            .get(subsystem)
            .ok_or_else(|| ControlError::UnknownSubsystem(subsystem.to_string()))?;
        if manager.is_executing() {
            tracing::error!(
                subsystem,
                "Cannot trigger execution while acquisition is already running"
            );
            return Err(ControlError::AlreadyExecuting(subsystem.to_string()));
        }

        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| {
                tracing::error!(subsystem, "Execution already triggered");
                ControlError::AlreadyTriggered(subsystem.to_string())
            })?;
        tracing::debug!(subsystem, "Execution trigger set");
        Ok(())
    }

    /// Dispatches a recorded trigger: runs the acquisition and clears the
    /// flag only on success.
    async fn handle_execution(&self, subsystem: &str) -> Result<(), ControlError> {
        let flag = self
            .execute_flags
            .get(subsystem)
            .ok_or_else(|| ControlError::UnknownSubsystem(subsystem.to_string()))?;
        if !flag.load(Ordering::Acquire) {
            return Ok(());
        }

        let manager = self
            .managers
            .get(subsystem)
            .ok_or_else(|| ControlError::UnknownSubsystem(subsystem.to_string()))?;
        if manager.is_executing() {
            tracing::error!(
                subsystem,
                "Cannot trigger execution while acquisition is already running"
            );
            return Err(ControlError::AlreadyExecuting(subsystem.to_string()));
        }

        if manager.execute_acquisition().await {
            flag.store(false, Ordering::Release);
            tracing::info!(subsystem, "Acquisition executing");
            Ok(())
        } else {
            // Trigger stays set so the request can be retried or cleared
            Err(ControlError::ExecutionFailed(subsystem.to_string()))
        }
    }

    fn parse_execute_writes(
        &self,
        rest: &[&str],
        data: Value,
        path: &str,
    ) -> Result<Vec<(String, bool)>, ControlError> {
        let as_flag = |name: &str, value: &Value| -> Result<(String, bool), ControlError> {
            if !self.execute_flags.contains_key(name) {
                return Err(ControlError::UnknownSubsystem(name.to_string()));
            }
            let value = value.as_bool().ok_or_else(|| ControlError::InvalidValue {
                path: format!("execute/{}", name),
                reason: "expected a boolean".to_string(),
            })?;
            Ok((name.to_string(), value))
        };

        match rest {
            [] => match data {
                Value::Object(map) => map
                    .iter()
                    .map(|(name, value)| as_flag(name, value))
                    .collect(),
                _ => Err(ControlError::InvalidValue {
                    path: path.to_string(),
                    reason: "expected an object of subsystem flags".to_string(),
                }),
            },
            [name] => Ok(vec![as_flag(name, &data)?]),
            _ => {
                tracing::error!(path, "Unknown control-tree path");
                Err(ControlError::UnknownPath(path.to_string()))
            }
        }
    }

    /// Expands a write at a manager-relative path into per-leaf writes.
    ///
    /// A write addressed to a branch must carry an object; its entries are
    /// expanded recursively. Unknown paths and read-only leaves error.
    fn flatten_writes(
        &self,
        relative: &str,
        data: Value,
        full_path: &str,
    ) -> Result<Vec<(String, Value)>, ControlError> {
        if let Some(spec) = self.registry.resolve(relative) {
            if !spec.writable {
                return Err(ControlError::ReadOnly(relative.to_string()));
            }
            return Ok(vec![(relative.to_string(), data)]);
        }

        if relative.is_empty() || self.registry.has_branch(relative) {
            let Value::Object(map) = data else {
                return Err(ControlError::InvalidValue {
                    path: full_path.to_string(),
                    reason: "expected an object of leaf values".to_string(),
                });
            };
            let mut writes = Vec::new();
            for (key, value) in map {
                let child = if relative.is_empty() {
                    key
                } else {
                    format!("{}/{}", relative, key)
                };
                writes.extend(self.flatten_writes(&child, value, full_path)?);
            }
            return Ok(writes);
        }

        tracing::error!(path = full_path, "Unknown control-tree path");
        Err(ControlError::UnknownPath(full_path.to_string()))
    }

    async fn write_leaf(
        &self,
        subsystem: &str,
        manager: &Arc<SubsystemManager<T>>,
        leaf_path: &str,
        value: Value,
    ) -> Result<(), ControlError> {
        let spec = self
            .registry
            .resolve(leaf_path)
            .ok_or_else(|| ControlError::UnknownPath(leaf_path.to_string()))?;

        let expect_str = |value: &Value| -> Result<String, ControlError> {
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| ControlError::InvalidValue {
                    path: leaf_path.to_string(),
                    reason: "expected a string".to_string(),
                })
        };
        let expect_u64 = |value: &Value| -> Result<u64, ControlError> {
            value.as_u64().ok_or_else(|| ControlError::InvalidValue {
                path: leaf_path.to_string(),
                reason: "expected an unsigned integer".to_string(),
            })
        };

        match spec.leaf {
            ManagerLeaf::Timeout => {
                let seconds = value.as_f64().filter(|s| *s >= 0.0).ok_or_else(|| {
                    ControlError::InvalidValue {
                        path: leaf_path.to_string(),
                        reason: "expected a non-negative number of seconds".to_string(),
                    }
                })?;
                manager.set_timeout(Duration::from_secs_f64(seconds)).await;
            }
            ManagerLeaf::FilePath => {
                let path = expect_str(&value)?;
                tracing::debug!(subsystem, value = %path, "Setting acquisition argument file_path");
                manager.update_request(|request| request.file_path = path);
            }
            ManagerLeaf::FileName => {
                let name = expect_str(&value)?;
                tracing::debug!(subsystem, value = %name, "Setting acquisition argument file_name");
                manager.update_request(|request| request.file_name = name);
            }
            ManagerLeaf::NumFrames => {
                let frames = expect_u64(&value)?;
                tracing::debug!(subsystem, value = frames, "Setting acquisition argument num_frames");
                manager.update_request(|request| request.num_frames = frames);
            }
            ManagerLeaf::NumBatches => {
                let batches = expect_u64(&value)?;
                tracing::debug!(subsystem, value = batches, "Setting acquisition argument num_batches");
                manager.update_request(|request| request.num_batches = batches);
            }
            ManagerLeaf::StopExecute => {
                if !manager.stop_acquisition().await {
                    return Err(ControlError::StopFailed(subsystem.to_string()));
                }
            }
            ManagerLeaf::StartLiveview => {
                if !manager.start_liveview().await {
                    return Err(ControlError::LiveviewFailed(subsystem.to_string()));
                }
            }
            ManagerLeaf::Endpoints
            | ManagerLeaf::Executing
            | ManagerLeaf::FramesWritten
            | ManagerLeaf::FpStatus => {
                return Err(ControlError::ReadOnly(leaf_path.to_string()));
            }
        }
        Ok(())
    }

    fn read_leaf(&self, manager: &SubsystemManager<T>, leaf: ManagerLeaf) -> Value {
        match leaf {
            ManagerLeaf::Endpoints => json!(manager.endpoints()),
            ManagerLeaf::Timeout => json!(manager.ctrl_timeout().as_secs_f64()),
            ManagerLeaf::FilePath => json!(manager.acquisition_request().file_path),
            ManagerLeaf::FileName => json!(manager.acquisition_request().file_name),
            ManagerLeaf::NumFrames => json!(manager.acquisition_request().num_frames),
            ManagerLeaf::NumBatches => json!(manager.acquisition_request().num_batches),
            ManagerLeaf::Executing => json!(manager.is_executing()),
            ManagerLeaf::FramesWritten => json!(manager.frames_written()),
            ManagerLeaf::FpStatus => manager.frame_proc_status(),
            ManagerLeaf::StopExecute | ManagerLeaf::StartLiveview => Value::Null,
        }
    }

    /// Reads a manager-relative path: a leaf, or a branch assembled from the
    /// readable leaves beneath it.
    fn read_manager_path(
        &self,
        manager: &SubsystemManager<T>,
        relative: &str,
    ) -> Result<Value, ControlError> {
        if let Some(spec) = self.registry.resolve(relative) {
            return Ok(self.read_leaf(manager, spec.leaf));
        }

        if relative.is_empty() || self.registry.has_branch(relative) {
            let mut branch = Map::new();
            for (path, spec) in self.registry.leaves_under(relative) {
                insert_at(&mut branch, path, self.read_leaf(manager, spec.leaf));
            }
            return Ok(Value::Object(branch));
        }

        tracing::error!(path = relative, "Unknown control-tree path");
        Err(ControlError::UnknownPath(relative.to_string()))
    }

    fn all_subsystem_branches(&self) -> Map<String, Value> {
        self.subsystems
            .iter()
            .filter_map(|name| {
                self.managers.get(name).and_then(|manager| {
                    self.read_manager_path(manager, "")
                        .ok()
                        .map(|branch| (name.clone(), branch))
                })
            })
            .collect()
    }

    fn all_execute_flags(&self) -> Map<String, Value> {
        self.subsystems
            .iter()
            .filter_map(|name| {
                self.execute_flags
                    .get(name)
                    .map(|flag| (name.clone(), json!(flag.load(Ordering::Acquire))))
            })
            .collect()
    }
}

impl<T: Transport> std::fmt::Debug for SubsystemDispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubsystemDispatcher")
            .field("subsystems", &self.subsystems)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::{nack, status_response, MockTransport, Script};
    use crate::worker::{ConfigProfile, WorkerClient};

    fn test_profile() -> ConfigProfile {
        serde_json::from_value(json!({
            "acquisition_config": {
                "plug": {"rx_frames": 0},
                "hdf": {"file": {"path": "/old"}, "frames": 0, "acquisition_id": "old"},
            },
            "start_config": {"hdf": {"write": true}},
            "stop_config": {"hdf": {"write": false}},
        }))
        .unwrap()
    }

    fn make_worker(transport: MockTransport) -> WorkerClient<MockTransport> {
        let (monitor, _events) = MockTransport::connected_monitor();
        WorkerClient::new(
            "127.0.0.1:5000",
            "det",
            transport,
            monitor,
            test_profile(),
            Duration::from_millis(100),
        )
    }

    fn make_dispatcher(transport: MockTransport) -> SubsystemDispatcher<MockTransport> {
        let manager = SubsystemManager::new(
            "det",
            vec![make_worker(transport)],
            Duration::from_millis(100),
            Duration::from_millis(20),
            false,
        );
        SubsystemDispatcher::new(vec![Arc::new(manager)])
    }

    /// Transport scripted for one full successful acquisition:
    /// stop, acquisition config, start, then the post-start status refresh.
    fn acquisition_transport() -> MockTransport {
        let mut transport = MockTransport::new();
        transport.push_ack(1);
        transport.push_ack(2);
        transport.push_ack(3);
        transport.push(Script::Respond(status_response(
            4,
            json!({"hdf": {"writing": true}}),
        )));
        transport
    }

    fn set_manager_status(dispatcher: &SubsystemDispatcher<MockTransport>, status: Value) {
        let manager = dispatcher.manager("det").unwrap();
        *manager.cached_status_mut() = vec![status];
    }

    #[tokio::test]
    async fn test_get_subsystem_list() {
        let dispatcher = make_dispatcher(MockTransport::new());
        assert_eq!(dispatcher.get("subsystem_list").unwrap(), json!(["det"]));
    }

    #[tokio::test]
    async fn test_get_unknown_path_errors() {
        let dispatcher = make_dispatcher(MockTransport::new());
        assert!(matches!(
            dispatcher.get("bogus"),
            Err(ControlError::UnknownPath(_))
        ));
        assert!(matches!(
            dispatcher.get("subsystems/det/bogus"),
            Err(ControlError::UnknownPath(_))
        ));
        assert!(matches!(
            dispatcher.get("subsystems/other/timeout"),
            Err(ControlError::UnknownSubsystem(_))
        ));
    }

    #[tokio::test]
    async fn test_get_manager_branch() {
        let dispatcher = make_dispatcher(MockTransport::new());

        let branch = dispatcher.get("subsystems/det").unwrap();
        assert_eq!(branch["args"]["file_path"], "/tmp/");
        assert_eq!(branch["args"]["num_frames"], 1000);
        assert_eq!(branch["status"]["executing"], false);
        assert_eq!(branch["endpoints"], json!(["127.0.0.1:5000"]));

        let args = dispatcher.get("subsystems/det/args").unwrap();
        assert_eq!(args["file_name"], "test");
    }

    #[tokio::test]
    async fn test_set_args_object_updates_request() {
        let dispatcher = make_dispatcher(MockTransport::new());

        let updated = dispatcher
            .set(
                "subsystems/det/args",
                json!({"file_path": "/data", "file_name": "run1", "num_frames": 500}),
            )
            .await
            .unwrap();
        assert_eq!(updated["file_path"], "/data");
        assert_eq!(updated["num_frames"], 500);

        let request = dispatcher.manager("det").unwrap().acquisition_request();
        assert_eq!(request.file_path, "/data");
        assert_eq!(request.file_name, "run1");
        assert_eq!(request.num_frames, 500);
        // Unwritten args keep their defaults
        assert_eq!(request.num_batches, 1);
    }

    #[tokio::test]
    async fn test_set_single_leaf() {
        let dispatcher = make_dispatcher(MockTransport::new());

        let updated = dispatcher
            .set("subsystems/det/args/num_frames", json!(250))
            .await
            .unwrap();
        assert_eq!(updated, json!(250));
    }

    #[tokio::test]
    async fn test_set_read_only_leaf_rejected() {
        let dispatcher = make_dispatcher(MockTransport::new());
        let result = dispatcher
            .set("subsystems/det/status/executing", json!(true))
            .await;
        assert!(matches!(result, Err(ControlError::ReadOnly(_))));
    }

    #[tokio::test]
    async fn test_set_invalid_value_rejected() {
        let dispatcher = make_dispatcher(MockTransport::new());
        let result = dispatcher
            .set("subsystems/det/args/num_frames", json!("many"))
            .await;
        assert!(matches!(result, Err(ControlError::InvalidValue { .. })));

        let result = dispatcher
            .set("subsystems/det/timeout", json!(-2.0))
            .await;
        assert!(matches!(result, Err(ControlError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_set_timeout_leaf() {
        let dispatcher = make_dispatcher(MockTransport::new());

        dispatcher
            .set("subsystems/det/timeout", json!(2.5))
            .await
            .unwrap();
        assert_eq!(
            dispatcher.manager("det").unwrap().ctrl_timeout(),
            Duration::from_secs_f64(2.5)
        );
        assert_eq!(dispatcher.get("subsystems/det/timeout").unwrap(), json!(2.5));
    }

    #[tokio::test]
    async fn test_execute_trigger_runs_acquisition_once() {
        let dispatcher = make_dispatcher(acquisition_transport());

        let updated = dispatcher.set("execute", json!({"det": true})).await.unwrap();
        // Trigger cleared on successful dispatch
        assert_eq!(updated["det"], false);

        let manager = dispatcher.manager("det").unwrap();
        let worker = manager.workers()[0].lock().await;
        // Exactly one acquisition ran: stop, acquisition, start, status
        assert_eq!(worker.transport().sent.len(), 4);
    }

    #[tokio::test]
    async fn test_execute_direct_path_form() {
        let dispatcher = make_dispatcher(acquisition_transport());

        let updated = dispatcher.set("execute/det", json!(true)).await.unwrap();
        assert_eq!(updated, json!(false));
    }

    #[tokio::test]
    async fn test_execute_rejected_while_executing() {
        let dispatcher = make_dispatcher(MockTransport::new());
        set_manager_status(&dispatcher, json!({"hdf": {"writing": true}}));

        let result = dispatcher.set("execute", json!({"det": true})).await;
        assert!(matches!(result, Err(ControlError::AlreadyExecuting(_))));
    }

    #[tokio::test]
    async fn test_failed_execution_keeps_trigger_set() {
        // The worker rejects the stop that opens create_acquisition
        let mut transport = MockTransport::new();
        transport.push(Script::Respond(nack(1)));

        let dispatcher = make_dispatcher(transport);
        let result = dispatcher.set("execute", json!({"det": true})).await;
        assert!(matches!(result, Err(ControlError::ExecutionFailed(_))));
        assert_eq!(dispatcher.get("execute/det").unwrap(), json!(true));

        // Re-triggering while the previous trigger is pending is rejected
        let result = dispatcher.set("execute", json!({"det": true})).await;
        assert!(matches!(result, Err(ControlError::AlreadyTriggered(_))));

        // An explicit false clears the pending trigger
        let updated = dispatcher.set("execute/det", json!(false)).await.unwrap();
        assert_eq!(updated, json!(false));
    }

    #[tokio::test]
    async fn test_execute_unknown_subsystem_rejected() {
        let dispatcher = make_dispatcher(MockTransport::new());
        let result = dispatcher.set("execute", json!({"other": true})).await;
        assert!(matches!(result, Err(ControlError::UnknownSubsystem(_))));
    }

    #[tokio::test]
    async fn test_execute_non_boolean_rejected() {
        let dispatcher = make_dispatcher(MockTransport::new());
        let result = dispatcher.set("execute/det", json!("yes")).await;
        assert!(matches!(result, Err(ControlError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_stop_execute_leaf_stops_workers() {
        let mut transport = MockTransport::new();
        transport.push_ack(1); // stop
        transport.push(Script::Respond(status_response(
            2,
            json!({"hdf": {"writing": false}}),
        )));

        let dispatcher = make_dispatcher(transport);
        set_manager_status(&dispatcher, json!({"hdf": {"writing": true}}));

        dispatcher
            .set("subsystems/det/stop_execute", json!(true))
            .await
            .unwrap();
        assert!(!dispatcher.manager("det").unwrap().is_executing());
    }

    #[tokio::test]
    async fn test_stop_execute_failure_surfaces() {
        let mut transport = MockTransport::new();
        transport.push(Script::Respond(nack(1)));

        let dispatcher = make_dispatcher(transport);
        let result = dispatcher
            .set("subsystems/det/stop_execute", json!(true))
            .await;
        assert!(matches!(result, Err(ControlError::StopFailed(_))));
    }

    #[tokio::test]
    async fn test_liveview_disabled_surfaces_failure() {
        let dispatcher = make_dispatcher(MockTransport::new());
        let result = dispatcher
            .set("subsystems/det/start_liveview", json!(true))
            .await;
        assert!(matches!(result, Err(ControlError::LiveviewFailed(_))));
    }

    #[tokio::test]
    async fn test_get_full_tree() {
        let dispatcher = make_dispatcher(MockTransport::new());

        let tree = dispatcher.get("").unwrap();
        assert_eq!(tree["subsystem_list"], json!(["det"]));
        assert_eq!(tree["execute"]["det"], false);
        assert_eq!(tree["subsystems"]["det"]["args"]["num_frames"], 1000);
    }
}
