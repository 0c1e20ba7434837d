//! Local subprocess acquisition controller.
//!
//! The simpler, non-distributed controller variant: a command template with
//! `{name:default}` substitutions is parsed into settable arguments, and an
//! execution runs the assembled command as a subprocess, capturing return
//! code, stdout and stderr into status. Executions go through an explicit
//! per-controller [`ExecutionPool`] passed in at construction.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use super::{AcquisitionController, ControllerFuture};
use crate::error::ControlError;

/// Bounded pool of subprocess execution slots.
///
/// Owned by one controller; never shared process-globally. Cloning shares
/// the same slot budget, for callers that split a controller across tasks.
#[derive(Clone)]
pub struct ExecutionPool {
    permits: Arc<Semaphore>,
}

impl ExecutionPool {
    /// Creates a pool with the given number of concurrent execution slots.
    ///
    /// A capacity of zero is promoted to one slot.
    pub fn new(capacity: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity.max(1))),
        }
    }
}

impl std::fmt::Debug for ExecutionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPool")
            .field("available", &self.permits.available_permits())
            .finish()
    }
}

/// One element of the parsed command template.
#[derive(Debug, Clone)]
enum CmdToken {
    /// Verbatim argument
    Fixed(String),
    /// Substituted from the named settable argument
    Arg(String),
}

/// Captured result of the last execution.
#[derive(Debug, Clone, Default)]
struct ExecutionState {
    return_code: Option<i64>,
    last_command: Option<String>,
    stdout: Option<String>,
    stderr: Option<String>,
    exception: Option<String>,
}

/// Controller that templates and runs a local command.
pub struct LocalProcessController {
    tokens: Vec<CmdToken>,
    args: RwLock<HashMap<String, Value>>,
    timeout: Duration,
    pool: ExecutionPool,
    executing: AtomicBool,
    state: RwLock<ExecutionState>,
    cancel: RwLock<CancellationToken>,
}

impl LocalProcessController {
    /// Parses the command template and builds the controller.
    ///
    /// Template arguments are marked with curly braces, optionally with a
    /// default after a colon: `capture --frames {num_frames:1000} {out}`.
    /// Defaults are parsed as JSON values where possible, strings otherwise;
    /// arguments without a default start empty.
    pub fn new(cmd_template: &str, timeout: Duration, pool: ExecutionPool) -> Self {
        let (tokens, args) = parse_template(cmd_template);
        Self {
            tokens,
            args: RwLock::new(args),
            timeout,
            pool,
            executing: AtomicBool::new(false),
            state: RwLock::new(ExecutionState::default()),
            cancel: RwLock::new(CancellationToken::new()),
        }
    }

    /// Names of the settable template arguments.
    pub fn arg_names(&self) -> Vec<String> {
        self.args
            .read()
            .map(|args| args.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Current value of one settable argument.
    pub fn arg(&self, name: &str) -> Option<Value> {
        self.args
            .read()
            .ok()
            .and_then(|args| args.get(name).cloned())
    }

    /// Sets one settable argument.
    pub fn set_arg(&self, name: &str, value: Value) -> Result<(), ControlError> {
        let Ok(mut args) = self.args.write() else {
            return Err(ControlError::UnknownPath(name.to_string()));
        };
        match args.get_mut(name) {
            Some(slot) => {
                tracing::debug!(name, %value, "Setting command argument");
                *slot = value;
                Ok(())
            }
            None => Err(ControlError::UnknownPath(name.to_string())),
        }
    }

    /// True while a command is running.
    pub fn is_executing(&self) -> bool {
        self.executing.load(Ordering::Acquire)
    }

    /// Runs the templated command once.
    ///
    /// Rejected while a previous execution is still running. Acquires one
    /// pool slot, runs the subprocess with the configured timeout and
    /// records the outcome into status.
    pub async fn run(&self) -> bool {
        if self
            .executing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            tracing::error!("Cannot trigger execution while command is already running");
            return false;
        }
        let success = self.run_once().await;
        self.executing.store(false, Ordering::Release);
        success
    }

    async fn run_once(&self) -> bool {
        let Ok(_permit) = self.pool.permits.acquire().await else {
            tracing::error!("Execution pool is closed");
            return false;
        };

        let argv = self.assemble_command();
        if argv.is_empty() {
            tracing::error!("No command template specified");
            return false;
        }
        let rendered = argv.join(" ");
        self.with_state(|state| state.last_command = Some(rendered.clone()));
        tracing::debug!(command = %rendered, "Executing command");

        let token = CancellationToken::new();
        if let Ok(mut slot) = self.cancel.write() {
            *slot = token.clone();
        }

        let mut command = Command::new(&argv[0]);
        command.args(&argv[1..]).kill_on_drop(true);

        tokio::select! {
            biased;

            _ = token.cancelled() => {
                tracing::error!(command = %rendered, "Execution of command cancelled");
                self.with_state(|state| {
                    state.exception = Some("Execution of command cancelled".to_string());
                    state.return_code = Some(-1);
                });
                false
            }

            result = tokio::time::timeout(self.timeout, command.output()) => match result {
                Err(_) => {
                    let error = format!(
                        "Execution of command timed out after {} seconds",
                        self.timeout.as_secs_f64()
                    );
                    tracing::error!(command = %rendered, "{}", error);
                    self.with_state(|state| {
                        state.exception = Some(error);
                        state.return_code = Some(-1);
                    });
                    false
                }
                Ok(Err(e)) => {
                    tracing::error!(command = %rendered, error = %e, "Execution of command failed");
                    self.with_state(|state| state.exception = Some(e.to_string()));
                    false
                }
                Ok(Ok(output)) => {
                    let return_code = i64::from(output.status.code().unwrap_or(-1));
                    self.with_state(|state| {
                        state.exception = None;
                        state.return_code = Some(return_code);
                        state.stdout = Some(String::from_utf8_lossy(&output.stdout).into_owned());
                        state.stderr = Some(String::from_utf8_lossy(&output.stderr).into_owned());
                    });
                    if output.status.success() {
                        tracing::debug!("Execution of command completed OK");
                        true
                    } else {
                        tracing::error!(return_code, "Execution of command failed");
                        false
                    }
                }
            },
        }
    }

    fn assemble_command(&self) -> Vec<String> {
        let Ok(args) = self.args.read() else {
            return Vec::new();
        };
        self.tokens
            .iter()
            .map(|token| match token {
                CmdToken::Fixed(arg) => arg.clone(),
                CmdToken::Arg(name) => match args.get(name) {
                    Some(Value::String(value)) => value.clone(),
                    Some(value) => value.to_string(),
                    None => String::new(),
                },
            })
            .collect()
    }

    fn with_state(&self, update: impl FnOnce(&mut ExecutionState)) {
        if let Ok(mut state) = self.state.write() {
            update(&mut state);
        }
    }
}

impl AcquisitionController for LocalProcessController {
    fn execute(&self) -> ControllerFuture<'_, bool> {
        Box::pin(self.run())
    }

    fn stop(&self) -> ControllerFuture<'_, bool> {
        Box::pin(async move {
            if self.is_executing() {
                if let Ok(token) = self.cancel.read() {
                    token.cancel();
                }
                tracing::debug!("Cancellation requested for running command");
            }
            true
        })
    }

    fn status(&self) -> Value {
        let state = self
            .state
            .read()
            .map(|state| state.clone())
            .unwrap_or_default();
        json!({
            "executing": self.is_executing(),
            "return_code": state.return_code,
            "last_command": state.last_command,
            "stdout": state.stdout,
            "stderr": state.stderr,
            "exception": state.exception,
        })
    }
}

impl std::fmt::Debug for LocalProcessController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalProcessController")
            .field("tokens", &self.tokens.len())
            .field("executing", &self.is_executing())
            .finish()
    }
}

/// Parses a command template into tokens and settable-argument defaults.
fn parse_template(template: &str) -> (Vec<CmdToken>, HashMap<String, Value>) {
    let cleaned = template.replace('\n', " ");
    let mut tokens = Vec::new();
    let mut args = HashMap::new();

    for part in cleaned.split_whitespace() {
        match part.strip_prefix('{').and_then(|inner| inner.strip_suffix('}')) {
            Some(inner) => {
                let (name, default) = match inner.split_once(':') {
                    Some((name, default)) => (name, parse_default(default)),
                    None => (inner, Value::String(String::new())),
                };
                args.insert(name.to_string(), default);
                tokens.push(CmdToken::Arg(name.to_string()));
            }
            None => tokens.push(CmdToken::Fixed(part.to_string())),
        }
    }

    if tokens.is_empty() {
        tracing::warn!("Parsing the specified command template did not yield an executable command");
    }
    (tokens, args)
}

/// Types a default value: JSON literal where it parses, string otherwise.
fn parse_default(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
