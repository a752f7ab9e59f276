use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use desklink_runtime::{
    CallError, Connector, DisconnectReason, EventFrame, EventListener, ListenerError,
    RuntimeError, Session, SubscriptionToken,
};

use crate::connect::{ConnectConfig, ConnectError};
use crate::types::{
    ApplicationInfo, ClearCacheOptions, ExternalProcessExit, ExternalProcessInfo, LogInfo,
    LogLevel, MonitorInfo, MousePosition, ProcessInfo, RuntimeInfo, RvmInfo, WindowInfo,
};

/// Wire action names of the system operations.
pub mod actions {
    pub const GET_MACHINE_ID: &str = "get-machine-id";
    pub const GET_VERSION: &str = "get-version";
    pub const PROCESS_SNAPSHOT: &str = "process-snapshot";
    pub const GET_LOG_LIST: &str = "get-log-list";
    pub const GET_LOG: &str = "get-log";
    pub const WRITE_LOG: &str = "write-log";
    pub const GET_MONITOR_INFO: &str = "get-monitor-info";
    pub const GET_ALL_WINDOWS: &str = "get-all-windows";
    pub const GET_ALL_APPLICATIONS: &str = "get-all-applications";
    pub const GET_MOUSE_POSITION: &str = "get-mouse-position";
    pub const GET_CONFIG: &str = "get-config";
    pub const SHOW_DEVELOPER_TOOLS: &str = "show-developer-tools";
    pub const LAUNCH_EXTERNAL_PROCESS: &str = "launch-external-process";
    pub const TERMINATE_EXTERNAL_PROCESS: &str = "terminate-external-process";
    pub const GET_ENVIRONMENT_VARIABLE: &str = "get-environment-variable";
    pub const DELETE_CACHE_REQUEST: &str = "delete-cache-request";
    pub const CLEAR_CACHE: &str = "clear-cache";
    pub const GET_RUNTIME_INFO: &str = "get-runtime-info";
    pub const GET_RVM_INFO: &str = "get-rvm-info";
}

/// System event topics pushed by the runtime.
pub mod topics {
    pub const DESKTOP_ICON_CLICKED: &str = "desktop-icon-clicked";
    pub const IDLE_STATE_CHANGED: &str = "idle-state-changed";
    pub const MONITOR_INFO_CHANGED: &str = "monitor-info-changed";
    pub const SESSION_CHANGED: &str = "session-changed";
    pub const EXTERNAL_PROCESS_EXITED: &str = "external-process-exited";
}

/// Log reads can be large; never wait less than this for `get_log`.
const LOG_READ_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DeskError {
    #[error(transparent)]
    Call(#[from] CallError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid response for {action}: {message}")]
    InvalidResponse { action: String, message: String },
}

impl DeskError {
    fn invalid_response(action: &str, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            action: action.to_owned(),
            message: message.into(),
        }
    }
}

/// External process started by [`DesktopRuntime::launch_external_process`].
///
/// Hand it to [`DesktopRuntime::wait_external_process_exit`] to await the exit
/// report and release the exit subscription.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub info: ExternalProcessInfo,
    subscription: SubscriptionToken,
    exit_rx: oneshot::Receiver<ExternalProcessExit>,
}

impl LaunchedProcess {
    pub fn process_uuid(&self) -> &str {
        &self.info.process_uuid
    }
}

/// Typed system API of the desktop runtime.
///
/// Every method is a stateless adapter: validate arguments, issue one call on
/// the shared session, check the reply shape.
#[derive(Clone)]
pub struct DesktopRuntime {
    session: Session,
}

impl DesktopRuntime {
    /// Connect with explicit config; unset fields fall back to the environment.
    pub async fn connect(config: ConnectConfig) -> Result<Self, ConnectError> {
        let connector = config.connector()?;
        let session = Session::with_shared_connector(config.session_config(), connector)?;
        session.open().await?;
        Ok(Self { session })
    }

    /// Connect with endpoint discovery from `DESKLINK_RUNTIME_URL` / `DESKLINK_RUNTIME_PORT`.
    pub async fn connect_default() -> Result<Self, ConnectError> {
        Self::connect(ConnectConfig::new()).await
    }

    /// Connect through a caller-provided connector. The endpoint in `config` is ignored.
    pub async fn connect_with(
        config: ConnectConfig,
        connector: impl Connector,
    ) -> Result<Self, ConnectError> {
        let session = Session::connect(config.session_config(), connector).await?;
        Ok(Self { session })
    }

    pub fn from_session(session: Session) -> Self {
        Self { session }
    }

    /// Borrow the underlying session for low-level calls.
    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn identity(&self) -> &str {
        self.session.identity()
    }

    pub async fn close(&self) -> Result<(), RuntimeError> {
        self.session.close().await
    }

    pub async fn get_machine_id(&self) -> Result<String, DeskError> {
        let value = self.request(actions::GET_MACHINE_ID, json!({})).await?;
        expect_text(actions::GET_MACHINE_ID, value)
    }

    pub async fn get_version(&self) -> Result<String, DeskError> {
        let value = self.request(actions::GET_VERSION, json!({})).await?;
        expect_text(actions::GET_VERSION, value)
    }

    pub async fn get_process_list(&self) -> Result<Vec<ProcessInfo>, DeskError> {
        self.request_typed(actions::PROCESS_SNAPSHOT, json!({})).await
    }

    pub async fn get_log_list(&self) -> Result<Vec<LogInfo>, DeskError> {
        self.request_typed(actions::GET_LOG_LIST, json!({})).await
    }

    /// Read one log file by name, e.g. `debug.log`.
    pub async fn get_log(&self, name: &str) -> Result<String, DeskError> {
        let name = require_non_empty("log name", name)?;
        let timeout = self.session.config().request_timeout.max(LOG_READ_TIMEOUT);
        let value = self
            .session
            .call_with_timeout(actions::GET_LOG, json!({ "name": name }), timeout)
            .await?;
        expect_text(actions::GET_LOG, value)
    }

    /// Append one line to the runtime log.
    pub async fn log(&self, level: LogLevel, text: &str) -> Result<(), DeskError> {
        self.request(actions::WRITE_LOG, json!({ "level": level, "text": text }))
            .await
            .map(drop)
    }

    pub async fn get_monitor_info(&self) -> Result<MonitorInfo, DeskError> {
        self.request_typed(actions::GET_MONITOR_INFO, json!({})).await
    }

    pub async fn get_all_windows(&self) -> Result<Vec<WindowInfo>, DeskError> {
        self.request_typed(actions::GET_ALL_WINDOWS, json!({})).await
    }

    pub async fn get_all_applications(&self) -> Result<Vec<ApplicationInfo>, DeskError> {
        self.request_typed(actions::GET_ALL_APPLICATIONS, json!({}))
            .await
    }

    pub async fn get_mouse_position(&self) -> Result<MousePosition, DeskError> {
        self.request_typed(actions::GET_MOUSE_POSITION, json!({}))
            .await
    }

    /// Runtime configuration, whole or one `section`. Always a JSON object.
    pub async fn get_config(&self, section: Option<&str>) -> Result<Value, DeskError> {
        let mut payload = Map::new();
        if let Some(section) = section {
            let section = require_non_empty("config section", section)?;
            payload.insert("section".to_owned(), Value::String(section.to_owned()));
        }
        let value = self
            .request(actions::GET_CONFIG, Value::Object(payload))
            .await?;
        if !value.is_object() {
            return Err(DeskError::invalid_response(
                actions::GET_CONFIG,
                "expected a json object",
            ));
        }
        Ok(value)
    }

    /// Open developer tools for window `name` of application `uuid`.
    pub async fn show_developer_tools(&self, uuid: &str, name: &str) -> Result<(), DeskError> {
        let uuid = require_non_empty("application uuid", uuid)?;
        let name = require_non_empty("window name", name)?;
        self.request(
            actions::SHOW_DEVELOPER_TOOLS,
            json!({ "uuid": uuid, "name": name }),
        )
        .await
        .map(drop)
    }

    /// Register `listener` for a system event topic. Attached on the runtime
    /// when this is the first listener for the topic.
    pub async fn add_event_listener(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionToken, DeskError> {
        let topic = require_non_empty("event topic", topic)?;
        Ok(self.session.subscribe(topic, listener).await?)
    }

    /// Remove every registration of `listener` on `topic`. Returns how many were removed.
    pub async fn remove_event_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn EventListener>,
    ) -> Result<usize, DeskError> {
        Ok(self.session.unsubscribe_listener(topic, listener).await?)
    }

    /// Remove one registration by token. Returns false when it was already gone.
    pub async fn remove_event_subscription(
        &self,
        topic: &str,
        token: SubscriptionToken,
    ) -> Result<bool, DeskError> {
        Ok(self.session.unsubscribe(topic, token).await?)
    }

    /// Launch an executable on the desktop host.
    ///
    /// The exit report arrives later as an `external-process-exited` event
    /// tagged with a per-launch listener id.
    pub async fn launch_external_process(
        &self,
        path: &str,
        arguments: &str,
    ) -> Result<LaunchedProcess, DeskError> {
        let path = require_non_empty("process path", path)?;
        let listener_id = Uuid::new_v4().to_string();
        let (exit_tx, exit_rx) = oneshot::channel();
        let subscription = self
            .session
            .subscribe(
                topics::EXTERNAL_PROCESS_EXITED,
                exit_listener(listener_id.clone(), exit_tx),
            )
            .await?;

        let launched = self
            .request_typed::<ExternalProcessInfo>(
                actions::LAUNCH_EXTERNAL_PROCESS,
                json!({ "path": path, "arguments": arguments, "listener": listener_id }),
            )
            .await;
        let info = match launched {
            Ok(info) => info,
            Err(err) => {
                self.release_subscription(subscription).await;
                return Err(err);
            }
        };
        tracing::debug!(process_uuid = %info.process_uuid, path, "external process launched");

        Ok(LaunchedProcess {
            info,
            subscription,
            exit_rx,
        })
    }

    /// Wait up to `wait` for the exit report of a launched process.
    pub async fn wait_external_process_exit(
        &self,
        process: LaunchedProcess,
        wait: Duration,
    ) -> Result<ExternalProcessExit, DeskError> {
        let LaunchedProcess {
            info,
            subscription,
            exit_rx,
        } = process;
        let outcome = timeout(wait, exit_rx).await;
        self.release_subscription(subscription).await;
        match outcome {
            Ok(Ok(exit)) => Ok(exit),
            Ok(Err(_)) => Err(DeskError::Call(CallError::Disconnected(
                DisconnectReason::Closed,
            ))),
            Err(_) => {
                tracing::debug!(process_uuid = %info.process_uuid, "external process exit wait timed out");
                Err(DeskError::Call(CallError::Timeout))
            }
        }
    }

    /// Ask the runtime to stop a launched process. `timeout` is how long the
    /// runtime waits before killing it; `kill_tree` also stops child processes.
    pub async fn terminate_external_process(
        &self,
        process_uuid: &str,
        timeout: Duration,
        kill_tree: bool,
    ) -> Result<ExternalProcessExit, DeskError> {
        let process_uuid = require_non_empty("process uuid", process_uuid)?;
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        let call_timeout = self.session.config().request_timeout + timeout;
        let value = self
            .session
            .call_with_timeout(
                actions::TERMINATE_EXTERNAL_PROCESS,
                json!({ "uuid": process_uuid, "timeout": timeout_ms, "child": kill_tree }),
                call_timeout,
            )
            .await?;
        decode(actions::TERMINATE_EXTERNAL_PROCESS, value)
    }

    /// Look up environment variables on the desktop host. Every requested name
    /// is present in the result; unset variables map to `None`.
    pub async fn get_environment_variables(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, Option<String>>, DeskError> {
        if names.is_empty() {
            return Err(DeskError::InvalidArgument(
                "at least one environment variable name is required".to_owned(),
            ));
        }
        for name in names {
            require_non_empty("environment variable name", name)?;
        }

        let value = self
            .request(
                actions::GET_ENVIRONMENT_VARIABLE,
                json!({ "environmentVariables": names }),
            )
            .await?;
        let values: HashMap<String, Option<String>> =
            decode(actions::GET_ENVIRONMENT_VARIABLE, value)?;
        if let Some(missing) = names.iter().find(|name| !values.contains_key(**name)) {
            return Err(DeskError::invalid_response(
                actions::GET_ENVIRONMENT_VARIABLE,
                format!("missing environment variable {missing}"),
            ));
        }
        Ok(values)
    }

    /// Ask the runtime to drop its cache on the next restart.
    pub async fn delete_cache_on_restart(&self) -> Result<(), DeskError> {
        self.request(actions::DELETE_CACHE_REQUEST, json!({}))
            .await
            .map(drop)
    }

    pub async fn clear_cache(&self, options: ClearCacheOptions) -> Result<(), DeskError> {
        let payload = serde_json::to_value(options)
            .map_err(|err| DeskError::Call(CallError::Encode(err.to_string())))?;
        self.request(actions::CLEAR_CACHE, payload).await.map(drop)
    }

    pub async fn get_runtime_info(&self) -> Result<RuntimeInfo, DeskError> {
        self.request_typed(actions::GET_RUNTIME_INFO, json!({})).await
    }

    pub async fn get_rvm_info(&self) -> Result<RvmInfo, DeskError> {
        self.request_typed(actions::GET_RVM_INFO, json!({})).await
    }

    async fn request(&self, action: &str, payload: Value) -> Result<Value, DeskError> {
        Ok(self.session.call(action, payload).await?)
    }

    async fn request_typed<R>(&self, action: &str, payload: Value) -> Result<R, DeskError>
    where
        R: DeserializeOwned,
    {
        let value = self.request(action, payload).await?;
        decode(action, value)
    }

    async fn release_subscription(&self, token: SubscriptionToken) {
        if let Err(err) = self
            .session
            .unsubscribe(topics::EXTERNAL_PROCESS_EXITED, token)
            .await
        {
            tracing::warn!(error = %err, "failed to release exit listener");
        }
    }
}

/// One-shot listener: forwards the first exit event carrying `listener_id`.
fn exit_listener(
    listener_id: String,
    exit_tx: oneshot::Sender<ExternalProcessExit>,
) -> Arc<dyn EventListener> {
    let exit_tx = Mutex::new(Some(exit_tx));
    Arc::new(move |event: &EventFrame| -> Result<(), ListenerError> {
        if event.payload.get("listener").and_then(Value::as_str) != Some(listener_id.as_str()) {
            return Ok(());
        }
        let exit: ExternalProcessExit = serde_json::from_value(event.payload.clone())
            .map_err(|err| ListenerError::new(err.to_string()))?;
        let sender = match exit_tx.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(exit);
        }
        Ok(())
    })
}

fn decode<R: DeserializeOwned>(action: &str, value: Value) -> Result<R, DeskError> {
    serde_json::from_value(value).map_err(|err| DeskError::invalid_response(action, err.to_string()))
}

fn expect_text(action: &str, value: Value) -> Result<String, DeskError> {
    match value {
        Value::String(text) => Ok(text),
        other => Err(DeskError::invalid_response(
            action,
            format!("expected a string, got {other}"),
        )),
    }
}

fn require_non_empty<'a>(what: &str, value: &'a str) -> Result<&'a str, DeskError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DeskError::InvalidArgument(format!("{what} must not be empty")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests;
