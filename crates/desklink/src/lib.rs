//! Typed async client for a desktop application-container runtime.
//! Default path: `DesktopRuntime::connect`. Use `desklink::runtime` for session-level control.

mod connect;
mod system;
mod types;

pub use connect::{ConnectConfig, ConnectError, Endpoint, RUNTIME_PORT_ENV, RUNTIME_URL_ENV};
pub use desklink_runtime::{
    CallError, ConnectionState, Connector, EventFrame, EventListener, ListenerError,
    ReconnectPolicy, RuntimeError, Session, SessionConfig, SessionMetricsSnapshot,
    StdioProcessSpec, SubscriptionToken, TransportConfig,
};
pub use system::{actions, topics, DeskError, DesktopRuntime, LaunchedProcess};
pub use types::{
    ApplicationInfo, ClearCacheOptions, ExternalProcessExit, ExternalProcessInfo, LogInfo,
    LogLevel, MonitorInfo, MousePosition, ProcessInfo, RuntimeInfo, RvmInfo, WindowInfo,
};

pub use desklink_runtime as runtime;
