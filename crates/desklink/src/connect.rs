use std::sync::Arc;

use thiserror::Error;
use tokio::time::Duration;

use desklink_runtime::{
    Connector, ReconnectPolicy, RuntimeError, SessionConfig, StdioConnector, StdioProcessSpec,
    TransportConfig, WebSocketConnector,
};

/// Full WebSocket URL of the runtime, e.g. `ws://127.0.0.1:9696/`.
pub const RUNTIME_URL_ENV: &str = "DESKLINK_RUNTIME_URL";
/// Local runtime port; expands to `ws://127.0.0.1:<port>/`.
pub const RUNTIME_PORT_ENV: &str = "DESKLINK_RUNTIME_PORT";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    WebSocket(String),
    Stdio(StdioProcessSpec),
}

impl Endpoint {
    pub fn local_port(port: u16) -> Self {
        Self::WebSocket(format!("ws://127.0.0.1:{port}/"))
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConnectError {
    #[error("runtime endpoint not configured; set {RUNTIME_URL_ENV} or {RUNTIME_PORT_ENV}")]
    EndpointNotConfigured,

    #[error("invalid runtime endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("invalid runtime port: {0}")]
    InvalidPort(String),

    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
}

/// Connection settings for [`crate::DesktopRuntime`].
///
/// Anything left unset falls back to the environment, then to session defaults.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectConfig {
    pub endpoint: Option<Endpoint>,
    /// Caller identity. A fresh UUID v4 is generated when unset.
    pub uuid: Option<String>,
    pub request_timeout: Duration,
    pub reconnect: ReconnectPolicy,
    pub transport: TransportConfig,
}

impl Default for ConnectConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            uuid: None,
            request_timeout: SessionConfig::default().request_timeout,
            reconnect: ReconnectPolicy::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl ConnectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn with_websocket(self, url: impl Into<String>) -> Self {
        self.with_endpoint(Endpoint::WebSocket(url.into()))
    }

    pub fn with_port(self, port: u16) -> Self {
        self.with_endpoint(Endpoint::local_port(port))
    }

    pub fn with_stdio(self, spec: StdioProcessSpec) -> Self {
        self.with_endpoint(Endpoint::Stdio(spec))
    }

    pub fn with_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.uuid = Some(uuid.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    pub fn with_transport(mut self, transport: TransportConfig) -> Self {
        self.transport = transport;
        self
    }

    /// Resolve endpoint from explicit config, `DESKLINK_RUNTIME_URL`, then
    /// `DESKLINK_RUNTIME_PORT`.
    /// Side effects: reads process env.
    pub fn resolve_endpoint(&self) -> Result<Endpoint, ConnectError> {
        resolve_endpoint_with(self.endpoint.as_ref(), |key| std::env::var(key).ok())
    }

    /// Session settings derived from this config. Validated by the session.
    pub fn session_config(&self) -> SessionConfig {
        let mut config = SessionConfig::new()
            .with_request_timeout(self.request_timeout)
            .with_reconnect(self.reconnect);
        if let Some(uuid) = self.uuid.as_ref() {
            config = config.with_identity(uuid.clone());
        }
        config
    }

    pub fn connector(&self) -> Result<Arc<dyn Connector>, ConnectError> {
        let connector: Arc<dyn Connector> = match self.resolve_endpoint()? {
            Endpoint::WebSocket(url) => {
                Arc::new(WebSocketConnector::new(url).with_config(self.transport))
            }
            Endpoint::Stdio(spec) => Arc::new(StdioConnector::new(spec).with_config(self.transport)),
        };
        Ok(connector)
    }
}

pub(crate) fn resolve_endpoint_with(
    explicit: Option<&Endpoint>,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Endpoint, ConnectError> {
    if let Some(endpoint) = explicit {
        return validate_endpoint(endpoint.clone());
    }

    let non_empty = |key: &str| {
        lookup(key)
            .map(|value| value.trim().to_owned())
            .filter(|value| !value.is_empty())
    };

    if let Some(url) = non_empty(RUNTIME_URL_ENV) {
        return validate_endpoint(Endpoint::WebSocket(url));
    }

    if let Some(port) = non_empty(RUNTIME_PORT_ENV) {
        let parsed = port
            .parse::<u16>()
            .ok()
            .filter(|port| *port != 0)
            .ok_or(ConnectError::InvalidPort(port))?;
        return Ok(Endpoint::local_port(parsed));
    }

    Err(ConnectError::EndpointNotConfigured)
}

fn validate_endpoint(endpoint: Endpoint) -> Result<Endpoint, ConnectError> {
    match &endpoint {
        Endpoint::WebSocket(url) => {
            let rest = url
                .strip_prefix("ws://")
                .or_else(|| url.strip_prefix("wss://"))
                .ok_or_else(|| ConnectError::InvalidEndpoint(url.clone()))?;
            if rest.trim_matches('/').is_empty() {
                return Err(ConnectError::InvalidEndpoint(url.clone()));
            }
        }
        Endpoint::Stdio(spec) => {
            if spec.program.as_os_str().is_empty() {
                return Err(ConnectError::InvalidEndpoint(
                    "stdio program must not be empty".to_owned(),
                ));
            }
        }
    }
    Ok(endpoint)
}
