use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use arc_swap::ArcSwapOption;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use uuid::Uuid;

use crate::correlation::{CallResult, CorrelationTable};
use crate::errors::{CallError, RuntimeError};
use crate::metrics::{SessionMetrics, SessionMetricsSnapshot};
use crate::router::{EventListener, EventRouter, SubscriptionToken};
use crate::state::ConnectionState;
use crate::transport::Connector;

mod call;
mod dispatch;
mod lifecycle;
mod supervisor;

pub use call::PendingReply;

use call::{request_raw, send_request};
use lifecycle::{close_session, open_session};

/// Session-level actions understood by the remote runtime.
pub mod actions {
    pub const REQUEST_AUTHORIZATION: &str = "request-authorization";
    pub const SUBSCRIBE_EVENT: &str = "subscribe-to-desktop-event";
    pub const UNSUBSCRIBE_EVENT: &str = "unsubscribe-to-desktop-event";
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReconnectPolicy {
    Never,
    Backoff {
        max_attempts: u32,
        base_backoff_ms: u64,
        max_backoff_ms: u64,
    },
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::Backoff {
            max_attempts: 5,
            base_backoff_ms: 100,
            max_backoff_ms: 5_000,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Caller identity sent on every handshake. Stable across reconnects.
    pub identity: String,
    pub client_name: String,
    pub request_timeout: Duration,
    pub handshake_timeout: Duration,
    pub timeout_sweep_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            identity: Uuid::new_v4().to_string(),
            client_name: "desklink".to_owned(),
            request_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            timeout_sweep_interval: Duration::from_millis(50),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
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

    pub fn validate(&self) -> Result<(), RuntimeError> {
        if self.identity.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "identity must not be empty".to_owned(),
            ));
        }
        if self.client_name.trim().is_empty() {
            return Err(RuntimeError::InvalidConfig(
                "client_name must not be empty".to_owned(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "request_timeout must be > 0".to_owned(),
            ));
        }
        if self.handshake_timeout.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "handshake_timeout must be > 0".to_owned(),
            ));
        }
        if self.timeout_sweep_interval.is_zero() {
            return Err(RuntimeError::InvalidConfig(
                "timeout_sweep_interval must be > 0".to_owned(),
            ));
        }
        if let ReconnectPolicy::Backoff {
            base_backoff_ms,
            max_backoff_ms,
            ..
        } = self.reconnect
        {
            if base_backoff_ms > max_backoff_ms {
                return Err(RuntimeError::InvalidConfig(
                    "base_backoff_ms must be <= max_backoff_ms".to_owned(),
                ));
            }
        }
        Ok(())
    }
}

struct DispatcherHandle {
    generation: u64,
    stop_tx: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

struct SessionTasks {
    dispatcher: Mutex<Option<DispatcherHandle>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

struct SessionInner {
    config: SessionConfig,
    connector: Arc<dyn Connector>,
    correlation: Arc<CorrelationTable>,
    router: EventRouter,
    metrics: Arc<SessionMetrics>,
    state_tx: watch::Sender<ConnectionState>,
    outbound_tx: ArcSwapOption<mpsc::Sender<Vec<u8>>>,
    next_message_id: AtomicU64,
    generation: AtomicU64,
    closing: AtomicBool,
    /// Serializes open, close, reconnect attach and remote subscription changes.
    lifecycle: tokio::sync::Mutex<()>,
    transport_lost: Notify,
    handshake_result: RwLock<Option<Value>>,
    tasks: SessionTasks,
}

/// One logical connection to the remote runtime.
///
/// Cheap to clone; all clones drive the same connection. Call `close` when
/// done, background tasks keep the session alive until then.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

impl Session {
    pub fn new(config: SessionConfig, connector: impl Connector) -> Result<Self, RuntimeError> {
        Self::with_shared_connector(config, Arc::new(connector))
    }

    pub fn with_shared_connector(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, RuntimeError> {
        config.validate()?;
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Ok(Self {
            inner: Arc::new(SessionInner {
                config,
                connector,
                correlation: Arc::new(CorrelationTable::new()),
                router: EventRouter::new(),
                metrics: Arc::new(SessionMetrics::new(now_millis())),
                state_tx,
                outbound_tx: ArcSwapOption::new(None),
                next_message_id: AtomicU64::new(1),
                generation: AtomicU64::new(0),
                closing: AtomicBool::new(false),
                lifecycle: tokio::sync::Mutex::new(()),
                transport_lost: Notify::new(),
                handshake_result: RwLock::new(None),
                tasks: SessionTasks {
                    dispatcher: Mutex::new(None),
                    supervisor: Mutex::new(None),
                },
            }),
        })
    }

    /// Build and open in one step.
    pub async fn connect(
        config: SessionConfig,
        connector: impl Connector,
    ) -> Result<Self, RuntimeError> {
        let session = Self::new(config, connector)?;
        session.open().await?;
        Ok(session)
    }

    /// Disconnected -> Connecting -> Open. No-op when already connecting or open.
    pub async fn open(&self) -> Result<(), RuntimeError> {
        open_session(&self.inner).await
    }

    /// Move to the terminal Closed state. Pending calls fail with
    /// `Disconnected(Closed)` and every subscription is dropped.
    pub async fn close(&self) -> Result<(), RuntimeError> {
        close_session(&self.inner).await
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state_tx.borrow()
    }

    pub fn is_open(&self) -> bool {
        self.state().is_open()
    }

    /// Observe connection state changes, including the terminal Closed state.
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }

    pub fn identity(&self) -> &str {
        &self.inner.config.identity
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    /// Data returned by the runtime for the latest successful handshake.
    pub fn handshake_snapshot(&self) -> Option<Value> {
        match self.inner.handshake_result.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn pending_call_count(&self) -> usize {
        self.inner.correlation.len()
    }

    pub fn metrics_snapshot(&self) -> SessionMetricsSnapshot {
        self.inner
            .metrics
            .snapshot(now_millis(), self.inner.correlation.len() as u64)
    }

    /// Submit one request. Returns as soon as the frame is queued for the
    /// transport and the reply is awaited through the returned handle. Fails
    /// with `Timeout` when the writer stays backed up past the call's deadline.
    pub async fn send(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> Result<PendingReply, CallError> {
        if !self.is_open() {
            return Err(CallError::NotConnected);
        }
        send_request(&self.inner, action, payload, timeout).await
    }

    /// Send and wait with the configured default timeout.
    pub async fn call(&self, action: &str, payload: Value) -> CallResult {
        self.call_with_timeout(action, payload, self.inner.config.request_timeout)
            .await
    }

    pub async fn call_with_timeout(
        &self,
        action: &str,
        payload: Value,
        timeout: Duration,
    ) -> CallResult {
        self.send(action, payload, timeout).await?.wait().await
    }

    pub async fn call_typed<P, R>(&self, action: &str, payload: P) -> Result<R, CallError>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        let payload = serde_json::to_value(payload)
            .map_err(|err| CallError::Encode(format!("{action}: {err}")))?;
        let result = self.call(action, payload).await?;
        serde_json::from_value(result)
            .map_err(|err| CallError::InvalidResponse(format!("{action}: {err}")))
    }

    /// Register `listener` for `topic`.
    ///
    /// Valid in every state except Closed. While Open, the first listener for a
    /// topic attaches the topic on the runtime; otherwise the topic is attached
    /// on the next successful (re)connect. A remote rejection rolls the local
    /// registration back and is returned; transport failures keep it for replay.
    pub async fn subscribe(
        &self,
        topic: &str,
        listener: Arc<dyn EventListener>,
    ) -> Result<SubscriptionToken, CallError> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock().await;
        if self.state().is_terminal() {
            return Err(CallError::NotConnected);
        }

        let subscribed = inner.router.subscribe(topic, listener);
        if subscribed.first_for_topic && self.is_open() {
            match attach_topic(inner, topic).await {
                Ok(_) => {}
                Err(err @ CallError::Remote(_)) => {
                    inner.router.unsubscribe(topic, subscribed.token);
                    return Err(err);
                }
                Err(err) => {
                    tracing::warn!(topic, error = %err, "topic attach deferred to next connect");
                }
            }
        }
        Ok(subscribed.token)
    }

    /// Remove one registration. Returns false when the token was already gone.
    pub async fn unsubscribe(
        &self,
        topic: &str,
        token: SubscriptionToken,
    ) -> Result<bool, CallError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let removed = self.inner.router.unsubscribe(topic, token);
        if removed.topic_emptied {
            self.detach_topic(topic).await?;
        }
        Ok(removed.removed > 0)
    }

    /// Remove every registration of `listener` on `topic`. Returns how many were removed.
    pub async fn unsubscribe_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn EventListener>,
    ) -> Result<usize, CallError> {
        let _lifecycle = self.inner.lifecycle.lock().await;
        let removed = self.inner.router.unsubscribe_listener(topic, listener);
        if removed.topic_emptied {
            self.detach_topic(topic).await?;
        }
        Ok(removed.removed)
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.inner.router.listener_count(topic)
    }

    pub fn subscribed_topics(&self) -> Vec<String> {
        self.inner.router.topics()
    }

    async fn detach_topic(&self, topic: &str) -> Result<(), CallError> {
        if !self.is_open() {
            return Ok(());
        }
        match request_raw(
            &self.inner,
            actions::UNSUBSCRIBE_EVENT,
            json!({ "topic": topic }),
            self.inner.config.request_timeout,
        )
        .await
        {
            Ok(_) => Ok(()),
            Err(err @ CallError::Remote(_)) => Err(err),
            Err(err) => {
                tracing::warn!(topic, error = %err, "topic detach failed");
                Ok(())
            }
        }
    }
}

async fn attach_topic(inner: &Arc<SessionInner>, topic: &str) -> CallResult {
    request_raw(
        inner,
        actions::SUBSCRIBE_EVENT,
        json!({ "topic": topic }),
        inner.config.request_timeout,
    )
    .await
}

fn now_millis() -> i64 {
    match SystemTime::now().duration_since(UNIX_EPOCH) {
        Ok(d) => d.as_millis() as i64,
        Err(_) => 0,
    }
}

impl SessionInner {
    fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }

    fn set_handshake_result(&self, result: Option<Value>) {
        match self.handshake_result.write() {
            Ok(mut guard) => *guard = result,
            Err(poisoned) => *poisoned.into_inner() = result,
        }
    }
}
