use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::{timeout_at, Duration, Instant};

use crate::codec::encode_request;
use crate::correlation::{CallResult, CorrelationTable};
use crate::errors::{CallError, DisconnectReason};
use crate::metrics::SessionMetrics;

use super::SessionInner;

/// Handle to one in-flight request.
///
/// `wait` resolves with the reply, or `Timeout` at the deadline. `cancel`
/// behaves like an early expiry. Dropping the handle without waiting cancels
/// the call so the correlation table never keeps orphaned entries.
#[derive(Debug)]
pub struct PendingReply {
    message_id: u64,
    deadline: Instant,
    rx: Option<oneshot::Receiver<CallResult>>,
    correlation: Arc<CorrelationTable>,
    metrics: Arc<SessionMetrics>,
}

impl PendingReply {
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Cancel the call. Returns false when it already completed.
    pub fn cancel(&self) -> bool {
        self.correlation.cancel(self.message_id)
    }

    pub async fn wait(mut self) -> CallResult {
        let Some(rx) = self.rx.as_mut() else {
            return Err(CallError::Cancelled);
        };

        let outcome = match timeout_at(self.deadline, &mut *rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(CallError::Disconnected(DisconnectReason::Closed)),
            Err(_) => {
                if self.correlation.expire(self.message_id) {
                    self.metrics.record_timeouts(1);
                }
                // Entry is gone now: either our expiry or a racing resolve filled the channel.
                rx.await.unwrap_or(Err(CallError::Timeout))
            }
        };
        self.rx = None;
        outcome
    }
}

impl Drop for PendingReply {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.correlation.cancel(self.message_id);
        }
    }
}

/// Register, encode, and queue one request without checking session state.
/// Used directly by the handshake and subscription replay, which run before Open.
pub(super) async fn send_request(
    inner: &Arc<SessionInner>,
    action: &str,
    payload: Value,
    timeout: Duration,
) -> Result<PendingReply, CallError> {
    let outbound_tx = inner
        .outbound_tx
        .load_full()
        .ok_or(CallError::NotConnected)?;

    let message_id = inner.next_message_id.fetch_add(1, Ordering::Relaxed);
    let frame = encode_request(action, message_id, &payload)?;
    let deadline = Instant::now() + timeout;
    let rx = inner.correlation.register(message_id, action, deadline)?;
    let reply = PendingReply {
        message_id,
        deadline,
        rx: Some(rx),
        correlation: Arc::clone(&inner.correlation),
        metrics: Arc::clone(&inner.metrics),
    };

    // On every early return `reply` drops and removes the pending entry.
    match timeout_at(deadline, outbound_tx.send(frame)).await {
        Ok(Ok(())) => {}
        Ok(Err(_)) => return Err(CallError::Disconnected(DisconnectReason::TransportLost)),
        Err(_) => {
            if inner.correlation.expire(message_id) {
                inner.metrics.record_timeouts(1);
            }
            tracing::debug!(message_id, action, "request not queued before its deadline");
            return Err(CallError::Timeout);
        }
    }
    inner.metrics.record_request_sent();
    tracing::trace!(message_id, action, "request sent");
    Ok(reply)
}

pub(super) async fn request_raw(
    inner: &Arc<SessionInner>,
    action: &str,
    payload: Value,
    timeout: Duration,
) -> CallResult {
    send_request(inner, action, payload, timeout)
        .await?
        .wait()
        .await
}
