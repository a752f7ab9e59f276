use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::Value;
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::errors::{CallError, DisconnectReason};
use crate::events::{ResponseFrame, ResponseOutcome};

pub type CallResult = Result<Value, CallError>;

#[derive(Debug)]
struct PendingCall {
    action: String,
    created_at: Instant,
    deadline: Instant,
    tx: oneshot::Sender<CallResult>,
}

/// Request id -> pending completion.
///
/// Every terminal path (`resolve`, `expire`, `cancel`, `expire_overdue`,
/// `drain_all`) removes the entry under the lock before fulfilling it, so a
/// pending call is fulfilled at most once no matter how the paths race.
/// Senders are completed after the lock is released.
#[derive(Debug, Default)]
pub struct CorrelationTable {
    pending: Mutex<HashMap<u64, PendingCall>>,
}

impl CorrelationTable {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<u64, PendingCall>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Track a new outbound request and hand back its completion receiver.
    /// Allocation: one action String. Complexity: O(1) amortized.
    pub fn register(
        &self,
        message_id: u64,
        action: &str,
        deadline: Instant,
    ) -> Result<oneshot::Receiver<CallResult>, CallError> {
        let mut pending = self.entries();
        if pending.contains_key(&message_id) {
            return Err(CallError::DuplicateRequestId(message_id));
        }
        let (tx, rx) = oneshot::channel();
        pending.insert(
            message_id,
            PendingCall {
                action: action.to_owned(),
                created_at: Instant::now(),
                deadline,
                tx,
            },
        );
        Ok(rx)
    }

    /// Complete the call matching `frame.message_id`.
    /// Returns false for late, duplicate, or unknown replies.
    pub fn resolve(&self, frame: ResponseFrame) -> bool {
        let Some(call) = self.entries().remove(&frame.message_id) else {
            return false;
        };
        let result = match frame.outcome {
            ResponseOutcome::Success(data) => Ok(data),
            ResponseOutcome::Failure(reason) => Err(CallError::Remote(reason)),
        };
        tracing::trace!(
            message_id = frame.message_id,
            action = %call.action,
            elapsed_ms = call.created_at.elapsed().as_millis() as u64,
            "pending call resolved"
        );
        let _ = call.tx.send(result);
        true
    }

    /// Fail one call with `Timeout`. No-op when it already completed.
    pub fn expire(&self, message_id: u64) -> bool {
        self.fail(message_id, CallError::Timeout)
    }

    /// Fail one call with `Cancelled`. No-op when it already completed.
    pub fn cancel(&self, message_id: u64) -> bool {
        self.fail(message_id, CallError::Cancelled)
    }

    /// Expire every call whose deadline is at or before `now`.
    /// Complexity: O(n), n = pending count.
    pub fn expire_overdue(&self, now: Instant) -> usize {
        let expired: Vec<(u64, PendingCall)> = {
            let mut pending = self.entries();
            let overdue: Vec<u64> = pending
                .iter()
                .filter(|(_, call)| call.deadline <= now)
                .map(|(id, _)| *id)
                .collect();
            overdue
                .into_iter()
                .filter_map(|id| pending.remove(&id).map(|call| (id, call)))
                .collect()
        };

        let count = expired.len();
        for (message_id, call) in expired {
            tracing::debug!(message_id, action = %call.action, "pending call expired");
            let _ = call.tx.send(Err(CallError::Timeout));
        }
        count
    }

    /// Fail every pending call with `Disconnected(reason)` and empty the table.
    pub fn drain_all(&self, reason: DisconnectReason) -> usize {
        let drained: Vec<PendingCall> = self.entries().drain().map(|(_, call)| call).collect();
        let count = drained.len();
        for call in drained {
            let _ = call.tx.send(Err(CallError::Disconnected(reason)));
        }
        if count > 0 {
            tracing::debug!(count, %reason, "drained pending calls");
        }
        count
    }

    pub fn contains(&self, message_id: u64) -> bool {
        self.entries().contains_key(&message_id)
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    fn fail(&self, message_id: u64, err: CallError) -> bool {
        let Some(call) = self.entries().remove(&message_id) else {
            return false;
        };
        tracing::debug!(message_id, action = %call.action, error = %err, "pending call failed");
        let _ = call.tx.send(Err(err));
        true
    }
}
