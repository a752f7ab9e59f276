use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::time::{sleep, Duration};

use crate::errors::DisconnectReason;

use super::lifecycle::{attach_generation, detach_generation, finish_closed, publish_open};
use super::{now_millis, ReconnectPolicy, SessionInner};

/// Exponential reconnect backoff with bounded jitter.
/// Allocation: none. Complexity: O(1).
pub(super) fn compute_restart_delay(
    attempt: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> Duration {
    let exp = attempt.min(20);
    let scaled = base_backoff_ms.saturating_mul(1u64 << exp);
    let base_delay_ms = scaled.min(max_backoff_ms);
    let jitter_cap_ms = (base_delay_ms / 10).min(1_000);
    let jitter_ms = if jitter_cap_ms == 0 {
        0
    } else {
        pseudo_random_u64() % jitter_cap_ms.saturating_add(1)
    };
    Duration::from_millis(base_delay_ms.saturating_add(jitter_ms))
}

fn pseudo_random_u64() -> u64 {
    let t = now_millis() as u64;
    let mut x = t ^ t.rotate_left(13) ^ 0x9E37_79B9_7F4A_7C15;
    x ^= x << 7;
    x ^= x >> 9;
    x
}

/// Waits for unexpected transport loss and drives the reconnect policy.
/// Runs until the session is closed or reconnecting gives up.
pub(super) async fn supervisor_loop(inner: Arc<SessionInner>) {
    loop {
        inner.transport_lost.notified().await;
        if inner.is_closing() {
            return;
        }
        detach_generation(&inner).await;

        let reconnected = match inner.config.reconnect {
            ReconnectPolicy::Never => false,
            ReconnectPolicy::Backoff {
                max_attempts,
                base_backoff_ms,
                max_backoff_ms,
            } => reconnect_with_backoff(&inner, max_attempts, base_backoff_ms, max_backoff_ms).await,
        };

        if inner.is_closing() {
            return;
        }
        if !reconnected {
            give_up(&inner).await;
            return;
        }
    }
}

async fn reconnect_with_backoff(
    inner: &Arc<SessionInner>,
    max_attempts: u32,
    base_backoff_ms: u64,
    max_backoff_ms: u64,
) -> bool {
    for attempt in 0..max_attempts {
        let delay = compute_restart_delay(attempt, base_backoff_ms, max_backoff_ms);
        sleep(delay).await;

        let _lifecycle = inner.lifecycle.lock().await;
        if inner.is_closing() {
            return false;
        }
        match attach_generation(inner).await {
            Ok(()) if publish_open(inner) => {
                inner.metrics.record_reconnect();
                tracing::info!(
                    attempt = attempt + 1,
                    endpoint = %inner.connector.endpoint(),
                    "session reconnected"
                );
                return true;
            }
            Ok(()) => {
                detach_generation(inner).await;
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    "transport lost before reconnect completed"
                );
            }
            Err(err) => {
                tracing::warn!(
                    attempt = attempt + 1,
                    max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "reconnect attempt failed"
                );
            }
        }
    }
    false
}

async fn give_up(inner: &Arc<SessionInner>) {
    if inner.closing.swap(true, Ordering::AcqRel) {
        return;
    }
    tracing::warn!(
        endpoint = %inner.connector.endpoint(),
        "reconnect attempts exhausted; closing session"
    );
    finish_closed(inner, DisconnectReason::TransportLost).await;
}
