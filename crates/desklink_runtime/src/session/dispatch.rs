use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, Instant, MissedTickBehavior};

use crate::codec::decode_frame;
use crate::errors::DisconnectReason;
use crate::events::Frame;
use crate::state::ConnectionState;

use super::SessionInner;

/// Single reader for one transport generation.
/// Frames are handled strictly in arrival order. Ends on transport close or stop signal.
pub(super) async fn dispatcher_loop(
    inner: Arc<SessionInner>,
    mut read_rx: mpsc::Receiver<Vec<u8>>,
    mut stop_rx: oneshot::Receiver<()>,
    generation: u64,
) {
    let mut timeout_sweep = interval(inner.config.timeout_sweep_interval);
    timeout_sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_frame = read_rx.recv() => {
                let Some(bytes) = maybe_frame else {
                    on_transport_lost(&inner, generation);
                    return;
                };
                handle_frame(&inner, &bytes);
            }
            _ = timeout_sweep.tick() => {
                let expired = inner.correlation.expire_overdue(Instant::now());
                if expired > 0 {
                    inner.metrics.record_timeouts(expired as u64);
                }
            }
            _ = &mut stop_rx => {
                tracing::debug!(generation, "dispatcher stopped");
                return;
            }
        }
    }
}

fn handle_frame(inner: &Arc<SessionInner>, bytes: &[u8]) {
    inner.metrics.record_ingress();
    match decode_frame(bytes) {
        Ok(Frame::Response(frame)) => {
            let message_id = frame.message_id;
            if !inner.correlation.resolve(frame) {
                inner.metrics.record_unmatched_response();
                tracing::debug!(message_id, "dropping response without pending call");
            }
        }
        Ok(Frame::Event(event)) => {
            let report = inner.router.dispatch(&event);
            inner.metrics.record_dispatch(report.failed as u64);
            tracing::trace!(
                topic = %event.topic,
                delivered = report.delivered,
                failed = report.failed,
                "event dispatched"
            );
        }
        Err(err) => {
            inner.metrics.record_decode_error();
            tracing::warn!(error = %err, len = bytes.len(), "dropping malformed frame");
        }
    }
}

/// Open -> Reconnecting on an unexpected drop. Pending calls are drained right
/// away in every state so a handshake in progress fails fast as well.
fn on_transport_lost(inner: &Arc<SessionInner>, generation: u64) {
    if inner.generation.load(Ordering::Acquire) != generation {
        return;
    }
    inner.outbound_tx.store(None);

    let lost_while_open = inner.state_tx.send_if_modified(|state| {
        if *state == ConnectionState::Open {
            *state = ConnectionState::Reconnecting;
            true
        } else {
            false
        }
    });
    let drained = inner.correlation.drain_all(DisconnectReason::TransportLost);

    if lost_while_open {
        tracing::warn!(generation, drained, "transport lost; reconnecting");
        inner.transport_lost.notify_one();
    } else {
        tracing::debug!(generation, drained, "transport closed outside open state");
    }
}
