use std::sync::atomic::Ordering;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::oneshot;

use crate::errors::{DisconnectReason, RuntimeError};
use crate::state::ConnectionState;

use super::call::request_raw;
use super::dispatch::dispatcher_loop;
use super::supervisor::supervisor_loop;
use super::{actions, DispatcherHandle, SessionInner};

pub(super) async fn open_session(inner: &Arc<SessionInner>) -> Result<(), RuntimeError> {
    let _lifecycle = inner.lifecycle.lock().await;
    if inner.is_closing() || inner.state_tx.borrow().is_terminal() {
        return Err(RuntimeError::Closed);
    }
    if *inner.state_tx.borrow() != ConnectionState::Disconnected {
        return Ok(());
    }

    inner.state_tx.send_replace(ConnectionState::Connecting);
    tracing::debug!(endpoint = %inner.connector.endpoint(), "opening session");

    let attached = match attach_generation(inner).await {
        Ok(()) if publish_open(inner) => Ok(()),
        Ok(()) => {
            detach_generation(inner).await;
            Err(RuntimeError::ConnectFailed(
                "transport lost before open".to_owned(),
            ))
        }
        Err(err) => Err(err),
    };
    if let Err(err) = attached {
        inner.state_tx.send_if_modified(|state| {
            if *state == ConnectionState::Connecting {
                *state = ConnectionState::Disconnected;
                true
            } else {
                false
            }
        });
        tracing::warn!(error = %err, "session open failed");
        return Err(err);
    }

    ensure_supervisor(inner);
    tracing::info!(
        endpoint = %inner.connector.endpoint(),
        identity = %inner.config.identity,
        "session open"
    );
    Ok(())
}

/// Connect a fresh link, authorize, and replay every subscribed topic.
/// Caller holds the lifecycle lock. State is left untouched.
pub(super) async fn attach_generation(inner: &Arc<SessionInner>) -> Result<(), RuntimeError> {
    let link = inner.connector.connect().await?;
    let generation = inner.generation.fetch_add(1, Ordering::AcqRel) + 1;

    inner.outbound_tx.store(Some(Arc::new(link.write_tx)));
    let (stop_tx, stop_rx) = oneshot::channel();
    let task = tokio::spawn(dispatcher_loop(
        Arc::clone(inner),
        link.read_rx,
        stop_rx,
        generation,
    ));
    replace_dispatcher(
        inner,
        Some(DispatcherHandle {
            generation,
            stop_tx,
            task,
        }),
    );

    let authorization = json!({
        "uuid": inner.config.identity,
        "client": {
            "name": inner.config.client_name,
            "version": env!("CARGO_PKG_VERSION"),
        },
    });
    let handshake = match request_raw(
        inner,
        actions::REQUEST_AUTHORIZATION,
        authorization,
        inner.config.handshake_timeout,
    )
    .await
    {
        Ok(value) => value,
        Err(err) => {
            detach_generation(inner).await;
            return Err(RuntimeError::ConnectFailed(format!("handshake failed: {err}")));
        }
    };
    inner.set_handshake_result(Some(handshake));

    for topic in inner.router.topics() {
        if let Err(err) = request_raw(
            inner,
            actions::SUBSCRIBE_EVENT,
            json!({ "topic": topic }),
            inner.config.request_timeout,
        )
        .await
        {
            tracing::warn!(%topic, generation, error = %err, "subscription replay failed");
        }
    }

    // The link may have dropped during replay.
    if inner.outbound_tx.load().is_none() || inner.generation.load(Ordering::Acquire) != generation
    {
        detach_generation(inner).await;
        return Err(RuntimeError::ConnectFailed(
            "transport lost during subscription replay".to_owned(),
        ));
    }

    tracing::debug!(generation, "transport generation attached");
    Ok(())
}

/// Stop the current dispatcher and drop the outbound sender, which closes the link.
pub(super) async fn detach_generation(inner: &Arc<SessionInner>) {
    inner.outbound_tx.store(None);
    let Some(handle) = replace_dispatcher(inner, None) else {
        return;
    };
    let _ = handle.stop_tx.send(());
    if let Err(err) = handle.task.await {
        tracing::warn!(generation = handle.generation, error = %err, "dispatcher task failed");
    }
}

/// Declare Open only while the attached link still has its sender.
/// Returns false when the link dropped before Open could be published.
pub(super) fn publish_open(inner: &Arc<SessionInner>) -> bool {
    let mut open = false;
    inner.state_tx.send_if_modified(|state| {
        if state.is_terminal() || inner.outbound_tx.load().is_none() {
            return false;
        }
        open = true;
        if state.is_open() {
            return false;
        }
        *state = ConnectionState::Open;
        true
    });
    open
}

/// Terminal teardown shared by `close` and an exhausted reconnect.
/// Caller must have won the `closing` flag.
pub(super) async fn finish_closed(inner: &Arc<SessionInner>, reason: DisconnectReason) {
    let _lifecycle = inner.lifecycle.lock().await;
    inner.state_tx.send_replace(ConnectionState::Closed);
    detach_generation(inner).await;
    let drained = inner.correlation.drain_all(reason);
    inner.router.clear();
    inner.set_handshake_result(None);
    tracing::info!(drained, %reason, "session closed");
}

pub(super) async fn close_session(inner: &Arc<SessionInner>) -> Result<(), RuntimeError> {
    if inner.closing.swap(true, Ordering::AcqRel) {
        return Ok(());
    }

    let supervisor = match inner.tasks.supervisor.lock() {
        Ok(mut guard) => guard.take(),
        Err(poisoned) => poisoned.into_inner().take(),
    };
    if let Some(task) = supervisor {
        task.abort();
        let _ = task.await;
    }

    finish_closed(inner, DisconnectReason::Closed).await;
    Ok(())
}

fn ensure_supervisor(inner: &Arc<SessionInner>) {
    let mut guard = match inner.tasks.supervisor.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if guard.is_none() {
        guard.replace(tokio::spawn(supervisor_loop(Arc::clone(inner))));
    }
}

fn replace_dispatcher(
    inner: &Arc<SessionInner>,
    next: Option<DispatcherHandle>,
) -> Option<DispatcherHandle> {
    let mut guard = match inner.tasks.dispatcher.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    std::mem::replace(&mut *guard, next)
}
