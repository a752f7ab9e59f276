use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use crate::errors::ListenerError;
use crate::events::EventFrame;

/// Receiver of server-pushed events for one topic.
///
/// Listeners run on the dispatcher task and must not block. Returning an
/// error (or panicking) is logged and isolated from the other listeners.
pub trait EventListener: Send + Sync + 'static {
    fn on_event(&self, event: &EventFrame) -> Result<(), ListenerError>;
}

impl<F> EventListener for F
where
    F: Fn(&EventFrame) -> Result<(), ListenerError> + Send + Sync + 'static,
{
    fn on_event(&self, event: &EventFrame) -> Result<(), ListenerError> {
        self(event)
    }
}

/// Handle identifying one registration. Unique per router.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

impl SubscriptionToken {
    pub fn value(self) -> u64 {
        self.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscribed {
    pub token: SubscriptionToken,
    /// True when this registration is the only one for its topic.
    pub first_for_topic: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Unsubscribed {
    pub removed: usize,
    /// True when the topic has no registrations left after this removal.
    pub topic_emptied: bool,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone)]
struct Registration {
    token: SubscriptionToken,
    listener: Arc<dyn EventListener>,
}

/// Topic -> ordered listener registrations.
///
/// Duplicate registration of the same listener on the same topic is kept as
/// two registrations: each has its own token and each receives every event.
/// State here outlives any single transport; the session re-attaches topics
/// after every reconnect.
#[derive(Default)]
pub struct EventRouter {
    next_token: AtomicU64,
    topics: Mutex<HashMap<String, Vec<Registration>>>,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    fn topics_guard(&self) -> MutexGuard<'_, HashMap<String, Vec<Registration>>> {
        match self.topics.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn subscribe(&self, topic: &str, listener: Arc<dyn EventListener>) -> Subscribed {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed) + 1);
        let mut topics = self.topics_guard();
        let registrations = topics.entry(topic.to_owned()).or_default();
        registrations.push(Registration { token, listener });
        Subscribed {
            token,
            first_for_topic: registrations.len() == 1,
        }
    }

    /// Remove one registration by token. Removing twice is a no-op.
    pub fn unsubscribe(&self, topic: &str, token: SubscriptionToken) -> Unsubscribed {
        self.remove_where(topic, |registration| registration.token == token)
    }

    /// Remove every registration of `listener` (pointer identity) on `topic`.
    pub fn unsubscribe_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn EventListener>,
    ) -> Unsubscribed {
        self.remove_where(topic, |registration| {
            std::ptr::addr_eq(Arc::as_ptr(&registration.listener), Arc::as_ptr(listener))
        })
    }

    /// Invoke every listener registered for `event.topic`, in registration order.
    /// Complexity: O(l), l = listener count for the topic.
    pub fn dispatch(&self, event: &EventFrame) -> DispatchReport {
        let snapshot: Vec<Registration> = match self.topics_guard().get(&event.topic) {
            Some(registrations) => registrations.clone(),
            None => return DispatchReport::default(),
        };

        let mut report = DispatchReport::default();
        for registration in snapshot {
            let outcome = catch_unwind(AssertUnwindSafe(|| registration.listener.on_event(event)));
            match outcome {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(err)) => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %event.topic,
                        token = registration.token.value(),
                        error = %err,
                        "event listener failed"
                    );
                }
                Err(_) => {
                    report.failed += 1;
                    tracing::warn!(
                        topic = %event.topic,
                        token = registration.token.value(),
                        "event listener panicked"
                    );
                }
            }
        }
        report
    }

    /// Topics with at least one registration, sorted for stable replay order.
    pub fn topics(&self) -> Vec<String> {
        let mut topics: Vec<String> = self.topics_guard().keys().cloned().collect();
        topics.sort();
        topics
    }

    pub fn listener_count(&self, topic: &str) -> usize {
        self.topics_guard().get(topic).map_or(0, Vec::len)
    }

    pub fn clear(&self) {
        self.topics_guard().clear();
    }

    fn remove_where(
        &self,
        topic: &str,
        mut matches: impl FnMut(&Registration) -> bool,
    ) -> Unsubscribed {
        let mut topics = self.topics_guard();
        let Some(registrations) = topics.get_mut(topic) else {
            return Unsubscribed::default();
        };
        let before = registrations.len();
        registrations.retain(|registration| !matches(registration));
        let removed = before - registrations.len();
        let topic_emptied = removed > 0 && registrations.is_empty();
        if registrations.is_empty() {
            topics.remove(topic);
        }
        Unsubscribed {
            removed,
            topic_emptied,
        }
    }
}
