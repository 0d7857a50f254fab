//! Election events for monitoring.
//!
//! Strategies publish an `ElectionEvent` whenever they publish a state or
//! arm a watch. Observers subscribe through an `Arc<EventBus>`.

use crate::client::EventKind;
use crate::state::ElectState;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, Weak};

/// Events emitted by election strategies.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ElectionEvent {
    /// A strategy instance published a new state.
    StateChanged {
        /// Member path of the candidate, if it has one yet.
        member: Option<String>,
        state: ElectState,
        /// Stable numeric code of `state`.
        code: i8,
        /// Milliseconds since Unix epoch.
        timestamp: f64,
    },
    /// A watch was armed on another member.
    WatchArmed {
        member: String,
        /// Full path of the watched member.
        target: String,
        timestamp: f64,
    },
    /// An armed watch fired and is being handled.
    WatchFired {
        member: Option<String>,
        path: String,
        kind: EventKind,
        timestamp: f64,
    },
}

impl ElectionEvent {
    pub fn state_changed(member: Option<String>, state: ElectState) -> Self {
        ElectionEvent::StateChanged {
            member,
            state,
            code: state.code(),
            timestamp: now_ms(),
        }
    }

    pub fn watch_armed(member: impl Into<String>, target: impl Into<String>) -> Self {
        ElectionEvent::WatchArmed {
            member: member.into(),
            target: target.into(),
            timestamp: now_ms(),
        }
    }

    pub fn watch_fired(member: Option<String>, path: impl Into<String>, kind: EventKind) -> Self {
        ElectionEvent::WatchFired {
            member,
            path: path.into(),
            kind,
            timestamp: now_ms(),
        }
    }

    /// JSON form for structured logs.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"))
    }
}

fn now_ms() -> f64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64() * 1000.0)
        .unwrap_or(0.0)
}

/// Subscription handle that unsubscribes automatically when dropped.
pub struct Subscription {
    bus: Weak<EventBus>,
    id: usize,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(bus) = self.bus.upgrade() {
            bus.unsubscribe(self.id);
        }
    }
}

type Callback = Arc<dyn Fn(ElectionEvent) + Send + Sync>;

/// Event bus for publishing election events to subscribers.
///
/// Wrap in `Arc` to enable subscriptions.
pub struct EventBus {
    callbacks: RwLock<Vec<(usize, Callback)>>,
    next_id: AtomicUsize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicUsize::new(0),
        }
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events. Returns `Subscription` that unsubscribes on drop.
    pub fn subscribe(
        self: &Arc<Self>,
        callback: impl Fn(ElectionEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(callback)));
        Subscription {
            bus: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: usize) {
        // emit never holds the lock across callbacks, so blocking is safe.
        // While unwinding, give up rather than risk a second panic.
        let guard = if std::thread::panicking() {
            self.callbacks.try_write().ok()
        } else {
            Some(self.callbacks.write().unwrap_or_else(|e| e.into_inner()))
        };
        if let Some(mut guard) = guard {
            guard.retain(|(i, _)| *i != id);
        }
    }

    /// Emit an event to all subscribers.
    pub fn emit(&self, event: ElectionEvent) {
        // Snapshot so a callback may subscribe without deadlocking.
        let callbacks: Vec<_> = self
            .callbacks
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|(_, cb)| Arc::clone(cb))
            .collect();

        for callback in callbacks {
            callback(event.clone());
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.callbacks.read().unwrap_or_else(|e| e.into_inner()).len()
    }
}
