//! Process-wide pub/sub of typed session events (spec §4.1).
//!
//! `publish` snapshots the subscriber list under the internal mutex, drops
//! the guard, then invokes handlers. This is the load-bearing anti-deadlock
//! discipline for the whole decorator stack: a handler that calls back into
//! the bus (or into the queue the bus is decorating) must never block on a
//! lock `publish` itself is holding.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A typed event, tagged by variant, emitted by the queue decorators and the
/// coordinator loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Event {
    QueueDepthChanged {
        pending: usize,
        claimed: usize,
        running: usize,
        completed: usize,
        failed: usize,
        total: usize,
    },
    TaskClaimed {
        task_id: String,
        worker_id: String,
    },
    TaskAwaitingApproval {
        task_id: String,
        worker_id: String,
    },
    TaskStarted {
        task_id: String,
        worker_id: String,
    },
    TaskCompleted {
        task_id: String,
        worker_id: String,
        success: bool,
    },
    TaskFailed {
        task_id: String,
        worker_id: String,
        reason: String,
    },
    TaskBlocked {
        task_id: String,
        blocked_by: Vec<String>,
        message: String,
    },
    GroupCompleted {
        group_index: usize,
    },
    GroupPartial {
        group_index: usize,
        failed_tasks: Vec<String>,
    },
    PhaseChanged {
        from: String,
        to: String,
        message: String,
    },
    Progress {
        completed: usize,
        total: usize,
        phase: String,
        message: String,
    },
    SessionComplete {
        success: bool,
        summary: String,
    },
}

impl Event {
    /// Stable tag used for type-filtered subscriptions.
    pub fn kind(&self) -> &'static str {
        match self {
            Event::QueueDepthChanged { .. } => "queue_depth_changed",
            Event::TaskClaimed { .. } => "task_claimed",
            Event::TaskAwaitingApproval { .. } => "task_awaiting_approval",
            Event::TaskStarted { .. } => "task_started",
            Event::TaskCompleted { .. } => "task_completed",
            Event::TaskFailed { .. } => "task_failed",
            Event::TaskBlocked { .. } => "task_blocked",
            Event::GroupCompleted { .. } => "group_completed",
            Event::GroupPartial { .. } => "group_partial",
            Event::PhaseChanged { .. } => "phase_changed",
            Event::Progress { .. } => "progress",
            Event::SessionComplete { .. } => "session_complete",
        }
    }
}

/// An event plus publication metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    pub event: Event,
}

/// A handle returned by `subscribe`/`subscribe_all`, used with `unsubscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription(u64);

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "subscription-{}", self.0)
    }
}

type Handler = Arc<dyn Fn(&EventEnvelope) + Send + Sync>;

struct Subscriber {
    id: u64,
    kind: Option<&'static str>,
    handler: Handler,
}

/// Per-session event bus. Created at session start, closed at teardown; no
/// process-wide singleton.
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_subscription_id: AtomicU64,
    next_event_id: AtomicU64,
    closed: Mutex<bool>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_subscription_id: AtomicU64::new(1),
            next_event_id: AtomicU64::new(1),
            closed: Mutex::new(false),
        }
    }

    /// Subscribe to events matching a specific `kind` (see [`Event::kind`]).
    pub fn subscribe<F>(&self, kind: &'static str, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.register(Some(kind), Arc::new(handler))
    }

    /// Subscribe to every event published on this bus.
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&EventEnvelope) + Send + Sync + 'static,
    {
        self.register(None, Arc::new(handler))
    }

    fn register(&self, kind: Option<&'static str>, handler: Handler) -> Subscription {
        let id = self.next_subscription_id.fetch_add(1, Ordering::SeqCst);
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.push(Subscriber { id, kind, handler });
        Subscription(id)
    }

    pub fn unsubscribe(&self, subscription: Subscription) {
        let mut subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subs.retain(|s| s.id != subscription.0);
    }

    /// Publish an event to all matching subscribers, in registration order.
    ///
    /// Snapshots the subscriber list, releases the lock, then invokes
    /// handlers outside it. A handler panic/error is swallowed (logged) and
    /// does not prevent later handlers from running.
    pub fn publish(&self, event: Event) {
        if *self.closed.lock().unwrap_or_else(|e| e.into_inner()) {
            return;
        }

        let envelope = EventEnvelope {
            id: self.next_event_id.fetch_add(1, Ordering::SeqCst),
            timestamp: Utc::now(),
            event,
        };

        let matching: Vec<Handler> = {
            let subs = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
            subs.iter()
                .filter(|s| match s.kind {
                    Some(k) => k == envelope.event.kind(),
                    None => true,
                })
                .map(|s| s.handler.clone())
                .collect()
        };

        for handler in matching {
            handler(&envelope);
        }
    }

    /// Mark the bus closed; subsequent `publish` calls are no-ops.
    pub fn close(&self) {
        *self.closed.lock().unwrap_or_else(|e| e.into_inner()) = true;
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn subscribe_all_receives_every_event() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe_all(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(Event::GroupCompleted { group_index: 0 });
        bus.publish(Event::SessionComplete {
            success: true,
            summary: "done".into(),
        });

        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn subscribe_by_kind_filters() {
        let bus = EventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen2 = seen.clone();
        bus.subscribe("task_claimed", move |env| {
            seen2.lock().unwrap().push(env.event.kind());
        });

        bus.publish(Event::TaskClaimed {
            task_id: "t1".into(),
            worker_id: "w1".into(),
        });
        bus.publish(Event::GroupCompleted { group_index: 0 });

        let seen = seen.lock().unwrap();
        assert_eq!(*seen, vec!["task_claimed"]);
    }

    #[test]
    fn handlers_fire_in_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let o1 = order.clone();
        let o2 = order.clone();
        bus.subscribe_all(move |_| o1.lock().unwrap().push(1));
        bus.subscribe_all(move |_| o2.lock().unwrap().push(2));

        bus.publish(Event::GroupCompleted { group_index: 0 });

        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        let sub = bus.subscribe_all(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.unsubscribe(sub);

        bus.publish(Event::GroupCompleted { group_index: 0 });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn closed_bus_drops_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let count2 = count.clone();
        bus.subscribe_all(move |_| {
            count2.fetch_add(1, Ordering::SeqCst);
        });
        bus.close();

        bus.publish(Event::GroupCompleted { group_index: 0 });

        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn a_handler_re_entering_publish_does_not_deadlock() {
        let bus = Arc::new(EventBus::new());
        let inner = bus.clone();
        let reentered = Arc::new(AtomicUsize::new(0));
        let reentered2 = reentered.clone();

        bus.subscribe("group_completed", move |_| {
            if reentered2.fetch_add(1, Ordering::SeqCst) == 0 {
                inner.publish(Event::SessionComplete {
                    success: true,
                    summary: "re-entered".into(),
                });
            }
        });

        bus.publish(Event::GroupCompleted { group_index: 0 });
        assert_eq!(reentered.load(Ordering::SeqCst), 1);
    }
}
