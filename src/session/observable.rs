//! Observable Session State
//!
//! The view layer watches three fields of the hosted session. Each field has
//! its own subscriber list; a write that changes a value notifies that
//! field's subscribers. Only the session writes, everyone else reads.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// The closed set of observable fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SessionField {
    /// Whether a match is ticking.
    Running,
    /// Last observed number of connected players.
    ConnectedPlayers,
    /// Last surfaced failure or status.
    ErrorMessage,
}

impl SessionField {
    /// Every field, in declaration order.
    pub const ALL: [SessionField; 3] = [
        SessionField::Running,
        SessionField::ConnectedPlayers,
        SessionField::ErrorMessage,
    ];

    /// Field name as shown to operators.
    pub fn name(&self) -> &'static str {
        match self {
            SessionField::Running => "running",
            SessionField::ConnectedPlayers => "connectedPlayers",
            SessionField::ErrorMessage => "errorMessage",
        }
    }
}

impl fmt::Display for SessionField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Handle returned by [`SessionObserver::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Point-in-time copy of every observable field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Whether a match is ticking.
    pub running: bool,
    /// Last observed number of connected players.
    pub connected_players: u32,
    /// Last surfaced failure or status.
    pub error_message: String,
}

type ChangeCallback = Arc<dyn Fn() + Send + Sync>;

struct Subscriber {
    field: SessionField,
    callback: ChangeCallback,
}

#[derive(Default)]
struct ObserverState {
    values: SessionSnapshot,
    subscribers: BTreeMap<SubscriptionId, Subscriber>,
    next_id: u64,
}

/// Shared, observable view of a hosted session.
#[derive(Default)]
pub struct SessionObserver {
    state: Mutex<ObserverState>,
}

impl SessionObserver {
    /// Create an observer with all fields at their initial values.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ObserverState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether a match is ticking.
    pub fn running(&self) -> bool {
        self.lock().values.running
    }

    /// Last observed number of connected players.
    pub fn connected_players(&self) -> u32 {
        self.lock().values.connected_players
    }

    /// Last surfaced failure or status. Empty until something is reported.
    pub fn error_message(&self) -> String {
        self.lock().values.error_message.clone()
    }

    /// Copy of every field, taken under one lock.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.lock().values.clone()
    }

    /// Register `callback` to run whenever `field` changes.
    ///
    /// Callbacks run on whichever thread performed the write, after the
    /// observer's lock is released, so they may read the observer.
    pub fn subscribe<F>(&self, field: SessionField, callback: F) -> SubscriptionId
    where
        F: Fn() + Send + Sync + 'static,
    {
        let mut state = self.lock();
        let id = SubscriptionId(state.next_id);
        state.next_id += 1;
        state.subscribers.insert(id, Subscriber {
            field,
            callback: Arc::new(callback),
        });
        id
    }

    /// Remove a subscription. Returns false if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.lock().subscribers.remove(&id).is_some()
    }

    /// Number of live subscriptions on `field`.
    pub fn subscriber_count(&self, field: SessionField) -> usize {
        self.lock()
            .subscribers
            .values()
            .filter(|s| s.field == field)
            .count()
    }

    pub(crate) fn set_running(&self, running: bool) {
        self.update(SessionField::Running, |values| {
            std::mem::replace(&mut values.running, running) != running
        });
    }

    pub(crate) fn set_connected_players(&self, count: u32) {
        self.update(SessionField::ConnectedPlayers, |values| {
            std::mem::replace(&mut values.connected_players, count) != count
        });
    }

    pub(crate) fn set_error_message(&self, message: impl Into<String>) {
        let message = message.into();
        self.update(SessionField::ErrorMessage, |values| {
            if values.error_message == message {
                false
            } else {
                values.error_message = message;
                true
            }
        });
    }

    /// Apply `write`; if it reports a change, notify `field`'s subscribers.
    fn update<W>(&self, field: SessionField, write: W)
    where
        W: FnOnce(&mut SessionSnapshot) -> bool,
    {
        let callbacks: Vec<ChangeCallback> = {
            let mut state = self.lock();
            if !write(&mut state.values) {
                return;
            }
            state
                .subscribers
                .values()
                .filter(|s| s.field == field)
                .map(|s| s.callback.clone())
                .collect()
        };

        for callback in callbacks {
            callback();
        }
    }
}

impl fmt::Debug for SessionObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock();
        f.debug_struct("SessionObserver")
            .field("values", &state.values)
            .field("subscribers", &state.subscribers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counter(observer: &SessionObserver, field: SessionField) -> (SubscriptionId, Arc<AtomicUsize>) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        let id = observer.subscribe(field, move || {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        (id, hits)
    }

    #[test]
    fn test_initial_values() {
        let observer = SessionObserver::new();
        assert!(!observer.running());
        assert_eq!(observer.connected_players(), 0);
        assert_eq!(observer.error_message(), "");
    }

    #[test]
    fn test_change_notifies_only_that_field() {
        let observer = SessionObserver::new();
        let (_, running_hits) = counter(&observer, SessionField::Running);
        let (_, players_hits) = counter(&observer, SessionField::ConnectedPlayers);

        observer.set_running(true);
        assert_eq!(running_hits.load(Ordering::SeqCst), 1);
        assert_eq!(players_hits.load(Ordering::SeqCst), 0);

        observer.set_connected_players(2);
        assert_eq!(players_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_same_value_does_not_notify() {
        let observer = SessionObserver::new();
        let (_, hits) = counter(&observer, SessionField::ErrorMessage);

        observer.set_error_message("boom");
        observer.set_error_message("boom");
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Overwritten, not appended
        observer.set_error_message("bang");
        assert_eq!(observer.error_message(), "bang");
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_unsubscribe() {
        let observer = SessionObserver::new();
        let (id, hits) = counter(&observer, SessionField::Running);
        assert_eq!(observer.subscriber_count(SessionField::Running), 1);

        assert!(observer.unsubscribe(id));
        assert!(!observer.unsubscribe(id));
        assert_eq!(observer.subscriber_count(SessionField::Running), 0);

        observer.set_running(true);
        assert_eq!(hits.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_callback_can_read_observer() {
        let observer = Arc::new(SessionObserver::new());
        let seen = Arc::new(Mutex::new(None));

        let reader = observer.clone();
        let slot = seen.clone();
        observer.subscribe(SessionField::ConnectedPlayers, move || {
            *slot.lock().unwrap() = Some(reader.connected_players());
        });

        observer.set_connected_players(3);
        assert_eq!(*seen.lock().unwrap(), Some(3));
    }

    #[test]
    fn test_field_names() {
        let names: Vec<_> = SessionField::ALL.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["running", "connectedPlayers", "errorMessage"]);
    }
}
