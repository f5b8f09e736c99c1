//! Observer events.
//!
//! Observers subscribe once and receive events over a channel. Events are
//! emitted only after the work they describe has been committed locally, so
//! an observer reading its own store on receipt sees the new state.

use parking_lot::RwLock;
use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;
use zonesync_protocol::DatabaseScope;

/// An event emitted by the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// A fetch cycle for one database finished.
    FetchCompleted {
        /// Database that was fetched.
        scope: DatabaseScope,
        /// Records created or updated locally.
        changed: usize,
        /// Records deleted locally.
        deleted: usize,
    },
    /// A push for one database finished.
    PushCompleted {
        /// Database that was pushed.
        scope: DatabaseScope,
        /// Records the service confirmed saved.
        saved: usize,
        /// Records the service confirmed deleted.
        deleted: usize,
    },
    /// A push was parked and will re-run after the service-requested delay.
    RetryScheduled {
        /// Database whose push was parked.
        scope: DatabaseScope,
        /// Delay requested by the service.
        delay: Duration,
    },
    /// A fetch or push surfaced an error.
    Failed {
        /// Database the operation belonged to.
        scope: DatabaseScope,
        /// Rendered error.
        message: String,
    },
    /// All queued operations of a burst have drained.
    Idle,
}

/// Distributes engine events to subscribers.
///
/// Subscribers that drop their receiver are pruned on the next emit.
#[derive(Default)]
pub struct EventFeed {
    subscribers: RwLock<Vec<Sender<EngineEvent>>>,
}

impl EventFeed {
    /// Creates a feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to the feed.
    ///
    /// Returns a receiver that will see all future events.
    pub fn subscribe(&self) -> Receiver<EngineEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.write().push(tx);
        rx
    }

    /// Emits an event to all subscribers, dropping disconnected ones.
    pub fn emit(&self, event: EngineEvent) {
        let mut subscribers = self.subscribers.write();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Returns the number of connected subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emit_and_receive() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();

        let event = EngineEvent::FetchCompleted {
            scope: DatabaseScope::Private,
            changed: 2,
            deleted: 1,
        };
        feed.emit(event.clone());

        assert_eq!(rx.recv_timeout(Duration::from_millis(100)).unwrap(), event);
    }

    #[test]
    fn multiple_subscribers_see_every_event() {
        let feed = EventFeed::new();
        let rx1 = feed.subscribe();
        let rx2 = feed.subscribe();

        feed.emit(EngineEvent::Idle);

        assert_eq!(rx1.recv().unwrap(), EngineEvent::Idle);
        assert_eq!(rx2.recv().unwrap(), EngineEvent::Idle);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = EventFeed::new();
        let rx = feed.subscribe();
        assert_eq!(feed.subscriber_count(), 1);

        drop(rx);
        feed.emit(EngineEvent::Idle);
        assert_eq!(feed.subscriber_count(), 0);
    }
}
