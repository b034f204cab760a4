//! Snapshot publication to decoupled selection consumers.
//!
//! Every registry mutation is published as one [`SelectionUpdate`]: an
//! immutable snapshot, the active dataset context, the typed change that
//! produced it and a strictly increasing version. Updates are shared through
//! `Arc`, so readers never lock and may move them to other threads.

use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Arc;

use crate::context::DatasetContext;
use crate::range::RangeId;
use crate::registry::RegistrySnapshot;
use crate::session::Deferred;

/// What a published update changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionChange {
    /// State before any mutation.
    Initial,
    /// A range was added.
    Added(RangeId),
    /// A range's bounds were edited.
    Updated(RangeId),
    /// A range was relabelled.
    Renamed(RangeId),
    /// A range was removed.
    Removed {
        /// Removed id.
        id: RangeId,
        /// Whether the range was displayed at removal.
        was_displayed: bool,
    },
    /// The displayed range was set, replaced or cleared.
    DisplayChanged {
        /// Selection before the change.
        previous: Option<RangeId>,
        /// Selection after the change.
        current: Option<RangeId>,
    },
    /// All ranges were removed.
    Cleared,
    /// A different dataset or signal became active; ranges were cleared.
    DatasetChanged,
}

/// One published state of the selection.
#[derive(Debug, Clone)]
pub struct SelectionUpdate {
    /// Strictly increasing publication counter.
    pub version: u64,
    /// Registry contents after the change.
    pub snapshot: Arc<RegistrySnapshot>,
    /// Active dataset, if one is open.
    pub context: Option<Arc<DatasetContext>>,
    /// The change that produced this update.
    pub change: SelectionChange,
}

/// Handle identifying a callback subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Callback invoked synchronously for every update.
///
/// Callbacks cannot reach the session directly; registry changes they need are
/// queued on the [`Deferred`] handle and applied after the notification cycle.
pub type SelectionCallback = Box<dyn FnMut(&SelectionUpdate, &mut Deferred)>;

struct Subscriber {
    id: SubscriberId,
    callback: SelectionCallback,
}

/// Fan-out of selection updates to callbacks and channels.
pub struct SelectionBroadcaster {
    latest: SelectionUpdate,
    subscribers: Vec<Subscriber>,
    channels: Vec<Sender<SelectionUpdate>>,
    next_subscriber: u64,
}

impl Default for SelectionBroadcaster {
    fn default() -> Self {
        Self {
            latest: SelectionUpdate {
                version: 0,
                snapshot: Arc::new(RegistrySnapshot::default()),
                context: None,
                change: SelectionChange::Initial,
            },
            subscribers: Vec::new(),
            channels: Vec::new(),
            next_subscriber: 1,
        }
    }
}

impl SelectionBroadcaster {
    /// Creates a broadcaster holding the empty initial state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recently published update.
    #[must_use]
    pub fn latest(&self) -> &SelectionUpdate {
        &self.latest
    }

    /// Registers a callback for all future updates.
    pub fn subscribe(&mut self, callback: SelectionCallback) -> SubscriberId {
        let id = SubscriberId(self.next_subscriber);
        self.next_subscriber += 1;
        self.subscribers.push(Subscriber { id, callback });
        id
    }

    /// Removes a callback. Returns false if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|sub| sub.id != id);
        self.subscribers.len() != before
    }

    /// Opens a channel that receives the latest update, then every later one.
    ///
    /// Dropping the receiver unsubscribes it at the next publication.
    pub fn subscribe_channel(&mut self) -> Receiver<SelectionUpdate> {
        let (tx, rx) = channel();
        if tx.send(self.latest.clone()).is_ok() {
            self.channels.push(tx);
        }
        rx
    }

    /// Number of live callback and channel subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len() + self.channels.len()
    }

    /// Publishes a new snapshot to every subscriber.
    ///
    /// Callbacks run in subscription order; commands they queue on `deferred`
    /// are left for the caller to apply once this returns.
    pub fn publish(
        &mut self,
        snapshot: RegistrySnapshot,
        context: Option<Arc<DatasetContext>>,
        change: SelectionChange,
        deferred: &mut Deferred,
    ) -> &SelectionUpdate {
        self.latest = SelectionUpdate {
            version: self.latest.version + 1,
            snapshot: Arc::new(snapshot),
            context,
            change,
        };

        for subscriber in &mut self.subscribers {
            (subscriber.callback)(&self.latest, deferred);
        }
        let latest = &self.latest;
        self.channels.retain(|tx| tx.send(latest.clone()).is_ok());
        &self.latest
    }
}

impl std::fmt::Debug for SelectionBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectionBroadcaster")
            .field("version", &self.latest.version)
            .field("subscribers", &self.subscribers.len())
            .field("channels", &self.channels.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn test_versions_strictly_increase() {
        let mut broadcaster = SelectionBroadcaster::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        broadcaster.subscribe(Box::new(move |update, _| {
            sink.borrow_mut().push(update.version);
        }));

        let mut deferred = Deferred::default();
        for _ in 0..3 {
            broadcaster.publish(
                RegistrySnapshot::default(),
                None,
                SelectionChange::Cleared,
                &mut deferred,
            );
        }
        assert_eq!(*seen.borrow(), vec![1, 2, 3]);
        assert_eq!(broadcaster.latest().version, 3);
    }

    #[test]
    fn test_channel_replays_latest_and_drops_closed() {
        let mut broadcaster = SelectionBroadcaster::new();
        let mut deferred = Deferred::default();
        broadcaster.publish(
            RegistrySnapshot::default(),
            None,
            SelectionChange::Cleared,
            &mut deferred,
        );

        let rx = broadcaster.subscribe_channel();
        assert_eq!(rx.try_recv().unwrap().version, 1);

        let dropped = broadcaster.subscribe_channel();
        drop(dropped);
        broadcaster.publish(
            RegistrySnapshot::default(),
            None,
            SelectionChange::Cleared,
            &mut deferred,
        );
        assert_eq!(rx.try_recv().unwrap().version, 2);
        assert_eq!(broadcaster.subscriber_count(), 1);
    }

    #[test]
    fn test_unsubscribe() {
        let mut broadcaster = SelectionBroadcaster::new();
        let id = broadcaster.subscribe(Box::new(|_, _| {}));
        assert!(broadcaster.unsubscribe(id));
        assert!(!broadcaster.unsubscribe(id));
        assert_eq!(broadcaster.subscriber_count(), 0);
    }
}
