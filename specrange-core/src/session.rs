//! Owned selection state: registry, dataset context and subscribers.
//!
//! [`SelectionSession`] is the single writer. Each successful mutation is
//! published once through the [`SelectionBroadcaster`]; failed mutations leave
//! the registry untouched and publish nothing.
//!
//! Subscriber callbacks receive a [`Deferred`] queue instead of the session.
//! Commands queued there run after the current notification cycle has reached
//! every subscriber, each command producing its own cycle.

use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use std::sync::Arc;

use crate::broadcast::{
    SelectionBroadcaster, SelectionCallback, SelectionChange, SelectionUpdate, SubscriberId,
};
use crate::context::{DatasetContext, DatasetRef};
use crate::error::{Error, Result};
use crate::range::{RangeBounds, RangeId, RangeRequest};
use crate::registry::{NewRange, RangeRegistry, RegistrySnapshot};
use crate::service::DataService;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A registry mutation that can be queued for later execution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "op", rename_all = "snake_case"))]
pub enum SessionCommand {
    AddRange { request: RangeRequest },
    UpdateRange { id: RangeId, bounds: RangeBounds },
    RenameRange { id: RangeId, label: String },
    RemoveRange { id: RangeId },
    SetDisplayed { id: Option<RangeId> },
    Clear,
}

/// Queue handed to subscriber callbacks for registry changes.
#[derive(Debug, Default)]
pub struct Deferred {
    commands: Vec<SessionCommand>,
}

impl Deferred {
    /// Queues a command to run after the current notification cycle.
    pub fn push(&mut self, command: SessionCommand) {
        self.commands.push(command);
    }

    /// Number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if nothing is queued.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// A deferred command that could not be applied.
#[derive(Debug, Clone, PartialEq)]
pub struct DeferredFailure {
    /// The rejected command.
    pub command: SessionCommand,
    /// Why it was rejected.
    pub error: Error,
}

/// Single-writer owner of the range selection.
#[derive(Debug, Default)]
pub struct SelectionSession {
    registry: RangeRegistry,
    context: Option<Arc<DatasetContext>>,
    broadcaster: SelectionBroadcaster,
    queue: VecDeque<SessionCommand>,
    failures: Vec<DeferredFailure>,
    draining: bool,
}

impl SelectionSession {
    /// Creates a session with no dataset and no ranges.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------------
    // Dataset context
    // ---------------------------------------------------------------------

    /// Activates a dataset, clearing every range in the same update.
    pub fn open_dataset(&mut self, context: DatasetContext) {
        self.registry.clear();
        self.context = Some(Arc::new(context));
        self.commit(SelectionChange::DatasetChanged);
    }

    /// Loads calibration for `dataset`/`signal_index` and activates it.
    ///
    /// # Errors
    /// Returns the service or calibration error; the session is unchanged.
    pub fn open_from_service<S: DataService + ?Sized>(
        &mut self,
        service: &S,
        dataset: DatasetRef,
        signal_index: usize,
    ) -> Result<()> {
        let context = DatasetContext::load(service, dataset, signal_index)?;
        self.open_dataset(context);
        Ok(())
    }

    /// Deactivates the dataset and clears every range.
    pub fn close_dataset(&mut self) {
        self.registry.clear();
        self.context = None;
        self.commit(SelectionChange::DatasetChanged);
    }

    /// Active dataset context.
    #[must_use]
    pub fn context(&self) -> Option<&DatasetContext> {
        self.context.as_deref()
    }

    // ---------------------------------------------------------------------
    // Registry operations
    // ---------------------------------------------------------------------

    /// Adds a range in the lowest free slot.
    ///
    /// # Errors
    /// [`Error::NoDataset`] without an open dataset, [`Error::Domain`] for
    /// bounds the calibration rejects, [`Error::Capacity`] when all slots are used.
    pub fn add_range(&mut self, request: RangeRequest) -> Result<RangeId> {
        let bounds = self.converter_resolve(request.bounds)?;
        let id = self.registry.add(NewRange {
            bounds,
            label: request.label,
            element: request.element,
            source_line: request.source_line,
        })?;
        self.commit(SelectionChange::Added(id));
        Ok(id)
    }

    /// Replaces the bounds of a live range.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id, or the bounds resolution error.
    pub fn update_range(&mut self, id: RangeId, bounds: RangeBounds) -> Result<()> {
        let bounds = self.converter_resolve(bounds)?;
        self.registry.update(id, bounds)?;
        self.commit(SelectionChange::Updated(id));
        Ok(())
    }

    /// Relabels a live range.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id.
    pub fn rename_range(&mut self, id: RangeId, label: impl Into<String>) -> Result<()> {
        self.registry.rename(id, label)?;
        self.commit(SelectionChange::Renamed(id));
        Ok(())
    }

    /// Removes a range.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id.
    pub fn remove_range(&mut self, id: RangeId) -> Result<()> {
        let was_displayed = self.registry.displayed() == Some(id);
        self.registry.remove(id)?;
        self.commit(SelectionChange::Removed { id, was_displayed });
        Ok(())
    }

    /// Selects the displayed range, or clears the selection with `None`.
    ///
    /// # Errors
    /// [`Error::NotFound`] for an unknown id; the previous selection is kept.
    pub fn set_displayed(&mut self, id: Option<RangeId>) -> Result<()> {
        let previous = self.registry.displayed();
        self.registry.set_displayed(id)?;
        self.commit(SelectionChange::DisplayChanged {
            previous,
            current: id,
        });
        Ok(())
    }

    /// Removes every range and the display selection in one update.
    pub fn clear(&mut self) {
        self.registry.clear();
        self.commit(SelectionChange::Cleared);
    }

    /// Applies a command as if its method had been called directly.
    ///
    /// # Errors
    /// The error of the underlying operation.
    pub fn apply(&mut self, command: SessionCommand) -> Result<()> {
        match command {
            SessionCommand::AddRange { request } => self.add_range(request).map(|_| ()),
            SessionCommand::UpdateRange { id, bounds } => self.update_range(id, bounds),
            SessionCommand::RenameRange { id, label } => self.rename_range(id, label),
            SessionCommand::RemoveRange { id } => self.remove_range(id),
            SessionCommand::SetDisplayed { id } => self.set_displayed(id),
            SessionCommand::Clear => {
                self.clear();
                Ok(())
            }
        }
    }

    /// Read access to the live registry.
    #[must_use]
    pub fn registry(&self) -> &RangeRegistry {
        &self.registry
    }

    // ---------------------------------------------------------------------
    // Subscription
    // ---------------------------------------------------------------------

    /// Registers a callback for every future update.
    pub fn subscribe(
        &mut self,
        callback: impl FnMut(&SelectionUpdate, &mut Deferred) + 'static,
    ) -> SubscriberId {
        let callback: SelectionCallback = Box::new(callback);
        self.broadcaster.subscribe(callback)
    }

    /// Removes a callback subscription.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        self.broadcaster.unsubscribe(id)
    }

    /// Opens an update channel starting at the latest update.
    pub fn subscribe_channel(&mut self) -> Receiver<SelectionUpdate> {
        self.broadcaster.subscribe_channel()
    }

    /// Most recently published update.
    #[must_use]
    pub fn latest(&self) -> &SelectionUpdate {
        self.broadcaster.latest()
    }

    /// Most recently published snapshot.
    #[must_use]
    pub fn snapshot(&self) -> Arc<RegistrySnapshot> {
        Arc::clone(&self.broadcaster.latest().snapshot)
    }

    /// Takes the deferred commands that failed since the last call.
    pub fn drain_deferred_failures(&mut self) -> Vec<DeferredFailure> {
        std::mem::take(&mut self.failures)
    }

    // ---------------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------------

    fn converter_resolve(&self, bounds: RangeBounds) -> Result<crate::range::ResolvedBounds> {
        let context = self.context.as_ref().ok_or(Error::NoDataset)?;
        Ok(context.converter.resolve(bounds)?)
    }

    /// Publishes the current registry, then runs commands queued by callbacks.
    fn commit(&mut self, change: SelectionChange) {
        let mut deferred = Deferred::default();
        self.broadcaster.publish(
            self.registry.snapshot(),
            self.context.clone(),
            change,
            &mut deferred,
        );
        self.queue.extend(deferred.commands);

        // Nested commits from the loop below only enqueue.
        if self.draining {
            return;
        }
        self.draining = true;
        while let Some(command) = self.queue.pop_front() {
            if let Err(error) = self.apply(command.clone()) {
                self.failures.push(DeferredFailure { command, error });
            }
        }
        self.draining = false;
    }
}
