//! Fixed-capacity range slot table.
//!
//! The registry holds at most [`RangeId::MAX_SLOTS`] entries. New entries take
//! the lowest free slot, so ids freed by removal are reused before higher ids
//! are handed out. Every operation either succeeds completely or leaves the
//! registry untouched.

use std::collections::BTreeMap;

use crate::error::{CapacityError, NotFoundError};
use crate::lines::LineName;
use crate::range::{RangeEntry, RangeId, ResolvedBounds};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// A resolved range waiting for a slot.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRange {
    /// Channel and energy bounds.
    pub bounds: ResolvedBounds,
    /// Label; `None` yields `Range <id>`.
    pub label: Option<String>,
    /// Element symbol the range was derived from.
    pub element: Option<String>,
    /// Emission line the range was derived from.
    pub source_line: Option<LineName>,
}

impl NewRange {
    /// A plain range with default label and no source.
    #[must_use]
    pub fn new(bounds: ResolvedBounds) -> Self {
        Self {
            bounds,
            label: None,
            element: None,
            source_line: None,
        }
    }
}

/// Immutable view of the registry at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RegistrySnapshot {
    /// Live entries by id.
    pub entries: BTreeMap<RangeId, RangeEntry>,
    /// Range selected for map display.
    pub displayed: Option<RangeId>,
}

impl RegistrySnapshot {
    /// Entry by id.
    #[must_use]
    pub fn get(&self, id: RangeId) -> Option<&RangeEntry> {
        self.entries.get(&id)
    }

    /// The displayed entry, if any.
    #[must_use]
    pub fn displayed_entry(&self) -> Option<&RangeEntry> {
        self.displayed.and_then(|id| self.entries.get(&id))
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no entries are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Slot table of live ranges plus the displayed selection.
#[derive(Debug, Clone, Default)]
pub struct RangeRegistry {
    slots: [Option<RangeEntry>; RangeId::MAX_SLOTS],
    displayed: Option<RangeId>,
}

impl RangeRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a range in the lowest free slot.
    ///
    /// # Errors
    /// Returns [`CapacityError`] when every slot is occupied.
    pub fn add(&mut self, range: NewRange) -> Result<RangeId, CapacityError> {
        let slot = self
            .slots
            .iter()
            .position(Option::is_none)
            .ok_or(CapacityError {
                capacity: RangeId::MAX_SLOTS,
            })?;
        let id = RangeId::from_slot(slot);
        self.slots[slot] = Some(RangeEntry {
            id,
            indices: range.bounds.indices,
            energy: range.bounds.energy,
            label: range.label.unwrap_or_else(|| format!("Range {id}")),
            element: range.element,
            source_line: range.source_line,
        });
        Ok(id)
    }

    /// Removes a range; clears the display selection if it pointed at it.
    ///
    /// # Errors
    /// Returns [`NotFoundError`] if `id` is not live.
    pub fn remove(&mut self, id: RangeId) -> Result<RangeEntry, NotFoundError> {
        let entry = self.slots[id.slot()].take().ok_or(NotFoundError { id })?;
        if self.displayed == Some(id) {
            self.displayed = None;
        }
        Ok(entry)
    }

    /// Selects a range for display, or clears the selection with `None`.
    ///
    /// # Errors
    /// Returns [`NotFoundError`] if `id` is not live; the previous selection is kept.
    pub fn set_displayed(&mut self, id: Option<RangeId>) -> Result<(), NotFoundError> {
        if let Some(id) = id {
            self.get(id).ok_or(NotFoundError { id })?;
        }
        self.displayed = id;
        Ok(())
    }

    /// Replaces the bounds of a live range.
    ///
    /// # Errors
    /// Returns [`NotFoundError`] if `id` is not live.
    pub fn update(&mut self, id: RangeId, bounds: ResolvedBounds) -> Result<(), NotFoundError> {
        let entry = self.get_mut(id)?;
        entry.indices = bounds.indices;
        entry.energy = bounds.energy;
        Ok(())
    }

    /// Renames a live range.
    ///
    /// # Errors
    /// Returns [`NotFoundError`] if `id` is not live.
    pub fn rename(&mut self, id: RangeId, label: impl Into<String>) -> Result<(), NotFoundError> {
        self.get_mut(id)?.label = label.into();
        Ok(())
    }

    /// Empties every slot and the display selection.
    pub fn clear(&mut self) {
        self.slots = Default::default();
        self.displayed = None;
    }

    /// Entry by id.
    #[must_use]
    pub fn get(&self, id: RangeId) -> Option<&RangeEntry> {
        self.slots[id.slot()].as_ref()
    }

    fn get_mut(&mut self, id: RangeId) -> Result<&mut RangeEntry, NotFoundError> {
        self.slots[id.slot()].as_mut().ok_or(NotFoundError { id })
    }

    /// Displayed range id.
    #[must_use]
    pub fn displayed(&self) -> Option<RangeId> {
        self.displayed
    }

    /// Live entries in id order.
    pub fn iter(&self) -> impl Iterator<Item = &RangeEntry> {
        self.slots.iter().flatten()
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    /// Returns true if no entries are live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    /// Returns true if every slot is occupied.
    #[must_use]
    pub fn is_full(&self) -> bool {
        self.slots.iter().all(Option::is_some)
    }

    /// Copies the current state into an immutable snapshot.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            entries: self.iter().map(|entry| (entry.id, entry.clone())).collect(),
            displayed: self.displayed,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::range::{EnergySpan, IndexSpan};

    fn range(start: usize, end: usize) -> NewRange {
        #[allow(clippy::cast_precision_loss)]
        let energy = EnergySpan::new(start as f64 * 0.01, end as f64 * 0.01).unwrap();
        NewRange::new(ResolvedBounds {
            indices: IndexSpan::new(start, end).unwrap(),
            energy,
        })
    }

    fn id(value: u8) -> RangeId {
        RangeId::new(value).unwrap()
    }

    #[test]
    fn test_add_assigns_sequential_ids() {
        let mut registry = RangeRegistry::new();
        assert_eq!(registry.add(range(0, 10)).unwrap(), id(1));
        assert_eq!(registry.add(range(20, 30)).unwrap(), id(2));
        assert_eq!(registry.get(id(2)).unwrap().label, "Range 2");
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_capacity_error_leaves_entries_unchanged() {
        let mut registry = RangeRegistry::new();
        for i in 0..10 {
            registry.add(range(i * 10, i * 10 + 5)).unwrap();
        }
        assert!(registry.is_full());
        let before = registry.snapshot();

        let err = registry.add(range(500, 600)).unwrap_err();
        assert_eq!(err.capacity, 10);
        assert_eq!(registry.snapshot(), before);
        assert_eq!(registry.len(), 10);
    }

    #[test]
    fn test_lowest_free_slot_reused() {
        let mut registry = RangeRegistry::new();
        for i in 0..10 {
            registry.add(range(i, i + 1)).unwrap();
        }
        registry.remove(id(5)).unwrap();
        registry.remove(id(8)).unwrap();
        assert_eq!(registry.add(range(1, 2)).unwrap(), id(5));
        assert_eq!(registry.add(range(1, 2)).unwrap(), id(8));
    }

    #[test]
    fn test_remove_displayed_resets_selection() {
        let mut registry = RangeRegistry::new();
        registry.add(range(0, 1)).unwrap();
        registry.add(range(2, 3)).unwrap();
        registry.set_displayed(Some(id(2))).unwrap();

        registry.remove(id(1)).unwrap();
        assert_eq!(registry.displayed(), Some(id(2)));

        registry.remove(id(2)).unwrap();
        assert_eq!(registry.displayed(), None);
    }

    #[test]
    fn test_not_found_errors() {
        let mut registry = RangeRegistry::new();
        registry.add(range(0, 1)).unwrap();
        registry.set_displayed(Some(id(1))).unwrap();

        assert_eq!(
            registry.set_displayed(Some(id(3))).unwrap_err(),
            NotFoundError { id: id(3) }
        );
        assert_eq!(registry.displayed(), Some(id(1)));
        assert!(registry.remove(id(4)).is_err());
        assert!(registry.rename(id(4), "x").is_err());
    }

    #[test]
    fn test_clear() {
        let mut registry = RangeRegistry::new();
        registry.add(range(0, 1)).unwrap();
        registry.set_displayed(Some(id(1))).unwrap();
        registry.clear();
        assert!(registry.is_empty());
        assert_eq!(registry.displayed(), None);
        assert_eq!(registry.add(range(0, 1)).unwrap(), id(1));
    }
}
