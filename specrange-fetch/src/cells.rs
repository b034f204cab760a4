//! Generation-tagged result cells.
//!
//! Each key owns one cell. Issuing a query hands out a fresh generation and
//! moves the cell to `Pending`; a completion is applied only if it carries the
//! cell's current generation. Generations come from one counter that never
//! rewinds, so a key that is invalidated and issued again can never match an
//! older completion.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

/// Monotonic tag of an issued query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Generation(u64);

impl Generation {
    /// Raw counter value.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// Lifecycle of one query key.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchStatus<V> {
    /// Never issued, or invalidated.
    Idle,
    /// Issued and not yet resolved.
    Pending,
    /// Resolved with a value.
    Ready(V),
    /// Resolved with an error message.
    Failed(String),
}

impl<V> FetchStatus<V> {
    /// Returns true while a query is in flight.
    #[must_use]
    pub fn is_pending(&self) -> bool {
        matches!(self, FetchStatus::Pending)
    }

    /// The ready value, if any.
    #[must_use]
    pub fn value(&self) -> Option<&V> {
        match self {
            FetchStatus::Ready(value) => Some(value),
            _ => None,
        }
    }

    /// Short label for display.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            FetchStatus::Idle => "idle",
            FetchStatus::Pending => "pending",
            FetchStatus::Ready(_) => "ready",
            FetchStatus::Failed(_) => "failed",
        }
    }
}

/// Outcome of offering a completion to its cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// The completion became the visible state.
    Applied,
    /// A newer query superseded it, or the key was invalidated.
    Stale,
}

#[derive(Debug)]
struct Cell<V> {
    generation: Generation,
    status: FetchStatus<V>,
}

/// Per-key result cells with last-issued-wins semantics.
#[derive(Debug)]
pub struct ResultCells<K, V> {
    next_generation: u64,
    cells: HashMap<K, Cell<V>>,
}

impl<K, V> Default for ResultCells<K, V> {
    fn default() -> Self {
        Self {
            next_generation: 1,
            cells: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash, V> ResultCells<K, V> {
    /// Creates an empty set of cells.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks `key` pending under a fresh generation, superseding any earlier one.
    pub fn issue(&mut self, key: K) -> Generation {
        let generation = Generation(self.next_generation);
        self.next_generation += 1;
        self.cells.insert(
            key,
            Cell {
                generation,
                status: FetchStatus::Pending,
            },
        );
        generation
    }

    /// Applies a completion if `generation` is still the latest for `key`.
    pub fn resolve(
        &mut self,
        key: &K,
        generation: Generation,
        outcome: Result<V, String>,
    ) -> Resolution {
        match self.cells.get_mut(key) {
            Some(cell) if cell.generation == generation => {
                cell.status = match outcome {
                    Ok(value) => FetchStatus::Ready(value),
                    Err(message) => FetchStatus::Failed(message),
                };
                Resolution::Applied
            }
            _ => Resolution::Stale,
        }
    }

    /// Drops the cell for `key`; in-flight completions for it become stale.
    pub fn invalidate(&mut self, key: &K) -> bool {
        self.cells.remove(key).is_some()
    }

    /// Drops every cell.
    pub fn clear(&mut self) {
        self.cells.clear();
    }

    /// Keeps only cells whose key satisfies `keep`.
    pub fn retain(&mut self, mut keep: impl FnMut(&K) -> bool) {
        self.cells.retain(|key, _| keep(key));
    }

    /// Current generation and status of `key`.
    #[must_use]
    pub fn get(&self, key: &K) -> Option<(Generation, &FetchStatus<V>)> {
        self.cells
            .get(key)
            .map(|cell| (cell.generation, &cell.status))
    }

    /// Latest generation issued for `key`.
    #[must_use]
    pub fn generation(&self, key: &K) -> Option<Generation> {
        self.cells.get(key).map(|cell| cell.generation)
    }

    /// Number of cells still pending.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.cells
            .values()
            .filter(|cell| cell.status.is_pending())
            .count()
    }

    /// Number of tracked cells.
    #[must_use]
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Returns true if no cell is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}
