//! specrange-fetch: Asynchronous range queries for spectrum range selection.
//!
//! This crate keeps per-range sum and image queries, and per-emission-line
//! sums, consistent with the selection published by a
//! [`specrange_core::SelectionSession`]. Queries run on a pluggable executor
//! and are tagged with generations so that only the latest issued query for a
//! key can become visible.

mod cells;
mod emission;
mod engine;
mod executor;
mod fetcher;
mod message;

#[cfg(test)]
mod testing;

pub use cells::{FetchStatus, Generation, Resolution, ResultCells};
pub use emission::{
    describe_toggle_error, DeriverConfig, EmissionLineDeriver, HalfWidths, LineKey, LineState,
    WidthOverride, WidthSide,
};
pub use engine::SelectionEngine;
pub use executor::{QueuedSpawner, RayonSpawner, Spawn, Task};
pub use fetcher::{FetchConfig, FetchKey, FetchKind, FetchResult, FetchValue, RangeDataFetcher};
