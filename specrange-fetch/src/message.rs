//! Completion messages for async communication.
//!
//! Background tasks never touch shared state. Each sends exactly one message
//! to its owner's channel, and the owner applies it on the control thread.

use specrange_core::{DatasetRef, ServiceError};

use crate::cells::Generation;
use crate::emission::LineKey;
use crate::fetcher::{FetchKey, FetchValue};

/// Messages sent from range query tasks to the [`crate::RangeDataFetcher`].
pub(crate) enum FetchMessage {
    /// A sum or image query finished.
    Completed {
        key: FetchKey,
        generation: Generation,
        outcome: Result<FetchValue, ServiceError>,
    },
}

/// Messages sent from line tasks to the [`crate::EmissionLineDeriver`].
pub(crate) enum LineMessage {
    /// A per-line sum query finished.
    SumCompleted {
        key: LineKey,
        generation: Generation,
        outcome: Result<f64, ServiceError>,
    },

    /// The zero-peak width estimate for a dataset finished.
    ZeroPeakEstimated {
        dataset: DatasetRef,
        generation: Generation,
        width: Option<f64>,
    },
}
