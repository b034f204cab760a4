//! Data service contract consumed by the selection engine.
//!
//! Implementations answer per-range queries for one signal of one dataset.
//! They are shared across worker threads, so every method takes `&self`.

use thiserror::Error;

use crate::calibration::CalibrationParameters;
use crate::context::DatasetRef;
use crate::range::{EnergySpan, IndexSpan};

/// Dense 2D image, rows by columns.
pub type Matrix = ndarray::Array2<f64>;

/// Failure reported by a data service query.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ServiceError {
    /// The dataset is not known to the service.
    #[error("unknown dataset '{0}'")]
    UnknownDataset(String),

    /// The dataset has no signal at this index.
    #[error("signal {index} out of range for dataset '{dataset}'")]
    UnknownSignal { dataset: String, index: usize },

    /// Requested span lies outside the signal's axis.
    #[error("{0}")]
    OutOfRange(String),

    /// The signal does not have the dimensionality the query needs.
    #[error("unsupported signal shape: {0}")]
    UnsupportedShape(String),

    /// Transport or backend failure.
    #[error("query failed: {0}")]
    Failed(String),
}

/// Backend queries used by the selection engine.
pub trait DataService: Send + Sync {
    /// Total counts over an energy span, summed across all pixels.
    ///
    /// # Errors
    /// Returns a [`ServiceError`] if the query cannot be answered.
    fn aggregate_sum(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
        energy: EnergySpan,
    ) -> Result<f64, ServiceError>;

    /// Per-pixel counts summed over a channel span.
    ///
    /// # Errors
    /// Returns a [`ServiceError`] if the query cannot be answered.
    fn range_image(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
        indices: IndexSpan,
    ) -> Result<Matrix, ServiceError>;

    /// Calibration of the spectral axis.
    ///
    /// # Errors
    /// Returns a [`ServiceError`] if the signal is unknown.
    fn calibration(
        &self,
        dataset: &DatasetRef,
        signal_index: usize,
    ) -> Result<CalibrationParameters, ServiceError>;

    /// Number of channels on the spectral axis.
    ///
    /// # Errors
    /// Returns a [`ServiceError`] if the signal is unknown.
    fn channel_count(&self, dataset: &DatasetRef, signal_index: usize)
        -> Result<usize, ServiceError>;

    /// Estimated half-width of the zero-energy peak, or `None` if unavailable.
    fn zero_peak_width(&self, dataset: &DatasetRef, signal_index: usize) -> Option<f64>;
}
