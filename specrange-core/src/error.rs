//! Error types for specrange-core.

use thiserror::Error;

use crate::range::RangeId;

/// Result type alias for specrange operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid calibration or coordinate input.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DomainError {
    /// Calibration scale of zero makes the axis degenerate.
    #[error("calibration scale must be non-zero")]
    ZeroScale,

    /// Offset or scale is NaN or infinite.
    #[error("calibration is not finite: offset={offset}, scale={scale}")]
    NonFiniteCalibration { offset: f64, scale: f64 },

    /// The measurement axis has no channels.
    #[error("axis has no channels")]
    EmptyAxis,

    /// Channel index outside `[0, channel_count)`.
    #[error("channel index {index} out of bounds (channel count {channel_count})")]
    IndexOutOfBounds { index: usize, channel_count: usize },

    /// Energy value is NaN or infinite.
    #[error("energy is not finite: {0}")]
    NonFiniteEnergy(f64),

    /// A span whose start lies after its end.
    #[error("inverted span: start {start} > end {end}")]
    InvertedSpan { start: f64, end: f64 },

    /// An energy span that does not reach the calibrated axis.
    #[error("energy span {start}..{end} lies outside the axis {axis_start}..{axis_end}")]
    EnergyOutsideAxis {
        start: f64,
        end: f64,
        axis_start: f64,
        axis_end: f64,
    },

    /// A half-width that is negative or not finite.
    #[error("half-width must be finite and non-negative, got {0}")]
    InvalidWidth(f64),

    /// An emission line without a tabulated energy.
    #[error("line {0} has no energy for the selected element")]
    MissingLineEnergy(String),
}

/// All ten range slots are occupied.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("range registry is full ({capacity}/{capacity} slots in use)")]
pub struct CapacityError {
    /// Number of slots in the registry.
    pub capacity: usize,
}

/// Operation on a range id that is not live.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no range with id {id}")]
pub struct NotFoundError {
    /// The id that was looked up.
    pub id: RangeId,
}

/// Core error types for specrange operations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    /// Calibration or coordinate error.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Registry capacity exhausted.
    #[error(transparent)]
    Capacity(#[from] CapacityError),

    /// Unknown range id.
    #[error(transparent)]
    NotFound(#[from] NotFoundError),

    /// A range operation needs an open dataset for calibration.
    #[error("no dataset is open")]
    NoDataset,

    /// The data service failed while opening a dataset.
    #[error("service error: {0}")]
    Service(#[from] crate::service::ServiceError),
}
