//! Active dataset context shared with every selection consumer.

use std::fmt;
use std::sync::Arc;

use crate::calibration::CalibrationConverter;
use crate::error::Result;
use crate::service::DataService;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Name of a dataset known to the data service.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct DatasetRef(Arc<str>);

impl DatasetRef {
    /// Creates a dataset reference.
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The dataset name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatasetRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetRef {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Dataset, signal and calibration that current ranges refer to.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct DatasetContext {
    /// Dataset name.
    pub dataset: DatasetRef,
    /// Signal index inside the dataset.
    pub signal_index: usize,
    /// Spectral axis calibration.
    pub converter: CalibrationConverter,
}

impl DatasetContext {
    /// Creates a context from an already validated converter.
    #[must_use]
    pub fn new(dataset: DatasetRef, signal_index: usize, converter: CalibrationConverter) -> Self {
        Self {
            dataset,
            signal_index,
            converter,
        }
    }

    /// Queries calibration and channel count from the data service.
    ///
    /// # Errors
    /// Propagates service failures and rejects degenerate calibrations.
    pub fn load<S: DataService + ?Sized>(
        service: &S,
        dataset: DatasetRef,
        signal_index: usize,
    ) -> Result<Self> {
        let calibration = service.calibration(&dataset, signal_index)?;
        let channel_count = service.channel_count(&dataset, signal_index)?;
        let converter = CalibrationConverter::new(calibration, channel_count)?;
        Ok(Self::new(dataset, signal_index, converter))
    }
}
