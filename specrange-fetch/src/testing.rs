//! In-memory data service for unit tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use specrange_core::{
    CalibrationParameters, DataService, DatasetRef, EnergySpan, IndexSpan, Matrix, ServiceError,
};

/// Sums are `start + end` of the energy span; images are 2x2 filled with the
/// first channel.
#[derive(Debug)]
pub(crate) struct StubService {
    fail_images: AtomicBool,
    fail_sums: AtomicBool,
    zero_peak: Mutex<Option<f64>>,
}

impl Default for StubService {
    fn default() -> Self {
        Self {
            fail_images: AtomicBool::new(false),
            fail_sums: AtomicBool::new(false),
            zero_peak: Mutex::new(None),
        }
    }
}

impl StubService {
    pub(crate) fn fail_images(&self, fail: bool) {
        self.fail_images.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn fail_sums(&self, fail: bool) {
        self.fail_sums.store(fail, Ordering::SeqCst);
    }

    pub(crate) fn set_zero_peak(&self, width: Option<f64>) {
        *self.zero_peak.lock().unwrap() = width;
    }
}

impl DataService for StubService {
    fn aggregate_sum(
        &self,
        _dataset: &DatasetRef,
        _signal_index: usize,
        energy: EnergySpan,
    ) -> Result<f64, ServiceError> {
        if self.fail_sums.load(Ordering::SeqCst) {
            return Err(ServiceError::Failed("sum backend offline".into()));
        }
        Ok(energy.start + energy.end)
    }

    fn range_image(
        &self,
        _dataset: &DatasetRef,
        _signal_index: usize,
        indices: IndexSpan,
    ) -> Result<Matrix, ServiceError> {
        if self.fail_images.load(Ordering::SeqCst) {
            return Err(ServiceError::Failed("image backend offline".into()));
        }
        #[allow(clippy::cast_precision_loss)]
        Ok(Matrix::from_elem((2, 2), indices.start as f64))
    }

    fn calibration(
        &self,
        _dataset: &DatasetRef,
        _signal_index: usize,
    ) -> Result<CalibrationParameters, ServiceError> {
        Ok(CalibrationParameters::new(0.0, 0.01, "keV"))
    }

    fn channel_count(
        &self,
        _dataset: &DatasetRef,
        _signal_index: usize,
    ) -> Result<usize, ServiceError> {
        Ok(2048)
    }

    fn zero_peak_width(&self, _dataset: &DatasetRef, _signal_index: usize) -> Option<f64> {
        *self.zero_peak.lock().unwrap()
    }
}
