//! Spectrum image cubes held in memory.
//!
//! A cube stores counts as `rows x cols x channels` in standard layout, so
//! each pixel's spectrum is one contiguous slice. Aggregate queries walk those
//! slices in parallel.

use ndarray::{Array1, Array2, Array3, Axis};
use rayon::prelude::*;
use specrange_core::{
    CalibrationConverter, CalibrationParameters, DomainError, EnergySpan, IndexSpan, Matrix,
    ServiceError,
};

use crate::{Error, Result};

/// Relative tolerance when searching for the half-maximum channel.
const HALF_MAX_TOLERANCE: f64 = 0.05;

/// One spectrum image signal with a calibrated spectral axis.
#[derive(Debug, Clone, PartialEq)]
pub struct SpectrumCube {
    title: String,
    calibration: CalibrationParameters,
    data: Array3<f64>,
}

impl SpectrumCube {
    /// Creates a cube from a `rows x cols x channels` array.
    ///
    /// # Errors
    /// [`Error::InvalidFormat`] for an empty spectral axis, or the calibration error.
    pub fn new(
        title: impl Into<String>,
        calibration: CalibrationParameters,
        data: Array3<f64>,
    ) -> Result<Self> {
        calibration.validate().map_err(specrange_core::Error::from)?;
        if data.len_of(Axis(2)) == 0 {
            return Err(Error::InvalidFormat("cube has no channels".into()));
        }
        Ok(Self {
            title: title.into(),
            calibration,
            data: data.as_standard_layout().into_owned(),
        })
    }

    /// Creates a cube from row-major values.
    ///
    /// # Errors
    /// [`Error::InvalidFormat`] if `values` does not match `shape`.
    pub fn from_flat(
        title: impl Into<String>,
        calibration: CalibrationParameters,
        shape: [usize; 3],
        values: Vec<f64>,
    ) -> Result<Self> {
        let expected = shape.iter().product::<usize>();
        let found = values.len();
        let data = Array3::from_shape_vec((shape[0], shape[1], shape[2]), values).map_err(|_| {
            Error::InvalidFormat(format!(
                "shape {shape:?} needs {expected} values, found {found}"
            ))
        })?;
        Self::new(title, calibration, data)
    }

    /// Signal title.
    #[must_use]
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Axis calibration.
    #[must_use]
    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }

    /// `(rows, cols, channels)`.
    #[must_use]
    pub fn shape(&self) -> (usize, usize, usize) {
        self.data.dim()
    }

    /// Number of channels on the spectral axis.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.data.len_of(Axis(2))
    }

    /// Raw counts.
    #[must_use]
    pub fn data(&self) -> &Array3<f64> {
        &self.data
    }

    /// Row-major counts.
    #[must_use]
    pub fn values(&self) -> Vec<f64> {
        self.data.iter().copied().collect()
    }

    /// Converter for this cube's axis.
    ///
    /// # Errors
    /// Returns the calibration error.
    pub fn converter(&self) -> std::result::Result<CalibrationConverter, DomainError> {
        CalibrationConverter::new(self.calibration.clone(), self.channel_count())
    }

    /// Spectrum summed over every pixel.
    #[must_use]
    pub fn summed_spectrum(&self) -> Array1<f64> {
        self.data.sum_axis(Axis(0)).sum_axis(Axis(0))
    }

    /// Counts over channels `[start, end)` summed across all pixels.
    #[must_use]
    pub fn sum_channels(&self, span: IndexSpan) -> f64 {
        let end = span.end.min(self.channel_count());
        if span.start >= end {
            return 0.0;
        }
        self.spectra()
            .map(|spectrum| spectrum[span.start..end].iter().sum::<f64>())
            .sum()
    }

    /// Counts inside an energy span summed across all pixels.
    ///
    /// The span must lie on the axis; channels `[index(start), index(end))`
    /// are summed.
    ///
    /// # Errors
    /// [`ServiceError::OutOfRange`] if the span leaves the axis.
    pub fn energy_sum(&self, energy: EnergySpan) -> std::result::Result<f64, ServiceError> {
        let converter = self
            .converter()
            .map_err(|err| ServiceError::Failed(err.to_string()))?;
        let axis = converter.axis_bounds();
        if energy.start > axis.end || energy.end > axis.end {
            return Err(ServiceError::OutOfRange(
                "Energy range exceeds spectrum maximum".into(),
            ));
        }
        if energy.start < axis.start || energy.end < axis.start {
            return Err(ServiceError::OutOfRange(
                "Energy range below spectrum minimum".into(),
            ));
        }
        let indices = converter
            .energy_to_indices(energy)
            .map_err(|err| ServiceError::OutOfRange(err.to_string()))?;
        Ok(self.sum_channels(indices))
    }

    /// Per-pixel counts over channels `[start, end]`.
    ///
    /// # Errors
    /// [`ServiceError::OutOfRange`] if `end` is past the last channel.
    pub fn channel_image(&self, span: IndexSpan) -> std::result::Result<Matrix, ServiceError> {
        let (rows, cols, channels) = self.shape();
        if span.start > span.end || span.end >= channels {
            return Err(ServiceError::OutOfRange(format!(
                "channel span {span} outside 0..{channels}"
            )));
        }
        let pixels: Vec<f64> = self
            .spectra()
            .map(|spectrum| spectrum[span.start..=span.end].iter().sum::<f64>())
            .collect();
        Array2::from_shape_vec((rows, cols), pixels)
            .map_err(|err| ServiceError::UnsupportedShape(err.to_string()))
    }

    /// Half-width of the zero-energy peak in axis units.
    ///
    /// Walks the summed spectrum from the zero channel to the first channel
    /// near half of the peak height. `None` if the zero channel is off the
    /// axis or no positive width is found.
    #[must_use]
    pub fn zero_peak_width(&self) -> Option<f64> {
        let zero = (-self.calibration.offset / self.calibration.scale).round();
        if !zero.is_finite() || zero < 0.0 {
            return None;
        }
        let zero_index = f64_to_index(zero)?;
        if zero_index >= self.channel_count() {
            return None;
        }
        let spectrum = self.summed_spectrum();
        let half_max = half_max_index(spectrum.as_slice()?, zero_index);
        let width = index_to_f64(half_max - zero_index) * self.calibration.scale.abs();
        (width > 0.0).then_some(width)
    }

    /// Per-pixel spectra in row-major pixel order.
    fn spectra(&self) -> rayon::slice::Chunks<'_, f64> {
        // Constructors store standard layout, so the slice is always present.
        self.data
            .as_slice()
            .unwrap_or(&[])
            .par_chunks(self.channel_count())
    }
}

/// First channel after `zero_index` whose intensity is close to half the peak.
///
/// Once the intensity falls below half-maximum without a close match, the
/// nearer of the two straddling channels is taken.
fn half_max_index(spectrum: &[f64], zero_index: usize) -> usize {
    let height = spectrum[zero_index];
    let half = height / 2.0;
    let tolerance = height * HALF_MAX_TOLERANCE;

    for (i, &value) in spectrum.iter().enumerate().skip(zero_index + 1) {
        if (value - half).abs() <= tolerance {
            return i;
        }
        if value < half {
            if i > zero_index + 1 {
                let previous = (spectrum[i - 1] - half).abs();
                let current = (value - half).abs();
                return if current < previous { i } else { i - 1 };
            }
            return i;
        }
    }
    zero_index
}

#[allow(clippy::cast_precision_loss)]
fn index_to_f64(value: usize) -> f64 {
    value as f64
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn f64_to_index(value: f64) -> Option<usize> {
    (value >= 0.0 && value < index_to_f64(usize::MAX)).then_some(value as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp_cube() -> SpectrumCube {
        // 2x3 pixels, 10 channels; pixel p has value p+1 in every channel.
        let values = (0..6)
            .flat_map(|p| std::iter::repeat(f64::from(p + 1)).take(10))
            .collect();
        SpectrumCube::from_flat(
            "ramp",
            CalibrationParameters::new(0.0, 0.1, "keV"),
            [2, 3, 10],
            values,
        )
        .unwrap()
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = SpectrumCube::from_flat(
            "bad",
            CalibrationParameters::default(),
            [2, 2, 4],
            vec![0.0; 15],
        )
        .unwrap_err();
        assert!(matches!(err, Error::InvalidFormat(_)));
    }

    #[test]
    fn test_zero_scale_rejected() {
        let err = SpectrumCube::new(
            "bad",
            CalibrationParameters::new(0.0, 0.0, "keV"),
            Array3::zeros((1, 1, 4)),
        )
        .unwrap_err();
        assert!(matches!(err, Error::Core(_)));
    }

    #[test]
    fn test_sum_channels_half_open() {
        let cube = ramp_cube();
        // 21 total per channel across pixels, 3 channels.
        assert_relative_eq!(cube.sum_channels(IndexSpan::new(2, 5).unwrap()), 63.0);
        assert_relative_eq!(cube.sum_channels(IndexSpan::new(4, 4).unwrap()), 0.0);
    }

    #[test]
    fn test_energy_sum_bounds() {
        let cube = ramp_cube();
        let sum = cube.energy_sum(EnergySpan::new(0.2, 0.5).unwrap()).unwrap();
        assert_relative_eq!(sum, 63.0);

        let high = cube.energy_sum(EnergySpan::new(0.5, 1.5).unwrap()).unwrap_err();
        assert_eq!(
            high,
            ServiceError::OutOfRange("Energy range exceeds spectrum maximum".into())
        );
        let low = cube.energy_sum(EnergySpan::new(-0.5, 0.5).unwrap()).unwrap_err();
        assert_eq!(
            low,
            ServiceError::OutOfRange("Energy range below spectrum minimum".into())
        );
    }

    #[test]
    fn test_channel_image_inclusive() {
        let cube = ramp_cube();
        let image = cube.channel_image(IndexSpan::new(0, 1).unwrap()).unwrap();
        assert_eq!(image.dim(), (2, 3));
        assert_relative_eq!(image[[0, 0]], 2.0);
        assert_relative_eq!(image[[1, 2]], 12.0);

        assert!(cube.channel_image(IndexSpan::new(5, 10).unwrap()).is_err());
    }

    #[test]
    fn test_half_max_search() {
        // Exact hit within tolerance.
        assert_eq!(half_max_index(&[100.0, 80.0, 51.0, 20.0], 0), 2);
        // Equal distance on both sides keeps the earlier channel.
        assert_eq!(half_max_index(&[100.0, 70.0, 30.0], 0), 1);
        // Immediate drop.
        assert_eq!(half_max_index(&[100.0, 10.0], 0), 1);
        // Never drops.
        assert_eq!(half_max_index(&[100.0, 90.0, 95.0], 0), 0);
    }

    #[test]
    fn test_zero_peak_width() {
        let mut spectrum = vec![1.0; 20];
        spectrum[2] = 100.0;
        spectrum[3] = 75.0;
        spectrum[4] = 49.0;
        let cube = SpectrumCube::from_flat(
            "peak",
            CalibrationParameters::new(-0.02, 0.01, "keV"),
            [1, 1, 20],
            spectrum,
        )
        .unwrap();
        assert_relative_eq!(cube.zero_peak_width().unwrap(), 0.02, epsilon = 1e-12);

        let off_axis = SpectrumCube::from_flat(
            "shifted",
            CalibrationParameters::new(0.5, 0.01, "keV"),
            [1, 1, 20],
            vec![1.0; 20],
        )
        .unwrap();
        assert_eq!(off_axis.zero_peak_width(), None);
    }
}
