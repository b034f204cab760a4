//! Linear channel/energy calibration.
//!
//! A spectrum axis maps channel `i` to energy `i * scale + offset`. The
//! [`CalibrationConverter`] couples those parameters with the channel count of
//! the axis so that energy lookups can be clamped onto real channels.

use crate::error::DomainError;
use crate::range::{EnergySpan, IndexSpan, RangeBounds, ResolvedBounds};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Offset, scale and units of one measurement axis.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CalibrationParameters {
    /// Energy of channel zero.
    pub offset: f64,
    /// Energy per channel.
    pub scale: f64,
    /// Physical units of `offset` and `scale` (usually keV).
    pub units: String,
}

impl CalibrationParameters {
    /// Creates calibration parameters.
    pub fn new(offset: f64, scale: f64, units: impl Into<String>) -> Self {
        Self {
            offset,
            scale,
            units: units.into(),
        }
    }

    /// Checks that the calibration describes a usable axis.
    ///
    /// # Errors
    /// Returns [`DomainError::ZeroScale`] or [`DomainError::NonFiniteCalibration`].
    pub fn validate(&self) -> Result<(), DomainError> {
        if !self.offset.is_finite() || !self.scale.is_finite() {
            return Err(DomainError::NonFiniteCalibration {
                offset: self.offset,
                scale: self.scale,
            });
        }
        if self.scale == 0.0 {
            return Err(DomainError::ZeroScale);
        }
        Ok(())
    }

    /// Energy at a (possibly fractional) channel position, without bounds.
    #[inline]
    #[must_use]
    pub fn energy_at(&self, channel: f64) -> f64 {
        channel * self.scale + self.offset
    }

    /// Fractional channel position of an energy, without rounding or bounds.
    #[inline]
    #[must_use]
    pub fn channel_at(&self, energy: f64) -> f64 {
        (energy - self.offset) / self.scale
    }
}

impl Default for CalibrationParameters {
    fn default() -> Self {
        Self {
            offset: 0.0,
            scale: 0.01,
            units: "keV".to_string(),
        }
    }
}

/// Bidirectional mapping between channel index and energy for one axis.
///
/// Only constructible through [`CalibrationConverter::new`], so the scale is
/// always non-zero and the axis non-empty.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize))]
pub struct CalibrationConverter {
    calibration: CalibrationParameters,
    channel_count: usize,
}

impl CalibrationConverter {
    /// Creates a converter for an axis with `channel_count` channels.
    ///
    /// # Errors
    /// Fails with a [`DomainError`] if the calibration is degenerate or the
    /// axis has no channels.
    pub fn new(calibration: CalibrationParameters, channel_count: usize) -> Result<Self, DomainError> {
        calibration.validate()?;
        if channel_count == 0 {
            return Err(DomainError::EmptyAxis);
        }
        Ok(Self {
            calibration,
            channel_count,
        })
    }

    /// The underlying calibration parameters.
    #[must_use]
    pub fn calibration(&self) -> &CalibrationParameters {
        &self.calibration
    }

    /// Number of channels on the axis.
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channel_count
    }

    /// Units of the energy axis.
    #[must_use]
    pub fn units(&self) -> &str {
        &self.calibration.units
    }

    /// Energy of channel `index`.
    ///
    /// # Errors
    /// Returns [`DomainError::IndexOutOfBounds`] for an index past the axis.
    pub fn index_to_energy(&self, index: usize) -> Result<f64, DomainError> {
        if index >= self.channel_count {
            return Err(DomainError::IndexOutOfBounds {
                index,
                channel_count: self.channel_count,
            });
        }
        Ok(self.calibration.energy_at(usize_to_f64(index)))
    }

    /// Nearest channel to `energy`, clamped to `[0, channel_count - 1]`.
    ///
    /// # Errors
    /// Returns [`DomainError::NonFiniteEnergy`] for NaN or infinite input.
    pub fn energy_to_index(&self, energy: f64) -> Result<usize, DomainError> {
        if !energy.is_finite() {
            return Err(DomainError::NonFiniteEnergy(energy));
        }
        let channel = self.calibration.channel_at(energy).round();
        Ok(clamp_channel(channel, self.channel_count - 1))
    }

    /// Fractional channel where the energy axis crosses zero.
    #[must_use]
    pub fn zero_index(&self) -> f64 {
        -self.calibration.offset / self.calibration.scale
    }

    /// Energies of the first and last channel, ordered low to high.
    #[must_use]
    pub fn axis_bounds(&self) -> EnergySpan {
        let first = self.calibration.energy_at(0.0);
        let last = self
            .calibration
            .energy_at(usize_to_f64(self.channel_count - 1));
        EnergySpan::ordered(first, last)
    }

    /// Energy span covered by a channel span.
    ///
    /// With a negative scale the endpoints swap so the result stays ordered.
    ///
    /// # Errors
    /// Returns [`DomainError::IndexOutOfBounds`] if `indices.end` is past the axis.
    pub fn indices_to_energy(&self, indices: IndexSpan) -> Result<EnergySpan, DomainError> {
        let start = self.index_to_energy(indices.start)?;
        let end = self.index_to_energy(indices.end)?;
        Ok(EnergySpan::ordered(start, end))
    }

    /// Channel span nearest to an energy span, clamped onto the axis.
    ///
    /// # Errors
    /// Returns a [`DomainError`] for non-finite energies.
    pub fn energy_to_indices(&self, energy: EnergySpan) -> Result<IndexSpan, DomainError> {
        let start = self.energy_to_index(energy.start)?;
        let end = self.energy_to_index(energy.end)?;
        Ok(IndexSpan::ordered(start, end))
    }

    /// Completes caller-supplied bounds with the other coordinate.
    ///
    /// Channel bounds must lie on the axis. Energy bounds are clipped to
    /// [`Self::axis_bounds`] and paired with their nearest channels, so both
    /// coordinates describe the same part of the axis.
    ///
    /// # Errors
    /// Returns a [`DomainError`] for off-axis channels, invalid energies, or an
    /// energy span entirely outside the axis.
    pub fn resolve(&self, bounds: RangeBounds) -> Result<ResolvedBounds, DomainError> {
        match bounds {
            RangeBounds::Indices(indices) => {
                let indices = IndexSpan::new(indices.start, indices.end)?;
                Ok(ResolvedBounds {
                    indices,
                    energy: self.indices_to_energy(indices)?,
                })
            }
            RangeBounds::Energy(energy) => {
                let energy = EnergySpan::new(energy.start, energy.end)?;
                let axis = self.axis_bounds();
                if energy.end < axis.start || energy.start > axis.end {
                    return Err(DomainError::EnergyOutsideAxis {
                        start: energy.start,
                        end: energy.end,
                        axis_start: axis.start,
                        axis_end: axis.end,
                    });
                }
                let energy =
                    EnergySpan::new(energy.start.max(axis.start), energy.end.min(axis.end))?;
                Ok(ResolvedBounds {
                    indices: self.energy_to_indices(energy)?,
                    energy,
                })
            }
        }
    }
}

#[allow(clippy::cast_precision_loss)]
fn usize_to_f64(value: usize) -> f64 {
    value as f64
}

/// Clamp an already-rounded channel position onto `[0, max]`.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn clamp_channel(channel: f64, max: usize) -> usize {
    if channel <= 0.0 {
        0
    } else if channel >= usize_to_f64(max) {
        max
    } else {
        channel as usize
    }
}
