//! Range identities, spans and entries.

use std::fmt;

use crate::error::DomainError;
use crate::lines::LineName;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Identity of one of the registry slots, always in `1..=RangeId::MAX_SLOTS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "u8", into = "u8"))]
pub struct RangeId(u8);

impl RangeId {
    /// Number of slots a registry holds.
    pub const MAX_SLOTS: usize = 10;

    /// Creates an id if `value` names a slot.
    #[must_use]
    pub fn new(value: u8) -> Option<Self> {
        (1..=Self::MAX_SLOTS)
            .contains(&usize::from(value))
            .then_some(Self(value))
    }

    /// Returns the raw slot number.
    #[inline]
    #[must_use]
    pub fn get(self) -> u8 {
        self.0
    }

    /// Zero-based slot position.
    #[inline]
    pub(crate) fn slot(self) -> usize {
        usize::from(self.0) - 1
    }

    #[allow(clippy::cast_possible_truncation)]
    pub(crate) fn from_slot(slot: usize) -> Self {
        debug_assert!(slot < Self::MAX_SLOTS);
        Self(slot as u8 + 1)
    }

    /// Iterates every slot id in ascending order.
    pub fn all() -> impl Iterator<Item = RangeId> {
        (0..Self::MAX_SLOTS).map(Self::from_slot)
    }
}

impl fmt::Display for RangeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u8> for RangeId {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("range id {value} is outside 1..=10"))
    }
}

impl From<RangeId> for u8 {
    fn from(id: RangeId) -> Self {
        id.0
    }
}

/// Inclusive channel span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct IndexSpan {
    /// First channel.
    pub start: usize,
    /// Last channel (inclusive).
    pub end: usize,
}

impl IndexSpan {
    /// Creates a span, rejecting `start > end`.
    ///
    /// # Errors
    /// Returns [`DomainError::InvertedSpan`].
    #[allow(clippy::cast_precision_loss)]
    pub fn new(start: usize, end: usize) -> Result<Self, DomainError> {
        if start > end {
            return Err(DomainError::InvertedSpan {
                start: start as f64,
                end: end as f64,
            });
        }
        Ok(Self { start, end })
    }

    /// Creates a span from two endpoints in either order.
    #[must_use]
    pub fn ordered(a: usize, b: usize) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Number of channels covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// A span always covers at least one channel.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        false
    }
}

impl fmt::Display for IndexSpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

/// Closed energy interval.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EnergySpan {
    /// Lower energy.
    pub start: f64,
    /// Upper energy.
    pub end: f64,
}

impl EnergySpan {
    /// Creates a span, rejecting non-finite or inverted endpoints.
    ///
    /// # Errors
    /// Returns [`DomainError::NonFiniteEnergy`] or [`DomainError::InvertedSpan`].
    pub fn new(start: f64, end: f64) -> Result<Self, DomainError> {
        for value in [start, end] {
            if !value.is_finite() {
                return Err(DomainError::NonFiniteEnergy(value));
            }
        }
        if start > end {
            return Err(DomainError::InvertedSpan { start, end });
        }
        Ok(Self { start, end })
    }

    /// Creates a span from two endpoints in either order.
    #[must_use]
    pub fn ordered(a: f64, b: f64) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// Span width.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `energy` lies inside the span.
    #[must_use]
    pub fn contains(&self, energy: f64) -> bool {
        energy >= self.start && energy <= self.end
    }
}

impl fmt::Display for EnergySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:.4}, {:.4}]", self.start, self.end)
    }
}

/// How a new or edited range is specified by its caller.
///
/// The other coordinate is derived through the active calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RangeBounds {
    /// Channel span; energies are computed from it.
    Indices(IndexSpan),
    /// Energy span; channels are the nearest on-axis indices.
    Energy(EnergySpan),
}

/// A range request before a slot has been assigned.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RangeRequest {
    /// Requested bounds.
    pub bounds: RangeBounds,
    /// Display label; defaults to `Range <id>`.
    #[cfg_attr(feature = "serde", serde(default))]
    pub label: Option<String>,
    /// Element symbol the range was derived from.
    #[cfg_attr(feature = "serde", serde(default))]
    pub element: Option<String>,
    /// Emission line the range was derived from.
    #[cfg_attr(feature = "serde", serde(default))]
    pub source_line: Option<LineName>,
}

impl RangeRequest {
    /// Request by channel span.
    #[must_use]
    pub fn indices(start: usize, end: usize) -> Self {
        Self::from_bounds(RangeBounds::Indices(IndexSpan::ordered(start, end)))
    }

    /// Request by energy span.
    #[must_use]
    pub fn energy(start: f64, end: f64) -> Self {
        Self::from_bounds(RangeBounds::Energy(EnergySpan::ordered(start, end)))
    }

    fn from_bounds(bounds: RangeBounds) -> Self {
        Self {
            bounds,
            label: None,
            element: None,
            source_line: None,
        }
    }

    /// Sets the label.
    #[must_use]
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Tags the request with its element and emission line.
    #[must_use]
    pub fn with_source(mut self, element: impl Into<String>, line: LineName) -> Self {
        self.element = Some(element.into());
        self.source_line = Some(line);
        self
    }
}

/// Channel and energy bounds that agree under one calibration.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ResolvedBounds {
    /// Channel span.
    pub indices: IndexSpan,
    /// Energy span.
    pub energy: EnergySpan,
}

/// A live range held by the registry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct RangeEntry {
    /// Slot identity.
    pub id: RangeId,
    /// Channel span.
    pub indices: IndexSpan,
    /// Energy span.
    pub energy: EnergySpan,
    /// Display label.
    pub label: String,
    /// Element symbol the range was derived from.
    pub element: Option<String>,
    /// Emission line the range was derived from.
    pub source_line: Option<LineName>,
}

impl RangeEntry {
    /// Channel and energy bounds of the entry.
    #[must_use]
    pub fn bounds(&self) -> ResolvedBounds {
        ResolvedBounds {
            indices: self.indices,
            energy: self.energy,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_range_id_bounds() {
        assert!(RangeId::new(0).is_none());
        assert!(RangeId::new(11).is_none());
        assert_eq!(RangeId::new(1).unwrap().slot(), 0);
        assert_eq!(RangeId::new(10).unwrap().slot(), 9);
        assert_eq!(RangeId::all().count(), RangeId::MAX_SLOTS);
    }

    #[test]
    fn test_spans_reject_inversion() {
        assert!(IndexSpan::new(5, 4).is_err());
        assert_eq!(IndexSpan::new(4, 4).unwrap().len(), 1);
        assert!(EnergySpan::new(2.0, 1.0).is_err());
        assert!(EnergySpan::new(f64::INFINITY, 1.0).is_err());
        assert_eq!(EnergySpan::ordered(2.0, 1.0), EnergySpan::new(1.0, 2.0).unwrap());
    }
}
