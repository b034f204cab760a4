//! X-ray emission line names and reference elements.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Characteristic emission lines tracked per element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum LineName {
    Ka1,
    Ka2,
    Kb1,
    La1,
    La2,
    Lb1,
    Lb2,
    Lg1,
    Ma1,
}

impl LineName {
    /// All lines in table order.
    pub const ALL: [LineName; 9] = [
        LineName::Ka1,
        LineName::Ka2,
        LineName::Kb1,
        LineName::La1,
        LineName::La2,
        LineName::Lb1,
        LineName::Lb2,
        LineName::Lg1,
        LineName::Ma1,
    ];

    /// Conventional Siegbahn-style label.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            LineName::Ka1 => "Ka1",
            LineName::Ka2 => "Ka2",
            LineName::Kb1 => "Kb1",
            LineName::La1 => "La1",
            LineName::La2 => "La2",
            LineName::Lb1 => "Lb1",
            LineName::Lb2 => "Lb2",
            LineName::Lg1 => "Lg1",
            LineName::Ma1 => "Ma1",
        }
    }
}

impl fmt::Display for LineName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LineName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        LineName::ALL
            .into_iter()
            .find(|line| line.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown emission line '{s}'"))
    }
}

/// An element selected as reference, with its tabulated line energies.
///
/// A line maps to `None` when it does not exist for the element.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ReferenceElement {
    /// Element symbol, e.g. `Fe`.
    pub symbol: String,
    /// Atomic number.
    pub atomic_number: u8,
    /// Line energies in axis units.
    pub lines: BTreeMap<LineName, Option<f64>>,
}

impl ReferenceElement {
    /// Creates an element with no lines.
    pub fn new(symbol: impl Into<String>, atomic_number: u8) -> Self {
        Self {
            symbol: symbol.into(),
            atomic_number,
            lines: BTreeMap::new(),
        }
    }

    /// Adds a line energy.
    #[must_use]
    pub fn with_line(mut self, line: LineName, energy: f64) -> Self {
        self.lines.insert(line, Some(energy));
        self
    }

    /// Energy of `line`, if the element has it.
    #[must_use]
    pub fn energy(&self, line: LineName) -> Option<f64> {
        self.lines.get(&line).copied().flatten()
    }

    /// Lines with a tabulated energy, in table order.
    pub fn available_lines(&self) -> impl Iterator<Item = (LineName, f64)> + '_ {
        self.lines
            .iter()
            .filter_map(|(line, energy)| energy.map(|e| (*line, e)))
    }
}
