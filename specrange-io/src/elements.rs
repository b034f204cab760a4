//! Built-in emission line table for common elements.
//!
//! Energies in keV. Lines an element does not have are left out.

use specrange_core::{LineName, ReferenceElement};

type LineTable = &'static [(LineName, f64)];

const TABLE: &[(&str, u8, LineTable)] = &[
    ("C", 6, &[(LineName::Ka1, 0.277)]),
    ("O", 8, &[(LineName::Ka1, 0.525)]),
    ("Al", 13, &[(LineName::Ka1, 1.487), (LineName::Ka2, 1.486), (LineName::Kb1, 1.557)]),
    ("Si", 14, &[(LineName::Ka1, 1.740), (LineName::Ka2, 1.739), (LineName::Kb1, 1.836)]),
    (
        "Ti",
        22,
        &[
            (LineName::Ka1, 4.511),
            (LineName::Ka2, 4.505),
            (LineName::Kb1, 4.932),
            (LineName::La1, 0.452),
            (LineName::Lb1, 0.458),
        ],
    ),
    (
        "Cr",
        24,
        &[
            (LineName::Ka1, 5.415),
            (LineName::Ka2, 5.405),
            (LineName::Kb1, 5.947),
            (LineName::La1, 0.573),
            (LineName::Lb1, 0.583),
        ],
    ),
    (
        "Mn",
        25,
        &[
            (LineName::Ka1, 5.899),
            (LineName::Ka2, 5.888),
            (LineName::Kb1, 6.490),
            (LineName::La1, 0.637),
            (LineName::Lb1, 0.649),
        ],
    ),
    (
        "Fe",
        26,
        &[
            (LineName::Ka1, 6.404),
            (LineName::Ka2, 6.391),
            (LineName::Kb1, 7.058),
            (LineName::La1, 0.705),
            (LineName::La2, 0.705),
            (LineName::Lb1, 0.718),
        ],
    ),
    (
        "Ni",
        28,
        &[
            (LineName::Ka1, 7.478),
            (LineName::Ka2, 7.461),
            (LineName::Kb1, 8.265),
            (LineName::La1, 0.851),
            (LineName::Lb1, 0.869),
        ],
    ),
    (
        "Cu",
        29,
        &[
            (LineName::Ka1, 8.048),
            (LineName::Ka2, 8.028),
            (LineName::Kb1, 8.905),
            (LineName::La1, 0.930),
            (LineName::La2, 0.930),
            (LineName::Lb1, 0.950),
        ],
    ),
    (
        "Ag",
        47,
        &[
            (LineName::Ka1, 22.163),
            (LineName::Ka2, 21.990),
            (LineName::Kb1, 24.942),
            (LineName::La1, 2.984),
            (LineName::La2, 2.978),
            (LineName::Lb1, 3.151),
            (LineName::Lb2, 3.348),
            (LineName::Lg1, 3.519),
        ],
    ),
    (
        "Au",
        79,
        &[
            (LineName::La1, 9.713),
            (LineName::La2, 9.628),
            (LineName::Lb1, 11.443),
            (LineName::Lb2, 11.585),
            (LineName::Lg1, 13.382),
            (LineName::Ma1, 2.123),
        ],
    ),
    (
        "Pb",
        82,
        &[
            (LineName::La1, 10.551),
            (LineName::La2, 10.449),
            (LineName::Lb1, 12.614),
            (LineName::Lb2, 12.623),
            (LineName::Lg1, 14.765),
            (LineName::Ma1, 2.346),
        ],
    ),
];

/// Looks up an element by symbol, case-insensitively.
#[must_use]
pub fn element_by_symbol(symbol: &str) -> Option<ReferenceElement> {
    TABLE
        .iter()
        .find(|(s, _, _)| s.eq_ignore_ascii_case(symbol))
        .map(build)
}

/// Looks up an element by atomic number.
#[must_use]
pub fn element_by_number(atomic_number: u8) -> Option<ReferenceElement> {
    TABLE
        .iter()
        .find(|(_, z, _)| *z == atomic_number)
        .map(build)
}

/// Symbols in the table, by atomic number.
pub fn known_symbols() -> impl Iterator<Item = &'static str> {
    TABLE.iter().map(|(symbol, _, _)| *symbol)
}

fn build(entry: &(&str, u8, LineTable)) -> ReferenceElement {
    let (symbol, atomic_number, lines) = *entry;
    let mut element = ReferenceElement::new(symbol, atomic_number);
    for line in LineName::ALL {
        element.lines.insert(line, None);
    }
    lines
        .iter()
        .fold(element, |element, &(line, energy)| element.with_line(line, energy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        let fe = element_by_symbol("fe").unwrap();
        assert_eq!(fe.atomic_number, 26);
        assert_eq!(fe.energy(LineName::Ka1), Some(6.404));
        assert_eq!(fe.energy(LineName::Ma1), None);
        assert_eq!(fe.lines.len(), LineName::ALL.len());

        assert_eq!(element_by_number(79).unwrap().symbol, "Au");
        assert!(element_by_symbol("Xx").is_none());
        assert!(known_symbols().any(|s| s == "Cu"));
    }
}
