//! Atom counting and molar mass of a chemical formula
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

// symbol and standard atomic weight
const ELEMENTS: &[(&str, f64)] = &[
    ("H", 1.008),
    ("He", 4.0026),
    ("Li", 6.94),
    ("Be", 9.0122),
    ("B", 10.81),
    ("C", 12.011),
    ("N", 14.007),
    ("O", 15.999),
    ("F", 18.998),
    ("Ne", 20.18),
    ("Na", 22.99),
    ("Mg", 24.305),
    ("Al", 26.98),
    ("Si", 28.085),
    ("P", 30.974),
    ("S", 32.065),
    ("Cl", 35.45),
    ("Ar", 39.948),
    ("K", 39.102),
    ("Ca", 40.08),
    ("Ti", 47.867),
    ("Cr", 51.9961),
    ("Mn", 54.938),
    ("Fe", 55.845),
    ("Co", 58.933),
    ("Ni", 58.69),
    ("Cu", 63.546),
    ("Zn", 65.38),
    ("Br", 79.904),
    ("I", 126.904),
];

static ELEMENT_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([A-Z][a-z]?)([0-9]*)").expect("valid element regex"));

static FORMULA_SHAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9]*$").expect("valid formula regex"));

/// Number of atoms of `atom` in `formula`, matched case-insensitively.
///
/// The first occurrence of `<atom><digits>` or a bare `<atom>` decides: digits
/// give the count, a bare symbol counts as 1, no occurrence counts as 0.
/// The whole digit run is read; a count beyond `u32::MAX` saturates.
/// Only the c/h/o/n symbols used for response factors are reliable here: a
/// one-letter symbol also matches inside two-letter ones ("c" in "cl").
pub fn count_atom(formula: &str, atom: &str) -> u32 {
    let formula = formula.trim().to_lowercase();
    let atom = atom.trim().to_lowercase();
    if atom.is_empty() {
        return 0;
    }
    let pattern = format!("{}([0-9]+)?", regex::escape(&atom));
    let re = match Regex::new(&pattern) {
        Ok(re) => re,
        Err(_) => return 0,
    };
    match re.captures(&formula) {
        Some(caps) => caps
            .get(1)
            // only digits were captured, so parsing fails on overflow alone
            .map(|digits| digits.as_str().parse::<u32>().unwrap_or(u32::MAX))
            .unwrap_or(1),
        None => 0,
    }
}

/// Counts of the listed atoms, keyed by the lower-case symbol.
pub fn count_atoms(formula: &str, atoms: &[&str]) -> HashMap<String, u32> {
    atoms
        .iter()
        .map(|atom| (atom.to_lowercase(), count_atom(formula, atom)))
        .collect()
}

/// A formula is usable when it is a run of letters and digits starting with a letter.
pub fn is_parseable_formula(formula: &str) -> bool {
    FORMULA_SHAPE.is_match(formula.trim())
}

/// Element composition of a formula written with proper capitalisation (C6H5OH).
/// Repeated symbols add up. No bracket or group support.
pub fn parse_formula(formula: &str) -> HashMap<String, usize> {
    let mut counts = HashMap::new();
    for caps in ELEMENT_TOKEN.captures_iter(formula.trim()) {
        let symbol = caps[1].to_string();
        let count = match caps.get(2).map(|m| m.as_str()) {
            Some("") | None => 1,
            Some(digits) => digits.parse::<usize>().unwrap_or(1),
        };
        *counts.entry(symbol).or_insert(0) += count;
    }
    counts
}

pub fn atomic_mass(symbol: &str) -> Option<f64> {
    ELEMENTS
        .iter()
        .find(|(name, _)| *name == symbol)
        .map(|(_, mass)| *mass)
}

/// Molar mass in g/mol together with the composition.
/// `None` when the formula contains a symbol missing from the element table.
pub fn calculate_molar_mass(formula: &str) -> Option<(f64, HashMap<String, usize>)> {
    let counts = parse_formula(formula);
    if counts.is_empty() {
        return None;
    }
    let mut molar_mass = 0.0;
    for (element, count) in counts.iter() {
        molar_mass += atomic_mass(element)? * *count as f64;
    }
    Some((molar_mass, counts))
}
