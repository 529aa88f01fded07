/*! The per-element isotope reference table.

An [`IsotopeTable`] maps element symbols to dense [`ElementIndex`] values and holds the
isotopic distribution of a single atom of each element as a [`Pattern`] with gaps filled in,
ready to be convolved.

Tables are read from a flat text format where a line holding an element name opens a block,
each following `mass abundance` line adds an isotope and a blank line closes the block. Lines
starting with `#` are ignored.

```text
C
12.0 0.9893
13.0033548378 0.0107

Cl
34.96885268 0.7576
36.96590259 0.2424
```
*/
use std::collections::HashMap;
use std::fs;
use std::io::{self, prelude::*};
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;

use flate2::bufread::MultiGzDecoder;
use itertools::Itertools;
use thiserror::Error;
use tracing::{debug, trace};

use crate::formula::{ElementIndex, Formula};
use crate::pattern::{Pattern, Peak};

/// The widest mass difference between successive isotopes, in nominal mass units
pub const MAX_ISOTOPE_GAP: f64 = 16.0;

const BUNDLED_ISOTOPES: &str = include_str!("../data/ISOTOPE.DAT");

static BUNDLED_TABLE: OnceLock<IsotopeTable> = OnceLock::new();

/// Map element symbols to element indices and back
pub trait ElementLookup {
    fn element_index(&self, symbol: &str) -> Option<ElementIndex>;

    fn element_symbol(&self, index: ElementIndex) -> Option<&str>;

    fn contains_symbol(&self, symbol: &str) -> bool {
        self.element_index(symbol).is_some()
    }
}

impl ElementLookup for HashMap<String, ElementIndex> {
    fn element_index(&self, symbol: &str) -> Option<ElementIndex> {
        self.get(symbol).copied()
    }

    fn element_symbol(&self, index: ElementIndex) -> Option<&str> {
        self.iter()
            .find(|(_, i)| **i == index)
            .map(|(symbol, _)| symbol.as_str())
    }
}

#[derive(Debug, Error)]
pub enum IsotopeTableError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Malformed isotope entry on line {line_number}: {line:?}")]
    MalformedIsotope { line_number: usize, line: String },
    #[error("The isotopes of {element} are not in ascending mass order, {previous} is followed by {next}")]
    UnorderedIsotopes {
        element: String,
        previous: f64,
        next: f64,
    },
    #[error("The element {0} is defined more than once")]
    DuplicateElement(String),
    #[error("The element {0} has no isotopes")]
    NoIsotopes(String),
    #[error("The isotope of {element} at {mass} has an invalid abundance {abundance}")]
    InvalidAbundance {
        element: String,
        mass: f64,
        abundance: f64,
    },
    #[error("The isotope of {element} has an invalid mass {mass}")]
    InvalidMass { element: String, mass: f64 },
    #[error(
        "The isotopes of {element} at {previous} and {next} are more than {max_gap} mass units apart",
        max_gap = MAX_ISOTOPE_GAP
    )]
    IsotopeGapTooWide {
        element: String,
        previous: f64,
        next: f64,
    },
    #[error("The isotope table does not define any elements")]
    EmptyTable,
}

/// A single element's entry in an [`IsotopeTable`]
#[derive(Debug, Clone, PartialEq)]
pub struct ElementEntry {
    pub symbol: String,
    pub isotopes: Pattern,
}

impl ElementEntry {
    /// The mass of the lightest isotope
    pub fn lightest_mass(&self) -> Option<f64> {
        self.isotopes.iter().find(|p| !p.is_gap()).map(|p| p.mass)
    }

    pub fn most_abundant_mass(&self) -> Option<f64> {
        self.isotopes.most_abundant().map(|p| p.mass)
    }

    /// Whether the symbol can be written without brackets in a formula
    fn is_plain_symbol(&self) -> bool {
        let mut chars = self.symbol.chars();
        matches!(chars.next(), Some(c) if c.is_uppercase()) && chars.all(|c| c.is_lowercase())
    }
}

/// The isotopic distributions of every known element, immutable once loaded
#[derive(Debug, Clone, Default)]
pub struct IsotopeTable {
    symbols: HashMap<String, ElementIndex>,
    elements: Vec<ElementEntry>,
}

impl IsotopeTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// The table built from the isotope data shipped with this library
    pub fn bundled() -> &'static IsotopeTable {
        BUNDLED_TABLE.get_or_init(|| {
            Self::from_str(BUNDLED_ISOTOPES).expect("The bundled isotope table is well formed")
        })
    }

    /// Add an element whose isotopes are given as `(mass, abundance)` pairs in
    /// ascending mass order. Zero abundance gap peaks are inserted between isotopes
    /// more than one nominal mass unit apart.
    pub fn add_element(
        &mut self,
        symbol: &str,
        isotopes: &[(f64, f64)],
    ) -> Result<ElementIndex, IsotopeTableError> {
        if self.symbols.contains_key(symbol) {
            return Err(IsotopeTableError::DuplicateElement(symbol.to_string()));
        }
        if isotopes.is_empty() {
            return Err(IsotopeTableError::NoIsotopes(symbol.to_string()));
        }

        let mut pattern = Pattern::with_capacity(isotopes.len());
        for &(mass, abundance) in isotopes.iter() {
            if !mass.is_finite() || mass < 0.0 {
                return Err(IsotopeTableError::InvalidMass {
                    element: symbol.to_string(),
                    mass,
                });
            }
            if !abundance.is_finite() || abundance < 0.0 {
                return Err(IsotopeTableError::InvalidAbundance {
                    element: symbol.to_string(),
                    mass,
                    abundance,
                });
            }
            if let Some(previous) = pattern.peaks.last().map(|p| p.mass) {
                if !(mass > previous) {
                    return Err(IsotopeTableError::UnorderedIsotopes {
                        element: symbol.to_string(),
                        previous,
                        next: mass,
                    });
                }
                if mass - previous > MAX_ISOTOPE_GAP {
                    return Err(IsotopeTableError::IsotopeGapTooWide {
                        element: symbol.to_string(),
                        previous,
                        next: mass,
                    });
                }
                let fillers = (mass - previous - 0.5) as usize;
                pattern
                    .peaks
                    .extend(std::iter::repeat(Peak::gap()).take(fillers));
            }
            pattern.push(Peak::new(mass, abundance));
        }

        let index = self.elements.len();
        trace!(
            "Registered {symbol} as element {index} with {} isotope positions",
            pattern.len()
        );
        self.symbols.insert(symbol.to_string(), index);
        self.elements.push(ElementEntry {
            symbol: symbol.to_string(),
            isotopes: pattern,
        });
        Ok(index)
    }

    /// Read a table from the flat text format
    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self, IsotopeTableError> {
        let mut table = Self::new();
        let mut block: Option<(String, Vec<(f64, f64)>)> = None;

        for (i, line) in reader.lines().enumerate() {
            let line = line?;
            let trimmed = line.trim();
            if trimmed.starts_with('#') {
                continue;
            }
            let mut tokens = trimmed.split_whitespace();
            let Some(first) = tokens.next() else {
                if let Some((symbol, isotopes)) = block.take() {
                    table.add_element(&symbol, &isotopes)?;
                }
                continue;
            };

            match first.parse::<f64>() {
                Ok(mass) => {
                    let malformed = || IsotopeTableError::MalformedIsotope {
                        line_number: i + 1,
                        line: line.clone(),
                    };
                    let Some((_, isotopes)) = block.as_mut() else {
                        return Err(malformed());
                    };
                    let abundance = tokens
                        .next()
                        .and_then(|tok| tok.parse::<f64>().ok())
                        .ok_or_else(malformed)?;
                    isotopes.push((mass, abundance));
                }
                Err(_) => {
                    if let Some((symbol, isotopes)) = block.take() {
                        table.add_element(&symbol, &isotopes)?;
                    }
                    block = Some((first.to_string(), Vec::new()));
                }
            }
        }
        if let Some((symbol, isotopes)) = block.take() {
            table.add_element(&symbol, &isotopes)?;
        }

        if table.is_empty() {
            return Err(IsotopeTableError::EmptyTable);
        }
        debug!("Loaded {} elements", table.len());
        Ok(table)
    }

    /// Read a table from a file, decompressing it if the path ends in `.gz`
    pub fn open_path<P: AsRef<Path>>(path: P) -> Result<Self, IsotopeTableError> {
        let path = path.as_ref();
        debug!("Reading isotope table from {}", path.display());
        let handle = io::BufReader::new(fs::File::open(path)?);
        if path.extension().is_some_and(|ext| ext == "gz") {
            Self::from_reader(io::BufReader::new(MultiGzDecoder::new(handle)))
        } else {
            Self::from_reader(handle)
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ElementEntry> {
        self.elements.iter()
    }

    pub fn get(&self, index: ElementIndex) -> Option<&ElementEntry> {
        self.elements.get(index)
    }

    /// The single atom isotopic distribution of `index`
    pub fn base_pattern(&self, index: ElementIndex) -> Option<&Pattern> {
        self.elements.get(index).map(|e| &e.isotopes)
    }

    pub fn symbols(&self) -> &HashMap<String, ElementIndex> {
        &self.symbols
    }

    fn sum_masses(
        &self,
        formula: &Formula,
        mass_of: impl Fn(&ElementEntry) -> Option<f64>,
    ) -> Option<f64> {
        formula.iter().try_fold(0.0, |acc, (element, count)| {
            let mass = self.get(*element).and_then(&mass_of)?;
            Some(acc + mass * (*count as f64))
        })
    }

    /// The sum of the lightest isotope masses of every atom in `formula`, or `None`
    /// if an element is missing from the table
    pub fn monoisotopic_mass(&self, formula: &Formula) -> Option<f64> {
        self.sum_masses(formula, ElementEntry::lightest_mass)
    }

    /// The sum of the most abundant isotope masses of every atom in `formula`
    pub fn most_abundant_mass(&self, formula: &Formula) -> Option<f64> {
        self.sum_masses(formula, ElementEntry::most_abundant_mass)
    }

    /// Write `formula` in Hill order, carbon then hydrogen then the rest alphabetically,
    /// or purely alphabetically when there is no carbon. Symbols that are not a capital
    /// letter followed by lower case letters are written in brackets.
    pub fn format_formula(&self, formula: &Formula) -> String {
        let mut entries: Vec<(&ElementEntry, i64)> = formula
            .iter()
            .filter_map(|(element, count)| self.get(*element).map(|e| (e, *count)))
            .collect();
        let has_carbon = entries.iter().any(|(e, _)| e.symbol == "C");
        let rank = |symbol: &str| -> u8 {
            match symbol {
                "C" if has_carbon => 0,
                "H" if has_carbon => 1,
                _ => 2,
            }
        };
        entries.sort_by(|(a, _), (b, _)| {
            rank(&a.symbol)
                .cmp(&rank(&b.symbol))
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        entries
            .into_iter()
            .map(|(entry, count)| {
                let symbol = if entry.is_plain_symbol() {
                    entry.symbol.clone()
                } else {
                    format!("[{}]", entry.symbol)
                };
                if count == 1 {
                    symbol
                } else {
                    format!("{symbol}{count}")
                }
            })
            .join("")
    }
}

impl ElementLookup for IsotopeTable {
    fn element_index(&self, symbol: &str) -> Option<ElementIndex> {
        self.symbols.get(symbol).copied()
    }

    fn element_symbol(&self, index: ElementIndex) -> Option<&str> {
        self.elements.get(index).map(|e| e.symbol.as_str())
    }
}

impl FromStr for IsotopeTable {
    type Err = IsotopeTableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_reader(io::Cursor::new(s))
    }
}
