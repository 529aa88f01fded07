/*! Combine per-element isotope distributions into the isotopic pattern of a whole formula.

Each element's distribution is raised to the power of its count by binary exponentiation.
The distribution of 2<sup>j</sup> atoms, a "superatom", is derived by convolving the
distribution of 2<sup>j-1</sup> atoms with itself, so an element occurring `n` times needs
only about `log2(n)` convolutions. Every intermediate result is pruned of negligible peaks at
either end to keep the pattern from growing without bound.
*/
use std::collections::HashMap;

use thiserror::Error;
use tracing::trace;

use crate::formula::{ElementCount, ElementIndex, Formula};
use crate::pattern::Pattern;
use crate::table::IsotopeTable;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvaluationError {
    #[error("Element {element} has a negative count {count}, the formula is not physically realizable")]
    InvalidFormula {
        element: ElementIndex,
        count: ElementCount,
    },
    #[error("Element index {0} is not present in the isotope table")]
    UnknownElementIndex(ElementIndex),
    #[error("The abundance floor must be finite and non-negative, received {0}")]
    InvalidAbundanceFloor(f64),
}

/// The distributions of 2<sup>j</sup> atoms of a single element, extended on demand
#[derive(Debug, Clone, PartialEq)]
pub struct SuperAtomList {
    levels: Vec<Pattern>,
}

impl SuperAtomList {
    /// Start a list from the single atom distribution
    pub fn new(base: Pattern) -> Self {
        Self { levels: vec![base] }
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    /// Get the distribution of 2<sup>`bit`</sup> atoms, deriving any missing levels
    /// and pruning each with `abundance_floor`
    pub fn level(&mut self, bit: usize, abundance_floor: f64) -> &Pattern {
        while self.levels.len() <= bit {
            let last = &self.levels[self.levels.len() - 1];
            let next = last.convolve(last).pruned(abundance_floor);
            trace!(
                "Derived superatom level {} with {} peaks",
                self.levels.len(),
                next.len()
            );
            self.levels.push(next);
        }
        &self.levels[bit]
    }
}

fn check_inputs(
    formula: &Formula,
    table: &IsotopeTable,
    abundance_floor: f64,
) -> Result<(), EvaluationError> {
    if !abundance_floor.is_finite() || abundance_floor < 0.0 {
        return Err(EvaluationError::InvalidAbundanceFloor(abundance_floor));
    }
    if let Some((element, count)) = formula.first_negative() {
        return Err(EvaluationError::InvalidFormula { element, count });
    }
    if let Some((element, _)) = formula
        .iter()
        .find(|(element, _)| table.base_pattern(**element).is_none())
    {
        return Err(EvaluationError::UnknownElementIndex(*element));
    }
    Ok(())
}

fn evaluate_with(
    formula: &Formula,
    table: &IsotopeTable,
    abundance_floor: f64,
    charge: i32,
    superatoms: &mut HashMap<ElementIndex, SuperAtomList>,
) -> Result<Pattern, EvaluationError> {
    check_inputs(formula, table, abundance_floor)?;

    let mut result = Pattern::unit();
    for (element, count) in formula.iter() {
        let Some(base) = table.base_pattern(*element) else {
            return Err(EvaluationError::UnknownElementIndex(*element));
        };
        let levels = superatoms
            .entry(*element)
            .or_insert_with(|| SuperAtomList::new(base.clone()));

        trace!("Combining {count} atoms of element {element}");
        let mut remaining = *count as u64;
        let mut bit = 0;
        while remaining > 0 {
            let level = levels.level(bit, abundance_floor);
            if remaining & 1 == 1 {
                result = result.convolve(level).pruned(abundance_floor);
            }
            remaining >>= 1;
            bit += 1;
        }
    }
    result.apply_charge(charge);
    Ok(result)
}

/// Compute the isotopic pattern of `formula` at `charge`.
///
/// Elements are combined in ascending index order and every intermediate pattern is
/// pruned with `abundance_floor`. An empty formula produces [`Pattern::unit`]. No state
/// is kept between calls.
pub fn evaluate(
    formula: &Formula,
    table: &IsotopeTable,
    abundance_floor: f64,
    charge: i32,
) -> Result<Pattern, EvaluationError> {
    let mut superatoms = HashMap::new();
    evaluate_with(formula, table, abundance_floor, charge, &mut superatoms)
}

/// A source of isotopic patterns for formulas
pub trait IsotopicPatternGenerator {
    fn isotopic_pattern(
        &mut self,
        formula: &Formula,
        charge: i32,
    ) -> Result<Pattern, EvaluationError>;
}

/// Evaluates each formula from scratch with [`evaluate`]
#[derive(Debug, Clone, Copy)]
pub struct IsotopeCalculator<'a> {
    pub table: &'a IsotopeTable,
    pub abundance_floor: f64,
}

impl<'a> IsotopeCalculator<'a> {
    pub fn new(table: &'a IsotopeTable, abundance_floor: f64) -> Self {
        Self {
            table,
            abundance_floor,
        }
    }
}

impl IsotopicPatternGenerator for IsotopeCalculator<'_> {
    fn isotopic_pattern(
        &mut self,
        formula: &Formula,
        charge: i32,
    ) -> Result<Pattern, EvaluationError> {
        evaluate(formula, self.table, self.abundance_floor, charge)
    }
}

/// Keeps the superatom lists of every element it has seen between calls.
///
/// The cache is only valid for one abundance floor, which is fixed at construction, so
/// results are identical to [`evaluate`] with the same floor no matter what order formulas
/// are evaluated in. The cache is not shared, give each thread its own clone.
#[derive(Debug, Clone)]
pub struct CachingIsotopeCalculator<'a> {
    table: &'a IsotopeTable,
    abundance_floor: f64,
    superatoms: HashMap<ElementIndex, SuperAtomList>,
}

impl<'a> CachingIsotopeCalculator<'a> {
    pub fn new(table: &'a IsotopeTable, abundance_floor: f64) -> Self {
        Self {
            table,
            abundance_floor,
            superatoms: HashMap::new(),
        }
    }

    pub fn abundance_floor(&self) -> f64 {
        self.abundance_floor
    }

    pub fn table(&self) -> &'a IsotopeTable {
        self.table
    }

    /// The number of superatom levels cached for `element`
    pub fn cached_levels(&self, element: ElementIndex) -> usize {
        self.superatoms.get(&element).map(|s| s.len()).unwrap_or_default()
    }

    pub fn clear(&mut self) {
        self.superatoms.clear();
    }
}

impl IsotopicPatternGenerator for CachingIsotopeCalculator<'_> {
    fn isotopic_pattern(
        &mut self,
        formula: &Formula,
        charge: i32,
    ) -> Result<Pattern, EvaluationError> {
        evaluate_with(
            formula,
            self.table,
            self.abundance_floor,
            charge,
            &mut self.superatoms,
        )
    }
}

impl<'a> From<IsotopeCalculator<'a>> for CachingIsotopeCalculator<'a> {
    fn from(value: IsotopeCalculator<'a>) -> Self {
        Self::new(value.table, value.abundance_floor)
    }
}
