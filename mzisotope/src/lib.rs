//! Calculate the isotopic patterns of molecules from their elemental formulas.
//!
//! A formula such as `C6H12O6` is parsed into element counts, and the isotope
//! distribution of each element is raised to the power of its count by repeated
//! self-convolution before all elements are combined into one [`Pattern`].
//!
//! ```
//! use mzisotope::{isotopic_pattern, IsotopeTable};
//!
//! let pattern = isotopic_pattern("C6H12O6", IsotopeTable::bundled(), 1e-10, 1).unwrap();
//! assert!((pattern[0].mass - 180.06284).abs() < 1e-4);
//! ```
pub mod formula;
pub mod parser;
pub mod pattern;
pub mod table;
pub mod engine;
pub mod api;

pub use crate::api::{
    isotopic_pattern, EvaluationRequest, IsotopicPatternError, PatternReport, ReportParams,
    ReportPeak,
};
pub use crate::engine::{
    evaluate, CachingIsotopeCalculator, EvaluationError, IsotopeCalculator,
    IsotopicPatternGenerator,
};
pub use crate::formula::{ElementCount, ElementIndex, Formula};
pub use crate::parser::{FormulaParser, FormulaSyntaxError};
pub use crate::pattern::{Pattern, Peak, ELECTRON_MASS};
pub use crate::table::{ElementLookup, IsotopeTable, IsotopeTableError};
