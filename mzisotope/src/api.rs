//! High level APIs for computing and presenting isotopic patterns from formula text
use std::io;
use std::num::ParseIntError;
use std::str::FromStr;

use thiserror::Error;

use crate::engine::{evaluate, EvaluationError, IsotopicPatternGenerator};
use crate::parser::{FormulaParser, FormulaSyntaxError};
use crate::pattern::Pattern;
use crate::table::{ElementLookup, IsotopeTable, IsotopeTableError};

/// The default number of decimal places used when presenting a pattern
pub const DEFAULT_DIGITS: usize = 6;

/// The default abundance floor used when pruning intermediate patterns
pub const DEFAULT_ABUNDANCE_FLOOR: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RequestParseError {
    #[error("Failed to parse charge {0:?}: {1}")]
    MalformedCharge(String, #[source] ParseIntError),
}

#[derive(Debug, Error)]
pub enum IsotopicPatternError {
    #[error(transparent)]
    SyntaxError(#[from] FormulaSyntaxError),
    #[error(transparent)]
    EvaluationError(#[from] EvaluationError),
    #[error(transparent)]
    IsotopeTableError(#[from] IsotopeTableError),
    #[error(transparent)]
    RequestParseError(#[from] RequestParseError),
}

/// Parse `formula` and compute its isotopic pattern at `charge` in a single step.
///
/// # Arguments
/// - `formula`: The formula text, e.g. `C6H12O6` or `(H2O)3`
/// - `table`: The isotope table to resolve element symbols and distributions from
/// - `abundance_floor`: Peaks at or below this abundance are pruned from the ends of
///   every intermediate pattern. Zero disables pruning.
/// - `charge`: The charge state, zero for neutral masses
pub fn isotopic_pattern(
    formula: &str,
    table: &IsotopeTable,
    abundance_floor: f64,
    charge: i32,
) -> Result<Pattern, IsotopicPatternError> {
    let formula = FormulaParser::new(table).parse(formula)?;
    Ok(evaluate(&formula, table, abundance_floor, charge)?)
}

/// Write `value` in scientific notation with a signed exponent of at least two digits,
/// like C's `%e`
fn format_scientific(value: f64, precision: usize) -> String {
    let text = format!("{value:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

/// A formula and charge pair, read from text of the form `formula[,charge]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationRequest {
    pub formula: String,
    pub charge: i32,
}

impl EvaluationRequest {
    pub fn new(formula: String, charge: i32) -> Self {
        Self { formula, charge }
    }

    /// Parse and evaluate this request with `generator`, reusing whatever state it keeps
    pub fn evaluate_with<L: ElementLookup + ?Sized, G: IsotopicPatternGenerator>(
        &self,
        parser: &FormulaParser<'_, L>,
        generator: &mut G,
    ) -> Result<Pattern, IsotopicPatternError> {
        let formula = parser.parse(&self.formula)?;
        Ok(generator.isotopic_pattern(&formula, self.charge)?)
    }

    pub fn evaluate(
        &self,
        table: &IsotopeTable,
        abundance_floor: f64,
    ) -> Result<Pattern, IsotopicPatternError> {
        isotopic_pattern(&self.formula, table, abundance_floor, self.charge)
    }
}

impl FromStr for EvaluationRequest {
    type Err = RequestParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(',') {
            Some((formula, charge)) => {
                let charge = charge.trim();
                let charge = if charge.is_empty() {
                    0
                } else {
                    charge
                        .parse()
                        .map_err(|e| RequestParseError::MalformedCharge(charge.to_string(), e))?
                };
                Ok(Self::new(formula.trim().to_string(), charge))
            }
            None => Ok(Self::new(s.trim().to_string(), 0)),
        }
    }
}

/// Controls which peaks of a [`Pattern`] are presented
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReportParams {
    /// Decimal places to present, clamped to `1..=30`
    pub digits: usize,
    /// Peaks below this percent of the most abundant peak are omitted
    pub min_relative_intensity: f64,
}

impl Default for ReportParams {
    fn default() -> Self {
        Self::new(DEFAULT_DIGITS, 0.0)
    }
}

impl ReportParams {
    pub fn new(digits: usize, min_relative_intensity: f64) -> Self {
        Self {
            digits: digits.clamp(1, 30),
            min_relative_intensity,
        }
    }

    /// The smallest percent that is still distinguishable from zero at `digits` decimal places
    pub fn display_threshold(&self) -> f64 {
        10f64.powi(-(self.digits as i32)) / 2.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ReportPeak {
    pub mass: f64,
    /// Percent of the most abundant peak
    pub relative_intensity: f64,
}

/// The presentable form of an isotopic pattern, relative intensities scaled so the
/// most abundant peak is 100
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PatternReport {
    pub formula: String,
    pub charge: i32,
    pub abundance_floor: f64,
    pub peaks: Vec<ReportPeak>,
}

impl PatternReport {
    pub fn new(
        formula: String,
        charge: i32,
        abundance_floor: f64,
        pattern: &Pattern,
        params: &ReportParams,
    ) -> Self {
        let max_area = pattern.max_area();
        let threshold = params.display_threshold();
        let peaks = if max_area > 0.0 {
            pattern
                .iter()
                .filter(|p| !p.is_gap())
                .map(|p| ReportPeak {
                    mass: p.mass,
                    relative_intensity: p.relative_area / max_area * 100.0,
                })
                .filter(|p| {
                    p.relative_intensity >= threshold
                        && p.relative_intensity >= params.min_relative_intensity
                })
                .collect()
        } else {
            Vec::new()
        };
        Self {
            formula,
            charge,
            abundance_floor,
            peaks,
        }
    }

    pub fn from_request(
        request: &EvaluationRequest,
        abundance_floor: f64,
        pattern: &Pattern,
        params: &ReportParams,
    ) -> Self {
        Self::new(
            request.formula.clone(),
            request.charge,
            abundance_floor,
            pattern,
            params,
        )
    }

    pub fn header(&self) -> String {
        format!(
            "formula: {} charge : {} limit: {}",
            self.formula,
            self.charge,
            format_scientific(self.abundance_floor, 6)
        )
    }

    /// Write the header line followed by one `mass percent` line per peak
    pub fn write_text<W: io::Write>(&self, writer: &mut W, digits: usize) -> io::Result<()> {
        writeln!(writer, "{}", self.header())?;
        for peak in self.peaks.iter() {
            writeln!(
                writer,
                "{:.digits$} {:.digits$}",
                peak.mass, peak.relative_intensity
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::engine::CachingIsotopeCalculator;
    use crate::pattern::Peak;

    #[test]
    fn test_requests() {
        let req: EvaluationRequest = "H2O".parse().unwrap();
        assert_eq!(req, EvaluationRequest::new("H2O".into(), 0));

        let req: EvaluationRequest = "C6H12O6, -2".parse().unwrap();
        assert_eq!(req, EvaluationRequest::new("C6H12O6".into(), -2));

        let req: EvaluationRequest = "C6H12O6,+1".parse().unwrap();
        assert_eq!(req.charge, 1);

        let req: EvaluationRequest = "H2O,".parse().unwrap();
        assert_eq!(req.charge, 0);

        let err = "H2O,two".parse::<EvaluationRequest>().unwrap_err();
        assert!(matches!(err, RequestParseError::MalformedCharge(s, _) if s == "two"));
    }

    #[test]
    fn test_isotopic_pattern() -> Result<(), IsotopicPatternError> {
        let table = IsotopeTable::bundled();
        let water = isotopic_pattern("H2O", table, DEFAULT_ABUNDANCE_FLOOR, 0)?;
        assert!((water[0].mass - 18.0105646837).abs() < 1e-6);

        let repeated = isotopic_pattern("(H2O)3", table, DEFAULT_ABUNDANCE_FLOOR, 0)?;
        let flat = isotopic_pattern("H6O3", table, DEFAULT_ABUNDANCE_FLOOR, 0)?;
        assert_eq!(repeated, flat);

        let empty = isotopic_pattern("", table, DEFAULT_ABUNDANCE_FLOOR, 1)?;
        assert_eq!(empty.len(), 1);

        assert!(matches!(
            isotopic_pattern("Xx2", table, DEFAULT_ABUNDANCE_FLOOR, 0),
            Err(IsotopicPatternError::SyntaxError(_))
        ));
        assert!(matches!(
            isotopic_pattern("(H2O", table, DEFAULT_ABUNDANCE_FLOOR, 0),
            Err(IsotopicPatternError::SyntaxError(_))
        ));
        assert!(matches!(
            isotopic_pattern("H-2", table, DEFAULT_ABUNDANCE_FLOOR, 0),
            Err(IsotopicPatternError::EvaluationError(
                EvaluationError::InvalidFormula { count: -2, .. }
            ))
        ));
        Ok(())
    }

    #[test]
    fn test_evaluate_with_generator() -> Result<(), IsotopicPatternError> {
        let table = IsotopeTable::bundled();
        let parser = FormulaParser::new(table);
        let mut calculator = CachingIsotopeCalculator::new(table, DEFAULT_ABUNDANCE_FLOOR);
        let req: EvaluationRequest = "C254H377N65O75S6,3".parse()?;
        let cached = req.evaluate_with(&parser, &mut calculator)?;
        let direct = req.evaluate(table, DEFAULT_ABUNDANCE_FLOOR)?;
        assert_eq!(cached, direct);
        Ok(())
    }

    #[test]
    fn test_report() {
        let mut pattern: Pattern = vec![(100.0, 0.5), (101.0, 0.25)].into();
        pattern.push(Peak::gap());
        pattern.push(Peak::new(103.0, 0.5e-9));
        pattern.push(Peak::new(104.0, 0.1));

        let params = ReportParams::new(6, 0.0);
        let report = PatternReport::new("X".into(), 0, 1e-10, &pattern, &params);
        let masses: Vec<f64> = report.peaks.iter().map(|p| p.mass).collect();
        assert_eq!(masses, vec![100.0, 101.0, 104.0]);
        assert_eq!(report.peaks[0].relative_intensity, 100.0);
        assert_eq!(report.peaks[1].relative_intensity, 50.0);

        let params = ReportParams::new(12, 30.0);
        let report = PatternReport::new("X".into(), 0, 1e-10, &pattern, &params);
        assert_eq!(report.peaks.len(), 2);

        let report = PatternReport::new("X".into(), 0, 1e-10, &Pattern::default(), &params);
        assert!(report.peaks.is_empty());
    }

    #[test]
    fn test_digits_clamped() {
        assert_eq!(ReportParams::new(0, 0.0).digits, 1);
        assert_eq!(ReportParams::new(50, 0.0).digits, 30);
        assert!((ReportParams::new(3, 0.0).display_threshold() - 0.0005).abs() < 1e-15);
    }

    #[test]
    fn test_header_exponent() {
        let pattern = Pattern::unit();
        let params = ReportParams::default();
        let header = |floor: f64| PatternReport::new("H2O".into(), -1, floor, &pattern, &params).header();
        assert_eq!(header(0.0), "formula: H2O charge : -1 limit: 0.000000e+00");
        assert_eq!(header(1e-5), "formula: H2O charge : -1 limit: 1.000000e-05");
        assert_eq!(header(2.5e-10), "formula: H2O charge : -1 limit: 2.500000e-10");
        assert_eq!(header(1e100), "formula: H2O charge : -1 limit: 1.000000e+100");
        assert_eq!(format_scientific(12.5, 2), "1.25e+01");
    }

    #[test]
    fn test_text_output() -> io::Result<()> {
        let pattern: Pattern = vec![(100.0, 0.5), (101.0, 0.25)].into();
        let report = PatternReport::new("X".into(), 1, 1e-10, &pattern, &ReportParams::default());
        let mut buf = Vec::new();
        report.write_text(&mut buf, 3)?;
        let text = String::from_utf8(buf).unwrap();
        assert_eq!(
            text,
            "formula: X charge : 1 limit: 1.000000e-10\n100.000 100.000\n101.000 50.000\n"
        );
        Ok(())
    }
}
