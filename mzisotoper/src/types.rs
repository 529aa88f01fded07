use mzisotope::PatternReport;

pub const BUFFER_SIZE: usize = 1000;

/// What became of a single input line
#[derive(Debug, Clone, PartialEq)]
pub enum LineOutcome {
    Report(PatternReport),
    Failed { line_number: usize, message: String },
    /// Blank lines and `#` comments
    Skipped,
}
