use std::ops::{Add, AddAssign};

use crate::types::LineOutcome;

#[derive(Debug, Default, Clone, Copy, PartialEq)]
pub struct ProgressRecord {
    pub formulas: usize,
    pub failures: usize,
    pub skipped: usize,
    pub peaks: usize,
}

impl ProgressRecord {
    pub fn from_outcome(outcome: &LineOutcome) -> Self {
        let mut prog = Self::default();
        match outcome {
            LineOutcome::Report(report) => {
                prog.formulas = 1;
                prog.peaks = report.peaks.len();
            }
            LineOutcome::Failed { .. } => {
                prog.failures = 1;
            }
            LineOutcome::Skipped => {
                prog.skipped = 1;
            }
        }
        prog
    }

    pub fn sum(self, other: Self) -> Self {
        self + other
    }
}

impl Add for ProgressRecord {
    type Output = ProgressRecord;

    fn add(self, rhs: Self) -> Self::Output {
        let mut dup = self;
        dup += rhs;
        dup
    }
}

impl AddAssign for ProgressRecord {
    fn add_assign(&mut self, rhs: Self) {
        self.formulas += rhs.formulas;
        self.failures += rhs.failures;
        self.skipped += rhs.skipped;
        self.peaks += rhs.peaks;
    }
}
