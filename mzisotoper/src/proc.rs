use std::io::BufRead;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Instant;

use crossbeam_channel::Sender;
use rayon::prelude::*;
use tracing::{debug, info, instrument, trace, warn};

use mzisotope::{
    CachingIsotopeCalculator, EvaluationRequest, FormulaParser, IsotopeTable, PatternReport,
    ReportParams,
};

use crate::progress::ProgressRecord;
use crate::types::LineOutcome;

/// Turn one input line into a [`LineOutcome`]
#[instrument(level = "trace", skip(calculator, parser, params))]
pub(crate) fn evaluate_line(
    calculator: &mut CachingIsotopeCalculator<'_>,
    parser: &FormulaParser<'_, IsotopeTable>,
    params: &ReportParams,
    line_number: usize,
    line: &str,
) -> LineOutcome {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return LineOutcome::Skipped;
    }
    let request: EvaluationRequest = match line.parse() {
        Ok(request) => request,
        Err(e) => {
            return LineOutcome::Failed {
                line_number,
                message: e.to_string(),
            }
        }
    };
    match request.evaluate_with(parser, calculator) {
        Ok(pattern) => {
            trace!("{} produced {} peaks", request.formula, pattern.len());
            LineOutcome::Report(PatternReport::from_request(
                &request,
                calculator.abundance_floor(),
                &pattern,
                params,
            ))
        }
        Err(e) => LineOutcome::Failed {
            line_number,
            message: e.to_string(),
        },
    }
}

/// Evaluate every line of `reader` on the current thread pool, sending each outcome
/// tagged with its line index to `sender`
pub fn prepare_processing<R: BufRead + Send>(
    reader: R,
    table: &IsotopeTable,
    abundance_floor: f64,
    params: ReportParams,
    sender: Sender<(usize, LineOutcome)>,
) -> ProgressRecord {
    let init_counter = AtomicU32::new(0);
    let started = Instant::now();

    let prog = reader
        .lines()
        .map_while(|line| match line {
            Ok(line) => Some(line),
            Err(e) => {
                warn!("Stopped reading input: {e}");
                None
            }
        })
        .enumerate()
        .par_bridge()
        .map_init(
            || {
                init_counter.fetch_add(1, Ordering::AcqRel);
                (
                    CachingIsotopeCalculator::new(table, abundance_floor),
                    FormulaParser::new(table),
                )
            },
            |(calculator, parser), (line_index, line)| {
                let outcome = evaluate_line(calculator, parser, &params, line_index + 1, &line);
                (line_index, outcome)
            },
        )
        .map(|(line_index, outcome)| {
            let prog = ProgressRecord::from_outcome(&outcome);
            if let Err(e) = sender.send((line_index, outcome)) {
                warn!("Failed to send line {line_index}: {e}");
            }
            prog
        })
        .fold(ProgressRecord::default, ProgressRecord::sum)
        .reduce(ProgressRecord::default, ProgressRecord::sum);

    let elapsed = Instant::now() - started;
    debug!(
        "{} threads run for evaluation",
        init_counter.load(Ordering::SeqCst)
    );
    info!("Elapsed Time: {:0.3?}", elapsed);
    prog
}
