use std::collections::HashMap;
use std::io;
use std::time::Instant;

use crossbeam_channel::{Receiver, Sender};
use itertools::Itertools;
use tracing::{debug, info, warn};

use crate::args::OutputFormat;
use crate::types::LineOutcome;

/// Buffers items that arrive out of order until the next key in sequence is available
#[derive(Debug)]
pub(crate) struct Collator<T> {
    pub waiting: HashMap<usize, T>,
    pub next_key: usize,
}

impl<T> Default for Collator<T> {
    fn default() -> Self {
        Self {
            waiting: HashMap::new(),
            next_key: 0,
        }
    }
}

impl<T> Collator<T> {
    pub fn receive(&mut self, key: usize, item: T) {
        self.waiting.insert(key, item);
    }

    pub fn try_next(&mut self) -> Option<(usize, T)> {
        let item = self.waiting.remove(&self.next_key)?;
        let key = self.next_key;
        self.next_key += 1;
        Some((key, item))
    }
}

/// Restore input order to results arriving from worker threads
pub(crate) fn collate_results<T: Send>(
    receiver: Receiver<(usize, T)>,
    sender: Sender<(usize, T)>,
) {
    let mut collator = Collator::default();
    let mut last_report = Instant::now();
    for (key, item) in receiver.iter() {
        collator.receive(key, item);
        while let Some((key, item)) = collator.try_next() {
            if let Err(e) = sender.send((key, item)) {
                warn!("Failed to send {key} for writing: {e}");
            }
        }
        let n = collator.waiting.len();
        if n > 0 && (Instant::now() - last_report).as_secs_f64() > 30.0 {
            let waiting_keys: Vec<_> = collator.waiting.keys().sorted().take(10).copied().collect();
            info!(
                "Collator holding {n} entries, next key {}, pending keys: {waiting_keys:?}",
                collator.next_key
            );
            last_report = Instant::now();
        }
    }
    if !collator.waiting.is_empty() {
        warn!(
            "{} entries were never released in order, flushing them",
            collator.waiting.len()
        );
        for key in collator.waiting.keys().sorted().copied().collect_vec() {
            if let Some(item) = collator.waiting.remove(&key) {
                if sender.send((key, item)).is_err() {
                    break;
                }
            }
        }
    }
    debug!("Collation finished");
}

/// Write each collated outcome to `writer`, reporting failures on STDERR. Returns the
/// number of reports written.
pub(crate) fn write_output<W: io::Write>(
    mut writer: W,
    receiver: Receiver<(usize, LineOutcome)>,
    format: OutputFormat,
    digits: usize,
) -> io::Result<usize> {
    let mut written = 0;
    for (_, outcome) in receiver.iter() {
        match outcome {
            LineOutcome::Report(report) => {
                match format {
                    OutputFormat::Text => report.write_text(&mut writer, digits)?,
                    OutputFormat::Json => {
                        serde_json::to_writer(&mut writer, &report)?;
                        writeln!(writer)?;
                    }
                }
                written += 1;
            }
            LineOutcome::Failed {
                line_number,
                message,
            } => {
                warn!("Failed to evaluate line {line_number}");
                eprintln!("{message}");
            }
            LineOutcome::Skipped => {}
        }
    }
    writer.flush()?;
    debug!("Wrote {written} patterns");
    Ok(written)
}
