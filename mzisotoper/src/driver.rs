use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Instant;

use clap::{parser::ValueSource, ArgMatches, CommandFactory, FromArgMatches, Parser};
use serde::{Deserialize, Serialize};

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use flate2::{bufread::MultiGzDecoder, write::GzEncoder, Compression};

use thiserror::Error;
use tracing::{debug, info, warn};

use mzisotope::api::DEFAULT_ABUNDANCE_FLOOR;
use mzisotope::{IsotopeTable, IsotopeTableError, ReportParams};

use crate::args::{non_negative_float, OutputFormat};
use crate::proc::prepare_processing;
use crate::types::BUFFER_SIZE;
use crate::write::{collate_results, write_output};

#[derive(Debug, Error)]
pub enum MZIsotoperError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to load the isotope table: {0}")]
    IsotopeTableError(
        #[source]
        #[from]
        IsotopeTableError,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to build the thread pool: {0}")]
    ThreadPoolError(
        #[source]
        #[from]
        rayon::ThreadPoolBuildError,
    ),
}

fn is_gzip_path<P: AsRef<Path>>(path: P) -> bool {
    path.as_ref().extension().is_some_and(|ext| ext == "gz")
}

/// Calculate the isotopic patterns of molecular formulas.
///
/// Read `formula[,charge]` lines from a file or stream and write the isotopic
/// pattern of each formula.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
#[serde(default)]
pub struct MZIsotoper {
    /// The path to read `formula[,charge]` lines from, or if '-' is passed, read from STDIN
    #[arg(default_value = "-")]
    pub input_file: String,

    /// The path to write the output file to, or if '-' is passed, write to STDOUT.
    ///
    /// Paths ending in `.gz` are gzip compressed.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The isotope table to read element isotopes from instead of the bundled table
    #[arg(short = 'i', long = "isotope-file")]
    pub isotope_file: Option<PathBuf>,

    /// Peaks at or below this abundance are pruned from the ends of every intermediate pattern
    #[arg(
        short = 'l',
        long = "limit",
        default_value_t = DEFAULT_ABUNDANCE_FLOOR,
        value_parser = non_negative_float
    )]
    pub limit: f64,

    /// The number of decimal places to write, between 1 and 30
    #[arg(short = 'd', long = "digits", default_value_t = 6)]
    pub digits: usize,

    /// Omit peaks below this percent of the most abundant peak
    #[arg(
        short = 'm',
        long = "min-relative-intensity",
        default_value_t = 0.0,
        value_parser = non_negative_float
    )]
    pub min_relative_intensity: f64,

    /// The format to write patterns in
    #[arg(short = 'f', long = "format", value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// The path to write a log file to, in addition to STDERR
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mzisotoper.toml` in the working directory.
    /// Environment variables prefixed with `MZISOTOPER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The size of the buffer for queueing writing of results to the output stream.
    #[arg(short = 'w', long = "write-buffer-size", default_value_t = BUFFER_SIZE)]
    pub write_buffer_size: usize,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,
}

impl Default for MZIsotoper {
    fn default() -> Self {
        Self {
            input_file: "-".to_string(),
            output_file: PathBuf::from("-"),
            isotope_file: None,
            limit: DEFAULT_ABUNDANCE_FLOOR,
            digits: 6,
            min_relative_intensity: 0.0,
            format: OutputFormat::Text,
            log_file: None,
            config_file: None,
            write_buffer_size: BUFFER_SIZE,
            threads: -1,
        }
    }
}

impl MZIsotoper {
    /// Parse the command line and layer the configuration sources over it, letting
    /// explicitly passed flags take precedence
    pub fn from_command_line() -> Result<Self, MZIsotoperError> {
        let matches = Self::command().get_matches();
        let this = Self::from_arg_matches(&matches).unwrap_or_else(|e| e.exit());
        this.configured_with(&matches)
    }

    /// Layer `mzisotoper.toml`, the `--config-file` and `MZISOTOPER_` environment
    /// variables over these arguments
    pub fn configured(self) -> Result<Self, MZIsotoperError> {
        self.layered(&[])
    }

    /// As [`MZIsotoper::configured`], but values given on the command line in `matches`
    /// override every configuration source
    pub fn configured_with(self, matches: &ArgMatches) -> Result<Self, MZIsotoperError> {
        let explicit: Vec<&str> = matches
            .ids()
            .map(|id| id.as_str())
            .filter(|id| matches.value_source(id) == Some(ValueSource::CommandLine))
            .collect();
        self.layered(&explicit)
    }

    fn layered(self, explicit: &[&str]) -> Result<Self, MZIsotoperError> {
        let mut config = Figment::from(Serialized::defaults(&self))
            .merge(Toml::file("mzisotoper.toml"));
        if let Some(path) = self.config_file.as_ref() {
            config = config.merge(Toml::file_exact(path));
        }
        config = config.merge(Env::prefixed("MZISOTOPER_"));

        if !explicit.is_empty() {
            let mut overrides = match serde_json::to_value(&self) {
                Ok(serde_json::Value::Object(fields)) => fields,
                Ok(_) => serde_json::Map::new(),
                Err(e) => return Err(figment::Error::from(e.to_string()).into()),
            };
            overrides.retain(|key, _| explicit.contains(&key.as_str()));
            debug!("Command line overrides: {:?}", overrides.keys().collect::<Vec<_>>());
            config = config.merge(Serialized::defaults(overrides));
        }

        let this: Self = config.extract()?;
        this.validate()?;
        Ok(this)
    }

    /// Configuration sources bypass the command line value parsers, so check
    /// their constraints again
    fn validate(&self) -> Result<(), MZIsotoperError> {
        for (name, value) in [
            ("limit", self.limit),
            ("min_relative_intensity", self.min_relative_intensity),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(figment::Error::from(format!(
                    "{name} must be a non-negative number, got {value}"
                ))
                .into());
            }
        }
        Ok(())
    }

    fn create_threadpool(&self) -> Result<rayon::ThreadPool, MZIsotoperError> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        Ok(rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()?)
    }

    fn load_table(&self) -> Result<Option<IsotopeTable>, MZIsotoperError> {
        match self.isotope_file.as_ref() {
            Some(path) => {
                info!("Isotope Table: {}", path.display());
                Ok(Some(IsotopeTable::open_path(path)?))
            }
            None => Ok(None),
        }
    }

    pub fn main(&self) -> Result<(), MZIsotoperError> {
        info!(
            "mzisotoper v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        if let Ok(config) = toml::to_string(self) {
            debug!("Configuration:\n{config}");
        }
        let loaded = self.load_table()?;
        let table = loaded.as_ref().unwrap_or_else(|| IsotopeTable::bundled());
        debug!("{} elements available", table.len());
        self.reader_then(table)
    }

    fn reader_then(&self, table: &IsotopeTable) -> Result<(), MZIsotoperError> {
        if self.input_file == "-" {
            let reader = io::BufReader::new(io::stdin());
            self.writer_then(table, reader)
        } else {
            let handle = io::BufReader::new(fs::File::open(&self.input_file)?);
            if is_gzip_path(&self.input_file) {
                let reader = io::BufReader::new(MultiGzDecoder::new(handle));
                self.writer_then(table, reader)
            } else {
                self.writer_then(table, handle)
            }
        }
    }

    fn writer_then<R: io::BufRead + Send>(
        &self,
        table: &IsotopeTable,
        reader: R,
    ) -> Result<(), MZIsotoperError> {
        if self.output_file == PathBuf::from("-") {
            let writer = io::BufWriter::new(io::stdout());
            self.run_workflow(table, reader, writer)
        } else {
            let handle = io::BufWriter::new(fs::File::create(&self.output_file)?);
            if is_gzip_path(&self.output_file) {
                let mut encoder = GzEncoder::new(handle, Compression::best());
                self.run_workflow(table, reader, &mut encoder)?;
                encoder.finish()?;
                Ok(())
            } else {
                self.run_workflow(table, reader, handle)
            }
        }
    }

    fn run_workflow<R: io::BufRead + Send, W: io::Write + Send>(
        &self,
        table: &IsotopeTable,
        reader: R,
        writer: W,
    ) -> Result<(), MZIsotoperError> {
        let pool = self.create_threadpool()?;
        let buffer_size = self.write_buffer_size.max(1);
        let (send_solved, recv_solved) = crossbeam_channel::bounded(buffer_size);
        let (send_collated, recv_collated) = crossbeam_channel::bounded(buffer_size);

        let params = ReportParams::new(self.digits, self.min_relative_intensity);
        let abundance_floor = self.limit;
        let format = self.format;

        let start = Instant::now();
        thread::scope(|scope| {
            let pool = &pool;
            let read_task = scope.spawn(move || {
                pool.install(|| {
                    prepare_processing(reader, table, abundance_floor, params, send_solved)
                })
            });
            let collate_task = scope.spawn(move || collate_results(recv_solved, send_collated));
            let write_task =
                scope.spawn(move || write_output(writer, recv_collated, format, params.digits));

            match read_task.join() {
                Ok(prog) => {
                    info!("Formulas: {}", prog.formulas);
                    info!("Failures: {}", prog.failures);
                    info!("Peaks: {}", prog.peaks);
                }
                Err(e) => {
                    warn!("Failed to join reader task: {e:?}");
                }
            }

            if let Err(e) = collate_task.join() {
                warn!("Failed to join collator task: {e:?}")
            }

            match write_task.join() {
                Ok(o) => {
                    o?;
                }
                Err(e) => {
                    warn!("Failed to join writer task: {e:?}");
                }
            }
            Ok::<(), MZIsotoperError>(())
        })?;

        let elapsed = Instant::now() - start;
        info!("Total Elapsed Time: {:0.3?}", elapsed);
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_cli_defaults_match_default() {
        let args = MZIsotoper::parse_from(["mzisotoper"]);
        let default = MZIsotoper::default();
        assert_eq!(args.input_file, default.input_file);
        assert_eq!(args.output_file, default.output_file);
        assert_eq!(args.limit, default.limit);
        assert_eq!(args.digits, default.digits);
        assert_eq!(args.format, default.format);
        assert_eq!(args.threads, default.threads);
        assert_eq!(args.write_buffer_size, default.write_buffer_size);
    }

    #[test]
    fn test_arguments() {
        let args = MZIsotoper::parse_from([
            "mzisotoper",
            "formulas.txt",
            "-l",
            "1e-8",
            "-d",
            "4",
            "-f",
            "json",
            "-m",
            "0.5",
            "-t",
            "2",
        ]);
        assert_eq!(args.input_file, "formulas.txt");
        assert_eq!(args.limit, 1e-8);
        assert_eq!(args.digits, 4);
        assert_eq!(args.format, OutputFormat::Json);
        assert_eq!(args.min_relative_intensity, 0.5);
        assert_eq!(args.threads, 2);

        assert!(MZIsotoper::try_parse_from(["mzisotoper", "-l", "-1"]).is_err());
    }

    fn configured_from(args: &[&str]) -> Result<MZIsotoper, MZIsotoperError> {
        let matches = MZIsotoper::command().get_matches_from(args.iter().copied());
        let this = MZIsotoper::from_arg_matches(&matches).map_err(io::Error::other)?;
        this.configured_with(&matches)
    }

    #[test]
    fn test_configuration_layers() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("mzisotoper.toml", "digits = 3\nthreads = 2\nlimit = 1e-6")?;
            jail.create_file("batch.toml", "digits = 4\nformat = \"json\"\nlimit = 1e-8")?;
            jail.set_env("MZISOTOPER_THREADS", 3);

            let args = configured_from(&["mzisotoper", "--config-file", "batch.toml"])
                .map_err(|e| e.to_string())?;
            assert_eq!(args.digits, 4);
            assert_eq!(args.format, OutputFormat::Json);
            assert_eq!(args.limit, 1e-8);
            assert_eq!(args.threads, 3);
            assert_eq!(args.config_file, Some(PathBuf::from("batch.toml")));

            let args = MZIsotoper::default()
                .configured()
                .map_err(|e| e.to_string())?;
            assert_eq!(args.digits, 3);
            assert_eq!(args.limit, 1e-6);
            assert_eq!(args.threads, 3);
            Ok(())
        });
    }

    #[test]
    fn test_command_line_overrides_configuration() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("batch.toml", "digits = 3\nthreads = 2\nformat = \"json\"")?;
            jail.set_env("MZISOTOPER_THREADS", 5);

            let args = configured_from(&[
                "mzisotoper",
                "--config-file",
                "batch.toml",
                "-d",
                "9",
                "-t",
                "1",
            ])
            .map_err(|e| e.to_string())?;
            assert_eq!(args.digits, 9);
            assert_eq!(args.threads, 1);
            assert_eq!(args.format, OutputFormat::Json);
            Ok(())
        });
    }

    #[test]
    fn test_configured_values_validated() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("mzisotoper.toml", "limit = -1.0")?;
            let err = MZIsotoper::default().configured().unwrap_err();
            assert!(matches!(err, MZIsotoperError::ConfigurationError(_)), "{err}");
            assert!(err.to_string().contains("limit"));

            jail.create_file("mzisotoper.toml", "")?;
            jail.set_env("MZISOTOPER_MIN_RELATIVE_INTENSITY", -5);
            let err = configured_from(&["mzisotoper"]).unwrap_err();
            assert!(err.to_string().contains("min_relative_intensity"), "{err}");

            let args = configured_from(&["mzisotoper", "-m", "2.5"]).map_err(|e| e.to_string())?;
            assert_eq!(args.min_relative_intensity, 2.5);
            Ok(())
        });
    }

    #[test]
    fn test_gzip_path() {
        assert!(is_gzip_path("formulas.txt.gz"));
        assert!(!is_gzip_path("formulas.txt"));
        assert!(!is_gzip_path("-"));
    }
}
