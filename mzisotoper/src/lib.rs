mod args;
mod driver;
mod proc;
mod progress;
mod types;
mod write;

pub use args::OutputFormat;
pub use driver::{MZIsotoper, MZIsotoperError};
