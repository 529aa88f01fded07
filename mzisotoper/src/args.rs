use std::fmt::Display;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    /// A header line per formula followed by one `mass percent` line per peak
    Text,
    /// One JSON object per formula per line
    Json,
}

impl Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => f.write_str("text"),
            Self::Json => f.write_str("json"),
        }
    }
}

pub(crate) fn non_negative_float(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|e| e.to_string())?;
    if value < 0.0 || !value.is_finite() {
        Err(format!("`{s}` is not a finite, non-negative number"))
    } else {
        Ok(value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_non_negative_float() {
        assert_eq!(non_negative_float("1e-10"), Ok(1e-10));
        assert_eq!(non_negative_float("0"), Ok(0.0));
        assert!(non_negative_float("-1").is_err());
        assert!(non_negative_float("inf").is_err());
        assert!(non_negative_float("x").is_err());
    }
}
