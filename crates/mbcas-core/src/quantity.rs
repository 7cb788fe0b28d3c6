// SPDX-License-Identifier: MIT
//! Millicore <-> Kubernetes quantity-string conversion ("500m", "1.5").
//!
//! `k8s_openapi::apimachinery::pkg::api::resource::Quantity` is a bare
//! newtype around `String`; it does not parse suffixes itself, so the
//! parse/format logic lives here.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuantityError {
    #[error("empty quantity string")]
    Empty,
    #[error("invalid quantity string: {0}")]
    Invalid(String),
}

/// Parse a CPU quantity string ("500m", "1.5", "2") into millicores.
pub fn parse_millicores(raw: &str) -> Result<u64, QuantityError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(QuantityError::Empty);
    }
    if let Some(digits) = raw.strip_suffix('m') {
        let milli: f64 = digits
            .parse()
            .map_err(|_| QuantityError::Invalid(raw.to_string()))?;
        if milli < 0.0 {
            return Err(QuantityError::Invalid(raw.to_string()));
        }
        return Ok(milli.round() as u64);
    }
    let cores: f64 = raw
        .parse()
        .map_err(|_| QuantityError::Invalid(raw.to_string()))?;
    if cores < 0.0 {
        return Err(QuantityError::Invalid(raw.to_string()));
    }
    Ok((cores * 1000.0).round() as u64)
}

/// Format millicores back into the canonical "Nm" quantity string.
pub fn format_millicores(milli: u64) -> String {
    format!("{milli}m")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_milli_suffix() {
        assert_eq!(parse_millicores("500m").unwrap(), 500);
        assert_eq!(parse_millicores("20000m").unwrap(), 20000);
    }

    #[test]
    fn parses_whole_and_fractional_cores() {
        assert_eq!(parse_millicores("1.5").unwrap(), 1500);
        assert_eq!(parse_millicores("2").unwrap(), 2000);
        assert_eq!(parse_millicores("0.1").unwrap(), 100);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse_millicores("").is_err());
        assert!(parse_millicores("abc").is_err());
        assert!(parse_millicores("-5m").is_err());
    }

    #[test]
    fn format_round_trips_millicore_units() {
        assert_eq!(format_millicores(500), "500m");
        assert_eq!(parse_millicores(&format_millicores(1234)).unwrap(), 1234);
    }
}
