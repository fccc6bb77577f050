//! Field validators shared by the request normalizer, the runner and the config loader.

use std::fmt;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use thiserror::Error;

/// Grammar accepted for iperf3's `-b` flag, as shown to callers.
pub const BITRATE_GRAMMAR: &str = "#[KMG][/#]";

/// A validation failure for a single named field.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Every field failure of one request, reported together.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MultiError {
    pub errors: Vec<ValidationError>,
}

impl MultiError {
    pub fn add(&mut self, field: &str, message: impl Into<String>) {
        self.errors.push(ValidationError::new(field, message));
    }

    pub fn push(&mut self, err: ValidationError) {
        self.errors.push(err);
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    /// True if any accumulated error refers to `field`.
    #[cfg(test)]
    pub fn has_field(&self, field: &str) -> bool {
        self.errors.iter().any(|e| e.field == field)
    }

    /// `Ok(())` when nothing was accumulated, otherwise the whole set.
    pub fn into_result(self) -> Result<(), MultiError> {
        if self.has_errors() {
            Err(self)
        } else {
            Ok(())
        }
    }
}

impl fmt::Display for MultiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let [only] = self.errors.as_slice() {
            return write!(f, "{}", only);
        }

        write!(f, "multiple validation errors:")?;
        for err in &self.errors {
            write!(f, "\n- {}", err)?;
        }
        Ok(())
    }
}

impl std::error::Error for MultiError {}

fn bitrate_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+(\.\d+)?[KMG]?(/\d+)?$").unwrap())
}

/// Validate a bitrate limit. The empty string means "unspecified" and is accepted.
pub fn validate_bitrate(bitrate: &str) -> Result<(), ValidationError> {
    if bitrate.is_empty() || bitrate_pattern().is_match(bitrate) {
        return Ok(());
    }

    Err(ValidationError::new(
        "bitrate",
        format!(
            "must be provided as {} (bits/sec with optional K/M/G unit and optional /packet-count burst), got '{}'",
            BITRATE_GRAMMAR, bitrate
        ),
    ))
}

/// Validate a TCP/UDP port number.
pub fn validate_port(port: i64) -> Result<(), ValidationError> {
    if !(1..=65535).contains(&port) {
        return Err(ValidationError::new(
            "port",
            format!("must be between 1 and 65535, got {}", port),
        ));
    }
    Ok(())
}

/// Validate `d` against `min` and, when `max` is non-zero, against `max`.
pub fn validate_duration(
    field: &str,
    d: Duration,
    min: Duration,
    max: Duration,
) -> Result<(), ValidationError> {
    if d < min {
        return Err(ValidationError::new(
            field,
            format!("must be at least {}", humantime::format_duration(min)),
        ));
    }
    if !max.is_zero() && d > max {
        return Err(ValidationError::new(
            field,
            format!("must not exceed {}", humantime::format_duration(max)),
        ));
    }
    Ok(())
}
