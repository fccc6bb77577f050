//! Probe request normalization.
//!
//! Turns the raw query parameters of a scrape plus the scrape-timeout hint into
//! a [`ProbeConfig`]. Every malformed parameter is reported at once.

use std::collections::HashMap;
use std::time::Duration;

use thiserror::Error;

use super::{ProbeConfig, Protocol};
use crate::validation::{validate_bitrate, validate_duration, validate_port, MultiError};

/// Header Prometheus uses to announce its scrape timeout, in seconds.
pub const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

pub const DEFAULT_PORT: u16 = 5201;
pub const DEFAULT_PERIOD: Duration = Duration::from_secs(5);
pub const MIN_PERIOD: Duration = Duration::from_millis(100);
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(30);
pub const MIN_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_TIMEOUT: Duration = Duration::from_secs(300);

/// Request error types.
#[derive(Error, Debug)]
pub enum RequestError {
    /// One or more caller-supplied parameters are invalid.
    #[error("{0}")]
    Invalid(#[from] MultiError),
    /// The timeout hint from the scrape infrastructure could not be parsed.
    #[error("Failed to parse timeout from Prometheus header: {0}")]
    TimeoutHint(String),
}

/// How the probe timeout is derived when a request comes in.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeoutPolicy {
    /// Used when the scrape carries no timeout hint.
    pub default: Duration,
    pub min: Duration,
    pub max: Duration,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            default: FALLBACK_TIMEOUT,
            min: MIN_TIMEOUT,
            max: MAX_TIMEOUT,
        }
    }
}

impl TimeoutPolicy {
    pub fn new(default: Duration) -> Self {
        Self {
            default,
            ..Self::default()
        }
    }

    /// Resolve the probe timeout: caller hint, then configured default, then
    /// the 30s fallback, clamped to `[min, max]`. A zero hint counts as absent.
    pub fn resolve(&self, hint: Option<&str>) -> Result<Duration, RequestError> {
        let mut seconds = match hint.map(str::trim).filter(|v| !v.is_empty()) {
            Some(v) => {
                let parsed: f64 = v
                    .parse()
                    .map_err(|e| RequestError::TimeoutHint(format!("'{}': {}", v, e)))?;
                if !parsed.is_finite() {
                    return Err(RequestError::TimeoutHint(format!("'{}' is not a finite number", v)));
                }
                parsed
            }
            None => 0.0,
        };

        if seconds == 0.0 {
            seconds = if self.default.is_zero() {
                FALLBACK_TIMEOUT.as_secs_f64()
            } else {
                self.default.as_secs_f64()
            };
        }

        let clamped = seconds
            .max(self.min.as_secs_f64())
            .min(self.max.as_secs_f64());
        Ok(Duration::from_secs_f64(clamped))
    }
}

/// Parse a boolean the way Go's `strconv.ParseBool` does.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

fn param<'a>(params: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    params.get(name).map(String::as_str).filter(|v| !v.is_empty())
}

fn bool_param(params: &HashMap<String, String>, name: &str, merr: &mut MultiError) -> bool {
    match param(params, name) {
        Some(v) => parse_bool(v).unwrap_or_else(|| {
            merr.add(name, format!("must be true or false, got '{}'", v));
            false
        }),
        None => false,
    }
}

/// Build a [`ProbeConfig`] from scrape query parameters.
///
/// Field errors are accumulated and returned together as
/// [`RequestError::Invalid`]. A `period` that is not below the resolved timeout
/// is rescaled to 90% of the timeout rather than rejected.
pub fn normalize_probe_request(
    params: &HashMap<String, String>,
    timeout_hint: Option<&str>,
    policy: &TimeoutPolicy,
) -> Result<ProbeConfig, RequestError> {
    let mut merr = MultiError::default();

    let target = param(params, "target").unwrap_or_default().to_string();
    if target.is_empty() {
        merr.add("target", "must be specified");
    }

    let port = match param(params, "port") {
        Some(v) => match v.parse::<i64>() {
            Ok(p) => match validate_port(p) {
                Ok(()) => p as u16,
                Err(e) => {
                    merr.push(e);
                    DEFAULT_PORT
                }
            },
            Err(_) => {
                merr.add("port", format!("must be an integer, got '{}'", v));
                DEFAULT_PORT
            }
        },
        None => DEFAULT_PORT,
    };

    let mut period = match param(params, "period") {
        Some(v) => match humantime::parse_duration(v) {
            Ok(d) => {
                if let Err(e) = validate_duration("period", d, MIN_PERIOD, Duration::ZERO) {
                    merr.push(e);
                }
                d
            }
            Err(e) => {
                merr.add("period", format!("invalid duration format '{}': {}", v, e));
                DEFAULT_PERIOD
            }
        },
        None => DEFAULT_PERIOD,
    };

    let reverse_mode = bool_param(params, "reverse_mode", &mut merr);
    let udp_mode = bool_param(params, "udp_mode", &mut merr);

    let bitrate = param(params, "bitrate").map(str::to_string);
    if let Some(b) = bitrate.as_deref() {
        if let Err(e) = validate_bitrate(b) {
            merr.push(e);
        }
    }

    merr.into_result()?;

    let timeout = policy.resolve(timeout_hint)?;

    if period >= timeout {
        let rescaled = timeout * 9 / 10;
        tracing::debug!(
            "Requested period {:?} for {} is not below timeout {:?}, using {:?}",
            period,
            target,
            timeout,
            rescaled
        );
        period = rescaled;
    }

    Ok(ProbeConfig {
        target,
        port,
        period,
        timeout,
        reverse_mode,
        protocol: if udp_mode { Protocol::Udp } else { Protocol::Tcp },
        bitrate,
    })
}
