//! Configuration module for the iperf3 exporter.
//!
//! Loads configuration from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::probe::{default_iperf3_command, TimeoutPolicy, FALLBACK_TIMEOUT, MAX_TIMEOUT, MIN_TIMEOUT};
use crate::validation::validate_duration;

/// Configuration error types.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("invalid value for {var}: {reason}")]
    Invalid { var: &'static str, reason: String },
}

fn invalid(var: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        var,
        reason: reason.into(),
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Logfmt,
    Json,
}

/// Exporter configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ExporterConfig {
    /// Address the HTTP server binds to (default: 0.0.0.0:9579)
    pub listen_address: SocketAddr,
    /// Path serving the exporter's own metrics (default: "/metrics")
    pub metrics_path: String,
    /// Path serving probes (default: "/probe")
    pub probe_path: String,
    /// Probe timeout when the scrape sends no timeout header (default: 30s)
    pub timeout: Duration,
    /// iperf3 executable, searched on PATH unless it contains a separator
    pub iperf3_path: PathBuf,
    /// One of debug, info, warn, error (default: info)
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            listen_address: SocketAddr::from(([0, 0, 0, 0], 9579)),
            metrics_path: "/metrics".to_string(),
            probe_path: "/probe".to_string(),
            timeout: FALLBACK_TIMEOUT,
            iperf3_path: PathBuf::from(default_iperf3_command()),
            log_level: "info".to_string(),
            log_format: LogFormat::Logfmt,
        }
    }
}

impl ExporterConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `IPERF3_EXPORTER_LISTEN_ADDRESS`: bind address (default: 0.0.0.0:9579)
    /// - `IPERF3_EXPORTER_METRICS_PATH`: exporter metrics path (default: "/metrics")
    /// - `IPERF3_EXPORTER_PROBE_PATH`: probe path (default: "/probe")
    /// - `IPERF3_EXPORTER_TIMEOUT`: default probe timeout, e.g. "30s"
    /// - `IPERF3_EXPORTER_IPERF3_PATH`: iperf3 binary (default: "iperf3")
    /// - `IPERF3_EXPORTER_LOG_LEVEL`: debug, info, warn or error (default: info)
    /// - `IPERF3_EXPORTER_LOG_FORMAT`: logfmt or json (default: logfmt)
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(addr) = get("IPERF3_EXPORTER_LISTEN_ADDRESS") {
            cfg.listen_address = parse_listen_address(&addr)
                .ok_or_else(|| invalid("IPERF3_EXPORTER_LISTEN_ADDRESS", format!("'{}' is not a socket address", addr)))?;
        }

        if let Some(path) = get("IPERF3_EXPORTER_METRICS_PATH") {
            cfg.metrics_path = path;
        }

        if let Some(path) = get("IPERF3_EXPORTER_PROBE_PATH") {
            cfg.probe_path = path;
        }

        if let Some(timeout) = get("IPERF3_EXPORTER_TIMEOUT") {
            cfg.timeout = humantime::parse_duration(timeout.trim())
                .map_err(|e| invalid("IPERF3_EXPORTER_TIMEOUT", e.to_string()))?;
        }

        if let Some(path) = get("IPERF3_EXPORTER_IPERF3_PATH") {
            cfg.iperf3_path = PathBuf::from(path);
        }

        if let Some(level) = get("IPERF3_EXPORTER_LOG_LEVEL") {
            cfg.log_level = level.to_lowercase();
        }

        if let Some(format) = get("IPERF3_EXPORTER_LOG_FORMAT") {
            cfg.log_format = match format.to_lowercase().as_str() {
                "logfmt" => LogFormat::Logfmt,
                "json" => LogFormat::Json,
                other => {
                    return Err(invalid(
                        "IPERF3_EXPORTER_LOG_FORMAT",
                        format!("'{}' is not one of logfmt, json", other),
                    ))
                }
            };
        }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Check that the configuration is usable.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.metrics_path.starts_with('/') {
            return Err(invalid("IPERF3_EXPORTER_METRICS_PATH", "must start with '/'"));
        }
        if !self.probe_path.starts_with('/') {
            return Err(invalid("IPERF3_EXPORTER_PROBE_PATH", "must start with '/'"));
        }
        if self.metrics_path == self.probe_path {
            return Err(invalid(
                "IPERF3_EXPORTER_PROBE_PATH",
                "must differ from the metrics path",
            ));
        }
        if ["/", "/health", "/ready"].contains(&self.probe_path.as_str())
            || ["/", "/health", "/ready"].contains(&self.metrics_path.as_str())
        {
            return Err(invalid(
                "IPERF3_EXPORTER_PROBE_PATH",
                "metrics and probe paths must not shadow /, /health or /ready",
            ));
        }
        validate_duration("timeout", self.timeout, MIN_TIMEOUT, MAX_TIMEOUT)
            .map_err(|e| invalid("IPERF3_EXPORTER_TIMEOUT", e.message))?;
        if !["debug", "info", "warn", "error"].contains(&self.log_level.as_str()) {
            return Err(invalid(
                "IPERF3_EXPORTER_LOG_LEVEL",
                format!("'{}' is not one of debug, info, warn, error", self.log_level),
            ));
        }
        Ok(())
    }

    /// Timeout policy applied to incoming probe requests.
    pub fn timeout_policy(&self) -> TimeoutPolicy {
        TimeoutPolicy::new(self.timeout)
    }
}

/// Accepts full socket addresses and the ":port" shorthand.
fn parse_listen_address(value: &str) -> Option<SocketAddr> {
    let value = value.trim();
    match value.strip_prefix(':') {
        Some(port) => port.parse::<u16>().ok().map(|p| SocketAddr::from(([0, 0, 0, 0], p))),
        None => value.parse().ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn from_vars(vars: &[(&str, &str)]) -> Result<ExporterConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ExporterConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn test_default_config() {
        let cfg = ExporterConfig::default();
        assert_eq!(cfg.listen_address.port(), 9579);
        assert_eq!(cfg.metrics_path, "/metrics");
        assert_eq!(cfg.probe_path, "/probe");
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.log_format, LogFormat::Logfmt);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.timeout_policy(), TimeoutPolicy::default());
    }

    #[test]
    fn test_load_from_vars() {
        let cfg = from_vars(&[
            ("IPERF3_EXPORTER_LISTEN_ADDRESS", ":9100"),
            ("IPERF3_EXPORTER_METRICS_PATH", "/internal/metrics"),
            ("IPERF3_EXPORTER_PROBE_PATH", "/iperf"),
            ("IPERF3_EXPORTER_TIMEOUT", "1m"),
            ("IPERF3_EXPORTER_IPERF3_PATH", "/usr/local/bin/iperf3"),
            ("IPERF3_EXPORTER_LOG_LEVEL", "DEBUG"),
            ("IPERF3_EXPORTER_LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(cfg.listen_address, "0.0.0.0:9100".parse::<SocketAddr>().unwrap());
        assert_eq!(cfg.metrics_path, "/internal/metrics");
        assert_eq!(cfg.probe_path, "/iperf");
        assert_eq!(cfg.timeout, Duration::from_secs(60));
        assert_eq!(cfg.iperf3_path, PathBuf::from("/usr/local/bin/iperf3"));
        assert_eq!(cfg.log_level, "debug");
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn test_empty_vars_keep_defaults() {
        let cfg = from_vars(&[("IPERF3_EXPORTER_TIMEOUT", ""), ("IPERF3_EXPORTER_PROBE_PATH", " ")]).unwrap();
        assert_eq!(cfg.timeout, Duration::from_secs(30));
        assert_eq!(cfg.probe_path, "/probe");
    }

    #[test]
    fn test_rejects_invalid_values() {
        for vars in [
            [("IPERF3_EXPORTER_LISTEN_ADDRESS", "nowhere")],
            [("IPERF3_EXPORTER_TIMEOUT", "forever")],
            [("IPERF3_EXPORTER_TIMEOUT", "10m")],
            [("IPERF3_EXPORTER_TIMEOUT", "500ms")],
            [("IPERF3_EXPORTER_METRICS_PATH", "metrics")],
            [("IPERF3_EXPORTER_PROBE_PATH", "/metrics")],
            [("IPERF3_EXPORTER_PROBE_PATH", "/health")],
            [("IPERF3_EXPORTER_LOG_LEVEL", "verbose")],
            [("IPERF3_EXPORTER_LOG_FORMAT", "xml")],
        ] {
            assert!(from_vars(&vars).is_err(), "expected {:?} to be rejected", vars);
        }
    }

    #[test]
    fn test_error_names_variable() {
        let err = from_vars(&[("IPERF3_EXPORTER_TIMEOUT", "10m")]).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("IPERF3_EXPORTER_TIMEOUT"), "{}", msg);
        assert!(msg.contains("must not exceed"), "{}", msg);
    }
}
