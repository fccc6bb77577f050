//! iperf3 client runner.
//!
//! Builds the iperf3 command line from a [`ProbeConfig`], runs it under the
//! probe deadline and turns its JSON report into a [`ProbeResult`].

use std::env;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tokio::time::Instant;

use super::{
    parse_tcp_report, parse_udp_report, report_error, ProbeConfig, ProbeError, ProbeResult,
    Protocol, Runner,
};
use crate::validation::{validate_bitrate, validate_port};

/// iperf3's own default bitrate for UDP tests.
pub const DEFAULT_UDP_BITRATE: &str = "1M";

/// Platform name of the iperf3 executable.
pub fn default_iperf3_command() -> &'static str {
    if cfg!(windows) {
        "iperf3.exe"
    } else {
        "iperf3"
    }
}

/// Locate the iperf3 binary. Bare names are searched on `PATH`, anything
/// containing a path separator is checked directly.
pub fn check_iperf3_exists(command: &Path) -> Result<PathBuf, ProbeError> {
    let not_found = || {
        ProbeError::Spawn(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("{} not found", command.display()),
        ))
    };

    if command.components().count() > 1 {
        return if is_executable(command) {
            Ok(command.to_path_buf())
        } else {
            Err(not_found())
        };
    }

    let paths = env::var_os("PATH").ok_or_else(not_found)?;
    search_paths(command, &paths).ok_or_else(not_found)
}

/// First executable `command` in a `PATH`-style list, skipping entries that
/// exist but cannot be run.
fn search_paths(command: &Path, paths: &OsStr) -> Option<PathBuf> {
    env::split_paths(paths)
        .map(|dir| dir.join(command))
        .find(|candidate| is_executable(candidate))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file()
}

/// Build the iperf3 argument list for a probe.
pub fn build_args(config: &ProbeConfig) -> Vec<String> {
    // iperf3 treats -t 0 as "run forever"
    let seconds = config.period.as_secs_f64().round().max(1.0) as u64;

    let mut args = vec![
        "-J".to_string(),
        "-t".to_string(),
        seconds.to_string(),
        "-c".to_string(),
        config.target.clone(),
        "-p".to_string(),
        config.port.to_string(),
    ];

    if config.reverse_mode {
        args.push("-R".to_string());
    }

    match (config.protocol, config.bitrate.as_deref()) {
        (Protocol::Udp, Some(bitrate)) => {
            args.extend(["-u".to_string(), "-b".to_string(), bitrate.to_string()]);
        }
        (Protocol::Udp, None) => {
            tracing::info!(
                "No bitrate given for UDP probe of {}, using iperf3 default of {}",
                config.target,
                DEFAULT_UDP_BITRATE
            );
            args.extend(["-u".to_string(), "-b".to_string(), DEFAULT_UDP_BITRATE.to_string()]);
        }
        (Protocol::Tcp, Some(bitrate)) => {
            args.extend(["-b".to_string(), bitrate.to_string()]);
        }
        (Protocol::Tcp, None) => {}
    }

    args
}

/// Runs the real iperf3 binary.
#[derive(Debug, Clone)]
pub struct IperfRunner {
    command: PathBuf,
}

impl IperfRunner {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
        }
    }

    async fn execute(&self, deadline: Instant, config: &ProbeConfig) -> Result<Vec<u8>, ProbeError> {
        // Configs built outside the request normalizer arrive unchecked.
        if let Some(bitrate) = config.bitrate.as_deref() {
            validate_bitrate(bitrate).map_err(|e| ProbeError::Config(e.to_string()))?;
        }
        validate_port(i64::from(config.port)).map_err(|e| ProbeError::Config(e.to_string()))?;

        let args = build_args(config);

        tracing::debug!(
            host = %config.target,
            port = config.port,
            period = ?config.period,
            reverse = config.reverse_mode,
            udp = config.is_udp(),
            bitrate = ?config.bitrate,
            "Running iperf3 command"
        );

        let mut cmd = Command::new(&self.command);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        // Dropping the output future on timeout kills the child.
        let output = tokio::time::timeout_at(deadline, cmd.output())
            .await
            .map_err(|_| ProbeError::Timeout(config.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            let detail = if !stderr.is_empty() {
                Some(stderr)
            } else {
                report_error(&output.stdout)
            };

            return Err(ProbeError::Execution(match detail {
                Some(detail) => format!("{}: {}", output.status, detail),
                None => output.status.to_string(),
            }));
        }

        Ok(output.stdout)
    }
}

#[async_trait]
impl Runner for IperfRunner {
    async fn run(&self, deadline: Instant, config: &ProbeConfig) -> ProbeResult {
        let stdout = match self.execute(deadline, config).await {
            Ok(out) => out,
            Err(e) => {
                tracing::error!("Failed to run iperf3 against {}: {}", config.target, e);
                return ProbeResult::failed(config.protocol, e);
            }
        };

        let result = match config.protocol {
            Protocol::Tcp => ProbeResult::Tcp(parse_tcp_report(&stdout)),
            Protocol::Udp => ProbeResult::Udp(parse_udp_report(&stdout, &config.target)),
        };

        match &result {
            ProbeResult::Tcp(Ok(m)) => tracing::debug!(
                "iperf3 TCP test against {} completed: sent_bps={} received_bps={} retransmits={}",
                config.target,
                m.sent.bits_per_second,
                m.received.bits_per_second,
                m.retransmits
            ),
            ProbeResult::Udp(Ok(m)) => tracing::debug!(
                "iperf3 UDP test against {} completed: sent_bps={} received_bps={} lost_percent={}",
                config.target,
                m.sent.bits_per_second,
                m.received.bits_per_second,
                m.received.lost_percent
            ),
            _ => {
                if let Some(e) = result.error() {
                    tracing::error!("Failed to parse iperf3 result for {}: {}", config.target, e);
                }
            }
        }

        result
    }
}
