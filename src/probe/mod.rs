//! Probe module for iperf3 throughput measurements.
//!
//! A probe is one run of the external `iperf3` client against one target. The
//! request normalizer builds a [`ProbeConfig`], a [`Runner`] executes it and
//! returns a [`ProbeResult`] whose shape depends on the protocol that was tested.

mod iperf;
mod report;
mod request;

pub use iperf::*;
pub use report::*;
pub use request::*;

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("failed to start iperf3: {0}")]
    Spawn(#[from] std::io::Error),
    #[error("iperf3 execution failed: {0}")]
    Execution(String),
    #[error("iperf3 timed out after {}", humantime::format_duration(*.0))]
    Timeout(Duration),
    #[error("failed to parse iperf3 result: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Transport protocol a probe measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
        }
    }
}

/// Fully validated parameters of one probe. `period` is always below `timeout`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeConfig {
    pub target: String,
    pub port: u16,
    pub period: Duration,
    pub timeout: Duration,
    pub reverse_mode: bool,
    pub protocol: Protocol,
    /// Bitrate limit in iperf3 `-b` syntax; `None` leaves the tool's default.
    pub bitrate: Option<String>,
}

impl ProbeConfig {
    pub fn new(target: &str, port: u16, period: Duration, timeout: Duration) -> Self {
        Self {
            target: target.to_string(),
            port,
            period,
            timeout,
            reverse_mode: false,
            protocol: Protocol::Tcp,
            bitrate: None,
        }
    }

    pub fn is_udp(&self) -> bool {
        self.protocol == Protocol::Udp
    }
}

/// Seconds, bytes and throughput of one direction of a transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transfer {
    pub seconds: f64,
    pub bytes: f64,
    pub bits_per_second: f64,
}

/// One direction of a UDP transfer, including datagram accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UdpTransfer {
    pub seconds: f64,
    pub bytes: f64,
    pub bits_per_second: f64,
    pub packets: f64,
    pub jitter_ms: f64,
    pub lost_packets: f64,
    pub lost_percent: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct TcpMeasurement {
    pub sent: Transfer,
    pub received: Transfer,
    pub retransmits: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UdpMeasurement {
    pub sent: UdpTransfer,
    pub received: UdpTransfer,
}

/// Outcome of a single probe, tagged by the protocol that was configured.
#[derive(Debug)]
pub enum ProbeResult {
    Tcp(Result<TcpMeasurement, ProbeError>),
    Udp(Result<UdpMeasurement, ProbeError>),
}

impl ProbeResult {
    /// A failed result for the given protocol.
    pub fn failed(protocol: Protocol, err: ProbeError) -> Self {
        match protocol {
            Protocol::Tcp => ProbeResult::Tcp(Err(err)),
            Protocol::Udp => ProbeResult::Udp(Err(err)),
        }
    }

    pub fn protocol(&self) -> Protocol {
        match self {
            ProbeResult::Tcp(_) => Protocol::Tcp,
            ProbeResult::Udp(_) => Protocol::Udp,
        }
    }

    pub fn is_success(&self) -> bool {
        match self {
            ProbeResult::Tcp(r) => r.is_ok(),
            ProbeResult::Udp(r) => r.is_ok(),
        }
    }

    pub fn error(&self) -> Option<&ProbeError> {
        match self {
            ProbeResult::Tcp(r) => r.as_ref().err(),
            ProbeResult::Udp(r) => r.as_ref().err(),
        }
    }
}

/// Executes probes. Implemented by [`IperfRunner`] and by stubs in tests.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Run one probe, finishing no later than `deadline`. Never panics; every
    /// failure is reported through the returned [`ProbeResult`].
    async fn run(&self, deadline: Instant, config: &ProbeConfig) -> ProbeResult;
}
