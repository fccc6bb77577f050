//! Parsing of the JSON report iperf3 prints under `-J`.
//!
//! TCP runs are read from the `end.sum_sent` / `end.sum_received` blocks. UDP
//! runs take the sender side from `end.streams[0].udp` and the receiver side
//! from the aggregate `end.sum` block; that asymmetry mirrors where iperf3
//! actually puts the numbers.

use serde::Deserialize;

use super::{ProbeError, TcpMeasurement, Transfer, UdpMeasurement, UdpTransfer};

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawReport {
    end: RawEnd,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawEnd {
    sum_sent: RawSum,
    sum_received: RawSum,
    sum: RawSum,
    streams: Vec<RawStream>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawStream {
    udp: RawSum,
}

/// Union of the fields iperf3 writes into its summary blocks.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSum {
    seconds: f64,
    bytes: f64,
    bits_per_second: f64,
    retransmits: f64,
    packets: f64,
    jitter_ms: f64,
    lost_packets: f64,
    lost_percent: f64,
}

impl RawSum {
    fn transfer(&self) -> Transfer {
        Transfer {
            seconds: self.seconds,
            bytes: self.bytes,
            bits_per_second: self.bits_per_second,
        }
    }

    fn udp_transfer(&self) -> UdpTransfer {
        UdpTransfer {
            seconds: self.seconds,
            bytes: self.bytes,
            bits_per_second: self.bits_per_second,
            packets: self.packets,
            jitter_ms: self.jitter_ms,
            lost_packets: self.lost_packets,
            lost_percent: self.lost_percent,
        }
    }
}

fn parse_raw(output: &[u8]) -> Result<RawReport, ProbeError> {
    Ok(serde_json::from_slice(output)?)
}

/// Parse a TCP report.
pub fn parse_tcp_report(output: &[u8]) -> Result<TcpMeasurement, ProbeError> {
    let end = parse_raw(output)?.end;

    Ok(TcpMeasurement {
        sent: end.sum_sent.transfer(),
        received: end.sum_received.transfer(),
        retransmits: end.sum_sent.retransmits,
    })
}

/// Parse a UDP report. Missing sender or receiver data is logged and left at
/// zero; it never turns a successful run into a failure.
pub fn parse_udp_report(output: &[u8], target: &str) -> Result<UdpMeasurement, ProbeError> {
    let end = parse_raw(output)?.end;

    let sent = match end.streams.first() {
        Some(stream) => stream.udp.udp_transfer(),
        None => {
            tracing::warn!(
                "iperf3 UDP report for {} has no streams, sender metrics will be zero",
                target
            );
            UdpTransfer::default()
        }
    };

    let received = end.sum.udp_transfer();
    if received.bits_per_second <= 0.0 && received.bytes <= 0.0 {
        tracing::warn!(
            "iperf3 UDP report for {} has no receiver data (bits_per_second={}, bytes={})",
            target,
            received.bits_per_second,
            received.bytes
        );
    }

    Ok(UdpMeasurement { sent, received })
}

/// The `error` string iperf3 embeds in its JSON output when a run fails.
pub fn report_error(output: &[u8]) -> Option<String> {
    serde_json::from_slice::<RawReport>(output)
        .ok()
        .and_then(|r| r.error)
        .filter(|e| !e.trim().is_empty())
}
