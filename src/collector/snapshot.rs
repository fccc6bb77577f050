//! Mapping of a [`ProbeResult`] onto named observations.

use crate::probe::{ProbeResult, TcpMeasurement, UdpMeasurement};

/// Every gauge a probe can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    Up,
    SentSeconds,
    SentBytes,
    ReceivedSeconds,
    ReceivedBytes,
    Retransmits,
    SentPackets,
    SentJitterMs,
    SentLostPackets,
    SentLostPercent,
    ReceivedPackets,
    ReceivedJitterMs,
    ReceivedLostPackets,
    ReceivedLostPercent,
}

impl Metric {
    pub const ALL: [Metric; 14] = [
        Metric::Up,
        Metric::SentSeconds,
        Metric::SentBytes,
        Metric::ReceivedSeconds,
        Metric::ReceivedBytes,
        Metric::Retransmits,
        Metric::SentPackets,
        Metric::SentJitterMs,
        Metric::SentLostPackets,
        Metric::SentLostPercent,
        Metric::ReceivedPackets,
        Metric::ReceivedJitterMs,
        Metric::ReceivedLostPackets,
        Metric::ReceivedLostPercent,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Metric::Up => "iperf3_up",
            Metric::SentSeconds => "iperf3_sent_seconds",
            Metric::SentBytes => "iperf3_sent_bytes",
            Metric::ReceivedSeconds => "iperf3_received_seconds",
            Metric::ReceivedBytes => "iperf3_received_bytes",
            Metric::Retransmits => "iperf3_retransmits",
            Metric::SentPackets => "iperf3_sent_packets",
            Metric::SentJitterMs => "iperf3_sent_jitter_ms",
            Metric::SentLostPackets => "iperf3_sent_lost_packets",
            Metric::SentLostPercent => "iperf3_sent_lost_percent",
            Metric::ReceivedPackets => "iperf3_received_packets",
            Metric::ReceivedJitterMs => "iperf3_received_jitter_ms",
            Metric::ReceivedLostPackets => "iperf3_received_lost_packets",
            Metric::ReceivedLostPercent => "iperf3_received_lost_percent",
        }
    }

    pub fn help(self) -> &'static str {
        match self {
            Metric::Up => "Was the last iperf3 probe successful (1 for success, 0 for failure).",
            Metric::SentSeconds => "Total seconds spent sending packets.",
            Metric::SentBytes => "Total sent bytes for the last test run.",
            Metric::ReceivedSeconds => "Total seconds spent receiving packets.",
            Metric::ReceivedBytes => "Total received bytes for the last test run.",
            Metric::Retransmits => "Total retransmits for the last test run (TCP only).",
            Metric::SentPackets => "Total sent packets for the last UDP test run.",
            Metric::SentJitterMs => "Jitter in milliseconds on the sending side of the last UDP test run.",
            Metric::SentLostPackets => "Lost packets on the sending side of the last UDP test run.",
            Metric::SentLostPercent => "Percentage of packets lost on the sending side of the last UDP test run.",
            Metric::ReceivedPackets => "Total received packets for the last UDP test run.",
            Metric::ReceivedJitterMs => "Jitter in milliseconds on the receiving side of the last UDP test run.",
            Metric::ReceivedLostPackets => "Lost packets on the receiving side of the last UDP test run.",
            Metric::ReceivedLostPercent => "Percentage of packets lost on the receiving side of the last UDP test run.",
        }
    }
}

/// The labelled observations produced by one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub target: String,
    pub port: String,
    pub observations: Vec<(Metric, f64)>,
}

impl Snapshot {
    /// Map a probe result. Failed probes still emit their protocol's full
    /// metric set, zero-filled, with `up` at 0.
    pub fn from_result(target: &str, port: u16, result: &ProbeResult) -> Self {
        let up = if result.is_success() { 1.0 } else { 0.0 };

        let observations = match result {
            ProbeResult::Tcp(r) => {
                let m = r.as_ref().copied().unwrap_or_default();
                tcp_observations(up, &m)
            }
            ProbeResult::Udp(r) => {
                let m = r.as_ref().copied().unwrap_or_default();
                udp_observations(up, &m)
            }
        };

        Self {
            target: target.to_string(),
            port: port.to_string(),
            observations,
        }
    }
}

#[cfg(test)]
impl Snapshot {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.observations
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, v)| *v)
    }

    pub fn metrics(&self) -> impl Iterator<Item = Metric> + '_ {
        self.observations.iter().map(|(m, _)| *m)
    }
}

fn tcp_observations(up: f64, m: &TcpMeasurement) -> Vec<(Metric, f64)> {
    vec![
        (Metric::Up, up),
        (Metric::SentSeconds, m.sent.seconds),
        (Metric::SentBytes, m.sent.bytes),
        (Metric::ReceivedSeconds, m.received.seconds),
        (Metric::ReceivedBytes, m.received.bytes),
        (Metric::Retransmits, m.retransmits),
    ]
}

fn udp_observations(up: f64, m: &UdpMeasurement) -> Vec<(Metric, f64)> {
    vec![
        (Metric::Up, up),
        (Metric::SentSeconds, m.sent.seconds),
        (Metric::SentBytes, m.sent.bytes),
        (Metric::ReceivedSeconds, m.received.seconds),
        (Metric::ReceivedBytes, m.received.bytes),
        (Metric::SentPackets, m.sent.packets),
        (Metric::SentJitterMs, m.sent.jitter_ms),
        (Metric::SentLostPackets, m.sent.lost_packets),
        (Metric::SentLostPercent, m.sent.lost_percent),
        (Metric::ReceivedPackets, m.received.packets),
        (Metric::ReceivedJitterMs, m.received.jitter_ms),
        (Metric::ReceivedLostPackets, m.received.lost_packets),
        (Metric::ReceivedLostPercent, m.received.lost_percent),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{ProbeError, Transfer, UdpTransfer};
    use std::collections::HashSet;

    fn tcp_ok() -> ProbeResult {
        ProbeResult::Tcp(Ok(TcpMeasurement {
            sent: Transfer { seconds: 5.0, bytes: 52428800.0, bits_per_second: 83886080.0 },
            received: Transfer { seconds: 5.0, bytes: 47185920.0, bits_per_second: 75497472.0 },
            retransmits: 10.0,
        }))
    }

    #[test]
    fn test_metric_names_are_unique() {
        let names: HashSet<_> = Metric::ALL.iter().map(|m| m.name()).collect();
        assert_eq!(names.len(), Metric::ALL.len());
        assert!(Metric::ALL.iter().all(|m| m.name().starts_with("iperf3_")));
        assert!(Metric::ALL.iter().all(|m| !m.help().is_empty()));
    }

    #[test]
    fn test_tcp_success() {
        let snap = Snapshot::from_result("h", 5201, &tcp_ok());
        assert_eq!(snap.port, "5201");
        assert_eq!(snap.get(Metric::Up), Some(1.0));
        assert_eq!(snap.get(Metric::SentBytes), Some(52428800.0));
        assert_eq!(snap.get(Metric::ReceivedBytes), Some(47185920.0));
        assert_eq!(snap.get(Metric::Retransmits), Some(10.0));
        assert_eq!(snap.get(Metric::SentPackets), None);
        assert_eq!(snap.observations.len(), 6);
    }

    #[test]
    fn test_tcp_failure_zero_fills() {
        let result = ProbeResult::failed(
            crate::probe::Protocol::Tcp,
            ProbeError::Execution("exit status: 1: connection refused".into()),
        );
        let snap = Snapshot::from_result("h", 5201, &result);

        assert_eq!(snap.observations.len(), 6);
        assert_eq!(snap.get(Metric::Retransmits), Some(0.0));
        assert!(snap.observations.iter().all(|(_, v)| *v == 0.0));
    }

    #[test]
    fn test_udp_emits_udp_metrics_only() {
        let result = ProbeResult::Udp(Ok(UdpMeasurement {
            sent: UdpTransfer { packets: 480.0, jitter_ms: 0.01, ..Default::default() },
            received: UdpTransfer { lost_percent: 0.6, ..Default::default() },
        }));
        let snap = Snapshot::from_result("h", 5201, &result);

        assert_eq!(snap.observations.len(), 13);
        assert_eq!(snap.get(Metric::Retransmits), None);
        assert_eq!(snap.get(Metric::SentPackets), Some(480.0));
        assert_eq!(snap.get(Metric::SentJitterMs), Some(0.01));
        assert_eq!(snap.get(Metric::ReceivedLostPercent), Some(0.6));
    }

    #[test]
    fn test_failure_keeps_metric_set() {
        let ok = Snapshot::from_result("h", 5201, &ProbeResult::Udp(Ok(UdpMeasurement::default())));
        let failed = Snapshot::from_result(
            "h",
            5201,
            &ProbeResult::failed(crate::probe::Protocol::Udp, ProbeError::Config("bad".into())),
        );
        assert_eq!(ok.metrics().collect::<Vec<_>>(), failed.metrics().collect::<Vec<_>>());
        assert_eq!(failed.get(Metric::Up), Some(0.0));
    }
}
