//! Prometheus collector that runs one probe per collection.

mod exporter;
mod snapshot;

pub use exporter::*;
pub use snapshot::*;

use std::sync::{Arc, Mutex, PoisonError};

use prometheus::core::{Collector as PromCollector, Desc};
use prometheus::proto::MetricFamily;
use prometheus::{GaugeVec, Opts};
use tokio::runtime::Handle;
use tokio::time::Instant;

use crate::probe::{ProbeConfig, Runner};

const LABELS: &[&str] = &["target", "port"];

/// Collects iperf3 metrics for a single probe configuration.
///
/// `collect` blocks on the probe, so it must be driven from a blocking
/// context (e.g. `spawn_blocking`), never from an async task.
pub struct Collector {
    config: ProbeConfig,
    runner: Arc<dyn Runner>,
    runtime: Handle,
    exporter: ExporterMetrics,
    gauges: Vec<(Metric, GaugeVec)>,
    // Serializes collections so one collector never runs two probes at once.
    lock: Mutex<()>,
}

impl Collector {
    pub fn new(
        config: ProbeConfig,
        runner: Arc<dyn Runner>,
        runtime: Handle,
        exporter: ExporterMetrics,
    ) -> prometheus::Result<Self> {
        let gauges = Metric::ALL
            .iter()
            .map(|m| Ok((*m, GaugeVec::new(Opts::new(m.name(), m.help()), LABELS)?)))
            .collect::<prometheus::Result<Vec<_>>>()?;

        Ok(Self {
            config,
            runner,
            runtime,
            exporter,
            gauges,
            lock: Mutex::new(()),
        })
    }

    /// Run one probe and map its result. Concurrent callers queue on the lock.
    pub fn probe(&self) -> Snapshot {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);

        let deadline = Instant::now() + self.config.timeout;
        let result = self
            .runtime
            .block_on(self.runner.run(deadline, &self.config));

        if let Some(e) = result.error() {
            tracing::warn!(
                "{} probe of {}:{} failed: {}",
                result.protocol(),
                self.config.target,
                self.config.port,
                e
            );
            self.exporter.errors.inc();
        }

        Snapshot::from_result(&self.config.target, self.config.port, &result)
    }

    fn gauge(&self, metric: Metric) -> Option<&GaugeVec> {
        self.gauges
            .iter()
            .find(|(m, _)| *m == metric)
            .map(|(_, g)| g)
    }
}

impl PromCollector for Collector {
    fn desc(&self) -> Vec<&Desc> {
        self.gauges.iter().flat_map(|(_, g)| g.desc()).collect()
    }

    fn collect(&self) -> Vec<MetricFamily> {
        let snapshot = self.probe();
        let labels = [snapshot.target.as_str(), snapshot.port.as_str()];

        snapshot
            .observations
            .iter()
            .filter_map(|(metric, value)| {
                let gauge = self.gauge(*metric)?;
                gauge.with_label_values(&labels).set(*value);
                Some(gauge.collect())
            })
            .flatten()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::{
        ProbeError, ProbeResult, Protocol, TcpMeasurement, Transfer, UdpMeasurement,
    };
    use async_trait::async_trait;
    use prometheus::Registry;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Returns canned results and records how many runs overlap.
    #[derive(Default)]
    struct StubRunner {
        fail: bool,
        delay: Duration,
        active: AtomicUsize,
        max_active: AtomicUsize,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Runner for StubRunner {
        async fn run(&self, _deadline: Instant, config: &ProbeConfig) -> ProbeResult {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(now, Ordering::SeqCst);
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if self.fail {
                return ProbeResult::failed(
                    config.protocol,
                    ProbeError::Execution("exit status: 1: connection refused".into()),
                );
            }
            match config.protocol {
                Protocol::Tcp => ProbeResult::Tcp(Ok(TcpMeasurement {
                    sent: Transfer { seconds: 5.0, bytes: 52428800.0, bits_per_second: 83886080.0 },
                    received: Transfer { seconds: 5.0, bytes: 47185920.0, bits_per_second: 75497472.0 },
                    retransmits: 10.0,
                })),
                Protocol::Udp => ProbeResult::Udp(Ok(UdpMeasurement::default())),
            }
        }
    }

    fn config(protocol: Protocol) -> ProbeConfig {
        let mut cfg = ProbeConfig::new("iperf.example.com", 5201, Duration::from_secs(5), Duration::from_secs(30));
        cfg.protocol = protocol;
        cfg
    }

    fn gauge_value(families: &[MetricFamily], name: &str) -> Option<f64> {
        families
            .iter()
            .find(|f| f.get_name() == name)
            .map(|f| f.get_metric()[0].get_gauge().get_value())
    }

    async fn gather(collector: Collector) -> Vec<MetricFamily> {
        tokio::task::spawn_blocking(move || {
            let registry = Registry::new();
            registry.register(Box::new(collector)).unwrap();
            registry.gather()
        })
        .await
        .unwrap()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_describe_lists_every_metric() {
        let collector = Collector::new(
            config(Protocol::Tcp),
            Arc::new(StubRunner::default()),
            Handle::current(),
            ExporterMetrics::new(),
        )
        .unwrap();

        let names: Vec<_> = collector.desc().iter().map(|d| d.fq_name.clone()).collect();
        assert_eq!(names.len(), Metric::ALL.len());
        for m in Metric::ALL {
            assert!(names.iter().any(|n| n == m.name()), "missing {}", m.name());
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_collect_tcp_success() {
        let collector = Collector::new(
            config(Protocol::Tcp),
            Arc::new(StubRunner::default()),
            Handle::current(),
            ExporterMetrics::new(),
        )
        .unwrap();

        let families = gather(collector).await;
        assert_eq!(families.len(), 6);
        assert_eq!(gauge_value(&families, "iperf3_up"), Some(1.0));
        assert_eq!(gauge_value(&families, "iperf3_sent_bytes"), Some(52428800.0));
        assert_eq!(gauge_value(&families, "iperf3_retransmits"), Some(10.0));
        assert_eq!(gauge_value(&families, "iperf3_sent_packets"), None);

        for family in &families {
            let labels = family.get_metric()[0].get_label();
            assert_eq!(labels.len(), 2);
            assert_eq!(labels[0].get_name(), "port");
            assert_eq!(labels[0].get_value(), "5201");
            assert_eq!(labels[1].get_name(), "target");
            assert_eq!(labels[1].get_value(), "iperf.example.com");
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_collect_failure_zero_fills_and_counts() {
        let exporter = ExporterMetrics::new();
        let runner = StubRunner { fail: true, ..Default::default() };
        let collector = Collector::new(
            config(Protocol::Tcp),
            Arc::new(runner),
            Handle::current(),
            exporter.clone(),
        )
        .unwrap();

        let families = gather(collector).await;
        assert_eq!(exporter.errors.get(), 1);
        assert_eq!(gauge_value(&families, "iperf3_up"), Some(0.0));
        for name in [
            "iperf3_sent_seconds",
            "iperf3_sent_bytes",
            "iperf3_received_seconds",
            "iperf3_received_bytes",
            "iperf3_retransmits",
        ] {
            assert_eq!(gauge_value(&families, name), Some(0.0), "{}", name);
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_collect_udp_metric_set() {
        let collector = Collector::new(
            config(Protocol::Udp),
            Arc::new(StubRunner { fail: true, ..Default::default() }),
            Handle::current(),
            ExporterMetrics::new(),
        )
        .unwrap();

        let families = gather(collector).await;
        assert_eq!(families.len(), 13);
        assert_eq!(gauge_value(&families, "iperf3_retransmits"), None);
        assert_eq!(gauge_value(&families, "iperf3_received_lost_percent"), Some(0.0));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_collects_never_overlap() {
        let runner = Arc::new(StubRunner {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let collector = Arc::new(
            Collector::new(config(Protocol::Tcp), runner.clone(), Handle::current(), ExporterMetrics::new())
                .unwrap(),
        );

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = collector.clone();
                tokio::task::spawn_blocking(move || c.collect())
            })
            .collect();

        let mut name_sets = Vec::new();
        for h in handles {
            let families = h.await.unwrap();
            name_sets.push(families.iter().map(|f| f.get_name().to_string()).collect::<Vec<_>>());
        }

        assert_eq!(runner.calls.load(Ordering::SeqCst), 4);
        assert_eq!(runner.max_active.load(Ordering::SeqCst), 1);
        assert!(name_sets.windows(2).all(|w| w[0] == w[1]));
    }
}
