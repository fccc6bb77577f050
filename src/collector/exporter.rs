//! Metrics about the exporter process itself.
//!
//! These are shared by every collector in the process, unlike the per-scrape
//! probe gauges.

use std::sync::OnceLock;

use prometheus::{Histogram, HistogramOpts, IntCounter, IntGaugeVec, Opts, Registry};

const DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 20.0, 30.0, 45.0, 60.0, 120.0, 300.0];

/// Process-wide exporter metrics. Clones share the same underlying values.
#[derive(Clone)]
pub struct ExporterMetrics {
    pub duration: Histogram,
    pub errors: IntCounter,
    build_info: IntGaugeVec,
}

impl Default for ExporterMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ExporterMetrics {
    /// Fresh, unregistered metrics. Production code uses [`ExporterMetrics::global`].
    pub fn new() -> Self {
        let duration = Histogram::with_opts(
            HistogramOpts::new(
                "iperf3_exporter_duration_seconds",
                "Duration of collections by the iperf3 exporter.",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
        )
        .expect("valid duration histogram");

        let errors = IntCounter::new(
            "iperf3_exporter_errors_total",
            "Errors raised by the iperf3 exporter.",
        )
        .expect("valid error counter");

        let build_info = IntGaugeVec::new(
            Opts::new(
                "iperf3_exporter_build_info",
                "A metric with a constant '1' value labeled by the exporter version.",
            ),
            &["version"],
        )
        .expect("valid build info gauge");
        build_info
            .with_label_values(&[env!("CARGO_PKG_VERSION")])
            .set(1);

        Self {
            duration,
            errors,
            build_info,
        }
    }

    /// The process-wide instance.
    pub fn global() -> &'static ExporterMetrics {
        static METRICS: OnceLock<ExporterMetrics> = OnceLock::new();
        METRICS.get_or_init(ExporterMetrics::new)
    }

    pub fn register(&self, registry: &Registry) -> prometheus::Result<()> {
        registry.register(Box::new(self.duration.clone()))?;
        registry.register(Box::new(self.errors.clone()))?;
        registry.register(Box::new(self.build_info.clone()))?;
        Ok(())
    }
}
