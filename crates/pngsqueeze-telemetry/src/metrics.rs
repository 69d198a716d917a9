//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Exposes the counters and gauges an operator needs to size the compression pool.

use std::convert::TryFrom;
use std::sync::Arc;
use std::time::Duration;

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts, Registry,
    TextEncoder, core::Collector,
};
use serde::Serialize;

use crate::error::{Result, TelemetryError};

const JOB_DURATION_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0];

/// Prometheus-backed metrics registry shared across the service.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    http_requests_total: IntCounterVec,
    compression_jobs_total: IntCounterVec,
    compression_bytes_in_total: IntCounter,
    compression_bytes_out_total: IntCounter,
    compression_jobs_in_flight: IntGauge,
    compression_jobs_waiting: IntGauge,
    compression_overload_total: IntCounter,
    compression_job_duration_seconds: Histogram,
}

/// Point-in-time view of the pool gauges and job counters.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    /// Jobs currently holding a concurrency slot.
    pub jobs_in_flight: i64,
    /// Jobs queued for a slot.
    pub jobs_waiting: i64,
    /// Requests refused for lack of capacity.
    pub overload_total: u64,
    /// Total bytes received for compression.
    pub bytes_in_total: u64,
    /// Total bytes returned to clients.
    pub bytes_out_total: u64,
}

impl Metrics {
    /// Construct a registry with every collector registered.
    ///
    /// # Errors
    ///
    /// Returns an error if a collector cannot be built or registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("http_requests_total", "Total HTTP requests received"),
            &["route", "code"],
        )
        .map_err(collector("http_requests_total"))?;
        let compression_jobs_total = IntCounterVec::new(
            Opts::new(
                "compression_jobs_total",
                "Compression jobs finished, by outcome",
            ),
            &["outcome"],
        )
        .map_err(collector("compression_jobs_total"))?;
        let compression_bytes_in_total = IntCounter::with_opts(Opts::new(
            "compression_bytes_in_total",
            "Bytes of validated uploads accepted for compression",
        ))
        .map_err(collector("compression_bytes_in_total"))?;
        let compression_bytes_out_total = IntCounter::with_opts(Opts::new(
            "compression_bytes_out_total",
            "Bytes of compressed images returned to clients",
        ))
        .map_err(collector("compression_bytes_out_total"))?;
        let compression_jobs_in_flight = IntGauge::with_opts(Opts::new(
            "compression_jobs_in_flight",
            "Jobs currently holding a compression slot",
        ))
        .map_err(collector("compression_jobs_in_flight"))?;
        let compression_jobs_waiting = IntGauge::with_opts(Opts::new(
            "compression_jobs_waiting",
            "Jobs queued for a compression slot",
        ))
        .map_err(collector("compression_jobs_waiting"))?;
        let compression_overload_total = IntCounter::with_opts(Opts::new(
            "compression_overload_total",
            "Requests refused because every compression slot was busy",
        ))
        .map_err(collector("compression_overload_total"))?;
        let compression_job_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "compression_job_duration_seconds",
                "Wall-clock time of one compression tool invocation",
            )
            .buckets(JOB_DURATION_BUCKETS.to_vec()),
        )
        .map_err(collector("compression_job_duration_seconds"))?;

        register(&registry, "http_requests_total", &http_requests_total)?;
        register(&registry, "compression_jobs_total", &compression_jobs_total)?;
        register(
            &registry,
            "compression_bytes_in_total",
            &compression_bytes_in_total,
        )?;
        register(
            &registry,
            "compression_bytes_out_total",
            &compression_bytes_out_total,
        )?;
        register(
            &registry,
            "compression_jobs_in_flight",
            &compression_jobs_in_flight,
        )?;
        register(
            &registry,
            "compression_jobs_waiting",
            &compression_jobs_waiting,
        )?;
        register(
            &registry,
            "compression_overload_total",
            &compression_overload_total,
        )?;
        register(
            &registry,
            "compression_job_duration_seconds",
            &compression_job_duration_seconds,
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                http_requests_total,
                compression_jobs_total,
                compression_bytes_in_total,
                compression_bytes_out_total,
                compression_jobs_in_flight,
                compression_jobs_waiting,
                compression_overload_total,
                compression_job_duration_seconds,
            }),
        })
    }

    /// Increment the HTTP request counter for the given route and status code.
    pub fn inc_http_request(&self, route: &str, status: u16) {
        let code = status.to_string();
        self.inner
            .http_requests_total
            .with_label_values(&[route, code.as_str()])
            .inc();
    }

    /// Count a finished job under its outcome label (`completed` or a failure kind).
    pub fn inc_job_outcome(&self, outcome: &str) {
        self.inner
            .compression_jobs_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record the bytes accepted and returned for one successful job.
    pub fn add_job_bytes(&self, bytes_in: u64, bytes_out: u64) {
        self.inner.compression_bytes_in_total.inc_by(bytes_in);
        self.inner.compression_bytes_out_total.inc_by(bytes_out);
    }

    /// Set the in-flight job gauge.
    pub fn set_jobs_in_flight(&self, count: usize) {
        self.inner
            .compression_jobs_in_flight
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Set the queued job gauge.
    pub fn set_jobs_waiting(&self, count: usize) {
        self.inner
            .compression_jobs_waiting
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Count a request refused by the concurrency gate.
    pub fn inc_overload(&self) {
        self.inner.compression_overload_total.inc();
    }

    /// Record the duration of one tool invocation.
    pub fn observe_job_duration(&self, duration: Duration) {
        self.inner
            .compression_job_duration_seconds
            .observe(duration.as_secs_f64());
    }

    /// Render the registry in the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails or the output is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::MetricsEncode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::MetricsUtf8 { source })
    }

    /// Take a point-in-time snapshot of the pool gauges and byte counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_in_flight: self.inner.compression_jobs_in_flight.get(),
            jobs_waiting: self.inner.compression_jobs_waiting.get(),
            overload_total: self.inner.compression_overload_total.get(),
            bytes_in_total: self.inner.compression_bytes_in_total.get(),
            bytes_out_total: self.inner.compression_bytes_out_total.get(),
        }
    }
}

fn collector(name: &'static str) -> impl FnOnce(prometheus::Error) -> TelemetryError {
    move |source| TelemetryError::MetricsCollector { name, source }
}

fn register<C>(registry: &Registry, name: &'static str, collector: &C) -> Result<()>
where
    C: Collector + Clone + 'static,
{
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::MetricsRegister { name, source })
}
