//! Prometheus metrics for ocr-dispatch, behind the `metrics` feature.
//!
//! # Metrics
//!
//! ## Counters
//! - `ocr_dispatch_jobs_submitted_total` - jobs admitted, by action and lane
//! - `ocr_dispatch_jobs_completed_total` - settled worker operations, by action and status
//! - `ocr_dispatch_jobs_rejected_total` - queued jobs rejected at termination
//!
//! ## Gauges
//! - `ocr_dispatch_queue_depth` - jobs waiting per lane
//!
//! ## Histograms
//! - `ocr_dispatch_job_duration_seconds` - worker operation wall time
#![cfg(feature = "metrics")]

use prometheus::{
    CounterVec, GaugeVec, HistogramVec, IntCounter, Opts, Registry,
    exponential_buckets,
};
use std::sync::LazyLock;

/// Global Prometheus registry for ocr-dispatch metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Labels: `action`, `lane`.
pub static JOBS_SUBMITTED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "ocr_dispatch_jobs_submitted_total",
        "Total number of jobs admitted to the queue",
    );
    CounterVec::new(opts, &["action", "lane"])
        .expect("ocr_dispatch_jobs_submitted_total metric creation failed")
});

/// Labels: `action`, `status` (`success`, `batch`, `failed`).
pub static JOBS_COMPLETED_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        "ocr_dispatch_jobs_completed_total",
        "Total number of settled worker operations",
    );
    CounterVec::new(opts, &["action", "status"])
        .expect("ocr_dispatch_jobs_completed_total metric creation failed")
});

pub static JOBS_REJECTED_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "ocr_dispatch_jobs_rejected_total",
        "Total number of queued jobs rejected at termination",
    )
    .expect("ocr_dispatch_jobs_rejected_total metric creation failed")
});

/// Labels: `lane` (`high`, `normal`).
pub static QUEUE_DEPTH: LazyLock<GaugeVec> = LazyLock::new(|| {
    let opts = Opts::new("ocr_dispatch_queue_depth", "Jobs waiting for a worker");
    GaugeVec::new(opts, &["lane"])
        .expect("ocr_dispatch_queue_depth metric creation failed")
});

/// Labels: `action`, `status`.
pub static JOB_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let buckets =
        exponential_buckets(0.005, 2.0, 15).expect("bucket creation failed");
    let opts = prometheus::HistogramOpts::new(
        "ocr_dispatch_job_duration_seconds",
        "Worker operation duration in seconds",
    )
    .buckets(buckets);
    HistogramVec::new(opts, &["action", "status"])
        .expect("ocr_dispatch_job_duration_seconds metric creation failed")
});

/// Register all collectors with [`REGISTRY`]. Safe to call more than once.
pub fn init_metrics() -> anyhow::Result<()> {
    let registry = &*REGISTRY;

    for metric in [
        Box::new(JOBS_SUBMITTED_TOTAL.clone()) as Box<dyn prometheus::core::Collector>,
        Box::new(JOBS_COMPLETED_TOTAL.clone()),
        Box::new(JOBS_REJECTED_TOTAL.clone()),
        Box::new(QUEUE_DEPTH.clone()),
        Box::new(JOB_DURATION_SECONDS.clone()),
    ] {
        if let Err(e) = registry.register(metric) {
            if !matches!(e, prometheus::Error::AlreadyReg) {
                return Err(e.into());
            }
        }
    }

    Ok(())
}

pub fn record_job_submitted(action: &str, lane: &str) {
    JOBS_SUBMITTED_TOTAL.with_label_values(&[action, lane]).inc();
}

pub fn record_job_completed(action: &str, status: &str) {
    JOBS_COMPLETED_TOTAL.with_label_values(&[action, status]).inc();
}

pub fn record_jobs_rejected(count: u64) {
    JOBS_REJECTED_TOTAL.inc_by(count);
}

pub fn set_queue_depth(lane: &str, depth: f64) {
    QUEUE_DEPTH.with_label_values(&[lane]).set(depth);
}

pub fn observe_job_duration(action: &str, status: &str, duration_secs: f64) {
    JOB_DURATION_SECONDS
        .with_label_values(&[action, status])
        .observe(duration_secs);
}

/// Gather all registered metrics in Prometheus text format.
pub fn gather_metrics() -> anyhow::Result<String> {
    let encoder = prometheus::TextEncoder::new();
    let metric_families = REGISTRY.gather();
    encoder
        .encode_to_string(&metric_families)
        .map_err(Into::into)
}
