//! Backfill observability metrics
//!
//! Counters and histograms are recorded through the `metrics` facade and are
//! free when no recorder is installed. [`init_metrics`] installs a
//! Prometheus scrape endpoint.

use crate::stage::{ErrorClass, Stage};
use metrics::{counter, describe_counter, describe_histogram, histogram, Unit};
use metrics_exporter_prometheus::PrometheusBuilder;
use once_cell::sync::OnceCell;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tracing::{debug, error, info};

static METRICS_INITIALIZED: OnceCell<SocketAddr> = OnceCell::new();

/// Install the Prometheus exporter on `addr`
///
/// Idempotent: later calls are ignored once an exporter is running.
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    if let Some(existing) = METRICS_INITIALIZED.get() {
        debug!(addr = %existing, "Metrics already initialized, skipping");
        return Ok(());
    }

    info!("Initializing metrics system on {}", addr);

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {e}"))?;

    describe_counter!(
        "periods_completed_total",
        Unit::Count,
        "Total number of periods that reached a successful terminal state"
    );

    describe_counter!(
        "periods_failed_total",
        Unit::Count,
        "Total number of periods that failed or were exhausted"
    );

    describe_counter!(
        "stage_attempts_total",
        Unit::Count,
        "Total number of stage attempts, including retries"
    );

    describe_histogram!(
        "stage_retry_backoff_seconds",
        Unit::Seconds,
        "Backoff slept before a stage retry"
    );

    describe_histogram!(
        "period_duration_seconds",
        Unit::Seconds,
        "Wall time spent executing one period"
    );

    describe_counter!(
        "scd_rows_inserted_total",
        Unit::Count,
        "Dimension versions inserted by the SCD merge"
    );

    describe_counter!(
        "scd_rows_expired_total",
        Unit::Count,
        "Dimension versions closed by the SCD merge"
    );

    let _ = METRICS_INITIALIZED.set(addr);
    Ok(())
}

/// Whether an exporter has been installed
pub fn is_initialized() -> bool {
    METRICS_INITIALIZED.get().is_some()
}

/// Record one stage attempt and its result
pub fn record_stage_attempt(stage: Stage, outcome: Result<(), ErrorClass>) {
    let result = match outcome {
        Ok(()) => "success",
        Err(class) => class.as_str(),
    };
    counter!(
        "stage_attempts_total",
        "stage" => stage.as_str(),
        "result" => result,
    )
    .increment(1);
}

/// Record backoff slept before retrying `stage`
pub fn record_retry_backoff(stage: Stage, duration: Duration, attempt: u32) {
    histogram!(
        "stage_retry_backoff_seconds",
        "stage" => stage.as_str(),
    )
    .record(duration.as_secs_f64());

    debug!(
        stage = %stage,
        attempt = attempt,
        backoff_ms = duration.as_millis() as u64,
        "Retry backoff recorded"
    );
}

/// Record rows changed by one dimension merge
pub fn record_scd_merge(table: &str, inserted: u64, expired: u64) {
    counter!("scd_rows_inserted_total", "table" => table.to_string()).increment(inserted);
    counter!("scd_rows_expired_total", "table" => table.to_string()).increment(expired);
}

/// Timing and outcome of one period
pub struct PeriodMetrics {
    period_key: String,
    start_time: Instant,
}

impl PeriodMetrics {
    /// Start tracking a period
    pub fn start(period_key: impl Into<String>) -> Self {
        Self {
            period_key: period_key.into(),
            start_time: Instant::now(),
        }
    }

    /// Record a successful period
    pub fn record_success(&self, rows: u64) {
        let duration = self.start_time.elapsed();
        counter!("periods_completed_total").increment(1);
        histogram!("period_duration_seconds").record(duration.as_secs_f64());

        info!(
            period = %self.period_key,
            rows = rows,
            duration_ms = duration.as_millis() as u64,
            "Period completed"
        );
    }

    /// Record a failed period
    pub fn record_failure(&self, stage: Stage, class: ErrorClass, error: &str) {
        let duration = self.start_time.elapsed();
        counter!(
            "periods_failed_total",
            "stage" => stage.as_str(),
            "class" => class.as_str(),
        )
        .increment(1);
        histogram!("period_duration_seconds").record(duration.as_secs_f64());

        error!(
            period = %self.period_key,
            stage = %stage,
            class = %class,
            error = %error,
            duration_ms = duration.as_millis() as u64,
            "Period failed"
        );
    }
}

/// Record a period skipped as exhausted
pub fn record_exhausted(period_key: &str, retry_count: u32) {
    counter!(
        "periods_failed_total",
        "stage" => "none",
        "class" => "exhausted",
    )
    .increment(1);

    error!(
        period = %period_key,
        retry_count = retry_count,
        "Period exhausted its retries; not executing"
    );
}
