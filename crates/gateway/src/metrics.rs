use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static HTTP_REQUESTS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static HTTP_REQUEST_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static EXPORT_ROWS_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();
static EXPORT_BATCHES_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static EXPORT_ABORTS_TOTAL: OnceLock<IntCounter> = OnceLock::new();
static FILTER_STORE_FAILURES_TOTAL: OnceLock<IntCounterVec> = OnceLock::new();

fn registry() -> &'static Registry {
    REGISTRY.get_or_init(Registry::new)
}

fn register_collector<T>(collector: T) -> T
where
    T: prometheus::core::Collector + Clone + 'static,
{
    let _ = registry().register(Box::new(collector.clone()));
    collector
}

fn http_requests_total() -> &'static IntCounterVec {
    HTTP_REQUESTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "parcelgate_http_requests_total",
                    "Parcel gateway HTTP request count.",
                ),
                &["route", "method", "status"],
            )
            .expect("create parcelgate_http_requests_total"),
        )
    })
}

fn http_request_duration_seconds() -> &'static HistogramVec {
    HTTP_REQUEST_DURATION_SECONDS.get_or_init(|| {
        register_collector(
            HistogramVec::new(
                HistogramOpts::new(
                    "parcelgate_http_request_duration_seconds",
                    "Parcel gateway HTTP request duration in seconds.",
                )
                .buckets(vec![
                    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0,
                ]),
                &["route", "method", "outcome"],
            )
            .expect("create parcelgate_http_request_duration_seconds"),
        )
    })
}

fn export_rows_total() -> &'static IntCounterVec {
    EXPORT_ROWS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "parcelgate_export_rows_total",
                    "CSV rows written by parcel exports.",
                ),
                &["tier"],
            )
            .expect("create parcelgate_export_rows_total"),
        )
    })
}

fn export_batches_total() -> &'static IntCounter {
    EXPORT_BATCHES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "parcelgate_export_batches_total",
                "Source batches fetched by parcel exports.",
            )
            .expect("create parcelgate_export_batches_total"),
        )
    })
}

fn export_aborts_total() -> &'static IntCounter {
    EXPORT_ABORTS_TOTAL.get_or_init(|| {
        register_collector(
            IntCounter::new(
                "parcelgate_export_aborts_total",
                "Parcel exports aborted after the response started.",
            )
            .expect("create parcelgate_export_aborts_total"),
        )
    })
}

fn filter_store_failures_total() -> &'static IntCounterVec {
    FILTER_STORE_FAILURES_TOTAL.get_or_init(|| {
        register_collector(
            IntCounterVec::new(
                Opts::new(
                    "parcelgate_filter_store_failures_total",
                    "Filter memory operations that failed and were skipped.",
                ),
                &["op"],
            )
            .expect("create parcelgate_filter_store_failures_total"),
        )
    })
}

pub fn observe_http_request(route: &str, method: &str, status: u16, duration: Duration) {
    let status_str = status.to_string();
    http_requests_total()
        .with_label_values(&[route, method, status_str.as_str()])
        .inc();

    let outcome = if (200..400).contains(&status) {
        "success"
    } else {
        "error"
    };
    http_request_duration_seconds()
        .with_label_values(&[route, method, outcome])
        .observe(duration.as_secs_f64());
}

pub fn observe_export_batch(tier: &str, rows: usize) {
    export_batches_total().inc();
    export_rows_total()
        .with_label_values(&[tier])
        .inc_by(rows as u64);
}

pub fn inc_export_abort() {
    export_aborts_total().inc();
}

#[cfg(test)]
pub(crate) fn export_aborts() -> u64 {
    export_aborts_total().get()
}

pub fn inc_filter_store_failure(op: &str) {
    filter_store_failures_total()
        .with_label_values(&[op])
        .inc();
}

pub fn render() -> Result<(Vec<u8>, String), prometheus::Error> {
    let _ = export_batches_total();
    let _ = export_aborts_total();

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok((buffer, encoder.format_type().to_string()))
}
