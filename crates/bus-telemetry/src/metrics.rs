//! Prometheus metrics for the bus, the dispatcher and the call client.
//!
//! All metrics follow the naming convention: `pb_<component>_<metric>_<unit>`
//!
//! Bus and dispatcher keep their own atomic counters. The runtime copies
//! their stats snapshots into the labelled gauges below with
//! [`mirror_stats`], so the libraries never touch the global registry.

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry, TextEncoder,
};
use serde::Serialize;
use serde_json::Value;

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // BUS METRICS
    // =========================================================================

    /// Bus statistics by session, one series per stats field.
    pub static ref BUS_STATS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pb_bus_stat", "Bus statistics mirrored from the bus snapshot"),
        &["session", "stat"]
    ).expect("metric creation failed");

    /// Buses currently registered.
    pub static ref BUS_SESSIONS: IntGauge = IntGauge::new(
        "pb_bus_sessions",
        "Number of live buses"
    ).expect("metric creation failed");

    // =========================================================================
    // DISPATCHER METRICS
    // =========================================================================

    /// Dispatcher statistics, one series per stats field.
    pub static ref DISPATCHER_STATS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pb_dispatcher_stat", "Dispatcher statistics mirrored from the dispatcher snapshot"),
        &["session", "stat"]
    ).expect("metric creation failed");

    // =========================================================================
    // CLIENT METRICS
    // =========================================================================

    /// Client statistics, one series per stats field.
    pub static ref CLIENT_STATS: IntGaugeVec = IntGaugeVec::new(
        Opts::new("pb_client_stat", "Call client statistics mirrored from the client snapshot"),
        &["session", "stat"]
    ).expect("metric creation failed");

    /// Calls by tool and outcome.
    pub static ref CALLS: IntCounterVec = IntCounterVec::new(
        Opts::new("pb_client_calls_total", "Calls issued by the runtime"),
        &["tool", "outcome"]  // outcome: ok/remote_error/timeout/undeliverable
    ).expect("metric creation failed");

    /// Round trip from issuing a call to its answer.
    pub static ref CALL_ROUND_TRIP: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "pb_client_call_round_trip_seconds",
            "Time from issuing a call to receiving its result or error"
        ).buckets(exponential_buckets(0.0005, 2.0, 16).expect("valid buckets"))
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call twice.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Bus
        Box::new(BUS_STATS.clone()),
        Box::new(BUS_SESSIONS.clone()),
        // Dispatcher
        Box::new(DISPATCHER_STATS.clone()),
        // Client
        Box::new(CLIENT_STATS.clone()),
        Box::new(CALLS.clone()),
        Box::new(CALL_ROUND_TRIP.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Copy every integer field of `stats` into `gauge`, labelled
/// `{session, stat=<field name>}`. Returns the number of series set.
///
/// `stats` must serialize to a flat JSON object; nested and non-integer
/// fields are skipped.
pub fn mirror_stats<T: Serialize>(
    gauge: &IntGaugeVec,
    session: &str,
    stats: &T,
) -> Result<usize, TelemetryError> {
    let value = serde_json::to_value(stats).map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let Value::Object(fields) = value else {
        return Err(TelemetryError::MetricsInit(
            "stats must serialize to an object".to_string(),
        ));
    };

    let mut set = 0;
    for (name, field) in &fields {
        if let Some(n) = field.as_u64() {
            gauge
                .with_label_values(&[session, name.as_str()])
                .set(i64::try_from(n).unwrap_or(i64::MAX));
            set += 1;
        }
    }
    Ok(set)
}

/// Drop every series of `session` from the stats gauges.
pub fn forget_session(session: &str) {
    for gauge in [&*BUS_STATS, &*DISPATCHER_STATS, &*CLIENT_STATS] {
        for family in gauge.collect() {
            for metric in family.get_metric() {
                let labels = metric.get_label();
                let matches = labels
                    .iter()
                    .any(|l| l.get_name() == "session" && l.get_value() == session);
                if !matches {
                    continue;
                }
                if let Some(stat) = labels.iter().find(|l| l.get_name() == "stat") {
                    let _ = gauge.remove_label_values(&[session, stat.get_value()]);
                }
            }
        }
    }
}

/// Encode all metrics as Prometheus text format.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    /// Start a new timer for the given histogram.
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        let duration = self.start.elapsed().as_secs_f64();
        self.histogram.observe(duration);
    }
}

/// Start timing for a histogram. Observation happens on drop.
#[macro_export]
macro_rules! time_histogram {
    ($histogram:expr) => {
        $crate::metrics::HistogramTimer::new(&$histogram)
    };
}
