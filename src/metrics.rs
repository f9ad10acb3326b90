//! Prometheus metrics.

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{
    self, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry,
};

lazy_static! {
    // Registry for holding metric state
    pub static ref REGISTRY: Registry = Registry::new();
    // Task counter by outcome
    pub static ref APPLY_TASKS: IntCounterVec = IntCounterVec::new(
        Opts::new("apply_tasks", "The number of apply tasks completed by this rank"),
        &["outcome"]
    ).unwrap();
    // Fragment counter
    pub static ref APPLY_FRAGMENTS: IntCounter = IntCounter::new(
        "apply_fragments", "The number of fragments produced by this rank"
    ).unwrap();
    // Fragment histogram by transformation time
    pub static ref APPLY_FRAGMENT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new("apply_fragment_seconds", "The time taken to produce each fragment")
    ).unwrap();
    // Broadcast volume
    pub static ref APPLY_BROADCAST_BYTES: IntCounter = IntCounter::new(
        "apply_broadcast_bytes", "The number of bytes received through broadcasts"
    ).unwrap();
}

/// Register all metrics with [REGISTRY].
///
/// Metrics registered by an earlier call are left in place.
pub fn register_metrics() -> Result<(), prometheus::Error> {
    let collectors: [Box<dyn Collector>; 4] = [
        Box::new(APPLY_TASKS.clone()),
        Box::new(APPLY_FRAGMENTS.clone()),
        Box::new(APPLY_FRAGMENT_SECONDS.clone()),
        Box::new(APPLY_BROADCAST_BYTES.clone()),
    ];
    for collector in collectors {
        match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => (),
            Err(err) => return Err(err),
        }
    }
    Ok(())
}

/// Render the registered metrics in the Prometheus text format.
pub fn gather() -> Result<String, prometheus::Error> {
    let encoder = prometheus::TextEncoder::new();
    let mut buffer = Vec::new();
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

/// Count a finished task, labelled by outcome
pub fn record_task(succeeded: bool) {
    let outcome = if succeeded { "success" } else { "failure" };
    APPLY_TASKS.with_label_values(&[outcome]).inc();
}

/// Count a produced fragment and the time it took
pub fn record_fragment(elapsed: std::time::Duration) {
    APPLY_FRAGMENTS.inc();
    APPLY_FRAGMENT_SECONDS.observe(elapsed.as_secs_f64());
}
