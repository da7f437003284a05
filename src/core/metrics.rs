// src/core/metrics.rs

//! Defines and registers Prometheus metrics for driver monitoring.
//!
//! This module uses `lazy_static` to ensure that metrics are registered only
//! once globally for the entire application lifecycle.

use lazy_static::lazy_static;
use prometheus::{
    Counter, CounterVec, Gauge, TextEncoder, register_counter, register_counter_vec,
    register_gauge,
};

lazy_static! {
    /// The number of currently live oplog observe drivers.
    pub static ref OBSERVE_DRIVERS_OPLOG: Gauge =
        register_gauge!("tailview_observe_drivers_oplog", "Number of live oplog observe drivers.").unwrap();

    /// Cumulative time spent in each driver phase, labeled by phase name.
    pub static ref PHASE_TIME_SECONDS: CounterVec =
        register_counter_vec!("tailview_phase_time_seconds_total", "Time spent in each driver phase, in seconds.", &["phase"]).unwrap();

    /// The total number of full requeries issued by observe drivers.
    pub static ref POLL_QUERIES_TOTAL: Counter =
        register_counter!("tailview_poll_queries_total", "Total number of full poll queries issued.").unwrap();

    /// The total number of point document fetches issued to resolve
    /// ambiguous updates.
    pub static ref DOC_FETCHES_TOTAL: Counter =
        register_counter!("tailview_doc_fetches_total", "Total number of point document fetches issued.").unwrap();
}

/// Gathers all registered metrics and encodes them in the Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode_to_string(&metric_families).unwrap_or_default()
}
