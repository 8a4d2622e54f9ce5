//! Observability: runtime counters and the sink abstraction.
//!
//! This module never touches storage; sessions emit events and the sink
//! decides where they go.

pub(crate) mod metrics;
pub(crate) mod sink;

// re-exports
pub use metrics::{EventOps, EventReport, TableCounters};
pub use sink::{
    ExecKind, MetricsEvent, MetricsSink, metrics_report, metrics_reset_all, with_metrics_sink,
};
