//! Metrics sink boundary.
//!
//! Session and relation code never touch `obs::metrics` directly.
//! All instrumentation flows through MetricsEvent and MetricsSink.
use crate::obs::metrics;
use std::cell::Cell;

thread_local! {
    static SINK_OVERRIDE: Cell<Option<&'static dyn MetricsSink>> = const { Cell::new(None) };
}

///
/// ExecKind
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecKind {
    Load,
    Count,
    Save,
    Delete,
}

///
/// MetricsEvent
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MetricsEvent<'a> {
    ExecStart {
        kind: ExecKind,
        table: &'a str,
    },
    ExecFinish {
        kind: ExecKind,
        table: &'a str,
        rows: u64,
    },
    HydrationLookup {
        table: &'a str,
        ids: u64,
    },
    ReferrerScan {
        table: &'a str,
        candidates: u64,
        confirmed: u64,
    },
    DeleteBlocked {
        table: &'a str,
    },
    StaleVersion {
        table: &'a str,
    },
}

///
/// MetricsSink
///

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: MetricsEvent<'_>);
}

/// GlobalMetricsSink
/// Default process-local sink that writes into the thread-local metrics state.
/// Acts as the concrete sink when neither a session sink nor a scoped override
/// is installed.

pub(crate) struct GlobalMetricsSink;

impl MetricsSink for GlobalMetricsSink {
    fn record(&self, event: MetricsEvent<'_>) {
        metrics::with_state_mut(|m| match event {
            MetricsEvent::ExecStart { kind, table } => {
                let entry = m.tables.entry(table.to_string()).or_default();
                match kind {
                    ExecKind::Load => {
                        m.ops.load_calls = m.ops.load_calls.saturating_add(1);
                        entry.load_calls = entry.load_calls.saturating_add(1);
                    }
                    ExecKind::Count => {
                        m.ops.count_calls = m.ops.count_calls.saturating_add(1);
                        entry.count_calls = entry.count_calls.saturating_add(1);
                    }
                    ExecKind::Save => {
                        m.ops.save_calls = m.ops.save_calls.saturating_add(1);
                        entry.save_calls = entry.save_calls.saturating_add(1);
                    }
                    ExecKind::Delete => {
                        m.ops.delete_calls = m.ops.delete_calls.saturating_add(1);
                        entry.delete_calls = entry.delete_calls.saturating_add(1);
                    }
                }
            }

            MetricsEvent::ExecFinish { kind, table, rows } => {
                let entry = m.tables.entry(table.to_string()).or_default();
                match kind {
                    ExecKind::Load => {
                        m.ops.rows_loaded = m.ops.rows_loaded.saturating_add(rows);
                        entry.rows_loaded = entry.rows_loaded.saturating_add(rows);
                    }
                    ExecKind::Save => {
                        m.ops.rows_saved = m.ops.rows_saved.saturating_add(rows);
                        entry.rows_saved = entry.rows_saved.saturating_add(rows);
                    }
                    ExecKind::Delete => {
                        m.ops.rows_deleted = m.ops.rows_deleted.saturating_add(rows);
                        entry.rows_deleted = entry.rows_deleted.saturating_add(rows);
                    }
                    ExecKind::Count => {}
                }
            }

            MetricsEvent::HydrationLookup { table, ids } => {
                m.ops.hydration_lookups = m.ops.hydration_lookups.saturating_add(1);
                m.ops.hydration_ids = m.ops.hydration_ids.saturating_add(ids);
                let entry = m.tables.entry(table.to_string()).or_default();
                entry.hydration_lookups = entry.hydration_lookups.saturating_add(1);
            }

            MetricsEvent::ReferrerScan {
                candidates,
                confirmed,
                ..
            } => {
                m.ops.referrer_candidates = m.ops.referrer_candidates.saturating_add(candidates);
                m.ops.referrers_confirmed = m.ops.referrers_confirmed.saturating_add(confirmed);
            }

            MetricsEvent::DeleteBlocked { table } => {
                m.ops.delete_blocks = m.ops.delete_blocks.saturating_add(1);
                let entry = m.tables.entry(table.to_string()).or_default();
                entry.delete_blocks = entry.delete_blocks.saturating_add(1);
            }

            MetricsEvent::StaleVersion { table } => {
                m.ops.stale_versions = m.ops.stale_versions.saturating_add(1);
                let entry = m.tables.entry(table.to_string()).or_default();
                entry.stale_versions = entry.stale_versions.saturating_add(1);
            }
        });
    }
}

pub(crate) const GLOBAL_METRICS_SINK: GlobalMetricsSink = GlobalMetricsSink;

/// Route one event to the scoped override, or the global sink.
pub(crate) fn record(event: MetricsEvent<'_>) {
    match SINK_OVERRIDE.with(Cell::get) {
        Some(sink) => sink.record(event),
        None => GLOBAL_METRICS_SINK.record(event),
    }
}

/// Route one event to a session-pinned sink when present.
pub(crate) fn record_to(sink: Option<&'static dyn MetricsSink>, event: MetricsEvent<'_>) {
    match sink {
        Some(sink) => sink.record(event),
        None => record(event),
    }
}

/// Row counts arrive as `usize`; events carry `u64`.
pub(crate) fn count(n: usize) -> u64 {
    u64::try_from(n).unwrap_or(u64::MAX)
}

/// Snapshot the current metrics state.
#[must_use]
pub fn metrics_report() -> metrics::EventReport {
    metrics::report()
}

/// Reset all metrics state.
pub fn metrics_reset_all() {
    metrics::reset_all();
}

/// Run a closure with a temporary metrics sink override on this thread.
///
/// Sessions constructed with their own sink ignore the override.
pub fn with_metrics_sink<T>(sink: &'static dyn MetricsSink, f: impl FnOnce() -> T) -> T {
    struct Guard(Option<&'static dyn MetricsSink>);

    impl Drop for Guard {
        fn drop(&mut self) {
            SINK_OVERRIDE.with(|cell| cell.set(self.0));
        }
    }

    let prev = SINK_OVERRIDE.with(|cell| cell.replace(Some(sink)));
    let _guard = Guard(prev);

    f()
}

/// Span
/// RAII guard that emits start/finish events for one session operation.
/// Finish accounting happens even on early return or unwind.

pub(crate) struct Span<'a> {
    sink: Option<&'static dyn MetricsSink>,
    kind: ExecKind,
    table: &'a str,
    rows: u64,
}

impl<'a> Span<'a> {
    pub(crate) fn new(sink: Option<&'static dyn MetricsSink>, kind: ExecKind, table: &'a str) -> Self {
        record_to(sink, MetricsEvent::ExecStart { kind, table });

        Self {
            sink,
            kind,
            table,
            rows: 0,
        }
    }

    pub(crate) const fn set_rows(&mut self, rows: u64) {
        self.rows = rows;
    }
}

impl Drop for Span<'_> {
    fn drop(&mut self) {
        record_to(
            self.sink,
            MetricsEvent::ExecFinish {
                kind: self.kind,
                table: self.table,
                rows: self.rows,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        panic::{AssertUnwindSafe, catch_unwind},
        sync::atomic::{AtomicUsize, Ordering},
    };

    struct CountingSink {
        calls: AtomicUsize,
    }

    impl MetricsSink for CountingSink {
        fn record(&self, _: MetricsEvent<'_>) {
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn leak_sink() -> &'static CountingSink {
        Box::leak(Box::new(CountingSink {
            calls: AtomicUsize::new(0),
        }))
    }

    #[test]
    fn with_metrics_sink_routes_and_restores_nested_overrides() {
        let outer = leak_sink();
        let inner = leak_sink();

        with_metrics_sink(outer, || {
            record(MetricsEvent::DeleteBlocked { table: "a" });
            with_metrics_sink(inner, || {
                record(MetricsEvent::DeleteBlocked { table: "b" });
            });
            record(MetricsEvent::DeleteBlocked { table: "c" });
        });

        assert_eq!(outer.calls.load(Ordering::SeqCst), 2);
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
        assert!(SINK_OVERRIDE.with(Cell::get).is_none());
    }

    #[test]
    fn with_metrics_sink_restores_override_on_panic() {
        let sink = leak_sink();

        let panicked = catch_unwind(AssertUnwindSafe(|| {
            with_metrics_sink(sink, || {
                record(MetricsEvent::StaleVersion { table: "t" });
                panic!("intentional panic for guard test");
            });
        }))
        .is_err();

        assert!(panicked);
        assert_eq!(sink.calls.load(Ordering::SeqCst), 1);
        assert!(SINK_OVERRIDE.with(Cell::get).is_none());
    }

    #[test]
    fn pinned_sink_wins_over_override() {
        let pinned = leak_sink();
        let scoped = leak_sink();

        with_metrics_sink(scoped, || {
            record_to(Some(pinned), MetricsEvent::DeleteBlocked { table: "t" });
        });

        assert_eq!(pinned.calls.load(Ordering::SeqCst), 1);
        assert_eq!(scoped.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn span_and_relation_events_accumulate_globally() {
        metrics_reset_all();

        {
            let mut span = Span::new(None, ExecKind::Delete, "users");
            span.set_rows(3);
        }
        record(MetricsEvent::HydrationLookup {
            table: "addresses",
            ids: 4,
        });
        record(MetricsEvent::ReferrerScan {
            table: "orders",
            candidates: 5,
            confirmed: 2,
        });

        let report = metrics_report();
        assert_eq!(report.ops.delete_calls, 1);
        assert_eq!(report.ops.rows_deleted, 3);
        assert_eq!(report.ops.hydration_lookups, 1);
        assert_eq!(report.ops.hydration_ids, 4);
        assert_eq!(report.ops.referrer_candidates, 5);
        assert_eq!(report.ops.referrers_confirmed, 2);

        let users = report.tables.get("users").expect("users counters");
        assert_eq!(users.rows_deleted, 3);
    }
}
