#![allow(dead_code)]

use sqldoc_core::{
    config::DbConfig,
    db::{Db, Registry, SqliteAdapter, TableSpec},
    obs::{MetricsEvent, MetricsSink},
};
use std::sync::{
    Mutex,
    atomic::{AtomicU64, Ordering},
};

pub fn registry() -> Registry {
    Registry::new()
        .with_table(TableSpec::new("users").relation("address", "addresses"))
        .and_then(|r| r.with_table(TableSpec::new("addresses").relation("resident", "users")))
        .and_then(|r| r.with_table(TableSpec::new("orders").relation("customer", "users")))
        .and_then(|r| r.with_table(TableSpec::new("tags")))
        .and_then(|r| r.with_table(TableSpec::new("posts").relation("tags", "tags")))
        .and_then(|r| r.with_table(TableSpec::new("authors").relation("favorite", "books")))
        .and_then(|r| r.with_table(TableSpec::new("books").relation("author", "authors")))
        .and_then(|r| r.with_table(TableSpec::new("reviews").relation("book", "books")))
        .and_then(|r| r.with_table(TableSpec::new("accounts").versioned()))
        .and_then(|r| {
            r.with_table(
                TableSpec::new("nodes")
                    .relation("left", "nodes")
                    .relation("right", "nodes"),
            )
        })
        .expect("registry")
}

pub const TABLES: [&str; 9] = [
    "users", "addresses", "orders", "tags", "posts", "authors", "books", "reviews", "nodes",
];

pub fn open_with(config: DbConfig) -> Db<SqliteAdapter> {
    let db = Db::new(SqliteAdapter::in_memory().expect("sqlite"), registry()).with_config(config);
    for table in TABLES {
        db.ensure_table(table).expect("table");
    }
    db.ensure_versioned_table("accounts").expect("versioned table");

    db
}

pub fn open() -> Db<SqliteAdapter> {
    open_with(DbConfig::default())
}

///
/// RecordingSink
///
/// Counts lookups per table and keeps every event kind seen, in order.
///

#[derive(Default)]
pub struct RecordingSink {
    pub hydration_lookups: AtomicU64,
    pub referrer_scans: AtomicU64,
    pub stale_versions: AtomicU64,
    pub delete_blocks: AtomicU64,
    pub lookup_tables: Mutex<Vec<String>>,
}

impl RecordingSink {
    pub fn leak() -> &'static Self {
        Box::leak(Box::default())
    }

    pub fn lookups(&self) -> u64 {
        self.hydration_lookups.load(Ordering::SeqCst)
    }

    pub fn tables(&self) -> Vec<String> {
        self.lookup_tables.lock().expect("lock").clone()
    }
}

impl MetricsSink for RecordingSink {
    fn record(&self, event: MetricsEvent<'_>) {
        match event {
            MetricsEvent::HydrationLookup { table, .. } => {
                self.hydration_lookups.fetch_add(1, Ordering::SeqCst);
                self.lookup_tables
                    .lock()
                    .expect("lock")
                    .push(table.to_string());
            }
            MetricsEvent::ReferrerScan { .. } => {
                self.referrer_scans.fetch_add(1, Ordering::SeqCst);
            }
            MetricsEvent::StaleVersion { .. } => {
                self.stale_versions.fetch_add(1, Ordering::SeqCst);
            }
            MetricsEvent::DeleteBlocked { .. } => {
                self.delete_blocks.fetch_add(1, Ordering::SeqCst);
            }
            MetricsEvent::ExecStart { .. } | MetricsEvent::ExecFinish { .. } => {}
        }
    }
}
