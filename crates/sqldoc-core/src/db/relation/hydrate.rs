//! Module: relation::hydrate
//! Responsibility: resolve reference markers in a result set into the target
//! documents, one batched lookup per target table per reference level.
//! Does not own: query compilation or marker shape decisions.
//! Boundary: read-only; the pass state is created fresh per call and never
//! shared between calls.

use crate::{
    db::{
        adapter::{Adapter, AsyncAdapter, Row},
        document::Document,
        registry::{DATA_COLUMN, ID_COLUMN, Registry},
        relation::marker::{Marker, for_each_marker},
        statement::{self, Statement},
    },
    error::InternalError,
    obs::sink::{MetricsEvent, MetricsSink, count, record_to},
};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

///
/// Lookup
///
/// One batched `_id IN (json_each(?))` read against one target table.
///

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Lookup {
    pub table: String,
    pub statement: Statement,
    pub ids: usize,
}

///
/// HydrationPass
///
/// Level-by-level state machine shared by the blocking and async drivers:
/// `next_level` yields the lookups to run, `absorb` feeds their rows back,
/// `finish` rewrites the roots.
///
/// `visited` holds every (table, id) already fetched or requested in this
/// pass, so each distinct node is loaded at most once and cyclic graphs
/// terminate. `finish` applies the same rule to expansion: a node is
/// hydrated in one place and referenced by marker everywhere else.
///

pub(crate) struct HydrationPass<'r> {
    registry: &'r Registry,
    root_table: String,
    max_depth: Option<usize>,
    depth: usize,
    visited: BTreeSet<Marker>,
    frontier: BTreeSet<Marker>,
    loaded: BTreeMap<Marker, JsonValue>,
}

impl<'r> HydrationPass<'r> {
    pub(crate) fn new(
        registry: &'r Registry,
        root_table: &str,
        roots: &[Document],
        max_depth: Option<usize>,
    ) -> Self {
        let mut pass = Self {
            registry,
            root_table: root_table.to_string(),
            max_depth,
            depth: 0,
            visited: BTreeSet::new(),
            frontier: BTreeSet::new(),
            loaded: BTreeMap::new(),
        };

        for doc in roots {
            let marker = Marker::new(root_table, doc.id);
            pass.visited.insert(marker.clone());
            pass.loaded.insert(marker, doc.data.clone());
        }
        for doc in roots {
            pass.discover(&doc.data);
        }

        pass
    }

    // Queue unseen markers into registered tables; anything else stays a marker.
    fn discover(&mut self, payload: &JsonValue) {
        let Self {
            registry,
            visited,
            frontier,
            ..
        } = self;

        for_each_marker(payload, &mut |marker| {
            if !visited.contains(&marker) && registry.contains(&marker.table) {
                frontier.insert(marker);
            }
        });
    }

    /// Lookups for the next reference level; empty when the pass is done.
    pub(crate) fn next_level(&mut self) -> Result<Vec<Lookup>, InternalError> {
        if self.frontier.is_empty() || self.max_depth.is_some_and(|max| self.depth >= max) {
            return Ok(Vec::new());
        }

        let mut by_table: BTreeMap<String, Vec<i64>> = BTreeMap::new();
        for marker in std::mem::take(&mut self.frontier) {
            by_table
                .entry(marker.table.clone())
                .or_default()
                .push(marker.id);
            self.visited.insert(marker);
        }
        self.depth += 1;

        let columns = format!("{ID_COLUMN}, {DATA_COLUMN}");
        let mut lookups = Vec::with_capacity(by_table.len());
        for (table, ids) in by_table {
            let statement = statement::select_by_ids(&table, &ids, &columns)?;
            lookups.push(Lookup {
                table,
                statement,
                ids: ids.len(),
            });
        }
        debug!(depth = self.depth, lookups = lookups.len(), "hydration level");

        Ok(lookups)
    }

    /// Record fetched target rows and queue the markers they carry.
    pub(crate) fn absorb(&mut self, table: &str, rows: &[Row]) -> Result<(), InternalError> {
        for doc in Document::from_rows(table, rows)? {
            self.discover(&doc.data);
            self.loaded.insert(Marker::new(table, doc.id), doc.data);
        }

        Ok(())
    }

    /// Rewrite every root with its loaded children.
    pub(crate) fn finish(self, roots: Vec<Document>) -> Vec<Document> {
        let mut expanded: BTreeSet<Marker> = roots
            .iter()
            .map(|doc| Marker::new(self.root_table.as_str(), doc.id))
            .collect();

        roots
            .into_iter()
            .map(|doc| {
                let data = self.expand(&doc.data, 1, &mut expanded);
                Document::new(doc.id, data)
            })
            .collect()
    }

    // Each node is expanded at its first occurrence (document order, roots
    // first); every later occurrence, cyclic or shared, stays a marker. Depth
    // counts the documents above `value`, the root being 1.
    fn expand(
        &self,
        value: &JsonValue,
        depth: usize,
        expanded: &mut BTreeSet<Marker>,
    ) -> JsonValue {
        if let Some(marker) = Marker::decode(value) {
            let within_depth = self.max_depth.is_none_or(|max| depth <= max);
            let Some(payload) = self.loaded.get(&marker) else {
                return value.clone();
            };
            if !within_depth || expanded.contains(&marker) {
                return value.clone();
            }

            let id = marker.id;
            expanded.insert(marker);
            let mut child = self.expand(payload, depth + 1, expanded);
            if let JsonValue::Object(map) = &mut child {
                map.insert(ID_COLUMN.to_string(), JsonValue::from(id));
            }

            return child;
        }

        match value {
            JsonValue::Object(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.expand(v, depth, expanded)))
                    .collect(),
            ),
            JsonValue::Array(items) => JsonValue::Array(
                items
                    .iter()
                    .map(|v| self.expand(v, depth, expanded))
                    .collect(),
            ),
            other => other.clone(),
        }
    }
}

/// Hydrate `roots` through a blocking adapter.
pub(crate) fn hydrate<A: Adapter + ?Sized>(
    adapter: &A,
    registry: &Registry,
    root_table: &str,
    roots: Vec<Document>,
    max_depth: Option<usize>,
    sink: Option<&'static dyn MetricsSink>,
) -> Result<Vec<Document>, InternalError> {
    if roots.is_empty() {
        return Ok(roots);
    }

    let mut pass = HydrationPass::new(registry, root_table, &roots, max_depth);
    loop {
        let lookups = pass.next_level()?;
        if lookups.is_empty() {
            break;
        }
        for lookup in lookups {
            let rows = adapter.query(&lookup.statement.sql, &lookup.statement.params)?;
            record_to(
                sink,
                MetricsEvent::HydrationLookup {
                    table: &lookup.table,
                    ids: count(lookup.ids),
                },
            );
            pass.absorb(&lookup.table, &rows)?;
        }
    }

    Ok(pass.finish(roots))
}

/// Hydrate `roots` through a cooperative adapter.
pub(crate) async fn hydrate_async<A: AsyncAdapter + ?Sized>(
    adapter: &A,
    registry: &Registry,
    root_table: &str,
    roots: Vec<Document>,
    max_depth: Option<usize>,
    sink: Option<&'static dyn MetricsSink>,
) -> Result<Vec<Document>, InternalError> {
    if roots.is_empty() {
        return Ok(roots);
    }

    let mut pass = HydrationPass::new(registry, root_table, &roots, max_depth);
    loop {
        let lookups = pass.next_level()?;
        if lookups.is_empty() {
            break;
        }
        for lookup in lookups {
            let rows = adapter
                .query(&lookup.statement.sql, &lookup.statement.params)
                .await?;
            record_to(
                sink,
                MetricsEvent::HydrationLookup {
                    table: &lookup.table,
                    ids: count(lookup.ids),
                },
            );
            pass.absorb(&lookup.table, &rows)?;
        }
    }

    Ok(pass.finish(roots))
}
