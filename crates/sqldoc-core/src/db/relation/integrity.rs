//! Module: relation::integrity
//! Responsibility: referrer discovery and delete policies (restrict,
//! set-null, cascade), plus per-row reference validation.
//! Does not own: marker shape decisions or session bookkeeping.
//! Boundary: `restrict` issues no write unless the target is unreferenced;
//! every pass owns a fresh visited set.

use crate::{
    db::{
        adapter::{Adapter, AsyncAdapter, Row},
        document::Document,
        path::Path,
        registry::{DATA_COLUMN, ID_COLUMN, Registry},
        relation::marker::{self, Marker},
        statement::{self, Statement},
    },
    error::{ErrorOrigin, InternalError},
    obs::sink::{MetricsEvent, MetricsSink, count, record_to},
    value::Value,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::{
    collections::{BTreeMap, BTreeSet, VecDeque},
    fmt,
};
use thiserror::Error as ThisError;
use tracing::{debug, warn};

///
/// DeletePolicy
///

#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletePolicy {
    /// Refuse the delete while any referrer exists.
    #[default]
    Restrict,
    /// Null every reference in place, then delete.
    SetNull,
    /// Delete every row reachable through references, then the target.
    Cascade,
}

impl fmt::Display for DeletePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Restrict => "restrict",
            Self::SetNull => "set_null",
            Self::Cascade => "cascade",
        };
        write!(f, "{label}")
    }
}

///
/// Referrer
///
/// A row confirmed to reference the target, with every path the marker sits at.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Referrer {
    pub table: String,
    pub id: i64,
    pub paths: Vec<Path>,
}

impl fmt::Display for Referrer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let paths: Vec<String> = self.paths.iter().map(Path::to_json_path).collect();
        write!(f, "{}#{} at {}", self.table, self.id, paths.join(", "))
    }
}

///
/// IntegrityViolation
///
/// Restrict-policy refusal listing every confirmed referrer.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
#[error(
    "delete of {table}#{id} blocked by {} referrer(s): {}",
    .referrers.len(),
    join_referrers(.referrers)
)]
pub struct IntegrityViolation {
    pub table: String,
    pub id: i64,
    pub referrers: Vec<Referrer>,
}

fn join_referrers(referrers: &[Referrer]) -> String {
    referrers
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

///
/// ReferenceState
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ReferenceState {
    Present,
    Missing,
    /// Target table is not registered, so it is never queried.
    UnregisteredTable,
}

///
/// ReferenceStatus
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferenceStatus {
    pub path: Path,
    pub marker: Marker,
    pub state: ReferenceState,
}

impl ReferenceStatus {
    #[must_use]
    pub fn is_broken(&self) -> bool {
        self.state != ReferenceState::Present
    }
}

///
/// DeleteReport
///
/// Rows removed and referrers rewritten by one delete call.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct DeleteReport {
    pub deleted: Vec<Marker>,
    pub rewritten: Vec<Marker>,
}

// ----------------------------------------------------------------------
// Pure planning shared by both drivers
// ----------------------------------------------------------------------

///
/// ReferrerScan
///
/// Prefiltered candidate read against one registered table.
///

pub(crate) struct ReferrerScan {
    pub table: String,
    pub statement: Statement,
}

///
/// Candidate
///
/// A confirmed referrer plus its decoded payload (needed for set-null).
///

pub(crate) struct Candidate {
    pub referrer: Referrer,
    pub payload: JsonValue,
}

/// One scan per registered table. The textual prefilter only narrows the
/// candidate set; [`confirm`] decides.
pub(crate) fn referrer_scans(
    registry: &Registry,
    target: &Marker,
) -> Result<Vec<ReferrerScan>, InternalError> {
    let [table_fragment, id_fragment] = target.prefilter_fragments();

    registry
        .tables()
        .map(|spec| {
            let table = statement::ident(spec.name())?;
            let mut sql = format!(
                "SELECT {ID_COLUMN}, {DATA_COLUMN} FROM {table} WHERE instr(json({DATA_COLUMN}), ?) > 0 AND instr(json({DATA_COLUMN}), ?) > 0"
            );
            let mut params = vec![
                Value::Text(table_fragment.clone()),
                Value::Text(id_fragment.clone()),
            ];
            if table == target.table {
                sql.push_str(&format!(" AND {ID_COLUMN} != ?"));
                params.push(Value::Int(target.id));
            }

            Ok(ReferrerScan {
                table: table.to_string(),
                statement: Statement { sql, params },
            })
        })
        .collect()
}

/// Structurally confirm prefilter candidates.
pub(crate) fn confirm(
    table: &str,
    rows: &[Row],
    target: &Marker,
) -> Result<Vec<Candidate>, InternalError> {
    let mut out = Vec::new();
    for doc in Document::from_rows(table, rows)? {
        let paths = marker::paths_to(&doc.data, target);
        if !paths.is_empty() {
            out.push(Candidate {
                referrer: Referrer {
                    table: table.to_string(),
                    id: doc.id,
                    paths,
                },
                payload: doc.data,
            });
        }
    }

    Ok(out)
}

/// Rewrite statement nulling every reference to `target` in a candidate.
pub(crate) fn null_rewrite(
    registry: &Registry,
    candidate: &mut Candidate,
    target: &Marker,
) -> Result<Statement, InternalError> {
    marker::null_out(&mut candidate.payload, target);

    statement::rewrite(
        &candidate.referrer.table,
        candidate.referrer.id,
        candidate.payload.to_string(),
        registry.is_versioned(&candidate.referrer.table),
    )
}

///
/// CascadePlan
///
/// Breadth-first closure over referrer edges. Inside a cascade every
/// referrer is cascaded regardless of any other configured policy.
///

pub(crate) struct CascadePlan {
    visited: BTreeSet<Marker>,
    queue: VecDeque<Marker>,
    order: Vec<Marker>,
}

impl CascadePlan {
    pub(crate) fn new(target: Marker) -> Self {
        Self {
            visited: BTreeSet::from([target.clone()]),
            queue: VecDeque::from([target]),
            order: Vec::new(),
        }
    }

    pub(crate) fn next_target(&mut self) -> Option<Marker> {
        let next = self.queue.pop_front()?;
        self.order.push(next.clone());
        Some(next)
    }

    pub(crate) fn absorb(&mut self, referrers: impl IntoIterator<Item = Referrer>) {
        for referrer in referrers {
            let node = Marker::new(referrer.table, referrer.id);
            if self.visited.insert(node.clone()) {
                self.queue.push_back(node);
            }
        }
    }

    /// Rows to delete, in discovery order (target first).
    pub(crate) fn into_order(self) -> Vec<Marker> {
        self.order
    }
}

/// Group every marker in `payload` by target table.
fn references_by_table(payload: &JsonValue) -> BTreeMap<String, Vec<(Path, Marker)>> {
    let mut grouped: BTreeMap<String, Vec<(Path, Marker)>> = BTreeMap::new();
    for (path, marker) in marker::markers_with_paths(payload) {
        grouped
            .entry(marker.table.clone())
            .or_default()
            .push((path, marker));
    }

    grouped
}

fn present_ids(rows: &[Row]) -> Result<BTreeSet<i64>, InternalError> {
    rows.iter().map(|row| row.int(0)).collect()
}

fn classify(
    refs: Vec<(Path, Marker)>,
    present: Option<&BTreeSet<i64>>,
    out: &mut Vec<ReferenceStatus>,
) {
    for (path, marker) in refs {
        let state = match present {
            None => ReferenceState::UnregisteredTable,
            Some(ids) if ids.contains(&marker.id) => ReferenceState::Present,
            Some(_) => ReferenceState::Missing,
        };
        out.push(ReferenceStatus {
            path,
            marker,
            state,
        });
    }
}

fn unique_ids(refs: &[(Path, Marker)]) -> Vec<i64> {
    refs.iter()
        .map(|(_, m)| m.id)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn blocked(
    sink: Option<&'static dyn MetricsSink>,
    target: &Marker,
    referrers: Vec<Referrer>,
) -> InternalError {
    record_to(
        sink,
        MetricsEvent::DeleteBlocked {
            table: &target.table,
        },
    );
    warn!(
        table = %target.table,
        id = target.id,
        referrers = referrers.len(),
        "delete blocked by referrers"
    );

    IntegrityViolation {
        table: target.table.clone(),
        id: target.id,
        referrers,
    }
    .into()
}

fn record_scan(sink: Option<&'static dyn MetricsSink>, table: &str, candidates: usize, confirmed: usize) {
    record_to(
        sink,
        MetricsEvent::ReferrerScan {
            table,
            candidates: count(candidates),
            confirmed: count(confirmed),
        },
    );
}

// ----------------------------------------------------------------------
// Blocking driver
// ----------------------------------------------------------------------

///
/// Integrity
///
/// Blocking integrity engine bound to one adapter and registry.
///

pub(crate) struct Integrity<'a, A: ?Sized> {
    pub adapter: &'a A,
    pub registry: &'a Registry,
    pub sink: Option<&'static dyn MetricsSink>,
}

impl<A: Adapter + ?Sized> Integrity<'_, A> {
    fn candidates(&self, target: &Marker) -> Result<Vec<Candidate>, InternalError> {
        let mut out = Vec::new();
        for scan in referrer_scans(self.registry, target)? {
            let rows = self
                .adapter
                .query(&scan.statement.sql, &scan.statement.params)?;
            let confirmed = confirm(&scan.table, &rows, target)?;
            record_scan(self.sink, &scan.table, rows.len(), confirmed.len());
            out.extend(confirmed);
        }

        Ok(out)
    }

    /// Every confirmed referrer of `target`.
    pub(crate) fn referrers(&self, target: &Marker) -> Result<Vec<Referrer>, InternalError> {
        Ok(self
            .candidates(target)?
            .into_iter()
            .map(|c| c.referrer)
            .collect())
    }

    pub(crate) fn delete(
        &self,
        target: &Marker,
        policy: DeletePolicy,
        transactional: bool,
    ) -> Result<DeleteReport, InternalError> {
        debug!(table = %target.table, id = target.id, %policy, "delete");

        if policy == DeletePolicy::Restrict || !transactional {
            return self.apply(target, policy);
        }

        self.adapter.begin()?;
        match self.apply(target, policy) {
            Ok(report) => {
                self.adapter.commit()?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = self.adapter.rollback() {
                    warn!(error = %rollback, "rollback after failed delete also failed");
                }
                Err(err)
            }
        }
    }

    fn apply(&self, target: &Marker, policy: DeletePolicy) -> Result<DeleteReport, InternalError> {
        let mut report = DeleteReport::default();

        match policy {
            DeletePolicy::Restrict => {
                let referrers = self.referrers(target)?;
                if !referrers.is_empty() {
                    return Err(blocked(self.sink, target, referrers));
                }
                self.delete_row(target, &mut report)?;
            }
            DeletePolicy::SetNull => {
                for mut candidate in self.candidates(target)? {
                    let stmt = null_rewrite(self.registry, &mut candidate, target)?;
                    self.adapter.execute(&stmt.sql, &stmt.params)?;
                    report.rewritten.push(Marker::new(
                        candidate.referrer.table,
                        candidate.referrer.id,
                    ));
                }
                self.delete_row(target, &mut report)?;
            }
            DeletePolicy::Cascade => {
                let mut plan = CascadePlan::new(target.clone());
                while let Some(node) = plan.next_target() {
                    let referrers = self.referrers(&node)?;
                    plan.absorb(referrers);
                }
                for node in plan.into_order() {
                    self.delete_row(&node, &mut report)?;
                }
            }
        }

        Ok(report)
    }

    fn delete_row(&self, node: &Marker, report: &mut DeleteReport) -> Result<(), InternalError> {
        let stmt = statement::delete_by_id(&node.table, node.id)?;
        if self.adapter.execute(&stmt.sql, &stmt.params)?.rows_affected > 0 {
            report.deleted.push(node.clone());
        }

        Ok(())
    }

    /// Check every reference stored in `table#id` against its target table.
    pub(crate) fn validate_references(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Vec<ReferenceStatus>, InternalError> {
        let stmt = statement::select_by_id(table, id)?;
        let rows = self.adapter.query(&stmt.sql, &stmt.params)?;
        let Some(row) = rows.first() else {
            return Err(InternalError::row_not_found(ErrorOrigin::Relation, table, id));
        };
        let doc = Document::from_row(table, row)?;

        let mut out = Vec::new();
        for (target_table, refs) in references_by_table(&doc.data) {
            if !self.registry.contains(&target_table) {
                classify(refs, None, &mut out);
                continue;
            }
            let stmt = statement::select_by_ids(&target_table, &unique_ids(&refs), ID_COLUMN)?;
            let rows = self.adapter.query(&stmt.sql, &stmt.params)?;
            classify(refs, Some(&present_ids(&rows)?), &mut out);
        }

        Ok(out)
    }
}

// ----------------------------------------------------------------------
// Cooperative driver
// ----------------------------------------------------------------------

///
/// AsyncIntegrity
///
/// Async counterpart of [`Integrity`]; identical statements, suspension only
/// at adapter calls.
///

pub(crate) struct AsyncIntegrity<'a, A: ?Sized> {
    pub adapter: &'a A,
    pub registry: &'a Registry,
    pub sink: Option<&'static dyn MetricsSink>,
}

impl<A: AsyncAdapter + ?Sized> AsyncIntegrity<'_, A> {
    async fn candidates(&self, target: &Marker) -> Result<Vec<Candidate>, InternalError> {
        let mut out = Vec::new();
        for scan in referrer_scans(self.registry, target)? {
            let rows = self
                .adapter
                .query(&scan.statement.sql, &scan.statement.params)
                .await?;
            let confirmed = confirm(&scan.table, &rows, target)?;
            record_scan(self.sink, &scan.table, rows.len(), confirmed.len());
            out.extend(confirmed);
        }

        Ok(out)
    }

    pub(crate) async fn referrers(&self, target: &Marker) -> Result<Vec<Referrer>, InternalError> {
        Ok(self
            .candidates(target)
            .await?
            .into_iter()
            .map(|c| c.referrer)
            .collect())
    }

    pub(crate) async fn delete(
        &self,
        target: &Marker,
        policy: DeletePolicy,
        transactional: bool,
    ) -> Result<DeleteReport, InternalError> {
        debug!(table = %target.table, id = target.id, %policy, "delete");

        if policy == DeletePolicy::Restrict || !transactional {
            return self.apply(target, policy).await;
        }

        self.adapter.begin().await?;
        match self.apply(target, policy).await {
            Ok(report) => {
                self.adapter.commit().await?;
                Ok(report)
            }
            Err(err) => {
                if let Err(rollback) = self.adapter.rollback().await {
                    warn!(error = %rollback, "rollback after failed delete also failed");
                }
                Err(err)
            }
        }
    }

    async fn apply(
        &self,
        target: &Marker,
        policy: DeletePolicy,
    ) -> Result<DeleteReport, InternalError> {
        let mut report = DeleteReport::default();

        match policy {
            DeletePolicy::Restrict => {
                let referrers = self.referrers(target).await?;
                if !referrers.is_empty() {
                    return Err(blocked(self.sink, target, referrers));
                }
                self.delete_row(target, &mut report).await?;
            }
            DeletePolicy::SetNull => {
                for mut candidate in self.candidates(target).await? {
                    let stmt = null_rewrite(self.registry, &mut candidate, target)?;
                    self.adapter.execute(&stmt.sql, &stmt.params).await?;
                    report.rewritten.push(Marker::new(
                        candidate.referrer.table,
                        candidate.referrer.id,
                    ));
                }
                self.delete_row(target, &mut report).await?;
            }
            DeletePolicy::Cascade => {
                let mut plan = CascadePlan::new(target.clone());
                while let Some(node) = plan.next_target() {
                    let referrers = self.referrers(&node).await?;
                    plan.absorb(referrers);
                }
                for node in plan.into_order() {
                    self.delete_row(&node, &mut report).await?;
                }
            }
        }

        Ok(report)
    }

    async fn delete_row(
        &self,
        node: &Marker,
        report: &mut DeleteReport,
    ) -> Result<(), InternalError> {
        let stmt = statement::delete_by_id(&node.table, node.id)?;
        if self
            .adapter
            .execute(&stmt.sql, &stmt.params)
            .await?
            .rows_affected
            > 0
        {
            report.deleted.push(node.clone());
        }

        Ok(())
    }

    pub(crate) async fn validate_references(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Vec<ReferenceStatus>, InternalError> {
        let stmt = statement::select_by_id(table, id)?;
        let rows = self.adapter.query(&stmt.sql, &stmt.params).await?;
        let Some(row) = rows.first() else {
            return Err(InternalError::row_not_found(ErrorOrigin::Relation, table, id));
        };
        let doc = Document::from_row(table, row)?;

        let mut out = Vec::new();
        for (target_table, refs) in references_by_table(&doc.data) {
            if !self.registry.contains(&target_table) {
                classify(refs, None, &mut out);
                continue;
            }
            let stmt = statement::select_by_ids(&target_table, &unique_ids(&refs), ID_COLUMN)?;
            let rows = self.adapter.query(&stmt.sql, &stmt.params).await?;
            classify(refs, Some(&present_ids(&rows)?), &mut out);
        }

        Ok(out)
    }
}
