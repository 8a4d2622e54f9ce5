//! Module: version
//! Responsibility: optimistic concurrency through compare-and-increment
//! updates of the `_version` column.
//! Does not own: table bootstrap or the payload format.
//! Boundary: a failed guard never writes; the stored row is left untouched.

use crate::{
    db::{
        adapter::{Adapter, AsyncAdapter, Row},
        registry::{DATA_COLUMN, ID_COLUMN, VERSION_COLUMN},
        statement::{self, Statement},
    },
    error::{ErrorOrigin, InternalError},
    obs::sink::{MetricsEvent, MetricsSink, record_to},
    value::Value,
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use tracing::warn;

/// Version every row starts at on insert.
pub const INITIAL_VERSION: i64 = 0;

///
/// VersionedDocument
///
/// Direct row read including the version stamp (never part of query
/// projections).
///

#[derive(Clone, Debug, PartialEq)]
pub struct VersionedDocument {
    pub id: i64,
    pub version: i64,
    pub data: JsonValue,
}

impl VersionedDocument {
    pub(crate) fn from_row(table: &str, row: &Row) -> Result<Self, InternalError> {
        let id = row.int(0)?;
        let data = serde_json::from_str(row.text(1)?)
            .map_err(|err| InternalError::payload_corruption(table, id, err))?;
        let version = row.int(2)?;

        Ok(Self { id, version, data })
    }

    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, InternalError> {
        crate::db::document::Document::new(self.id, self.data.clone()).decode()
    }
}

/// `UPDATE ... WHERE _id = ? AND _version = ?`, bumping the stamp on success.
pub(crate) fn compare_and_increment(
    table: &str,
    id: i64,
    payload: String,
    observed: i64,
) -> Result<Statement, InternalError> {
    let table = statement::ident(table)?;

    Ok(Statement {
        sql: format!(
            "UPDATE {table} SET {DATA_COLUMN} = json(?), {VERSION_COLUMN} = {VERSION_COLUMN} + 1 WHERE {ID_COLUMN} = ? AND {VERSION_COLUMN} = ?"
        ),
        params: vec![Value::Text(payload), Value::Int(id), Value::Int(observed)],
    })
}

// Zero rows updated: either the row is gone or someone else moved the stamp.
fn guard_failure(
    sink: Option<&'static dyn MetricsSink>,
    table: &str,
    id: i64,
    observed: i64,
    probe: &[Row],
) -> Result<InternalError, InternalError> {
    let Some(row) = probe.first() else {
        return Ok(InternalError::row_not_found(ErrorOrigin::Version, table, id));
    };
    let stored = row.int(0)?;
    record_to(sink, MetricsEvent::StaleVersion { table });
    warn!(table, id, observed, stored, "stale version");

    Ok(InternalError::stale_version(table, id, observed, stored))
}

/// Apply a guarded update through a blocking adapter; returns the new version.
pub(crate) fn update<A: Adapter + ?Sized>(
    adapter: &A,
    sink: Option<&'static dyn MetricsSink>,
    table: &str,
    id: i64,
    doc: &JsonValue,
    observed: i64,
) -> Result<i64, InternalError> {
    let stmt = compare_and_increment(table, id, statement::payload_text(doc), observed)?;
    if adapter.execute(&stmt.sql, &stmt.params)?.rows_affected > 0 {
        return Ok(observed + 1);
    }

    let probe = statement::select_version(table, id)?;
    let rows = adapter.query(&probe.sql, &probe.params)?;

    Err(guard_failure(sink, table, id, observed, &rows)?)
}

/// Async counterpart of [`update`].
pub(crate) async fn update_async<A: AsyncAdapter + ?Sized>(
    adapter: &A,
    sink: Option<&'static dyn MetricsSink>,
    table: &str,
    id: i64,
    doc: &JsonValue,
    observed: i64,
) -> Result<i64, InternalError> {
    let stmt = compare_and_increment(table, id, statement::payload_text(doc), observed)?;
    if adapter.execute(&stmt.sql, &stmt.params).await?.rows_affected > 0 {
        return Ok(observed + 1);
    }

    let probe = statement::select_version(table, id)?;
    let rows = adapter.query(&probe.sql, &probe.params).await?;

    Err(guard_failure(sink, table, id, observed, &rows)?)
}
