//! Module: session
//! Responsibility: the blocking document-store handle (bootstrap, CRUD,
//! fluent queries, policy deletes, versioned writes).
//! Does not own: SQL lowering, hydration or integrity algorithms.
//! Boundary: every operation routes through one adapter, the shared
//! registry and the session's metrics sink.

use crate::{
    config::DbConfig,
    db::{
        adapter::Adapter,
        document::Document,
        query::{FluentQuery, Query},
        registry::Registry,
        relation::{
            DeletePolicy, DeleteReport, ReferenceStatus, Referrer,
            hydrate::hydrate,
            integrity::Integrity,
            marker::Marker,
        },
        statement,
        version::{self, INITIAL_VERSION, VersionedDocument},
    },
    error::{ErrorOrigin, InternalError},
    obs::sink::{ExecKind, MetricsSink, Span, count},
    value::Value,
};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use tracing::{instrument, warn};

/// Label used in errors for rows read through [`Db::execute_sql`].
pub(crate) const RAW_SQL_LABEL: &str = "<sql>";

/// Serialize a caller value into a JSON payload.
pub(crate) fn to_payload<T: Serialize + ?Sized>(doc: &T) -> Result<JsonValue, InternalError> {
    Ok(serde_json::to_value(doc)?)
}

/// Split a bulk item into its optional top-level `_id` and payload.
pub(crate) fn bulk_item<T: Serialize>(doc: &T) -> Result<(Option<i64>, JsonValue), InternalError> {
    let payload = to_payload(doc)?;
    let id = payload
        .get(crate::db::registry::ID_COLUMN)
        .and_then(JsonValue::as_i64);

    Ok((id, payload))
}

///
/// Db
///
/// Session-scoped document store over a blocking adapter.
///

pub struct Db<A: Adapter> {
    adapter: A,
    registry: Arc<Registry>,
    config: DbConfig,
    metrics: Option<&'static dyn MetricsSink>,
}

impl<A: Adapter> Db<A> {
    #[must_use]
    pub fn new(adapter: A, registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            adapter,
            registry: registry.into(),
            config: DbConfig::default(),
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: DbConfig) -> Self {
        self.config = config;
        self
    }

    #[must_use]
    pub const fn metrics_sink(mut self, sink: &'static dyn MetricsSink) -> Self {
        self.metrics = Some(sink);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[must_use]
    pub const fn config(&self) -> &DbConfig {
        &self.config
    }

    #[must_use]
    pub const fn adapter(&self) -> &A {
        &self.adapter
    }

    pub(crate) const fn sink(&self) -> Option<&'static dyn MetricsSink> {
        self.metrics
    }

    fn integrity(&self) -> Integrity<'_, A> {
        Integrity {
            adapter: &self.adapter,
            registry: &self.registry,
            sink: self.metrics,
        }
    }

    pub(crate) fn hydrate(
        &self,
        table: &str,
        docs: Vec<Document>,
        resolve: Option<bool>,
    ) -> Result<Vec<Document>, InternalError> {
        if !resolve.unwrap_or(self.config.resolve_by_default) {
            return Ok(docs);
        }

        hydrate(
            &self.adapter,
            &self.registry,
            table,
            docs,
            self.config.max_hydration_depth,
            self.metrics,
        )
    }

    fn in_transaction<T>(
        &self,
        f: impl FnOnce() -> Result<T, InternalError>,
    ) -> Result<T, InternalError> {
        self.adapter.begin()?;
        match f() {
            Ok(value) => {
                self.adapter.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = self.adapter.rollback() {
                    warn!(error = %rollback, "rollback failed");
                }
                Err(err)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Bootstrap
    // ---------------------------------------------------------------------

    #[instrument(skip_all, fields(table = %table))]
    pub fn ensure_table(&self, table: &str) -> Result<(), InternalError> {
        self.adapter
            .execute_batch(&statement::create_table(table, false)?)
    }

    /// Create a table carrying a `_version` stamp (starts at 0).
    #[instrument(skip_all, fields(table = %table))]
    pub fn ensure_versioned_table(&self, table: &str) -> Result<(), InternalError> {
        self.adapter
            .execute_batch(&statement::create_table(table, true)?)
    }

    /// Index a payload path (or a `_`-prefixed column); returns the index name.
    pub fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<String, InternalError> {
        let name = statement::index_name(table, field);
        self.create_index_named(table, field, unique, &name)?;

        Ok(name)
    }

    #[instrument(skip_all, fields(table = %table, field = %field))]
    pub fn create_index_named(
        &self,
        table: &str,
        field: &str,
        unique: bool,
        name: &str,
    ) -> Result<(), InternalError> {
        self.adapter
            .execute_batch(&statement::create_index(table, field, unique, Some(name))?)
    }

    pub fn drop_index(&self, name: &str) -> Result<(), InternalError> {
        self.adapter.execute_batch(&statement::drop_index(name)?)
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    /// Insert a new document; any top-level `_id` in it is ignored.
    #[instrument(skip_all, fields(table = %table))]
    pub fn insert<T: Serialize + ?Sized>(&self, table: &str, doc: &T) -> Result<i64, InternalError> {
        let mut span = Span::new(self.metrics, ExecKind::Save, table);
        let stmt = statement::insert(table, statement::payload_text(&to_payload(doc)?))?;
        let result = self.adapter.execute(&stmt.sql, &stmt.params)?;
        span.set_rows(1);

        Ok(result.last_insert_id)
    }

    /// Insert when `id` is `None`, otherwise insert-or-replace that row.
    #[instrument(skip_all, fields(table = %table))]
    pub fn upsert<T: Serialize + ?Sized>(
        &self,
        table: &str,
        id: Option<i64>,
        doc: &T,
    ) -> Result<i64, InternalError> {
        let payload = to_payload(doc)?;
        self.upsert_payload(table, id, &payload)
    }

    fn upsert_payload(
        &self,
        table: &str,
        id: Option<i64>,
        payload: &JsonValue,
    ) -> Result<i64, InternalError> {
        let mut span = Span::new(self.metrics, ExecKind::Save, table);
        let text = statement::payload_text(payload);
        let id = match id {
            None => {
                let stmt = statement::insert(table, text)?;
                self.adapter.execute(&stmt.sql, &stmt.params)?.last_insert_id
            }
            Some(id) => {
                let stmt =
                    statement::upsert(table, id, text, self.registry.is_versioned(table))?;
                self.adapter.execute(&stmt.sql, &stmt.params)?;
                id
            }
        };
        span.set_rows(1);

        Ok(id)
    }

    /// Upsert many documents in one transaction. Documents carrying an
    /// integer `_id` replace that row; the rest are inserted. Returns ids in
    /// input order.
    #[instrument(skip_all, fields(table = %table, docs = docs.len()))]
    pub fn bulk_upsert<T: Serialize>(
        &self,
        table: &str,
        docs: &[T],
    ) -> Result<Vec<i64>, InternalError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let items = docs.iter().map(bulk_item).collect::<Result<Vec<_>, _>>()?;

        self.in_transaction(|| {
            items
                .iter()
                .map(|(id, payload)| self.upsert_payload(table, *id, payload))
                .collect()
        })
    }

    /// Load one document by id, hydrated per the session default.
    #[instrument(skip_all, fields(table = %table, id = id))]
    pub fn find(&self, table: &str, id: i64) -> Result<Option<Document>, InternalError> {
        let docs = {
            let mut span = Span::new(self.metrics, ExecKind::Load, table);
            let stmt = statement::select_by_id(table, id)?;
            let rows = self.adapter.query(&stmt.sql, &stmt.params)?;
            let docs = Document::from_rows(table, &rows)?;
            span.set_rows(count(docs.len()));
            docs
        };

        Ok(self.hydrate(table, docs, None)?.into_iter().next())
    }

    pub fn find_as<T: DeserializeOwned>(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Option<T>, InternalError> {
        self.find(table, id)?.map(|doc| doc.decode()).transpose()
    }

    /// Remove one row without consulting referrers. Returns whether it existed.
    #[instrument(skip_all, fields(table = %table, id = id))]
    pub fn delete_row(&self, table: &str, id: i64) -> Result<bool, InternalError> {
        let mut span = Span::new(self.metrics, ExecKind::Delete, table);
        let stmt = statement::delete_by_id(table, id)?;
        let affected = self.adapter.execute(&stmt.sql, &stmt.params)?.rows_affected;
        span.set_rows(count(affected));

        Ok(affected > 0)
    }

    /// Run raw SQL projecting `(_id, data)` rows.
    pub fn execute_sql(&self, sql: &str, params: &[Value]) -> Result<Vec<Document>, InternalError> {
        let rows = self.adapter.query(sql, params)?;

        Document::from_rows(RAW_SQL_LABEL, &rows)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn query(&self, table: &str) -> FluentQuery<'_, A> {
        FluentQuery::new(self, Query::new(table))
    }

    /// Bind an already built query to this session.
    #[must_use]
    pub const fn bind(&self, query: Query) -> FluentQuery<'_, A> {
        FluentQuery::new(self, query)
    }

    // ---------------------------------------------------------------------
    // Relationship integrity
    // ---------------------------------------------------------------------

    /// Delete under the configured default policy.
    pub fn delete(&self, table: &str, id: i64) -> Result<DeleteReport, InternalError> {
        self.delete_with(table, id, self.config.default_delete_policy)
    }

    #[instrument(skip_all, fields(table = %table, id = id, policy = %policy))]
    pub fn delete_with(
        &self,
        table: &str,
        id: i64,
        policy: DeletePolicy,
    ) -> Result<DeleteReport, InternalError> {
        let mut span = Span::new(self.metrics, ExecKind::Delete, table);
        let report = self.integrity().delete(
            &Marker::new(table, id),
            policy,
            self.config.transactional_deletes,
        )?;
        span.set_rows(count(report.deleted.len()));

        Ok(report)
    }

    /// Every row holding a reference to `table#id`, with the marker paths.
    pub fn referrers(&self, table: &str, id: i64) -> Result<Vec<Referrer>, InternalError> {
        self.integrity().referrers(&Marker::new(table, id))
    }

    #[instrument(skip_all, fields(table = %table, id = id))]
    pub fn validate_references(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Vec<ReferenceStatus>, InternalError> {
        self.integrity().validate_references(table, id)
    }

    // ---------------------------------------------------------------------
    // Versioned writes
    // ---------------------------------------------------------------------

    /// Compare-and-increment update; returns the new version.
    #[instrument(skip_all, fields(table = %table, id = id, observed = observed))]
    pub fn update_versioned<T: Serialize + ?Sized>(
        &self,
        table: &str,
        id: i64,
        doc: &T,
        observed: i64,
    ) -> Result<i64, InternalError> {
        let mut span = Span::new(self.metrics, ExecKind::Save, table);
        let version = version::update(
            &self.adapter,
            self.metrics,
            table,
            id,
            &to_payload(doc)?,
            observed,
        )?;
        span.set_rows(1);

        Ok(version)
    }

    /// Insert at version 0 when `id` is `None` (`observed` is ignored),
    /// otherwise a guarded update. Returns `(id, version)`.
    pub fn upsert_with_version<T: Serialize + ?Sized>(
        &self,
        table: &str,
        id: Option<i64>,
        doc: &T,
        observed: i64,
    ) -> Result<(i64, i64), InternalError> {
        match id {
            None => Ok((self.insert(table, doc)?, INITIAL_VERSION)),
            Some(id) => Ok((id, self.update_versioned(table, id, doc, observed)?)),
        }
    }

    /// Direct row read including the version stamp (never hydrated).
    pub fn find_versioned(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Option<VersionedDocument>, InternalError> {
        let stmt = statement::select_versioned(table, id)?;
        let rows = self.adapter.query(&stmt.sql, &stmt.params)?;

        rows.first()
            .map(|row| VersionedDocument::from_row(table, row))
            .transpose()
    }

    /// Re-read a versioned row, failing when it no longer exists.
    pub fn refresh(&self, table: &str, id: i64) -> Result<VersionedDocument, InternalError> {
        self.find_versioned(table, id)?
            .ok_or_else(|| InternalError::row_not_found(ErrorOrigin::Version, table, id))
    }
}
