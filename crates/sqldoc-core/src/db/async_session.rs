//! Module: async_session
//! Responsibility: the cooperative document-store handle, mirroring `Db`.
//! Does not own: statement text; both sessions share the same builders, so
//! compiled SQL and parameter order are identical across modes.
//! Boundary: suspension happens only at adapter calls.

use crate::{
    config::DbConfig,
    db::{
        adapter::AsyncAdapter,
        document::Document,
        query::{AsyncFluentQuery, Query},
        registry::Registry,
        relation::{
            DeletePolicy, DeleteReport, ReferenceStatus, Referrer,
            hydrate::hydrate_async,
            integrity::AsyncIntegrity,
            marker::Marker,
        },
        session::{RAW_SQL_LABEL, bulk_item, to_payload},
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

///
/// AsyncDb
///
/// Session-scoped document store over a cooperative adapter.
///

pub struct AsyncDb<A: AsyncAdapter> {
    adapter: A,
    registry: Arc<Registry>,
    config: DbConfig,
    metrics: Option<&'static dyn MetricsSink>,
}

impl<A: AsyncAdapter> AsyncDb<A> {
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

    fn integrity(&self) -> AsyncIntegrity<'_, A> {
        AsyncIntegrity {
            adapter: &self.adapter,
            registry: &self.registry,
            sink: self.metrics,
        }
    }

    pub(crate) async fn hydrate(
        &self,
        table: &str,
        docs: Vec<Document>,
        resolve: Option<bool>,
    ) -> Result<Vec<Document>, InternalError> {
        if !resolve.unwrap_or(self.config.resolve_by_default) {
            return Ok(docs);
        }

        hydrate_async(
            &self.adapter,
            &self.registry,
            table,
            docs,
            self.config.max_hydration_depth,
            self.metrics,
        )
        .await
    }

    // ---------------------------------------------------------------------
    // Bootstrap
    // ---------------------------------------------------------------------

    #[instrument(skip_all, fields(table = %table))]
    pub async fn ensure_table(&self, table: &str) -> Result<(), InternalError> {
        let sql = statement::create_table(table, false)?;
        self.adapter.execute_batch(&sql).await
    }

    #[instrument(skip_all, fields(table = %table))]
    pub async fn ensure_versioned_table(&self, table: &str) -> Result<(), InternalError> {
        let sql = statement::create_table(table, true)?;
        self.adapter.execute_batch(&sql).await
    }

    pub async fn create_index(
        &self,
        table: &str,
        field: &str,
        unique: bool,
    ) -> Result<String, InternalError> {
        let name = statement::index_name(table, field);
        self.create_index_named(table, field, unique, &name).await?;

        Ok(name)
    }

    #[instrument(skip_all, fields(table = %table, field = %field))]
    pub async fn create_index_named(
        &self,
        table: &str,
        field: &str,
        unique: bool,
        name: &str,
    ) -> Result<(), InternalError> {
        let sql = statement::create_index(table, field, unique, Some(name))?;
        self.adapter.execute_batch(&sql).await
    }

    pub async fn drop_index(&self, name: &str) -> Result<(), InternalError> {
        let sql = statement::drop_index(name)?;
        self.adapter.execute_batch(&sql).await
    }

    // ---------------------------------------------------------------------
    // Documents
    // ---------------------------------------------------------------------

    #[instrument(skip_all, fields(table = %table))]
    pub async fn insert<T: Serialize + Sync + ?Sized>(
        &self,
        table: &str,
        doc: &T,
    ) -> Result<i64, InternalError> {
        let stmt = statement::insert(table, statement::payload_text(&to_payload(doc)?))?;
        let mut span = Span::new(self.metrics, ExecKind::Save, table);
        let result = self.adapter.execute(&stmt.sql, &stmt.params).await?;
        span.set_rows(1);

        Ok(result.last_insert_id)
    }

    #[instrument(skip_all, fields(table = %table))]
    pub async fn upsert<T: Serialize + Sync + ?Sized>(
        &self,
        table: &str,
        id: Option<i64>,
        doc: &T,
    ) -> Result<i64, InternalError> {
        let payload = to_payload(doc)?;
        self.upsert_payload(table, id, &payload).await
    }

    async fn upsert_payload(
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
                self.adapter
                    .execute(&stmt.sql, &stmt.params)
                    .await?
                    .last_insert_id
            }
            Some(id) => {
                let stmt =
                    statement::upsert(table, id, text, self.registry.is_versioned(table))?;
                self.adapter.execute(&stmt.sql, &stmt.params).await?;
                id
            }
        };
        span.set_rows(1);

        Ok(id)
    }

    #[instrument(skip_all, fields(table = %table, docs = docs.len()))]
    pub async fn bulk_upsert<T: Serialize + Sync>(
        &self,
        table: &str,
        docs: &[T],
    ) -> Result<Vec<i64>, InternalError> {
        if docs.is_empty() {
            return Ok(Vec::new());
        }
        let items = docs.iter().map(bulk_item).collect::<Result<Vec<_>, _>>()?;

        self.adapter.begin().await?;
        let mut ids = Vec::with_capacity(items.len());
        for (id, payload) in &items {
            match self.upsert_payload(table, *id, payload).await {
                Ok(id) => ids.push(id),
                Err(err) => {
                    if let Err(rollback) = self.adapter.rollback().await {
                        warn!(error = %rollback, "rollback failed");
                    }
                    return Err(err);
                }
            }
        }
        self.adapter.commit().await?;

        Ok(ids)
    }

    #[instrument(skip_all, fields(table = %table, id = id))]
    pub async fn find(&self, table: &str, id: i64) -> Result<Option<Document>, InternalError> {
        let stmt = statement::select_by_id(table, id)?;
        let docs = {
            let mut span = Span::new(self.metrics, ExecKind::Load, table);
            let rows = self.adapter.query(&stmt.sql, &stmt.params).await?;
            let docs = Document::from_rows(table, &rows)?;
            span.set_rows(count(docs.len()));
            docs
        };

        Ok(self.hydrate(table, docs, None).await?.into_iter().next())
    }

    pub async fn find_as<T: DeserializeOwned>(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Option<T>, InternalError> {
        self.find(table, id)
            .await?
            .map(|doc| doc.decode())
            .transpose()
    }

    #[instrument(skip_all, fields(table = %table, id = id))]
    pub async fn delete_row(&self, table: &str, id: i64) -> Result<bool, InternalError> {
        let stmt = statement::delete_by_id(table, id)?;
        let mut span = Span::new(self.metrics, ExecKind::Delete, table);
        let affected = self
            .adapter
            .execute(&stmt.sql, &stmt.params)
            .await?
            .rows_affected;
        span.set_rows(count(affected));

        Ok(affected > 0)
    }

    pub async fn execute_sql(
        &self,
        sql: &str,
        params: &[Value],
    ) -> Result<Vec<Document>, InternalError> {
        let rows = self.adapter.query(sql, params).await?;

        Document::from_rows(RAW_SQL_LABEL, &rows)
    }

    // ---------------------------------------------------------------------
    // Queries
    // ---------------------------------------------------------------------

    #[must_use]
    pub fn query(&self, table: &str) -> AsyncFluentQuery<'_, A> {
        AsyncFluentQuery::new(self, Query::new(table))
    }

    #[must_use]
    pub const fn bind(&self, query: Query) -> AsyncFluentQuery<'_, A> {
        AsyncFluentQuery::new(self, query)
    }

    // ---------------------------------------------------------------------
    // Relationship integrity
    // ---------------------------------------------------------------------

    pub async fn delete(&self, table: &str, id: i64) -> Result<DeleteReport, InternalError> {
        self.delete_with(table, id, self.config.default_delete_policy)
            .await
    }

    #[instrument(skip_all, fields(table = %table, id = id, policy = %policy))]
    pub async fn delete_with(
        &self,
        table: &str,
        id: i64,
        policy: DeletePolicy,
    ) -> Result<DeleteReport, InternalError> {
        let target = Marker::new(table, id);
        let mut span = Span::new(self.metrics, ExecKind::Delete, table);
        let report = self
            .integrity()
            .delete(&target, policy, self.config.transactional_deletes)
            .await?;
        span.set_rows(count(report.deleted.len()));

        Ok(report)
    }

    pub async fn referrers(&self, table: &str, id: i64) -> Result<Vec<Referrer>, InternalError> {
        self.integrity().referrers(&Marker::new(table, id)).await
    }

    #[instrument(skip_all, fields(table = %table, id = id))]
    pub async fn validate_references(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Vec<ReferenceStatus>, InternalError> {
        self.integrity().validate_references(table, id).await
    }

    // ---------------------------------------------------------------------
    // Versioned writes
    // ---------------------------------------------------------------------

    #[instrument(skip_all, fields(table = %table, id = id, observed = observed))]
    pub async fn update_versioned<T: Serialize + Sync + ?Sized>(
        &self,
        table: &str,
        id: i64,
        doc: &T,
        observed: i64,
    ) -> Result<i64, InternalError> {
        let payload = to_payload(doc)?;
        let mut span = Span::new(self.metrics, ExecKind::Save, table);
        let version =
            version::update_async(&self.adapter, self.metrics, table, id, &payload, observed)
                .await?;
        span.set_rows(1);

        Ok(version)
    }

    pub async fn upsert_with_version<T: Serialize + Sync + ?Sized>(
        &self,
        table: &str,
        id: Option<i64>,
        doc: &T,
        observed: i64,
    ) -> Result<(i64, i64), InternalError> {
        match id {
            None => Ok((self.insert(table, doc).await?, INITIAL_VERSION)),
            Some(id) => Ok((id, self.update_versioned(table, id, doc, observed).await?)),
        }
    }

    pub async fn find_versioned(
        &self,
        table: &str,
        id: i64,
    ) -> Result<Option<VersionedDocument>, InternalError> {
        let stmt = statement::select_versioned(table, id)?;
        let rows = self.adapter.query(&stmt.sql, &stmt.params).await?;

        rows.first()
            .map(|row| VersionedDocument::from_row(table, row))
            .transpose()
    }

    pub async fn refresh(&self, table: &str, id: i64) -> Result<VersionedDocument, InternalError> {
        self.find_versioned(table, id)
            .await?
            .ok_or_else(|| InternalError::row_not_found(ErrorOrigin::Version, table, id))
    }
}
