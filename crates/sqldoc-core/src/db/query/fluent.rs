//! Module: query::fluent
//! Responsibility: session-bound query wrappers exposing the chain and the
//! terminal operations (`all`, `first`, `count`, `sql`, `explain`).
//! Does not own: SQL lowering (see `Query::compile`) or hydration internals.
//! Boundary: every terminal compiles exactly once per call and never caches.

use crate::{
    db::{
        adapter::{Adapter, AsyncAdapter, Row},
        async_session::AsyncDb,
        document::Document,
        query::{CompiledQuery, Expr, FieldRef, OrderDirection, Query},
        session::Db,
    },
    error::InternalError,
    obs::sink::{ExecKind, Span, count},
};
use serde::de::DeserializeOwned;

// EXPLAIN QUERY PLAN rows are (id, parent, notused, detail).
const PLAN_DETAIL_COLUMN: usize = 3;

fn plan_details(rows: &[Row]) -> Result<Vec<String>, InternalError> {
    rows.iter()
        .map(|row| row.text(PLAN_DETAIL_COLUMN).map(str::to_string))
        .collect()
}

fn count_value(rows: &[Row]) -> Result<u64, InternalError> {
    let n = rows.first().map_or(Ok(0), |row| row.int(0))?;

    Ok(u64::try_from(n).unwrap_or_default())
}

fn decode_all<T: DeserializeOwned>(docs: &[Document]) -> Result<Vec<T>, InternalError> {
    docs.iter().map(Document::decode).collect()
}

///
/// FluentQuery
///
/// Session-bound query wrapper over a blocking adapter.
/// Chain methods return a new wrapper; the receiver keeps its query.
///

pub struct FluentQuery<'a, A: Adapter> {
    db: &'a Db<A>,
    query: Query,
}

impl<A: Adapter> Clone for FluentQuery<'_, A> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            query: self.query.clone(),
        }
    }
}

impl<'a, A: Adapter> FluentQuery<'a, A> {
    pub(crate) const fn new(db: &'a Db<A>, query: Query) -> Self {
        Self { db, query }
    }

    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    fn map_query(&self, map: impl FnOnce(&Query) -> Query) -> Self {
        Self {
            db: self.db,
            query: map(&self.query),
        }
    }

    // ------------------------------------------------------------------
    // Query refinement
    // ------------------------------------------------------------------

    #[must_use]
    pub fn filter(&self, expr: Expr) -> Self {
        self.map_query(|q| q.filter(expr))
    }

    #[must_use]
    pub fn exclude(&self, expr: Expr) -> Self {
        self.map_query(|q| q.exclude(expr))
    }

    #[must_use]
    pub fn order_by(&self, field: impl Into<FieldRef>) -> Self {
        self.map_query(|q| q.order_by(field))
    }

    #[must_use]
    pub fn order_by_desc(&self, field: impl Into<FieldRef>) -> Self {
        self.map_query(|q| q.order_by_desc(field))
    }

    #[must_use]
    pub fn order_by_dir(&self, field: impl Into<FieldRef>, direction: OrderDirection) -> Self {
        self.map_query(|q| q.order_by_dir(field, direction))
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Self {
        self.map_query(|q| q.limit(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Self {
        self.map_query(|q| q.offset(offset))
    }

    #[must_use]
    pub fn resolve(&self, resolve: bool) -> Self {
        self.map_query(|q| q.resolve(resolve))
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Every matching document, hydrated unless resolution is off.
    pub fn all(&self) -> Result<Vec<Document>, InternalError> {
        let table = self.query.table();
        let mut span = Span::new(self.db.sink(), ExecKind::Load, table);
        let compiled = self.query.compile(self.db.registry())?;
        let rows = self.db.adapter().query(&compiled.sql, &compiled.params)?;
        let docs = Document::from_rows(table, &rows)?;
        span.set_rows(count(docs.len()));

        self.db.hydrate(table, docs, self.query.resolve_flag())
    }

    /// [`Self::all`] decoded into `T`.
    pub fn all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, InternalError> {
        decode_all(&self.all()?)
    }

    /// The first matching document; `None` when nothing matches.
    pub fn first(&self) -> Result<Option<Document>, InternalError> {
        Ok(self.limit(1).all()?.into_iter().next())
    }

    pub fn count(&self) -> Result<u64, InternalError> {
        let table = self.query.table();
        let _span = Span::new(self.db.sink(), ExecKind::Count, table);
        let compiled = self.query.compile_count(self.db.registry())?;
        let rows = self.db.adapter().query(&compiled.sql, &compiled.params)?;

        count_value(&rows)
    }

    /// Compiled SQL and parameters, without executing.
    pub fn sql(&self) -> Result<CompiledQuery, InternalError> {
        Ok(self.query.compile(self.db.registry())?)
    }

    /// The engine's query plan, one detail line per plan step.
    pub fn explain(&self) -> Result<Vec<String>, InternalError> {
        let compiled = self.sql()?;
        let rows = self
            .db
            .adapter()
            .query(&compiled.explain_sql(), &compiled.params)?;

        plan_details(&rows)
    }
}

///
/// AsyncFluentQuery
///
/// Cooperative counterpart of [`FluentQuery`]; compiles identically and
/// suspends only at adapter calls.
///

pub struct AsyncFluentQuery<'a, A: AsyncAdapter> {
    db: &'a AsyncDb<A>,
    query: Query,
}

impl<A: AsyncAdapter> Clone for AsyncFluentQuery<'_, A> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            query: self.query.clone(),
        }
    }
}

impl<'a, A: AsyncAdapter> AsyncFluentQuery<'a, A> {
    pub(crate) const fn new(db: &'a AsyncDb<A>, query: Query) -> Self {
        Self { db, query }
    }

    #[must_use]
    pub const fn query(&self) -> &Query {
        &self.query
    }

    fn map_query(&self, map: impl FnOnce(&Query) -> Query) -> Self {
        Self {
            db: self.db,
            query: map(&self.query),
        }
    }

    #[must_use]
    pub fn filter(&self, expr: Expr) -> Self {
        self.map_query(|q| q.filter(expr))
    }

    #[must_use]
    pub fn exclude(&self, expr: Expr) -> Self {
        self.map_query(|q| q.exclude(expr))
    }

    #[must_use]
    pub fn order_by(&self, field: impl Into<FieldRef>) -> Self {
        self.map_query(|q| q.order_by(field))
    }

    #[must_use]
    pub fn order_by_desc(&self, field: impl Into<FieldRef>) -> Self {
        self.map_query(|q| q.order_by_desc(field))
    }

    #[must_use]
    pub fn order_by_dir(&self, field: impl Into<FieldRef>, direction: OrderDirection) -> Self {
        self.map_query(|q| q.order_by_dir(field, direction))
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Self {
        self.map_query(|q| q.limit(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Self {
        self.map_query(|q| q.offset(offset))
    }

    #[must_use]
    pub fn resolve(&self, resolve: bool) -> Self {
        self.map_query(|q| q.resolve(resolve))
    }

    pub async fn all(&self) -> Result<Vec<Document>, InternalError> {
        let table = self.query.table();
        let compiled = self.query.compile(self.db.registry())?;
        let docs = {
            let mut span = Span::new(self.db.sink(), ExecKind::Load, table);
            let rows = self
                .db
                .adapter()
                .query(&compiled.sql, &compiled.params)
                .await?;
            let docs = Document::from_rows(table, &rows)?;
            span.set_rows(count(docs.len()));
            docs
        };

        self.db.hydrate(table, docs, self.query.resolve_flag()).await
    }

    pub async fn all_as<T: DeserializeOwned>(&self) -> Result<Vec<T>, InternalError> {
        decode_all(&self.all().await?)
    }

    pub async fn first(&self) -> Result<Option<Document>, InternalError> {
        Ok(self.limit(1).all().await?.into_iter().next())
    }

    pub async fn count(&self) -> Result<u64, InternalError> {
        let table = self.query.table();
        let compiled = self.query.compile_count(self.db.registry())?;
        let _span = Span::new(self.db.sink(), ExecKind::Count, table);
        let rows = self
            .db
            .adapter()
            .query(&compiled.sql, &compiled.params)
            .await?;

        count_value(&rows)
    }

    pub fn sql(&self) -> Result<CompiledQuery, InternalError> {
        Ok(self.query.compile(self.db.registry())?)
    }

    pub async fn explain(&self) -> Result<Vec<String>, InternalError> {
        let compiled = self.sql()?;
        let rows = self
            .db
            .adapter()
            .query(&compiled.explain_sql(), &compiled.params)
            .await?;

        plan_details(&rows)
    }
}
