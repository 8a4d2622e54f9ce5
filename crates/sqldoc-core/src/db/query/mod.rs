//! Module: query
//! Responsibility: immutable query intent (filters, excludes, ordering,
//! paging, hydration flag) and its lowering into complete SELECT statements.
//! Does not own: execution, hydration, or adapter I/O.
//! Boundary: `Query` is a plain value; terminals live on the session-bound
//! fluent wrappers and call [`Query::compile`] once per invocation.

pub(crate) mod compile;
pub(crate) mod expr;
pub(crate) mod field;
pub(crate) mod fluent;


use crate::{
    db::registry::{DATA_COLUMN, ID_COLUMN, Registry},
    value::Value,
};
use compile::Compiler;
use tracing::debug;

// re-exports
pub use compile::{CompileError, CompiledExpr, Join, compile};
pub use expr::{CompareOp, Expr};
pub use field::{FieldKind, FieldRef, Relation, RelationHop, any, col, element, field, rel};
pub use fluent::{AsyncFluentQuery, FluentQuery};

///
/// OrderDirection
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum OrderDirection {
    #[default]
    Asc,
    Desc,
}

impl OrderDirection {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Asc => "ASC",
            Self::Desc => "DESC",
        }
    }
}

///
/// Query
///
/// Immutable query intent bound to one root table.
/// Every builder returns a new value; the receiver is never modified, so a
/// partially built query can be kept as a template and extended many times.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    table: String,
    filters: Vec<Expr>,
    excludes: Vec<Expr>,
    order: Vec<(FieldRef, OrderDirection)>,
    limit: Option<u64>,
    offset: Option<u64>,
    resolve: Option<bool>,
}

impl Query {
    #[must_use]
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            filters: Vec::new(),
            excludes: Vec::new(),
            order: Vec::new(),
            limit: None,
            offset: None,
            resolve: None,
        }
    }

    // ------------------------------------------------------------------
    // Intent inspection
    // ------------------------------------------------------------------

    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    #[must_use]
    pub fn filters(&self) -> &[Expr] {
        &self.filters
    }

    #[must_use]
    pub fn excludes(&self) -> &[Expr] {
        &self.excludes
    }

    #[must_use]
    pub const fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    #[must_use]
    pub const fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    /// Explicit hydration flag, if one was set on this query.
    #[must_use]
    pub const fn resolve_flag(&self) -> Option<bool> {
        self.resolve
    }

    fn map(&self, f: impl FnOnce(&mut Self)) -> Self {
        let mut next = self.clone();
        f(&mut next);
        next
    }

    // ------------------------------------------------------------------
    // Intent builders (pure)
    // ------------------------------------------------------------------

    /// Add one filter; filters are conjoined.
    #[must_use]
    pub fn filter(&self, expr: Expr) -> Self {
        self.map(|q| q.filters.push(expr))
    }

    /// Exclude rows matching `expr`; excludes are conjoined as `NOT (...)`.
    #[must_use]
    pub fn exclude(&self, expr: Expr) -> Self {
        self.map(|q| q.excludes.push(expr))
    }

    #[must_use]
    pub fn order_by(&self, field: impl Into<FieldRef>) -> Self {
        self.order_by_dir(field, OrderDirection::Asc)
    }

    #[must_use]
    pub fn order_by_desc(&self, field: impl Into<FieldRef>) -> Self {
        self.order_by_dir(field, OrderDirection::Desc)
    }

    #[must_use]
    pub fn order_by_dir(&self, field: impl Into<FieldRef>, direction: OrderDirection) -> Self {
        let field = field.into();
        self.map(|q| q.order.push((field, direction)))
    }

    #[must_use]
    pub fn limit(&self, limit: u64) -> Self {
        self.map(|q| q.limit = Some(limit))
    }

    #[must_use]
    pub fn offset(&self, offset: u64) -> Self {
        self.map(|q| q.offset = Some(offset))
    }

    /// Override the session's hydration default for this query.
    #[must_use]
    pub fn resolve(&self, resolve: bool) -> Self {
        self.map(|q| q.resolve = Some(resolve))
    }

    // ------------------------------------------------------------------
    // Lowering
    // ------------------------------------------------------------------

    /// Compile the row projection (`_id`, payload) with ordering and paging.
    pub fn compile(&self, registry: &Registry) -> Result<CompiledQuery, CompileError> {
        let table = self.table.as_str();
        let mut compiler = Compiler::new(registry, table)?;
        let where_sql = self.where_clause(&mut compiler)?;
        let order_sql = self.order_clause(&mut compiler)?;
        let page_sql = self.page_clause(&mut compiler);

        let mut sql = format!("SELECT {table}.{ID_COLUMN}, {table}.{DATA_COLUMN} FROM {table}");
        push_joins(&mut sql, &compiler);
        sql.push_str(&where_sql);
        sql.push_str(&order_sql);
        sql.push_str(&page_sql);

        Ok(CompiledQuery::finish(sql, compiler))
    }

    /// Compile a counting projection over the same filters.
    ///
    /// Ordering is irrelevant to a count and is dropped; paging, when present,
    /// bounds the counted window through a sub-select.
    pub fn compile_count(&self, registry: &Registry) -> Result<CompiledQuery, CompileError> {
        let table = self.table.as_str();
        let mut compiler = Compiler::new(registry, table)?;
        let where_sql = self.where_clause(&mut compiler)?;

        let sql = if self.limit.is_none() && self.offset.is_none() {
            let mut sql = format!("SELECT COUNT(*) FROM {table}");
            push_joins(&mut sql, &compiler);
            sql.push_str(&where_sql);
            sql
        } else {
            let page_sql = self.page_clause(&mut compiler);
            let mut inner = format!("SELECT {table}.{ID_COLUMN} FROM {table}");
            push_joins(&mut inner, &compiler);
            inner.push_str(&where_sql);
            inner.push_str(&page_sql);
            format!("SELECT COUNT(*) FROM ({inner})")
        };

        Ok(CompiledQuery::finish(sql, compiler))
    }

    fn where_clause(&self, compiler: &mut Compiler<'_>) -> Result<String, CompileError> {
        let mut parts = Vec::with_capacity(self.filters.len() + self.excludes.len());
        for expr in &self.filters {
            parts.push(format!("({})", compiler.expr(expr)?));
        }
        for expr in &self.excludes {
            parts.push(format!("NOT ({})", compiler.expr(expr)?));
        }

        if parts.is_empty() {
            Ok(String::new())
        } else {
            Ok(format!(" WHERE {}", parts.join(" AND ")))
        }
    }

    fn order_clause(&self, compiler: &mut Compiler<'_>) -> Result<String, CompileError> {
        if self.order.is_empty() {
            return Ok(String::new());
        }

        let mut terms = Vec::with_capacity(self.order.len());
        for (field, direction) in &self.order {
            let accessor = compiler.order_accessor(field)?;
            terms.push(format!("{accessor} {}", direction.as_sql()));
        }

        Ok(format!(" ORDER BY {}", terms.join(", ")))
    }

    // SQLite requires LIMIT before OFFSET; `-1` means unbounded.
    fn page_clause(&self, compiler: &mut Compiler<'_>) -> String {
        match (self.limit, self.offset) {
            (None, None) => String::new(),
            (Some(limit), None) => {
                compiler.push_param(page_param(limit));
                " LIMIT ?".to_string()
            }
            (limit, Some(offset)) => {
                compiler.push_param(limit.map_or(Value::Int(-1), page_param));
                compiler.push_param(page_param(offset));
                " LIMIT ? OFFSET ?".to_string()
            }
        }
    }
}

fn page_param(n: u64) -> Value {
    Value::Int(i64::try_from(n).unwrap_or(i64::MAX))
}

fn push_joins(sql: &mut String, compiler: &Compiler<'_>) {
    for join in compiler.joins() {
        sql.push(' ');
        sql.push_str(&join.to_sql());
    }
}

///
/// CompiledQuery
///
/// Executable SQL text, its ordered parameters, and the joins it carries.
///

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<Value>,
    pub joins: Vec<Join>,
}

impl CompiledQuery {
    fn finish(sql: String, compiler: Compiler<'_>) -> Self {
        let (params, joins) = compiler.finish();
        debug!(sql = %sql, params = params.len(), joins = joins.len(), "compiled query");

        Self { sql, params, joins }
    }

    /// The engine's query-plan statement for this query.
    #[must_use]
    pub fn explain_sql(&self) -> String {
        format!("EXPLAIN QUERY PLAN {}", self.sql)
    }
}
