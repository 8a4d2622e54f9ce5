//! Module: adapter
//! Responsibility: the persistence boundary (execute, query, transaction
//! control) in blocking and cooperative forms.
//! Does not own: SQL construction or result interpretation.
//! Boundary: engine failures cross this boundary as adapter-origin
//! `InternalError`s carrying the engine's own error untouched.

#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(feature = "async")]
mod async_sqlite;

use crate::{
    error::{ErrorClass, ErrorOrigin, InternalError},
    value::Value,
};
use async_trait::async_trait;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteAdapter;

#[cfg(feature = "async")]
pub use async_sqlite::AsyncSqliteAdapter;

///
/// ExecResult
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ExecResult {
    pub rows_affected: usize,
    pub last_insert_id: i64,
}

///
/// Row
///
/// One result row, values in projection order.
///

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Row {
    values: Vec<Value>,
}

impl Row {
    #[must_use]
    pub const fn new(values: Vec<Value>) -> Self {
        Self { values }
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.values.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    #[must_use]
    pub fn into_values(self) -> Vec<Value> {
        self.values
    }

    /// Read an integer column.
    pub fn int(&self, index: usize) -> Result<i64, InternalError> {
        self.get(index)
            .and_then(Value::as_int)
            .ok_or_else(|| Self::shape_error(index, "integer"))
    }

    /// Read a text column.
    pub fn text(&self, index: usize) -> Result<&str, InternalError> {
        self.get(index)
            .and_then(Value::as_text)
            .ok_or_else(|| Self::shape_error(index, "text"))
    }

    fn shape_error(index: usize, expected: &str) -> InternalError {
        InternalError::new(
            ErrorClass::Internal,
            ErrorOrigin::Adapter,
            format!("result column {index} is not {expected}"),
        )
    }
}

///
/// Adapter
///
/// Blocking persistence adapter. One logical operation in flight per
/// connection; implementations serialize access internally.
///

pub trait Adapter {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, InternalError>;

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, InternalError>;

    /// Run a multi-statement script without parameters.
    fn execute_batch(&self, sql: &str) -> Result<(), InternalError>;

    fn begin(&self) -> Result<(), InternalError> {
        self.execute_batch("BEGIN")
    }

    fn commit(&self) -> Result<(), InternalError> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&self) -> Result<(), InternalError> {
        self.execute_batch("ROLLBACK")
    }
}

///
/// AsyncAdapter
///
/// Cooperative counterpart of [`Adapter`]. Implementations suspend only
/// around engine I/O.
///

#[async_trait]
pub trait AsyncAdapter: Send + Sync {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, InternalError>;

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, InternalError>;

    async fn execute_batch(&self, sql: &str) -> Result<(), InternalError>;

    async fn begin(&self) -> Result<(), InternalError> {
        self.execute_batch("BEGIN").await
    }

    async fn commit(&self) -> Result<(), InternalError> {
        self.execute_batch("COMMIT").await
    }

    async fn rollback(&self) -> Result<(), InternalError> {
        self.execute_batch("ROLLBACK").await
    }
}
