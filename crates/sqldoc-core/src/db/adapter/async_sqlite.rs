use crate::{
    config::SqliteConfig,
    db::adapter::{
        AsyncAdapter, ExecResult, Row,
        sqlite::{execute_on, open, query_on},
    },
    error::InternalError,
    value::Value,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::Connection;
use std::sync::Arc;
use tokio::task;

///
/// AsyncSqliteAdapter
///
/// Cooperative adapter: every engine call runs on the blocking pool, so the
/// calling task only suspends at I/O.
///

#[derive(Clone)]
pub struct AsyncSqliteAdapter {
    conn: Arc<Mutex<Connection>>,
}

impl AsyncSqliteAdapter {
    pub async fn open(config: SqliteConfig) -> Result<Self, InternalError> {
        let conn = task::spawn_blocking(move || open(&config))
            .await
            .map_err(InternalError::adapter)??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub async fn in_memory() -> Result<Self, InternalError> {
        Self::open(SqliteConfig::in_memory()).await
    }

    pub async fn on_disk(path: impl Into<String>) -> Result<Self, InternalError> {
        Self::open(SqliteConfig::on_disk(path)).await
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, InternalError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, InternalError> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);

        task::spawn_blocking(move || f(&*conn.lock()))
            .await
            .map_err(InternalError::adapter)?
    }
}

#[async_trait]
impl AsyncAdapter for AsyncSqliteAdapter {
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, InternalError> {
        let sql = sql.to_string();
        let params = params.to_vec();

        self.with_conn(move |conn| execute_on(conn, &sql, &params))
            .await
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, InternalError> {
        let sql = sql.to_string();
        let params = params.to_vec();

        self.with_conn(move |conn| query_on(conn, &sql, &params)).await
    }

    async fn execute_batch(&self, sql: &str) -> Result<(), InternalError> {
        let sql = sql.to_string();

        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }
}
