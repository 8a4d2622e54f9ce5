use crate::{
    config::SqliteConfig,
    db::adapter::{Adapter, ExecResult, Row},
    error::InternalError,
    value::Value,
};
use parking_lot::Mutex;
use rusqlite::{
    Connection, params_from_iter,
    types::{ToSql, ToSqlOutput, Value as SqlValue, ValueRef},
};
use serde_json::Value as JsonValue;
use tracing::{debug, instrument};

impl From<rusqlite::Error> for InternalError {
    fn from(err: rusqlite::Error) -> Self {
        Self::adapter(err)
    }
}

// JSON collections bind as canonical text; JSON scalars bind like their
// native counterparts so they compare equal to `json_extract` output.
impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Self::Null => ToSqlOutput::Owned(SqlValue::Null),
            Self::Bool(v) => ToSqlOutput::Owned(SqlValue::Integer(i64::from(*v))),
            Self::Int(v) => ToSqlOutput::Owned(SqlValue::Integer(*v)),
            Self::Float(v) => ToSqlOutput::Owned(SqlValue::Real(*v)),
            Self::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
            Self::Json(v) => ToSqlOutput::Owned(json_to_sql(v)),
        })
    }
}

fn json_to_sql(value: &JsonValue) -> SqlValue {
    match value {
        JsonValue::Null => SqlValue::Null,
        JsonValue::Bool(v) => SqlValue::Integer(i64::from(*v)),
        JsonValue::Number(n) => n
            .as_i64()
            .map(SqlValue::Integer)
            .or_else(|| n.as_f64().map(SqlValue::Real))
            .unwrap_or_else(|| SqlValue::Text(n.to_string())),
        JsonValue::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

fn read_value(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(n) => Value::Int(n),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(t) | ValueRef::Blob(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
    }
}

// ----------------------------------------------------------------------
// Connection-level primitives shared by the blocking and async adapters
// ----------------------------------------------------------------------

pub(super) fn open(config: &SqliteConfig) -> Result<Connection, InternalError> {
    let conn = if config.is_memory() {
        Connection::open_in_memory()?
    } else {
        Connection::open(&config.path)?
    };
    conn.execute_batch(&config.pragma_script())?;
    debug!(path = %config.path, pragmas = config.pragmas.len(), "opened sqlite connection");

    Ok(conn)
}

pub(super) fn execute_on(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<ExecResult, InternalError> {
    let rows_affected = conn.execute(sql, params_from_iter(params.iter()))?;

    Ok(ExecResult {
        rows_affected,
        last_insert_id: conn.last_insert_rowid(),
    })
}

pub(super) fn query_on(
    conn: &Connection,
    sql: &str,
    params: &[Value],
) -> Result<Vec<Row>, InternalError> {
    let mut stmt = conn.prepare(sql)?;
    let columns = stmt.column_count();
    let rows = stmt.query_map(params_from_iter(params.iter()), |row| {
        let mut values = Vec::with_capacity(columns);
        for index in 0..columns {
            values.push(read_value(row.get_ref(index)?));
        }
        Ok(Row::new(values))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }

    Ok(out)
}

///
/// SqliteAdapter
///
/// Blocking adapter over one SQLite connection.
///

pub struct SqliteAdapter {
    conn: Mutex<Connection>,
}

impl SqliteAdapter {
    #[instrument(skip_all, fields(path = %config.path))]
    pub fn open(config: &SqliteConfig) -> Result<Self, InternalError> {
        Ok(Self {
            conn: Mutex::new(open(config)?),
        })
    }

    /// In-memory database with the in-memory pragma preset.
    pub fn in_memory() -> Result<Self, InternalError> {
        Self::open(&SqliteConfig::in_memory())
    }

    /// File-backed database with the on-disk pragma preset.
    pub fn on_disk(path: impl Into<String>) -> Result<Self, InternalError> {
        Self::open(&SqliteConfig::on_disk(path))
    }

    /// Wrap an already configured connection.
    #[must_use]
    pub fn from_connection(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }
}

impl Adapter for SqliteAdapter {
    fn execute(&self, sql: &str, params: &[Value]) -> Result<ExecResult, InternalError> {
        execute_on(&self.conn.lock(), sql, params)
    }

    fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, InternalError> {
        query_on(&self.conn.lock(), sql, params)
    }

    fn execute_batch(&self, sql: &str) -> Result<(), InternalError> {
        self.conn.lock().execute_batch(sql)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn values_round_trip_through_the_engine() {
        let adapter = SqliteAdapter::in_memory().expect("open");
        let rows = adapter
            .query(
                "SELECT ?, ?, ?, ?, ?, json_extract(?, '$.a')",
                &[
                    Value::Null,
                    Value::Bool(true),
                    Value::Int(7),
                    Value::Float(1.5),
                    Value::from("x"),
                    Value::Json(json!({"a": 3})),
                ],
            )
            .expect("query");

        assert_eq!(
            rows[0].clone().into_values(),
            vec![
                Value::Null,
                Value::Int(1),
                Value::Int(7),
                Value::Float(1.5),
                Value::from("x"),
                Value::Int(3),
            ]
        );
    }

    #[test]
    fn execute_reports_rows_and_last_id() {
        let adapter = SqliteAdapter::in_memory().expect("open");
        adapter
            .execute_batch("CREATE TABLE t (_id INTEGER PRIMARY KEY AUTOINCREMENT, data JSON)")
            .expect("create");

        let first = adapter
            .execute("INSERT INTO t (data) VALUES (json(?))", &[Value::from("{}")])
            .expect("insert");
        assert_eq!(first.rows_affected, 1);
        assert_eq!(first.last_insert_id, 1);
    }

    #[test]
    fn engine_errors_surface_as_adapter_errors() {
        let adapter = SqliteAdapter::in_memory().expect("open");
        let err = adapter
            .query("SELECT * FROM missing_table", &[])
            .expect_err("missing table");

        assert!(err.is_adapter_error());
    }

    #[test]
    fn rollback_discards_writes() {
        let adapter = SqliteAdapter::in_memory().expect("open");
        adapter
            .execute_batch("CREATE TABLE t (_id INTEGER PRIMARY KEY, data JSON)")
            .expect("create");

        adapter.begin().expect("begin");
        adapter
            .execute("INSERT INTO t (data) VALUES ('{}')", &[])
            .expect("insert");
        adapter.rollback().expect("rollback");

        let rows = adapter.query("SELECT COUNT(*) FROM t", &[]).expect("count");
        assert_eq!(rows[0].int(0).expect("int"), 0);
    }
}
