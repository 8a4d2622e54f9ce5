//! Module: statement
//! Responsibility: SQL text for bootstrap, document writes and by-id reads.
//! Does not own: filter compilation (see `query::compile`).
//! Boundary: table names reaching this module are validated identifiers;
//! every value is a positional parameter.

use crate::{
    db::{
        path::{Path, is_reserved_column, is_sql_identifier},
        registry::{DATA_COLUMN, ID_COLUMN, VERSION_COLUMN},
    },
    error::{ErrorClass, ErrorOrigin, InternalError},
    value::Value,
};
use serde_json::Value as JsonValue;

///
/// Statement
///
/// One SQL string with its ordered parameters.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Statement {
    fn new(sql: String, params: Vec<Value>) -> Self {
        Self { sql, params }
    }
}

/// Reject anything that is not a plain SQL identifier before interpolation.
pub(crate) fn ident(name: &str) -> Result<&str, InternalError> {
    if is_sql_identifier(name) {
        Ok(name)
    } else {
        Err(InternalError::new(
            ErrorClass::Unsupported,
            ErrorOrigin::Query,
            format!("invalid identifier '{name}'"),
        ))
    }
}

// ----------------------------------------------------------------------
// Bootstrap
// ----------------------------------------------------------------------

pub(crate) fn create_table(table: &str, versioned: bool) -> Result<String, InternalError> {
    let table = ident(table)?;
    let version = if versioned {
        format!(", {VERSION_COLUMN} INTEGER NOT NULL DEFAULT 0")
    } else {
        String::new()
    };

    Ok(format!(
        "CREATE TABLE IF NOT EXISTS {table} ({ID_COLUMN} INTEGER PRIMARY KEY AUTOINCREMENT, {DATA_COLUMN} JSON NOT NULL{version})"
    ))
}

/// Default index name: `idx_<table>_<field with dots as underscores>`.
pub(crate) fn index_name(table: &str, field: &str) -> String {
    let suffix: String = field
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();

    format!("idx_{table}_{suffix}")
}

/// Index over a payload path, or over a literal column for `_`-prefixed names.
pub(crate) fn create_index(
    table: &str,
    field: &str,
    unique: bool,
    name: Option<&str>,
) -> Result<String, InternalError> {
    let table = ident(table)?;
    let default_name = index_name(table, field);
    let name = ident(name.unwrap_or(default_name.as_str()))?;
    let unique = if unique { "UNIQUE " } else { "" };
    let expr = if is_reserved_column(field) {
        field.to_string()
    } else {
        let path = Path::parse(field);
        if path.is_empty() {
            return Err(InternalError::new(
                ErrorClass::Unsupported,
                ErrorOrigin::Query,
                "cannot index an empty path",
            ));
        }
        format!("json_extract({DATA_COLUMN}, {})", path.to_sql_literal())
    };

    Ok(format!(
        "CREATE {unique}INDEX IF NOT EXISTS {name} ON {table} ({expr})"
    ))
}

pub(crate) fn drop_index(name: &str) -> Result<String, InternalError> {
    Ok(format!("DROP INDEX IF EXISTS {}", ident(name)?))
}

// ----------------------------------------------------------------------
// Writes
// ----------------------------------------------------------------------

/// Canonical payload text with any top-level `_id` stripped.
pub(crate) fn payload_text(doc: &JsonValue) -> String {
    match doc {
        JsonValue::Object(map) if map.contains_key(ID_COLUMN) => {
            let mut map = map.clone();
            map.remove(ID_COLUMN);
            JsonValue::Object(map).to_string()
        }
        other => other.to_string(),
    }
}

pub(crate) fn insert(table: &str, payload: String) -> Result<Statement, InternalError> {
    let table = ident(table)?;

    Ok(Statement::new(
        format!("INSERT INTO {table} ({DATA_COLUMN}) VALUES (json(?))"),
        vec![Value::Text(payload)],
    ))
}

/// Insert-or-replace by id. Versioned tables bump `_version` on conflict.
pub(crate) fn upsert(
    table: &str,
    id: i64,
    payload: String,
    versioned: bool,
) -> Result<Statement, InternalError> {
    let table = ident(table)?;
    let bump = if versioned {
        format!(", {VERSION_COLUMN} = {table}.{VERSION_COLUMN} + 1")
    } else {
        String::new()
    };

    Ok(Statement::new(
        format!(
            "INSERT INTO {table} ({ID_COLUMN}, {DATA_COLUMN}) VALUES (?, json(?)) ON CONFLICT({ID_COLUMN}) DO UPDATE SET {DATA_COLUMN} = excluded.{DATA_COLUMN}{bump}"
        ),
        vec![Value::Int(id), Value::Text(payload)],
    ))
}

/// Unconditional payload rewrite (set-null path). Versioned rows are bumped.
pub(crate) fn rewrite(
    table: &str,
    id: i64,
    payload: String,
    versioned: bool,
) -> Result<Statement, InternalError> {
    let table = ident(table)?;
    let bump = if versioned {
        format!(", {VERSION_COLUMN} = {VERSION_COLUMN} + 1")
    } else {
        String::new()
    };

    Ok(Statement::new(
        format!("UPDATE {table} SET {DATA_COLUMN} = json(?){bump} WHERE {ID_COLUMN} = ?"),
        vec![Value::Text(payload), Value::Int(id)],
    ))
}

pub(crate) fn delete_by_id(table: &str, id: i64) -> Result<Statement, InternalError> {
    let table = ident(table)?;

    Ok(Statement::new(
        format!("DELETE FROM {table} WHERE {ID_COLUMN} = ?"),
        vec![Value::Int(id)],
    ))
}

// ----------------------------------------------------------------------
// Reads
// ----------------------------------------------------------------------

pub(crate) fn select_by_id(table: &str, id: i64) -> Result<Statement, InternalError> {
    let table = ident(table)?;

    Ok(Statement::new(
        format!("SELECT {ID_COLUMN}, {DATA_COLUMN} FROM {table} WHERE {ID_COLUMN} = ?"),
        vec![Value::Int(id)],
    ))
}

/// Batched lookup: one statement for any number of ids.
///
/// The ids travel as a single JSON array parameter unpacked by `json_each`,
/// so the batch size is not bounded by SQLite's host-parameter limit.
pub(crate) fn select_by_ids(
    table: &str,
    ids: &[i64],
    columns: &str,
) -> Result<Statement, InternalError> {
    let table = ident(table)?;
    let ids = JsonValue::from(ids.to_vec()).to_string();

    Ok(Statement::new(
        format!(
            "SELECT {columns} FROM {table} WHERE {ID_COLUMN} IN (SELECT value FROM json_each(?))"
        ),
        vec![Value::Text(ids)],
    ))
}

pub(crate) fn select_versioned(table: &str, id: i64) -> Result<Statement, InternalError> {
    let table = ident(table)?;

    Ok(Statement::new(
        format!(
            "SELECT {ID_COLUMN}, {DATA_COLUMN}, {VERSION_COLUMN} FROM {table} WHERE {ID_COLUMN} = ?"
        ),
        vec![Value::Int(id)],
    ))
}

pub(crate) fn select_version(table: &str, id: i64) -> Result<Statement, InternalError> {
    let table = ident(table)?;

    Ok(Statement::new(
        format!("SELECT {VERSION_COLUMN} FROM {table} WHERE {ID_COLUMN} = ?"),
        vec![Value::Int(id)],
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn create_table_adds_version_column_when_requested() {
        let plain = create_table("users", false).expect("plain");
        let versioned = create_table("accounts", true).expect("versioned");

        assert_eq!(
            plain,
            "CREATE TABLE IF NOT EXISTS users (_id INTEGER PRIMARY KEY AUTOINCREMENT, data JSON NOT NULL)"
        );
        assert!(versioned.ends_with(", _version INTEGER NOT NULL DEFAULT 0)"));
    }

    #[test]
    fn create_index_uses_json_path_or_literal_column() {
        assert_eq!(
            create_index("users", "address.city", false, None).expect("json index"),
            "CREATE INDEX IF NOT EXISTS idx_users_address_city ON users (json_extract(data, '$.address.city'))"
        );
        assert_eq!(
            create_index("users", "_id", true, Some("users_pk")).expect("column index"),
            "CREATE UNIQUE INDEX IF NOT EXISTS users_pk ON users (_id)"
        );
    }

    #[test]
    fn identifiers_are_never_interpolated_unchecked() {
        assert!(create_table("users; DROP TABLE x", false).is_err());
        assert!(drop_index("idx x").is_err());
        assert!(select_by_id("users--", 1).is_err());
    }

    #[test]
    fn payload_text_strips_top_level_id_only() {
        let text = payload_text(&json!({"_id": 4, "name": "Ana", "child": {"_id": 2}}));
        let parsed: JsonValue = serde_json::from_str(&text).expect("json");

        assert_eq!(parsed, json!({"name": "Ana", "child": {"_id": 2}}));
    }

    #[test]
    fn batched_lookup_binds_ids_as_one_json_array() {
        let stmt = select_by_ids("addresses", &[3, 1, 2], "_id, data").expect("stmt");

        assert_eq!(
            stmt.sql,
            "SELECT _id, data FROM addresses WHERE _id IN (SELECT value FROM json_each(?))"
        );
        assert_eq!(stmt.params, vec![Value::Text("[3,1,2]".to_string())]);
    }

    #[test]
    fn batched_lookup_param_count_is_independent_of_batch_size() {
        let ids: Vec<i64> = (1..=40_000).collect();
        let stmt = select_by_ids("addresses", &ids, "_id").expect("stmt");

        assert_eq!(stmt.params.len(), 1);
        assert_eq!(stmt.sql.matches('?').count(), 1);
    }
}
