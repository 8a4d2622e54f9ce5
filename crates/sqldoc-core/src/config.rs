//! Runtime configuration for sessions and the bundled SQLite adapter.
//!
//! Both structs deserialize from TOML with every field defaulted, so an empty
//! document yields the defaults.

use crate::{
    db::relation::DeletePolicy,
    error::{ErrorClass, ErrorOrigin, InternalError},
};
use serde::{Deserialize, Serialize};

///
/// DbConfig
///
/// Session behavior knobs.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct DbConfig {
    /// Hydrate reference markers on query terminals unless a query overrides it.
    pub resolve_by_default: bool,

    /// Maximum reference depth followed by one hydration pass (`None` = unbounded).
    pub max_hydration_depth: Option<usize>,

    /// Policy used by `delete(table, id)`.
    pub default_delete_policy: DeletePolicy,

    /// Wrap set-null and cascade deletes in one BEGIN/COMMIT.
    pub transactional_deletes: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            resolve_by_default: true,
            max_hydration_depth: None,
            default_delete_policy: DeletePolicy::Restrict,
            transactional_deletes: false,
        }
    }
}

impl DbConfig {
    pub fn from_toml_str(contents: &str) -> Result<Self, InternalError> {
        toml::from_str(contents).map_err(config_error)
    }
}

///
/// SqliteConfig
///
/// Connection target plus the pragma statements applied on open.
///

#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file path, or `:memory:`.
    pub path: String,
    pub pragmas: Vec<String>,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl SqliteConfig {
    pub const MEMORY_PATH: &'static str = ":memory:";

    /// Private in-memory database tuned for throughput.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            path: Self::MEMORY_PATH.to_string(),
            pragmas: pragmas(&[
                "PRAGMA foreign_keys = ON",
                "PRAGMA synchronous = OFF",
                "PRAGMA journal_mode = MEMORY",
                "PRAGMA temp_store = MEMORY",
                "PRAGMA cache_size = -32000",
                "PRAGMA locking_mode = EXCLUSIVE",
            ]),
        }
    }

    /// File-backed database in WAL mode.
    #[must_use]
    pub fn on_disk(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            pragmas: pragmas(&[
                "PRAGMA foreign_keys = ON",
                "PRAGMA busy_timeout = 5000",
                "PRAGMA journal_mode = WAL",
                "PRAGMA synchronous = NORMAL",
                "PRAGMA cache_size = -64000",
                "PRAGMA wal_autocheckpoint = 1000",
                "PRAGMA mmap_size = 268435456",
                "PRAGMA temp_store = MEMORY",
            ]),
        }
    }

    #[must_use]
    pub fn is_memory(&self) -> bool {
        self.path == Self::MEMORY_PATH
    }

    /// Pragmas joined into one script for `execute_batch`.
    #[must_use]
    pub fn pragma_script(&self) -> String {
        self.pragmas
            .iter()
            .map(|p| format!("{};", p.trim_end_matches(';')))
            .collect::<Vec<_>>()
            .join("\n")
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, InternalError> {
        toml::from_str(contents).map_err(config_error)
    }
}

fn pragmas(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

fn config_error(err: toml::de::Error) -> InternalError {
    InternalError::new(
        ErrorClass::Unsupported,
        ErrorOrigin::Config,
        format!("invalid configuration: {err}"),
    )
}
