//! ## Crate layout
//! - `core`: sessions, the query compiler, relationship hydration and delete
//!   policies, versioned writes, adapters, config and observability.
//!
//! The `prelude` module carries the vocabulary needed to open a session,
//! build queries and store serde-shaped documents.

pub use sqldoc_core as core;

//
// Consts
//

/// Workspace version re-export for downstream tooling/tests.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error type returned by every fallible operation.
pub type Error = core::error::InternalError;

pub use core::{config, db, obs};

///
/// Prelude
///

pub mod prelude {
    pub use crate::core::{
        config::{DbConfig, SqliteConfig},
        db::{
            AsyncDb, Db, DeletePolicy, Document, Query, Registry, TableSpec,
            query::{Expr, FieldRef, any, col, element, field, rel},
        },
        value::Value,
    };
    pub use serde::{Deserialize, Serialize};
    pub use serde_json::json;

    #[cfg(feature = "sqlite")]
    pub use crate::core::db::SqliteAdapter;

    #[cfg(feature = "async")]
    pub use crate::core::db::AsyncSqliteAdapter;
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn prelude_builds_queries_without_a_session() {
        let registry = Registry::new();
        let compiled = Query::new("users")
            .filter(field("age").gte(18))
            .compile(&registry)
            .expect("compile");

        assert_eq!(compiled.params, vec![Value::Int(18)]);
        assert!(!crate::VERSION.is_empty());
    }
}
