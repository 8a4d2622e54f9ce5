//! Core runtime for sqldoc: the JSON document layer over SQLite, its query
//! compiler, the relationship hydrator and integrity engine, and the
//! versioned-write controller.

// public exports are one module level down
pub mod config;
pub mod db;
pub mod error;
pub mod obs;
pub mod value;

///
/// Prelude
///
/// Prelude contains only domain vocabulary: sessions, queries and the
/// expression builders. Errors and adapters are imported explicitly.
///

pub mod prelude {
    pub use crate::{
        db::{
            AsyncDb, Db, DeletePolicy, Document, Query, Registry, TableSpec,
            query::{Expr, FieldRef, any, col, element, field, rel},
        },
        value::Value,
    };
}
