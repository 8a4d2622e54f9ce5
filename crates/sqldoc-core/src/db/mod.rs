pub mod adapter;
pub mod async_session;
pub mod document;
pub mod path;
pub mod query;
pub mod registry;
pub mod relation;
pub mod session;
pub(crate) mod statement;
pub mod version;

// re-exports
pub use adapter::{Adapter, AsyncAdapter, ExecResult, Row};
pub use async_session::AsyncDb;
pub use document::Document;
pub use path::{Path, Segment};
pub use query::{CompiledQuery, OrderDirection, Query};
pub use registry::{Registry, RegistryError, RelationSpec, TableSpec};
pub use relation::{
    DeletePolicy, DeleteReport, IntegrityViolation, Marker, ReferenceState, ReferenceStatus,
    Referrer,
};
pub use session::Db;
pub use version::{INITIAL_VERSION, VersionedDocument};

#[cfg(feature = "sqlite")]
pub use adapter::SqliteAdapter;

#[cfg(feature = "async")]
pub use adapter::AsyncSqliteAdapter;
