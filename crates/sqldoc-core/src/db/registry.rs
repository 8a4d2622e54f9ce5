//! Module: registry
//! Responsibility: table-to-relationship metadata shared by queries, the
//! hydrator and the integrity engine.
//! Does not own: schema creation or model validation.
//! Boundary: populated once at bootstrap, read-only afterwards (share via `Arc`).

use crate::{
    db::path::{is_sql_identifier, is_table_name},
    error::ErrorClass,
};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

/// Row identifier column every document table carries.
pub const ID_COLUMN: &str = "_id";

/// JSON payload column every document table carries.
pub const DATA_COLUMN: &str = "data";

/// Version stamp column carried by versioned tables.
pub const VERSION_COLUMN: &str = "_version";

///
/// RegistryError
///

#[derive(Debug, ThisError)]
pub enum RegistryError {
    #[error("table '{0}' already registered")]
    TableAlreadyRegistered(String),

    #[error("invalid identifier '{0}': expected [A-Za-z_][A-Za-z0-9_]*")]
    InvalidIdentifier(String),

    #[error("table name '{0}' uses the reserved alias prefix '__'")]
    ReservedTableName(String),

    #[error("relation '{table}.{field}' declared twice")]
    DuplicateRelation { table: String, field: String },
}

impl RegistryError {
    pub(crate) const fn class(&self) -> ErrorClass {
        match self {
            Self::TableAlreadyRegistered(_) | Self::DuplicateRelation { .. } => {
                ErrorClass::InvariantViolation
            }
            Self::InvalidIdentifier(_) | Self::ReservedTableName(_) => ErrorClass::Unsupported,
        }
    }
}

///
/// RelationSpec
///
/// One reference field on a source table and the table it points into.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RelationSpec {
    pub field: String,
    pub target: String,
    pub target_id_column: String,
}

///
/// TableSpec
///
/// Builder for one registry entry.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TableSpec {
    name: String,
    relations: BTreeMap<String, RelationSpec>,
    versioned: bool,
    pending_error: Option<String>,
}

impl TableSpec {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            relations: BTreeMap::new(),
            versioned: false,
            pending_error: None,
        }
    }

    /// Declare `field` as a reference into `target`.
    #[must_use]
    pub fn relation(mut self, field: impl Into<String>, target: impl Into<String>) -> Self {
        let field = field.into();
        if self.relations.contains_key(&field) {
            self.pending_error.get_or_insert_with(|| field.clone());
        }
        self.relations.insert(
            field.clone(),
            RelationSpec {
                field,
                target: target.into(),
                target_id_column: ID_COLUMN.to_string(),
            },
        );
        self
    }

    /// Mark the table as carrying a `_version` stamp.
    #[must_use]
    pub const fn versioned(mut self) -> Self {
        self.versioned = true;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub const fn is_versioned(&self) -> bool {
        self.versioned
    }

    /// Look up a declared relation by field name.
    #[must_use]
    pub fn relation_for(&self, field: &str) -> Option<&RelationSpec> {
        self.relations.get(field)
    }

    pub fn relations(&self) -> impl Iterator<Item = &RelationSpec> {
        self.relations.values()
    }

    fn validate(&self) -> Result<(), RegistryError> {
        if let Some(field) = &self.pending_error {
            return Err(RegistryError::DuplicateRelation {
                table: self.name.clone(),
                field: field.clone(),
            });
        }

        let idents = std::iter::once(self.name.as_str()).chain(
            self.relations
                .values()
                .flat_map(|r| [r.field.as_str(), r.target.as_str()]),
        );
        for ident in idents {
            if !is_sql_identifier(ident) {
                return Err(RegistryError::InvalidIdentifier(ident.to_string()));
            }
        }

        let tables = std::iter::once(self.name.as_str())
            .chain(self.relations.values().map(|r| r.target.as_str()));
        for table in tables {
            if !is_table_name(table) {
                return Err(RegistryError::ReservedTableName(table.to_string()));
            }
        }

        Ok(())
    }
}

///
/// Registry
///
/// Table name -> relationship metadata. Iteration order is by table name so
/// referrer scans are deterministic.
///

#[derive(Clone, Debug, Default)]
pub struct Registry {
    tables: BTreeMap<String, TableSpec>,
}

impl Registry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one table. Fails on invalid identifiers or double registration.
    pub fn register_table(&mut self, spec: TableSpec) -> Result<(), RegistryError> {
        spec.validate()?;
        if self.tables.contains_key(spec.name()) {
            return Err(RegistryError::TableAlreadyRegistered(spec.name.clone()));
        }
        self.tables.insert(spec.name.clone(), spec);

        Ok(())
    }

    /// Register a table from its reference field names and a target resolver.
    pub fn register<I, S>(
        &mut self,
        table: &str,
        reference_fields: I,
        target_table_of: impl Fn(&str) -> String,
    ) -> Result<(), RegistryError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let spec = reference_fields
            .into_iter()
            .fold(TableSpec::new(table), |spec, field| {
                let field = field.as_ref();
                spec.relation(field, target_table_of(field))
            });

        self.register_table(spec)
    }

    /// Chaining form of [`Self::register_table`] for bootstrap code.
    pub fn with_table(mut self, spec: TableSpec) -> Result<Self, RegistryError> {
        self.register_table(spec)?;
        Ok(self)
    }

    #[must_use]
    pub fn get(&self, table: &str) -> Option<&TableSpec> {
        self.tables.get(table)
    }

    #[must_use]
    pub fn contains(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    #[must_use]
    pub fn relation(&self, table: &str, field: &str) -> Option<&RelationSpec> {
        self.tables.get(table)?.relation_for(field)
    }

    #[must_use]
    pub fn is_versioned(&self, table: &str) -> bool {
        self.tables.get(table).is_some_and(TableSpec::is_versioned)
    }

    /// Iterate registered tables in name order.
    pub fn tables(&self) -> impl Iterator<Item = &TableSpec> {
        self.tables.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_resolves_targets_per_field() {
        let mut registry = Registry::new();
        registry
            .register("users", ["address", "employer"], |field| match field {
                "address" => "addresses".to_string(),
                _ => "companies".to_string(),
            })
            .expect("register users");

        assert_eq!(
            registry.relation("users", "address").map(|r| r.target.as_str()),
            Some("addresses")
        );
        assert_eq!(
            registry.relation("users", "employer").map(|r| r.target.as_str()),
            Some("companies")
        );
        assert!(registry.relation("users", "missing").is_none());
    }

    #[test]
    fn double_registration_is_rejected() {
        let mut registry = Registry::new();
        registry
            .register_table(TableSpec::new("users"))
            .expect("first");
        let err = registry
            .register_table(TableSpec::new("users"))
            .expect_err("second must fail");

        assert!(matches!(err, RegistryError::TableAlreadyRegistered(_)));
        assert_eq!(err.class(), ErrorClass::InvariantViolation);
    }

    #[test]
    fn identifiers_are_validated() {
        let err = Registry::new()
            .with_table(TableSpec::new("users").relation("address", "bad table"))
            .expect_err("invalid target");

        assert!(matches!(err, RegistryError::InvalidIdentifier(name) if name == "bad table"));
    }

    #[test]
    fn alias_prefixed_table_names_are_rejected() {
        let err = Registry::new()
            .with_table(TableSpec::new("__r0"))
            .expect_err("reserved source");
        assert!(matches!(err, RegistryError::ReservedTableName(ref name) if name == "__r0"));
        assert_eq!(err.class(), ErrorClass::Unsupported);

        let err = Registry::new()
            .with_table(TableSpec::new("users").relation("address", "__je0"))
            .expect_err("reserved target");
        assert!(matches!(err, RegistryError::ReservedTableName(name) if name == "__je0"));

        assert!(
            Registry::new()
                .with_table(TableSpec::new("r0").relation("next", "_r1"))
                .is_ok()
        );
    }

    #[test]
    fn duplicate_relation_fields_are_rejected() {
        let err = Registry::new()
            .with_table(
                TableSpec::new("users")
                    .relation("address", "addresses")
                    .relation("address", "places"),
            )
            .expect_err("duplicate relation");

        assert!(matches!(err, RegistryError::DuplicateRelation { .. }));
    }
}
