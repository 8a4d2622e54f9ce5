//! Module: query::compile
//! Responsibility: lower expression trees and ordering terms into SQLite JSON1
//! SQL fragments with positional parameters and deduplicated joins.
//! Does not own: execution, statement assembly for writes, or hydration.
//! Boundary: pure and allocation-only; identical input always yields
//! byte-identical SQL and parameter order.

use crate::{
    db::{
        path::{ALIAS_PREFIX, Path, is_sql_identifier, is_table_name},
        query::{
            expr::{CompareOp, Expr},
            field::{FieldKind, FieldRef, RelationHop},
        },
        registry::{DATA_COLUMN, ID_COLUMN, Registry},
    },
    value::Value,
};
use std::collections::BTreeMap;
use thiserror::Error as ThisError;

///
/// CompileError
///
/// Malformed or self-contradictory expressions, reported before any SQL runs.
///

#[derive(Clone, Debug, Eq, PartialEq, ThisError)]
pub enum CompileError {
    #[error("empty path is not a valid filter target")]
    EmptyPath,

    #[error("invalid identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("undeclared relation '{field}' on table '{table}'")]
    UndeclaredRelation { table: String, field: String },

    #[error(
        "relation '{table}.{field}' targets '{declared}', but the expression expects '{requested}'"
    )]
    RelationTargetMismatch {
        table: String,
        field: String,
        declared: String,
        requested: String,
    },

    #[error("array operator '{op}' cannot read literal column '{field}'")]
    ArrayOperatorOnColumn { field: String, op: &'static str },

    #[error("scalar comparison on '{field}' received an array or object literal")]
    CollectionLiteral { field: String },

    #[error("relation traversal '{field}' is not allowed inside an array element scope")]
    RelationInElementScope { field: String },

    #[error("literal column '{field}' is not addressable inside an array element scope")]
    ColumnInElementScope { field: String },

    #[error("element reference used outside of any(...)")]
    ElementOutsideArrayScope,
}

///
/// Join
///
/// One relationship hop lowered into a `LEFT JOIN`. Each distinct hop chain
/// gets exactly one alias, shared by filtering and ordering.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Join {
    pub alias: String,
    pub table: String,
    pub source_alias: String,
    pub field: String,
    pub target_id_column: String,
}

impl Join {
    #[must_use]
    pub fn to_sql(&self) -> String {
        let reference_id = Path::from_segments([self.field.as_str(), ID_COLUMN]);

        format!(
            "LEFT JOIN {table} AS {alias} ON {alias}.{id} = json_extract({source}.{data}, {path})",
            table = self.table,
            alias = self.alias,
            id = self.target_id_column,
            source = self.source_alias,
            data = DATA_COLUMN,
            path = reference_id.to_sql_literal(),
        )
    }
}

///
/// CompiledExpr
///

#[derive(Clone, Debug, PartialEq)]
pub struct CompiledExpr {
    pub sql: String,
    pub params: Vec<Value>,
    pub joins: Vec<Join>,
}

/// Compile one expression against `root_table`.
pub fn compile(
    expr: &Expr,
    root_table: &str,
    registry: &Registry,
) -> Result<CompiledExpr, CompileError> {
    let mut compiler = Compiler::new(registry, root_table)?;
    let sql = compiler.expr(expr)?;
    let (params, joins) = compiler.finish();

    Ok(CompiledExpr { sql, params, joins })
}

///
/// Scope
///
/// Source that field references resolve against.
///

#[derive(Clone, Copy)]
enum Scope<'s> {
    Root,
    Element(&'s str),
}

///
/// Compiler
///
/// Single-use lowering state: parameter buffer, relation joins keyed by hop
/// chain, and a counter for array-scan aliases.
///

pub(crate) struct Compiler<'a> {
    registry: &'a Registry,
    root: &'a str,
    params: Vec<Value>,
    joins: Vec<Join>,
    join_aliases: BTreeMap<Vec<String>, usize>,
    next_scan: usize,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(registry: &'a Registry, root: &'a str) -> Result<Self, CompileError> {
        if !is_table_name(root) {
            return Err(CompileError::InvalidIdentifier(root.to_string()));
        }

        Ok(Self {
            registry,
            root,
            params: Vec::new(),
            joins: Vec::new(),
            join_aliases: BTreeMap::new(),
            next_scan: 0,
        })
    }

    pub(crate) fn push_param(&mut self, value: Value) {
        self.params.push(value);
    }

    pub(crate) fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub(crate) fn finish(self) -> (Vec<Value>, Vec<Join>) {
        (self.params, self.joins)
    }

    /// Lower a root-scoped expression.
    pub(crate) fn expr(&mut self, expr: &Expr) -> Result<String, CompileError> {
        self.lower(expr, Scope::Root)
    }

    /// Lower an ordering term's accessor (same rules as comparisons).
    pub(crate) fn order_accessor(&mut self, field: &FieldRef) -> Result<String, CompileError> {
        self.accessor(field, Scope::Root)
    }

    fn lower(&mut self, expr: &Expr, scope: Scope<'_>) -> Result<String, CompileError> {
        match expr {
            Expr::Compare { field, op, value } => self.compare(field, *op, value, scope),
            Expr::IsNull { field, negated } => {
                let accessor = self.accessor(field, scope)?;
                let test = if *negated { "IS NOT NULL" } else { "IS NULL" };

                Ok(format!("{accessor} {test}"))
            }
            Expr::Contains { field, value } => {
                if value.is_collection() {
                    return Err(CompileError::CollectionLiteral {
                        field: field.to_string(),
                    });
                }
                let source = self.array_source(field, "contains", scope)?;
                let alias = self.mint_scan_alias();
                self.push_param(value.clone());

                Ok(format!(
                    "EXISTS (SELECT 1 FROM {source} AS {alias} WHERE {alias}.value = ?)"
                ))
            }
            Expr::In { field, values } => {
                if values.iter().any(Value::is_collection) {
                    return Err(CompileError::CollectionLiteral {
                        field: field.to_string(),
                    });
                }
                let source = self.array_source(field, "isin", scope)?;
                if values.is_empty() {
                    return Ok("0".to_string());
                }
                let alias = self.mint_scan_alias();
                let placeholders = vec!["?"; values.len()].join(", ");
                self.params.extend(values.iter().cloned());

                Ok(format!(
                    "EXISTS (SELECT 1 FROM {source} AS {alias} WHERE {alias}.value IN ({placeholders}))"
                ))
            }
            Expr::Any { field, predicate } => {
                let source = self.array_source(field, "any", scope)?;
                let alias = self.mint_scan_alias();
                let inner = self.lower(predicate, Scope::Element(&alias))?;

                Ok(format!(
                    "EXISTS (SELECT 1 FROM {source} AS {alias} WHERE {inner})"
                ))
            }
            Expr::And(items) => self.junction(items, " AND ", "1", scope),
            Expr::Or(items) => self.junction(items, " OR ", "0", scope),
            Expr::Not(inner) => {
                let inner = self.lower(inner, scope)?;

                Ok(format!("NOT ({inner})"))
            }
        }
    }

    // Every operand is parenthesized so precedence never depends on the
    // operator mix inside it.
    fn junction(
        &mut self,
        items: &[Expr],
        separator: &str,
        empty: &str,
        scope: Scope<'_>,
    ) -> Result<String, CompileError> {
        if items.is_empty() {
            return Ok(empty.to_string());
        }

        let mut parts = Vec::with_capacity(items.len());
        for item in items {
            parts.push(format!("({})", self.lower(item, scope)?));
        }

        Ok(parts.join(separator))
    }

    fn compare(
        &mut self,
        field: &FieldRef,
        op: CompareOp,
        value: &Value,
        scope: Scope<'_>,
    ) -> Result<String, CompileError> {
        if value.is_collection() {
            return Err(CompileError::CollectionLiteral {
                field: field.to_string(),
            });
        }
        let accessor = self.accessor(field, scope)?;
        let op_sql = match (op, value.is_null()) {
            (CompareOp::Eq, true) => "IS",
            (CompareOp::Ne, true) => "IS NOT",
            _ => op.as_sql(),
        };
        self.push_param(value.clone());

        Ok(format!("{accessor} {op_sql} ?"))
    }

    // Scalar accessor for one field reference in `scope`.
    fn accessor(&mut self, field: &FieldRef, scope: Scope<'_>) -> Result<String, CompileError> {
        match scope {
            Scope::Root => {
                let source = self.resolve_hops(field.hops())?;
                match field.kind() {
                    FieldKind::Element => Err(CompileError::ElementOutsideArrayScope),
                    FieldKind::Column => Ok(format!("{source}.{}", column_name(field)?)),
                    FieldKind::Json if field.path().is_empty() => Err(CompileError::EmptyPath),
                    FieldKind::Json => Ok(format!(
                        "json_extract({source}.{DATA_COLUMN}, {})",
                        field.path().to_sql_literal()
                    )),
                }
            }
            Scope::Element(alias) => {
                reject_element_scope_misuse(field)?;
                if field.path().is_empty() {
                    Ok(format!("{alias}.value"))
                } else {
                    Ok(format!(
                        "json_extract({alias}.value, {})",
                        field.path().to_sql_literal()
                    ))
                }
            }
        }
    }

    // Table-valued `json_each(...)` source for one array-scanning leaf.
    fn array_source(
        &mut self,
        field: &FieldRef,
        op: &'static str,
        scope: Scope<'_>,
    ) -> Result<String, CompileError> {
        if field.kind() == FieldKind::Column {
            return Err(CompileError::ArrayOperatorOnColumn {
                field: field.to_string(),
                op,
            });
        }

        match scope {
            Scope::Root => {
                if field.kind() == FieldKind::Element {
                    return Err(CompileError::ElementOutsideArrayScope);
                }
                if field.path().is_empty() {
                    return Err(CompileError::EmptyPath);
                }
                let source = self.resolve_hops(field.hops())?;

                Ok(format!(
                    "json_each({source}.{DATA_COLUMN}, {})",
                    field.path().to_sql_literal()
                ))
            }
            Scope::Element(alias) => {
                reject_element_scope_misuse(field)?;
                if field.path().is_empty() {
                    Ok(format!("json_each({alias}.value)"))
                } else {
                    Ok(format!(
                        "json_each({alias}.value, {})",
                        field.path().to_sql_literal()
                    ))
                }
            }
        }
    }

    // Resolve a hop chain to the alias its final path is read from, minting
    // one join per previously unseen chain prefix.
    fn resolve_hops(&mut self, hops: &[RelationHop]) -> Result<String, CompileError> {
        let registry = self.registry;
        let mut table = self.root.to_string();
        let mut alias = self.root.to_string();
        let mut chain = Vec::with_capacity(hops.len());

        for hop in hops {
            let relation = registry.relation(&table, &hop.field).ok_or_else(|| {
                CompileError::UndeclaredRelation {
                    table: table.clone(),
                    field: hop.field.clone(),
                }
            })?;
            if let Some(requested) = &hop.target
                && requested != &relation.target
            {
                return Err(CompileError::RelationTargetMismatch {
                    table,
                    field: hop.field.clone(),
                    declared: relation.target.clone(),
                    requested: requested.clone(),
                });
            }

            chain.push(hop.field.clone());
            let index = if let Some(index) = self.join_aliases.get(&chain) {
                *index
            } else {
                let index = self.joins.len();
                self.joins.push(Join {
                    alias: format!("{ALIAS_PREFIX}r{index}"),
                    table: relation.target.clone(),
                    source_alias: alias.clone(),
                    field: hop.field.clone(),
                    target_id_column: relation.target_id_column.clone(),
                });
                self.join_aliases.insert(chain.clone(), index);
                index
            };

            alias.clone_from(&self.joins[index].alias);
            table.clone_from(&relation.target);
        }

        Ok(alias)
    }

    fn mint_scan_alias(&mut self) -> String {
        let alias = format!("{ALIAS_PREFIX}je{}", self.next_scan);
        self.next_scan += 1;

        alias
    }
}

fn column_name(field: &FieldRef) -> Result<&str, CompileError> {
    let name = field.path().single_key().ok_or(CompileError::EmptyPath)?;
    if is_sql_identifier(name) {
        Ok(name)
    } else {
        Err(CompileError::InvalidIdentifier(name.to_string()))
    }
}

fn reject_element_scope_misuse(field: &FieldRef) -> Result<(), CompileError> {
    if let Some(hop) = field.hops().first() {
        return Err(CompileError::RelationInElementScope {
            field: hop.field.clone(),
        });
    }
    if field.kind() == FieldKind::Column {
        return Err(CompileError::ColumnInElementScope {
            field: field.to_string(),
        });
    }

    Ok(())
}
