use crate::{
    db::{
        path::{Path, Segment, is_reserved_column},
        query::expr::{CompareOp, Expr},
        registry::ID_COLUMN,
    },
    value::Value,
};
use std::{fmt, sync::Arc};

///
/// FieldKind
///
/// Where a field reference reads from: a JSON path inside the payload column,
/// a literal table column, or the current array element inside `any`.
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum FieldKind {
    Json,
    Column,
    Element,
}

///
/// RelationHop
///
/// One traversal across a modeled relationship. `target` is optional; when
/// present the compiler checks it against the registry.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct RelationHop {
    pub field: String,
    pub target: Option<String>,
}

///
/// FieldRef
///
/// Immutable reference to a readable location. Extending a reference always
/// returns a new value.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct FieldRef {
    hops: Arc<[RelationHop]>,
    path: Path,
    kind: FieldKind,
}

impl FieldRef {
    /// Reference a payload path, or a literal column when the path is a single
    /// reserved identifier such as `_id`.
    #[must_use]
    pub fn new(path: impl Into<Path>) -> Self {
        let path = path.into();
        let kind = match path.single_key() {
            Some(key) if is_reserved_column(key) => FieldKind::Column,
            _ => FieldKind::Json,
        };

        Self {
            hops: Arc::from(Vec::new()),
            path,
            kind,
        }
    }

    /// Reference a payload path, never a column (even for `_`-prefixed keys).
    #[must_use]
    pub fn json(path: impl Into<Path>) -> Self {
        Self {
            hops: Arc::from(Vec::new()),
            path: path.into(),
            kind: FieldKind::Json,
        }
    }

    /// Reference a literal table column by name.
    #[must_use]
    pub fn column(name: impl Into<String>) -> Self {
        Self {
            hops: Arc::from(Vec::new()),
            path: Path::from_segments([Segment::Key(name.into())]),
            kind: FieldKind::Column,
        }
    }

    /// The current array element (only meaningful inside `any`).
    #[must_use]
    pub fn element() -> Self {
        Self {
            hops: Arc::from(Vec::new()),
            path: Path::root(),
            kind: FieldKind::Element,
        }
    }

    /// Descend into an object key.
    #[must_use]
    pub fn key(&self, key: impl Into<String>) -> Self {
        self.descend(Segment::Key(key.into()))
    }

    /// Descend into an array index.
    #[must_use]
    pub fn index(&self, index: usize) -> Self {
        self.descend(Segment::Index(index))
    }

    // Any extended path addresses the payload (or element) JSON, never a column.
    fn descend(&self, segment: Segment) -> Self {
        Self {
            hops: Arc::clone(&self.hops),
            path: self.path.child(segment),
            kind: FieldKind::Json,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> FieldKind {
        self.kind
    }

    #[must_use]
    pub const fn path(&self) -> &Path {
        &self.path
    }

    #[must_use]
    pub fn hops(&self) -> &[RelationHop] {
        &self.hops
    }

    // ------------------------------------------------------------------
    // Comparison predicates
    // ------------------------------------------------------------------

    #[must_use]
    pub fn eq(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Eq, value.into())
    }

    #[must_use]
    pub fn ne(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Ne, value.into())
    }

    #[must_use]
    pub fn lt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lt, value.into())
    }

    #[must_use]
    pub fn lte(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Lte, value.into())
    }

    #[must_use]
    pub fn gt(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gt, value.into())
    }

    #[must_use]
    pub fn gte(&self, value: impl Into<Value>) -> Expr {
        self.compare(CompareOp::Gte, value.into())
    }

    /// SQL `LIKE` pattern match (`%` and `_` wildcards).
    #[must_use]
    pub fn like(&self, pattern: impl Into<String>) -> Expr {
        self.compare(CompareOp::Like, Value::Text(pattern.into()))
    }

    fn compare(&self, op: CompareOp, value: Value) -> Expr {
        Expr::Compare {
            field: self.clone(),
            op,
            value,
        }
    }

    // ------------------------------------------------------------------
    // Structural predicates
    // ------------------------------------------------------------------

    /// Field is missing or explicitly null.
    #[must_use]
    pub fn is_null(&self) -> Expr {
        Expr::IsNull {
            field: self.clone(),
            negated: false,
        }
    }

    #[must_use]
    pub fn is_not_null(&self) -> Expr {
        Expr::IsNull {
            field: self.clone(),
            negated: true,
        }
    }

    // ------------------------------------------------------------------
    // Array predicates
    // ------------------------------------------------------------------

    /// Array at this path has an element equal to `value`.
    #[must_use]
    pub fn contains(&self, value: impl Into<Value>) -> Expr {
        Expr::Contains {
            field: self.clone(),
            value: value.into(),
        }
    }

    /// Some element at this path (or the scalar itself) is one of `values`.
    #[must_use]
    pub fn isin<I, V>(&self, values: I) -> Expr
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Expr::In {
            field: self.clone(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Some element of the array at this path satisfies `predicate`, with
    /// field references inside `predicate` read relative to that element.
    #[must_use]
    pub fn any(&self, predicate: Expr) -> Expr {
        Expr::Any {
            field: self.clone(),
            predicate: Box::new(predicate),
        }
    }
}

impl From<&str> for FieldRef {
    fn from(path: &str) -> Self {
        Self::new(path)
    }
}

impl From<String> for FieldRef {
    fn from(path: String) -> Self {
        Self::new(path)
    }
}

impl fmt::Display for FieldRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for hop in self.hops.iter() {
            write!(f, "{}->", hop.field)?;
        }
        match self.kind {
            FieldKind::Column => write!(f, "{}", self.path.single_key().unwrap_or_default()),
            FieldKind::Element => f.write_str("<element>"),
            FieldKind::Json => write!(f, "{}", self.path),
        }
    }
}

///
/// Relation
///
/// Builder for relationship-crossing field references:
/// `rel("address").field("city")`, `rel("order").then("customer").id()`.
///

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Relation {
    hops: Vec<RelationHop>,
}

impl Relation {
    #[must_use]
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            hops: vec![RelationHop {
                field: field.into(),
                target: None,
            }],
        }
    }

    /// Traverse another relation declared on the previous hop's target table.
    #[must_use]
    pub fn then(&self, field: impl Into<String>) -> Self {
        let mut hops = self.hops.clone();
        hops.push(RelationHop {
            field: field.into(),
            target: None,
        });

        Self { hops }
    }

    /// Pin the expected target table of the last hop.
    #[must_use]
    pub fn to(&self, target: impl Into<String>) -> Self {
        let mut hops = self.hops.clone();
        if let Some(last) = hops.last_mut() {
            last.target = Some(target.into());
        }

        Self { hops }
    }

    /// Reference a path on the final target table.
    #[must_use]
    pub fn field(&self, path: impl Into<Path>) -> FieldRef {
        let base = FieldRef::new(path);

        FieldRef {
            hops: self.hops.clone().into(),
            ..base
        }
    }

    /// Reference the final target row's identifier column.
    #[must_use]
    pub fn id(&self) -> FieldRef {
        let base = FieldRef::column(ID_COLUMN);

        FieldRef {
            hops: self.hops.clone().into(),
            ..base
        }
    }
}

// ----------------------------------------------------------------------
// Free constructors
// ----------------------------------------------------------------------

/// Shorthand for [`FieldRef::new`].
#[must_use]
pub fn field(path: impl Into<Path>) -> FieldRef {
    FieldRef::new(path)
}

/// Shorthand for [`FieldRef::column`].
#[must_use]
pub fn col(name: impl Into<String>) -> FieldRef {
    FieldRef::column(name)
}

/// Shorthand for [`FieldRef::element`].
#[must_use]
pub fn element() -> FieldRef {
    FieldRef::element()
}

/// Shorthand for [`Relation::new`].
#[must_use]
pub fn rel(field: impl Into<String>) -> Relation {
    Relation::new(field)
}

/// Shorthand for [`FieldRef::any`].
#[must_use]
pub fn any(array: impl Into<FieldRef>, predicate: Expr) -> Expr {
    array.into().any(predicate)
}
