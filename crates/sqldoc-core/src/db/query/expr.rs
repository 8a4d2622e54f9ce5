use crate::{db::query::field::FieldRef, value::Value};
use std::{
    fmt,
    ops::{BitAnd, BitOr, Not},
};

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
    Like,
}

impl CompareOp {
    #[must_use]
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Lte => "<=",
            Self::Gt => ">",
            Self::Gte => ">=",
            Self::Like => "LIKE",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

///
/// Expr
///
/// Predicate tree over field references. Combinators (`&`, `|`, `!`) always
/// build a new node and never touch their operands, so any subtree can be
/// shared between queries.
///

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Compare {
        field: FieldRef,
        op: CompareOp,
        value: Value,
    },
    IsNull {
        field: FieldRef,
        negated: bool,
    },
    Contains {
        field: FieldRef,
        value: Value,
    },
    In {
        field: FieldRef,
        values: Vec<Value>,
    },
    Any {
        field: FieldRef,
        predicate: Box<Self>,
    },
    And(Vec<Self>),
    Or(Vec<Self>),
    Not(Box<Self>),
}

impl Expr {
    #[must_use]
    pub fn and(self, other: Self) -> Self {
        Self::And(vec![self, other])
    }

    #[must_use]
    pub fn or(self, other: Self) -> Self {
        Self::Or(vec![self, other])
    }

    #[must_use]
    pub fn negate(self) -> Self {
        Self::Not(Box::new(self))
    }

    /// Conjunction of every expression (empty input is always true).
    #[must_use]
    pub fn all(exprs: impl IntoIterator<Item = Self>) -> Self {
        Self::And(exprs.into_iter().collect())
    }

    /// Disjunction of every expression (empty input is always false).
    #[must_use]
    pub fn any_of(exprs: impl IntoIterator<Item = Self>) -> Self {
        Self::Or(exprs.into_iter().collect())
    }

    /// True when the leaf operator scans an array rather than reading a scalar.
    #[must_use]
    pub const fn is_array_leaf(&self) -> bool {
        matches!(self, Self::Contains { .. } | Self::In { .. } | Self::Any { .. })
    }
}

impl BitAnd for Expr {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self {
        self.and(rhs)
    }
}

impl BitAnd for &Expr {
    type Output = Expr;

    fn bitand(self, rhs: Self) -> Expr {
        self.clone().and(rhs.clone())
    }
}

impl BitOr for Expr {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        self.or(rhs)
    }
}

impl BitOr for &Expr {
    type Output = Expr;

    fn bitor(self, rhs: Self) -> Expr {
        self.clone().or(rhs.clone())
    }
}

impl Not for Expr {
    type Output = Self;

    fn not(self) -> Self {
        self.negate()
    }
}

impl Not for &Expr {
    type Output = Expr;

    fn not(self) -> Expr {
        self.clone().negate()
    }
}
