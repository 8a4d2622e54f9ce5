//! Module: path
//! Responsibility: normalized locations inside a JSON payload.
//! Does not own: deciding which source (table, alias, element) a path is read from.
//! Boundary: pure value type shared by field references, the compiler and the
//! integrity walker.

use std::{fmt, sync::Arc};

///
/// Segment
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Segment {
    Key(String),
    Index(usize),
}

impl From<&str> for Segment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_string())
    }
}

impl From<String> for Segment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for Segment {
    fn from(index: usize) -> Self {
        Self::Index(index)
    }
}

///
/// Path
///
/// Ordered, immutable sequence of segments. Cloning shares the segment buffer.
///

#[derive(Clone, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Path(Arc<[Segment]>);

impl Path {
    /// The empty path (the document or element itself).
    #[must_use]
    pub fn root() -> Self {
        Self(Arc::from(Vec::new()))
    }

    #[must_use]
    pub fn from_segments<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<Segment>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path such as `meta.tags[0].name`.
    ///
    /// Bracketed integers become array indexes; any other bracket content is
    /// taken as a literal key (surrounding quotes stripped). Empty segments are
    /// dropped, so `""` parses to the empty path.
    #[must_use]
    pub fn parse(input: &str) -> Self {
        let mut segments = Vec::new();
        let mut buffer = String::new();
        let mut chars = input.chars();

        while let Some(ch) = chars.next() {
            match ch {
                '.' => {
                    if !buffer.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut buffer)));
                    }
                }
                '[' => {
                    if !buffer.is_empty() {
                        segments.push(Segment::Key(std::mem::take(&mut buffer)));
                    }
                    let mut inner = String::new();
                    for next in chars.by_ref() {
                        if next == ']' {
                            break;
                        }
                        inner.push(next);
                    }
                    if let Ok(index) = inner.trim().parse::<usize>() {
                        segments.push(Segment::Index(index));
                    } else {
                        let key = inner.trim().trim_matches(|c| c == '"' || c == '\'');
                        if !key.is_empty() {
                            segments.push(Segment::Key(key.to_string()));
                        }
                    }
                }
                _ => buffer.push(ch),
            }
        }

        if !buffer.is_empty() {
            segments.push(Segment::Key(buffer));
        }

        Self(segments.into())
    }

    #[must_use]
    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Return a new path with one more segment.
    #[must_use]
    pub fn child(&self, segment: impl Into<Segment>) -> Self {
        let mut segments = self.0.to_vec();
        segments.push(segment.into());

        Self(segments.into())
    }

    /// Return the single key if this path is exactly one key segment.
    #[must_use]
    pub fn single_key(&self) -> Option<&str> {
        match &*self.0 {
            [Segment::Key(key)] => Some(key),
            _ => None,
        }
    }

    /// Render the JSON path accessor, e.g. `$.meta."odd key"[0]`.
    #[must_use]
    pub fn to_json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in self.0.iter() {
            match segment {
                Segment::Index(index) => {
                    out.push('[');
                    out.push_str(&index.to_string());
                    out.push(']');
                }
                Segment::Key(key) if is_plain_key(key) => {
                    out.push('.');
                    out.push_str(key);
                }
                Segment::Key(key) => {
                    out.push_str(".\"");
                    out.push_str(&key.replace('\\', "\\\\").replace('"', "\\\""));
                    out.push('"');
                }
            }
        }

        out
    }

    /// Render the JSON path as a single-quoted SQL string literal.
    #[must_use]
    pub fn to_sql_literal(&self) -> String {
        format!("'{}'", self.to_json_path().replace('\'', "''"))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_path())
    }
}

impl From<&str> for Path {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<String> for Path {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

// JSON path identifiers must start with a letter or underscore and contain only
// alphanumerics or underscores; anything else is quoted.
fn is_plain_key(key: &str) -> bool {
    let mut chars = key.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// True for identifiers safe to interpolate as SQL table or column names.
#[must_use]
pub fn is_sql_identifier(ident: &str) -> bool {
    is_plain_key(ident)
}

/// Prefix of the aliases the query compiler mints for joins and array scans.
pub const ALIAS_PREFIX: &str = "__";

/// True for identifiers usable as table names: plain SQL identifiers outside
/// the compiler's alias namespace.
#[must_use]
pub fn is_table_name(ident: &str) -> bool {
    is_sql_identifier(ident) && !ident.starts_with(ALIAS_PREFIX)
}

/// True for the reserved literal-column pattern (leading underscore).
#[must_use]
pub fn is_reserved_column(ident: &str) -> bool {
    ident.starts_with('_') && is_plain_key(ident)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_handles_keys_and_indexes() {
        let path = Path::parse("meta.tags[0].name");

        assert_eq!(
            path.segments(),
            &[
                Segment::Key("meta".into()),
                Segment::Key("tags".into()),
                Segment::Index(0),
                Segment::Key("name".into()),
            ]
        );
        assert_eq!(path.to_json_path(), "$.meta.tags[0].name");
    }

    #[test]
    fn parse_drops_empty_segments() {
        assert!(Path::parse("").is_empty());
        assert_eq!(Path::parse("a..b").len(), 2);
    }

    #[test]
    fn odd_keys_are_quoted_and_escaped() {
        let path = Path::from_segments(["has space", "it's", "q\"uote"]);

        assert_eq!(path.to_json_path(), r#"$."has space"."it's"."q\"uote""#);
        assert_eq!(
            path.to_sql_literal(),
            r#"'$."has space"."it''s"."q\"uote"'"#
        );
    }

    #[test]
    fn bracketed_non_numeric_is_a_key() {
        let path = Path::parse("a[\"b.c\"]");

        assert_eq!(path.segments(), &[Segment::from("a"), Segment::from("b.c")]);
    }

    #[test]
    fn reserved_columns_need_leading_underscore() {
        assert!(is_reserved_column("_id"));
        assert!(is_reserved_column("_version"));
        assert!(!is_reserved_column("id"));
        assert!(!is_reserved_column("_bad-name"));
        assert!(is_sql_identifier("users"));
        assert!(!is_sql_identifier("users; drop"));
    }
}
