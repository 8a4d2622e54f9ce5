//! Module: relation::marker
//! Responsibility: the one place that decides whether a JSON object is a
//! reference marker, plus structural walks over markers in a payload.
//! Does not own: fetching targets or writing referrers.
//! Boundary: every other relation module goes through [`Marker::decode`].

use crate::db::path::{Path, Segment};
use serde_json::{Map, Value as JsonValue};

/// Marker key holding the target table name.
pub const TABLE_KEY: &str = "_table";

/// Marker key holding the target row identifier.
pub const ID_KEY: &str = "_id";

///
/// Marker
///
/// Decoded reference `{"_table": <table>, "_id": <int>}`. Objects with any
/// other key set (or wrong value types) are inline data, never references.
///

#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Marker {
    pub table: String,
    pub id: i64,
}

impl Marker {
    #[must_use]
    pub fn new(table: impl Into<String>, id: i64) -> Self {
        Self {
            table: table.into(),
            id,
        }
    }

    /// Decode `value` as a marker, or `None` when it is ordinary data.
    #[must_use]
    pub fn decode(value: &JsonValue) -> Option<Self> {
        let map = value.as_object()?;
        decode_map(map)
    }

    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        let mut map = Map::with_capacity(2);
        map.insert(TABLE_KEY.to_string(), JsonValue::from(self.table.as_str()));
        map.insert(ID_KEY.to_string(), JsonValue::from(self.id));

        JsonValue::Object(map)
    }

    /// Substrings the canonical (minified) marker text always contains.
    ///
    /// Used only as a cheap candidate prefilter; matches are confirmed
    /// structurally.
    #[must_use]
    pub fn prefilter_fragments(&self) -> [String; 2] {
        [
            format!("\"{TABLE_KEY}\":{}", JsonValue::from(self.table.as_str())),
            format!("\"{ID_KEY}\":{}", self.id),
        ]
    }
}

fn decode_map(map: &Map<String, JsonValue>) -> Option<Marker> {
    if map.len() != 2 {
        return None;
    }
    let table = map.get(TABLE_KEY)?.as_str()?;
    let id = map.get(ID_KEY)?.as_i64()?;

    Some(Marker::new(table, id))
}

/// Visit every marker in `value`, depth first, in document order.
pub fn for_each_marker(value: &JsonValue, f: &mut impl FnMut(Marker)) {
    if let Some(marker) = Marker::decode(value) {
        f(marker);
        return;
    }
    match value {
        JsonValue::Object(map) => {
            for child in map.values() {
                for_each_marker(child, f);
            }
        }
        JsonValue::Array(items) => {
            for child in items {
                for_each_marker(child, f);
            }
        }
        _ => {}
    }
}

/// Every marker in `value` together with the path it sits at.
#[must_use]
pub fn markers_with_paths(value: &JsonValue) -> Vec<(Path, Marker)> {
    fn walk(value: &JsonValue, prefix: &mut Vec<Segment>, out: &mut Vec<(Path, Marker)>) {
        if let Some(marker) = Marker::decode(value) {
            out.push((Path::from_segments(prefix.iter().cloned()), marker));
            return;
        }
        match value {
            JsonValue::Object(map) => {
                for (key, child) in map {
                    prefix.push(Segment::Key(key.clone()));
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            JsonValue::Array(items) => {
                for (index, child) in items.iter().enumerate() {
                    prefix.push(Segment::Index(index));
                    walk(child, prefix, out);
                    prefix.pop();
                }
            }
            _ => {}
        }
    }

    let mut out = Vec::new();
    walk(value, &mut Vec::new(), &mut out);
    out
}

/// Paths in `value` holding a marker equal to `target`.
#[must_use]
pub fn paths_to(value: &JsonValue, target: &Marker) -> Vec<Path> {
    markers_with_paths(value)
        .into_iter()
        .filter_map(|(path, marker)| (&marker == target).then_some(path))
        .collect()
}

/// Replace every marker equal to `target` with `null` in place.
///
/// Array elements are replaced, not removed, so array length and the
/// indexes of sibling elements are preserved. Returns the replacement count.
pub fn null_out(value: &mut JsonValue, target: &Marker) -> usize {
    if Marker::decode(value).as_ref() == Some(target) {
        *value = JsonValue::Null;
        return 1;
    }
    match value {
        JsonValue::Object(map) => map.values_mut().map(|v| null_out(v, target)).sum(),
        JsonValue::Array(items) => items.iter_mut().map(|v| null_out(v, target)).sum(),
        _ => 0,
    }
}
