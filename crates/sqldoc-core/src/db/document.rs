use crate::{
    db::{adapter::Row, registry::ID_COLUMN},
    error::{ErrorClass, ErrorOrigin, InternalError},
};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

///
/// Document
///
/// One stored row: its identifier and its (possibly hydrated) payload.
///

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub id: i64,
    pub data: JsonValue,
}

impl Document {
    #[must_use]
    pub const fn new(id: i64, data: JsonValue) -> Self {
        Self { id, data }
    }

    /// Decode a `(_id, data)` projection row.
    pub(crate) fn from_row(table: &str, row: &Row) -> Result<Self, InternalError> {
        let id = row.int(0)?;
        let data = serde_json::from_str(row.text(1)?)
            .map_err(|err| InternalError::payload_corruption(table, id, err))?;

        Ok(Self { id, data })
    }

    pub(crate) fn from_rows(table: &str, rows: &[Row]) -> Result<Vec<Self>, InternalError> {
        rows.iter().map(|row| Self::from_row(table, row)).collect()
    }

    /// Top-level payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&JsonValue> {
        self.data.get(key)
    }

    /// Payload with `_id` merged in, as the object layer sees it.
    #[must_use]
    pub fn into_json(self) -> JsonValue {
        match self.data {
            JsonValue::Object(mut map) => {
                map.insert(ID_COLUMN.to_string(), JsonValue::from(self.id));
                JsonValue::Object(map)
            }
            other => other,
        }
    }

    /// Decode into a typed value (the payload plus `_id`).
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, InternalError> {
        serde_json::from_value(self.clone().into_json()).map_err(|err| {
            InternalError::new(
                ErrorClass::Unsupported,
                ErrorOrigin::Serialize,
                format!("document {} does not match the requested type: {err}", self.id),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct User {
        _id: i64,
        name: String,
    }

    #[test]
    fn decode_sees_the_row_id() {
        let doc = Document::new(7, json!({"name": "Ana"}));

        assert_eq!(
            doc.decode::<User>().expect("decode"),
            User {
                _id: 7,
                name: "Ana".into()
            }
        );
    }

    #[test]
    fn undecodable_payload_is_corruption() {
        let row = Row::new(vec![Value::Int(3), Value::from("{not json")]);
        let err = Document::from_row("users", &row).expect_err("corrupt");

        assert_eq!(err.class, ErrorClass::Corruption);
    }
}
