//! Firestore REST API types and the JSON bridge used to store models.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value as Json};

use crate::error::{StoreError, StoreResult};

/// Firestore document value types.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String), // Firestore sends integers as strings
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    pub fields: Option<HashMap<String, Value>>,
}

/// Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Full resource name
    pub name: Option<String>,
    pub fields: Option<HashMap<String, Value>>,
    pub create_time: Option<String>,
    /// Used as the optimistic-concurrency version.
    pub update_time: Option<String>,
}

impl Document {
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }

    /// Last path segment of the resource name.
    pub fn doc_id(&self) -> Option<&str> {
        self.name.as_deref().and_then(|n| n.rsplit('/').next())
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.as_ref().and_then(|f| f.get(name))
    }
}

/// List documents response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListDocumentsResponse {
    pub documents: Option<Vec<Document>>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetDocumentsRequest {
    pub documents: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchGetDocumentsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub found: Option<Document>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing: Option<String>,
}

// ============================================================================
// Structured queries
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#where: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

impl StructuredQuery {
    /// Query `collection_id` for documents whose `field` equals `value`.
    pub fn field_equals(collection_id: &str, field: &str, value: Value) -> Self {
        Self {
            from: vec![CollectionSelector {
                collection_id: collection_id.to_string(),
                all_descendants: None,
            }],
            r#where: Some(Filter {
                field_filter: Some(FieldFilter {
                    field: FieldReference {
                        field_path: field.to_string(),
                    },
                    op: "EQUAL".to_string(),
                    value,
                }),
            }),
            limit: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_descendants: Option<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_filter: Option<FieldFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
    pub read_time: Option<String>,
}

// ============================================================================
// JSON bridge
// ============================================================================

/// Convert a JSON value into a Firestore value.
pub fn to_value(json: &Json) -> Value {
    match json {
        Json::Null => Value::NullValue(()),
        Json::Bool(b) => Value::BooleanValue(*b),
        Json::Number(n) => match n.as_i64() {
            Some(i) => Value::IntegerValue(i.to_string()),
            None => match n.as_u64() {
                Some(u) => Value::IntegerValue(u.to_string()),
                None => Value::DoubleValue(n.as_f64().unwrap_or_default()),
            },
        },
        Json::String(s) => Value::StringValue(s.clone()),
        Json::Array(items) => Value::ArrayValue(ArrayValue {
            values: Some(items.iter().map(to_value).collect()),
        }),
        Json::Object(map) => Value::MapValue(MapValue {
            fields: Some(map.iter().map(|(k, v)| (k.clone(), to_value(v))).collect()),
        }),
    }
}

/// Convert a Firestore value into JSON.
pub fn from_value(value: &Value) -> Json {
    match value {
        Value::NullValue(()) => Json::Null,
        Value::BooleanValue(b) => Json::Bool(*b),
        Value::IntegerValue(s) => s
            .parse::<i64>()
            .map(Json::from)
            .or_else(|_| s.parse::<u64>().map(Json::from))
            .unwrap_or_else(|_| Json::String(s.clone())),
        Value::DoubleValue(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
        Value::TimestampValue(s)
        | Value::StringValue(s)
        | Value::BytesValue(s)
        | Value::ReferenceValue(s) => Json::String(s.clone()),
        Value::ArrayValue(a) => Json::Array(
            a.values
                .as_deref()
                .unwrap_or_default()
                .iter()
                .map(from_value)
                .collect(),
        ),
        Value::MapValue(m) => Json::Object(fields_to_json(m.fields.as_ref())),
    }
}

fn fields_to_json(fields: Option<&HashMap<String, Value>>) -> Map<String, Json> {
    fields
        .map(|f| f.iter().map(|(k, v)| (k.clone(), from_value(v))).collect())
        .unwrap_or_default()
}

/// Encode a model as document fields. The model must serialize to an object.
pub fn encode<T: Serialize>(model: &T) -> StoreResult<HashMap<String, Value>> {
    match serde_json::to_value(model)? {
        Json::Object(map) => Ok(map.iter().map(|(k, v)| (k.clone(), to_value(v))).collect()),
        other => Err(StoreError::serialization(format!(
            "expected an object, got {}",
            other
        ))),
    }
}

/// Decode a document into a model.
pub fn decode<T: DeserializeOwned>(doc: &Document) -> StoreResult<T> {
    let json = Json::Object(fields_to_json(doc.fields.as_ref()));
    Ok(serde_json::from_value(json)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_integers_are_strings_on_the_wire() {
        let value = to_value(&json!(42));
        assert_eq!(value, Value::IntegerValue("42".to_string()));
        assert_eq!(
            serde_json::to_value(&value).unwrap(),
            json!({"integerValue": "42"})
        );
        assert_eq!(from_value(&value), json!(42));
    }

    #[test]
    fn test_nested_document_bridge() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Row {
            name: String,
            size: u64,
            ratio: f64,
            tags: Vec<String>,
            thumb: Option<String>,
        }

        let row = Row {
            name: "clip".into(),
            size: 1024,
            ratio: 0.5,
            tags: vec!["a".into(), "b".into()],
            thumb: None,
        };
        let doc = Document::new(encode(&row).unwrap());
        let back: Row = decode(&doc).unwrap();
        assert_eq!(back, row);
    }

    #[test]
    fn test_encode_rejects_scalars() {
        assert!(encode(&5u32).is_err());
    }

    #[test]
    fn test_wire_document_parses() {
        let wire = json!({
            "name": "projects/p/databases/(default)/documents/users/u1/media/m1",
            "fields": {
                "size_bytes": {"integerValue": "2048"},
                "thumbnail_path": {"nullValue": null},
                "kind": {"stringValue": "clip"}
            },
            "updateTime": "2024-01-01T00:00:00.123456Z"
        });
        let doc: Document = serde_json::from_value(wire).unwrap();
        assert_eq!(doc.doc_id(), Some("m1"));
        assert_eq!(doc.field("size_bytes"), Some(&Value::IntegerValue("2048".into())));
        assert!(doc.update_time.is_some());
    }

    #[test]
    fn test_field_equals_query_shape() {
        let query = StructuredQuery::field_equals("clips", "project_id", Value::StringValue("p1".into()));
        let json = serde_json::to_value(RunQueryRequest { structured_query: query }).unwrap();
        assert_eq!(json["structuredQuery"]["from"][0]["collectionId"], "clips");
        assert_eq!(json["structuredQuery"]["where"]["fieldFilter"]["op"], "EQUAL");
        assert!(json["structuredQuery"].get("limit").is_none());
    }
}
