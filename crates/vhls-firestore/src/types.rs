//! Firestore REST API wire types.
//!
//! Mirrors the JSON shapes of the Firestore v1 REST API: typed `Value`s,
//! `Document`s, and the structured query request used for catalog polling.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// =============================================================================
// Values
// =============================================================================

/// A Firestore typed value.
///
/// The full variant set is kept even where this crate never writes a
/// variant, since documents owned by other services may contain any of
/// them and a partial enum would fail deserialization of whole documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Value {
    NullValue(()),
    BooleanValue(bool),
    IntegerValue(String),
    DoubleValue(f64),
    TimestampValue(String),
    StringValue(String),
    BytesValue(String),
    ReferenceValue(String),
    GeoPointValue(serde_json::Value),
    ArrayValue(ArrayValue),
    MapValue(MapValue),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrayValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub values: Option<Vec<Value>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Value>>,
}

// =============================================================================
// Documents
// =============================================================================

/// A Firestore document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub fields: Option<HashMap<String, Value>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub create_time: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub update_time: Option<String>,
}

impl Document {
    /// Create a document body from fields (for create/update requests).
    pub fn new(fields: HashMap<String, Value>) -> Self {
        Self {
            name: None,
            fields: Some(fields),
            create_time: None,
            update_time: None,
        }
    }
}

// =============================================================================
// Structured Queries
// =============================================================================

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryRequest {
    pub structured_query: StructuredQuery,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StructuredQuery {
    pub from: Vec<CollectionSelector>,
    #[serde(rename = "where", skip_serializing_if = "Option::is_none")]
    pub r#where: Option<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_by: Option<Vec<Order>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectionSelector {
    pub collection_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub all_descendants: Option<bool>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field_filter: Option<FieldFilter>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldFilter {
    pub field: FieldReference,
    pub op: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldReference {
    pub field_path: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub field: FieldReference,
    pub direction: String,
}

/// One element of the streamed runQuery response array.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunQueryResponse {
    pub document: Option<Document>,
}

// =============================================================================
// Conversions
// =============================================================================

/// Convert a Rust value into a Firestore `Value`.
pub trait ToFirestoreValue {
    fn to_firestore_value(&self) -> Value;
}

/// Convert a Firestore `Value` back into a Rust value.
pub trait FromFirestoreValue: Sized {
    fn from_firestore_value(value: &Value) -> Option<Self>;
}

impl ToFirestoreValue for String {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.clone())
    }
}

impl ToFirestoreValue for &str {
    fn to_firestore_value(&self) -> Value {
        Value::StringValue(self.to_string())
    }
}

impl ToFirestoreValue for i64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u32 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for u64 {
    fn to_firestore_value(&self) -> Value {
        Value::IntegerValue(self.to_string())
    }
}

impl ToFirestoreValue for f64 {
    fn to_firestore_value(&self) -> Value {
        Value::DoubleValue(*self)
    }
}

impl ToFirestoreValue for bool {
    fn to_firestore_value(&self) -> Value {
        Value::BooleanValue(*self)
    }
}

impl ToFirestoreValue for DateTime<Utc> {
    fn to_firestore_value(&self) -> Value {
        Value::TimestampValue(self.to_rfc3339())
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Option<T> {
    fn to_firestore_value(&self) -> Value {
        match self {
            Some(v) => v.to_firestore_value(),
            None => Value::NullValue(()),
        }
    }
}

impl<T: ToFirestoreValue> ToFirestoreValue for Vec<T> {
    fn to_firestore_value(&self) -> Value {
        Value::ArrayValue(ArrayValue {
            values: Some(self.iter().map(|v| v.to_firestore_value()).collect()),
        })
    }
}

impl FromFirestoreValue for String {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::StringValue(s) => Some(s.clone()),
            Value::TimestampValue(s) => Some(s.clone()),
            _ => None,
        }
    }
}

impl FromFirestoreValue for i64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            Value::DoubleValue(d) => Some(*d as i64),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u32 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for u64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for f64 {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::DoubleValue(d) => Some(*d),
            Value::IntegerValue(s) => s.parse().ok(),
            _ => None,
        }
    }
}

impl FromFirestoreValue for bool {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::BooleanValue(b) => Some(*b),
            _ => None,
        }
    }
}

impl FromFirestoreValue for DateTime<Utc> {
    fn from_firestore_value(value: &Value) -> Option<Self> {
        match value {
            Value::TimestampValue(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_wire_shapes() {
        let s = serde_json::to_string(&"hls".to_string().to_firestore_value()).unwrap();
        assert_eq!(s, r#"{"stringValue":"hls"}"#);

        let n = serde_json::to_string(&42u32.to_firestore_value()).unwrap();
        assert_eq!(n, r#"{"integerValue":"42"}"#);

        let b = serde_json::to_string(&true.to_firestore_value()).unwrap();
        assert_eq!(b, r#"{"booleanValue":true}"#);
    }

    #[test]
    fn test_timestamp_round_trip() {
        let now = Utc::now();
        let value = now.to_firestore_value();
        let back = DateTime::<Utc>::from_firestore_value(&value).unwrap();
        assert_eq!(now.timestamp_micros(), back.timestamp_micros());
    }

    #[test]
    fn test_array_value_conversion() {
        let urls = vec!["a".to_string(), "b".to_string()];
        match urls.to_firestore_value() {
            Value::ArrayValue(array) => {
                assert_eq!(array.values.unwrap().len(), 2);
            }
            other => panic!("expected array value, got {:?}", other),
        }
    }

    #[test]
    fn test_query_serialization_is_camel_case() {
        let query = StructuredQuery {
            from: vec![CollectionSelector {
                collection_id: "videos".to_string(),
                all_descendants: None,
            }],
            r#where: Some(Filter {
                field_filter: Some(FieldFilter {
                    field: FieldReference {
                        field_path: "url".to_string(),
                    },
                    op: "GREATER_THAN".to_string(),
                    value: "".to_firestore_value(),
                }),
            }),
            order_by: Some(vec![Order {
                field: FieldReference {
                    field_path: "url".to_string(),
                },
                direction: "ASCENDING".to_string(),
            }]),
            limit: Some(5),
        };

        let json = serde_json::to_string(&RunQueryRequest {
            structured_query: query,
        })
        .unwrap();
        assert!(json.contains("\"structuredQuery\""));
        assert!(json.contains("\"collectionId\":\"videos\""));
        assert!(json.contains("\"fieldFilter\""));
        assert!(json.contains("\"fieldPath\":\"url\""));
        assert!(json.contains("\"orderBy\""));
    }

    #[test]
    fn test_document_deserializes_unfamiliar_value_kinds() {
        let json = r#"{
            "name": "projects/p/databases/(default)/documents/videos/v1",
            "fields": {
                "url": {"stringValue": "https://x/a.mp4"},
                "location": {"geoPointValue": {"latitude": 1.0, "longitude": 2.0}}
            },
            "updateTime": "2026-01-01T00:00:00Z"
        }"#;
        let doc: Document = serde_json::from_str(json).unwrap();
        assert!(doc.fields.unwrap().contains_key("location"));
    }
}
