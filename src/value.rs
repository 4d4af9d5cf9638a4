//! The engine's value universe.
//!
//! Every generator produces a [`Value`]; the request builder renders values
//! into path segments, query strings and JSON bodies. Canonical renderings
//! are fixed here so that a failure report and a replayed request always
//! agree byte-for-byte.

use std::fmt;

use chrono::DateTime;
use chrono::NaiveDate;
use chrono::SecondsFormat;
use chrono::Utc;
use uuid::Uuid;

/// A generated value of any supported shape.
///
/// `Record` keeps field order as drawn; `Map` keeps entry order as drawn
/// (keys already deduplicated). Absent optional record fields are omitted
/// entirely rather than carried as `Null`.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// The `none` arm of an optional value.
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Bytes(Vec<u8>),
    Uuid(Uuid),
    DateTime(DateTime<Utc>),
    Date(NaiveDate),
    Seq(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Record(Vec<(String, Value)>),
}

impl Value {
    /// Short tag for diagnostics.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Bytes(_) => "bytes",
            Value::Uuid(_) => "uuid",
            Value::DateTime(_) => "datetime",
            Value::Date(_) => "date",
            Value::Seq(_) => "seq",
            Value::Map(_) => "map",
            Value::Record(_) => "record",
        }
    }

    /// Canonical scalar rendering used in path segments and query strings.
    ///
    /// Integers as decimal, UUIDs as lowercase 8-4-4-4-12, booleans as
    /// `true`/`false`, datetimes as RFC 3339 UTC, dates as `%Y-%m-%d`,
    /// bytes as lowercase hex. Composite values render as compact JSON.
    pub fn render_plain(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => if *b { "true" } else { "false" }.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => format!("{f}"),
            Value::Str(s) => s.clone(),
            Value::Bytes(b) => hex_lower(b),
            Value::Uuid(u) => u.as_hyphenated().to_string(),
            Value::DateTime(dt) => dt.to_rfc3339_opts(SecondsFormat::Secs, true),
            Value::Date(d) => d.format("%Y-%m-%d").to_string(),
            other => other.to_json().to_string(),
        }
    }

    /// Convert into a JSON document for body serialization and reports.
    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Int(i) => serde_json::Value::Number((*i).into()),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::Str(s) => serde_json::Value::String(s.clone()),
            Value::Bytes(b) => serde_json::Value::String(hex_lower(b)),
            Value::Uuid(u) => serde_json::Value::String(u.as_hyphenated().to_string()),
            Value::DateTime(dt) => {
                serde_json::Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))
            }
            Value::Date(d) => serde_json::Value::String(d.format("%Y-%m-%d").to_string()),
            Value::Seq(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_json).collect())
            }
            Value::Map(entries) => serde_json::Value::Object(
                entries.iter().map(|(k, v)| (k.render_plain(), v.to_json())).collect(),
            ),
            Value::Record(fields) => serde_json::Value::Object(
                fields.iter().map(|(name, v)| (name.clone(), v.to_json())).collect(),
            ),
        }
    }

    /// Lift a JSON document back into the value universe.
    ///
    /// Used when bundle entries are extracted from response bodies.
    pub fn from_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Value::Int(i)
                } else {
                    Value::Float(n.as_f64().unwrap_or(0.0))
                }
            }
            serde_json::Value::String(s) => Value::Str(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Seq(items.iter().map(Value::from_json).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields.iter().map(|(k, v)| (k.clone(), Value::from_json(v))).collect(),
            ),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.render_plain())
    }
}

fn hex_lower(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_renderings_are_canonical() {
        assert_eq!(Value::Int(-42).render_plain(), "-42");
        assert_eq!(Value::Bool(true).render_plain(), "true");
        assert_eq!(Value::Bytes(vec![0x00, 0xff]).render_plain(), "00ff");
        assert_eq!(Value::Uuid(Uuid::nil()).render_plain(), "00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn epoch_datetime_renders_rfc3339() {
        let dt = DateTime::from_timestamp(0, 0).expect("epoch");
        assert_eq!(Value::DateTime(dt).render_plain(), "1970-01-01T00:00:00Z");
    }

    #[test]
    fn record_to_json_preserves_field_order_content() {
        let v = Value::Record(vec![
            ("id".to_string(), Value::Int(7)),
            ("name".to_string(), Value::Str("x".to_string())),
        ]);
        let json = v.to_json();
        assert_eq!(json["id"], 7);
        assert_eq!(json["name"], "x");
    }

    #[test]
    fn from_json_roundtrips_scalars() {
        let json = serde_json::json!({"n": 3, "f": 1.5, "s": "hi", "b": true, "z": null});
        let v = Value::from_json(&json);
        let back = v.to_json();
        assert_eq!(back, json);
    }
}
