//! Schema AST shared by parameter declarations and the generator registry.
//!
//! [`TypeRef`] is an explicit, hashable description of a value shape. Route
//! extractors build `TypeRef`s at discovery time; the registry keys
//! generators off them; the schema validator checks response bodies against
//! them. Recursive shapes go through [`TypeRef::Ref`] and a [`SchemaTable`]
//! that owns the referenced bodies, so the AST itself stays acyclic.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// Primitive scalar shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    Str,
    Int,
    Float,
    Bool,
    Bytes,
    Uuid,
    DateTime,
    Date,
}

impl Primitive {
    pub fn name(&self) -> &'static str {
        match self {
            Primitive::Str => "str",
            Primitive::Int => "int",
            Primitive::Float => "float",
            Primitive::Bool => "bool",
            Primitive::Bytes => "bytes",
            Primitive::Uuid => "uuid",
            Primitive::DateTime => "datetime",
            Primitive::Date => "date",
        }
    }
}

/// One field of a record shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Field {
    pub name: String,
    pub ty: TypeRef,
    pub required: bool,
}

impl Field {
    pub fn required(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), ty, required: true }
    }

    pub fn optional(name: impl Into<String>, ty: TypeRef) -> Self {
        Self { name: name.into(), ty, required: false }
    }
}

/// Tagged-variant schema node.
///
/// Structural identity (`Eq` + `Hash`) is the registry key for non-named
/// shapes; `Ref` names resolve through a [`SchemaTable`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Primitive(Primitive),
    Optional(Box<TypeRef>),
    Seq { item: Box<TypeRef>, min: usize, max: usize },
    Map { key: Box<TypeRef>, value: Box<TypeRef>, min: usize, max: usize },
    Enum(Vec<String>),
    Record(Vec<Field>),
    OneOf(Vec<TypeRef>),
    Ref(String),
}

impl TypeRef {
    pub fn str() -> Self {
        TypeRef::Primitive(Primitive::Str)
    }

    pub fn int() -> Self {
        TypeRef::Primitive(Primitive::Int)
    }

    pub fn float() -> Self {
        TypeRef::Primitive(Primitive::Float)
    }

    pub fn bool() -> Self {
        TypeRef::Primitive(Primitive::Bool)
    }

    pub fn bytes() -> Self {
        TypeRef::Primitive(Primitive::Bytes)
    }

    pub fn uuid() -> Self {
        TypeRef::Primitive(Primitive::Uuid)
    }

    pub fn datetime() -> Self {
        TypeRef::Primitive(Primitive::DateTime)
    }

    pub fn date() -> Self {
        TypeRef::Primitive(Primitive::Date)
    }

    pub fn optional(inner: TypeRef) -> Self {
        TypeRef::Optional(Box::new(inner))
    }

    pub fn seq(item: TypeRef, min: usize, max: usize) -> Self {
        TypeRef::Seq { item: Box::new(item), min, max }
    }

    pub fn map(key: TypeRef, value: TypeRef, min: usize, max: usize) -> Self {
        TypeRef::Map { key: Box::new(key), value: Box::new(value), min, max }
    }

    pub fn record(fields: Vec<Field>) -> Self {
        TypeRef::Record(fields)
    }

    pub fn reference(name: impl Into<String>) -> Self {
        TypeRef::Ref(name.into())
    }

    /// Compact human-readable description used in error messages.
    pub fn describe(&self) -> String {
        match self {
            TypeRef::Primitive(p) => p.name().to_string(),
            TypeRef::Optional(inner) => format!("optional<{}>", inner.describe()),
            TypeRef::Seq { item, .. } => format!("seq<{}>", item.describe()),
            TypeRef::Map { key, value, .. } => {
                format!("map<{}, {}>", key.describe(), value.describe())
            }
            TypeRef::Enum(values) => format!("enum[{}]", values.len()),
            TypeRef::Record(fields) => format!("record[{}]", fields.len()),
            TypeRef::OneOf(variants) => format!("one_of[{}]", variants.len()),
            TypeRef::Ref(name) => format!("ref '{name}'"),
        }
    }
}

/// Named schema bodies for `Ref` resolution.
///
/// The table is the only owner of recursive shapes; cloning it is cheap
/// enough for run snapshots (shapes are small and immutable).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaTable {
    entries: BTreeMap<String, TypeRef>,
}

impl SchemaTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, ty: TypeRef) {
        self.entries.insert(name.into(), ty);
    }

    pub fn get(&self, name: &str) -> Option<&TypeRef> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Errors from JSON-Schema lowering.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaError {
    #[error("unsupported json schema construct: {construct}")]
    Unsupported { construct: String },
    #[error("malformed json schema: {reason}")]
    Malformed { reason: String },
}

/// Lower a JSON Schema document into a [`TypeRef`].
///
/// Covers the subset extractors actually emit: `type`, `properties` +
/// `required`, `items`, `enum`, `oneOf`/`anyOf`, `format` for
/// uuid/date-time/date, `minItems`/`maxItems`, `additionalProperties`
/// (map shapes), `$ref` (`#/components/schemas/<name>` and
/// `#/definitions/<name>`), and `nullable`.
pub fn from_json_schema(schema: &serde_json::Value) -> Result<TypeRef, SchemaError> {
    let obj = match schema {
        serde_json::Value::Object(obj) => obj,
        serde_json::Value::Bool(true) => return Ok(TypeRef::str()),
        other => {
            return Err(SchemaError::Malformed { reason: format!("expected object, got {other}") })
        }
    };

    if let Some(reference) = obj.get("$ref").and_then(|v| v.as_str()) {
        let name = reference.rsplit('/').next().unwrap_or(reference);
        return Ok(TypeRef::reference(name));
    }

    if let Some(values) = obj.get("enum").and_then(|v| v.as_array()) {
        let variants: Vec<String> = values
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => Ok(s.clone()),
                other => Err(SchemaError::Unsupported {
                    construct: format!("non-string enum value {other}"),
                }),
            })
            .collect::<Result<_, _>>()?;
        return Ok(TypeRef::Enum(variants));
    }

    if let Some(variants) = obj.get("oneOf").or_else(|| obj.get("anyOf")) {
        let list = variants.as_array().ok_or_else(|| SchemaError::Malformed {
            reason: "oneOf/anyOf must be an array".to_string(),
        })?;
        let lowered: Vec<TypeRef> = list.iter().map(from_json_schema).collect::<Result<_, _>>()?;
        return Ok(TypeRef::OneOf(lowered));
    }

    let nullable = obj.get("nullable").and_then(|v| v.as_bool()).unwrap_or(false);
    let ty = obj.get("type").and_then(|v| v.as_str()).unwrap_or("object");
    let lowered = match ty {
        "string" => match obj.get("format").and_then(|v| v.as_str()) {
            Some("uuid") => TypeRef::uuid(),
            Some("date-time") => TypeRef::datetime(),
            Some("date") => TypeRef::date(),
            Some("byte") | Some("binary") => TypeRef::bytes(),
            _ => TypeRef::str(),
        },
        "integer" => TypeRef::int(),
        "number" => TypeRef::float(),
        "boolean" => TypeRef::bool(),
        "array" => {
            let item = match obj.get("items") {
                Some(items) => from_json_schema(items)?,
                None => TypeRef::str(),
            };
            let min = obj.get("minItems").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            let max = obj.get("maxItems").and_then(|v| v.as_u64()).unwrap_or(10) as usize;
            TypeRef::seq(item, min, max.max(min))
        }
        "object" => {
            if let Some(props) = obj.get("properties").and_then(|v| v.as_object()) {
                let required: Vec<&str> = obj
                    .get("required")
                    .and_then(|v| v.as_array())
                    .map(|list| list.iter().filter_map(|v| v.as_str()).collect())
                    .unwrap_or_default();
                let mut fields = Vec::with_capacity(props.len());
                for (name, prop) in props {
                    fields.push(Field {
                        name: name.clone(),
                        ty: from_json_schema(prop)?,
                        required: required.contains(&name.as_str()),
                    });
                }
                TypeRef::Record(fields)
            } else if let Some(extra) = obj.get("additionalProperties") {
                let value = from_json_schema(extra)?;
                TypeRef::map(TypeRef::str(), value, 0, 10)
            } else {
                TypeRef::map(TypeRef::str(), TypeRef::str(), 0, 10)
            }
        }
        other => {
            return Err(SchemaError::Unsupported { construct: format!("type '{other}'") });
        }
    };

    Ok(if nullable { TypeRef::optional(lowered) } else { lowered })
}

/// Check a JSON document against a shape.
///
/// Returns the first violation as a `path: reason` string. Recursion through
/// `Ref` is depth-bounded; exceeding the bound reports a violation rather
/// than recursing forever.
pub fn conforms(
    ty: &TypeRef,
    json: &serde_json::Value,
    table: &SchemaTable,
    depth: usize,
) -> Result<(), String> {
    conforms_at(ty, json, table, depth, "$")
}

fn conforms_at(
    ty: &TypeRef,
    json: &serde_json::Value,
    table: &SchemaTable,
    depth: usize,
    path: &str,
) -> Result<(), String> {
    match ty {
        TypeRef::Primitive(p) => conforms_primitive(*p, json, path),
        TypeRef::Optional(inner) => {
            if json.is_null() {
                Ok(())
            } else {
                conforms_at(inner, json, table, depth, path)
            }
        }
        TypeRef::Seq { item, min, max } => {
            let items = json
                .as_array()
                .ok_or_else(|| format!("{path}: expected array, got {}", json_kind(json)))?;
            if items.len() < *min || items.len() > *max {
                return Err(format!(
                    "{path}: array length {} outside [{min}, {max}]",
                    items.len()
                ));
            }
            for (i, element) in items.iter().enumerate() {
                conforms_at(item, element, table, depth, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        TypeRef::Map { value, .. } => {
            let obj = json
                .as_object()
                .ok_or_else(|| format!("{path}: expected object, got {}", json_kind(json)))?;
            for (key, element) in obj {
                conforms_at(value, element, table, depth, &format!("{path}.{key}"))?;
            }
            Ok(())
        }
        TypeRef::Enum(values) => {
            let s = json
                .as_str()
                .ok_or_else(|| format!("{path}: expected string, got {}", json_kind(json)))?;
            if values.iter().any(|v| v == s) {
                Ok(())
            } else {
                Err(format!("{path}: '{s}' not one of the declared enum values"))
            }
        }
        TypeRef::Record(fields) => {
            let obj = json
                .as_object()
                .ok_or_else(|| format!("{path}: expected object, got {}", json_kind(json)))?;
            for field in fields {
                match obj.get(&field.name) {
                    Some(v) => conforms_at(
                        &field.ty,
                        v,
                        table,
                        depth,
                        &format!("{path}.{}", field.name),
                    )?,
                    None if field.required => {
                        return Err(format!("{path}: missing required field '{}'", field.name))
                    }
                    None => {}
                }
            }
            Ok(())
        }
        TypeRef::OneOf(variants) => {
            for variant in variants {
                if conforms_at(variant, json, table, depth, path).is_ok() {
                    return Ok(());
                }
            }
            Err(format!("{path}: value matches no variant"))
        }
        TypeRef::Ref(name) => {
            if depth == 0 {
                return Err(format!("{path}: schema recursion limit reached at '{name}'"));
            }
            let body = table
                .get(name)
                .ok_or_else(|| format!("{path}: unresolved schema reference '{name}'"))?;
            conforms_at(body, json, table, depth - 1, path)
        }
    }
}

fn conforms_primitive(p: Primitive, json: &serde_json::Value, path: &str) -> Result<(), String> {
    let ok = match p {
        Primitive::Str => json.is_string(),
        Primitive::Int => json.as_i64().is_some(),
        Primitive::Float => json.as_f64().is_some(),
        Primitive::Bool => json.is_boolean(),
        Primitive::Bytes => json.is_string(),
        Primitive::Uuid => json
            .as_str()
            .map(|s| uuid::Uuid::parse_str(s).is_ok())
            .unwrap_or(false),
        Primitive::DateTime => json
            .as_str()
            .map(|s| chrono::DateTime::parse_from_rfc3339(s).is_ok())
            .unwrap_or(false),
        Primitive::Date => json
            .as_str()
            .map(|s| chrono::NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok())
            .unwrap_or(false),
    };
    if ok {
        Ok(())
    } else {
        Err(format!("{path}: expected {}, got {}", p.name(), json_kind(json)))
    }
}

fn json_kind(json: &serde_json::Value) -> &'static str {
    match json {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "bool",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
