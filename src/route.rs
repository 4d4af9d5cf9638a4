//! Normalized endpoint descriptors.
//!
//! A [`RouteSpec`] is produced by an extractor, validated once at
//! construction, and consumed read-only by the engine. The engine never
//! inspects framework objects; everything it needs is here.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

use crate::schema::Primitive;
use crate::schema::SchemaTable;
use crate::schema::TypeRef;

/// Methods that carry no request body by convention.
const BODYLESS_METHODS: &[&str] = &["GET", "HEAD", "DELETE"];

/// Errors raised when a [`RouteSpec`] violates its structural invariants.
///
/// These indicate a broken extractor, not a broken server; they are raised
/// to the caller and never silently swallowed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RouteSpecError {
    #[error("placeholder '{{{name}}}' appears more than once in pattern '{path}'")]
    DuplicatePlaceholder { name: String, path: String },

    #[error("parameter '{name}' is declared but the pattern '{path}' has no such placeholder")]
    UnknownPlaceholder { name: String, path: String },

    #[error("name '{name}' is declared as both a path placeholder and a {other} parameter")]
    NameCollision { name: String, other: &'static str },

    #[error("route '{path}' declares no methods")]
    EmptyMethods { path: String },

    #[error("method {method} cannot carry a request body (pattern '{path}')")]
    BodyNotAllowed { method: String, path: String },

    #[error("malformed placeholder in segment '{segment}' of pattern '{path}'")]
    MalformedPlaceholder { segment: String, path: String },

    #[error("unknown type tag '{tag}' in placeholder '{{{name}:{tag}}}'")]
    UnknownTypeTag { name: String, tag: String },
}

/// A query parameter declaration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParam {
    pub name: String,
    pub ty: TypeRef,
    pub required: bool,
}

/// Response contract entry: the body shape expected for one
/// (status, content type) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseContract {
    pub status: u16,
    pub content_type: String,
    pub schema: TypeRef,
}

/// Normalized, framework-agnostic description of one endpoint.
///
/// Immutable after construction; build via [`RouteSpec::builder`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RouteSpec {
    path: String,
    methods: Vec<String>,
    path_params: Vec<(String, TypeRef)>,
    query_params: Vec<QueryParam>,
    header_params: Vec<(String, TypeRef)>,
    body: Option<TypeRef>,
    response_contract: Vec<ResponseContract>,
    schemas: SchemaTable,
    tags: Vec<String>,
    deprecated: bool,
    name: Option<String>,
    description: Option<String>,
}

impl RouteSpec {
    /// Start building a route for the given path pattern.
    pub fn builder(path: impl Into<String>) -> RouteSpecBuilder {
        RouteSpecBuilder::new(path)
    }

    /// Build a route from a pattern-only source.
    ///
    /// Placeholders without a type tag default to `Str`; a warning is
    /// emitted per the ingestion contract so the caller can see that the
    /// generated inputs are weakly typed.
    pub fn untyped(
        path: impl Into<String>,
        methods: &[&str],
    ) -> Result<RouteSpec, RouteSpecError> {
        let path = path.into();
        let placeholders = parse_placeholders(&path)?;
        let mut builder = RouteSpec::builder(path.clone());
        for method in methods {
            builder = builder.method(method);
        }
        for (name, tag) in &placeholders {
            if tag.is_none() {
                warn!(path = %path, param = %name, "untyped path parameter defaults to str");
            }
        }
        builder.build()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn methods(&self) -> &[String] {
        &self.methods
    }

    pub fn path_params(&self) -> &[(String, TypeRef)] {
        &self.path_params
    }

    pub fn query_params(&self) -> &[QueryParam] {
        &self.query_params
    }

    pub fn header_params(&self) -> &[(String, TypeRef)] {
        &self.header_params
    }

    /// The request body shape, consulted only for methods that may carry one.
    pub fn body(&self) -> Option<&TypeRef> {
        self.body.as_ref()
    }

    pub fn response_contract(&self) -> &[ResponseContract] {
        &self.response_contract
    }

    /// Named schema bodies referenced by this route's shapes.
    pub fn schemas(&self) -> &SchemaTable {
        &self.schemas
    }

    pub fn tags(&self) -> &[String] {
        &self.tags
    }

    pub fn deprecated(&self) -> bool {
        self.deprecated
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    /// `METHOD /path` identity used in reports and coverage counters.
    pub fn operation_id(&self, method: &str) -> String {
        format!("{method} {}", self.path)
    }

    /// Whether the given method may carry a request body.
    pub fn method_allows_body(method: &str) -> bool {
        !BODYLESS_METHODS.contains(&method)
    }

    /// Contract entry for a concrete response, if declared.
    pub fn contract_for(&self, status: u16, content_type: &str) -> Option<&ResponseContract> {
        self.response_contract
            .iter()
            .find(|c| c.status == status && content_type.starts_with(c.content_type.as_str()))
    }
}

/// Builder for [`RouteSpec`]; `build` performs all invariant checks.
#[derive(Debug, Clone)]
pub struct RouteSpecBuilder {
    path: String,
    methods: Vec<String>,
    path_params: Vec<(String, TypeRef)>,
    query_params: Vec<QueryParam>,
    header_params: Vec<(String, TypeRef)>,
    body: Option<TypeRef>,
    response_contract: Vec<ResponseContract>,
    schemas: SchemaTable,
    tags: Vec<String>,
    deprecated: bool,
    name: Option<String>,
    description: Option<String>,
}

impl RouteSpecBuilder {
    fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            methods: Vec::new(),
            path_params: Vec::new(),
            query_params: Vec::new(),
            header_params: Vec::new(),
            body: None,
            response_contract: Vec::new(),
            schemas: SchemaTable::new(),
            tags: Vec::new(),
            deprecated: false,
            name: None,
            description: None,
        }
    }

    pub fn method(mut self, method: &str) -> Self {
        let upper = method.to_ascii_uppercase();
        if !self.methods.contains(&upper) {
            self.methods.push(upper);
        }
        self
    }

    pub fn path_param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.path_params.push((name.into(), ty));
        self
    }

    pub fn query_param(mut self, name: impl Into<String>, ty: TypeRef, required: bool) -> Self {
        self.query_params.push(QueryParam { name: name.into(), ty, required });
        self
    }

    pub fn header_param(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.header_params.push((name.into(), ty));
        self
    }

    pub fn body(mut self, ty: TypeRef) -> Self {
        self.body = Some(ty);
        self
    }

    pub fn response(mut self, status: u16, content_type: impl Into<String>, schema: TypeRef) -> Self {
        self.response_contract.push(ResponseContract {
            status,
            content_type: content_type.into(),
            schema,
        });
        self
    }

    pub fn schema(mut self, name: impl Into<String>, ty: TypeRef) -> Self {
        self.schemas.insert(name, ty);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn deprecated(mut self, deprecated: bool) -> Self {
        self.deprecated = deprecated;
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Validate invariants and freeze the route.
    pub fn build(self) -> Result<RouteSpec, RouteSpecError> {
        if self.methods.is_empty() {
            return Err(RouteSpecError::EmptyMethods { path: self.path });
        }

        let placeholders = parse_placeholders(&self.path)?;

        // Declared params must each name a placeholder in the pattern.
        let mut path_params = self.path_params;
        for (name, _) in &path_params {
            if !placeholders.iter().any(|(p, _)| p == name) {
                return Err(RouteSpecError::UnknownPlaceholder {
                    name: name.clone(),
                    path: self.path,
                });
            }
        }

        // Pattern placeholders without a declaration pick up their type tag,
        // or default to Str.
        for (name, tag) in &placeholders {
            if path_params.iter().any(|(p, _)| p == name) {
                continue;
            }
            let ty = match tag.as_deref() {
                None => TypeRef::str(),
                Some(tag) => type_for_tag(tag).ok_or_else(|| RouteSpecError::UnknownTypeTag {
                    name: name.clone(),
                    tag: tag.to_string(),
                })?,
            };
            path_params.push((name.clone(), ty));
        }

        for q in &self.query_params {
            if path_params.iter().any(|(p, _)| *p == q.name) {
                return Err(RouteSpecError::NameCollision { name: q.name.clone(), other: "query" });
            }
        }
        for (h, _) in &self.header_params {
            if path_params.iter().any(|(p, _)| p == h) {
                return Err(RouteSpecError::NameCollision { name: h.clone(), other: "header" });
            }
        }

        if let Some(_body) = &self.body {
            for method in &self.methods {
                if !RouteSpec::method_allows_body(method) {
                    return Err(RouteSpecError::BodyNotAllowed {
                        method: method.clone(),
                        path: self.path,
                    });
                }
            }
        }

        // Keep declaration order aligned with pattern order so draws and
        // reports are deterministic.
        path_params.sort_by_key(|(name, _)| {
            placeholders.iter().position(|(p, _)| p == name).unwrap_or(usize::MAX)
        });

        Ok(RouteSpec {
            path: self.path,
            methods: self.methods,
            path_params,
            query_params: self.query_params,
            header_params: self.header_params,
            body: self.body,
            response_contract: self.response_contract,
            schemas: self.schemas,
            tags: self.tags,
            deprecated: self.deprecated,
            name: self.name,
            description: self.description,
        })
    }
}

/// Extract `{name}` / `{name:tag}` placeholders from a pattern, rejecting
/// duplicates and malformed braces.
pub fn parse_placeholders(path: &str) -> Result<Vec<(String, Option<String>)>, RouteSpecError> {
    let mut found: Vec<(String, Option<String>)> = Vec::new();
    for segment in path.split('/') {
        let mut rest = segment;
        while let Some(open) = rest.find('{') {
            let tail = &rest[open + 1..];
            let close = tail.find('}').ok_or_else(|| RouteSpecError::MalformedPlaceholder {
                segment: segment.to_string(),
                path: path.to_string(),
            })?;
            let inner = &tail[..close];
            let (name, tag) = match inner.split_once(':') {
                Some((name, tag)) => (name.to_string(), Some(tag.to_string())),
                None => (inner.to_string(), None),
            };
            if name.is_empty() {
                return Err(RouteSpecError::MalformedPlaceholder {
                    segment: segment.to_string(),
                    path: path.to_string(),
                });
            }
            if found.iter().any(|(existing, _)| *existing == name) {
                return Err(RouteSpecError::DuplicatePlaceholder {
                    name,
                    path: path.to_string(),
                });
            }
            found.push((name, tag));
            rest = &tail[close + 1..];
        }
        if rest.contains('}') {
            return Err(RouteSpecError::MalformedPlaceholder {
                segment: segment.to_string(),
                path: path.to_string(),
            });
        }
    }
    Ok(found)
}

fn type_for_tag(tag: &str) -> Option<TypeRef> {
    let p = match tag {
        "str" | "string" | "path" => Primitive::Str,
        "int" | "integer" => Primitive::Int,
        "float" | "number" => Primitive::Float,
        "bool" | "boolean" => Primitive::Bool,
        "uuid" => Primitive::Uuid,
        "date" => Primitive::Date,
        "datetime" => Primitive::DateTime,
        _ => return None,
    };
    Some(TypeRef::Primitive(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn placeholder_type_tags_resolve() {
        let route = RouteSpec::builder("/items/{id:int}").method("GET").build().expect("route");
        assert_eq!(route.path_params(), &[("id".to_string(), TypeRef::int())]);
    }

    #[test]
    fn duplicate_placeholder_rejected() {
        let err = RouteSpec::builder("/a/{x}/b/{x}").method("GET").build().expect_err("dup");
        assert!(matches!(err, RouteSpecError::DuplicatePlaceholder { .. }));
    }

    #[test]
    fn declared_param_without_placeholder_rejected() {
        let err = RouteSpec::builder("/items")
            .method("GET")
            .path_param("id", TypeRef::int())
            .build()
            .expect_err("unknown placeholder");
        assert!(matches!(err, RouteSpecError::UnknownPlaceholder { .. }));
    }

    #[test]
    fn query_name_colliding_with_placeholder_rejected() {
        let err = RouteSpec::builder("/items/{id}")
            .method("GET")
            .query_param("id", TypeRef::int(), true)
            .build()
            .expect_err("collision");
        assert!(matches!(err, RouteSpecError::NameCollision { other: "query", .. }));
    }

    #[test]
    fn body_on_get_rejected() {
        let err = RouteSpec::builder("/items")
            .method("GET")
            .body(TypeRef::record(vec![]))
            .build()
            .expect_err("body on GET");
        assert!(matches!(err, RouteSpecError::BodyNotAllowed { .. }));
    }

    #[test]
    fn empty_methods_rejected() {
        let err = RouteSpec::builder("/items").build().expect_err("no methods");
        assert!(matches!(err, RouteSpecError::EmptyMethods { .. }));
    }

    #[test]
    fn untyped_pattern_defaults_to_str() {
        let route = RouteSpec::untyped("/users/{name}", &["GET"]).expect("route");
        assert_eq!(route.path_params(), &[("name".to_string(), TypeRef::str())]);
    }

    #[test]
    fn methods_are_uppercased_and_deduplicated() {
        let route =
            RouteSpec::builder("/x").method("get").method("GET").method("post").build().expect("route");
        assert_eq!(route.methods(), &["GET".to_string(), "POST".to_string()]);
    }
}
