//! Link graphs: response-to-request data dependencies.
//!
//! An edge states that a field of operation A's response feeds a bundle
//! that operation B consumes into a parameter. Graphs come from three
//! sources: explicit edges, a user-supplied (producer, field, consumer,
//! parameter) table, or inference over route declarations.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::debug;
use tracing::warn;

use crate::request::ApiResponse;
use crate::route::RouteSpec;
use crate::schema::TypeRef;
use crate::value::Value;

/// Errors constructing link edges.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LinkError {
    #[error("malformed extraction expression '{expr}'; expected `$.body#/<pointer>`")]
    MalformedExpression { expr: String },
}

/// A `$.body#/<pointer>` extraction expression.
///
/// Extraction failures at runtime are not errors: the producing rule simply
/// produces nothing for that response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldExtractor {
    raw: String,
    pointer: String,
}

impl FieldExtractor {
    pub fn parse(expr: &str) -> Result<Self, LinkError> {
        let pointer = expr
            .strip_prefix("$.body#")
            .ok_or_else(|| LinkError::MalformedExpression { expr: expr.to_string() })?;
        if !pointer.is_empty() && !pointer.starts_with('/') {
            return Err(LinkError::MalformedExpression { expr: expr.to_string() });
        }
        Ok(Self { raw: expr.to_string(), pointer: pointer.to_string() })
    }

    /// Expression for a single top-level body field.
    pub fn for_field(field: &str) -> Self {
        Self { raw: format!("$.body#/{field}"), pointer: format!("/{field}") }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Pull the linked value out of a response body, if present.
    pub fn extract(&self, response: &ApiResponse) -> Option<Value> {
        let document = response.body_json()?;
        let target = if self.pointer.is_empty() {
            Some(&document)
        } else {
            document.pointer(&self.pointer)
        };
        match target {
            Some(found) => Some(Value::from_json(found)),
            None => {
                debug!(expr = %self.raw, "link extraction found nothing in response body");
                None
            }
        }
    }
}

/// Producer side of an edge: operation → bundle.
#[derive(Debug, Clone, PartialEq)]
pub struct Production {
    pub operation: String,
    pub extractor: FieldExtractor,
    pub bundle: String,
}

/// Consumer side of an edge: bundle → operation parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct Consumption {
    pub operation: String,
    pub parameter: String,
    pub bundle: String,
}

/// User-supplied link table row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub producer: String,
    pub field: String,
    pub consumer: String,
    pub parameter: String,
}

/// The full dependency graph consumed by the state-machine runner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LinkGraph {
    productions: Vec<Production>,
    consumptions: Vec<Consumption>,
}

impl LinkGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an explicit producer edge.
    pub fn produce(
        &mut self,
        operation: impl Into<String>,
        expr: &str,
        bundle: impl Into<String>,
    ) -> Result<(), LinkError> {
        self.productions.push(Production {
            operation: operation.into(),
            extractor: FieldExtractor::parse(expr)?,
            bundle: bundle.into(),
        });
        Ok(())
    }

    /// Add an explicit consumer edge.
    pub fn consume(
        &mut self,
        operation: impl Into<String>,
        parameter: impl Into<String>,
        bundle: impl Into<String>,
    ) {
        self.consumptions.push(Consumption {
            operation: operation.into(),
            parameter: parameter.into(),
            bundle: bundle.into(),
        });
    }

    /// Build a graph from user-supplied rows. One bundle per distinct
    /// field name, shared by every row naming that field.
    pub fn from_rows(rows: &[LinkRow]) -> Result<Self, LinkError> {
        let mut graph = LinkGraph::new();
        for row in rows {
            let bundle = format!("{}_bundle", row.field);
            graph.productions.push(Production {
                operation: row.producer.clone(),
                extractor: FieldExtractor::for_field(&row.field),
                bundle: bundle.clone(),
            });
            graph.consumptions.push(Consumption {
                operation: row.consumer.clone(),
                parameter: row.parameter.clone(),
                bundle,
            });
        }
        Ok(graph)
    }

    /// Infer edges by matching declared response fields against downstream
    /// parameter names and shapes.
    ///
    /// A producer is any operation whose success contract declares a record
    /// body; each primitive field matches a downstream path or query
    /// parameter either by exact name or by the `<resource>_<field>`
    /// convention (`POST /users` producing `id` feeds `{user_id}`). Shapes
    /// must agree exactly.
    pub fn infer(routes: &[RouteSpec]) -> Self {
        let mut graph = LinkGraph::new();
        for producer in routes {
            for method in producer.methods() {
                if method == "GET" || method == "HEAD" {
                    continue;
                }
                let operation = producer.operation_id(method);
                for contract in producer.response_contract() {
                    if !(200..300).contains(&contract.status) {
                        continue;
                    }
                    let TypeRef::Record(fields) = &contract.schema else { continue };
                    for field in fields {
                        let TypeRef::Primitive(_) = &field.ty else { continue };
                        let names = candidate_names(producer.path(), &field.name);
                        let bundle = bundle_name(producer.path(), &field.name);
                        let mut produced = false;
                        for consumer in routes {
                            for (param, ty) in consumer.path_params() {
                                if names.contains(param) && *ty == field.ty {
                                    graph.link_inferred(
                                        &operation,
                                        &field.name,
                                        &bundle,
                                        consumer,
                                        param,
                                        &mut produced,
                                    );
                                }
                            }
                            for query in consumer.query_params() {
                                if names.contains(&query.name) && query.ty == field.ty {
                                    graph.link_inferred(
                                        &operation,
                                        &field.name,
                                        &bundle,
                                        consumer,
                                        &query.name,
                                        &mut produced,
                                    );
                                }
                            }
                        }
                    }
                }
            }
        }
        if graph.productions.is_empty() {
            warn!("link inference found no data dependencies");
        }
        graph
    }

    fn link_inferred(
        &mut self,
        producer_op: &str,
        field: &str,
        bundle: &str,
        consumer: &RouteSpec,
        parameter: &str,
        produced: &mut bool,
    ) {
        if !*produced {
            self.productions.push(Production {
                operation: producer_op.to_string(),
                extractor: FieldExtractor::for_field(field),
                bundle: bundle.to_string(),
            });
            *produced = true;
        }
        for method in consumer.methods() {
            let consumer_op = consumer.operation_id(method);
            // A producer does not feed its own parameters.
            if consumer_op == producer_op {
                continue;
            }
            let consumption = Consumption {
                operation: consumer_op,
                parameter: parameter.to_string(),
                bundle: bundle.to_string(),
            };
            if !self.consumptions.contains(&consumption) {
                self.consumptions.push(consumption);
            }
        }
    }

    pub fn productions_for<'a>(
        &'a self,
        operation: &'a str,
    ) -> impl Iterator<Item = &'a Production> {
        self.productions.iter().filter(move |p| p.operation == operation)
    }

    pub fn consumptions_for<'a>(
        &'a self,
        operation: &'a str,
    ) -> impl Iterator<Item = &'a Consumption> {
        self.consumptions.iter().filter(move |c| c.operation == operation)
    }

    pub fn bundle_names(&self) -> BTreeSet<&str> {
        self.productions
            .iter()
            .map(|p| p.bundle.as_str())
            .chain(self.consumptions.iter().map(|c| c.bundle.as_str()))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.productions.is_empty() && self.consumptions.is_empty()
    }
}

/// Parameter names a response field can feed: the field name itself plus
/// the `<resource>_<field>` convention derived from the producer path.
fn candidate_names(producer_path: &str, field: &str) -> Vec<String> {
    let mut names = vec![field.to_string()];
    if let Some(resource) = last_literal_segment(producer_path) {
        names.push(format!("{}_{field}", singular(resource)));
    }
    names
}

fn bundle_name(producer_path: &str, field: &str) -> String {
    match last_literal_segment(producer_path) {
        Some(resource) => format!("{}_{field}s", singular(resource)),
        None => format!("{field}_bundle"),
    }
}

fn last_literal_segment(path: &str) -> Option<&str> {
    path.split('/').filter(|s| !s.is_empty() && !s.contains('{')).last()
}

fn singular(word: &str) -> &str {
    word.strip_suffix('s').unwrap_or(word)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;

    #[test]
    fn parses_body_pointer_expressions() {
        let extractor = FieldExtractor::parse("$.body#/id").expect("parse");
        assert_eq!(extractor.raw(), "$.body#/id");
        let err = FieldExtractor::parse("$.headers#/x").expect_err("bad prefix");
        assert!(matches!(err, LinkError::MalformedExpression { .. }));
    }

    #[test]
    fn extracts_nested_pointer() {
        let extractor = FieldExtractor::parse("$.body#/data/id").expect("parse");
        let response =
            ApiResponse::new(201).with_json(&serde_json::json!({"data": {"id": 42}}));
        assert_eq!(extractor.extract(&response), Some(Value::Int(42)));
    }

    #[test]
    fn extraction_failure_is_none_not_error() {
        let extractor = FieldExtractor::parse("$.body#/id").expect("parse");
        let response = ApiResponse::new(201).with_json(&serde_json::json!({"other": 1}));
        assert_eq!(extractor.extract(&response), None);
        let empty = ApiResponse::new(201);
        assert_eq!(extractor.extract(&empty), None);
    }

    #[test]
    fn from_rows_builds_shared_bundles() {
        let rows = vec![LinkRow {
            producer: "POST /users".to_string(),
            field: "id".to_string(),
            consumer: "GET /users/{id}".to_string(),
            parameter: "id".to_string(),
        }];
        let graph = LinkGraph::from_rows(&rows).expect("graph");
        assert_eq!(graph.productions_for("POST /users").count(), 1);
        let consumption = graph.consumptions_for("GET /users/{id}").next().expect("edge");
        assert_eq!(consumption.bundle, "id_bundle");
    }

    #[test]
    fn inference_links_post_response_field_to_path_param() {
        let create = RouteSpec::builder("/users")
            .method("POST")
            .body(TypeRef::record(vec![Field::required("name", TypeRef::str())]))
            .response(
                201,
                "application/json",
                TypeRef::record(vec![Field::required("id", TypeRef::int())]),
            )
            .build()
            .expect("route");
        let fetch = RouteSpec::builder("/users/{user_id:int}").method("GET").build().expect("route");
        let graph = LinkGraph::infer(&[create, fetch]);
        assert!(!graph.is_empty());
        let production = graph.productions_for("POST /users").next().expect("production");
        assert_eq!(production.bundle, "user_ids");
        let consumption = graph.consumptions_for("GET /users/{user_id}").next().expect("edge");
        assert_eq!(consumption.parameter, "user_id");
        assert_eq!(consumption.bundle, "user_ids");
    }

    #[test]
    fn inference_respects_shape_mismatch() {
        let create = RouteSpec::builder("/users")
            .method("POST")
            .body(TypeRef::record(vec![]))
            .response(
                201,
                "application/json",
                TypeRef::record(vec![Field::required("id", TypeRef::int())]),
            )
            .build()
            .expect("route");
        // Param has the right name but the wrong shape.
        let fetch = RouteSpec::builder("/users/{user_id}")
            .method("GET")
            .path_param("user_id", TypeRef::str())
            .build()
            .expect("route");
        let graph = LinkGraph::infer(&[create, fetch]);
        assert!(graph.is_empty());
    }
}
