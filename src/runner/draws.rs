//! Per-route draw composition and request building.
//!
//! All of a trial's randomness flows through one [`RouteGenerator`] draw,
//! producing a single [`DrawTree`] whose top-level product is always
//! (path, query, header, body) in that order. Shrinking and reports rely
//! on that fixed layout.

use std::sync::Arc;
use std::time::Duration;

use rand_chacha::ChaCha8Rng;

use crate::encode::encode_path;
use crate::encode::EncodeError;
use crate::generate::DrawTree;
use crate::generate::GenContext;
use crate::generate::GenError;
use crate::generate::ValueGenerator;
use crate::registry::RegistryError;
use crate::registry::RegistrySnapshot;
use crate::request::ApiRequest;
use crate::request::Headers;
use crate::request::RequestBody;
use crate::route::RouteSpec;
use crate::value::Value;

/// Materialized parameter values for one trial, grouped and ordered the
/// way reports present them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteValues {
    pub path: Vec<(String, Value)>,
    pub query: Vec<(String, Value)>,
    pub header: Vec<(String, Value)>,
    pub body: Option<Value>,
}

/// Composed generator for every parameter group of one route.
///
/// Parameters named in `exclude` are left out of generation entirely; the
/// stateful runner substitutes bundle-drawn values for them before the
/// request is built.
pub struct RouteGenerator {
    path: Vec<(String, Arc<dyn ValueGenerator>)>,
    query: Vec<(String, Arc<dyn ValueGenerator>, bool)>,
    header: Vec<(String, Arc<dyn ValueGenerator>)>,
    body: Option<Arc<dyn ValueGenerator>>,
}

impl RouteGenerator {
    pub fn new(
        route: &RouteSpec,
        method: &str,
        registry: &RegistrySnapshot,
        exclude: &[String],
    ) -> Result<Self, RegistryError> {
        let mut path = Vec::with_capacity(route.path_params().len());
        for (name, ty) in route.path_params() {
            if exclude.contains(name) {
                continue;
            }
            path.push((name.clone(), registry.resolve_path_param(ty)?));
        }

        let mut query = Vec::with_capacity(route.query_params().len());
        for param in route.query_params() {
            if exclude.contains(&param.name) {
                continue;
            }
            query.push((param.name.clone(), registry.resolve(&param.ty)?, param.required));
        }

        let mut header = Vec::with_capacity(route.header_params().len());
        for (name, ty) in route.header_params() {
            header.push((name.clone(), registry.resolve(ty)?));
        }

        let body = match route.body() {
            Some(ty) if RouteSpec::method_allows_body(method) => Some(registry.resolve(ty)?),
            _ => None,
        };

        Ok(Self { path, query, header, body })
    }

    /// Draw one full parameter set, recording the combined decision tree.
    pub fn draw(
        &self,
        rng: &mut ChaCha8Rng,
        cx: GenContext,
    ) -> Result<(RouteValues, DrawTree), GenError> {
        let mut values = RouteValues::default();

        let mut path_children = Vec::with_capacity(self.path.len());
        for (name, generator) in &self.path {
            let drawn = generator.draw(rng, cx)?;
            values.path.push((name.clone(), drawn.value));
            path_children.push(drawn.tree);
        }

        let mut query_children = Vec::with_capacity(self.query.len());
        for (name, generator, required) in &self.query {
            if *required {
                let drawn = generator.draw(rng, cx)?;
                values.query.push((name.clone(), drawn.value));
                query_children.push(drawn.tree);
            } else if rng_include(rng) {
                let drawn = generator.draw(rng, cx)?;
                values.query.push((name.clone(), drawn.value));
                query_children.push(DrawTree::Maybe { child: Some(Box::new(drawn.tree)) });
            } else {
                query_children.push(DrawTree::Maybe { child: None });
            }
        }

        let mut header_children = Vec::with_capacity(self.header.len());
        for (name, generator) in &self.header {
            let drawn = generator.draw(rng, cx)?;
            values.header.push((name.clone(), drawn.value));
            header_children.push(drawn.tree);
        }

        let body_child = match &self.body {
            Some(generator) => {
                let drawn = generator.draw(rng, cx)?;
                values.body = Some(drawn.value);
                DrawTree::Maybe { child: Some(Box::new(drawn.tree)) }
            }
            None => DrawTree::Maybe { child: None },
        };

        let tree = DrawTree::Product {
            children: vec![
                DrawTree::Product { children: path_children },
                DrawTree::Product { children: query_children },
                DrawTree::Product { children: header_children },
                body_child,
            ],
        };
        Ok((values, tree))
    }

    /// Materialize parameter values from an edited tree.
    pub fn replay(&self, tree: &DrawTree, cx: GenContext) -> Result<RouteValues, GenError> {
        let groups = match tree {
            DrawTree::Product { children } if children.len() == 4 => children,
            other => return Err(GenError::mismatch("route draw product", other)),
        };
        let mut values = RouteValues::default();

        let path_children = expect_product(&groups[0], self.path.len())?;
        for ((name, generator), child) in self.path.iter().zip(path_children) {
            values.path.push((name.clone(), generator.replay(child, cx)?));
        }

        let query_children = expect_product(&groups[1], self.query.len())?;
        for ((name, generator, required), child) in self.query.iter().zip(query_children) {
            if *required {
                values.query.push((name.clone(), generator.replay(child, cx)?));
            } else {
                match child {
                    DrawTree::Maybe { child: None } => {}
                    DrawTree::Maybe { child: Some(inner) } => {
                        values.query.push((name.clone(), generator.replay(inner, cx)?));
                    }
                    other => return Err(GenError::mismatch("optional query maybe", other)),
                }
            }
        }

        let header_children = expect_product(&groups[2], self.header.len())?;
        for ((name, generator), child) in self.header.iter().zip(header_children) {
            values.header.push((name.clone(), generator.replay(child, cx)?));
        }

        match (&self.body, &groups[3]) {
            (_, DrawTree::Maybe { child: None }) => {}
            (Some(generator), DrawTree::Maybe { child: Some(inner) }) => {
                values.body = Some(generator.replay(inner, cx)?);
            }
            (None, other) | (Some(_), other) => {
                return Err(GenError::mismatch("body maybe", other));
            }
        }

        Ok(values)
    }
}

fn expect_product(tree: &DrawTree, len: usize) -> Result<&[DrawTree], GenError> {
    match tree {
        DrawTree::Product { children } if children.len() == len => Ok(children),
        other => Err(GenError::mismatch("parameter group product", other)),
    }
}

fn rng_include(rng: &mut ChaCha8Rng) -> bool {
    use rand::Rng;
    rng.gen_bool(0.5)
}

/// Assemble the concrete request for a parameter set.
///
/// Query pairs render in declaration order; null-valued optional shapes are
/// dropped rather than rendered empty; auth is applied by the caller after
/// this returns so credentials always land last.
pub fn build_request(
    route: &RouteSpec,
    method: &str,
    values: &RouteValues,
    timeout: Duration,
) -> Result<ApiRequest, EncodeError> {
    let path = encode_path(route.path(), &values.path)?;

    let mut query = Vec::with_capacity(values.query.len());
    for (name, value) in &values.query {
        if matches!(value, Value::Null) {
            continue;
        }
        query.push((name.clone(), value.render_plain()));
    }

    let mut headers = Headers::new();
    for (name, value) in &values.header {
        if matches!(value, Value::Null) {
            continue;
        }
        headers.insert(name, value.render_plain());
    }

    let body = values.body.as_ref().and_then(|value| match value {
        Value::Null => None,
        other => Some(RequestBody::json(&other.to_json())),
    });

    Ok(ApiRequest {
        method: method.to_string(),
        path,
        query,
        headers,
        body,
        timeout,
    })
}
