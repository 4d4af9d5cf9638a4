//! Response validation.
//!
//! A validator is a pure predicate on (response, route) returning a
//! [`Verdict`]. Validators never mutate shared state and never unwind;
//! transport failures are classified by the runner before validators see
//! anything.

use std::fmt;
use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::request::ApiResponse;
use crate::route::RouteSpec;
use crate::schema::conforms;

/// HTTP status range treated as server errors.
const SERVER_ERROR_MIN: u16 = 500;
/// Depth budget when checking response bodies against recursive contracts.
const CONTRACT_CHECK_DEPTH: usize = 16;

/// Classified failure of a single trial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Response status was 5xx.
    Server5xx,
    /// Response status outside the allowed set (but not 5xx).
    UnexpectedStatus,
    /// Response body violated the declared schema.
    SchemaViolation,
    /// Response content type outside the declared list.
    ContentTypeViolation,
    /// Transport-level failure (timeout, connection refused, malformed).
    ServerUnreachable,
    /// Auth token source could not be resolved; route-fatal, zero trials.
    MissingCredential,
    /// Generator resolution failed; route-fatal, zero trials.
    UnsupportedType,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Server5xx => "server_error_5xx",
            FailureKind::UnexpectedStatus => "unexpected_status",
            FailureKind::SchemaViolation => "schema_violation",
            FailureKind::ContentTypeViolation => "content_type_violation",
            FailureKind::ServerUnreachable => "server_unreachable",
            FailureKind::MissingCredential => "missing_credential",
            FailureKind::UnsupportedType => "unsupported_type",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Validation outcome with diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    /// Failure classification; present iff `valid` is false.
    pub kind: Option<FailureKind>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl Verdict {
    pub fn pass() -> Self {
        Self { valid: true, kind: None, errors: Vec::new(), warnings: Vec::new() }
    }

    pub fn pass_with_warnings(warnings: Vec<String>) -> Self {
        Self { valid: true, kind: None, errors: Vec::new(), warnings }
    }

    pub fn fail(kind: FailureKind, errors: Vec<String>) -> Self {
        Self { valid: false, kind: Some(kind), errors, warnings: Vec::new() }
    }
}

/// Pure predicate on (response, route).
pub trait Validator: Send + Sync {
    fn validate(&self, response: &ApiResponse, route: &RouteSpec) -> Verdict;
}

/// Status-set membership check.
///
/// The default allowed set is every non-5xx status (100–499 inclusive),
/// which is what `fail_on_5xx` derives; 4xx statuses pass with a warning
/// so reports surface client-error noise without failing routes.
#[derive(Debug, Clone)]
pub struct StatusValidator {
    allowed: Vec<u16>,
}

impl StatusValidator {
    pub fn new(allowed: Vec<u16>) -> Self {
        Self { allowed }
    }

    /// All non-5xx statuses.
    pub fn fail_on_5xx() -> Self {
        Self { allowed: (100..SERVER_ERROR_MIN).collect() }
    }

    fn describe_allowed(&self) -> String {
        const MAX_DISPLAYED: usize = 10;
        let shown: Vec<String> =
            self.allowed.iter().take(MAX_DISPLAYED).map(u16::to_string).collect();
        let ellipsis = if self.allowed.len() > MAX_DISPLAYED { ", ..." } else { "" };
        format!("[{}{}]", shown.join(", "), ellipsis)
    }
}

impl Default for StatusValidator {
    fn default() -> Self {
        Self::fail_on_5xx()
    }
}

impl Validator for StatusValidator {
    fn validate(&self, response: &ApiResponse, _route: &RouteSpec) -> Verdict {
        let status = response.status;
        if !self.allowed.contains(&status) {
            let kind = if status >= SERVER_ERROR_MIN {
                FailureKind::Server5xx
            } else {
                FailureKind::UnexpectedStatus
            };
            return Verdict::fail(
                kind,
                vec![format!(
                    "status {status} not in allowed codes; expected one of {}",
                    self.describe_allowed()
                )],
            );
        }
        if (400..SERVER_ERROR_MIN).contains(&status) {
            return Verdict::pass_with_warnings(vec![format!("client error status: {status}")]);
        }
        Verdict::pass()
    }
}

/// Content-Type membership check with media-type prefix matching.
#[derive(Debug, Clone)]
pub struct ContentTypeValidator {
    expected: Vec<String>,
}

impl ContentTypeValidator {
    pub fn new(expected: Vec<String>) -> Self {
        Self { expected }
    }
}

impl Default for ContentTypeValidator {
    fn default() -> Self {
        Self { expected: vec!["application/json".to_string()] }
    }
}

impl Validator for ContentTypeValidator {
    fn validate(&self, response: &ApiResponse, _route: &RouteSpec) -> Verdict {
        let full = response.content_type().to_string();
        // Empty bodies (204 and friends) legitimately carry no content type.
        if full.is_empty() && (response.status == 204 || response.body.is_empty()) {
            return Verdict::pass();
        }
        let media_type = full.split(';').next().unwrap_or("").trim();
        if self.expected.iter().any(|e| media_type == e || media_type.starts_with(e.as_str())) {
            return Verdict::pass();
        }
        Verdict::fail(
            FailureKind::ContentTypeViolation,
            vec![format!(
                "content type '{media_type}' not in expected types {:?} (full header: '{full}')",
                self.expected
            )],
        )
    }
}

/// Body conformance against the route's declared response contract.
///
/// Looks up the contract entry for (status, content type); responses with
/// no declared contract pass. A body that fails to parse as JSON is a
/// violation whenever a JSON contract is declared.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchemaValidator;

impl Validator for SchemaValidator {
    fn validate(&self, response: &ApiResponse, route: &RouteSpec) -> Verdict {
        let Some(contract) = route.contract_for(response.status, response.content_type()) else {
            return Verdict::pass();
        };
        if response.body.is_empty() && response.status == 204 {
            return Verdict::pass();
        }
        let Some(document) = response.body_json() else {
            return Verdict::fail(
                FailureKind::SchemaViolation,
                vec!["response body is not valid JSON".to_string()],
            );
        };
        match conforms(&contract.schema, &document, route.schemas(), CONTRACT_CHECK_DEPTH) {
            Ok(()) => Verdict::pass(),
            Err(violation) => Verdict::fail(
                FailureKind::SchemaViolation,
                vec![format!("response schema violation: {violation}")],
            ),
        }
    }
}

/// Ordered validator composition: invalid iff any child is invalid, all
/// errors and warnings aggregated, first failing child's kind wins.
#[derive(Clone, Default)]
pub struct CompositeValidator {
    children: Vec<Arc<dyn Validator>>,
}

impl CompositeValidator {
    pub fn new(children: Vec<Arc<dyn Validator>>) -> Self {
        Self { children }
    }

    pub fn push(&mut self, validator: Arc<dyn Validator>) {
        self.children.push(validator);
    }
}

impl Validator for CompositeValidator {
    fn validate(&self, response: &ApiResponse, route: &RouteSpec) -> Verdict {
        let mut kind = None;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        for child in &self.children {
            let verdict = child.validate(response, route);
            if !verdict.valid && kind.is_none() {
                kind = verdict.kind;
            }
            errors.extend(verdict.errors);
            warnings.extend(verdict.warnings);
        }
        match kind {
            Some(kind) => Verdict { valid: false, kind: Some(kind), errors, warnings },
            None => Verdict { valid: true, kind: None, errors, warnings },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::Field;
    use crate::schema::TypeRef;

    fn route() -> RouteSpec {
        RouteSpec::builder("/items").method("GET").build().expect("route")
    }

    #[test]
    fn default_status_validator_allows_all_non_5xx() {
        let v = StatusValidator::default();
        assert!(v.validate(&ApiResponse::new(100), &route()).valid);
        assert!(v.validate(&ApiResponse::new(200), &route()).valid);
        assert!(v.validate(&ApiResponse::new(404), &route()).valid);
        let verdict = v.validate(&ApiResponse::new(500), &route());
        assert!(!verdict.valid);
        assert_eq!(verdict.kind, Some(FailureKind::Server5xx));
    }

    #[test]
    fn four_xx_passes_with_warning() {
        let verdict = StatusValidator::default().validate(&ApiResponse::new(422), &route());
        assert!(verdict.valid);
        assert_eq!(verdict.warnings, vec!["client error status: 422".to_string()]);
    }

    #[test]
    fn narrowed_status_set_flags_unexpected() {
        let verdict =
            StatusValidator::new(vec![200, 201]).validate(&ApiResponse::new(404), &route());
        assert!(!verdict.valid);
        assert_eq!(verdict.kind, Some(FailureKind::UnexpectedStatus));
    }

    #[test]
    fn content_type_passes_on_empty_204() {
        let verdict = ContentTypeValidator::default().validate(&ApiResponse::new(204), &route());
        assert!(verdict.valid);
    }

    #[test]
    fn content_type_strips_parameters() {
        let response =
            ApiResponse::new(200).with_header("content-type", "application/json; charset=utf-8");
        let mut response = response;
        response.body = b"{}".to_vec();
        assert!(ContentTypeValidator::default().validate(&response, &route()).valid);
    }

    #[test]
    fn content_type_violation_reports_kind() {
        let mut response = ApiResponse::new(200).with_header("content-type", "text/html");
        response.body = b"<html>".to_vec();
        let verdict = ContentTypeValidator::default().validate(&response, &route());
        assert_eq!(verdict.kind, Some(FailureKind::ContentTypeViolation));
    }

    #[test]
    fn schema_validator_checks_declared_contract() {
        let route = RouteSpec::builder("/items")
            .method("GET")
            .response(
                200,
                "application/json",
                TypeRef::record(vec![Field::required("id", TypeRef::int())]),
            )
            .build()
            .expect("route");
        let ok = ApiResponse::new(200).with_json(&serde_json::json!({"id": 1}));
        assert!(SchemaValidator.validate(&ok, &route).valid);
        let bad = ApiResponse::new(200).with_json(&serde_json::json!({"id": "nope"}));
        let verdict = SchemaValidator.validate(&bad, &route);
        assert_eq!(verdict.kind, Some(FailureKind::SchemaViolation));
    }

    #[test]
    fn composite_aggregates_and_keeps_first_kind() {
        let children: Vec<Arc<dyn Validator>> = vec![
            Arc::new(StatusValidator::new(vec![200])),
            Arc::new(ContentTypeValidator::default()),
        ];
        let composite = CompositeValidator::new(children);
        let mut response = ApiResponse::new(500).with_header("content-type", "text/plain");
        response.body = b"boom".to_vec();
        let verdict = composite.validate(&response, &route());
        assert!(!verdict.valid);
        assert_eq!(verdict.kind, Some(FailureKind::Server5xx));
        assert_eq!(verdict.errors.len(), 2);
    }
}
