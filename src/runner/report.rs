//! Failure reports and run summaries.
//!
//! The failure report is the user-visible artifact of a run: the shrunk
//! minimal input, the seed and trial index that reproduce it, the rendered
//! request and the observed response. Stateful failures carry the prior
//! steps of the minimal sequence.

use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::generate::DrawTree;
use crate::request::ApiRequest;
use crate::request::ApiResponse;
use crate::request::Headers;
use crate::runner::draws::RouteValues;
use crate::validate::FailureKind;

/// Response body bytes shown in a report before truncation.
const MAX_RESPONSE_BODY_DISPLAY: usize = 500;

/// The concrete request that failed, fully rendered.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RenderedRequest {
    pub method: String,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub headers: Headers,
    pub body: Option<serde_json::Value>,
}

impl RenderedRequest {
    pub fn from_request(request: &ApiRequest) -> Self {
        Self {
            method: request.method.clone(),
            path: request.path.clone(),
            query: request.query.clone(),
            headers: request.headers.clone(),
            body: request
                .body
                .as_ref()
                .and_then(|body| serde_json::from_slice(&body.bytes).ok()),
        }
    }
}

/// Truncated view of the observed response.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResponseSummary {
    pub status: u16,
    pub headers: Headers,
    pub body: String,
    pub truncated: bool,
}

impl ResponseSummary {
    pub fn from_response(response: &ApiResponse) -> Self {
        let text = response.body_text();
        let truncated = text.len() > MAX_RESPONSE_BODY_DISPLAY;
        let body = if truncated {
            let mut cut = MAX_RESPONSE_BODY_DISPLAY;
            while !text.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &text[..cut])
        } else {
            text
        };
        Self { status: response.status, headers: response.headers.clone(), body, truncated }
    }
}

/// Decoded shrunk parameter values in report order: path, query, header,
/// body.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ShrunkValues {
    pub path: Vec<(String, serde_json::Value)>,
    pub query: Vec<(String, serde_json::Value)>,
    pub header: Vec<(String, serde_json::Value)>,
    pub body: Option<serde_json::Value>,
}

impl ShrunkValues {
    pub fn from_values(values: &RouteValues) -> Self {
        Self {
            path: values.path.iter().map(|(n, v)| (n.clone(), v.to_json())).collect(),
            query: values.query.iter().map(|(n, v)| (n.clone(), v.to_json())).collect(),
            header: values.header.iter().map(|(n, v)| (n.clone(), v.to_json())).collect(),
            body: values.body.as_ref().map(|v| v.to_json()),
        }
    }
}

/// One prior step in a failing stateful sequence.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepSummary {
    pub step: u32,
    pub operation: String,
    pub request: RenderedRequest,
    pub status: Option<u16>,
}

/// Everything the embedding runner needs to show and replay a failure.
#[derive(Debug, Clone, Serialize)]
pub struct FailureReport {
    /// `METHOD /pattern` identity of the failing route.
    pub operation: String,
    pub kind: FailureKind,
    /// The minimal failing request, fully rendered.
    pub request: Option<RenderedRequest>,
    /// The observed response, if the transport produced one.
    pub response: Option<ResponseSummary>,
    /// Decoded shrunk parameter values.
    pub shrunk: ShrunkValues,
    /// Run seed; with the trial index this replays the failure.
    pub seed: u64,
    /// Trial index at which the original failure surfaced.
    pub trial: u32,
    /// Auth decorator kind in effect, if any.
    pub auth: Option<&'static str>,
    /// Validator diagnostics for the minimal failure.
    pub errors: Vec<String>,
    /// Prior steps of the minimal sequence (stateful mode only).
    pub prior_steps: Vec<StepSummary>,
    /// Full decision trace of the minimal failure, when requested.
    pub draw_tree: Option<DrawTree>,
}

impl fmt::Display for FailureReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let banner = "=".repeat(60);
        writeln!(f)?;
        writeln!(f, "{banner}")?;
        writeln!(f, "ROUTE TEST FAILURE: {}", self.operation)?;
        writeln!(f, "{banner}")?;
        writeln!(f)?;
        writeln!(f, "Error Type:")?;
        writeln!(f, "  {}", self.kind)?;
        writeln!(f)?;
        writeln!(f, "Reproduce With:")?;
        writeln!(f, "  seed: {}", self.seed)?;
        writeln!(f, "  trial: {}", self.trial)?;

        if let Some(request) = &self.request {
            writeln!(f)?;
            writeln!(f, "Request Details:")?;
            writeln!(f, "  Method: {}", request.method)?;
            writeln!(f, "  Path: {}", request.path)?;
            for (name, value) in &request.query {
                writeln!(f, "  Query: {name}={value}")?;
            }
            for (name, value) in request.headers.iter() {
                let display = if name == "authorization" && value.len() > 20 {
                    format!("{}...", &value[..20])
                } else {
                    value.to_string()
                };
                writeln!(f, "  Header: {name}: {display}")?;
            }
        }
        if let Some(auth) = self.auth {
            writeln!(f, "  Auth: {auth}")?;
        }

        write_values(f, "Path Parameters (shrunk example)", &self.shrunk.path)?;
        write_values(f, "Query Parameters (shrunk example)", &self.shrunk.query)?;
        write_values(f, "Headers (shrunk example)", &self.shrunk.header)?;
        if let Some(body) = &self.shrunk.body {
            writeln!(f)?;
            writeln!(f, "Request Body (shrunk example):")?;
            let rendered = serde_json::to_string_pretty(body).unwrap_or_default();
            for line in rendered.lines() {
                writeln!(f, "  {line}")?;
            }
        }

        if let Some(response) = &self.response {
            writeln!(f)?;
            writeln!(f, "Response:")?;
            writeln!(f, "  Status Code: {}", response.status)?;
            if !response.body.is_empty() {
                writeln!(f, "  Body{}:", if response.truncated { " (truncated)" } else { "" })?;
                for line in response.body.lines() {
                    writeln!(f, "    {line}")?;
                }
            }
        }

        if !self.errors.is_empty() {
            writeln!(f)?;
            writeln!(f, "Validation Errors:")?;
            for error in &self.errors {
                writeln!(f, "  - {error}")?;
            }
        }

        if !self.prior_steps.is_empty() {
            writeln!(f)?;
            writeln!(f, "Sequence (minimal):")?;
            for step in &self.prior_steps {
                let status = step
                    .status
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "no response".to_string());
                writeln!(
                    f,
                    "  {}. {} {} -> {}",
                    step.step, step.request.method, step.request.path, status
                )?;
            }
        }

        writeln!(f)?;
        write!(f, "{banner}")
    }
}

fn write_values(
    f: &mut fmt::Formatter<'_>,
    title: &str,
    values: &[(String, serde_json::Value)],
) -> fmt::Result {
    if values.is_empty() {
        return Ok(());
    }
    writeln!(f)?;
    writeln!(f, "{title}:")?;
    for (name, value) in values {
        writeln!(f, "  {name}: {value}")?;
    }
    Ok(())
}

/// Per-trial record.
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub trial: u32,
    /// Observed status; absent when the transport failed.
    pub status: Option<u16>,
    pub latency: Option<Duration>,
    pub body_hash: Option<String>,
    pub passed: bool,
    pub fingerprint: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn response_summary_truncates_long_bodies() {
        let mut response = ApiResponse::new(500);
        response.body = vec![b'x'; 900];
        let summary = ResponseSummary::from_response(&response);
        assert!(summary.truncated);
        assert_eq!(summary.body.len(), MAX_RESPONSE_BODY_DISPLAY + 3);
    }

    #[test]
    fn display_includes_shrunk_values_and_seed() {
        let report = FailureReport {
            operation: "GET /items/{id}".to_string(),
            kind: FailureKind::Server5xx,
            request: None,
            response: None,
            shrunk: ShrunkValues {
                path: vec![("id".to_string(), Value::Int(0).to_json())],
                ..ShrunkValues::default()
            },
            seed: 42,
            trial: 7,
            auth: None,
            errors: vec!["status 500 not in allowed codes".to_string()],
            prior_steps: Vec::new(),
            draw_tree: None,
        };
        let rendered = report.to_string();
        assert!(rendered.contains("ROUTE TEST FAILURE: GET /items/{id}"));
        assert!(rendered.contains("seed: 42"));
        assert!(rendered.contains("id: 0"));
        assert!(rendered.contains("server_error_5xx"));
    }
}
