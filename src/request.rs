//! Wire contracts between the engine and the transport.
//!
//! The engine produces [`ApiRequest`] and consumes [`ApiResponse`]; the
//! transport sees nothing else. Headers are case-insensitive: names are
//! folded to lowercase on insertion, which also makes reports canonical.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Case-insensitive header map with canonical (lowercase) names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Headers {
    entries: BTreeMap<String, String>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<String>) {
        self.entries.insert(name.as_ref().to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for Headers {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// Serialized request body with its content type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestBody {
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl RequestBody {
    pub fn json(document: &serde_json::Value) -> Self {
        Self {
            content_type: "application/json".to_string(),
            bytes: serde_json::to_vec(document).unwrap_or_default(),
        }
    }
}

/// One fully-built outgoing request.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    /// Uppercase HTTP method token.
    pub method: String,
    /// Already-encoded path starting with `/`.
    pub path: String,
    /// Ordered (name, rendered value) pairs; repeated names allowed.
    pub query: Vec<(String, String)>,
    /// Case-insensitive headers, auth injected last.
    pub headers: Headers,
    pub body: Option<RequestBody>,
    /// Finite per-request bound enforced by the runner.
    pub timeout: Duration,
}

impl ApiRequest {
    /// Stable fingerprint of the request identity, used to pair trials with
    /// observed responses in reports.
    pub fn fingerprint(&self) -> String {
        let mut hash = Fnv1a::new();
        hash.update(self.method.as_bytes());
        hash.update(self.path.as_bytes());
        for (name, value) in &self.query {
            hash.update(name.as_bytes());
            hash.update(value.as_bytes());
        }
        for (name, value) in self.headers.iter() {
            hash.update(name.as_bytes());
            hash.update(value.as_bytes());
        }
        if let Some(body) = &self.body {
            hash.update(&body.bytes);
        }
        format!("{:016x}", hash.finish())
    }
}

/// One received response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Status in 100–599.
    pub status: u16,
    pub headers: Headers,
    pub body: Vec<u8>,
    pub elapsed: Option<Duration>,
}

impl ApiResponse {
    pub fn new(status: u16) -> Self {
        Self { status, headers: Headers::new(), body: Vec::new(), elapsed: None }
    }

    pub fn with_json(mut self, document: &serde_json::Value) -> Self {
        self.headers.insert("content-type", "application/json");
        self.body = serde_json::to_vec(document).unwrap_or_default();
        self
    }

    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn content_type(&self) -> &str {
        self.headers.get("content-type").unwrap_or("")
    }

    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn body_json(&self) -> Option<serde_json::Value> {
        serde_json::from_slice(&self.body).ok()
    }

    /// Stable content hash for trial records.
    pub fn body_hash(&self) -> String {
        let mut hash = Fnv1a::new();
        hash.update(&self.body);
        format!("{:016x}", hash.finish())
    }
}

/// Small stable hash; deterministic across processes so fingerprints are
/// comparable between a report and a replay.
struct Fnv1a(u64);

impl Fnv1a {
    fn new() -> Self {
        Self(0xcbf2_9ce4_8422_2325)
    }

    fn update(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u64::from(*byte);
            self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
        }
        // Field separator so ("ab", "c") and ("a", "bc") differ.
        self.0 ^= 0xff;
        self.0 = self.0.wrapping_mul(0x0000_0100_0000_01b3);
    }

    fn finish(&self) -> u64 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_are_case_insensitive() {
        let mut headers = Headers::new();
        headers.insert("X-API-Key", "k");
        assert_eq!(headers.get("x-api-key"), Some("k"));
        assert_eq!(headers.get("X-Api-Key"), Some("k"));
    }

    #[test]
    fn fingerprint_is_stable_and_distinguishes_requests() {
        let request = ApiRequest {
            method: "GET".to_string(),
            path: "/items/1".to_string(),
            query: vec![("q".to_string(), "a".to_string())],
            headers: Headers::new(),
            body: None,
            timeout: Duration::from_secs(30),
        };
        assert_eq!(request.fingerprint(), request.fingerprint());

        let mut other = request.clone();
        other.path = "/items/2".to_string();
        assert_ne!(request.fingerprint(), other.fingerprint());
    }

    #[test]
    fn json_body_sets_content_type() {
        let body = RequestBody::json(&serde_json::json!({"a": 1}));
        assert_eq!(body.content_type, "application/json");
        assert_eq!(body.bytes, br#"{"a":1}"#);
    }

    #[test]
    fn response_json_parses_body() {
        let response = ApiResponse::new(200).with_json(&serde_json::json!({"id": 4}));
        assert_eq!(response.body_json().expect("json")["id"], 4);
        assert_eq!(response.content_type(), "application/json");
    }
}
