//! Credential injection.
//!
//! Decorators add auth material to outgoing requests. Token sources resolve
//! once per request; an environment source that is unset is a
//! `MissingCredential`, which fails the route before its first trial rather
//! than once per trial. Route-level overrides resolve by longest-match glob
//! over the auth table.

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::filter::GlobPattern;
use crate::request::ApiRequest;

/// Credential resolution failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("missing credential: environment variable '{var}' is not set")]
    MissingCredential { var: String },
}

/// Where a concrete token string comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenSource {
    Static(String),
    Env(String),
}

impl TokenSource {
    /// `"$VAR"` is an environment reference, anything else is literal.
    pub fn parse(spec: &str) -> Self {
        match spec.strip_prefix('$') {
            Some(var) => TokenSource::Env(var.to_string()),
            None => TokenSource::Static(spec.to_string()),
        }
    }

    pub fn resolve(&self) -> Result<String, AuthError> {
        match self {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Env(var) => std::env::var(var)
                .map_err(|_| AuthError::MissingCredential { var: var.clone() }),
        }
    }
}

/// Where an API key is placed on the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ApiKeyLocation {
    Header,
    Query,
}

/// Credential decorator applied to every request of a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthDecorator {
    None,
    Bearer { token: TokenSource },
    ApiKey { name: String, location: ApiKeyLocation, token: TokenSource },
    Composite(Vec<AuthDecorator>),
}

impl AuthDecorator {
    pub fn bearer(spec: &str) -> Self {
        AuthDecorator::Bearer { token: TokenSource::parse(spec) }
    }

    pub fn api_key_header(name: &str, spec: &str) -> Self {
        AuthDecorator::ApiKey {
            name: name.to_string(),
            location: ApiKeyLocation::Header,
            token: TokenSource::parse(spec),
        }
    }

    pub fn api_key_query(name: &str, spec: &str) -> Self {
        AuthDecorator::ApiKey {
            name: name.to_string(),
            location: ApiKeyLocation::Query,
            token: TokenSource::parse(spec),
        }
    }

    /// Resolve every token source without touching a request.
    ///
    /// The runner calls this before the first trial so a missing env var
    /// fails the route fast.
    pub fn preflight(&self) -> Result<(), AuthError> {
        match self {
            AuthDecorator::None => Ok(()),
            AuthDecorator::Bearer { token } | AuthDecorator::ApiKey { token, .. } => {
                token.resolve().map(|_| ())
            }
            AuthDecorator::Composite(parts) => {
                for part in parts {
                    part.preflight()?;
                }
                Ok(())
            }
        }
    }

    /// Inject credentials into an outgoing request. Headers land after all
    /// generated headers per the request-construction contract.
    pub fn apply(&self, request: &mut ApiRequest) -> Result<(), AuthError> {
        match self {
            AuthDecorator::None => Ok(()),
            AuthDecorator::Bearer { token } => {
                let token = token.resolve()?;
                request.headers.insert("authorization", format!("Bearer {token}"));
                Ok(())
            }
            AuthDecorator::ApiKey { name, location, token } => {
                let token = token.resolve()?;
                match location {
                    ApiKeyLocation::Header => request.headers.insert(name, token),
                    ApiKeyLocation::Query => request.query.push((name.clone(), token)),
                }
                Ok(())
            }
            AuthDecorator::Composite(parts) => {
                for part in parts {
                    part.apply(request)?;
                }
                Ok(())
            }
        }
    }

    /// Short label for failure reports.
    pub fn kind_name(&self) -> &'static str {
        match self {
            AuthDecorator::None => "none",
            AuthDecorator::Bearer { .. } => "bearer",
            AuthDecorator::ApiKey { .. } => "api_key",
            AuthDecorator::Composite(_) => "composite",
        }
    }
}

impl Default for AuthDecorator {
    fn default() -> Self {
        AuthDecorator::None
    }
}

/// Route-pattern-keyed auth overrides, resolved longest-match-first.
#[derive(Debug, Clone, Default)]
pub struct AuthTable {
    rows: Vec<(GlobPattern, AuthDecorator)>,
}

impl AuthTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, pattern: impl Into<String>, auth: AuthDecorator) {
        self.rows.push((GlobPattern::parse(pattern), auth));
    }

    /// The most specific (longest pattern) matching decorator, if any.
    pub fn lookup(&self, path: &str) -> Option<&AuthDecorator> {
        self.rows
            .iter()
            .filter(|(glob, _)| glob.matches(path))
            .max_by_key(|(glob, _)| glob.specificity())
            .map(|(_, auth)| auth)
    }
}
