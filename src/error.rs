//! Engine-level error aggregate.
//!
//! Component modules own their plain-data error enums (`RouteSpecError`,
//! `RegistryError`, `GenError`, `EncodeError`, `AuthError`,
//! `TransportError`); this module rolls up the ones that escape to the
//! caller. Transport and validator failures never appear here: they are
//! data in run results. Only structural integrity violations and
//! route-fatal setup failures bubble.

use snafu::Snafu;

use crate::auth::AuthError;
use crate::encode::EncodeError;
use crate::generate::GenError;
use crate::registry::RegistryError;
use crate::route::RouteSpecError;

/// Result type for engine operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors that escape the engine to the embedding test runner.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum EngineError {
    /// A route spec violated its structural invariants.
    #[snafu(display("invalid route spec: {source}"))]
    InvalidRoute {
        /// Underlying invariant violation.
        source: RouteSpecError,
    },

    /// Generator resolution failed for a route's declared shapes.
    #[snafu(display("generator resolution failed for {operation}: {source}"))]
    Resolution {
        /// `METHOD /path` of the affected route.
        operation: String,
        /// Underlying registry error.
        source: RegistryError,
    },

    /// Drawing or replaying values failed in a way shrinking cannot route
    /// around (e.g. unguarded schema recursion).
    #[snafu(display("value generation failed for {operation}: {source}"))]
    Generation {
        /// `METHOD /path` of the affected route.
        operation: String,
        /// Underlying generation error.
        source: GenError,
    },

    /// Path encoding rejected a drawn value set.
    #[snafu(display("path encoding failed for {operation}: {source}"))]
    Encoding {
        /// `METHOD /path` of the affected route.
        operation: String,
        /// Underlying encoding error.
        source: EncodeError,
    },

    /// A credential source could not be resolved.
    #[snafu(display("auth setup failed for {operation}: {source}"))]
    Credential {
        /// `METHOD /path` of the affected route.
        operation: String,
        /// Underlying auth error.
        source: AuthError,
    },
}

impl From<RouteSpecError> for EngineError {
    fn from(source: RouteSpecError) -> Self {
        EngineError::InvalidRoute { source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_error_display_names_the_operation() {
        let err = EngineError::Resolution {
            operation: "GET /items/{id}".to_string(),
            source: RegistryError::UnsupportedType { type_name: "ref 'ghost'".to_string() },
        };
        assert_eq!(
            err.to_string(),
            "generator resolution failed for GET /items/{id}: \
             no generator available for type: ref 'ghost'"
        );
    }
}
