//! smolder: property-based smoke testing for HTTP APIs.
//!
//! The engine drives a target server with randomly-generated,
//! type-constrained requests and asserts that responses obey a configured
//! contract, surfacing minimal reproducing inputs through structural
//! shrinking. It is embedded in a host test runner: extractors supply
//! [`RouteSpec`]s, the host supplies a [`Transport`], and the engine hands
//! back [`FailureReport`]s.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use smolder::config::RunConfig;
//! use smolder::route::RouteSpec;
//! use smolder::runner::Engine;
//! use smolder::testing::FnTransport;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let routes = vec![RouteSpec::builder("/items/{id:int}").method("GET").build()?];
//! let transport = Arc::new(FnTransport::new(|_request| {
//!     Ok(smolder::request::ApiResponse::new(200))
//! }));
//! let config = RunConfig { seed: Some(1), ..RunConfig::default() };
//! let summary = Engine::new(transport, config).run(&routes).await;
//! assert!(summary.all_passed());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod config;
pub mod encode;
pub mod error;
pub mod filter;
pub mod generate;
pub mod registry;
pub mod request;
pub mod route;
pub mod runner;
pub mod schema;
pub mod shrink;
pub mod stateful;
pub mod testing;
pub mod transport;
pub mod validate;
pub mod value;

pub use auth::AuthDecorator;
pub use config::RunConfig;
pub use error::EngineError;
pub use error::Result;
pub use filter::RouteFilter;
pub use generate::DrawTree;
pub use generate::ValueGenerator;
pub use registry::TypeRegistry;
pub use request::ApiRequest;
pub use request::ApiResponse;
pub use route::RouteSpec;
pub use runner::report::FailureReport;
pub use runner::Engine;
pub use runner::RunSummary;
pub use schema::TypeRef;
pub use shrink::Shrinker;
pub use stateful::link::LinkGraph;
pub use stateful::StateMachineRunner;
pub use stateful::StatefulSettings;
pub use transport::Transport;
pub use validate::FailureKind;
pub use validate::Validator;
pub use value::Value;
