//! Single-route property loop and the run orchestrator.
//!
//! Trials are strictly sequential within a route: trial `i + 1` never
//! starts before trial `i`'s response is fully received or timed out, so
//! request fingerprints map one-to-one to observed responses. On the first
//! failing trial the runner stops generating and drives the shrinker until
//! no candidate reduction still fails the same way.

pub mod draws;
pub mod report;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::auth::AuthDecorator;
use crate::auth::AuthError;
use crate::auth::AuthTable;
use crate::config::RunConfig;
use crate::error::EngineError;
use crate::generate::trial_rng;
use crate::generate::DrawTree;
use crate::registry::RegistrySnapshot;
use crate::registry::TypeRegistry;
use crate::request::ApiRequest;
use crate::request::ApiResponse;
use crate::route::RouteSpec;
use crate::runner::draws::build_request;
use crate::runner::draws::RouteGenerator;
use crate::runner::draws::RouteValues;
use crate::runner::report::FailureReport;
use crate::runner::report::RenderedRequest;
use crate::runner::report::ResponseSummary;
use crate::runner::report::RunResult;
use crate::runner::report::ShrunkValues;
use crate::shrink::Shrinker;
use crate::transport::Transport;
use crate::transport::TransportError;
use crate::validate::CompositeValidator;
use crate::validate::ContentTypeValidator;
use crate::validate::FailureKind;
use crate::validate::SchemaValidator;
use crate::validate::StatusValidator;
use crate::validate::Validator;
use crate::validate::Verdict;

/// Settings for one route's property loop.
#[derive(Debug, Clone)]
pub struct TrialSettings {
    pub max_examples: u32,
    pub per_trial_timeout: Duration,
    pub seed: u64,
    /// Position of this (route, method) pair in the run, used to partition
    /// the seed tree.
    pub route_index: u64,
    pub capture_draw_trees: bool,
}

/// Aggregated outcome for one (route, method) pair.
#[derive(Debug, Clone)]
pub struct RouteOutcome {
    pub operation: String,
    pub trials: u32,
    pub passed: u32,
    pub status_counts: BTreeMap<u16, u64>,
    pub results: Vec<RunResult>,
    pub failure: Option<FailureReport>,
    pub wall_time: Duration,
    pub skipped: bool,
}

impl RouteOutcome {
    fn empty(operation: String) -> Self {
        Self {
            operation,
            trials: 0,
            passed: 0,
            status_counts: BTreeMap::new(),
            results: Vec::new(),
            failure: None,
            wall_time: Duration::ZERO,
            skipped: false,
        }
    }

    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }
}

/// One executed request with its classification.
struct TrialExecution {
    response: Option<ApiResponse>,
    verdict: Verdict,
    latency: Option<Duration>,
}

/// Single-route property loop.
pub struct TrialRunner {
    transport: Arc<dyn Transport>,
    registry: RegistrySnapshot,
    validator: Arc<dyn Validator>,
    auth: AuthDecorator,
    settings: TrialSettings,
}

impl TrialRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: RegistrySnapshot,
        validator: Arc<dyn Validator>,
        auth: AuthDecorator,
        settings: TrialSettings,
    ) -> Self {
        Self { transport, registry, validator, auth, settings }
    }

    /// Run up to `max_examples` randomized trials against one route and
    /// method, shrinking the first failure to a local minimum.
    ///
    /// Setup failures (`MissingCredential`, unresolvable generators) are
    /// reported as route-local failures with zero trials executed; only
    /// structural invariant violations return `Err`.
    pub async fn run_route(
        &self,
        route: &RouteSpec,
        method: &str,
    ) -> Result<RouteOutcome, EngineError> {
        let operation = route.operation_id(method);
        let started = Instant::now();
        let mut outcome = RouteOutcome::empty(operation.clone());

        // Credentials resolve before the first trial; a missing env var
        // fails the route fast rather than once per trial.
        if let Err(AuthError::MissingCredential { var }) = self.auth.preflight() {
            outcome.failure = Some(self.setup_failure(
                &operation,
                FailureKind::MissingCredential,
                vec![format!("environment variable '{var}' is not set")],
            ));
            outcome.wall_time = started.elapsed();
            return Ok(outcome);
        }

        let generator = match RouteGenerator::new(route, method, &self.registry, &[]) {
            Ok(generator) => generator,
            Err(err) => {
                outcome.failure = Some(self.setup_failure(
                    &operation,
                    FailureKind::UnsupportedType,
                    vec![err.to_string()],
                ));
                outcome.wall_time = started.elapsed();
                return Ok(outcome);
            }
        };

        let cx = self.registry.context();
        for trial in 0..self.settings.max_examples {
            let mut rng = trial_rng(self.settings.seed, self.settings.route_index, trial.into());
            let (values, tree) = match generator.draw(&mut rng, cx) {
                Ok(drawn) => drawn,
                Err(err) => {
                    outcome.failure = Some(self.setup_failure(
                        &operation,
                        FailureKind::UnsupportedType,
                        vec![err.to_string()],
                    ));
                    break;
                }
            };
            let request = self.materialize(route, method, &values).map_err(|source| {
                EngineError::Encoding { operation: operation.clone(), source }
            })?;

            let execution = self.execute_with_route(route, &request).await;
            outcome.trials += 1;
            if let Some(response) = &execution.response {
                *outcome.status_counts.entry(response.status).or_insert(0) += 1;
            }
            outcome.results.push(RunResult {
                trial,
                status: execution.response.as_ref().map(|r| r.status),
                latency: execution.latency,
                body_hash: execution.response.as_ref().map(ApiResponse::body_hash),
                passed: execution.verdict.valid,
                fingerprint: request.fingerprint(),
            });

            if execution.verdict.valid {
                outcome.passed += 1;
                debug!(operation = %operation, trial, "trial passed");
                continue;
            }

            let kind = execution.verdict.kind.unwrap_or(FailureKind::UnexpectedStatus);
            debug!(operation = %operation, trial, kind = %kind, "trial failed, shrinking");
            let report = self
                .shrink(route, method, &generator, trial, kind, tree, values, execution)
                .await?;
            outcome.failure = Some(report);
            break;
        }

        outcome.wall_time = started.elapsed();
        info!(
            operation = %operation,
            trials = outcome.trials,
            passed = outcome.passed,
            failed = !outcome.is_pass(),
            "route complete"
        );
        Ok(outcome)
    }

    /// Encode the path, render query and headers, serialize the body, and
    /// inject auth last.
    fn materialize(
        &self,
        route: &RouteSpec,
        method: &str,
        values: &RouteValues,
    ) -> Result<ApiRequest, crate::encode::EncodeError> {
        let mut request =
            build_request(route, method, values, self.settings.per_trial_timeout)?;
        // Preflight already resolved every source; a failure here would be
        // an env var vanishing mid-run, which still must not panic.
        if let Err(err) = self.auth.apply(&mut request) {
            warn!(error = %err, "auth application failed after successful preflight");
        }
        Ok(request)
    }

    /// Send one request and classify the outcome.
    ///
    /// Transport errors (including the outer timeout) never reach the
    /// validator; they become failing verdicts of kind `ServerUnreachable`.
    async fn execute_with_route(&self, route: &RouteSpec, request: &ApiRequest) -> TrialExecution {
        let started = Instant::now();
        let sent = timeout(self.settings.per_trial_timeout, self.transport.send(request)).await;
        let latency = started.elapsed();
        match sent {
            Ok(Ok(response)) => {
                let verdict = self.validator.validate(&response, route);
                TrialExecution {
                    latency: response.elapsed.or(Some(latency)),
                    response: Some(response),
                    verdict,
                }
            }
            Ok(Err(err)) => TrialExecution {
                response: None,
                verdict: Verdict::fail(FailureKind::ServerUnreachable, vec![err.to_string()]),
                latency: Some(latency),
            },
            Err(_) => {
                let err = TransportError::Timeout {
                    duration_ms: self.settings.per_trial_timeout.as_millis() as u64,
                };
                TrialExecution {
                    response: None,
                    verdict: Verdict::fail(FailureKind::ServerUnreachable, vec![err.to_string()]),
                    latency: Some(latency),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn shrink(
        &self,
        route: &RouteSpec,
        method: &str,
        generator: &RouteGenerator,
        trial: u32,
        kind: FailureKind,
        tree: DrawTree,
        values: RouteValues,
        execution: TrialExecution,
    ) -> Result<FailureReport, EngineError> {
        let operation = route.operation_id(method);
        let cx = self.registry.context();
        let mut current_tree = tree;
        let mut current_values = values;
        let mut current_response = execution.response;
        let mut current_errors = execution.verdict.errors;

        loop {
            let mut adopted = false;
            for candidate in Shrinker::candidates(&current_tree) {
                // A candidate the generators cannot replay is structurally
                // invalid after the edit; skip it.
                let Ok(values) = generator.replay(&candidate, cx) else { continue };
                let Ok(request) = self.materialize(route, method, &values) else { continue };
                let execution = self.execute_with_route(route, &request).await;
                if !execution.verdict.valid && execution.verdict.kind == Some(kind) {
                    debug_assert!(candidate.metric() < current_tree.metric());
                    current_tree = candidate;
                    current_values = values;
                    current_response = execution.response;
                    current_errors = execution.verdict.errors;
                    adopted = true;
                    break;
                }
            }
            if !adopted {
                break;
            }
        }

        let request = self
            .materialize(route, method, &current_values)
            .map_err(|source| EngineError::Encoding { operation: operation.clone(), source })?;
        Ok(FailureReport {
            operation,
            kind,
            request: Some(RenderedRequest::from_request(&request)),
            response: current_response.as_ref().map(ResponseSummary::from_response),
            shrunk: ShrunkValues::from_values(&current_values),
            seed: self.settings.seed,
            trial,
            auth: match &self.auth {
                AuthDecorator::None => None,
                other => Some(other.kind_name()),
            },
            errors: current_errors,
            prior_steps: Vec::new(),
            draw_tree: self.settings.capture_draw_trees.then_some(current_tree),
        })
    }

    fn setup_failure(
        &self,
        operation: &str,
        kind: FailureKind,
        errors: Vec<String>,
    ) -> FailureReport {
        FailureReport {
            operation: operation.to_string(),
            kind,
            request: None,
            response: None,
            shrunk: ShrunkValues::default(),
            seed: self.settings.seed,
            trial: 0,
            auth: match &self.auth {
                AuthDecorator::None => None,
                other => Some(other.kind_name()),
            },
            errors,
            prior_steps: Vec::new(),
            draw_tree: None,
        }
    }
}

/// Whole-run aggregate handed back to the embedding runner.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub seed: u64,
    pub outcomes: Vec<RouteOutcome>,
    /// Set when the filter removed every route; reported as a warning, not
    /// an error.
    pub no_applicable_routes: bool,
    pub total_wall_time: Duration,
}

impl RunSummary {
    pub fn failures(&self) -> impl Iterator<Item = &FailureReport> {
        self.outcomes.iter().filter_map(|o| o.failure.as_ref())
    }

    pub fn all_passed(&self) -> bool {
        self.outcomes.iter().all(RouteOutcome::is_pass)
    }
}

/// Run orchestrator: filters routes, builds validators and auth, and runs
/// each surviving (route, method) pair sequentially.
pub struct Engine {
    transport: Arc<dyn Transport>,
    registry: TypeRegistry,
    auth_table: AuthTable,
    config: RunConfig,
}

impl Engine {
    pub fn new(transport: Arc<dyn Transport>, config: RunConfig) -> Self {
        Self { transport, registry: TypeRegistry::new(), auth_table: AuthTable::new(), config }
    }

    pub fn with_registry(mut self, registry: TypeRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn with_auth(mut self, pattern: impl Into<String>, auth: AuthDecorator) -> Self {
        self.auth_table.insert(pattern, auth);
        self
    }

    /// Setup-time access for registrations and scoped overrides.
    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Run the full route set and collect a summary.
    pub async fn run(&self, routes: &[RouteSpec]) -> RunSummary {
        let started = Instant::now();
        let seed = self.config.resolved_seed();
        let filter = self.config.filter();
        let selected = filter.apply(routes);

        if selected.is_empty() {
            warn!(total = routes.len(), "no applicable routes after filtering");
            return RunSummary {
                seed,
                outcomes: Vec::new(),
                no_applicable_routes: true,
                total_wall_time: started.elapsed(),
            };
        }

        for route in &selected {
            self.registry.absorb_schemas(route.schemas());
        }
        let snapshot = self.registry.snapshot();
        let validator = self.build_validator();

        let mut outcomes = Vec::new();
        let mut route_index: u64 = 0;
        for route in selected {
            let effective = self.config.effective_for(route.path());
            for method in route.methods() {
                if !filter.selects_method(method) {
                    continue;
                }
                let operation = route.operation_id(method);
                if effective.skip {
                    debug!(operation = %operation, "route skipped by override");
                    let mut outcome = RouteOutcome::empty(operation);
                    outcome.skipped = true;
                    outcomes.push(outcome);
                    continue;
                }

                let auth = effective
                    .auth
                    .clone()
                    .or_else(|| self.auth_table.lookup(route.path()).cloned())
                    .unwrap_or(AuthDecorator::None);
                let runner = TrialRunner::new(
                    Arc::clone(&self.transport),
                    snapshot.clone(),
                    Arc::clone(&validator),
                    auth,
                    TrialSettings {
                        max_examples: effective.max_examples,
                        per_trial_timeout: self.config.per_trial_timeout,
                        seed,
                        route_index,
                        capture_draw_trees: self.config.capture_draw_trees,
                    },
                );
                match runner.run_route(route, method).await {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(err) => {
                        // Structural invariant violations surface loudly but
                        // stay local to the offending route.
                        warn!(operation = %operation, error = %err, "route aborted");
                        let mut outcome = RouteOutcome::empty(operation);
                        outcome.failure = Some(FailureReport {
                            operation: outcome.operation.clone(),
                            kind: FailureKind::UnsupportedType,
                            request: None,
                            response: None,
                            shrunk: ShrunkValues::default(),
                            seed,
                            trial: 0,
                            auth: None,
                            errors: vec![err.to_string()],
                            prior_steps: Vec::new(),
                            draw_tree: None,
                        });
                        outcomes.push(outcome);
                    }
                }
                route_index += 1;
            }
        }

        RunSummary {
            seed,
            outcomes,
            no_applicable_routes: false,
            total_wall_time: started.elapsed(),
        }
    }

    fn build_validator(&self) -> Arc<dyn Validator> {
        let mut composite = CompositeValidator::default();
        composite.push(Arc::new(StatusValidator::new(self.config.allowed_statuses())));
        if self.config.validate_content_type {
            composite.push(Arc::new(ContentTypeValidator::default()));
        }
        if self.config.validate_schema {
            composite.push(Arc::new(SchemaValidator));
        }
        Arc::new(composite)
    }
}
