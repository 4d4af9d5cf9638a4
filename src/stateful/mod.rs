//! Stateful mode: rule-based call sequences over bundles.
//!
//! One rule per (method, path) operation. A sequence draws eligible rules
//! uniformly, feeds linked parameters from bundles populated by earlier
//! responses, and stops at `step_count`, two consecutive step timeouts, or
//! the total wall-time budget. A failing sequence is shrunk at two
//! granularities: whole-step deletion, then in-step parameter reduction,
//! with every candidate re-executed from a reset transport.

pub mod bundle;
pub mod link;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use rand::Rng;
use tokio::time::timeout;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::generate::trial_rng;
use crate::generate::DrawTree;
use crate::registry::RegistrySnapshot;
use crate::request::ApiRequest;
use crate::request::ApiResponse;
use crate::route::RouteSpec;
use crate::runner::draws::build_request;
use crate::runner::draws::RouteGenerator;
use crate::runner::draws::RouteValues;
use crate::runner::report::FailureReport;
use crate::runner::report::RenderedRequest;
use crate::runner::report::ResponseSummary;
use crate::runner::report::ShrunkValues;
use crate::runner::report::StepSummary;
use crate::shrink::Shrinker;
use crate::stateful::bundle::BundleStore;
use crate::stateful::link::FieldExtractor;
use crate::stateful::link::LinkGraph;
use crate::transport::Transport;
use crate::validate::FailureKind;
use crate::validate::Validator;
use crate::validate::Verdict;
use crate::value::Value;

/// Settings for a stateful run.
#[derive(Debug, Clone)]
pub struct StatefulSettings {
    /// Maximum steps (API calls) per sequence.
    pub step_count: u32,
    /// Sequences to run before declaring the route group healthy.
    pub max_sequences: u32,
    /// Maximum bundle-chain depth a draw may extend.
    pub recursion_limit: u32,
    /// Bound on a single step's request.
    pub per_step_timeout: Duration,
    /// Wall-time budget for the whole run; partial results on expiry.
    pub total_timeout: Duration,
    pub seed: u64,
    /// Stop the sequence at the first failing step.
    pub fail_fast: bool,
    pub capture_draw_trees: bool,
}

impl Default for StatefulSettings {
    fn default() -> Self {
        Self {
            step_count: 50,
            max_sequences: 10,
            recursion_limit: 5,
            per_step_timeout: Duration::from_secs(30),
            total_timeout: Duration::from_secs(600),
            seed: 0,
            fail_fast: true,
            capture_draw_trees: false,
        }
    }
}

/// Reported-only execution counters. Never affect the verdict.
#[derive(Debug, Clone, Default)]
pub struct Coverage {
    /// Executions per operation during sequence generation.
    pub operation_firings: BTreeMap<String, u64>,
    /// Traversals per link edge, keyed `bundle -> operation` for
    /// consumption and `operation -> bundle` for production.
    pub edge_traversals: BTreeMap<String, u64>,
}

/// Result of a stateful run.
#[derive(Debug, Clone)]
pub struct StatefulOutcome {
    pub sequences_run: u32,
    pub steps_executed: u64,
    pub failure: Option<FailureReport>,
    pub coverage: Coverage,
    pub timed_out: bool,
}

impl StatefulOutcome {
    pub fn is_pass(&self) -> bool {
        self.failure.is_none()
    }
}

/// One synthesized rule.
struct Rule {
    operation: String,
    route_idx: usize,
    method: String,
    /// (parameter, bundle) pairs this rule draws from bundles.
    consumed: Vec<(String, String)>,
    /// (extractor, bundle) pairs this rule appends to on success.
    produced: Vec<(FieldExtractor, String)>,
    generator: RouteGenerator,
}

/// One recorded step of a sequence: enough to re-execute it exactly.
#[derive(Clone)]
struct StepPlan {
    rule_idx: usize,
    /// Bundle-index draws, parallel to the rule's `consumed` list.
    linked: Vec<DrawTree>,
    /// The non-linked parameter draws.
    params: DrawTree,
}

impl StepPlan {
    fn combined_tree(&self) -> DrawTree {
        DrawTree::Product {
            children: vec![
                DrawTree::Product { children: self.linked.clone() },
                self.params.clone(),
            ],
        }
    }

    fn from_combined(&self, tree: &DrawTree) -> Option<StepPlan> {
        let DrawTree::Product { children } = tree else { return None };
        let [linked_group, params] = children.as_slice() else { return None };
        let DrawTree::Product { children: linked } = linked_group else { return None };
        if linked.len() != self.linked.len() {
            return None;
        }
        Some(StepPlan {
            rule_idx: self.rule_idx,
            linked: linked.clone(),
            params: params.clone(),
        })
    }
}

/// A step executed during sequence replay.
struct ExecutedStep {
    operation: String,
    request: ApiRequest,
    status: Option<u16>,
}

/// Outcome of replaying a candidate sequence from scratch.
enum Replay {
    /// Structurally invalid after an edit: a bundle index no longer
    /// resolves or a tree no longer matches its generator.
    Invalid,
    /// Every step passed.
    Passed,
    /// Failed at step `at` with `kind`.
    Failed {
        at: usize,
        kind: FailureKind,
        executed: Vec<ExecutedStep>,
        values: RouteValues,
        response: Option<ApiResponse>,
        errors: Vec<String>,
    },
}

/// Bundle-tracking sequence generator and shrinker.
pub struct StateMachineRunner {
    transport: Arc<dyn Transport>,
    registry: RegistrySnapshot,
    validator: Arc<dyn Validator>,
    settings: StatefulSettings,
}

impl StateMachineRunner {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: RegistrySnapshot,
        validator: Arc<dyn Validator>,
        settings: StatefulSettings,
    ) -> Self {
        Self { transport, registry, validator, settings }
    }

    /// Run up to `max_sequences` sequences; stop and shrink on the first
    /// failing step anywhere.
    pub async fn run(&self, routes: &[RouteSpec], graph: &LinkGraph) -> StatefulOutcome {
        let rules = self.build_rules(routes, graph);
        let mut outcome = StatefulOutcome {
            sequences_run: 0,
            steps_executed: 0,
            failure: None,
            coverage: Coverage::default(),
            timed_out: false,
        };
        if rules.is_empty() {
            warn!("stateful mode found no runnable operations");
            return outcome;
        }

        let deadline = Instant::now() + self.settings.total_timeout;
        for sequence in 0..self.settings.max_sequences {
            if Instant::now() >= deadline {
                outcome.timed_out = true;
                break;
            }
            if let Err(err) = self.transport.reset().await {
                warn!(error = %err, "transport reset failed before sequence");
            }
            let generated = self
                .generate_sequence(routes, &rules, sequence, deadline, &mut outcome)
                .await;
            outcome.sequences_run = sequence + 1;

            let Some((failed_at, kind)) = generated.failure else { continue };
            debug!(sequence, step = failed_at, kind = %kind, "sequence failed, shrinking");
            let minimal = self
                .shrink_sequence(
                    routes,
                    &rules,
                    generated.steps[..=failed_at].to_vec(),
                    kind,
                    deadline,
                )
                .await;
            outcome.failure =
                Some(self.report(routes, &rules, &minimal, kind, sequence).await);
            break;
        }

        info!(
            sequences = outcome.sequences_run,
            steps = outcome.steps_executed,
            failed = !outcome.is_pass(),
            "stateful run complete"
        );
        outcome
    }

    fn build_rules(&self, routes: &[RouteSpec], graph: &LinkGraph) -> Vec<Rule> {
        let mut rules = Vec::new();
        for (route_idx, route) in routes.iter().enumerate() {
            for method in route.methods() {
                let operation = route.operation_id(method);
                let consumed: Vec<(String, String)> = graph
                    .consumptions_for(&operation)
                    .map(|c| (c.parameter.clone(), c.bundle.clone()))
                    .collect();
                let produced: Vec<(FieldExtractor, String)> = graph
                    .productions_for(&operation)
                    .map(|p| (p.extractor.clone(), p.bundle.clone()))
                    .collect();
                let exclude: Vec<String> = consumed.iter().map(|(p, _)| p.clone()).collect();
                let generator =
                    match RouteGenerator::new(route, method, &self.registry, &exclude) {
                        Ok(generator) => generator,
                        Err(err) => {
                            warn!(operation = %operation, error = %err, "rule dropped");
                            continue;
                        }
                    };
                rules.push(Rule {
                    operation,
                    route_idx,
                    method: method.clone(),
                    consumed,
                    produced,
                    generator,
                });
            }
        }
        rules
    }

    async fn generate_sequence(
        &self,
        routes: &[RouteSpec],
        rules: &[Rule],
        sequence: u32,
        deadline: Instant,
        outcome: &mut StatefulOutcome,
    ) -> GeneratedSequence {
        let cx = self.registry.context();
        let mut bundles = BundleStore::new();
        let mut steps: Vec<StepPlan> = Vec::new();
        let mut failure = None;
        let mut consecutive_timeouts = 0u32;

        for step_no in 0..self.settings.step_count {
            if Instant::now() >= deadline {
                outcome.timed_out = true;
                break;
            }

            let eligible: Vec<usize> = (0..rules.len())
                .filter(|&idx| self.rule_eligible(&rules[idx], &bundles))
                .collect();
            if eligible.is_empty() {
                break;
            }

            let mut rng = trial_rng(self.settings.seed, sequence.into(), step_no.into());
            let rule_idx = eligible[rng.gen_range(0..eligible.len())];
            let rule = &rules[rule_idx];

            let mut linked_trees = Vec::with_capacity(rule.consumed.len());
            let mut linked_values = Vec::with_capacity(rule.consumed.len());
            let mut consumed_depth = 0u32;
            for (param, bundle) in &rule.consumed {
                let entries = bundles.eligible(bundle, self.settings.recursion_limit);
                let idx = rng.gen_range(0..entries.len());
                linked_trees.push(DrawTree::Int {
                    value: idx as i64,
                    min: 0,
                    max: entries.len() as i64 - 1,
                    origin: 0,
                });
                linked_values.push((param.clone(), entries[idx].value.clone()));
                consumed_depth = consumed_depth.max(entries[idx].depth);
                *outcome
                    .coverage
                    .edge_traversals
                    .entry(format!("{bundle} -> {}", rule.operation))
                    .or_insert(0) += 1;
            }

            let (generated, params_tree) = match rule.generator.draw(&mut rng, cx) {
                Ok(drawn) => drawn,
                Err(err) => {
                    warn!(operation = %rule.operation, error = %err, "draw failed mid-sequence");
                    failure = Some((steps.len(), FailureKind::UnsupportedType));
                    steps.push(StepPlan {
                        rule_idx,
                        linked: linked_trees,
                        params: DrawTree::Product { children: Vec::new() },
                    });
                    break;
                }
            };

            let route = &routes[rule.route_idx];
            let values = merge_values(route, generated, &linked_values);
            let Ok(request) =
                build_request(route, &rule.method, &values, self.settings.per_step_timeout)
            else {
                failure = Some((steps.len(), FailureKind::UnsupportedType));
                steps.push(StepPlan { rule_idx, linked: linked_trees, params: params_tree });
                break;
            };

            let (response, verdict, was_timeout) = self.execute_step(route, &request).await;
            outcome.steps_executed += 1;
            *outcome.coverage.operation_firings.entry(rule.operation.clone()).or_insert(0) += 1;
            consecutive_timeouts = if was_timeout { consecutive_timeouts + 1 } else { 0 };

            steps.push(StepPlan { rule_idx, linked: linked_trees, params: params_tree });

            if !verdict.valid {
                let kind = verdict.kind.unwrap_or(FailureKind::UnexpectedStatus);
                if failure.is_none() {
                    failure = Some((steps.len() - 1, kind));
                }
                if self.settings.fail_fast {
                    break;
                }
            } else if let Some(response) = &response {
                self.extract_productions(
                    rule,
                    response,
                    consumed_depth + 1,
                    &mut bundles,
                    Some(&mut outcome.coverage),
                );
            }

            if consecutive_timeouts >= 2 {
                debug!(sequence, "two consecutive step timeouts, ending sequence");
                break;
            }
        }

        GeneratedSequence { steps, failure }
    }

    fn rule_eligible(&self, rule: &Rule, bundles: &BundleStore) -> bool {
        rule.consumed
            .iter()
            .all(|(_, bundle)| !bundles.eligible(bundle, self.settings.recursion_limit).is_empty())
    }

    fn extract_productions(
        &self,
        rule: &Rule,
        response: &ApiResponse,
        depth: u32,
        bundles: &mut BundleStore,
        coverage: Option<&mut Coverage>,
    ) {
        // Only successful responses feed bundles.
        if !(200..400).contains(&response.status) {
            return;
        }
        let mut coverage = coverage;
        for (extractor, bundle) in &rule.produced {
            // Failed extraction produces nothing; the rule simply yields no
            // new entries for this response.
            let Some(value) = extractor.extract(response) else { continue };
            bundles.append(bundle, value, depth);
            if let Some(cov) = coverage.as_mut() {
                *cov.edge_traversals
                    .entry(format!("{} -> {bundle}", rule.operation))
                    .or_insert(0) += 1;
            }
        }
    }

    async fn execute_step(
        &self,
        route: &RouteSpec,
        request: &ApiRequest,
    ) -> (Option<ApiResponse>, Verdict, bool) {
        match timeout(self.settings.per_step_timeout, self.transport.send(request)).await {
            Ok(Ok(response)) => {
                let verdict = self.validator.validate(&response, route);
                (Some(response), verdict, false)
            }
            Ok(Err(err)) => (
                None,
                Verdict::fail(FailureKind::ServerUnreachable, vec![err.to_string()]),
                false,
            ),
            Err(_) => {
                let message = format!(
                    "request timed out after {}ms",
                    self.settings.per_step_timeout.as_millis()
                );
                (None, Verdict::fail(FailureKind::ServerUnreachable, vec![message]), true)
            }
        }
    }

    /// Two-granularity sequence shrinking: whole-step deletion (never the
    /// final failing step), then in-step parameter reduction. Every
    /// candidate re-executes against a reset transport.
    async fn shrink_sequence(
        &self,
        routes: &[RouteSpec],
        rules: &[Rule],
        initial: Vec<StepPlan>,
        kind: FailureKind,
        deadline: Instant,
    ) -> Vec<StepPlan> {
        let mut current = initial;
        loop {
            if Instant::now() >= deadline {
                break;
            }
            let mut adopted = false;

            // Step deletion, later steps first.
            if current.len() > 1 {
                for remove in (0..current.len() - 1).rev() {
                    let mut candidate = current.clone();
                    candidate.remove(remove);
                    match self.replay_sequence(routes, rules, &candidate).await {
                        Replay::Failed { at, kind: got, .. } if got == kind => {
                            candidate.truncate(at + 1);
                            current = candidate;
                            adopted = true;
                            break;
                        }
                        _ => {}
                    }
                }
            }
            if adopted {
                continue;
            }

            // In-step parameter shrinking.
            'steps: for step_idx in 0..current.len() {
                let combined = current[step_idx].combined_tree();
                for candidate_tree in Shrinker::candidates(&combined) {
                    let Some(new_plan) = current[step_idx].from_combined(&candidate_tree)
                    else {
                        continue;
                    };
                    let mut candidate = current.clone();
                    candidate[step_idx] = new_plan;
                    match self.replay_sequence(routes, rules, &candidate).await {
                        Replay::Failed { at, kind: got, .. } if got == kind => {
                            candidate.truncate(at + 1);
                            current = candidate;
                            adopted = true;
                            break 'steps;
                        }
                        _ => {}
                    }
                }
            }
            if !adopted {
                break;
            }
        }
        current
    }

    /// Re-execute a candidate sequence from a clean transport.
    async fn replay_sequence(
        &self,
        routes: &[RouteSpec],
        rules: &[Rule],
        steps: &[StepPlan],
    ) -> Replay {
        if let Err(err) = self.transport.reset().await {
            warn!(error = %err, "transport reset failed during shrink replay");
            return Replay::Invalid;
        }
        let cx = self.registry.context();
        let mut bundles = BundleStore::new();
        let mut executed = Vec::with_capacity(steps.len());

        for (at, plan) in steps.iter().enumerate() {
            let rule = &rules[plan.rule_idx];
            let route = &routes[rule.route_idx];

            if plan.linked.len() != rule.consumed.len() {
                return Replay::Invalid;
            }
            let mut linked_values = Vec::with_capacity(plan.linked.len());
            let mut consumed_depth = 0u32;
            for ((param, bundle), tree) in rule.consumed.iter().zip(&plan.linked) {
                let entries = bundles.eligible(bundle, self.settings.recursion_limit);
                let DrawTree::Int { value, .. } = tree else { return Replay::Invalid };
                let idx = *value as usize;
                if *value < 0 || idx >= entries.len() {
                    return Replay::Invalid;
                }
                linked_values.push((param.clone(), entries[idx].value.clone()));
                consumed_depth = consumed_depth.max(entries[idx].depth);
            }

            let Ok(generated) = rule.generator.replay(&plan.params, cx) else {
                return Replay::Invalid;
            };
            let values = merge_values(route, generated, &linked_values);
            let Ok(request) =
                build_request(route, &rule.method, &values, self.settings.per_step_timeout)
            else {
                return Replay::Invalid;
            };

            let (response, verdict, _) = self.execute_step(route, &request).await;
            executed.push(ExecutedStep {
                operation: rule.operation.clone(),
                request: request.clone(),
                status: response.as_ref().map(|r| r.status),
            });

            if !verdict.valid {
                return Replay::Failed {
                    at,
                    kind: verdict.kind.unwrap_or(FailureKind::UnexpectedStatus),
                    executed,
                    values,
                    response,
                    errors: verdict.errors,
                };
            }
            if let Some(response) = &response {
                self.extract_productions(rule, response, consumed_depth + 1, &mut bundles, None);
            }
        }
        Replay::Passed
    }

    /// Final replay of the minimal sequence to capture the report.
    async fn report(
        &self,
        routes: &[RouteSpec],
        rules: &[Rule],
        minimal: &[StepPlan],
        kind: FailureKind,
        sequence: u32,
    ) -> FailureReport {
        let failing_rule = &rules[minimal[minimal.len() - 1].rule_idx];
        match self.replay_sequence(routes, rules, minimal).await {
            Replay::Failed { at, executed, values, response, errors, .. } => {
                let prior_steps = executed[..at]
                    .iter()
                    .enumerate()
                    .map(|(i, step)| StepSummary {
                        step: i as u32 + 1,
                        operation: step.operation.clone(),
                        request: RenderedRequest::from_request(&step.request),
                        status: step.status,
                    })
                    .collect();
                FailureReport {
                    operation: executed[at].operation.clone(),
                    kind,
                    request: Some(RenderedRequest::from_request(&executed[at].request)),
                    response: response.as_ref().map(ResponseSummary::from_response),
                    shrunk: ShrunkValues::from_values(&values),
                    seed: self.settings.seed,
                    trial: sequence,
                    auth: None,
                    errors,
                    prior_steps,
                    draw_tree: self
                        .settings
                        .capture_draw_trees
                        .then(|| minimal[minimal.len() - 1].combined_tree()),
                }
            }
            // The minimal sequence stopped reproducing (a flaky target);
            // report what is known rather than nothing.
            _ => FailureReport {
                operation: failing_rule.operation.clone(),
                kind,
                request: None,
                response: None,
                shrunk: ShrunkValues::default(),
                seed: self.settings.seed,
                trial: sequence,
                auth: None,
                errors: vec!["minimal sequence no longer reproduces the failure".to_string()],
                prior_steps: Vec::new(),
                draw_tree: None,
            },
        }
    }
}

struct GeneratedSequence {
    steps: Vec<StepPlan>,
    failure: Option<(usize, FailureKind)>,
}

/// Interleave linked values with generated ones, keeping the route's
/// declared parameter order within each group.
fn merge_values(
    route: &RouteSpec,
    generated: RouteValues,
    linked: &[(String, Value)],
) -> RouteValues {
    let mut merged = RouteValues {
        path: Vec::with_capacity(route.path_params().len()),
        query: Vec::with_capacity(route.query_params().len()),
        header: generated.header,
        body: generated.body,
    };
    for (name, _) in route.path_params() {
        if let Some((_, value)) = linked.iter().find(|(n, _)| n == name) {
            merged.path.push((name.clone(), value.clone()));
        } else if let Some((_, value)) = generated.path.iter().find(|(n, _)| n == name) {
            merged.path.push((name.clone(), value.clone()));
        }
    }
    for param in route.query_params() {
        if let Some((_, value)) = linked.iter().find(|(n, _)| *n == param.name) {
            merged.query.push((param.name.clone(), value.clone()));
        } else if let Some((_, value)) = generated.query.iter().find(|(n, _)| *n == param.name) {
            merged.query.push((param.name.clone(), value.clone()));
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::TypeRegistry;
    use crate::schema::TypeRef;

    #[test]
    fn merge_values_keeps_declared_order() {
        let route = RouteSpec::builder("/a/{x:int}/b/{y:int}")
            .method("GET")
            .query_param("q", TypeRef::str(), true)
            .build()
            .expect("route");
        let generated = RouteValues {
            path: vec![("y".to_string(), Value::Int(2))],
            query: vec![("q".to_string(), Value::Str("s".to_string()))],
            header: Vec::new(),
            body: None,
        };
        let merged = merge_values(&route, generated, &[("x".to_string(), Value::Int(1))]);
        assert_eq!(
            merged.path,
            vec![("x".to_string(), Value::Int(1)), ("y".to_string(), Value::Int(2))]
        );
        assert_eq!(merged.query.len(), 1);
    }

    #[test]
    fn step_plan_combined_tree_roundtrips() {
        let registry = TypeRegistry::new().snapshot();
        let route = RouteSpec::builder("/items/{id:int}").method("GET").build().expect("route");
        let generator = RouteGenerator::new(&route, "GET", &registry, &["id".to_string()])
            .expect("generator");
        let mut rng = trial_rng(1, 0, 0);
        let (_, params) = generator.draw(&mut rng, registry.context()).expect("draw");
        let plan = StepPlan {
            rule_idx: 0,
            linked: vec![DrawTree::Int { value: 1, min: 0, max: 3, origin: 0 }],
            params,
        };
        let combined = plan.combined_tree();
        let back = plan.from_combined(&combined).expect("split");
        assert_eq!(back.linked, plan.linked);
        assert_eq!(back.params, plan.params);
    }
}
