//! Run configuration.
//!
//! Typed settings with the same defaults the engine has always shipped:
//! 100 examples per route, 30 second per-trial timeout, operational
//! endpoints excluded, mutating and reading methods both exercised. No
//! file parsing lives here; hosts construct and merge configs directly.

use std::time::Duration;

use crate::auth::AuthDecorator;
use crate::filter::RouteFilter;
use crate::filter::DEFAULT_EXCLUDES;

/// Methods exercised when the host does not narrow the set.
pub const DEFAULT_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE"];

/// Per-route override row, matched by glob over the route pattern.
#[derive(Debug, Clone, Default)]
pub struct RouteOverride {
    pub pattern: String,
    pub skip: bool,
    pub max_examples: Option<u32>,
    pub auth: Option<AuthDecorator>,
}

/// Effective per-route settings after override resolution.
#[derive(Debug, Clone)]
pub struct EffectiveRoute {
    pub skip: bool,
    pub max_examples: u32,
    pub auth: Option<AuthDecorator>,
}

/// Top-level run configuration.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Randomized trials per route.
    pub max_examples: u32,
    /// Bound on a single request.
    pub per_trial_timeout: Duration,
    /// Include globs; empty selects everything.
    pub include: Vec<String>,
    /// Exclude globs; defaults keep operational endpoints out.
    pub exclude: Vec<String>,
    /// Methods to exercise.
    pub methods: Vec<String>,
    /// Run seed; `None` draws one from entropy (always reported).
    pub seed: Option<u64>,
    /// Derive the allowed status set as "all non-5xx".
    pub fail_on_5xx: bool,
    /// Explicit allowed status codes; overrides the `fail_on_5xx`
    /// derivation when set.
    pub allowed_status_codes: Option<Vec<u16>>,
    /// Enable the content-type validator.
    pub validate_content_type: bool,
    /// Enable response-contract schema validation.
    pub validate_schema: bool,
    /// Attach full draw trees to failure reports.
    pub capture_draw_trees: bool,
    /// Per-route override rows.
    pub overrides: Vec<RouteOverride>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            max_examples: 100,
            per_trial_timeout: Duration::from_secs(30),
            include: Vec::new(),
            exclude: DEFAULT_EXCLUDES.iter().map(|s| s.to_string()).collect(),
            methods: DEFAULT_METHODS.iter().map(|s| s.to_string()).collect(),
            seed: None,
            fail_on_5xx: true,
            allowed_status_codes: None,
            validate_content_type: false,
            validate_schema: false,
            capture_draw_trees: false,
            overrides: Vec::new(),
        }
    }
}

impl RunConfig {
    /// The route filter implied by the include/exclude/method settings.
    pub fn filter(&self) -> RouteFilter {
        RouteFilter::new(self.include.clone(), self.exclude.clone())
            .with_methods(self.methods.clone())
    }

    /// The concrete seed this run uses. Drawn once from entropy when the
    /// config carries none; callers should report it either way.
    pub fn resolved_seed(&self) -> u64 {
        self.seed.unwrap_or_else(rand::random)
    }

    /// The allowed status set: explicit codes win, otherwise the
    /// `fail_on_5xx` derivation (all of 100–499).
    pub fn allowed_statuses(&self) -> Vec<u16> {
        match &self.allowed_status_codes {
            Some(codes) => codes.clone(),
            None => (100..500).collect(),
        }
    }

    /// Resolve per-route settings: override rows are matched by glob and
    /// the longest matching pattern wins, field by field.
    pub fn effective_for(&self, path: &str) -> EffectiveRoute {
        let mut matching: Vec<&RouteOverride> = self
            .overrides
            .iter()
            .filter(|row| crate::filter::GlobPattern::parse(row.pattern.clone()).matches(path))
            .collect();
        // Longest pattern last so it wins the field-by-field fold.
        matching.sort_by_key(|row| row.pattern.len());

        let mut effective = EffectiveRoute {
            skip: false,
            max_examples: self.max_examples,
            auth: None,
        };
        for row in matching {
            effective.skip = effective.skip || row.skip;
            if let Some(max_examples) = row.max_examples {
                effective.max_examples = max_examples;
            }
            if let Some(auth) = &row.auth {
                effective.auth = Some(auth.clone());
            }
        }
        effective
    }

    /// Merge two configs: any `preferred` field that differs from the
    /// built-in default wins, otherwise the `fallback` value is kept.
    pub fn merged(preferred: &RunConfig, fallback: &RunConfig) -> RunConfig {
        let defaults = RunConfig::default();
        macro_rules! pick {
            ($field:ident) => {
                if preferred.$field != defaults.$field {
                    preferred.$field.clone()
                } else {
                    fallback.$field.clone()
                }
            };
        }
        RunConfig {
            max_examples: pick!(max_examples),
            per_trial_timeout: pick!(per_trial_timeout),
            include: pick!(include),
            exclude: pick!(exclude),
            methods: pick!(methods),
            seed: preferred.seed.or(fallback.seed),
            fail_on_5xx: pick!(fail_on_5xx),
            allowed_status_codes: preferred
                .allowed_status_codes
                .clone()
                .or_else(|| fallback.allowed_status_codes.clone()),
            validate_content_type: pick!(validate_content_type),
            validate_schema: pick!(validate_schema),
            capture_draw_trees: pick!(capture_draw_trees),
            overrides: if preferred.overrides.is_empty() {
                fallback.overrides.clone()
            } else {
                preferred.overrides.clone()
            },
        }
    }
}
