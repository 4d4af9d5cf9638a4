//! Glob-based route selection.
//!
//! `*` matches within a single path segment (whole-segment or as an infix,
//! e.g. `/openapi*`); `**` matches across zero or more segments. A route is
//! selected iff at least one include matches (or the include list is empty)
//! and no exclude matches. Method selection is an independent set.
//! Filtering is pure and total.

use crate::route::RouteSpec;

/// Default exclude patterns: operational endpoints nobody wants fuzzed.
pub const DEFAULT_EXCLUDES: &[&str] =
    &["/health", "/metrics", "/openapi*", "/docs", "/redoc", "/schema"];

/// A parsed path glob.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobPattern {
    raw: String,
    segments: Vec<GlobSegment>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum GlobSegment {
    AnyDeep,
    Any,
    Literal(String),
    Wildcard(String),
}

impl GlobPattern {
    pub fn parse(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        let segments = split_segments(&raw)
            .map(|seg| match seg {
                "**" => GlobSegment::AnyDeep,
                "*" => GlobSegment::Any,
                s if s.contains('*') => GlobSegment::Wildcard(s.to_string()),
                s => GlobSegment::Literal(s.to_string()),
            })
            .collect();
        Self { raw, segments }
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Length of the pattern text, used for longest-match resolution in
    /// the auth and override tables.
    pub fn specificity(&self) -> usize {
        self.raw.len()
    }

    pub fn matches(&self, path: &str) -> bool {
        let path_segments: Vec<&str> = split_segments(path).collect();
        match_from(&self.segments, &path_segments)
    }
}

fn split_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

fn match_from(pattern: &[GlobSegment], path: &[&str]) -> bool {
    match pattern.first() {
        None => path.is_empty(),
        Some(GlobSegment::AnyDeep) => {
            // Zero or more segments: try every split point.
            (0..=path.len()).any(|skip| match_from(&pattern[1..], &path[skip..]))
        }
        Some(GlobSegment::Any) => {
            !path.is_empty() && match_from(&pattern[1..], &path[1..])
        }
        Some(GlobSegment::Literal(expected)) => {
            path.first() == Some(&expected.as_str()) && match_from(&pattern[1..], &path[1..])
        }
        Some(GlobSegment::Wildcard(glob)) => match path.first() {
            Some(segment) => {
                wildcard_match(glob, segment) && match_from(&pattern[1..], &path[1..])
            }
            None => false,
        },
    }
}

/// `*` within one segment matches any run of characters.
fn wildcard_match(glob: &str, text: &str) -> bool {
    let mut parts = glob.split('*');
    let Some(prefix) = parts.next() else { return text.is_empty() };
    if !text.starts_with(prefix) {
        return false;
    }
    let mut rest = &text[prefix.len()..];
    let mut parts: Vec<&str> = parts.collect();
    let Some(suffix) = parts.pop() else { return rest.is_empty() };
    for part in parts {
        match rest.find(part) {
            Some(idx) => rest = &rest[idx + part.len()..],
            None => return false,
        }
    }
    rest.ends_with(suffix)
}

/// Include/exclude route filter with independent method selection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteFilter {
    include: Vec<GlobPattern>,
    exclude: Vec<GlobPattern>,
    methods: Vec<String>,
}

impl RouteFilter {
    pub fn new(
        include: impl IntoIterator<Item = impl Into<String>>,
        exclude: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            include: include.into_iter().map(GlobPattern::parse).collect(),
            exclude: exclude.into_iter().map(GlobPattern::parse).collect(),
            methods: Vec::new(),
        }
    }

    /// Restrict to the given methods; empty means all.
    pub fn with_methods(mut self, methods: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.methods = methods.into_iter().map(|m| m.into().to_ascii_uppercase()).collect();
        self
    }

    /// Whether the given path survives include/exclude selection.
    pub fn selects_path(&self, path: &str) -> bool {
        let included =
            self.include.is_empty() || self.include.iter().any(|glob| glob.matches(path));
        included && !self.exclude.iter().any(|glob| glob.matches(path))
    }

    /// Whether the given method is in the selected set.
    pub fn selects_method(&self, method: &str) -> bool {
        self.methods.is_empty() || self.methods.iter().any(|m| m == method)
    }

    pub fn selects(&self, route: &RouteSpec) -> bool {
        self.selects_path(route.path())
            && route.methods().iter().any(|m| self.selects_method(m))
    }

    /// Apply to a route set, preserving order.
    pub fn apply<'a>(&self, routes: &'a [RouteSpec]) -> Vec<&'a RouteSpec> {
        routes.iter().filter(|r| self.selects(r)).collect()
    }
}
