//! Filter selection scenarios and the filter-correctness law.

use std::sync::Arc;

use proptest::prelude::*;

use smolder::config::RunConfig;
use smolder::filter::GlobPattern;
use smolder::filter::RouteFilter;
use smolder::request::ApiResponse;
use smolder::route::RouteSpec;
use smolder::runner::Engine;
use smolder::schema::TypeRef;
use smolder::testing::FnTransport;

fn route(path: &str, methods: &[&str]) -> RouteSpec {
    RouteSpec::untyped(path, methods).expect("route")
}

#[test]
fn include_users_selects_both_user_routes() {
    let routes = vec![
        route("/health", &["GET"]),
        RouteSpec::builder("/users/{id}")
            .method("GET")
            .path_param("id", TypeRef::int())
            .build()
            .expect("route"),
        route("/users", &["POST"]),
    ];
    let filter = RouteFilter::new(vec!["/users/**"], Vec::<String>::new());
    let selected = filter.apply(&routes);
    assert_eq!(selected.len(), 2);
    assert_eq!(selected[0].path(), "/users/{id}");
    assert_eq!(selected[1].path(), "/users");
}

#[tokio::test]
async fn engine_reports_no_applicable_routes_when_filter_empties_the_set() {
    let transport = Arc::new(FnTransport::new(|_req| Ok(ApiResponse::new(200))));
    let config = RunConfig {
        seed: Some(1),
        include: vec!["/nothing/**".to_string()],
        ..RunConfig::default()
    };
    let summary = Engine::new(transport, config)
        .run(&[route("/users", &["GET"])])
        .await;
    assert!(summary.no_applicable_routes);
    assert!(summary.outcomes.is_empty());
}

#[tokio::test]
async fn default_excludes_keep_operational_endpoints_out() {
    let transport = Arc::new(FnTransport::new(|_req| Ok(ApiResponse::new(200))));
    let config = RunConfig { seed: Some(1), max_examples: 2, ..RunConfig::default() };
    let routes = vec![
        route("/health", &["GET"]),
        route("/openapi.json", &["GET"]),
        route("/users", &["GET"]),
    ];
    let summary = Engine::new(transport, config).run(&routes).await;
    assert_eq!(summary.outcomes.len(), 1);
    assert_eq!(summary.outcomes[0].operation, "GET /users");
}

proptest! {
    // For any route set and filter, the selected set is exactly the set of
    // routes where (includes empty OR some include matches) AND no exclude
    // matches, with at least one selected method.
    #[test]
    fn filter_selection_matches_its_definition(
        paths in prop::collection::vec(arb_path(), 0..12),
        include in prop::collection::vec(arb_glob(), 0..3),
        exclude in prop::collection::vec(arb_glob(), 0..3),
    ) {
        let routes: Vec<RouteSpec> =
            paths.iter().map(|p| route(p, &["GET"])).collect();
        let filter = RouteFilter::new(include.clone(), exclude.clone());
        let selected: Vec<&str> = filter.apply(&routes).iter().map(|r| r.path()).collect();

        let include_globs: Vec<GlobPattern> =
            include.iter().map(|g| GlobPattern::parse(g.clone())).collect();
        let exclude_globs: Vec<GlobPattern> =
            exclude.iter().map(|g| GlobPattern::parse(g.clone())).collect();
        let expected: Vec<&str> = routes
            .iter()
            .map(|r| r.path())
            .filter(|p| {
                let included = include_globs.is_empty()
                    || include_globs.iter().any(|g| g.matches(p));
                included && !exclude_globs.iter().any(|g| g.matches(p))
            })
            .collect();

        prop_assert_eq!(selected, expected);
    }
}

fn arb_segment() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["users", "posts", "admin", "v1", "{id}"])
        .prop_map(str::to_string)
}

fn arb_path() -> impl Strategy<Value = String> {
    prop::collection::vec(arb_segment(), 1..4)
        .prop_map(|segments| format!("/{}", segments.join("/")))
}

fn arb_glob() -> impl Strategy<Value = String> {
    prop::sample::select(vec!["users", "posts", "admin", "v1", "*", "**"])
        .prop_flat_map(|first| {
            prop::collection::vec(
                prop::sample::select(vec!["users", "posts", "*", "**"]),
                0..2,
            )
            .prop_map(move |rest| {
                let mut segments = vec![first];
                segments.extend(rest);
                format!("/{}", segments.join("/"))
            })
        })
}
