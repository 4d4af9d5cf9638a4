//! End-to-end trial-runner scenarios against scripted transports.

use std::sync::Arc;
use std::time::Duration;

use smolder::config::RunConfig;
use smolder::generate::DrawTree;
use smolder::request::ApiRequest;
use smolder::request::ApiResponse;
use smolder::route::RouteSpec;
use smolder::runner::Engine;
use smolder::schema::TypeRef;
use smolder::testing::FnTransport;
use smolder::testing::RecordingTransport;
use smolder::transport::Transport;
use smolder::validate::FailureKind;
use smolder::AuthDecorator;

fn items_route() -> RouteSpec {
    RouteSpec::builder("/items/{id}")
        .method("GET")
        .path_param("id", TypeRef::int())
        .build()
        .expect("route")
}

fn path_id(request: &ApiRequest) -> i64 {
    request.path.rsplit('/').next().and_then(|s| s.parse().ok()).expect("numeric id")
}

fn config(seed: u64, max_examples: u32) -> RunConfig {
    RunConfig { seed: Some(seed), max_examples, ..RunConfig::default() }
}

#[tokio::test]
async fn happy_path_counts_twenty_passes() {
    let transport = Arc::new(FnTransport::new(|_request| Ok(ApiResponse::new(200))));
    let summary = Engine::new(transport, config(1, 20)).run(&[items_route()]).await;

    assert!(summary.all_passed());
    assert_eq!(summary.outcomes.len(), 1);
    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.trials, 20);
    assert_eq!(outcome.passed, 20);
    assert_eq!(outcome.status_counts.get(&200), Some(&20));
    assert_eq!(outcome.status_counts.len(), 1);
    assert!(outcome.failure.is_none());
}

#[tokio::test]
async fn server_error_shrinks_to_zero_id() {
    // 500 for every non-positive id; the locally minimal failing input
    // under shrink-toward-zero is exactly id = 0.
    let transport = Arc::new(FnTransport::new(|request: &ApiRequest| {
        let id = path_id(request);
        Ok(ApiResponse::new(if id <= 0 { 500 } else { 200 }))
    }));
    let config = RunConfig { capture_draw_trees: true, ..config(1, 100) };
    let summary = Engine::new(transport, config).run(&[items_route()]).await;

    let outcome = &summary.outcomes[0];
    let failure = outcome.failure.as_ref().expect("failure found");
    assert_eq!(failure.kind, FailureKind::Server5xx);
    assert_eq!(failure.operation, "GET /items/{id}");
    assert_eq!(failure.seed, 1);

    // The report carries exactly the minimal value.
    assert_eq!(failure.shrunk.path, vec![("id".to_string(), serde_json::json!(0))]);
    let request = failure.request.as_ref().expect("rendered request");
    assert_eq!(request.path, "/items/0");

    // And the final draw tree's id leaf is zero.
    let tree = failure.draw_tree.as_ref().expect("tree captured");
    let DrawTree::Product { children } = tree else { panic!("expected product root") };
    let DrawTree::Product { children: path_group } = &children[0] else {
        panic!("expected path group")
    };
    let DrawTree::Int { value, .. } = path_group[0] else { panic!("expected int leaf") };
    assert_eq!(value, 0);
}

#[tokio::test]
async fn reported_minimum_still_fails_when_replayed() {
    let respond = |request: &ApiRequest| {
        let id = path_id(request);
        Ok(ApiResponse::new(if id <= 0 { 500 } else { 200 }))
    };
    let transport = Arc::new(FnTransport::new(respond));
    let summary =
        Engine::new(Arc::clone(&transport) as Arc<dyn Transport>, config(3, 100))
            .run(&[items_route()])
            .await;
    let failure = summary.outcomes[0].failure.as_ref().expect("failure");

    // Re-send the reported minimal request through the same transport.
    let rendered = failure.request.as_ref().expect("request");
    let replayed = ApiRequest {
        method: rendered.method.clone(),
        path: rendered.path.clone(),
        query: rendered.query.clone(),
        headers: rendered.headers.clone(),
        body: None,
        timeout: Duration::from_secs(30),
    };
    let response = transport.send(&replayed).await.expect("send");
    assert_eq!(response.status, 500);
}

#[tokio::test]
async fn missing_credential_fails_route_before_any_trial() {
    let transport = Arc::new(RecordingTransport::new(FnTransport::new(|_request| {
        Ok(ApiResponse::new(200))
    })));
    let engine = Engine::new(Arc::clone(&transport) as Arc<dyn Transport>, config(1, 50))
        .with_auth("/**", AuthDecorator::bearer("$SMOLDER_TEST_UNSET_TOKEN"));
    let summary = engine.run(&[items_route()]).await;

    let outcome = &summary.outcomes[0];
    assert_eq!(outcome.trials, 0);
    let failure = outcome.failure.as_ref().expect("credential failure");
    assert_eq!(failure.kind, FailureKind::MissingCredential);
    // Zero requests ever reached the transport.
    assert!(transport.requests().is_empty());
}

#[tokio::test]
async fn bearer_token_from_env_reaches_every_request() {
    std::env::set_var("SMOLDER_TEST_S4_TOKEN", "T");
    let transport = Arc::new(RecordingTransport::new(FnTransport::new(|_request| {
        Ok(ApiResponse::new(200))
    })));
    let engine = Engine::new(Arc::clone(&transport) as Arc<dyn Transport>, config(1, 10))
        .with_auth("/**", AuthDecorator::bearer("$SMOLDER_TEST_S4_TOKEN"));
    let summary = engine.run(&[items_route()]).await;

    assert!(summary.all_passed());
    let requests = transport.requests();
    assert_eq!(requests.len(), 10);
    for request in &requests {
        assert_eq!(request.headers.get("authorization"), Some("Bearer T"));
    }
}

#[tokio::test]
async fn passing_routes_never_observed_5xx() {
    // Mix of 200 and 404: 404 is allowed by the default non-5xx contract.
    let transport = Arc::new(FnTransport::new(|request: &ApiRequest| {
        let id = path_id(request);
        Ok(ApiResponse::new(if id % 2 == 0 { 200 } else { 404 }))
    }));
    let summary = Engine::new(transport, config(5, 60)).run(&[items_route()]).await;

    let outcome = &summary.outcomes[0];
    assert!(outcome.is_pass());
    assert!(outcome.status_counts.keys().all(|status| *status < 500));
    assert_eq!(outcome.trials, 60);
}

#[tokio::test]
async fn transport_errors_classify_as_server_unreachable_and_shrink() {
    use smolder::transport::TransportError;
    let transport = Arc::new(FnTransport::new(|request: &ApiRequest| {
        let id = path_id(request);
        if id <= 0 {
            Err(TransportError::Unreachable { reason: "connection refused".to_string() })
        } else {
            Ok(ApiResponse::new(200))
        }
    }));
    let summary = Engine::new(transport, config(2, 100)).run(&[items_route()]).await;

    let failure = summary.outcomes[0].failure.as_ref().expect("failure");
    assert_eq!(failure.kind, FailureKind::ServerUnreachable);
    assert!(failure.response.is_none());
    assert_eq!(failure.shrunk.path, vec![("id".to_string(), serde_json::json!(0))]);
}

#[tokio::test]
async fn identical_seeds_produce_identical_runs() {
    let respond = |request: &ApiRequest| {
        let id = path_id(request);
        Ok(ApiResponse::new(if id <= -500 { 500 } else { 200 }))
    };

    let mut fingerprints = Vec::new();
    let mut reports = Vec::new();
    for _ in 0..2 {
        let transport = Arc::new(RecordingTransport::new(FnTransport::new(respond)));
        let summary = Engine::new(Arc::clone(&transport) as Arc<dyn Transport>, config(7, 100))
            .run(&[items_route()])
            .await;
        fingerprints.push(
            transport.requests().iter().map(ApiRequest::fingerprint).collect::<Vec<_>>(),
        );
        let failure = summary.outcomes[0].failure.as_ref().expect("failure");
        reports.push(serde_json::to_string(failure).expect("serialize"));
    }

    assert_eq!(fingerprints[0], fingerprints[1]);
    assert_eq!(reports[0], reports[1]);
}

#[tokio::test]
async fn boundary_failure_shrinks_to_exact_threshold() {
    // Fails for id <= -500; the shrunk minimum must land exactly on -500.
    let transport = Arc::new(FnTransport::new(|request: &ApiRequest| {
        let id = path_id(request);
        Ok(ApiResponse::new(if id <= -500 { 500 } else { 200 }))
    }));
    let summary = Engine::new(transport, config(7, 100)).run(&[items_route()]).await;

    let failure = summary.outcomes[0].failure.as_ref().expect("failure");
    assert_eq!(failure.shrunk.path, vec![("id".to_string(), serde_json::json!(-500))]);
}

#[tokio::test]
async fn skip_override_executes_no_trials() {
    let transport = Arc::new(RecordingTransport::new(FnTransport::new(|_request| {
        Ok(ApiResponse::new(200))
    })));
    let mut config = config(1, 10);
    config.overrides.push(smolder::config::RouteOverride {
        pattern: "/items/**".to_string(),
        skip: true,
        ..smolder::config::RouteOverride::default()
    });
    let summary = Engine::new(Arc::clone(&transport) as Arc<dyn Transport>, config)
        .run(&[items_route()])
        .await;

    assert!(summary.outcomes[0].skipped);
    assert!(transport.requests().is_empty());
}
