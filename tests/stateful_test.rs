//! Stateful-mode scenarios: bundle-linked sequences and sequence shrinking.

use std::sync::Arc;

use smolder::registry::TypeRegistry;
use smolder::request::ApiResponse;
use smolder::route::RouteSpec;
use smolder::schema::TypeRef;
use smolder::stateful::link::LinkGraph;
use smolder::stateful::StateMachineRunner;
use smolder::stateful::StatefulSettings;
use smolder::testing::ResourceStoreTransport;
use smolder::transport::Transport;
use smolder::validate::FailureKind;
use smolder::validate::StatusValidator;

fn user_routes() -> Vec<RouteSpec> {
    vec![
        RouteSpec::builder("/users").method("POST").build().expect("route"),
        RouteSpec::builder("/users/{id}")
            .method("GET")
            .path_param("id", TypeRef::int())
            .build()
            .expect("route"),
    ]
}

fn user_graph() -> LinkGraph {
    let mut graph = LinkGraph::new();
    graph.produce("POST /users", "$.body#/id", "user_ids").expect("edge");
    graph.consume("GET /users/{id}", "id", "user_ids");
    graph
}

fn runner(
    transport: Arc<dyn Transport>,
    settings: StatefulSettings,
) -> StateMachineRunner {
    StateMachineRunner::new(
        transport,
        TypeRegistry::new().snapshot(),
        Arc::new(StatusValidator::default()),
        settings,
    )
}

fn settings(seed: u64) -> StatefulSettings {
    StatefulSettings { seed, step_count: 10, max_sequences: 5, ..StatefulSettings::default() }
}

#[tokio::test]
async fn linked_gets_only_see_created_ids() {
    // GET answers 500 for any id that was never created; a clean run
    // proves every consuming step drew from the bundle.
    let transport = Arc::new(ResourceStoreTransport::new(|id, created: &[i64]| {
        if created.contains(&id) {
            ApiResponse::new(200).with_json(&serde_json::json!({ "id": id }))
        } else {
            ApiResponse::new(500)
        }
    }));
    let outcome = runner(transport, settings(1)).run(&user_routes(), &user_graph()).await;

    assert!(outcome.is_pass(), "failure: {:?}", outcome.failure);
    assert_eq!(outcome.sequences_run, 5);
    assert!(outcome.steps_executed > 0);

    // Both operations fired and both edge directions were traversed.
    assert!(outcome.coverage.operation_firings.contains_key("POST /users"));
    assert!(outcome.coverage.operation_firings.contains_key("GET /users/{id}"));
    assert!(outcome.coverage.edge_traversals.contains_key("POST /users -> user_ids"));
    assert!(outcome.coverage.edge_traversals.contains_key("user_ids -> GET /users/{id}"));
}

#[tokio::test]
async fn failing_get_shrinks_to_two_posts_and_the_bad_get() {
    // The second created id is poisonous: GET /users/2 answers 500. The
    // minimal reproducing sequence is POST, POST, GET(id=2).
    let transport = Arc::new(ResourceStoreTransport::new(|id, _created: &[i64]| {
        if id == 2 {
            ApiResponse::new(500)
        } else {
            ApiResponse::new(200).with_json(&serde_json::json!({ "id": id }))
        }
    }));
    let settings = StatefulSettings {
        seed: 1,
        step_count: 20,
        max_sequences: 20,
        ..StatefulSettings::default()
    };
    let outcome = runner(transport, settings).run(&user_routes(), &user_graph()).await;

    let failure = outcome.failure.as_ref().expect("failure found");
    assert_eq!(failure.kind, FailureKind::Server5xx);
    assert_eq!(failure.operation, "GET /users/{id}");

    // Exactly two prior steps, both POSTs.
    assert_eq!(failure.prior_steps.len(), 2);
    for step in &failure.prior_steps {
        assert_eq!(step.operation, "POST /users");
        assert_eq!(step.status, Some(201));
    }

    // The failing request targets id 2 and the shrunk values agree.
    let request = failure.request.as_ref().expect("request");
    assert_eq!(request.path, "/users/2");
    assert_eq!(failure.shrunk.path, vec![("id".to_string(), serde_json::json!(2))]);
}

#[tokio::test]
async fn failed_producer_feeds_no_bundles() {
    // Every POST fails, so the consuming rule must never fire.
    struct FailingPosts<T>(T);
    #[async_trait::async_trait]
    impl<T: Transport> Transport for FailingPosts<T> {
        async fn send(
            &self,
            request: &smolder::request::ApiRequest,
        ) -> Result<ApiResponse, smolder::transport::TransportError> {
            if request.method == "POST" {
                return Ok(ApiResponse::new(500));
            }
            self.0.send(request).await
        }
        async fn reset(&self) -> Result<(), smolder::transport::TransportError> {
            self.0.reset().await
        }
    }

    let transport = Arc::new(FailingPosts(ResourceStoreTransport::new(
        |_id, _created: &[i64]| ApiResponse::new(200),
    )));
    let outcome = runner(transport, settings(2)).run(&user_routes(), &user_graph()).await;

    let failure = outcome.failure.as_ref().expect("POST failure");
    assert_eq!(failure.operation, "POST /users");
    assert!(failure.prior_steps.is_empty());
    // The GET rule was never eligible.
    assert!(!outcome.coverage.operation_firings.contains_key("GET /users/{id}"));
}

#[tokio::test]
async fn no_links_means_no_consuming_rules_and_clean_run() {
    let transport = Arc::new(ResourceStoreTransport::new(|_id, _created: &[i64]| {
        ApiResponse::new(200)
    }));
    let routes = vec![RouteSpec::builder("/users").method("POST").build().expect("route")];
    let outcome = runner(transport, settings(3)).run(&routes, &LinkGraph::new()).await;

    assert!(outcome.is_pass());
    assert_eq!(outcome.sequences_run, 5);
}

#[tokio::test]
async fn inferred_graph_drives_the_same_scenario() {
    // Same as the happy path, but the link graph is inferred from the
    // response contract instead of written by hand.
    let create = RouteSpec::builder("/users")
        .method("POST")
        .response(
            201,
            "application/json",
            TypeRef::record(vec![smolder::schema::Field::required("id", TypeRef::int())]),
        )
        .build()
        .expect("route");
    let fetch = RouteSpec::builder("/users/{user_id}")
        .method("GET")
        .path_param("user_id", TypeRef::int())
        .build()
        .expect("route");
    let routes = vec![create, fetch];
    let graph = LinkGraph::infer(&routes);
    assert!(!graph.is_empty());

    let transport = Arc::new(ResourceStoreTransport::new(|id, created: &[i64]| {
        if created.contains(&id) {
            ApiResponse::new(200).with_json(&serde_json::json!({ "id": id }))
        } else {
            ApiResponse::new(500)
        }
    }));
    let outcome = runner(transport, settings(4)).run(&routes, &graph).await;
    assert!(outcome.is_pass(), "failure: {:?}", outcome.failure);
}
