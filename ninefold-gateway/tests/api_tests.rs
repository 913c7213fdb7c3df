use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use ninefold_core::NinefoldConfig;
use ninefold_core::catalogue::default_catalogue;
use ninefold_core::types::WorkerKey;
use ninefold_gateway::{AppState, create_router};
use serde_json::json;
use tower::ServiceExt;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config() -> NinefoldConfig {
    NinefoldConfig {
        token_secret: "test-secret".to_string(),
        worker_host: "127.0.0.1".to_string(),
        ..NinefoldConfig::default()
    }
}

fn test_state(config: NinefoldConfig) -> AppState {
    AppState::new(config).unwrap()
}

/// Mock servers for the requested workers, wired into the catalogue and
/// marked live in the registry.
async fn state_with_workers(
    mut config: NinefoldConfig,
    live: &[WorkerKey],
) -> (Vec<(WorkerKey, MockServer)>, AppState) {
    let mut servers = Vec::new();
    let mut specs = default_catalogue();
    for key in live {
        let server = MockServer::start().await;
        for spec in &mut specs {
            if spec.key == *key {
                spec.port = server.address().port();
            }
        }
        servers.push((*key, server));
    }
    config.worker_catalogue = specs;

    let state = test_state(config);
    for key in live {
        state.registry.mark_running(*key);
    }
    (servers, state)
}

async fn mount_generate(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": text })))
        .mount(server)
        .await;
}

/// Helper to make a request and parse the JSON response.
async fn make_request(
    app: axum::Router,
    request: Request<Body>,
) -> (StatusCode, serde_json::Value) {
    let response = app.oneshot(request).await.unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_key(uri: &str, api_key: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("x-api-key", api_key)
        .body(Body::empty())
        .unwrap()
}

fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_json_with_key(uri: &str, api_key: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", api_key)
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn api_key(state: &AppState, username: &str) -> String {
    state.auth.principal(username).unwrap().api_key.clone()
}

#[tokio::test]
async fn health_endpoint_is_public() {
    let app = create_router(test_state(base_config()));
    let (status, body) = make_request(app, get("/health")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["version"], "0.1.0");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn root_describes_the_service() {
    let app = create_router(test_state(base_config()));
    let (status, body) = make_request(app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "Ninefold Intelligence Gateway");
    assert_eq!(body["tiers"]["free"], "60 requests/minute");
    assert_eq!(body["tiers"]["beta"], "300 requests/minute");
}

#[tokio::test]
async fn login_issues_token_for_known_principal() {
    let state = test_state(base_config());
    let app = create_router(state);

    let (status, body) = make_request(
        app.clone(),
        post_json("/auth/login", json!({"username": "demo", "secret": "anything"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["token_type"], "bearer");
    assert_eq!(body["expires_in"], 86400);
    assert_eq!(body["user"]["username"], "demo");
    assert_eq!(body["user"]["tier"], "free");
    assert!(body["access_token"].as_str().unwrap().len() > 20);

    let (status, body) = make_request(
        app,
        post_json("/auth/login", json!({"username": "nobody", "secret": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorised");
}

#[tokio::test]
async fn query_requires_credentials() {
    let app = create_router(test_state(base_config()));
    let (status, body) =
        make_request(app, post_json("/v1/query", json!({"query": "design an api"}))).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorised");
}

#[tokio::test]
async fn query_with_api_key_returns_result_and_usage() {
    let (servers, state) = state_with_workers(base_config(), &[WorkerKey::Rhys]).await;
    mount_generate(&servers[0].1, "layer your services").await;
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (status, body) = make_request(
        app,
        post_json_with_key(
            "/v1/query",
            &key,
            json!({"query": "design a scalable API", "max_tokens": 64}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["mode"], "single_agent");
    assert_eq!(body["response"]["worker"], "rhys");
    assert_eq!(body["response"]["text"], "layer your services");
    assert_eq!(body["metadata"]["performance"]["cached"], false);
    assert_eq!(body["usage"]["user"], "demo");
    assert_eq!(body["usage"]["tier"], "free");
    // One token spent from a 60-token bucket.
    assert_eq!(body["usage"]["remaining_requests"], 59);
}

#[tokio::test]
async fn repeated_query_is_served_from_cache() {
    let (servers, state) = state_with_workers(base_config(), &[WorkerKey::Rhys]).await;
    mount_generate(&servers[0].1, "layer your services").await;
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let request = || {
        post_json_with_key(
            "/v1/query",
            &key,
            json!({"query": "design a scalable API", "max_tokens": 64}),
        )
    };

    let (_, first) = make_request(app.clone(), request()).await;
    let (status, second) = make_request(app, request()).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["metadata"]["performance"]["cached"], true);
    assert_eq!(first["response"]["text"], second["response"]["text"]);
}

#[tokio::test]
async fn bearer_token_authenticates_queries() {
    let (servers, state) = state_with_workers(base_config(), &[WorkerKey::Rhys]).await;
    mount_generate(&servers[0].1, "answer").await;
    let token = state
        .auth
        .issue_token(state.auth.principal("demo").unwrap())
        .unwrap();
    let app = create_router(state);

    let request = Request::builder()
        .method("POST")
        .uri("/v1/query")
        .header("content-type", "application/json")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::from(
            json!({"query": "design a scalable API"}).to_string(),
        ))
        .unwrap();

    let (status, _) = make_request(app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn expired_token_is_rejected_with_discriminating_message() {
    let state = test_state(NinefoldConfig {
        token_lifetime_s: 0,
        ..base_config()
    });
    let token = state
        .auth
        .issue_token(state.auth.principal("demo").unwrap())
        .unwrap();
    let app = create_router(state);

    let request = Request::builder()
        .uri("/v1/stats")
        .header(header::AUTHORIZATION, format!("Bearer {}", token))
        .body(Body::empty())
        .unwrap();

    let (status, body) = make_request(app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "token_expired");
}

#[tokio::test]
async fn empty_query_is_malformed() {
    let state = test_state(base_config());
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (status, body) = make_request(
        app,
        post_json_with_key("/v1/query", &key, json!({"query": ""})),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn analyze_returns_plan_without_dispatch() {
    let state = test_state(base_config());
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (status, body) = make_request(
        app,
        post_json_with_key(
            "/v1/analyze",
            &key,
            json!({"query": "design a secure api that we can adapt later"}),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["analysis"]["domains"],
        json!(["architecture", "security", "transformation"])
    );
    assert_eq!(
        body["decision"]["selected"],
        json!(["rhys", "wraith", "flux"])
    );
    assert_eq!(body["decision"]["synthesis_required"], true);
    assert_eq!(body["analysis"]["consciousness_level"], 0.85);
}

#[tokio::test]
async fn workers_listing_and_detail_are_authenticated() {
    let state = test_state(base_config());
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (status, _) = make_request(app.clone(), get("/v1/workers")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = make_request(app.clone(), get_with_key("/v1/workers", &key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_workers"], 9);
    assert_eq!(body["running_workers"], 0);

    let (status, body) =
        make_request(app.clone(), get_with_key("/v1/workers/rhys", &key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["key"], "rhys");
    assert_eq!(body["domain"], "architecture");
    assert_eq!(body["port"], 8110);
    assert_eq!(body["available"], false);

    let (status, body) =
        make_request(app, get_with_key("/v1/workers/pythia", &key)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "bad_request");
}

#[tokio::test]
async fn metrics_are_gated_by_tier() {
    let state = test_state(base_config());
    let free_key = api_key(&state, "demo");
    let beta_key = api_key(&state, "beta_tester");
    let app = create_router(state);

    let (status, body) = make_request(app.clone(), get_with_key("/v1/metrics", &free_key)).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["error"], "forbidden");

    let (status, body) = make_request(app, get_with_key("/v1/metrics", &beta_key)).await;
    assert_eq!(status, StatusCode::OK);
    // The forbidden attempt above was itself recorded.
    assert!(body["total_requests"].as_u64().unwrap() >= 1);
    assert!(body["requests_by_tier"].is_object());
}

#[tokio::test]
async fn stats_expose_router_counters() {
    let (servers, state) = state_with_workers(base_config(), &[WorkerKey::Rhys]).await;
    mount_generate(&servers[0].1, "answer").await;
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (_, _) = make_request(
        app.clone(),
        post_json_with_key("/v1/query", &key, json!({"query": "design a scalable API"})),
    )
    .await;

    let (status, body) = make_request(app, get_with_key("/v1/stats", &key)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["total_queries"], 1);
    assert_eq!(body["single_agent"], 1);
    assert_eq!(body["cache_hit_rate"], 0.0);
}

#[tokio::test]
async fn rate_limit_rejects_after_capacity_with_retry_after() {
    let state = test_state(NinefoldConfig {
        rate_limit_base: 2,
        ..base_config()
    });
    let key = api_key(&state, "demo");
    let app = create_router(state);

    for _ in 0..2 {
        let (status, _) = make_request(
            app.clone(),
            post_json_with_key("/v1/analyze", &key, json!({"query": "design an api"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    let response = app
        .oneshot(post_json_with_key(
            "/v1/analyze",
            &key,
            json!({"query": "design an api"}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(
        response.headers().get(header::RETRY_AFTER).unwrap(),
        "60"
    );
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body["error"], "rate_limited");
    assert_eq!(body["remaining"], 0);
    assert_eq!(body["retry_after_s"], 60);
}

#[tokio::test]
async fn beta_tier_outlasts_free_capacity() {
    let state = test_state(NinefoldConfig {
        rate_limit_base: 1,
        ..base_config()
    });
    let beta_key = api_key(&state, "beta_tester");
    let app = create_router(state);

    // Beta multiplier is 5: five analyses pass where free would get one.
    for _ in 0..5 {
        let (status, _) = make_request(
            app.clone(),
            post_json_with_key("/v1/analyze", &beta_key, json!({"query": "plan this"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, _) = make_request(
        app,
        post_json_with_key("/v1/analyze", &beta_key, json!({"query": "plan this"})),
    )
    .await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn offline_fleet_returns_service_unavailable() {
    let state = test_state(base_config());
    let key = api_key(&state, "demo");
    let app = create_router(state);

    let (status, body) = make_request(
        app,
        post_json_with_key("/v1/query", &key, json!({"query": "design a scalable API"})),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"], "no_backends");
}

/// Serve the app on an ephemeral port for WebSocket handshakes.
async fn serve(app: axum::Router) -> std::net::SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    addr
}

#[tokio::test]
async fn websocket_streams_routing_then_result_frames() {
    use futures::{SinkExt, StreamExt};
    use tokio_tungstenite::tungstenite::Message;

    let (servers, state) = state_with_workers(base_config(), &[WorkerKey::Rhys]).await;
    mount_generate(&servers[0].1, "layer your services").await;
    let token = state
        .auth
        .issue_token(state.auth.principal("demo").unwrap())
        .unwrap();
    let addr = serve(create_router(state)).await;

    let url = format!("ws://{}/ws?token={}", addr, token);
    let (mut socket, _) = tokio_tungstenite::connect_async(url.as_str()).await.unwrap();

    socket
        .send(Message::Text(
            json!({"query": "design a scalable API"}).to_string(),
        ))
        .await
        .unwrap();

    let routing: serde_json::Value = serde_json::from_str(
        socket.next().await.unwrap().unwrap().to_text().unwrap(),
    )
    .unwrap();
    assert_eq!(routing["type"], "routing");
    assert_eq!(routing["egregores"], json!(["rhys"]));
    assert_eq!(routing["synthesis"], false);

    let result: serde_json::Value = serde_json::from_str(
        socket.next().await.unwrap().unwrap().to_text().unwrap(),
    )
    .unwrap();
    assert_eq!(result["type"], "result");
    assert_eq!(result["reply"]["response"]["text"], "layer your services");

    // Malformed frames produce an error frame, not a closed session.
    socket.send(Message::Text("not json".to_string())).await.unwrap();
    let error: serde_json::Value = serde_json::from_str(
        socket.next().await.unwrap().unwrap().to_text().unwrap(),
    )
    .unwrap();
    assert_eq!(error["type"], "error");
}

#[tokio::test]
async fn websocket_handshake_rejects_bad_tokens() {
    use tokio_tungstenite::tungstenite;

    let state = test_state(base_config());
    let addr = serve(create_router(state)).await;

    let url = format!("ws://{}/ws?token=forged", addr);
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }

    let url = format!("ws://{}/ws", addr);
    match tokio_tungstenite::connect_async(url.as_str()).await {
        Err(tungstenite::Error::Http(response)) => {
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        }
        other => panic!("expected HTTP 401 rejection, got {other:?}"),
    }
}
