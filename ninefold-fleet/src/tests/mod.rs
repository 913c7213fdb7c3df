use crate::client::{WorkerClient, WorkerClientConfig};
use crate::registry::WorkerRegistry;
use ninefold_core::catalogue::default_catalogue;
use ninefold_core::types::{WorkerKey, WorkerState};
use ninefold_core::{Catalogue, Error, WorkerErrorKind};
use std::time::Duration;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Catalogue where one worker's port points at the mock server.
fn catalogue_with_port(key: WorkerKey, port: u16) -> Catalogue {
    let mut specs = default_catalogue();
    for spec in &mut specs {
        if spec.key == key {
            spec.port = port;
        }
    }
    Catalogue::new(specs).unwrap()
}

fn local_client() -> WorkerClient {
    WorkerClient::new(WorkerClientConfig {
        host: "127.0.0.1".to_string(),
        ..WorkerClientConfig::default()
    })
}

fn local_registry(catalogue: Catalogue, probe_interval: Duration) -> WorkerRegistry {
    WorkerRegistry::new(
        catalogue,
        WorkerClientConfig {
            host: "127.0.0.1".to_string(),
            ..WorkerClientConfig::default()
        },
        probe_interval,
        Duration::from_secs(1),
    )
}

#[tokio::test]
async fn generate_returns_text_and_latency() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_partial_json(serde_json::json!({"max_tokens": 64})))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "text": "A layered architecture works best here.",
            "meta": {"model": "specialist"}
        })))
        .mount(&server)
        .await;

    let catalogue = catalogue_with_port(WorkerKey::Rhys, server.address().port());
    let client = local_client();
    let outcome = client
        .generate(
            catalogue.get(WorkerKey::Rhys),
            "design a scalable API",
            64,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

    assert_eq!(outcome.worker, WorkerKey::Rhys);
    assert_eq!(outcome.text, "A layered architecture works best here.");
    assert!(outcome.meta.is_some());
}

#[tokio::test]
async fn generate_classifies_http_errors() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let catalogue = catalogue_with_port(WorkerKey::Wraith, server.address().port());
    let err = local_client()
        .generate(
            catalogue.get(WorkerKey::Wraith),
            "anything",
            32,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    match err {
        Error::Worker { worker, kind, .. } => {
            assert_eq!(worker, WorkerKey::Wraith);
            assert_eq!(kind, WorkerErrorKind::Http(500));
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn generate_classifies_unreachable_workers() {
    // Nothing is listening on the default catalogue ports.
    let catalogue = Catalogue::default();
    let err = local_client()
        .generate(
            catalogue.get(WorkerKey::Flux),
            "anything",
            32,
            Duration::from_millis(500),
        )
        .await
        .unwrap_err();

    match err {
        Error::Worker { kind, .. } => assert_eq!(kind, WorkerErrorKind::Unreachable),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn generate_classifies_malformed_bodies() {
    let server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let catalogue = catalogue_with_port(WorkerKey::Kairos, server.address().port());
    let err = local_client()
        .generate(
            catalogue.get(WorkerKey::Kairos),
            "anything",
            32,
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

    match err {
        Error::Worker { kind, .. } => assert_eq!(kind, WorkerErrorKind::Malformed),
        other => panic!("unexpected error: {other}"),
    }
}

#[tokio::test]
async fn probe_publishes_running_status() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy",
            "response_time_ms": 12.5,
            "requests_served": 42,
            "uptime_seconds": 360.0,
            "cpu_percent": 17.0,
            "memory_mb": 900.0,
            "gpu_memory_mb": 2048.0,
            "error_count": 1
        })))
        .mount(&server)
        .await;

    let catalogue = catalogue_with_port(WorkerKey::Rhys, server.address().port());
    let registry = local_registry(catalogue, Duration::from_secs(30));

    assert!(registry.probe(WorkerKey::Rhys).await);

    let status = registry.status(WorkerKey::Rhys);
    assert_eq!(status.state, WorkerState::Running);
    assert_eq!(status.requests_served, 42);
    assert!(status.last_probe_at.is_some());
    assert!(registry.is_available(WorkerKey::Rhys));
    assert_eq!(registry.available(), vec![WorkerKey::Rhys]);
}

#[tokio::test]
async fn failed_probe_marks_worker_stopped_but_keeps_it() {
    let catalogue = Catalogue::default();
    let registry = local_registry(catalogue, Duration::from_secs(30));

    assert!(!registry.probe(WorkerKey::Vireon).await);

    let status = registry.status(WorkerKey::Vireon);
    assert_eq!(status.state, WorkerState::Stopped);
    assert!(!registry.is_available(WorkerKey::Vireon));
    // Entry survives the failure.
    assert_eq!(registry.list().len(), 9);
}

#[tokio::test]
async fn recommend_prefers_keyword_matches_in_live_set() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "status": "healthy"
        })))
        .mount(&server)
        .await;

    let catalogue = catalogue_with_port(WorkerKey::Wraith, server.address().port());
    let registry = local_registry(catalogue, Duration::from_secs(30));
    registry.probe(WorkerKey::Wraith).await;
    registry.mark_running(WorkerKey::Rhys);

    // Security keywords outscore everything else.
    assert_eq!(
        registry.recommend("assess the security threat and risk"),
        Some(WorkerKey::Wraith)
    );
    // No keyword hits: first available worker in declaration order.
    assert_eq!(registry.recommend("hello there"), Some(WorkerKey::Rhys));
}

#[tokio::test]
async fn recommend_returns_none_with_empty_live_set() {
    let registry = local_registry(Catalogue::default(), Duration::from_secs(30));
    assert_eq!(registry.recommend("design a system"), None);
}

#[tokio::test]
async fn mark_running_forces_worker_into_live_set() {
    let registry = local_registry(Catalogue::default(), Duration::from_secs(30));
    assert!(registry.available().is_empty());

    registry.mark_running(WorkerKey::Seraphel);

    assert!(registry.is_available(WorkerKey::Seraphel));
    assert_eq!(registry.available(), vec![WorkerKey::Seraphel]);
}

#[tokio::test]
async fn summary_reports_fleet_shape() {
    let registry = local_registry(Catalogue::default(), Duration::from_secs(30));
    registry.mark_running(WorkerKey::Ake);

    let summary = registry.summary();
    assert_eq!(summary.total_workers, 9);
    assert_eq!(summary.running_workers, 1);
    assert_eq!(summary.available, vec![WorkerKey::Ake]);
    assert!(summary.manager_uptime_seconds >= 0.0);
}
