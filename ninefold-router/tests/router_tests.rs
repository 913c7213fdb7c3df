use ninefold_core::catalogue::default_catalogue;
use ninefold_core::types::{WorkerKey, WorkerSpec};
use ninefold_core::{Catalogue, Error, WorkerErrorKind};
use ninefold_fleet::{WorkerClientConfig, WorkerRegistry};
use ninefold_router::result::{RouteOutcome, SynthesisMode};
use ninefold_router::router::{Router, RouterConfig};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Spin up mock servers for the given workers and build a registry whose
/// catalogue points at them. Workers without a server keep their default
/// (dead) ports.
async fn fleet_with(workers: &[WorkerKey]) -> (Vec<(WorkerKey, MockServer)>, Arc<WorkerRegistry>) {
    let mut servers = Vec::new();
    let mut specs: Vec<WorkerSpec> = default_catalogue();

    for key in workers {
        let server = MockServer::start().await;
        for spec in &mut specs {
            if spec.key == *key {
                spec.port = server.address().port();
            }
        }
        servers.push((*key, server));
    }

    let registry = Arc::new(WorkerRegistry::new(
        Catalogue::new(specs).unwrap(),
        WorkerClientConfig {
            host: "127.0.0.1".to_string(),
            ..WorkerClientConfig::default()
        },
        Duration::from_secs(30),
        Duration::from_secs(1),
    ));
    for key in workers {
        registry.mark_running(*key);
    }

    (servers, registry)
}

fn server_for<'a>(servers: &'a [(WorkerKey, MockServer)], key: WorkerKey) -> &'a MockServer {
    &servers.iter().find(|(k, _)| *k == key).unwrap().1
}

async fn mount_generate(server: &MockServer, text: &str) {
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "text": text })),
        )
        .mount(server)
        .await;
}

fn router(registry: Arc<WorkerRegistry>) -> Router {
    Router::new(
        registry,
        RouterConfig {
            inference_timeout: Duration::from_secs(2),
            synthesis_timeout: Duration::from_secs(2),
            cache_enabled: true,
            cache_ttl: Duration::from_secs(3600),
            cache_capacity: 100,
        },
    )
}

#[tokio::test]
async fn single_agent_query_hits_cache_on_repeat() {
    let (servers, registry) = fleet_with(&[WorkerKey::Rhys]).await;
    mount_generate(
        server_for(&servers, WorkerKey::Rhys),
        "A layered service with stateless nodes scales cleanly.",
    )
    .await;

    let router = router(registry);
    let first = router.route("design a scalable API", 64).await.unwrap();

    assert!(matches!(first.outcome, RouteOutcome::SingleAgent { .. }));
    assert!(!first.metadata.performance.cached);
    assert_eq!(
        first.metadata.routing_decision.egregores,
        vec![WorkerKey::Rhys]
    );

    let second = router.route("design a scalable API", 64).await.unwrap();
    assert!(second.metadata.performance.cached);

    // Byte-identical modulo the performance block.
    let strip = |reply: &ninefold_router::RouteReply| {
        let mut v = serde_json::to_value(reply).unwrap();
        v["metadata"]
            .as_object_mut()
            .unwrap()
            .remove("performance");
        v
    };
    assert_eq!(strip(&first), strip(&second));

    // Only the first call reached the worker.
    let hits = server_for(&servers, WorkerKey::Rhys)
        .received_requests()
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);

    let stats = router.stats();
    assert_eq!(stats.total_queries, 2);
    assert_eq!(stats.cache_hits, 1);
    assert_eq!(stats.single_agent, 1);
}

#[tokio::test]
async fn multi_agent_query_synthesises_all_perspectives() {
    let (servers, registry) =
        fleet_with(&[WorkerKey::Rhys, WorkerKey::Wraith, WorkerKey::Flux, WorkerKey::Ake]).await;
    mount_generate(server_for(&servers, WorkerKey::Rhys), "layered architecture").await;
    mount_generate(server_for(&servers, WorkerKey::Wraith), "zero-trust boundaries").await;
    mount_generate(server_for(&servers, WorkerKey::Flux), "strangler-fig migration").await;

    // The aggregator must see every individual response in its prompt.
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .and(body_string_contains("RHYS: layered architecture"))
        .and(body_string_contains("WRAITH: zero-trust boundaries"))
        .and(body_string_contains("FLUX: strangler-fig migration"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "text": "A unified secure, adaptable architecture."
        })))
        .mount(server_for(&servers, WorkerKey::Ake))
        .await;

    let router = router(registry);
    let reply = router
        .route("design a secure api that we can adapt later", 128)
        .await
        .unwrap();

    match &reply.outcome {
        RouteOutcome::MultiAgent {
            responses,
            synthesis,
            synthesized,
        } => {
            assert_eq!(*synthesis, SynthesisMode::Full);
            let order: Vec<WorkerKey> = responses.iter().map(|r| r.worker).collect();
            assert_eq!(
                order,
                vec![WorkerKey::Rhys, WorkerKey::Wraith, WorkerKey::Flux]
            );
            assert_eq!(
                synthesized.as_deref(),
                Some("A unified secure, adaptable architecture.")
            );
        }
        other => panic!("expected multi-agent outcome, got {other:?}"),
    }
    assert!(reply.metadata.errors.is_empty());
    assert!(reply.metadata.routing_decision.synthesis);

    let stats = router.stats();
    assert_eq!(stats.multi_agent, 1);
    assert_eq!(stats.synthesis_used, 1);
}

#[tokio::test]
async fn offline_aggregator_degrades_to_ordered_concatenation() {
    // Ake is absent from the live set entirely.
    let (servers, registry) =
        fleet_with(&[WorkerKey::Rhys, WorkerKey::Wraith, WorkerKey::Flux]).await;
    mount_generate(server_for(&servers, WorkerKey::Rhys), "layered architecture").await;
    mount_generate(server_for(&servers, WorkerKey::Wraith), "zero-trust boundaries").await;
    mount_generate(server_for(&servers, WorkerKey::Flux), "strangler-fig migration").await;

    let router = router(registry);
    let reply = router
        .route("design a secure api that we can adapt later", 128)
        .await
        .unwrap();

    match &reply.outcome {
        RouteOutcome::MultiAgent {
            synthesis,
            synthesized,
            ..
        } => {
            assert_eq!(*synthesis, SynthesisMode::Degraded);
            let text = synthesized.as_deref().unwrap();
            let rhys = text.find("Rhys: layered architecture").unwrap();
            let wraith = text.find("Wraith: zero-trust boundaries").unwrap();
            let flux = text.find("Flux: strangler-fig migration").unwrap();
            assert!(rhys < wraith && wraith < flux);
        }
        other => panic!("expected multi-agent outcome, got {other:?}"),
    }

    let aggregator_failure = reply
        .metadata
        .errors
        .iter()
        .find(|f| f.worker == WorkerKey::Ake)
        .expect("aggregator failure recorded");
    assert_eq!(aggregator_failure.kind, WorkerErrorKind::Unreachable);
}

#[tokio::test]
async fn partial_failure_returns_survivors_without_synthesis() {
    let (servers, registry) = fleet_with(&[WorkerKey::Rhys, WorkerKey::Wraith]).await;
    mount_generate(server_for(&servers, WorkerKey::Rhys), "layered architecture").await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(ResponseTemplate::new(500))
        .mount(server_for(&servers, WorkerKey::Wraith))
        .await;

    let router = router(registry);
    let reply = router.route("design a secure api", 64).await.unwrap();

    match &reply.outcome {
        RouteOutcome::MultiAgent {
            responses,
            synthesis,
            synthesized,
        } => {
            assert_eq!(responses.len(), 1);
            assert_eq!(responses[0].worker, WorkerKey::Rhys);
            assert_eq!(*synthesis, SynthesisMode::Skipped);
            assert!(synthesized.is_none());
        }
        other => panic!("expected multi-agent outcome, got {other:?}"),
    }

    assert_eq!(reply.metadata.errors.len(), 1);
    assert_eq!(reply.metadata.errors[0].worker, WorkerKey::Wraith);
    assert_eq!(reply.metadata.errors[0].kind, WorkerErrorKind::Http(500));
}

#[tokio::test]
async fn empty_live_set_is_no_backends_and_never_cached() {
    // A server exists for rhys but the worker is not in the live set yet.
    let server = MockServer::start().await;
    mount_generate(&server, "fresh answer").await;
    let mut specs = default_catalogue();
    for spec in &mut specs {
        if spec.key == WorkerKey::Rhys {
            spec.port = server.address().port();
        }
    }
    let registry = Arc::new(WorkerRegistry::new(
        Catalogue::new(specs).unwrap(),
        WorkerClientConfig {
            host: "127.0.0.1".to_string(),
            ..WorkerClientConfig::default()
        },
        Duration::from_secs(30),
        Duration::from_secs(1),
    ));
    let router = router(Arc::clone(&registry));

    let err = router.route("design a scalable API", 64).await.unwrap_err();
    assert!(matches!(err, Error::NoBackends));

    // The failure must not have been cached: once the worker joins the
    // live set, the same query on the same router dispatches for real.
    registry.mark_running(WorkerKey::Rhys);
    let reply = router.route("design a scalable API", 64).await.unwrap();
    assert!(!reply.metadata.performance.cached);
    assert_eq!(reply.outcome.primary_text(), "fresh answer");
}

#[tokio::test]
async fn selected_but_offline_workers_are_recorded_not_fatal() {
    // Only rhys is live; wraith is selected but down.
    let (servers, registry) = fleet_with(&[WorkerKey::Rhys]).await;
    mount_generate(server_for(&servers, WorkerKey::Rhys), "layered architecture").await;

    let router = router(registry);
    let reply = router.route("design a secure api", 64).await.unwrap();

    let offline = reply
        .metadata
        .errors
        .iter()
        .find(|f| f.worker == WorkerKey::Wraith)
        .expect("offline worker recorded");
    assert_eq!(offline.kind, WorkerErrorKind::Unreachable);
}

#[tokio::test]
async fn concurrent_identical_queries_share_one_fan_out() {
    let (servers, registry) = fleet_with(&[WorkerKey::Rhys]).await;
    Mock::given(method("POST"))
        .and(path("/api/generate"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(serde_json::json!({ "text": "slow answer" }))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(server_for(&servers, WorkerKey::Rhys))
        .await;

    let router = Arc::new(router(registry));
    let a = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.route("design a scalable API", 64).await })
    };
    let b = {
        let router = Arc::clone(&router);
        tokio::spawn(async move { router.route("design a scalable API", 64).await })
    };

    let first = a.await.unwrap().unwrap();
    let second = b.await.unwrap().unwrap();
    assert_eq!(
        serde_json::to_value(&first.outcome).unwrap(),
        serde_json::to_value(&second.outcome).unwrap()
    );
    // wiremock verifies expect(1) on drop.
}

#[tokio::test]
async fn analyze_matches_executed_selection() {
    let (servers, registry) =
        fleet_with(&[WorkerKey::Rhys, WorkerKey::Wraith, WorkerKey::Flux, WorkerKey::Ake]).await;
    for key in [WorkerKey::Rhys, WorkerKey::Wraith, WorkerKey::Flux, WorkerKey::Ake] {
        mount_generate(server_for(&servers, key), "answer").await;
    }

    let router = router(registry);
    let (_, decision) = router.analyze("design a secure api that we can adapt later");
    let reply = router
        .route("design a secure api that we can adapt later", 64)
        .await
        .unwrap();

    assert_eq!(decision.selected, reply.metadata.routing_decision.egregores);
}
