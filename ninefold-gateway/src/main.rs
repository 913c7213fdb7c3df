//! Ninefold API Gateway
//!
//! Front-end for the worker fleet: authentication, rate limiting,
//! intelligent routing and training supervision behind one HTTP surface.

use ninefold_core::NinefoldConfig;
use ninefold_core::types::WorkerKey;
use ninefold_gateway::{AppState, create_router};
use ninefold_training::{OrchestrationMode, SimulatedRunner, TrainingSupervisor};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{
    compression::CompressionLayer,
    cors::CorsLayer,
    trace::{DefaultMakeSpan, TraceLayer},
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "ninefold_gateway=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("🚀 Starting Ninefold Intelligence Gateway");

    let config = NinefoldConfig::load()?;
    let state = AppState::new(config.clone())?;

    tracing::info!("⚙️  Rate limit: {} req / {}s (free tier)", config.rate_limit_base, config.rate_limit_window_s);
    tracing::info!("🗄️  Cache: enabled={} ttl={}s cap={}", config.cache_enabled, config.cache_ttl_s, config.cache_capacity);

    for principal in state.auth.principals() {
        tracing::info!(
            "👤 {} (tier: {}) API key: {}",
            principal.username,
            principal.tier,
            principal.api_key
        );
    }

    // Background tasks are owned here and stopped on shutdown.
    let cancel = CancellationToken::new();
    let probe_task = state.registry.spawn_probe_task(cancel.clone());

    // Warm the live set before accepting traffic.
    let running = state.registry.probe_all().await;
    tracing::info!(
        "🧠 Fleet: {}/{} workers live",
        running,
        state.registry.catalogue().len()
    );

    let training_task = spawn_training_if_requested(&state, &config);

    let app = create_router(state.clone())
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new());

    let addr = format!("{}:{}", config.bind_host, config.bind_port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("🌐 Gateway listening on http://{}", addr);
    tracing::info!("📚 API surface:");
    tracing::info!("   GET    /                    - service descriptor");
    tracing::info!("   POST   /auth/login          - session token");
    tracing::info!("   POST   /v1/query            - route and execute");
    tracing::info!("   POST   /v1/analyze          - analysis only");
    tracing::info!("   GET    /v1/workers          - fleet catalogue");
    tracing::info!("   GET    /v1/workers/{{name}}   - worker status");
    tracing::info!("   GET    /v1/metrics          - gateway metrics");
    tracing::info!("   GET    /v1/stats            - router statistics");
    tracing::info!("   GET    /health              - liveness");
    tracing::info!("   WS     /ws?token=...        - streaming queries");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // Stop owned background tasks before exit.
    cancel.cancel();
    let _ = probe_task.await;
    if let Some(task) = training_task {
        task.abort();
    }
    tracing::info!("👋 Gateway shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

/// `NINEFOLD_TRAIN=all` or a comma-separated worker list starts a
/// supervised training run alongside the gateway. Completed workers are
/// registered into the live set as they deploy.
fn spawn_training_if_requested(
    state: &AppState,
    config: &NinefoldConfig,
) -> Option<tokio::task::JoinHandle<()>> {
    let requested = std::env::var("NINEFOLD_TRAIN").ok()?;

    let workers: Vec<WorkerKey> = if requested.trim().eq_ignore_ascii_case("all") {
        WorkerKey::ALL.to_vec()
    } else {
        let mut parsed = Vec::new();
        for name in requested.split(',') {
            match name.trim().parse::<WorkerKey>() {
                Ok(key) => parsed.push(key),
                Err(e) => {
                    tracing::warn!("ignoring NINEFOLD_TRAIN entry: {}", e);
                }
            }
        }
        parsed
    };
    if workers.is_empty() {
        tracing::warn!("NINEFOLD_TRAIN set but no valid workers named");
        return None;
    }

    let mode = match std::env::var("NINEFOLD_TRAIN_MODE").ok().as_deref() {
        Some("sequential") => OrchestrationMode::Sequential,
        Some("parallel") => OrchestrationMode::Parallel,
        _ => OrchestrationMode::PhaseParallel,
    };

    let runner = Arc::new(SimulatedRunner::new(
        config.training.workspace_dir.clone(),
        Duration::from_millis(200),
    ));
    let supervisor = Arc::new(TrainingSupervisor::new(
        config.training.clone(),
        state.registry.catalogue(),
        runner,
        Arc::clone(&state.registry),
    ));

    tracing::info!(?mode, workers = workers.len(), "🎓 launching training run");
    Some(tokio::spawn(async move {
        match supervisor.run(&workers, mode).await {
            Ok(summary) => {
                for (worker, ok) in &summary.results {
                    tracing::info!(
                        "🎓 {}: {}",
                        worker,
                        if *ok { "complete" } else { "failed" }
                    );
                }
                tracing::info!(report = %summary.report_path.display(), "training run finished");
            }
            Err(e) => tracing::error!(error = %e, "training run failed"),
        }
    }))
}
