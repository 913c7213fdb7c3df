//! Ninefold HTTP API Gateway Library
//!
//! Composes authentication, rate limiting and metrics around the
//! intelligence router and fleet registry. Handlers follow one shape:
//! authenticate, admit, handle, record.

pub mod auth;
pub mod metrics;
pub mod ratelimit;
pub mod ws;

use crate::auth::{AuthManager, Principal};
use crate::metrics::MetricsAggregator;
use crate::ratelimit::{RateLimiter, RateLimiterConfig};
use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::Utc;
use ninefold_core::types::{QueryAnalysis, RoutingDecision, Tier, WorkerKey};
use ninefold_core::{Error, NinefoldConfig};
use ninefold_fleet::{WorkerClientConfig, WorkerRegistry, WorkerView};
use ninefold_router::router::RouterConfig;
use ninefold_router::{RouteReply, Router as QueryRouter};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use validator::Validate;

/// Application state shared across handlers. Constructed once at startup;
/// every subsystem hangs off it explicitly.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<NinefoldConfig>,
    pub registry: Arc<WorkerRegistry>,
    pub router: Arc<QueryRouter>,
    pub auth: Arc<AuthManager>,
    pub limiter: Arc<RateLimiter>,
    pub metrics: Arc<MetricsAggregator>,
}

impl AppState {
    pub fn new(config: NinefoldConfig) -> ninefold_core::Result<Self> {
        let catalogue = config.catalogue()?;
        let registry = Arc::new(WorkerRegistry::new(
            catalogue,
            WorkerClientConfig {
                host: config.worker_host.clone(),
                ..WorkerClientConfig::default()
            },
            config.probe_interval(),
            config.probe_timeout(),
        ));
        let router = Arc::new(QueryRouter::new(
            Arc::clone(&registry),
            RouterConfig {
                inference_timeout: config.inference_timeout(),
                synthesis_timeout: config.synthesis_timeout(),
                cache_enabled: config.cache_enabled,
                cache_ttl: config.cache_ttl(),
                cache_capacity: config.cache_capacity,
            },
        ));
        let auth = Arc::new(AuthManager::new(
            &config.token_secret,
            config.token_lifetime(),
        ));
        let limiter = Arc::new(RateLimiter::new(RateLimiterConfig {
            base_capacity: config.rate_limit_base,
            window: Duration::from_secs(config.rate_limit_window_s),
            multipliers: config.tier_multipliers.clone(),
        }));

        Ok(Self {
            config: Arc::new(config),
            registry,
            router,
            auth,
            limiter,
            metrics: Arc::new(MetricsAggregator::new()),
        })
    }
}

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_s: Option<u64>,
}

/// Wrapper mapping the core taxonomy onto HTTP status codes.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match &self.0 {
            Error::Unauthorised(msg) => (StatusCode::UNAUTHORIZED, "unauthorised", msg.clone()),
            Error::TokenExpired => (
                StatusCode::UNAUTHORIZED,
                "token_expired",
                "Token expired".to_string(),
            ),
            Error::TokenInvalid => (
                StatusCode::UNAUTHORIZED,
                "token_invalid",
                "Invalid token".to_string(),
            ),
            Error::Forbidden(msg) => (StatusCode::FORBIDDEN, "forbidden", msg.clone()),
            Error::RateLimited { retry_after_s, .. } => (
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                format!("Rate limit exceeded. Try again in {}s", retry_after_s),
            ),
            Error::Malformed(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Error::NoBackends => (
                StatusCode::SERVICE_UNAVAILABLE,
                "no_backends",
                self.0.to_string(),
            ),
            other => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal_error",
                other.to_string(),
            ),
        };

        let (remaining, retry_after_s) = match &self.0 {
            Error::RateLimited {
                remaining,
                retry_after_s,
            } => (Some(*remaining), Some(*retry_after_s)),
            _ => (None, None),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message,
            remaining,
            retry_after_s,
        };

        let mut response = (status, Json(body)).into_response();
        if let Some(retry) = retry_after_s {
            if let Ok(value) = retry.to_string().parse() {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

/// API-key header, then bearer token, in that order.
fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Principal, Error> {
    if let Some(key) = headers.get("x-api-key").and_then(|v| v.to_str().ok()) {
        if let Some(principal) = state.auth.verify_api_key(key) {
            return Ok(principal.clone());
        }
    }

    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            return state.auth.verify_token(token).map(|p| p.clone());
        }
    }

    Err(Error::Unauthorised(
        "missing or invalid credentials".to_string(),
    ))
}

fn record(
    state: &AppState,
    endpoint: &'static str,
    principal: &Principal,
    started: Instant,
    success: bool,
) {
    state.metrics.record_request(
        endpoint,
        &principal.username,
        principal.tier,
        started.elapsed().as_millis() as u64,
        success,
    );
}

fn check<T: Validate>(value: &T) -> Result<(), Error> {
    value.validate().map_err(|e| Error::Malformed(e.to_string()))
}

// ============================================================================
// Request / response bodies
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(length(min = 1))]
    pub username: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub user: Principal,
}

#[derive(Debug, Deserialize, Validate)]
pub struct QueryRequest {
    #[validate(length(min = 1, max = 8192))]
    pub query: String,
    #[serde(default = "default_max_tokens")]
    #[validate(range(min = 1, max = 4096))]
    pub max_tokens: u32,
    /// Streaming delivery happens over the WebSocket endpoint; the flag
    /// is accepted here for interface compatibility.
    #[serde(default)]
    pub stream: bool,
}

fn default_max_tokens() -> u32 {
    512
}

#[derive(Debug, Serialize)]
pub struct Usage {
    pub user: String,
    pub tier: Tier,
    pub response_time_ms: u64,
    pub remaining_requests: u32,
}

#[derive(Debug, Serialize)]
pub struct QueryResponse {
    #[serde(flatten)]
    pub reply: RouteReply,
    pub usage: Usage,
}

#[derive(Debug, Deserialize, Validate)]
pub struct AnalyzeRequest {
    #[validate(length(min = 1, max = 8192))]
    pub query: String,
}

#[derive(Debug, Serialize)]
pub struct AnalyzeResponse {
    pub query: String,
    pub analysis: QueryAnalysis,
    pub decision: RoutingDecision,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub timestamp: chrono::DateTime<Utc>,
}

// ============================================================================
// Handlers
// ============================================================================

/// GET / - service descriptor
pub async fn root_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let base = state.config.rate_limit_base;
    let beta = base * state.config.tier_multipliers.beta;
    let premium = base * state.config.tier_multipliers.premium;

    Json(serde_json::json!({
        "service": "Ninefold Intelligence Gateway",
        "version": env!("CARGO_PKG_VERSION"),
        "status": "operational",
        "endpoints": {
            "auth": { "login": "POST /auth/login" },
            "query": {
                "execute": "POST /v1/query",
                "analyze": "POST /v1/analyze",
                "stream": "WS /ws?token=..."
            },
            "workers": {
                "list": "GET /v1/workers",
                "status": "GET /v1/workers/{name}"
            },
            "monitoring": {
                "health": "GET /health",
                "metrics": "GET /v1/metrics",
                "stats": "GET /v1/stats"
            }
        },
        "tiers": {
            "free": format!("{} requests/minute", base),
            "beta": format!("{} requests/minute", beta),
            "premium": format!("{} requests/minute + priority", premium),
        }
    }))
}

/// GET /health - liveness
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    })
}

/// POST /auth/login - exchange credentials for a session token
pub async fn login_handler(
    State(state): State<AppState>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<TokenResponse>, ApiError> {
    check(&request)?;

    let principal = state
        .auth
        .verify_credentials(&request.username, &request.secret)?
        .clone();
    let token = state.auth.issue_token(&principal)?;

    Ok(Json(TokenResponse {
        access_token: token,
        token_type: "bearer".to_string(),
        expires_in: state.auth.token_lifetime().as_secs(),
        user: principal,
    }))
}

/// POST /v1/query - route and execute a query
pub async fn query_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<QueryRequest>,
) -> Result<Json<QueryResponse>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;

    if let Err(e) = state.limiter.admit(&principal.username, principal.tier) {
        record(&state, "/v1/query", &principal, started, false);
        return Err(e.into());
    }
    if let Err(e) = check(&request) {
        record(&state, "/v1/query", &principal, started, false);
        return Err(e.into());
    }

    match state.router.route(&request.query, request.max_tokens).await {
        Ok(reply) => {
            record(&state, "/v1/query", &principal, started, true);
            let remaining = state
                .limiter
                .remaining(&principal.username, principal.tier);
            Ok(Json(QueryResponse {
                reply,
                usage: Usage {
                    user: principal.username.clone(),
                    tier: principal.tier,
                    response_time_ms: started.elapsed().as_millis() as u64,
                    remaining_requests: remaining,
                },
            }))
        }
        Err(e) => {
            record(&state, "/v1/query", &principal, started, false);
            Err(e.into())
        }
    }
}

/// POST /v1/analyze - analysis and decision without dispatch
pub async fn analyze_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<AnalyzeRequest>,
) -> Result<Json<AnalyzeResponse>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;

    if let Err(e) = state.limiter.admit(&principal.username, principal.tier) {
        record(&state, "/v1/analyze", &principal, started, false);
        return Err(e.into());
    }
    if let Err(e) = check(&request) {
        record(&state, "/v1/analyze", &principal, started, false);
        return Err(e.into());
    }

    let (analysis, decision) = state.router.analyze(&request.query);
    record(&state, "/v1/analyze", &principal, started, true);

    Ok(Json(AnalyzeResponse {
        query: request.query,
        analysis,
        decision,
    }))
}

/// GET /v1/workers - catalogue and availability
pub async fn list_workers_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ninefold_fleet::FleetSummary>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;
    let summary = state.registry.summary();
    record(&state, "/v1/workers", &principal, started, true);
    Ok(Json(summary))
}

/// GET /v1/workers/{name} - one worker's catalogue entry and live status
pub async fn worker_detail_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> Result<Json<WorkerView>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;

    let key: WorkerKey = name
        .parse()
        .map_err(|e: String| Error::Malformed(e))?;

    let view = WorkerView {
        spec: state.registry.spec(key).clone(),
        status: state.registry.status(key),
        available: state.registry.is_available(key),
    };
    record(&state, "/v1/workers/{name}", &principal, started, true);
    Ok(Json(view))
}

/// GET /v1/metrics - aggregated gateway metrics (beta/premium only)
pub async fn metrics_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<metrics::MetricsSnapshot>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;

    if !principal.tier.can_read_metrics() {
        record(&state, "/v1/metrics", &principal, started, false);
        return Err(Error::Forbidden(
            "metrics access requires beta or premium tier".to_string(),
        )
        .into());
    }

    let snapshot = state.metrics.snapshot();
    record(&state, "/v1/metrics", &principal, started, true);
    Ok(Json(snapshot))
}

/// GET /v1/stats - router statistics
pub async fn stats_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<ninefold_router::RouterStats>, ApiError> {
    let started = Instant::now();
    let principal = authenticate(&state, &headers)?;
    let stats = state.router.stats();
    record(&state, "/v1/stats", &principal, started, true);
    Ok(Json(stats))
}

/// Create the gateway router with all endpoints.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(root_handler))
        .route("/health", get(health_handler))
        .route("/auth/login", post(login_handler))
        .route("/v1/query", post(query_handler))
        .route("/v1/analyze", post(analyze_handler))
        .route("/v1/workers", get(list_workers_handler))
        .route("/v1/workers/{name}", get(worker_detail_handler))
        .route("/v1/metrics", get(metrics_handler))
        .route("/v1/stats", get(stats_handler))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
}
