//! WebSocket streaming endpoint.
//!
//! The token is verified once at accept time; every inbound query then
//! passes rate-limit admission before dispatch. A disconnect observed
//! while a fan-out is in flight drops the fan-out future, which cancels
//! the outstanding worker calls best-effort.

use crate::auth::Principal;
use crate::{ApiError, AppState};
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use ninefold_core::Error;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
pub struct WsParams {
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WsQuery {
    query: String,
    #[serde(default = "default_max_tokens")]
    max_tokens: u32,
}

fn default_max_tokens() -> u32 {
    512
}

/// GET /ws?token=... - authenticated streaming session
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .ok_or_else(|| Error::Unauthorised("token query parameter required".to_string()))?;
    let principal = state.auth.verify_token(&token)?.clone();

    Ok(ws.on_upgrade(move |socket| session(state, principal, socket)))
}

async fn session(state: AppState, principal: Principal, socket: WebSocket) {
    info!(user = %principal.username, "websocket connected");
    let (mut sender, mut receiver) = socket.split();

    'session: while let Some(inbound) = receiver.next().await {
        let text = match inbound {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) | Err(_) => break,
            _ => continue,
        };

        let request: WsQuery = match serde_json::from_str(text.as_str()) {
            Ok(request) => request,
            Err(_) => {
                let frame = serde_json::json!({
                    "type": "error",
                    "error": "expected {\"query\": \"...\"}"
                });
                if send_frame(&mut sender, frame).await.is_err() {
                    break;
                }
                continue;
            }
        };

        if let Err(e) = state.limiter.admit(&principal.username, principal.tier) {
            let frame = match e {
                Error::RateLimited {
                    remaining,
                    retry_after_s,
                } => serde_json::json!({
                    "type": "error",
                    "error": "rate limit exceeded",
                    "remaining": remaining,
                    "retry_after_s": retry_after_s,
                }),
                other => serde_json::json!({ "type": "error", "error": other.to_string() }),
            };
            if send_frame(&mut sender, frame).await.is_err() {
                break;
            }
            continue;
        }

        // First frame: the plan, before any worker answers.
        let (_, decision) = state.router.analyze(&request.query);
        let routing_frame = serde_json::json!({
            "type": "routing",
            "egregores": decision.selected,
            "synthesis": decision.synthesis_required,
            "estimated_latency_ms": decision.estimated_latency_ms,
        });
        if send_frame(&mut sender, routing_frame).await.is_err() {
            break;
        }

        let started = Instant::now();
        let route = state.router.route(&request.query, request.max_tokens);
        tokio::pin!(route);

        // Dispatch while watching the inbound half so a disconnect drops
        // the in-flight fan-out.
        let result = loop {
            tokio::select! {
                result = &mut route => break result,
                interleaved = receiver.next() => match interleaved {
                    None | Some(Err(_)) | Some(Ok(Message::Close(_))) => {
                        debug!(user = %principal.username, "disconnect with fan-out in flight");
                        break 'session;
                    }
                    // Frames arriving mid-query are dropped, not queued.
                    _ => continue,
                }
            }
        };

        let success = result.is_ok();
        state.metrics.record_request(
            "/ws",
            &principal.username,
            principal.tier,
            started.elapsed().as_millis() as u64,
            success,
        );

        let frame = match result {
            Ok(reply) => serde_json::json!({ "type": "result", "reply": reply }),
            Err(e) => serde_json::json!({ "type": "error", "error": e.to_string() }),
        };
        if send_frame(&mut sender, frame).await.is_err() {
            break;
        }
    }

    debug!(user = %principal.username, "websocket session ended");
}

async fn send_frame(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    frame: serde_json::Value,
) -> Result<(), axum::Error> {
    sender.send(Message::Text(frame.to_string().into())).await
}
