//! Voice HTTP endpoint — a thin caller of the Worker Pool's single-shot
//! voice spawn path. `GET /health` always returns 200; `POST /api/run`
//! requires a bearer token and runs one isolated worker turn to
//! completion.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::worker::WorkerPoolHandle;
use crate::{AppError, Result};

const MAX_BODY_BYTES: usize = 1024 * 1024;
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Clone)]
struct VoiceState {
    pool: WorkerPoolHandle,
    bearer_token: Arc<str>,
}

#[derive(Debug, Deserialize)]
struct RunRequest {
    input: String,
    #[serde(default)]
    timeout: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct RunResponse {
    success: bool,
    result: String,
    duration_ms: u128,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

/// Bind and serve the voice HTTP endpoint on `127.0.0.1:<port>` until
/// `cancel` fires.
///
/// # Errors
///
/// Returns `AppError::Transport` if the listener cannot bind.
pub async fn serve(
    port: u16,
    bearer_token: String,
    pool: WorkerPoolHandle,
    cancel: CancellationToken,
) -> Result<()> {
    let state = VoiceState {
        pool,
        bearer_token: bearer_token.into(),
    };

    let app = Router::new()
        .route("/health", get(health))
        .route("/api/run", post(run))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .fallback(not_found)
        .with_state(state);

    let addr: SocketAddr = ([127, 0, 0, 1], port).into();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|err| AppError::Transport(format!("voice endpoint bind {addr}: {err}")))?;

    info!(%addr, "voice http endpoint listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await
        .map_err(|err| AppError::Transport(format!("voice endpoint serve error: {err}")))?;

    Ok(())
}

async fn health() -> impl IntoResponse {
    StatusCode::OK
}

async fn not_found() -> impl IntoResponse {
    StatusCode::NOT_FOUND
}

async fn run(
    State(state): State<VoiceState>,
    headers: HeaderMap,
    Json(request): Json<RunRequest>,
) -> impl IntoResponse {
    if !authorized(&headers, &state.bearer_token) {
        return (StatusCode::UNAUTHORIZED, Json(RunResponse {
            success: false,
            result: String::new(),
            duration_ms: 0,
            error: Some("invalid or missing bearer token".into()),
        }));
    }

    let timeout = request
        .timeout
        .map_or(DEFAULT_TIMEOUT, Duration::from_millis);
    let started = Instant::now();

    let outcome = tokio::time::timeout(timeout, state.pool.run_voice(request.input)).await;

    let response = match outcome {
        Ok(Ok(result)) => RunResponse {
            success: true,
            result,
            duration_ms: started.elapsed().as_millis(),
            error: None,
        },
        Ok(Err(err)) => {
            error!(%err, "voice turn failed");
            RunResponse {
                success: false,
                result: String::new(),
                duration_ms: started.elapsed().as_millis(),
                error: Some(err.to_string()),
            }
        }
        Err(_elapsed) => RunResponse {
            success: false,
            result: String::new(),
            duration_ms: started.elapsed().as_millis(),
            error: Some("voice turn exceeded its deadline".into()),
        },
    };

    (StatusCode::OK, Json(response))
}

fn authorized(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .is_some_and(|token| token == expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_token_allows_any_request() {
        assert!(authorized(&HeaderMap::new(), ""));
    }

    #[test]
    fn missing_header_is_rejected_when_token_configured() {
        assert!(!authorized(&HeaderMap::new(), "secret"));
    }
}
