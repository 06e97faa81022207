//! HTTP dispatch surface: liveness, status, and job submission.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use mediarelay_platform::ConversationRef;
use mediarelay_runtime::{AdmissionError, JobKind, RelayCoordinator};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::commands::SinkFactory;

const HEALTH_ENDPOINT: &str = "/healthz";
const STATUS_ENDPOINT: &str = "/status";
const INDEX_JOB_ENDPOINT: &str = "/jobs/index";
const REPLAY_JOB_ENDPOINT: &str = "/jobs/replay";

pub(crate) struct DispatchState {
    coordinator: RelayCoordinator,
    sinks: SinkFactory,
}

impl DispatchState {
    pub(crate) fn new(coordinator: RelayCoordinator, sinks: SinkFactory) -> Self {
        Self { coordinator, sinks }
    }
}

#[derive(Debug)]
struct DispatchApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl DispatchApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, code, message)
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", message)
    }
}

impl From<AdmissionError> for DispatchApiError {
    fn from(error: AdmissionError) -> Self {
        match error {
            AdmissionError::JobActive(_) => {
                Self::new(StatusCode::CONFLICT, "job_active", error.to_string())
            }
            AdmissionError::NotLoggedIn => {
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "not_logged_in", error.to_string())
            }
        }
    }
}

impl IntoResponse for DispatchApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "error": {
                    "code": self.code,
                    "message": self.message,
                }
            })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
struct IndexJobRequest {
    conversation: String,
}

#[derive(Debug, Deserialize)]
struct ReplayJobRequest {
    target: String,
}

pub(crate) async fn run_dispatch_server(bind: &str, state: Arc<DispatchState>) -> Result<()> {
    let bind_addr = bind
        .parse::<SocketAddr>()
        .with_context(|| format!("invalid --bind '{bind}'"))?;
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind dispatch server on {bind_addr}"))?;
    let local_addr = listener
        .local_addr()
        .context("failed to resolve bound dispatch server address")?;
    info!(addr = %local_addr, "dispatch server listening");

    let app = build_dispatch_router(state);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("dispatch server exited unexpectedly")?;
    info!("dispatch server stopped");
    Ok(())
}

fn build_dispatch_router(state: Arc<DispatchState>) -> Router {
    Router::new()
        .route(HEALTH_ENDPOINT, get(handle_health))
        .route(STATUS_ENDPOINT, get(handle_status))
        .route(INDEX_JOB_ENDPOINT, post(handle_index_job))
        .route(REPLAY_JOB_ENDPOINT, post(handle_replay_job))
        .with_state(state)
}

async fn handle_health(State(state): State<Arc<DispatchState>>) -> Response {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "job_running": state.coordinator.is_job_running(),
        })),
    )
        .into_response()
}

async fn handle_status(State(state): State<Arc<DispatchState>>) -> Response {
    match state.coordinator.status().await {
        Ok(status) => (StatusCode::OK, Json(status)).into_response(),
        Err(error) => {
            DispatchApiError::internal(format!("failed to read relay status: {error}"))
                .into_response()
        }
    }
}

fn parse_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, DispatchApiError> {
    serde_json::from_slice(body).map_err(|error| {
        DispatchApiError::bad_request(
            "malformed_json",
            format!("failed to parse request body: {error}"),
        )
    })
}

fn parse_reference(raw: &str) -> Result<ConversationRef, DispatchApiError> {
    ConversationRef::parse(raw).map_err(|error| {
        DispatchApiError::bad_request("invalid_conversation", error.to_string())
    })
}

fn accepted(kind: JobKind, conversation: &ConversationRef) -> Response {
    (
        StatusCode::ACCEPTED,
        Json(json!({
            "accepted": true,
            "job": kind,
            "conversation": conversation.to_string(),
        })),
    )
        .into_response()
}

/// Retries the identity probe for a logged-out idle service so a failed
/// startup probe does not reject jobs until restart.
async fn restore_session(state: &DispatchState) {
    if state.coordinator.is_logged_in() || state.coordinator.is_job_running() {
        return;
    }
    if let Err(error) = state.coordinator.ensure_connected().await {
        warn!(error = %error, "platform session probe failed");
    }
}

async fn handle_index_job(State(state): State<Arc<DispatchState>>, body: Bytes) -> Response {
    let conversation = match parse_body::<IndexJobRequest>(&body)
        .and_then(|request| parse_reference(&request.conversation))
    {
        Ok(conversation) => conversation,
        Err(error) => return error.into_response(),
    };
    restore_session(&state).await;
    match state
        .coordinator
        .start_indexing(conversation.clone(), state.sinks.build(JobKind::Indexing))
    {
        Ok(_job) => {
            info!(conversation = %conversation, "indexing job accepted");
            accepted(JobKind::Indexing, &conversation)
        }
        Err(error) => DispatchApiError::from(error).into_response(),
    }
}

async fn handle_replay_job(State(state): State<Arc<DispatchState>>, body: Bytes) -> Response {
    let target = match parse_body::<ReplayJobRequest>(&body)
        .and_then(|request| parse_reference(&request.target))
    {
        Ok(target) => target,
        Err(error) => return error.into_response(),
    };
    restore_session(&state).await;
    match state
        .coordinator
        .start_replay(target.clone(), state.sinks.build(JobKind::Replay))
    {
        Ok(_job) => {
            info!(target = %target, "replay job accepted");
            accepted(JobKind::Replay, &target)
        }
        Err(error) => DispatchApiError::from(error).into_response(),
    }
}
