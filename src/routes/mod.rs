//! API routes

use std::convert::Infallible;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use futures::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::core::{
    ChatError, PanelId, PanelSnapshot, PlaygroundSnapshot, SubmitReceipt,
};
use crate::AppState;

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

#[derive(Debug, Deserialize)]
pub struct SubmitRequest {
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ModelRequest {
    pub model: String,
}

#[derive(Debug, Deserialize)]
pub struct ToggleRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ChatError {
    fn into_response(self) -> Response {
        let status = match self {
            ChatError::EmptyPrompt | ChatError::UnknownModel(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ChatError::PromptTooLong => StatusCode::PAYLOAD_TOO_LARGE,
            ChatError::TurnInFlight => StatusCode::CONFLICT,
            ChatError::UnknownPanel(_) => StatusCode::NOT_FOUND,
            ChatError::Provider(_) => StatusCode::BAD_GATEWAY,
        };
        (
            status,
            Json(ErrorResponse {
                error: self.to_string(),
            }),
        )
            .into_response()
    }
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

async fn playground(State(state): State<AppState>) -> Json<PlaygroundSnapshot> {
    Json(state.chat_engine.snapshot())
}

async fn panel_state(
    State(state): State<AppState>,
    Path(panel): Path<String>,
) -> Result<Json<PanelSnapshot>, ChatError> {
    let panel: PanelId = panel.parse()?;
    Ok(Json(state.chat_engine.panel_snapshot(panel)))
}

async fn submit_message(
    State(state): State<AppState>,
    Path(panel): Path<String>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitReceipt>, ChatError> {
    let panel: PanelId = panel.parse()?;
    let receipt = state.chat_engine.submit(panel, &request.message).await?;
    Ok(Json(receipt))
}

async fn set_model(
    State(state): State<AppState>,
    Path(panel): Path<String>,
    Json(request): Json<ModelRequest>,
) -> Result<Json<PanelSnapshot>, ChatError> {
    let panel: PanelId = panel.parse()?;
    state.chat_engine.set_model(panel, &request.model).await?;
    Ok(Json(state.chat_engine.panel_snapshot(panel)))
}

async fn set_thinking(
    State(state): State<AppState>,
    Path(panel): Path<String>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<PanelSnapshot>, ChatError> {
    let panel: PanelId = panel.parse()?;
    state.chat_engine.set_thinking_mode(panel, request.enabled);
    Ok(Json(state.chat_engine.panel_snapshot(panel)))
}

async fn clear(
    State(state): State<AppState>,
    Path(panel): Path<String>,
) -> Result<Json<PanelSnapshot>, ChatError> {
    let panel: PanelId = panel.parse()?;
    state.chat_engine.clear(panel).await?;
    Ok(Json(state.chat_engine.panel_snapshot(panel)))
}

async fn set_compare(
    State(state): State<AppState>,
    Json(request): Json<ToggleRequest>,
) -> Result<Json<PlaygroundSnapshot>, ChatError> {
    state.chat_engine.set_compare(request.enabled).await?;
    Ok(Json(state.chat_engine.snapshot()))
}

/// Live panel events as server-sent events. A lagging consumer skips ahead;
/// it never blocks the engine.
async fn events(
    State(state): State<AppState>,
    Path(panel): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ChatError> {
    let panel: PanelId = panel.parse()?;
    let mut rx = state.chat_engine.subscribe(panel);

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    if let Ok(json) = serde_json::to_string(&event) {
                        yield Ok(Event::default().data(json));
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/v1/playground", get(playground))
        .route("/v1/playground/compare", post(set_compare))
        .route("/v1/panels/:panel", get(panel_state))
        .route("/v1/panels/:panel/messages", post(submit_message))
        .route("/v1/panels/:panel/model", post(set_model))
        .route("/v1/panels/:panel/thinking", post(set_thinking))
        .route("/v1/panels/:panel/clear", post(clear))
        .route("/v1/panels/:panel/events", get(events))
}
