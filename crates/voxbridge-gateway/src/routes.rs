//! HTTP surface: credential brokering, conversation inspection and one-shot TTS.

use crate::state::AppState;
use crate::ws;
use axum::{
    extract::{Path, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};
use voxbridge_core::ProviderError;
use voxbridge_voice::VoiceError;

type ApiError = (StatusCode, String);

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/signed-url", get(signed_url))
        .route("/api/conversations/:id", get(get_conversation).delete(clear_conversation))
        .route("/api/conversations/:id/scenario", put(set_scenario))
        .route("/api/tts", post(tts))
        .route("/ws/voice", get(ws::voice_socket))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

/// GET /api/signed-url: short-lived agent socket URL so a browser can talk to the agent directly.
async fn signed_url(State(state): State<AppState>) -> Result<Json<serde_json::Value>, ApiError> {
    match state.signer.signed_url().await {
        Ok(url) => Ok(Json(json!({ "signed_url": url }))),
        Err(e @ ProviderError::NotConfigured(_)) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
        Err(e) => {
            warn!(error = %e, "signed url request failed");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// GET /api/conversations/:id: turns, provider conversation id, scenario, and the live turn state
/// when a voice socket is attached.
async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = state
        .continuity()
        .snapshot(&id)
        .ok_or_else(|| (StatusCode::NOT_FOUND, format!("no conversation {}", id)))?;
    let live = state.registry.get(&id).map(|h| h.state());
    Ok(Json(json!({
        "session_id": session.session_id,
        "provider_conversation_id": session.provider_conversation_id,
        "scenario": session.scenario,
        "created_at": session.created_at,
        "next_turn_index": session.next_turn_index(),
        "turns": session.turns,
        "live": live.is_some(),
        "state": live,
    })))
}

/// DELETE /api/conversations/:id
async fn clear_conversation(State(state): State<AppState>, Path(id): Path<String>) -> StatusCode {
    if let Some(handle) = state.registry.get(&id) {
        handle.clear();
        info!(session_id = %id, "live conversation cleared");
        return StatusCode::NO_CONTENT;
    }
    if state.continuity().clear(&id) {
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

#[derive(Deserialize)]
struct ScenarioBody {
    #[serde(default)]
    scenario: Option<String>,
}

/// PUT /api/conversations/:id/scenario: creates the conversation if needed, so a scenario can be
/// set before the voice socket connects with `?session_id=`.
async fn set_scenario(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(body): Json<ScenarioBody>,
) -> StatusCode {
    state.continuity().set_scenario(&id, body.scenario);
    StatusCode::NO_CONTENT
}

#[derive(Deserialize)]
struct TtsBody {
    text: String,
}

/// POST /api/tts: synthesize `text` and return the audio bytes.
async fn tts(State(state): State<AppState>, Json(body): Json<TtsBody>) -> Result<Response, ApiError> {
    if body.text.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "text is required".to_string()));
    }
    match state.synthesizer.synthesize(&body.text).await {
        Ok(Some(audio)) => Ok(([(header::CONTENT_TYPE, audio.mime.clone())], audio.bytes().to_vec()).into_response()),
        Ok(None) => Ok(StatusCode::NO_CONTENT.into_response()),
        Err(e @ VoiceError::Config(_)) => Err((StatusCode::SERVICE_UNAVAILABLE, e.to_string())),
        Err(e) => {
            warn!(error = %e, "tts request failed");
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}
