//! Shopping assistant chat endpoint.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::instrument;

use crate::error::Result;
use crate::services::AssistantService;
use crate::services::assistant::ChatInput;
use crate::services::assistant::types::{AssistantReply, ChatTurn};
use crate::state::AppState;

/// Chat body. The client keeps the conversation and sends it back each time.
#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub history: Vec<ChatTurn>,
    pub language: Option<String>,
}

/// POST /api/assistant/chat
#[instrument(skip(state, req), fields(history = req.history.len()))]
pub async fn chat(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<AssistantReply>> {
    let input = ChatInput::new(&req.message, req.history, req.language.as_deref())?;
    let reply = AssistantService::new(state.assistant()).chat(input).await?;
    Ok(Json(reply))
}
