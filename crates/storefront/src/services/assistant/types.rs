//! Types for the assistant API and its chat-completions upstream.

use serde::{Deserialize, Serialize};

use apothecary_core::ChatRole;

/// A prior turn supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub content: String,
}

/// The assistant's answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AssistantReply {
    pub reply: String,
    /// Model that produced the reply, as reported by the upstream.
    pub model: String,
}

/// A message sent upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    /// `system`, `user`, or `assistant`.
    pub role: &'static str,
    pub content: String,
}

impl Message {
    /// A system message.
    #[must_use]
    pub const fn system(content: String) -> Self {
        Self {
            role: "system",
            content,
        }
    }

    /// A user message.
    #[must_use]
    pub const fn user(content: String) -> Self {
        Self {
            role: "user",
            content,
        }
    }
}

impl From<ChatTurn> for Message {
    fn from(turn: ChatTurn) -> Self {
        let role = match turn.role {
            ChatRole::User => "user",
            ChatRole::Assistant => "assistant",
        };
        Self {
            role,
            content: turn.content,
        }
    }
}

/// Request body for a chat-completions endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Response body of a chat-completions endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ChatResponse {
    /// Model that served the request.
    pub model: String,
    pub choices: Vec<Choice>,
}

/// One completion choice.
#[derive(Debug, Clone, Deserialize)]
pub struct Choice {
    pub message: ResponseMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// The generated message.
#[derive(Debug, Clone, Deserialize)]
pub struct ResponseMessage {
    #[serde(default)]
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if it has any.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.content.as_deref())
            .map(str::trim)
            .filter(|text| !text.is_empty())
    }
}
