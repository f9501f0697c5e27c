//! Client for an OpenAI-compatible chat-completions endpoint.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::ExposeSecret;
use tracing::instrument;

use crate::config::AssistantConfig;

use super::error::{ApiErrorResponse, AssistantError};
use super::types::{ChatRequest, ChatResponse, Message};

const DEFAULT_MAX_TOKENS: u32 = 600;
const TEMPERATURE: f32 = 0.3;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Chat-completions client. Cheap to clone.
#[derive(Clone)]
pub struct AssistantClient {
    inner: Arc<AssistantClientInner>,
}

struct AssistantClientInner {
    client: reqwest::Client,
    api_url: String,
    model: String,
}

impl std::fmt::Debug for AssistantClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssistantClient")
            .field("api_url", &self.inner.api_url)
            .field("model", &self.inner.model)
            .finish_non_exhaustive()
    }
}

impl AssistantClient {
    /// Create a new client.
    ///
    /// # Errors
    ///
    /// Returns `AssistantError::Configuration` if the API key is not a valid
    /// header value or the HTTP client cannot be built.
    pub fn new(config: &AssistantConfig) -> Result<Self, AssistantError> {
        let mut auth = HeaderValue::from_str(&format!("Bearer {}", config.api_key.expose_secret()))
            .map_err(|_| AssistantError::Configuration("API key is not a valid header".to_owned()))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(AUTHORIZATION, auth);

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AssistantError::Configuration(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(AssistantClientInner {
                client,
                api_url: config.api_url.clone(),
                model: config.model.clone(),
            }),
        })
    }

    /// Configured model name.
    #[must_use]
    pub fn model(&self) -> &str {
        &self.inner.model
    }

    /// Send a conversation and get a complete response.
    ///
    /// # Errors
    ///
    /// Returns an error if the request fails or the upstream returns an error.
    #[instrument(skip(self, messages), fields(model = %self.inner.model, turns = messages.len()))]
    pub async fn chat(&self, messages: Vec<Message>) -> Result<ChatResponse, AssistantError> {
        let request = ChatRequest {
            model: self.inner.model.clone(),
            messages,
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE,
        };

        let response = self
            .inner
            .client
            .post(&self.inner.api_url)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body = response.text().await?;
            serde_json::from_str(&body)
                .map_err(|e| AssistantError::Parse(format!("Failed to parse response: {e}")))
        } else {
            Err(handle_error_status(status, response).await)
        }
    }
}

/// Map an error status to an `AssistantError`.
async fn handle_error_status(
    status: reqwest::StatusCode,
    response: reqwest::Response,
) -> AssistantError {
    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
        let retry_after = response
            .headers()
            .get("Retry-After")
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.parse().ok())
            .unwrap_or(60);
        return AssistantError::RateLimited(retry_after);
    }

    if status == reqwest::StatusCode::UNAUTHORIZED {
        return AssistantError::Unauthorized("Invalid API key".to_string());
    }

    match response.text().await {
        Ok(body) => AssistantError::Api {
            status: status.as_u16(),
            message: error_message(&body),
        },
        Err(e) => AssistantError::Http(e),
    }
}

/// Extract the upstream's message from an error body, falling back to the raw body.
fn error_message(body: &str) -> String {
    serde_json::from_str::<ApiErrorResponse>(body).map_or_else(
        |_| body.chars().take(500).collect(),
        |api_error| api_error.error.message,
    )
}
