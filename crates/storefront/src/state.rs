//! Application state shared across handlers.

use std::sync::Arc;

use sqlx::PgPool;

use crate::config::StorefrontConfig;
use crate::services::{
    AssistantClient, AssistantError, CodeHasher, EmailService, ProductCache, TwoFactorPolicy,
};

/// Error building application state from configuration.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("invalid SMTP configuration: {0}")]
    Email(#[from] lettre::transport::smtp::Error),
    #[error("invalid assistant configuration: {0}")]
    Assistant(#[from] AssistantError),
    #[error("session secret cannot key the code hasher")]
    CodeKey,
}

/// Application state shared across all handlers.
///
/// This struct is cheaply cloneable via `Arc` and provides access to
/// shared resources like database connections and configuration.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: StorefrontConfig,
    pool: PgPool,
    cache: ProductCache,
    email: Option<EmailService>,
    assistant: Option<AssistantClient>,
    code_hasher: CodeHasher,
    two_factor: TwoFactorPolicy,
}

impl AppState {
    /// Create a new application state.
    ///
    /// # Arguments
    ///
    /// * `config` - Storefront configuration
    /// * `pool` - `PostgreSQL` connection pool
    ///
    /// # Errors
    ///
    /// Returns an error if the SMTP or assistant configuration is unusable.
    pub fn new(config: StorefrontConfig, pool: PgPool) -> Result<Self, StateError> {
        let email = config.email.as_ref().map(EmailService::new).transpose()?;
        if email.is_none() {
            tracing::warn!("SMTP not configured - two-factor codes will be logged (dev mode)");
        }

        let assistant = config
            .assistant
            .as_ref()
            .map(AssistantClient::new)
            .transpose()?;
        if assistant.is_none() {
            tracing::info!("ASSISTANT_API_KEY not set - shopping assistant disabled");
        }

        let code_hasher =
            CodeHasher::new(&config.session_secret).map_err(|_| StateError::CodeKey)?;
        let two_factor = TwoFactorPolicy::from(config.two_factor);
        let cache = ProductCache::new(config.product_cache_ttl);

        Ok(Self {
            inner: Arc::new(AppStateInner {
                config,
                pool,
                cache,
                email,
                assistant,
                code_hasher,
                two_factor,
            }),
        })
    }

    /// Get a reference to the storefront configuration.
    #[must_use]
    pub fn config(&self) -> &StorefrontConfig {
        &self.inner.config
    }

    /// Get a reference to the database connection pool.
    #[must_use]
    pub fn pool(&self) -> &PgPool {
        &self.inner.pool
    }

    /// Get the catalog read cache.
    #[must_use]
    pub fn cache(&self) -> &ProductCache {
        &self.inner.cache
    }

    /// Get the email service, if SMTP is configured.
    #[must_use]
    pub fn email_service(&self) -> Option<&EmailService> {
        self.inner.email.as_ref()
    }

    /// Get the assistant client, if an API key is configured.
    #[must_use]
    pub fn assistant(&self) -> Option<&AssistantClient> {
        self.inner.assistant.as_ref()
    }

    /// Get the two-factor code hasher.
    #[must_use]
    pub fn code_hasher(&self) -> &CodeHasher {
        &self.inner.code_hasher
    }

    /// Get the two-factor timing rules.
    #[must_use]
    pub fn two_factor(&self) -> TwoFactorPolicy {
        self.inner.two_factor
    }
}
