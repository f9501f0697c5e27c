//! Unified error handling with Sentry integration.
//!
//! Provides a unified `AppError` type that captures server-side errors to
//! Sentry before responding to the client with a JSON body
//! `{"error": "..."}`. All route handlers return `Result<T, AppError>`.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::db::RepositoryError;
use crate::services::{AssistantError, AuthError, CartError, CatalogError, OrderError};

/// Application-level error type for the storefront.
#[derive(Debug, Error)]
pub enum AppError {
    /// Database operation failed.
    #[error("Database error: {0}")]
    Database(#[from] RepositoryError),

    /// Authentication operation failed.
    #[error("Auth error: {0}")]
    Auth(#[from] AuthError),

    /// Catalog operation failed.
    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// Cart operation failed.
    #[error("Cart error: {0}")]
    Cart(#[from] CartError),

    /// Order operation failed.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// Assistant upstream failed.
    #[error("Assistant error: {0}")]
    Assistant(#[from] AssistantError),

    /// Resource not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// User is not authenticated.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// User is authenticated but not allowed.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Bad request from client.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limited.
    #[error("Rate limited")]
    RateLimited,

    /// Internal server error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining_attempts: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry_after_seconds: Option<u64>,
}

impl AppError {
    /// HTTP status for this error.
    #[must_use]
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Auth(err) => match err {
                AuthError::InvalidEmail(_)
                | AuthError::InvalidInput(_)
                | AuthError::WeakPassword(_)
                | AuthError::CodeExpired
                | AuthError::InvalidCode { .. } => StatusCode::BAD_REQUEST,
                AuthError::InvalidCredentials
                | AuthError::UserNotFound
                | AuthError::LoginExpired => StatusCode::UNAUTHORIZED,
                AuthError::UserAlreadyExists => StatusCode::CONFLICT,
                AuthError::AttemptsExhausted => StatusCode::TOO_MANY_REQUESTS,
                AuthError::CodeDelivery(_) => StatusCode::BAD_GATEWAY,
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            Self::Catalog(err) => match err {
                CatalogError::NotFound => StatusCode::NOT_FOUND,
                CatalogError::Invalid(_) => StatusCode::BAD_REQUEST,
                CatalogError::Conflict(_) => StatusCode::CONFLICT,
                CatalogError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Cart(err) => match err {
                CartError::InvalidQuantity { .. } | CartError::TotalTooLarge => {
                    StatusCode::BAD_REQUEST
                }
                CartError::ProductNotFound | CartError::ItemNotFound => StatusCode::NOT_FOUND,
                CartError::ProductUnavailable(_) | CartError::InsufficientStock { .. } => {
                    StatusCode::CONFLICT
                }
                CartError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Order(err) => match err {
                OrderError::EmptyCart | OrderError::Invalid(_) => StatusCode::BAD_REQUEST,
                OrderError::ProductUnavailable(_)
                | OrderError::InsufficientStock { .. }
                | OrderError::InvalidTransition { .. } => StatusCode::CONFLICT,
                OrderError::NotFound => StatusCode::NOT_FOUND,
                OrderError::Repository(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Assistant(err) => match err {
                AssistantError::Disabled => StatusCode::SERVICE_UNAVAILABLE,
                AssistantError::InvalidInput(_) => StatusCode::BAD_REQUEST,
                AssistantError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
                AssistantError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
                AssistantError::Http(_)
                | AssistantError::Api { .. }
                | AssistantError::Unauthorized(_)
                | AssistantError::Parse(_)
                | AssistantError::EmptyReply => StatusCode::BAD_GATEWAY,
            },
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
        }
    }

    /// Client-facing message. Server-side details are never exposed.
    fn public_message(&self) -> String {
        match self {
            Self::Database(_) | Self::Internal(_) => "Internal server error".to_string(),
            Self::Auth(err) => match err {
                AuthError::InvalidCredentials | AuthError::UserNotFound => {
                    "Invalid credentials".to_string()
                }
                AuthError::UserAlreadyExists => {
                    "An account with this email already exists".to_string()
                }
                AuthError::InvalidEmail(_) => "Invalid email address".to_string(),
                AuthError::WeakPassword(msg) | AuthError::InvalidInput(msg) => msg.clone(),
                AuthError::CodeDelivery(_) => {
                    "Could not send the verification code, please try again".to_string()
                }
                AuthError::Repository(_) | AuthError::PasswordHash => {
                    "Internal server error".to_string()
                }
                other => other.to_string(),
            },
            Self::Catalog(CatalogError::Repository(_))
            | Self::Cart(CartError::Repository(_))
            | Self::Order(OrderError::Repository(_)) => "Internal server error".to_string(),
            Self::Catalog(err) => err.to_string(),
            Self::Cart(err) => err.to_string(),
            Self::Order(err) => err.to_string(),
            Self::Assistant(err) => match err {
                AssistantError::Disabled => "The shopping assistant is unavailable".to_string(),
                AssistantError::InvalidInput(msg) => msg.clone(),
                AssistantError::RateLimited(_) => {
                    "The shopping assistant is busy, please try again shortly".to_string()
                }
                _ => "The shopping assistant could not answer right now".to_string(),
            },
            Self::NotFound(msg)
            | Self::Unauthorized(msg)
            | Self::Forbidden(msg)
            | Self::BadRequest(msg) => msg.clone(),
            Self::RateLimited => "Too many requests".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Capture server errors to Sentry
        if status.is_server_error() {
            let event_id = sentry::capture_error(&self);
            tracing::error!(
                error = %self,
                sentry_event_id = %event_id,
                "Request error"
            );
        }

        let body = ErrorBody {
            error: self.public_message(),
            remaining_attempts: match &self {
                Self::Auth(AuthError::InvalidCode { remaining }) => Some(*remaining),
                _ => None,
            },
            retry_after_seconds: match &self {
                Self::Assistant(AssistantError::RateLimited(seconds)) => Some(*seconds),
                _ => None,
            },
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for `AppError`.
pub type Result<T> = std::result::Result<T, AppError>;

/// Set the Sentry user context from a user ID.
///
/// Call this after successful authentication to associate errors with users.
pub fn set_sentry_user(user_id: &impl ToString, email: Option<&str>) {
    sentry::configure_scope(|scope| {
        scope.set_user(Some(sentry::User {
            id: Some(user_id.to_string()),
            email: email.map(String::from),
            ..Default::default()
        }));
    });
}

/// Clear the Sentry user context.
///
/// Call this on logout to stop associating errors with the user.
pub fn clear_sentry_user() {
    sentry::configure_scope(|scope| {
        scope.set_user(None);
    });
}

#[cfg(test)]
mod tests {
    use apothecary_core::OrderStatus;

    use super::*;

    async fn body_json(err: AppError) -> (StatusCode, serde_json::Value) {
        let response = err.into_response();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("read body");
        (status, serde_json::from_slice(&bytes).expect("json body"))
    }

    #[test]
    fn test_app_error_display() {
        let err = AppError::NotFound("product-123".to_string());
        assert_eq!(err.to_string(), "Not found: product-123");

        let err = AppError::BadRequest("invalid input".to_string());
        assert_eq!(err.to_string(), "Bad request: invalid input");
    }

    #[test]
    fn test_two_factor_status_codes() {
        assert_eq!(
            AppError::from(AuthError::LoginExpired).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::from(AuthError::CodeExpired).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::InvalidCode { remaining: 2 }).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(AuthError::AttemptsExhausted).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_domain_status_codes() {
        assert_eq!(
            AppError::from(AuthError::UserAlreadyExists).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(CatalogError::Conflict("slug taken".to_string())).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(CartError::ItemNotFound).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(OrderError::EmptyCart).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(OrderError::InvalidTransition {
                from: OrderStatus::Delivered,
                to: OrderStatus::Cancelled,
            })
            .status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::from(AssistantError::Disabled).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(AssistantError::RateLimited(30)).status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::from(AssistantError::EmptyReply).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Forbidden("admins only".to_string()).status(),
            StatusCode::FORBIDDEN
        );
    }

    #[tokio::test]
    async fn test_invalid_code_body_reports_remaining_attempts() {
        let (status, body) = body_json(AuthError::InvalidCode { remaining: 3 }.into()).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["remaining_attempts"], 3);
        assert!(
            body["error"]
                .as_str()
                .is_some_and(|e| e.contains("3 attempts remaining"))
        );
    }

    #[tokio::test]
    async fn test_internal_details_are_hidden() {
        let (status, body) = body_json(AppError::Database(RepositoryError::DataCorruption(
            "negative stock in row 7".to_string(),
        )))
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("remaining_attempts").is_none());
    }

    #[tokio::test]
    async fn test_insufficient_stock_names_product() {
        let (status, body) = body_json(
            OrderError::InsufficientStock {
                product_name: "Vitamin D3".to_string(),
                requested: 4,
                available: 1,
            }
            .into(),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(body["error"].as_str().is_some_and(|e| e.contains("Vitamin D3")));
    }
}
