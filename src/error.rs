use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::images::sanitize::sanitize_provider_text;

#[derive(Debug, Error)]
pub enum AppError {
    /// Rejected before any external call
    #[error("{0}")]
    BadRequest(String),

    #[error("Unauthorized")]
    Unauthorized,

    #[error("Forbidden")]
    Forbidden,

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("{0}")]
    Conflict(String),

    #[error("Insufficient credits")]
    InsufficientCredits,

    /// Provider answered, but without any image part
    #[error("The image engine did not return an image")]
    NoImage { description: Option<String> },

    /// Upstream provider failure; the message is shown after sanitization
    #[error("{0}")]
    Provider(String),

    #[error("{0}")]
    Misconfigured(&'static str),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientCredits => StatusCode::PAYMENT_REQUIRED,
            AppError::NoImage { .. } => StatusCode::BAD_GATEWAY,
            AppError::Provider(_)
            | AppError::Misconfigured(_)
            | AppError::Database(_)
            | AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to hand to the client.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Database(_) | AppError::Other(_) => "Internal server error".to_string(),
            other => sanitize_provider_text(&other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match &self {
            AppError::Database(_) | AppError::Other(_) | AppError::Misconfigured(_) => {
                tracing::error!("internal error: {:#}", self);
            }
            AppError::Provider(_) | AppError::NoImage { .. } => {
                tracing::warn!("image engine error: {}", self);
            }
            AppError::Unauthorized | AppError::Forbidden => {
                tracing::info!("authorization error: {}", self);
            }
            _ => {
                tracing::debug!("client error: {}", self);
            }
        }

        let status = self.status_code();
        let message = self.user_message();
        let body = match self {
            AppError::NoImage { description } => json!({
                "error": message,
                "description": description.map(|d| sanitize_provider_text(&d)),
            }),
            _ => json!({ "error": message }),
        };
        (status, Json(body)).into_response()
    }
}
