// SPDX-License-Identifier: MIT
// Copyright 2026 Roland Dreier <roland@rolandd.dev>

//! Application error types with consistent API responses.

use crate::models::Provider;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// Application error type that converts to HTTP responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Authentication required")]
    Unauthorized,

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Popup blocked by browser. Please allow popups for this site.")]
    PopupBlocked,

    /// Code-for-token exchange rejected or unreachable.
    ///
    /// `message` is always redacted: it never carries the client secret,
    /// the authorization code or token values.
    #[error("{provider} token exchange failed ({}): {message}", status_label(.status))]
    TokenExchange {
        provider: Provider,
        status: Option<u16>,
        provider_code: Option<String>,
        message: String,
    },

    #[error("Failed to fetch {provider} profile: {message}")]
    ProfileFetch { provider: Provider, message: String },

    #[error("Could not retrieve {provider} user id (field {field})")]
    MissingProviderId {
        provider: Provider,
        field: &'static str,
    },

    #[error("{0} account already connected")]
    AlreadyConnected(Provider),

    #[error("OAuth state mismatch: {0}")]
    InvalidState(String),

    #[error("Failed to store data point {key}: {message}")]
    DataPointWrite { key: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

fn status_label(status: &Option<u16>) -> String {
    match status {
        Some(code) => format!("HTTP {}", code),
        None => "no response".to_string(),
    }
}

impl AppError {
    /// True for failures that abort a connect attempt before anything is written.
    pub fn is_identity_failure(&self) -> bool {
        matches!(
            self,
            AppError::TokenExchange { .. }
                | AppError::ProfileFetch { .. }
                | AppError::MissingProviderId { .. }
        )
    }
}

/// JSON error response body
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized", None),
            AppError::UnknownProvider(tag) => (
                StatusCode::NOT_FOUND,
                "unknown_provider",
                Some(tag.clone()),
            ),
            AppError::PopupBlocked => (
                StatusCode::BAD_REQUEST,
                "popup_blocked",
                Some(self.to_string()),
            ),
            AppError::TokenExchange { .. } => (
                StatusCode::BAD_GATEWAY,
                "token_exchange_failed",
                Some(self.to_string()),
            ),
            AppError::ProfileFetch { .. } | AppError::MissingProviderId { .. } => (
                StatusCode::BAD_GATEWAY,
                "profile_fetch_failed",
                Some(self.to_string()),
            ),
            AppError::AlreadyConnected(_) => (
                StatusCode::CONFLICT,
                "already_connected",
                Some(self.to_string()),
            ),
            AppError::InvalidState(msg) => {
                (StatusCode::BAD_REQUEST, "invalid_state", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", Some(msg.clone())),
            AppError::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, "bad_request", Some(msg.clone()))
            }
            AppError::DataPointWrite { .. } | AppError::Database(_) => {
                tracing::error!(error = %self, "Database error");
                (StatusCode::INTERNAL_SERVER_ERROR, "database_error", None)
            }
            AppError::Internal(err) => {
                tracing::error!(error = %err, "Internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for handlers
pub type Result<T> = std::result::Result<T, AppError>;
