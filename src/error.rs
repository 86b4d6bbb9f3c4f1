// =============================================================================
// API Errors — mapping request-path failures onto HTTP responses
// =============================================================================
//
// Every handler returns `Result<_, ApiError>`. The conversion into a response
// happens in one place so status codes and the `{OK, Resposta}` envelope stay
// uniform across routes.
//
// Upstream (terminal) failures are logged here with their cause; the client
// only ever sees a generic message.
// =============================================================================

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;
use tracing::error;
use utoipa::ToSchema;

use crate::api::envelope::Envelope;
use crate::terminal::TerminalError;

/// Header names announced to clients in authentication hints.
pub const API_KEY_HEADER: &str = "AcessKey";
pub const API_KEY_FALLBACK_HEADER: &str = "Authorization";

#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing or unknown API key.
    #[error("authentication failed")]
    AuthRejected,

    #[error("invalid request: {message}")]
    Validation {
        field: Option<String>,
        message: String,
    },

    #[error("not found: {0}")]
    NotFound(String),

    /// The terminal could not serve the request. The payload is the cause,
    /// for logs only.
    #[error("terminal unavailable: {0}")]
    UpstreamUnavailable(String),
}

impl ApiError {
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        Self::Validation {
            field: Some(field.to_string()),
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::AuthRejected => StatusCode::UNAUTHORIZED,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::UpstreamUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Self::AuthRejected => "authentication_error",
            Self::Validation { .. } => "validation_error",
            Self::NotFound(_) => "not_found",
            Self::UpstreamUnavailable(_) => "upstream_unavailable",
        }
    }
}

/// Body carried in `Resposta` when `OK` is false.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ErrorDetail {
    pub error: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error = self.kind().to_string();

        let detail = match self {
            Self::AuthRejected => ErrorDetail {
                error,
                message: "Invalid or missing API key".into(),
                field: None,
                hint: Some(format!(
                    "Send a valid key in the '{API_KEY_HEADER}' header \
                     (or '{API_KEY_FALLBACK_HEADER}')"
                )),
            },
            Self::Validation { field, message } => ErrorDetail {
                error,
                message,
                field,
                hint: None,
            },
            Self::NotFound(message) => ErrorDetail {
                error,
                message,
                field: None,
                hint: None,
            },
            Self::UpstreamUnavailable(cause) => {
                error!(cause = %cause, "terminal request failed");
                ErrorDetail {
                    error,
                    message: "Trading terminal is unavailable, try again later".into(),
                    field: None,
                    hint: None,
                }
            }
        };

        (status, Json(Envelope::failure(detail))).into_response()
    }
}

impl From<TerminalError> for ApiError {
    fn from(err: TerminalError) -> Self {
        match err {
            TerminalError::UnknownSymbol(symbol) => Self::NotFound(format!("symbol '{symbol}' not found")),
            TerminalError::UnknownTicket(ticket) => Self::NotFound(format!("position {ticket} not found")),
            TerminalError::Rejected(reason) => Self::Validation {
                field: None,
                message: reason,
            },
            other => Self::UpstreamUnavailable(other.to_string()),
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::Validation {
            field: None,
            message: rejection.body_text(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
