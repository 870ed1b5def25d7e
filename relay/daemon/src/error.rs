//! HTTP error mapping
//!
//! Handlers return [`ApiError`]; each variant owns its status code and the
//! plain-text body long-poll clients already know how to show.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use relay_core::{AskError, ParamError};
use thiserror::Error;

/// Why a request was refused
#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed identifiers, cursors, models or parameters
    #[error("{0}")]
    BadRequest(String),

    /// Request body over the configured limit
    #[error("request body too large")]
    PayloadTooLarge,

    /// The model exists but nothing is configured to serve it
    #[error("model not supported")]
    ModelNotSupported,

    /// The daemon is stopping
    #[error("server shutting down")]
    ShuttingDown,
}

impl ApiError {
    /// Status code sent for this error
    #[must_use]
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::ModelNotSupported | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

impl From<ParamError> for ApiError {
    fn from(err: ParamError) -> Self {
        match err {
            ParamError::EmptyChannelId
            | ParamError::ChannelIdTooLong { .. }
            | ParamError::ChannelIdNotAlphanumeric => Self::BadRequest(
                "id cannot be empty; only letters and numbers allowed".to_string(),
            ),
            other => Self::BadRequest(other.to_string()),
        }
    }
}

impl From<AskError> for ApiError {
    fn from(err: AskError) -> Self {
        match err {
            AskError::InvalidParams(e) => e.into(),
            AskError::UnknownModel(_) => Self::BadRequest("unrecognized model".to_string()),
            AskError::ProviderUnavailable(_) => Self::ModelNotSupported,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(status = %status, error = %self, "Request refused");
        } else {
            tracing::debug!(status = %status, error = %self, "Request rejected");
        }
        (status, format!("{self}\n")).into_response()
    }
}
