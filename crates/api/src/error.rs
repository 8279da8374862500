use crate::response::ApiResponse;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use mtgate_core::ConnectorError;
use std::time::Duration;

pub const CONNECT_FAILED: &str = "Failed to connect to account";
pub const FETCH_FAILED: &str = "Failed to fetch account data";
pub const DISCONNECT_FAILED: &str = "Failed to disconnect account";

/// A failed call to the upstream connection service.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
}

impl UpstreamError {
    /// Attach the request-level context used in the error envelope.
    pub fn during(self, context: &'static str) -> GatewayError {
        GatewayError::Upstream {
            context,
            source: self,
        }
    }
}

/// Errors returned by the HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Login, password, and server are required")]
    Validation,
    #[error("Invalid request body")]
    BadRequestBody(String),
    #[error("Account not connected")]
    NotFound,
    #[error("{context}: {source}")]
    Upstream {
        context: &'static str,
        #[source]
        source: UpstreamError,
    },
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BadRequestBody(_) => StatusCode::BAD_REQUEST,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::Upstream { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = match &self {
            Self::Validation | Self::NotFound => ApiResponse::failure(self.to_string(), None),
            Self::BadRequestBody(detail) => {
                ApiResponse::failure(self.to_string(), Some(detail.clone()))
            }
            Self::Upstream { context, source } => {
                tracing::error!(error = %source, "{}", context);
                ApiResponse::failure(*context, Some(source.to_string()))
            }
        };
        if status.is_client_error() {
            tracing::warn!(status = status.as_u16(), "{}", self);
        }
        (status, Json(body)).into_response()
    }
}
