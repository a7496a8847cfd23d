//! Error types for the router simulator.
//!
//! Two layers: [`StoreError`] for persistence failures and conflicts, and
//! [`DeviceError`] for the outcomes the request layer maps to HTTP status
//! codes. Both derive `thiserror::Error`, so `?` converts between them.

use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;
use tracing::error;

use crate::models::Protocol;

/// Errors raised by a [`crate::store::Store`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(String),

    /// Another router already holds this address.
    #[error("IP address {0} is already assigned")]
    IpConflict(String),

    /// The router's connected flag was already set.
    #[error("router {0} is already connected")]
    AlreadyConnected(String),

    /// The unordered router pair is already linked.
    #[error("routers {0} and {1} are already connected")]
    ConnectionConflict(u64, u64),

    #[error("router {router_id} has duplicate port {number}/{protocol}")]
    DuplicatePort {
        router_id: u64,
        number: u16,
        protocol: Protocol,
    },

    /// Error reading or writing the snapshot file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Error encoding or decoding the snapshot file.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors returned by router, port, connection and packet operations.
///
/// Simulated network failures are not errors; they come back as a
/// [`crate::models::PacketResult`] with a `failed` status.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Malformed input. `field` names the offending request field.
    #[error("invalid {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// Request body that is not JSON or does not match the expected shape.
    /// `field` is the JSON path of the offending value, when known.
    #[error("invalid request body: {message}")]
    InvalidBody {
        field: Option<String>,
        message: String,
    },

    #[error("{0} not found")]
    NotFound(String),

    #[error("router {0} is already connected")]
    AlreadyConnected(String),

    #[error("source router {0} is not connected")]
    NotConnected(String),

    #[error("connection between {0} and {1} already exists")]
    ConnectionExists(String, String),

    #[error("store error: {0}")]
    Store(StoreError),
}

impl DeviceError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } | Self::InvalidBody { .. } => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyConnected(_) | Self::NotConnected(_) | Self::ConnectionExists(..) => {
                StatusCode::CONFLICT
            }
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for DeviceError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            StoreError::AlreadyConnected(ip) => Self::AlreadyConnected(ip),
            StoreError::ConnectionConflict(a, b) => {
                Self::ConnectionExists(format!("router {a}"), format!("router {b}"))
            }
            other => Self::Store(other),
        }
    }
}

impl From<JsonRejection> for DeviceError {
    fn from(rejection: JsonRejection) -> Self {
        let text = rejection.body_text();
        // Data errors read "<prefix>: <path>: <serde message>".
        let detail = text.split_once(": ").map_or(text.as_str(), |(_, rest)| rest);
        let (field, message) = match detail.split_once(": ") {
            Some((path, message))
                if matches!(rejection, JsonRejection::JsonDataError(_))
                    && !path.is_empty()
                    && path != "."
                    && !path.contains(char::is_whitespace) =>
            {
                (Some(path.to_string()), message.to_string())
            }
            _ => (None, detail.to_string()),
        };
        Self::InvalidBody { field, message }
    }
}

impl IntoResponse for DeviceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = match &self {
            Self::Validation { field, .. } => serde_json::json!({
                "error": self.to_string(),
                "field": field,
            }),
            Self::InvalidBody {
                field: Some(field), ..
            } => serde_json::json!({
                "error": self.to_string(),
                "field": field,
            }),
            _ => serde_json::json!({ "error": self.to_string() }),
        };

        (status, Json(body)).into_response()
    }
}
