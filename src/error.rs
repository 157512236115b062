// Error handling module
// Defines the error taxonomy for calls to the auth API

use std::collections::HashMap;

use thiserror::Error;

/// Message shown for failures that carry no service-provided text
pub const UNEXPECTED_ERROR_MESSAGE: &str = "An unexpected error occurred. Please try again.";

/// Errors that can occur when talking to the auth API
#[derive(Error, Debug)]
pub enum ApiError {
    /// Local input rejected before any request was made
    #[error("Validation error: {field}: {message}")]
    Validation { field: String, message: String },

    /// The service answered but reported failure
    #[error("Auth API error: {status} - {message}")]
    Service {
        status: u16,
        message: String,
        errors: Option<HashMap<String, Vec<String>>>,
    },

    /// Network failure, timeout or an unexpected response shape
    #[error("Transport error: {0}")]
    Transport(String),
}

impl ApiError {
    /// Text suitable for a transient notice in the UI
    pub fn user_message(&self) -> &str {
        match self {
            ApiError::Validation { message, .. } => message,
            ApiError::Service { message, .. } if !message.is_empty() => message,
            ApiError::Service { .. } | ApiError::Transport(_) => UNEXPECTED_ERROR_MESSAGE,
        }
    }

    /// Per-field messages reported by the service, if any
    pub fn field_errors(&self) -> Option<&HashMap<String, Vec<String>>> {
        match self {
            ApiError::Service { errors, .. } => errors.as_ref(),
            _ => None,
        }
    }

    /// HTTP status for service-reported errors
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Service { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        let kind = if e.is_timeout() {
            "timeout"
        } else if e.is_connect() {
            "connection_failed"
        } else if e.is_decode() {
            "decode_error"
        } else if e.is_body() {
            "body_error"
        } else {
            "request_error"
        };
        ApiError::Transport(format!("{} (kind: {})", e, kind))
    }
}

/// Result type alias for auth API operations
pub type Result<T> = std::result::Result<T, ApiError>;
