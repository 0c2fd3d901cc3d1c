// =============================================================================
// RFC 7807 problem+json responses
// =============================================================================
//
// Every non-success HTTP response flows through here so the wire shape is
// uniform: type, title, status, detail, instance, plus the `code` and
// `trace_id` extensions the UI keys off. Internal errors keep their detail in
// the log only; the body stays generic.
// =============================================================================

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use tracing::error;

use crate::errors::ServiceError;

pub const PROBLEM_CONTENT_TYPE: &str = "application/problem+json";

/// An RFC 7807 problem document.
#[derive(Debug, Clone, Serialize)]
pub struct Problem {
    #[serde(rename = "type")]
    pub type_uri: String,
    pub title: String,
    pub status: u16,
    pub detail: String,
    pub instance: String,
    /// Stable machine-readable code (extension member).
    pub code: String,
    /// Request correlation id (extension member).
    pub trace_id: String,
}

impl Problem {
    pub fn new(
        status: StatusCode,
        code: &str,
        title: impl Into<String>,
        detail: impl Into<String>,
        instance: impl Into<String>,
        trace_id: impl Into<String>,
    ) -> Self {
        Self {
            type_uri: format!("urn:isx-pulse:problem:{}", code.to_ascii_lowercase()),
            title: title.into(),
            status: status.as_u16(),
            detail: detail.into(),
            instance: instance.into(),
            code: code.to_string(),
            trace_id: trace_id.into(),
        }
    }

    /// Map a service error to its problem document.
    pub fn from_service_error(err: &ServiceError, instance: &str, trace_id: &str) -> Self {
        let status = match err {
            ServiceError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            ServiceError::LicenseMachineMismatch | ServiceError::LicenseExpired => {
                StatusCode::UNAUTHORIZED
            }
            ServiceError::PipelineNotFound(_)
            | ServiceError::FileNotFound(_)
            | ServiceError::LicenseNotFound => StatusCode::NOT_FOUND,
            ServiceError::AlreadyRunning
            | ServiceError::PipelineNotRunning(_)
            | ServiceError::LicenseAlreadyActivated => StatusCode::CONFLICT,
            ServiceError::RegistryUnreachable(_) => StatusCode::BAD_GATEWAY,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let detail = match err {
            ServiceError::Internal(inner) => {
                // Full cause goes to the log, correlated by trace id.
                error!(trace_id, error = %format!("{inner:#}"), "internal error");
                "an internal error occurred".to_string()
            }
            other => other.to_string(),
        };

        Self::new(status, err.code(), title_for(status), detail, instance, trace_id)
    }
}

fn title_for(status: StatusCode) -> &'static str {
    match status {
        StatusCode::BAD_REQUEST => "Invalid request",
        StatusCode::UNAUTHORIZED => "License required",
        StatusCode::NOT_FOUND => "Not found",
        StatusCode::CONFLICT => "Conflict",
        StatusCode::BAD_GATEWAY => "Upstream unavailable",
        _ => "Internal error",
    }
}

impl IntoResponse for Problem {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = serde_json::to_vec(&self).unwrap_or_default();
        (
            status,
            [(header::CONTENT_TYPE, PROBLEM_CONTENT_TYPE)],
            body,
        )
            .into_response()
    }
}

// =============================================================================
// Tests
// =============================================================================
