// =============================================================================
// HTTP middleware — request correlation, license gate, input validation
// =============================================================================

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::app_state::AppState;

use super::problem::Problem;

// =============================================================================
// Request correlation
// =============================================================================

/// Per-request correlation id, inserted by [`request_id`] and echoed in the
/// `X-Request-ID` response header and every problem body.
#[derive(Debug, Clone)]
pub struct RequestId(pub String);

/// Fetch the correlation id from request extensions (empty if the middleware
/// did not run, e.g. in unit tests).
pub fn trace_id_of(req: &Request) -> String {
    req.extensions()
        .get::<RequestId>()
        .map(|id| id.0.clone())
        .unwrap_or_default()
}

pub async fn request_id(mut req: Request, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    req.extensions_mut().insert(RequestId(id.clone()));

    debug!(trace_id = %id, method = %req.method(), path = %req.uri().path(), "request");

    let mut response = next.run(req).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

// =============================================================================
// License gate
// =============================================================================

/// Route middleware protecting everything outside the public allow-list.
/// Failure is a 401 problem+json carrying the license error code.
pub async fn license_gate(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let (valid, kind) = state.license.validate().await;
    if valid {
        return next.run(req).await;
    }

    let trace_id = trace_id_of(&req);
    let instance = req.uri().path().to_string();
    warn!(trace_id = %trace_id, path = %instance, code = kind.code(), "license gate rejected request");

    Problem::new(
        StatusCode::UNAUTHORIZED,
        kind.code(),
        "License required",
        "a valid license is required for this endpoint",
        instance,
        trace_id,
    )
    .into_response()
}

// =============================================================================
// Input validation
// =============================================================================

/// Ticker symbols: 1–6 uppercase ASCII alphanumerics.
pub fn valid_ticker(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 6
        && raw.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
}

/// Pipeline ids are generated by the manager; anything longer than 64 chars
/// or outside its alphabet is rejected before the registry is consulted.
pub fn valid_pipeline_id(raw: &str) -> bool {
    !raw.is_empty()
        && raw.len() <= 64
        && raw
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
}

/// Download filenames must be plain names, not paths.
pub fn valid_filename(raw: &str) -> bool {
    !raw.is_empty()
        && !raw.contains(['/', '\\'])
        && !raw.contains("..")
        && raw.len() <= 128
}

/// Map a download category to its directory and allowed extensions.
pub fn download_category(file_type: &str) -> Option<(&'static str, &'static [&'static str])> {
    match file_type {
        "report" => Some(("reports", &["csv", "json"])),
        "workbook" => Some(("downloads", &["xlsx"])),
        _ => None,
    }
}

/// Convenience guard shared by the data handlers.
pub fn allowed_extension(filename: &str, allowed: &[&str]) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| allowed.contains(&ext))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticker_validation() {
        assert!(valid_ticker("BBOB"));
        assert!(valid_ticker("TASC1"));
        assert!(!valid_ticker(""));
        assert!(!valid_ticker("bbob"));
        assert!(!valid_ticker("TOOLONGTICKER"));
        assert!(!valid_ticker("BB-OB"));
    }

    #[test]
    fn pipeline_id_validation() {
        assert!(valid_pipeline_id("full-20240315-101530.250"));
        assert!(!valid_pipeline_id(""));
        assert!(!valid_pipeline_id(&"x".repeat(65)));
        assert!(!valid_pipeline_id("id with spaces"));
    }

    #[test]
    fn filename_validation_blocks_traversal() {
        assert!(valid_filename("isx_daily_2024_03_15.csv"));
        assert!(!valid_filename("../license.dat"));
        assert!(!valid_filename("a/b.csv"));
        assert!(!valid_filename("a\\b.csv"));
        assert!(!valid_filename(""));
    }

    #[test]
    fn download_categories_are_a_closed_set() {
        assert!(download_category("report").is_some());
        assert!(download_category("workbook").is_some());
        assert!(download_category("etc").is_none());

        let (_, exts) = download_category("report").unwrap();
        assert!(allowed_extension("ticker_summary.json", exts));
        assert!(allowed_extension("isx_combined_data.csv", exts));
        assert!(!allowed_extension("evil.exe", exts));
        assert!(!allowed_extension("no_extension", exts));
    }
}
