// =============================================================================
// Data Endpoints — derived datasets served from the reports tree
// =============================================================================
//
// These handlers read whatever the last pipeline run left on disk. Readers
// tolerate concurrent rewrites: the exporters replace files atomically, and a
// read that still fails surfaces as a problem rather than a partial payload.
// =============================================================================

use std::path::Path;
use std::sync::Arc;

use axum::{
    extract::{Extension, Path as UrlPath, Query, State},
    http::{header, StatusCode, Uri},
    response::{IntoResponse, Response},
    Json,
};
use serde::Deserialize;
use serde_json::json;

use crate::analysis::{compute_movers, MoverPeriod};
use crate::app_state::AppState;
use crate::domain::{ticker_history_name, TickerSummary};
use crate::errors::ServiceError;
use crate::export;

use super::middleware::{
    allowed_extension, download_category, valid_filename, valid_ticker, RequestId,
};
use super::problem::Problem;

fn problem(err: ServiceError, uri: &Uri, rid: &RequestId) -> Response {
    Problem::from_service_error(&err, uri.path(), &rid.0).into_response()
}

// =============================================================================
// File listings
// =============================================================================

fn describe_files(dir: &Path) -> Vec<serde_json::Value> {
    let mut out = Vec::new();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return out;
    };
    for entry in entries.flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        let modified = meta
            .modified()
            .ok()
            .map(chrono::DateTime::<chrono::Utc>::from)
            .map(|t| t.to_rfc3339());
        out.push(json!({
            "name": entry.file_name().to_string_lossy(),
            "size_bytes": meta.len(),
            "modified": modified,
        }));
    }
    out.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
    out
}

/// GET /api/data/reports — flat listing of the reports tree.
pub async fn reports(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(describe_files(&state.paths.reports))
}

/// GET /api/data/files — report and workbook files grouped by category.
pub async fn files(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let mut daily = Vec::new();
    let mut histories = Vec::new();
    let mut summaries = Vec::new();
    let mut indexes = Vec::new();
    let mut combined = Vec::new();
    let mut other = Vec::new();

    for file in describe_files(&state.paths.reports) {
        let name = file["name"].as_str().unwrap_or_default().to_string();
        if name.starts_with("isx_daily_") {
            daily.push(file);
        } else if name.ends_with("_trading_history.csv") {
            histories.push(file);
        } else if name.starts_with("ticker_summary") || name.starts_with("market_movers") {
            summaries.push(file);
        } else if name == "indexes.csv" {
            indexes.push(file);
        } else if name == "isx_combined_data.csv" {
            combined.push(file);
        } else {
            other.push(file);
        }
    }

    Json(json!({
        "daily": daily,
        "ticker_history": histories,
        "summary": summaries,
        "indexes": indexes,
        "combined": combined,
        "workbooks": describe_files(&state.paths.downloads),
        "other": other,
    }))
}

// =============================================================================
// Datasets
// =============================================================================

/// GET /api/data/tickers — the ticker summary as the dashboard consumes it.
pub async fn tickers(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
) -> Response {
    let json_path = state.paths.ticker_summary_json();
    if json_path.exists() {
        match std::fs::read_to_string(&json_path)
            .map_err(anyhow::Error::from)
            .and_then(|raw| Ok(serde_json::from_str::<Vec<TickerSummary>>(&raw)?))
        {
            Ok(summaries) => return Json(summaries).into_response(),
            Err(e) => return problem(ServiceError::Internal(e), &uri, &rid),
        }
    }

    // No summary yet; derive one on the fly when the combined set exists.
    let combined = state.paths.combined_csv();
    if !combined.exists() {
        return Json(Vec::<TickerSummary>::new()).into_response();
    }
    match export::read_records(&combined) {
        Ok(dense) => Json(crate::analysis::build_summaries(&dense)).into_response(),
        Err(e) => problem(ServiceError::Internal(e), &uri, &rid),
    }
}

/// GET /api/data/indices — the ISX60/ISX15 series.
pub async fn indices(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
) -> Response {
    let path = state.paths.indexes_csv();
    if !path.exists() {
        return Json(json!([])).into_response();
    }
    match export::read_indexes(&path) {
        Ok(series) => Json(series).into_response(),
        Err(e) => problem(ServiceError::Internal(e), &uri, &rid),
    }
}

// =============================================================================
// Market movers
// =============================================================================

#[derive(Deserialize)]
pub struct MoversQuery {
    period: Option<String>,
    limit: Option<usize>,
    #[serde(rename = "minVolume")]
    min_volume: Option<u64>,
}

/// GET /api/data/market-movers?period=&limit=&minVolume=
pub async fn market_movers(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Query(query): Query<MoversQuery>,
) -> Response {
    let period = match query.period.as_deref() {
        None => MoverPeriod::Daily,
        Some(raw) => match MoverPeriod::parse(raw) {
            Some(period) => period,
            None => {
                return problem(
                    ServiceError::InvalidInput(format!("unknown period {raw:?}")),
                    &uri,
                    &rid,
                );
            }
        },
    };
    let limit = query.limit.unwrap_or(10).min(100);
    let min_volume = query.min_volume.unwrap_or(0);

    let combined = state.paths.combined_csv();
    if !combined.exists() {
        return problem(
            ServiceError::FileNotFound("isx_combined_data.csv".into()),
            &uri,
            &rid,
        );
    }

    match export::read_records(&combined) {
        Ok(dense) => Json(compute_movers(&dense, period, limit, min_volume)).into_response(),
        Err(e) => problem(ServiceError::Internal(e), &uri, &rid),
    }
}

// =============================================================================
// Ticker chart
// =============================================================================

/// GET /api/data/ticker/{ticker}/chart — OHLCV arrays for one symbol.
pub async fn ticker_chart(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    UrlPath(ticker): UrlPath<String>,
) -> Response {
    if !valid_ticker(&ticker) {
        return problem(
            ServiceError::InvalidInput(format!("malformed ticker symbol {ticker:?}")),
            &uri,
            &rid,
        );
    }

    let path = state.paths.reports.join(ticker_history_name(&ticker));
    if !path.exists() {
        return problem(ServiceError::FileNotFound(ticker), &uri, &rid);
    }

    let rows = match export::read_records(&path) {
        Ok(rows) => rows,
        Err(e) => return problem(ServiceError::Internal(e), &uri, &rid),
    };

    let mut dates = Vec::with_capacity(rows.len());
    let mut open = Vec::with_capacity(rows.len());
    let mut high = Vec::with_capacity(rows.len());
    let mut low = Vec::with_capacity(rows.len());
    let mut close = Vec::with_capacity(rows.len());
    let mut volume = Vec::with_capacity(rows.len());
    let mut trading = Vec::with_capacity(rows.len());
    for row in &rows {
        dates.push(row.date.format("%Y-%m-%d").to_string());
        open.push(row.open_price);
        high.push(row.high_price);
        low.push(row.low_price);
        close.push(row.close_price);
        volume.push(row.volume);
        trading.push(row.trading_status);
    }

    let company = rows.first().map(|r| r.company_name.clone()).unwrap_or_default();
    Json(json!({
        "ticker": rows.first().map(|r| r.symbol.clone()).unwrap_or_default(),
        "company_name": company,
        "dates": dates,
        "open": open,
        "high": high,
        "low": low,
        "close": close,
        "volume": volume,
        "trading_status": trading,
    }))
    .into_response()
}

// =============================================================================
// Download
// =============================================================================

/// GET /api/data/download/{type}/{filename} — stream one file.
pub async fn download(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    UrlPath((file_type, filename)): UrlPath<(String, String)>,
) -> Response {
    let Some((subdir, extensions)) = download_category(&file_type) else {
        return problem(
            ServiceError::InvalidInput(format!("unknown download type {file_type:?}")),
            &uri,
            &rid,
        );
    };
    if !valid_filename(&filename) || !allowed_extension(&filename, extensions) {
        return problem(
            ServiceError::InvalidInput("malformed or disallowed filename".into()),
            &uri,
            &rid,
        );
    }

    let path = state.paths.root.join(subdir).join(&filename);
    let bytes = match tokio::fs::read(&path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return problem(ServiceError::FileNotFound(filename), &uri, &rid);
        }
        Err(e) => {
            return problem(
                ServiceError::Internal(anyhow::Error::from(e)),
                &uri,
                &rid,
            );
        }
    };

    let content_type = match filename.rsplit_once('.').map(|(_, ext)| ext) {
        Some("csv") => "text/csv; charset=utf-8",
        Some("json") => "application/json",
        Some("xlsx") => "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        _ => "application/octet-stream",
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{filename}\""),
            ),
        ],
        bytes,
    )
        .into_response()
}

// =============================================================================
// Tests
// =============================================================================
