// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// Public endpoints: health/readiness, version, and the license lifecycle (a
// machine without a valid license must still be able to activate one). Every
// other route sits behind the license gate. All failures leave the router as
// RFC 7807 problem+json carrying the request's trace id.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Extension, Json, Query, State},
    http::{StatusCode, Uri},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::info;

use crate::app_state::AppState;
use crate::errors::ServiceError;
use crate::pipeline::stage::StageParams;
use crate::pipeline::{PipelineMode, RunStatus};

use super::data;
use super::middleware::{license_gate, request_id, valid_pipeline_id, RequestId};
use super::problem::Problem;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full router with CORS, request correlation, the license gate on
/// protected routes, and static file fallback for the SPA assets.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let public = Router::new()
        .route("/api/health", get(health))
        .route("/ready", get(ready))
        .route("/live", get(live))
        .route("/api/version", get(version))
        .route("/api/license/status", get(license_status))
        .route("/api/license/activate", post(license_activate))
        .route("/api/license/transfer", post(license_transfer))
        .route("/api/license/heartbeat", post(license_heartbeat));

    let gated = Router::new()
        .route("/api/pipeline/start", post(pipeline_start))
        .route("/api/pipeline/stop", post(pipeline_stop))
        .route("/api/pipeline/status", get(pipeline_status))
        .route("/api/pipeline/pipelines", get(pipeline_list))
        .route("/api/data/reports", get(data::reports))
        .route("/api/data/tickers", get(data::tickers))
        .route("/api/data/indices", get(data::indices))
        .route("/api/data/files", get(data::files))
        .route("/api/data/market-movers", get(data::market_movers))
        .route("/api/data/ticker/:ticker/chart", get(data::ticker_chart))
        .route("/api/data/download/:file_type/:filename", get(data::download))
        .route("/ws", get(crate::ws::handler::ws_handler))
        .route_layer(middleware::from_fn_with_state(state.clone(), license_gate));

    let web_dir = state.config.web_dir.clone();

    public
        .merge(gated)
        .route("/", get(root))
        .fallback_service(ServeDir::new(web_dir))
        .layer(middleware::from_fn(request_id))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Root — SPA or license page
// =============================================================================

async fn root(State(state): State<Arc<AppState>>) -> Response {
    let (valid, _) = state.license.validate().await;
    let page = if valid { "index.html" } else { "license.html" };
    let path = std::path::Path::new(&state.config.web_dir).join(page);

    match tokio::fs::read_to_string(&path).await {
        Ok(html) => Html(html).into_response(),
        Err(_) => Html(format!(
            "<!doctype html><title>ISX Pulse</title><p>UI assets missing; expected {}.</p>",
            path.display()
        ))
        .into_response(),
    }
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.start_time.elapsed().as_secs(),
        "server_time": chrono::Utc::now().to_rfc3339(),
    }))
}

async fn ready(State(state): State<Arc<AppState>>) -> Response {
    if state.paths.reports.is_dir() && state.paths.downloads.is_dir() {
        Json(json!({"status": "ready"})).into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, Json(json!({"status": "not_ready"}))).into_response()
    }
}

async fn live() -> impl IntoResponse {
    Json(json!({"status": "alive"}))
}

async fn version() -> impl IntoResponse {
    Json(json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// License (public)
// =============================================================================

async fn license_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let renewal = state.license.renewal_status();
    let info = state.license.license_info();

    Json(json!({
        "license_status": renewal.license_status,
        "days_left": renewal.days_left,
        "critical": renewal.critical,
        "warning": renewal.warning,
        "key": info.as_ref().map(|i| mask_key(&i.key)),
        "expiry_date": info.as_ref().and_then(|i| i.expiry_date),
        "last_connected": info.as_ref().and_then(|i| i.last_connected),
    }))
}

/// Show only the key's tail in API responses.
fn mask_key(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****-{tail}")
}

#[derive(Deserialize)]
struct ActivateRequest {
    license_key: String,
    #[serde(default)]
    force_transfer: bool,
}

fn parse_body<T: serde::de::DeserializeOwned>(
    body: &serde_json::Value,
    instance: &str,
    trace_id: &str,
) -> Result<T, Response> {
    serde_json::from_value(body.clone()).map_err(|e| {
        Problem::from_service_error(
            &ServiceError::InvalidInput(e.to_string()),
            instance,
            trace_id,
        )
        .into_response()
    })
}

async fn license_activate(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req: ActivateRequest = match parse_body(&body, uri.path(), &rid.0) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if req.license_key.trim().is_empty() {
        return Problem::from_service_error(
            &ServiceError::InvalidInput("license_key must not be empty".into()),
            uri.path(),
            &rid.0,
        )
        .into_response();
    }

    match state.license.activate(req.license_key.trim()).await {
        Ok(info) => {
            info!(trace_id = %rid.0, "license activated via API");
            Json(json!({
                "status": "activated",
                "expiry_date": info.expiry_date,
                "duration": info.duration,
            }))
            .into_response()
        }
        Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
    }
}

async fn license_transfer(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req: ActivateRequest = match parse_body(&body, uri.path(), &rid.0) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    match state
        .license
        .transfer(req.license_key.trim(), req.force_transfer)
        .await
    {
        Ok(info) => Json(json!({
            "status": "transferred",
            "expiry_date": info.expiry_date,
        }))
        .into_response(),
        Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
    }
}

async fn license_heartbeat(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
) -> Response {
    match state.license.update_last_connected().await {
        Ok(()) => Json(json!({"status": "ok"})).into_response(),
        Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
    }
}

// =============================================================================
// Pipeline (gated)
// =============================================================================

#[derive(Deserialize)]
struct StartRequest {
    #[serde(rename = "type", default)]
    mode: Option<String>,
    #[serde(default)]
    parameters: Option<StageParams>,
}

async fn pipeline_start(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req: StartRequest = match parse_body(&body, uri.path(), &rid.0) {
        Ok(req) => req,
        Err(resp) => return resp,
    };

    let mode = match req.mode.as_deref() {
        None => PipelineMode::Incremental,
        Some(raw) => match PipelineMode::parse(raw) {
            Some(mode) => mode,
            None => {
                return Problem::from_service_error(
                    &ServiceError::InvalidInput(format!("unknown pipeline type {raw:?}")),
                    uri.path(),
                    &rid.0,
                )
                .into_response();
            }
        },
    };

    let mut params = req.parameters.unwrap_or_default();
    if mode == PipelineMode::Full {
        params.insert("full".into(), json!(true));
    }

    match state.pipelines.start(mode, params) {
        Ok(pipeline_id) => (
            StatusCode::CREATED,
            Json(json!({"pipeline_id": pipeline_id})),
        )
            .into_response(),
        Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
    }
}

#[derive(Deserialize)]
struct StopRequest {
    pipeline_id: String,
}

async fn pipeline_stop(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Json(body): Json<serde_json::Value>,
) -> Response {
    let req: StopRequest = match parse_body(&body, uri.path(), &rid.0) {
        Ok(req) => req,
        Err(resp) => return resp,
    };
    if !valid_pipeline_id(&req.pipeline_id) {
        return Problem::from_service_error(
            &ServiceError::InvalidInput("malformed pipeline_id".into()),
            uri.path(),
            &rid.0,
        )
        .into_response();
    }

    match state.pipelines.cancel(&req.pipeline_id) {
        Ok(()) => Json(json!({"status": "cancelling", "pipeline_id": req.pipeline_id}))
            .into_response(),
        Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
    }
}

#[derive(Deserialize)]
struct StatusQuery {
    pipeline_id: Option<String>,
}

async fn pipeline_status(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Query(query): Query<StatusQuery>,
) -> Response {
    match query.pipeline_id {
        Some(id) => {
            if !valid_pipeline_id(&id) {
                return Problem::from_service_error(
                    &ServiceError::InvalidInput("malformed pipeline_id".into()),
                    uri.path(),
                    &rid.0,
                )
                .into_response();
            }
            match state.pipelines.status(&id) {
                Ok(pipeline) => Json(pipeline).into_response(),
                Err(e) => Problem::from_service_error(&e, uri.path(), &rid.0).into_response(),
            }
        }
        None => Json(json!({
            "active": state.pipelines.active_id(),
            "pipelines": state.pipelines.list(None, None),
        }))
        .into_response(),
    }
}

#[derive(Deserialize)]
struct ListQuery {
    status: Option<String>,
    #[serde(rename = "type")]
    mode: Option<String>,
}

async fn pipeline_list(
    State(state): State<Arc<AppState>>,
    Extension(rid): Extension<RequestId>,
    uri: Uri,
    Query(query): Query<ListQuery>,
) -> Response {
    let status = match &query.status {
        None => None,
        Some(raw) => match RunStatus::parse(raw) {
            Some(status) => Some(status),
            None => {
                return Problem::from_service_error(
                    &ServiceError::InvalidInput(format!("unknown status filter {raw:?}")),
                    uri.path(),
                    &rid.0,
                )
                .into_response();
            }
        },
    };
    let mode = match &query.mode {
        None => None,
        Some(raw) => match PipelineMode::parse(raw) {
            Some(mode) => Some(mode),
            None => {
                return Problem::from_service_error(
                    &ServiceError::InvalidInput(format!("unknown type filter {raw:?}")),
                    uri.path(),
                    &rid.0,
                )
                .into_response();
            }
        },
    };

    Json(state.pipelines.list(status, mode)).into_response()
}

// =============================================================================
// Tests — routed through the full middleware stack
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use futures_util::future::BoxFuture;
    use tower::ServiceExt;

    use crate::config::AppConfig;
    use crate::license::manager::LicenseManager;
    use crate::license::registry::RegistryClient;
    use crate::license::store::LicenseStore;
    use crate::license::{LicenseDuration, LicenseInfo, LicenseStatus};
    use crate::paths::DataPaths;
    use crate::pipeline::stage::{Stage, StageContext, StageEmitter};
    use crate::pipeline::PipelineManager;
    use crate::ws::Hub;

    struct SlowStage;

    impl Stage for SlowStage {
        fn id(&self) -> &'static str {
            "slow"
        }
        fn name(&self) -> &'static str {
            "Slow"
        }
        fn description(&self) -> &'static str {
            "sleeps"
        }
        fn run<'a>(
            &'a self,
            ctx: &'a StageContext,
            _emitter: &'a dyn StageEmitter,
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                for _ in 0..100 {
                    if ctx.cancel.is_cancelled() {
                        anyhow::bail!("cancelled");
                    }
                    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
                }
                Ok(())
            })
        }
    }

    fn license(machine_id: &str, days_from_now: i64) -> LicenseInfo {
        let now = Utc::now();
        LicenseInfo {
            key: "ISX-TEST-9999".into(),
            duration: LicenseDuration::OneYear,
            issued_date: now,
            expiry_date: Some(now + chrono::Duration::days(days_from_now)),
            status: LicenseStatus::Activated,
            machine_id: machine_id.into(),
            activated_date: Some(now),
            last_connected: None,
        }
    }

    fn test_state(root: &std::path::Path, license_days: Option<i64>) -> Arc<AppState> {
        let paths = DataPaths::new(root);
        paths.ensure_directories().unwrap();

        let hub = Hub::new();
        let pipelines = PipelineManager::new(vec![Arc::new(SlowStage)], hub.clone(), 50);

        let store = LicenseStore::new(paths.license_file.clone());
        let registry = RegistryClient::new("http://192.0.2.1:9", "k", "s");
        let manager = LicenseManager::new(registry, store, "test-machine".into());
        if let Some(days) = license_days {
            manager.install_for_tests(license("test-machine", days));
        }

        Arc::new(AppState {
            config: AppConfig::default(),
            paths,
            hub,
            pipelines,
            license: Arc::new(manager),
            start_time: std::time::Instant::now(),
        })
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get(path: &str) -> Request<Body> {
        Request::builder().uri(path).body(Body::empty()).unwrap()
    }

    fn post_json(path: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn health_is_public() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), None));
        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn gated_route_returns_401_problem_without_license() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), None));
        let response = app.oneshot(get("/api/data/tickers")).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            response.headers()["content-type"],
            "application/problem+json"
        );
        let body = body_json(response).await;
        assert_eq!(body["code"], "LICENSE_REQUIRED");
        assert_eq!(body["status"], 401);
        assert!(body["trace_id"].is_string());
    }

    #[tokio::test]
    async fn expired_license_gates_data_but_not_status() {
        let tmp = tempfile::tempdir().unwrap();
        let state = test_state(tmp.path(), Some(-2));
        let app = router(state);

        let response = app.clone().oneshot(get("/api/data/tickers")).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let body = body_json(response).await;
        assert_eq!(body["code"], "LICENSE_EXPIRED");

        let response = app.oneshot(get("/api/license/status")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["license_status"], "expired");
    }

    #[tokio::test]
    async fn pipeline_start_conflict_is_409() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), Some(60)));

        let response = app
            .clone()
            .oneshot(post_json("/api/pipeline/start", json!({"type": "full"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let first = body_json(response).await;
        assert!(first["pipeline_id"].is_string());

        let response = app
            .oneshot(post_json("/api/pipeline/start", json!({"type": "full"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);
        let body = body_json(response).await;
        assert_eq!(body["code"], "PIPELINE_ALREADY_RUNNING");
    }

    #[tokio::test]
    async fn pipeline_status_and_stop_flow() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), Some(60)));

        let response = app
            .clone()
            .oneshot(post_json("/api/pipeline/start", json!({})))
            .await
            .unwrap();
        let id = body_json(response).await["pipeline_id"]
            .as_str()
            .unwrap()
            .to_string();

        let response = app
            .clone()
            .oneshot(get(&format!("/api/pipeline/status?pipeline_id={id}")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["id"], id.as_str());

        let response = app
            .clone()
            .oneshot(post_json("/api/pipeline/stop", json!({"pipeline_id": id})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .oneshot(get("/api/pipeline/status?pipeline_id=unknown-id"))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn invalid_pipeline_type_is_400() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), Some(60)));

        let response = app
            .oneshot(post_json("/api/pipeline/start", json!({"type": "warp"})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(body_json(response).await["code"], "VALIDATION_FAILED");
    }

    #[tokio::test]
    async fn activate_requires_a_key() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), None));

        let response = app
            .oneshot(post_json("/api/license/activate", json!({"license_key": ""})))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn responses_carry_request_id_header() {
        let tmp = tempfile::tempdir().unwrap();
        let app = router(test_state(tmp.path(), None));
        let response = app.oneshot(get("/api/health")).await.unwrap();
        assert!(response.headers().contains_key("X-Request-ID"));
    }

    #[test]
    fn key_masking_shows_only_tail() {
        assert_eq!(mask_key("ISX-ABCD-1234"), "****-1234");
    }
}
