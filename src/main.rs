// =============================================================================
// ISX Pulse — Main Entry Point
// =============================================================================
//
// Startup follows the dependency order: paths and config first, then logging,
// then the license manager, then the broadcast hub and pipeline manager, and
// finally the HTTP server that wires them all to the browser. A failure to
// bind or to create the data directories exits with code 1.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod analysis;
mod api;
mod app_state;
mod config;
mod domain;
mod errors;
mod export;
mod fill;
mod license;
mod logging;
mod parse;
mod paths;
mod pipeline;
mod ws;

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::config::{AppConfig, RegistryCredentials};
use crate::license::fingerprint::machine_fingerprint;
use crate::license::manager::LicenseManager;
use crate::license::registry::RegistryClient;
use crate::license::store::LicenseStore;
use crate::parse::ExtractorBridge;
use crate::paths::DataPaths;
use crate::pipeline::stages::standard_stages;
use crate::pipeline::PipelineManager;
use crate::ws::Hub;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment, paths & config ───────────────────────────────────
    let _ = dotenv::dotenv();

    let paths = DataPaths::beside_executable();
    paths.ensure_directories()?;
    logging::init(&paths)?;

    let mut config = AppConfig::load(paths.root.join("config.json")).unwrap_or_else(|e| {
        warn!(error = %format!("{e:#}"), "failed to load config — using defaults");
        AppConfig::default()
    });
    config.apply_env_overrides();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %paths.root.display(),
        "ISX Pulse starting up"
    );

    // ── 2. License manager ───────────────────────────────────────────────
    let fingerprint = machine_fingerprint();
    let credentials = RegistryCredentials::resolve(&config.registry_credentials);
    let registry = RegistryClient::new(
        config.registry_url.clone(),
        credentials.api_key,
        credentials.shared_secret,
    );
    let store = LicenseStore::new(paths.license_file.clone());
    let license = Arc::new(LicenseManager::new(registry, store, fingerprint));

    match license.validate().await {
        (true, _) => info!("license valid"),
        (false, kind) => warn!(code = kind.code(), "no valid license — protected endpoints gated"),
    }

    // ── 3. Broadcast hub & pipeline manager ──────────────────────────────
    let hub = Hub::new();

    let extractor: Arc<dyn parse::WorkbookParser> =
        Arc::new(ExtractorBridge::new(config.extractor_path.clone()));
    let stages = standard_stages(&config.scrape_base_url, extractor, &paths);
    let pipelines = PipelineManager::new(stages, hub.clone(), config.pipeline_history);

    info!(
        stages = ?pipelines.stage_descriptors().iter().map(|(id, ..)| *id).collect::<Vec<_>>(),
        "pipeline stages registered"
    );

    // ── 4. HTTP server ───────────────────────────────────────────────────
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, paths, hub, pipelines, license));

    let app = api::router(state);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!(addr = %bind_addr, "HTTP server listening");

    // ── 5. Serve until Ctrl+C ────────────────────────────────────────────
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            warn!("shutdown signal received — stopping gracefully");
        })
        .await
        .context("HTTP server failed")?;

    info!("ISX Pulse shut down complete");
    Ok(())
}
