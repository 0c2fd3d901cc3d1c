// =============================================================================
// Central Application State — ISX Pulse workstation
// =============================================================================
//
// The composition root's output: every subsystem the HTTP and WebSocket
// handlers need, behind one `Arc`. Subsystems manage their own interior
// mutability (the hub's client registry, the pipeline registry, the license
// cache); this struct just ties them together.
// =============================================================================

use std::sync::Arc;

use crate::config::AppConfig;
use crate::license::LicenseManager;
use crate::paths::DataPaths;
use crate::pipeline::PipelineManager;
use crate::ws::Hub;

/// Shared across all request handlers and background tasks via `Arc<AppState>`.
pub struct AppState {
    pub config: AppConfig,
    pub paths: DataPaths,
    pub hub: Arc<Hub>,
    pub pipelines: Arc<PipelineManager>,
    pub license: Arc<LicenseManager>,
    /// Instant the service started. Used for uptime reporting.
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        paths: DataPaths,
        hub: Arc<Hub>,
        pipelines: Arc<PipelineManager>,
        license: Arc<LicenseManager>,
    ) -> Self {
        Self {
            config,
            paths,
            hub,
            pipelines,
            license,
            start_time: std::time::Instant::now(),
        }
    }
}
