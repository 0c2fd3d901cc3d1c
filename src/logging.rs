// =============================================================================
// Logging — tracing subscriber wired from ISX_DEBUG / ISX_DEBUG_CATEGORIES
// =============================================================================
//
// Two sinks: stdout for interactive use and `logs/app.log` for the durable
// trail. `ISX_DEBUG=true` raises the default level to debug;
// `ISX_DEBUG_CATEGORIES=pipeline,license` instead raises only the named
// module targets. An explicit RUST_LOG always wins.
// =============================================================================

use std::fs::OpenOptions;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::paths::DataPaths;

/// Build the filter directive string from the debug environment variables.
fn filter_directives() -> String {
    if let Ok(explicit) = std::env::var("RUST_LOG") {
        if !explicit.is_empty() {
            return explicit;
        }
    }

    let debug_enabled = std::env::var("ISX_DEBUG")
        .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
        .unwrap_or(false);

    if let Ok(categories) = std::env::var("ISX_DEBUG_CATEGORIES") {
        let targets: Vec<String> = categories
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(|c| format!("isx_pulse::{c}=debug"))
            .collect();
        if !targets.is_empty() {
            return format!("info,{}", targets.join(","));
        }
    }

    if debug_enabled {
        "debug".to_string()
    } else {
        "info".to_string()
    }
}

/// Initialise the global tracing subscriber. Called once from `main`.
pub fn init(paths: &DataPaths) -> Result<()> {
    let filter = EnvFilter::new(filter_directives());

    let app_log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(paths.logs.join("app.log"))
        .with_context(|| format!("failed to open app log under {}", paths.logs.display()))?;

    let stdout_layer = tracing_subscriber::fmt::layer().with_target(true);
    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(Mutex::new(app_log));

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Env-var driven; tests mutate process state, so they run the scenarios
    // sequentially within a single test body.
    #[test]
    fn filter_directives_respect_debug_env() {
        std::env::remove_var("RUST_LOG");
        std::env::remove_var("ISX_DEBUG");
        std::env::remove_var("ISX_DEBUG_CATEGORIES");
        assert_eq!(filter_directives(), "info");

        std::env::set_var("ISX_DEBUG", "true");
        assert_eq!(filter_directives(), "debug");

        std::env::set_var("ISX_DEBUG_CATEGORIES", "pipeline, license");
        let directives = filter_directives();
        assert!(directives.contains("isx_pulse::pipeline=debug"));
        assert!(directives.contains("isx_pulse::license=debug"));
        assert!(directives.starts_with("info,"));

        std::env::set_var("RUST_LOG", "trace");
        assert_eq!(filter_directives(), "trace");

        std::env::remove_var("RUST_LOG");
        std::env::remove_var("ISX_DEBUG");
        std::env::remove_var("ISX_DEBUG_CATEGORIES");
    }
}
