// =============================================================================
// Stage Contract — the narrow interface every pipeline stage runs against
// =============================================================================
//
// A stage publishes through a StageEmitter (progress, raw output lines,
// structured errors) and observes cancellation through the CancelToken at
// every I/O boundary and between per-file iterations. Emitting a structured
// error does not by itself end the stage; `run` must also return Err.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;

// =============================================================================
// CancelToken
// =============================================================================

/// Cooperative cancellation signal shared between the manager and the running
/// stage. Cloning is cheap; all clones observe the same signal.
#[derive(Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx: Arc::new(tx), rx }
    }

    /// Signal cancellation to every clone.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Non-blocking check, for use between iterations.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled. Safe to poll in `select!`.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            // The sender lives in self, so changed() cannot error here.
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Emitter types
// =============================================================================

/// Severity of a raw output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl OutputLevel {
    /// Infer the level from a conventional `LEVEL:`-tagged line, defaulting
    /// to info.
    pub fn from_tagged_line(line: &str) -> Self {
        let tag = line.split(&[':', ' '][..]).next().unwrap_or_default();
        match tag.to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "WARN" | "WARNING" => Self::Warn,
            "ERROR" | "FATAL" => Self::Error,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for OutputLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Structured failure published by a stage alongside its returned error.
#[derive(Debug, Clone, Serialize)]
pub struct StageError {
    pub code: String,
    pub detail: String,
    pub recoverable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
}

/// The publishing interface handed to a running stage.
pub trait StageEmitter: Send + Sync {
    /// Report progress. Percent is clamped to [0, 100] and never regresses
    /// within a stage.
    fn progress(&self, percent: f64, message: &str, details: Option<serde_json::Value>);

    /// Forward a raw output line.
    fn output(&self, level: OutputLevel, message: &str);

    /// Publish a structured failure.
    fn error(&self, error: &StageError);
}

// =============================================================================
// Stage
// =============================================================================

/// Parameters flowing into a stage: the pipeline's free-form context map.
pub type StageParams = HashMap<String, serde_json::Value>;

/// Everything a stage needs at run time.
pub struct StageContext {
    pub pipeline_id: String,
    pub params: StageParams,
    pub cancel: CancelToken,
}

impl StageContext {
    /// Convenience accessor for a boolean parameter.
    pub fn flag(&self, key: &str) -> bool {
        self.params
            .get(key)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Convenience accessor for a string parameter.
    pub fn string(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

/// One pipeline stage. Implementations must return promptly once the context
/// token is cancelled.
pub trait Stage: Send + Sync {
    fn id(&self) -> &'static str;
    fn name(&self) -> &'static str;
    fn description(&self) -> &'static str;

    fn run<'a>(
        &'a self,
        ctx: &'a StageContext,
        emitter: &'a dyn StageEmitter,
    ) -> BoxFuture<'a, Result<()>>;
}

// =============================================================================
// Test support
// =============================================================================

/// Emitter that discards everything. For stage unit tests.
#[cfg(test)]
pub struct NoopEmitter;

#[cfg(test)]
impl StageEmitter for NoopEmitter {
    fn progress(&self, _percent: f64, _message: &str, _details: Option<serde_json::Value>) {}
    fn output(&self, _level: OutputLevel, _message: &str) {}
    fn error(&self, _error: &StageError) {}
}

// =============================================================================
// Tests
// =============================================================================
