// =============================================================================
// Pipeline State — one execution of the staged run, plus its per-stage states
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::stage::{StageError, StageParams};

// =============================================================================
// Enums
// =============================================================================

/// How much work the run does: everything from scratch, or only what changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineMode {
    Full,
    Incremental,
}

impl PipelineMode {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "full" => Some(Self::Full),
            "incremental" => Some(Self::Incremental),
            _ => None,
        }
    }
}

impl std::fmt::Display for PipelineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Full => write!(f, "full"),
            Self::Incremental => write!(f, "incremental"),
        }
    }
}

/// Lifecycle of a pipeline or a single stage.
///
/// Transitions are `pending → running → {completed | failed | cancelled}`;
/// a stage that never started stays `pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Running => write!(f, "running"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// StageState / PipelineState
// =============================================================================

/// Observable state of one stage within a pipeline.
#[derive(Debug, Clone, Serialize)]
pub struct StageState {
    pub id: String,
    pub name: String,
    pub status: RunStatus,
    /// 0–100, monotonic non-decreasing until the stage is terminal.
    pub progress: f64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StageError>,
}

impl StageState {
    pub fn pending(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            status: RunStatus::Pending,
            progress: 0.0,
            message: String::new(),
            error: None,
        }
    }
}

/// Observable state of one pipeline execution. Stage order matches the
/// declared execution order.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineState {
    pub id: String,
    pub mode: PipelineMode,
    pub status: RunStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub stages: Vec<StageState>,
    #[serde(skip_serializing_if = "StageParams::is_empty")]
    pub context: StageParams,
}

impl PipelineState {
    pub fn stage(&self, stage_id: &str) -> Option<&StageState> {
        self.stages.iter().find(|s| s.id == stage_id)
    }

    pub fn stage_mut(&mut self, stage_id: &str) -> Option<&mut StageState> {
        self.stages.iter_mut().find(|s| s.id == stage_id)
    }
}

// =============================================================================
// Tests
// =============================================================================
