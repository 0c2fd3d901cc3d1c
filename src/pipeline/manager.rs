// =============================================================================
// Pipeline Manager — stage registry, single-flight scheduling, state tracking
// =============================================================================
//
// One pipeline at a time: admission is guarded by an atomic flag so that
// concurrent start calls yield exactly one success. Stages run strictly
// sequentially on a spawned driver task; their progress flows through a
// hub-backed emitter that also keeps the registry's stage state current and
// clamps progress monotonic. Completed pipelines are retained in a bounded
// ring; the manager never auto-retries a failed run.
// =============================================================================

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::Mutex;
use tracing::{error, info, warn};

use crate::errors::ServiceError;
use crate::ws::message::{WsMessage, WsPayload};
use crate::ws::Hub;

use super::stage::{
    CancelToken, OutputLevel, Stage, StageContext, StageEmitter, StageError, StageParams,
};
use super::state::{PipelineMode, PipelineState, RunStatus, StageState};

// =============================================================================
// Registry internals
// =============================================================================

struct ActiveRun {
    id: String,
    cancel: CancelToken,
}

struct Registry {
    pipelines: HashMap<String, PipelineState>,
    /// Insertion order, oldest first; drives history trimming.
    order: VecDeque<String>,
    active: Option<ActiveRun>,
}

// =============================================================================
// Manager
// =============================================================================

pub struct PipelineManager {
    stages: Vec<Arc<dyn Stage>>,
    hub: Arc<Hub>,
    registry: Mutex<Registry>,
    /// Admission flag: exactly one pipeline may run at a time.
    running: AtomicBool,
    history_limit: usize,
}

impl PipelineManager {
    pub fn new(stages: Vec<Arc<dyn Stage>>, hub: Arc<Hub>, history_limit: usize) -> Arc<Self> {
        Arc::new(Self {
            stages,
            hub,
            registry: Mutex::new(Registry {
                pipelines: HashMap::new(),
                order: VecDeque::new(),
                active: None,
            }),
            running: AtomicBool::new(false),
            history_limit,
        })
    }

    /// Declared stages, in execution order.
    pub fn stage_descriptors(&self) -> Vec<(&'static str, &'static str, &'static str)> {
        self.stages
            .iter()
            .map(|s| (s.id(), s.name(), s.description()))
            .collect()
    }

    // ── Admission & execution ───────────────────────────────────────────

    /// Start a pipeline. Fails with `AlreadyRunning` when one is in flight.
    pub fn start(
        self: &Arc<Self>,
        mode: PipelineMode,
        params: StageParams,
    ) -> Result<String, ServiceError> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ServiceError::AlreadyRunning);
        }

        let now = Utc::now();
        let id = format!("{}-{}", mode, now.format("%Y%m%d-%H%M%S%.3f"));
        let cancel = CancelToken::new();

        let state = PipelineState {
            id: id.clone(),
            mode,
            status: RunStatus::Pending,
            start_time: now,
            end_time: None,
            stages: self
                .stages
                .iter()
                .map(|s| StageState::pending(s.id(), s.name()))
                .collect(),
            context: params.clone(),
        };

        let supersedes_previous = {
            let mut registry = self.registry.lock();
            let had_previous = !registry.order.is_empty();
            registry.pipelines.insert(id.clone(), state);
            registry.order.push_back(id.clone());
            registry.active = Some(ActiveRun { id: id.clone(), cancel: cancel.clone() });
            self.trim_history(&mut registry);
            had_previous
        };

        info!(pipeline_id = %id, %mode, "pipeline admitted");

        // A fresh admission supersedes whatever run the clients were showing;
        // tell them to clear their stage panels before the start frame lands.
        if supersedes_previous {
            self.hub.broadcast(WsMessage::now(WsPayload::PipelineReset {
                pipeline_id: id.clone(),
                stage: None,
                status: Some(RunStatus::Pending.to_string()),
            }));
        }
        self.hub.broadcast(WsMessage::now(WsPayload::PipelineStart {
            pipeline_id: id.clone(),
            stage: None,
            status: Some(RunStatus::Pending.to_string()),
        }));

        let driver = self.clone();
        let driver_id = id.clone();
        tokio::spawn(async move {
            driver.drive(driver_id, mode, params, cancel).await;
        });

        Ok(id)
    }

    async fn drive(
        self: Arc<Self>,
        id: String,
        mode: PipelineMode,
        params: StageParams,
        cancel: CancelToken,
    ) {
        self.set_pipeline_status(&id, RunStatus::Running);

        let mut outcome = RunStatus::Completed;
        for stage in &self.stages {
            if cancel.is_cancelled() {
                outcome = RunStatus::Cancelled;
                break;
            }

            self.set_stage_status(&id, stage.id(), RunStatus::Running);
            self.hub.broadcast(WsMessage::now(WsPayload::PipelineStatus {
                pipeline_id: id.clone(),
                status: RunStatus::Running.to_string(),
                stage: stage.id().to_string(),
                details: None,
            }));

            let ctx = StageContext {
                pipeline_id: id.clone(),
                params: params.clone(),
                cancel: cancel.clone(),
            };
            let emitter = HubEmitter {
                manager: self.clone(),
                pipeline_id: id.clone(),
                stage_id: stage.id(),
            };

            let result = stage.run(&ctx, &emitter).await;

            match result {
                Ok(()) if cancel.is_cancelled() => {
                    self.set_stage_status(&id, stage.id(), RunStatus::Cancelled);
                    outcome = RunStatus::Cancelled;
                    break;
                }
                Ok(()) => {
                    self.complete_stage(&id, stage.id());
                }
                Err(_) if cancel.is_cancelled() => {
                    info!(pipeline_id = %id, stage = stage.id(), "stage stopped by cancellation");
                    self.set_stage_status(&id, stage.id(), RunStatus::Cancelled);
                    outcome = RunStatus::Cancelled;
                    break;
                }
                Err(e) => {
                    error!(pipeline_id = %id, stage = stage.id(), error = %e, "stage failed");
                    self.fail_stage(&id, stage.id(), &e);
                    self.hub.broadcast(WsMessage::now(WsPayload::Error {
                        error_code: "STAGE_FAILED".to_string(),
                        title: format!("{} failed", stage.name()),
                        detail: format!("{e:#}"),
                        stage: Some(stage.id().to_string()),
                        hint: None,
                        metadata: None,
                    }));
                    outcome = RunStatus::Failed;
                    break;
                }
            }
        }

        self.finish(&id, mode, outcome);
    }

    fn finish(&self, id: &str, mode: PipelineMode, outcome: RunStatus) {
        {
            let mut registry = self.registry.lock();
            if let Some(state) = registry.pipelines.get_mut(id) {
                state.status = outcome;
                state.end_time = Some(Utc::now());
            }
            registry.active = None;
        }
        self.running.store(false, Ordering::SeqCst);

        info!(pipeline_id = %id, %mode, status = %outcome, "pipeline finished");
        self.hub.broadcast(WsMessage::now(WsPayload::PipelineComplete {
            pipeline_id: id.to_string(),
            stage: None,
            status: Some(outcome.to_string()),
        }));

        // User-facing notice plus, on success, a full data refresh (the run
        // changed the derived datasets). Failures already surfaced as a
        // structured error frame from the driver.
        match outcome {
            RunStatus::Completed => {
                self.hub.broadcast(WsMessage::now(WsPayload::Success {
                    message: format!("{mode} pipeline completed"),
                }));
                self.hub.broadcast(WsMessage::now(WsPayload::DataUpdate {
                    subtype: crate::ws::message::DataSubtype::All,
                    action: Some("refresh".to_string()),
                    data: None,
                }));
            }
            RunStatus::Cancelled => {
                self.hub.broadcast(WsMessage::now(WsPayload::Warning {
                    message: format!("{mode} pipeline cancelled before completion"),
                }));
            }
            _ => {}
        }
    }

    // ── Queries & cancellation ──────────────────────────────────────────

    /// State of one pipeline.
    pub fn status(&self, id: &str) -> Result<PipelineState, ServiceError> {
        self.registry
            .lock()
            .pipelines
            .get(id)
            .cloned()
            .ok_or_else(|| ServiceError::PipelineNotFound(id.to_string()))
    }

    /// All retained pipelines, most recent first, optionally filtered.
    pub fn list(
        &self,
        status: Option<RunStatus>,
        mode: Option<PipelineMode>,
    ) -> Vec<PipelineState> {
        let registry = self.registry.lock();
        registry
            .order
            .iter()
            .rev()
            .filter_map(|id| registry.pipelines.get(id))
            .filter(|p| status.map_or(true, |s| p.status == s))
            .filter(|p| mode.map_or(true, |m| p.mode == m))
            .cloned()
            .collect()
    }

    /// Id of the currently running pipeline, if any.
    pub fn active_id(&self) -> Option<String> {
        self.registry.lock().active.as_ref().map(|a| a.id.clone())
    }

    /// Signal cancellation to the running pipeline. The stage observes the
    /// token at its next safe point.
    pub fn cancel(&self, id: &str) -> Result<(), ServiceError> {
        let registry = self.registry.lock();
        if !registry.pipelines.contains_key(id) {
            return Err(ServiceError::PipelineNotFound(id.to_string()));
        }
        match &registry.active {
            Some(active) if active.id == id => {
                active.cancel.cancel();
                info!(pipeline_id = %id, "cancellation requested");
                Ok(())
            }
            _ => Err(ServiceError::PipelineNotRunning(id.to_string())),
        }
    }

    // ── State mutation (driver + emitter paths) ─────────────────────────

    fn set_pipeline_status(&self, id: &str, status: RunStatus) {
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            state.status = status;
        }
    }

    fn set_stage_status(&self, id: &str, stage_id: &str, status: RunStatus) {
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            if let Some(stage) = state.stage_mut(stage_id) {
                stage.status = status;
            }
        }
    }

    fn complete_stage(&self, id: &str, stage_id: &str) {
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            if let Some(stage) = state.stage_mut(stage_id) {
                stage.status = RunStatus::Completed;
                stage.progress = 100.0;
            }
        }
    }

    fn fail_stage(&self, id: &str, stage_id: &str, err: &anyhow::Error) {
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            if let Some(stage) = state.stage_mut(stage_id) {
                stage.status = RunStatus::Failed;
                // Keep a structured error the stage may have published; fall
                // back to the returned one.
                if stage.error.is_none() {
                    stage.error = Some(StageError {
                        code: "STAGE_FAILED".to_string(),
                        detail: format!("{err:#}"),
                        recoverable: false,
                        hint: None,
                    });
                }
            }
        }
    }

    /// Record progress for a running stage, clamped to [0, 100] and monotonic
    /// non-decreasing. Returns the effective percent.
    fn record_progress(&self, id: &str, stage_id: &str, percent: f64, message: &str) -> f64 {
        let mut effective = percent.clamp(0.0, 100.0);
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            if let Some(stage) = state.stage_mut(stage_id) {
                effective = effective.max(stage.progress);
                stage.progress = effective;
                stage.message = message.to_string();
            }
        }
        effective
    }

    fn record_stage_error(&self, id: &str, stage_id: &str, error: &StageError) {
        if let Some(state) = self.registry.lock().pipelines.get_mut(id) {
            if let Some(stage) = state.stage_mut(stage_id) {
                stage.error = Some(error.clone());
            }
        }
    }

    fn trim_history(&self, registry: &mut Registry) {
        while registry.order.len() > self.history_limit {
            // Never evict the active run, even if the ring is full of it and
            // younger entries.
            let Some(oldest) = registry.order.front().cloned() else { break };
            let is_active = registry.active.as_ref().is_some_and(|a| a.id == oldest);
            if is_active {
                break;
            }
            registry.order.pop_front();
            registry.pipelines.remove(&oldest);
        }
    }
}

// =============================================================================
// Hub-backed emitter
// =============================================================================

/// The emitter handed to running stages: updates registry state and fans the
/// event out through the hub.
struct HubEmitter {
    manager: Arc<PipelineManager>,
    pipeline_id: String,
    stage_id: &'static str,
}

impl StageEmitter for HubEmitter {
    fn progress(&self, percent: f64, message: &str, details: Option<serde_json::Value>) {
        let effective =
            self.manager
                .record_progress(&self.pipeline_id, self.stage_id, percent, message);

        let (current, total) = details
            .as_ref()
            .map(|d| {
                (
                    d.get("current").and_then(|v| v.as_u64()),
                    d.get("total").and_then(|v| v.as_u64()),
                )
            })
            .unwrap_or((None, None));

        self.manager
            .hub
            .broadcast(WsMessage::now(WsPayload::PipelineProgress {
                pipeline_id: self.pipeline_id.clone(),
                stage: self.stage_id.to_string(),
                progress: effective,
                message: message.to_string(),
                current,
                total,
            }));
    }

    fn output(&self, level: OutputLevel, message: &str) {
        self.manager.hub.broadcast(WsMessage::now(WsPayload::Output {
            stage: self.stage_id.to_string(),
            level,
            message: message.to_string(),
        }));
    }

    fn error(&self, error: &StageError) {
        warn!(
            pipeline_id = %self.pipeline_id,
            stage = self.stage_id,
            code = %error.code,
            detail = %error.detail,
            "stage reported error"
        );
        self.manager
            .record_stage_error(&self.pipeline_id, self.stage_id, error);
        self.manager.hub.broadcast(WsMessage::now(WsPayload::Error {
            error_code: error.code.clone(),
            title: format!("{} error", self.stage_id),
            detail: error.detail.clone(),
            stage: Some(self.stage_id.to_string()),
            hint: error.hint.clone(),
            metadata: None,
        }));
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::BoxFuture;

    /// Stage that sleeps briefly, emitting progress, and optionally fails.
    struct FakeStage {
        id: &'static str,
        fail: bool,
        delay_ms: u64,
    }

    impl Stage for FakeStage {
        fn id(&self) -> &'static str {
            self.id
        }
        fn name(&self) -> &'static str {
            "Fake"
        }
        fn description(&self) -> &'static str {
            "test stage"
        }

        fn run<'a>(
            &'a self,
            ctx: &'a StageContext,
            emitter: &'a dyn StageEmitter,
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                for step in [10.0, 50.0, 90.0] {
                    if ctx.cancel.is_cancelled() {
                        anyhow::bail!("cancelled");
                    }
                    emitter.progress(step, "working", None);
                    tokio::time::sleep(std::time::Duration::from_millis(self.delay_ms)).await;
                }
                if self.fail {
                    anyhow::bail!("synthetic failure");
                }
                Ok(())
            })
        }
    }

    fn manager(stages: Vec<Arc<dyn Stage>>) -> Arc<PipelineManager> {
        PipelineManager::new(stages, Hub::new(), 50)
    }

    async fn wait_terminal(mgr: &Arc<PipelineManager>, id: &str) -> PipelineState {
        for _ in 0..200 {
            let state = mgr.status(id).unwrap();
            if state.status.is_terminal() {
                return state;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("pipeline {id} never reached a terminal status");
    }

    #[tokio::test]
    async fn start_runs_stages_in_order_to_completion() {
        let mgr = manager(vec![
            Arc::new(FakeStage { id: "one", fail: false, delay_ms: 1 }),
            Arc::new(FakeStage { id: "two", fail: false, delay_ms: 1 }),
        ]);
        let id = mgr.start(PipelineMode::Incremental, StageParams::new()).unwrap();

        let state = wait_terminal(&mgr, &id).await;
        assert_eq!(state.status, RunStatus::Completed);
        assert!(state.end_time.is_some());
        for stage in &state.stages {
            assert_eq!(stage.status, RunStatus::Completed);
            assert_eq!(stage.progress, 100.0);
        }
    }

    #[tokio::test]
    async fn concurrent_starts_yield_exactly_one_success() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 30 })]);

        let mut results = Vec::new();
        for _ in 0..8 {
            results.push(mgr.start(PipelineMode::Full, StageParams::new()));
        }

        let successes = results.iter().filter(|r| r.is_ok()).count();
        let conflicts = results
            .iter()
            .filter(|r| matches!(r, Err(ServiceError::AlreadyRunning)))
            .count();
        assert_eq!(successes, 1);
        assert_eq!(conflicts, 7);

        let id = results.into_iter().find_map(|r| r.ok()).unwrap();
        wait_terminal(&mgr, &id).await;

        // After completion a new pipeline is admitted again.
        assert!(mgr.start(PipelineMode::Full, StageParams::new()).is_ok());
    }

    #[tokio::test]
    async fn failure_skips_subsequent_stages() {
        let mgr = manager(vec![
            Arc::new(FakeStage { id: "one", fail: true, delay_ms: 1 }),
            Arc::new(FakeStage { id: "two", fail: false, delay_ms: 1 }),
        ]);
        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();

        let state = wait_terminal(&mgr, &id).await;
        assert_eq!(state.status, RunStatus::Failed);
        assert_eq!(state.stage("one").unwrap().status, RunStatus::Failed);
        assert!(state.stage("one").unwrap().error.is_some());
        // Never started.
        assert_eq!(state.stage("two").unwrap().status, RunStatus::Pending);
    }

    #[tokio::test]
    async fn cancel_stops_the_running_stage() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "slow", fail: false, delay_ms: 50 })]);
        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        mgr.cancel(&id).unwrap();

        let state = wait_terminal(&mgr, &id).await;
        assert_eq!(state.status, RunStatus::Cancelled);
        assert_eq!(state.stage("slow").unwrap().status, RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn cancel_unknown_and_finished_pipelines_err() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 1 })]);
        assert!(matches!(
            mgr.cancel("nope"),
            Err(ServiceError::PipelineNotFound(_))
        ));

        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        wait_terminal(&mgr, &id).await;
        assert!(matches!(
            mgr.cancel(&id),
            Err(ServiceError::PipelineNotRunning(_))
        ));
    }

    #[tokio::test]
    async fn progress_is_clamped_monotonic() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 1 })]);
        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        wait_terminal(&mgr, &id).await;

        // Regressing and out-of-range reports are clamped.
        let effective = mgr.record_progress(&id, "one", 40.0, "late report");
        assert_eq!(effective, 100.0);
        let effective = mgr.record_progress(&id, "one", 250.0, "overshoot");
        assert_eq!(effective, 100.0);
    }

    #[tokio::test]
    async fn progress_broadcasts_reach_every_client_in_order() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 5 })]);
        let (_c1, mut rx1) = mgr.hub.register();
        let (_c2, mut rx2) = mgr.hub.register();

        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        wait_terminal(&mgr, &id).await;
        // Let the dispatcher drain the queue.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let collect = |rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>| {
            let mut progress = Vec::new();
            while let Ok(raw) = rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
                if value["type"] == "pipeline_progress" {
                    assert_eq!(value["pipeline_id"], id.as_str());
                    progress.push(value["progress"].as_f64().unwrap());
                }
            }
            progress
        };

        let seq1 = collect(&mut rx1);
        let seq2 = collect(&mut rx2);

        assert!(!seq1.is_empty());
        // Both clients observe the same ordered, non-decreasing sequence.
        assert_eq!(seq1, seq2);
        assert!(seq1.windows(2).all(|w| w[0] <= w[1]));
    }

    #[tokio::test]
    async fn lifecycle_notices_follow_outcomes() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 5 })]);
        let (_client, mut rx) = mgr.hub.register();

        let drain = |rx: &mut tokio::sync::mpsc::UnboundedReceiver<String>| {
            let mut types = Vec::new();
            while let Ok(raw) = rx.try_recv() {
                let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
                types.push((
                    value["type"].as_str().unwrap().to_string(),
                    value.clone(),
                ));
            }
            types
        };

        // First run: no prior pipeline, so no reset frame; completion emits a
        // success notice.
        let first = mgr.start(PipelineMode::Incremental, StageParams::new()).unwrap();
        wait_terminal(&mgr, &first).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let frames = drain(&mut rx);
        assert!(!frames.iter().any(|(t, _)| t == "pipeline_reset"));
        assert!(frames.iter().any(|(t, _)| t == "success"));
        assert!(!frames.iter().any(|(t, _)| t == "warning"));

        // Second run supersedes the first: a reset frame precedes the start
        // frame and carries the new id.
        let second = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        wait_terminal(&mgr, &second).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let frames = drain(&mut rx);
        let reset_pos = frames
            .iter()
            .position(|(t, _)| t == "pipeline_reset")
            .expect("missing pipeline_reset");
        let start_pos = frames
            .iter()
            .position(|(t, _)| t == "pipeline_start")
            .expect("missing pipeline_start");
        assert!(reset_pos < start_pos);
        assert_eq!(frames[reset_pos].1["pipeline_id"], second.as_str());

        // A cancelled run emits a warning notice instead of a success.
        let mgr = manager(vec![Arc::new(FakeStage { id: "slow", fail: false, delay_ms: 50 })]);
        let (_client, mut rx) = mgr.hub.register();
        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        mgr.cancel(&id).unwrap();
        wait_terminal(&mgr, &id).await;
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let frames = drain(&mut rx);
        assert!(frames.iter().any(|(t, _)| t == "warning"));
        assert!(!frames.iter().any(|(t, _)| t == "success"));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let mgr = PipelineManager::new(
            vec![Arc::new(FakeStage { id: "one", fail: false, delay_ms: 1 })],
            Hub::new(),
            3,
        );

        let mut last = String::new();
        for _ in 0..6 {
            let id = mgr.start(PipelineMode::Incremental, StageParams::new()).unwrap();
            wait_terminal(&mgr, &id).await;
            last = id;
        }

        let listed = mgr.list(None, None);
        assert_eq!(listed.len(), 3);
        // Most recent first.
        assert_eq!(listed[0].id, last);
    }

    #[tokio::test]
    async fn list_filters_by_status_and_mode() {
        let mgr = manager(vec![Arc::new(FakeStage { id: "one", fail: true, delay_ms: 1 })]);
        let id = mgr.start(PipelineMode::Full, StageParams::new()).unwrap();
        wait_terminal(&mgr, &id).await;

        assert_eq!(mgr.list(Some(RunStatus::Failed), None).len(), 1);
        assert_eq!(mgr.list(Some(RunStatus::Completed), None).len(), 0);
        assert_eq!(mgr.list(None, Some(PipelineMode::Full)).len(), 1);
        assert_eq!(mgr.list(None, Some(PipelineMode::Incremental)).len(), 0);
    }
}
