//! Pipeline Service
//!
//! Starting pipeline runs, reading their status and delivering approval and
//! validation signals.

use chrono::Utc;
use gantry_core::domain::pipeline::{PipelineRun, RequestError};
use gantry_core::domain::signal::{ApprovalDecision, Signal, ValidationDecision};
use gantry_core::domain::state::{PipelineState, SignalRejection, TransitionError};
use gantry_core::domain::status::PipelineStatus;
use gantry_core::dto::pipeline::{CreatePipelineRun, PipelineCreated, PipelineSummary};
use gantry_core::dto::signal::SignalReceipt;
use uuid::Uuid;

use crate::repository::{SignalAdmission, StoreError};
use crate::service::AppState;

/// Service error type
#[derive(Debug)]
pub enum PipelineError {
    NotFound(Uuid),
    ValidationError(String),
    Store(StoreError),
    /// The event log of a run no longer replays
    Corrupt(Uuid, TransitionError),
}

impl From<StoreError> for PipelineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::RunNotFound(id) => PipelineError::NotFound(id),
            StoreError::Replay(id, e) => PipelineError::Corrupt(id, e),
            other => PipelineError::Store(other),
        }
    }
}

impl From<RequestError> for PipelineError {
    fn from(err: RequestError) -> Self {
        PipelineError::ValidationError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

/// Record a new run and start driving it
pub async fn create_pipeline(state: &AppState, req: CreatePipelineRun) -> Result<PipelineCreated> {
    let request = req.into_request()?;

    let run = PipelineRun {
        id: Uuid::new_v4(),
        request,
        created_at: Utc::now(),
    };
    state.store.create_run(&run).await?;

    let image = run.request.artifact_reference();
    tracing::info!(
        id = %run.id,
        image = %image,
        environment = %run.request.environment,
        "Pipeline created"
    );

    state.engine.spawn(run.id);

    Ok(PipelineCreated { id: run.id, image })
}

/// Current status of a run, rebuilt from its event log
pub async fn get_status(state: &AppState, id: Uuid) -> Result<PipelineStatus> {
    Ok(load_state(state, id).await?.status())
}

/// All runs, newest first
pub async fn list_pipelines(state: &AppState) -> Result<Vec<PipelineSummary>> {
    let runs = state.store.list_runs().await?;

    let mut summaries = Vec::with_capacity(runs.len());
    for run in runs {
        match load_state(state, run.id).await {
            Ok(pipeline) => summaries.push(PipelineSummary::from(&pipeline.status())),
            Err(PipelineError::Corrupt(id, e)) => {
                tracing::warn!(id = %id, error = %e, "Skipping pipeline with unreadable log");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(summaries)
}

pub async fn submit_approval(
    state: &AppState,
    id: Uuid,
    decision: ApprovalDecision,
) -> Result<SignalReceipt> {
    if decision.approver.trim().is_empty() {
        return Err(PipelineError::ValidationError(
            "Approver cannot be empty".to_string(),
        ));
    }

    submit_signal(state, id, Signal::Approval(decision)).await
}

pub async fn submit_validation(
    state: &AppState,
    id: Uuid,
    decision: ValidationDecision,
) -> Result<SignalReceipt> {
    if decision.validator.trim().is_empty() {
        return Err(PipelineError::ValidationError(
            "Validator cannot be empty".to_string(),
        ));
    }

    submit_signal(state, id, Signal::Validation(decision)).await
}

/// Queue a signal for its gate and wake the driver
///
/// Signals may arrive before their gate is reached; they wait in the inbox.
/// The store admits at most one pending decision per gate, so of two
/// concurrent decisions only one is accepted and the other is acknowledged
/// and ignored.
async fn submit_signal(state: &AppState, id: Uuid, signal: Signal) -> Result<SignalReceipt> {
    let kind = signal.kind();

    match state.store.admit_signal(id, &signal).await? {
        SignalAdmission::Queued(received) => {
            tracing::info!(id = %id, kind = %kind, signal_id = received.id, "Signal received");
            state.engine.notify(id).await;
            Ok(SignalReceipt::accepted())
        }
        SignalAdmission::Rejected(rejection @ SignalRejection::NotApplicable(_)) => {
            Err(PipelineError::ValidationError(rejection.to_string()))
        }
        SignalAdmission::Rejected(rejection) => {
            tracing::info!(id = %id, kind = %kind, reason = %rejection, "Signal ignored");
            Ok(SignalReceipt::ignored(rejection.to_string()))
        }
        SignalAdmission::AlreadyPending => {
            tracing::info!(id = %id, kind = %kind, "Signal ignored, a decision is already queued");
            Ok(SignalReceipt::ignored(format!("{} decision already pending", kind)))
        }
    }
}

/// Restart drivers for every run without an outcome
///
/// Called once at startup; each run continues from its recorded log.
pub async fn resume_unfinished(state: &AppState) -> Result<usize> {
    let runs = state.store.list_runs().await?;

    let mut resumed = 0;
    for run in runs {
        match load_state(state, run.id).await {
            Ok(pipeline) if !pipeline.is_terminal() => {
                tracing::info!(id = %run.id, stage = pipeline.stage().name(), "Resuming pipeline");
                state.engine.spawn(run.id);
                resumed += 1;
            }
            Ok(_) => {}
            Err(PipelineError::Corrupt(id, e)) => {
                tracing::error!(id = %id, error = %e, "Cannot resume pipeline with unreadable log");
            }
            Err(e) => return Err(e),
        }
    }

    Ok(resumed)
}

async fn load_state(state: &AppState, id: Uuid) -> Result<PipelineState> {
    let events = state.store.load_events(id).await?;
    if events.is_empty() {
        return Err(PipelineError::NotFound(id));
    }

    PipelineState::replay(id, &events).map_err(|e| PipelineError::Corrupt(id, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{MemoryPipelineStore, PipelineStore, StoreResult};
    use crate::workflow::testing::ScriptedActivities;
    use crate::workflow::{WorkflowEngine, WorkflowSettings};
    use gantry_core::domain::event::{PipelineEvent, RecordedEvent};
    use gantry_core::domain::outcome::PipelineOutcome;
    use gantry_core::domain::signal::{ReceivedSignal, SignalKind};
    use gantry_core::domain::status::RunState;
    use std::sync::Arc;
    use std::time::Duration;

    use crate::workflow::retry::RetryPolicy;

    fn app_state() -> (AppState, Arc<MemoryPipelineStore>) {
        let store = Arc::new(MemoryPipelineStore::new());
        (app_state_with(store.clone()), store)
    }

    fn app_state_with(store: Arc<dyn PipelineStore>) -> AppState {
        let retry = RetryPolicy {
            initial_interval: Duration::from_millis(1),
            backoff: 2.0,
            max_interval: Duration::from_millis(2),
            max_attempts: 3,
        };
        let settings = WorkflowSettings {
            notify_retry: retry.clone(),
            retry,
            validation_window: Duration::from_secs(10),
        };
        let engine = WorkflowEngine::new(
            store.clone(),
            Arc::new(ScriptedActivities::new()),
            settings,
        );
        AppState::new(store, engine)
    }

    /// Store that answers every call a millisecond late
    struct SlowStore(Arc<MemoryPipelineStore>);

    impl SlowStore {
        async fn pause() {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }

    #[async_trait::async_trait]
    impl PipelineStore for SlowStore {
        async fn create_run(&self, run: &PipelineRun) -> StoreResult<()> {
            Self::pause().await;
            self.0.create_run(run).await
        }

        async fn list_runs(&self) -> StoreResult<Vec<PipelineRun>> {
            Self::pause().await;
            self.0.list_runs().await
        }

        async fn append_event(&self, run_id: Uuid, event: &PipelineEvent) -> StoreResult<RecordedEvent> {
            Self::pause().await;
            self.0.append_event(run_id, event).await
        }

        async fn load_events(&self, run_id: Uuid) -> StoreResult<Vec<RecordedEvent>> {
            Self::pause().await;
            self.0.load_events(run_id).await
        }

        async fn admit_signal(&self, run_id: Uuid, signal: &Signal) -> StoreResult<SignalAdmission> {
            Self::pause().await;
            self.0.admit_signal(run_id, signal).await
        }

        async fn next_signal(&self, run_id: Uuid, kind: SignalKind) -> StoreResult<Option<ReceivedSignal>> {
            Self::pause().await;
            self.0.next_signal(run_id, kind).await
        }

        async fn consume_signal(&self, signal_id: i64) -> StoreResult<()> {
            Self::pause().await;
            self.0.consume_signal(signal_id).await
        }
    }

    fn create_request(environment: &str) -> CreatePipelineRun {
        serde_json::from_value(serde_json::json!({
            "image_name": "demo-app",
            "tag": "v2.0.0",
            "registry_url": "registry.local",
            "environment": environment,
        }))
        .unwrap()
    }

    fn approval(approver: &str) -> ApprovalDecision {
        ApprovalDecision {
            approved: true,
            approver: approver.to_string(),
            reason: "ship it".to_string(),
        }
    }

    async fn wait_for_outcome(state: &AppState, id: Uuid) -> PipelineOutcome {
        for _ in 0..400 {
            if let Some(outcome) = get_status(state, id).await.unwrap().outcome {
                return outcome;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("pipeline {} never finished", id);
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_environment() {
        let (state, _) = app_state();

        let result = create_pipeline(&state, create_request("qa")).await;
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_create_starts_the_pipeline() {
        let (state, _) = app_state();

        let created = create_pipeline(&state, create_request("staging")).await.unwrap();
        assert_eq!(created.image, "registry.local/demo-app:v2.0.0");

        assert_eq!(wait_for_outcome(&state, created.id).await, PipelineOutcome::Succeeded);

        let listed = list_pipelines(&state).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].state, RunState::Completed);
        assert_eq!(listed[0].outcome.as_deref(), Some("succeeded"));
    }

    #[tokio::test]
    async fn test_status_of_unknown_pipeline() {
        let (state, _) = app_state();

        let result = get_status(&state, Uuid::new_v4()).await;
        assert!(matches!(result, Err(PipelineError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_signal_for_staging_pipeline_is_rejected() {
        let (state, _) = app_state();
        let created = create_pipeline(&state, create_request("staging")).await.unwrap();

        let result = submit_approval(&state, created.id, approval("lead")).await;
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_empty_approver_is_rejected() {
        let (state, _) = app_state();
        let created = create_pipeline(&state, create_request("production")).await.unwrap();

        let result = submit_approval(&state, created.id, approval("  ")).await;
        assert!(matches!(result, Err(PipelineError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_duplicate_pending_approval_is_ignored() {
        let (state, store) = app_state();
        let run = PipelineRun {
            id: Uuid::new_v4(),
            request: create_request("production").into_request().unwrap(),
            created_at: Utc::now(),
        };
        // No driver: the first decision stays queued
        store.create_run(&run).await.unwrap();

        let first = submit_approval(&state, run.id, approval("lead")).await.unwrap();
        assert!(first.accepted);

        let second = submit_approval(&state, run.id, approval("qa")).await.unwrap();
        assert!(!second.accepted);
        assert_eq!(store.pending_signals(run.id).await, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_approve_and_reject_accept_only_one() {
        let memory = Arc::new(MemoryPipelineStore::new());
        let state = app_state_with(Arc::new(SlowStore(memory.clone())));

        for _ in 0..50 {
            let run = PipelineRun {
                id: Uuid::new_v4(),
                request: create_request("production").into_request().unwrap(),
                created_at: Utc::now(),
            };
            // No driver: whichever decision is admitted stays queued
            memory.create_run(&run).await.unwrap();
            let id = run.id;

            let approve = {
                let state = state.clone();
                tokio::spawn(async move { submit_approval(&state, id, approval("lead")).await })
            };
            let reject = {
                let state = state.clone();
                tokio::spawn(async move {
                    let decision = ApprovalDecision {
                        approved: false,
                        approver: "qa".to_string(),
                        reason: "not ready".to_string(),
                    };
                    submit_approval(&state, id, decision).await
                })
            };

            let approve = approve.await.unwrap().unwrap();
            let reject = reject.await.unwrap().unwrap();
            assert!(
                approve.accepted != reject.accepted,
                "exactly one decision must be accepted for {}",
                id
            );
            assert_eq!(memory.pending_signals(id).await, 1);
        }
    }

    #[tokio::test]
    async fn test_signal_after_completion_is_ignored() {
        let (state, _) = app_state();
        let created = create_pipeline(&state, create_request("production")).await.unwrap();

        let rejection = ApprovalDecision {
            approved: false,
            approver: "qa".to_string(),
            reason: "not ready".to_string(),
        };
        assert!(submit_approval(&state, created.id, rejection).await.unwrap().accepted);
        wait_for_outcome(&state, created.id).await;

        let late = submit_approval(&state, created.id, approval("lead")).await.unwrap();
        assert!(!late.accepted);

        let validation = ValidationDecision {
            validated: true,
            validator: "qa".to_string(),
            reason: String::new(),
        };
        let late = submit_validation(&state, created.id, validation).await.unwrap();
        assert!(!late.accepted);
        assert!(late.ignored_reason.is_some());
    }

    #[tokio::test]
    async fn test_resume_unfinished_restarts_open_runs() {
        let (state, store) = app_state();
        let run = PipelineRun {
            id: Uuid::new_v4(),
            request: create_request("staging").into_request().unwrap(),
            created_at: Utc::now(),
        };
        store.create_run(&run).await.unwrap();

        assert_eq!(resume_unfinished(&state).await.unwrap(), 1);
        assert_eq!(wait_for_outcome(&state, run.id).await, PipelineOutcome::Succeeded);
        assert_eq!(resume_unfinished(&state).await.unwrap(), 0);
    }
}
