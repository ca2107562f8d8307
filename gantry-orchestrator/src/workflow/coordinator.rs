//! Pipeline coordinator
//!
//! One driver task per pipeline. The driver rebuilds the pipeline state from
//! its log, asks it for the next step, performs the step, appends the
//! resulting event and applies it, until the outcome is recorded.

use chrono::Utc;
use gantry_core::domain::activity::ActivityCall;
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::outcome::PipelineOutcome;
use gantry_core::domain::phase::Phase;
use gantry_core::domain::state::{NextStep, PipelineState, TransitionError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info, warn};
use uuid::Uuid;

use crate::activity::{Activities, ActivityError};
use crate::config::Config;
use crate::repository::{PipelineStore, StoreError};
use crate::workflow::retry::RetryPolicy;
use crate::workflow::signals::SignalHub;

/// Infrastructure failures that stop a driver without producing an outcome
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("event log rejected: {0}")]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub retry: RetryPolicy,
    pub notify_retry: RetryPolicy,
    pub validation_window: Duration,
}

impl WorkflowSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            retry: config.retry.clone(),
            notify_retry: config.notify_retry(),
            validation_window: config.validation_window,
        }
    }
}

#[derive(Clone)]
pub struct WorkflowEngine {
    pub(super) store: Arc<dyn PipelineStore>,
    pub(super) activities: Arc<dyn Activities>,
    pub(super) hub: Arc<SignalHub>,
    pub(super) settings: WorkflowSettings,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        activities: Arc<dyn Activities>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            store,
            activities,
            hub: Arc::new(SignalHub::new()),
            settings,
        }
    }

    /// Start the driver of a pipeline in its own task
    pub fn spawn(&self, id: Uuid) -> JoinHandle<Option<PipelineOutcome>> {
        let engine = self.clone();
        let span = tracing::info_span!("pipeline", id = %id);

        tokio::spawn(
            async move {
                match engine.drive(id).await {
                    Ok(outcome) => Some(outcome),
                    Err(e) => {
                        error!(error = %e, "Pipeline driver stopped, it resumes from its log on the next recovery");
                        engine.hub.release(id).await;
                        None
                    }
                }
            }
            .instrument(span),
        )
    }

    /// Tell a suspended driver that its inbox changed
    pub async fn notify(&self, id: Uuid) {
        self.hub.notify(id).await;
    }

    /// Run a pipeline until its outcome is recorded
    pub async fn drive(&self, id: Uuid) -> Result<PipelineOutcome, WorkflowError> {
        let events = self.store.load_events(id).await?;
        let mut state = PipelineState::replay(id, &events)?;

        if events.len() > 1 && !state.is_terminal() {
            info!(
                stage = state.stage().name(),
                events = events.len(),
                "Resuming pipeline from its event log"
            );
        }

        loop {
            let event = match state.next_step() {
                NextStep::Done(outcome) => {
                    self.hub.release(id).await;
                    return Ok(outcome);
                }
                NextStep::Run(call) => self.run_activity(id, call).await,
                NextStep::RequestApproval(notice) => self.request_approval(notice),
                NextStep::AwaitApproval => self.await_approval(id).await?,
                NextStep::OpenValidationWindow => self.open_validation_window(),
                NextStep::AwaitValidation { deadline } => self.race_validation(id, deadline).await?,
                NextStep::Complete(outcome) => PipelineEvent::Completed { outcome },
            };

            let recorded = self.store.append_event(id, &event).await?;
            state.apply(&recorded.event, recorded.recorded_at)?;
            self.after_recorded(&state, &recorded.event).await?;
        }
    }

    async fn run_activity(&self, id: Uuid, call: ActivityCall) -> PipelineEvent {
        match call {
            ActivityCall::Build(req) => self.build(id, &req).await,
            ActivityCall::Test(req) => self.test(id, &req).await,
            ActivityCall::Publish(req) => self.publish(id, &req).await,
            ActivityCall::Deploy(req) => self.deploy(id, &req).await,
            ActivityCall::Rollback(req) => self.rollback(id, &req).await,
        }
    }

    /// Side effects that must only happen once their event is durable
    async fn after_recorded(&self, state: &PipelineState, event: &PipelineEvent) -> Result<(), WorkflowError> {
        match event {
            PipelineEvent::ApprovalReceived {
                signal_id,
                decision,
                received_at,
            } => {
                self.store.consume_signal(*signal_id).await?;
                self.audit_decision(state, decision.clone(), *received_at);
            }
            PipelineEvent::ValidationReceived { signal_id, .. } => {
                self.store.consume_signal(*signal_id).await?;
            }
            PipelineEvent::Completed { outcome } => report_outcome(state, outcome),
            _ => {}
        }
        Ok(())
    }

    /// Retry an activity call, recording each failed attempt
    pub(super) async fn call_with_retry<T, F, Fut>(
        &self,
        id: Uuid,
        phase: Phase,
        op: F,
    ) -> Result<T, ActivityError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, ActivityError>>,
    {
        let op = &op;
        self.settings
            .retry
            .execute(phase.as_str(), |attempt| async move {
                let result = op().await;
                if let Err(e) = &result {
                    let event = PipelineEvent::ActivityAttemptFailed {
                        phase,
                        attempt,
                        error: e.to_string(),
                    };
                    if let Err(store_err) = self.store.append_event(id, &event).await {
                        warn!(error = %store_err, "Failed to record attempt failure");
                    }
                }
                result
            })
            .await
    }
}

fn report_outcome(state: &PipelineState, outcome: &PipelineOutcome) {
    let finished = state.completed_at().unwrap_or_else(Utc::now);
    let duration_ms = (finished - state.started_at()).num_milliseconds();

    match outcome {
        PipelineOutcome::Succeeded => {
            info!(duration_ms, image = %state.request().artifact_reference(), "Pipeline succeeded")
        }
        PipelineOutcome::RollbackFailed { reason, error } => error!(
            alert = true,
            duration_ms,
            reason = %reason,
            error = %error,
            "Pipeline finished with a failed rollback, production needs manual attention"
        ),
        other => warn!(duration_ms, outcome = %other, "Pipeline did not succeed"),
    }
}
