//! Approval gate
//!
//! Announces the staged build, then suspends until an approval decision shows
//! up in the inbox. There is no timeout. Notifications run in detached tasks
//! with their own retry budget and never hold the pipeline up.

use chrono::{DateTime, Utc};
use gantry_core::domain::activity::{ApprovalNotice, DecisionNotice};
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::pipeline::Environment;
use gantry_core::domain::signal::{ApprovalDecision, Signal, SignalKind};
use gantry_core::domain::state::PipelineState;
use std::future::Future;
use tracing::{Instrument, info, warn};
use uuid::Uuid;

use crate::activity::ActivityError;
use crate::repository::StoreError;
use crate::workflow::coordinator::WorkflowEngine;

impl WorkflowEngine {
    pub(super) fn request_approval(&self, notice: ApprovalNotice) -> PipelineEvent {
        info!(
            image = %notice.image,
            staging_endpoint = %notice.staging_endpoint,
            "Requesting approval for production"
        );

        let event = PipelineEvent::ApprovalRequested {
            image: notice.image.clone(),
            staging_endpoint: notice.staging_endpoint.clone(),
        };

        let activities = self.activities.clone();
        self.spawn_notification(notice.pipeline_id, "notify_approval_request", move || {
            let activities = activities.clone();
            let notice = notice.clone();
            async move { activities.notify_approval_request(&notice).await }
        });

        event
    }

    pub(super) async fn await_approval(&self, id: Uuid) -> Result<PipelineEvent, StoreError> {
        let wakeup = self.hub.subscribe(id).await;
        info!("Waiting for approval");

        loop {
            if let Some(received) = self.store.next_signal(id, SignalKind::Approval).await? {
                match received.signal {
                    Signal::Approval(decision) => {
                        info!(
                            approved = decision.approved,
                            approver = %decision.approver,
                            reason = %decision.reason,
                            "Approval decision received"
                        );
                        return Ok(PipelineEvent::ApprovalReceived {
                            signal_id: received.id,
                            decision,
                            received_at: received.received_at,
                        });
                    }
                    other => {
                        warn!(kind = %other.kind(), "Discarding mismatched signal from the approval inbox");
                        self.store.consume_signal(received.id).await?;
                        continue;
                    }
                }
            }

            wakeup.notified().await;
        }
    }

    /// Fire-and-forget audit of an approval decision
    pub(super) fn audit_decision(
        &self,
        state: &PipelineState,
        decision: ApprovalDecision,
        decided_at: DateTime<Utc>,
    ) {
        let notice = DecisionNotice {
            pipeline_id: state.id(),
            image: state.request().artifact_reference(),
            environment: Environment::Production,
            decision,
            decided_at,
        };

        let activities = self.activities.clone();
        self.spawn_notification(state.id(), "notify_approval_decision", move || {
            let activities = activities.clone();
            let notice = notice.clone();
            async move { activities.notify_approval_decision(&notice).await }
        });
    }

    /// Run a notification off the critical path
    ///
    /// Exhausting the notification retry budget only records an
    /// informational event.
    fn spawn_notification<F, Fut>(&self, id: Uuid, call: &'static str, op: F)
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ActivityError>> + Send,
    {
        let store = self.store.clone();
        let policy = self.settings.notify_retry.clone();

        tokio::spawn(
            async move {
                let op = &op;
                if let Err(e) = policy.execute(call, |_| op()).await {
                    warn!(call, error = %e, "Notification failed");
                    let event = PipelineEvent::NotificationFailed {
                        error: format!("{}: {}", call, e),
                    };
                    if let Err(store_err) = store.append_event(id, &event).await {
                        warn!(error = %store_err, "Failed to record notification failure");
                    }
                }
            }
            .in_current_span(),
        );
    }
}
