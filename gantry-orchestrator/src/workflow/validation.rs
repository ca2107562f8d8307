//! Validation race
//!
//! After a production deploy, a validation signal and the window deadline race.
//! The winner is decided by timestamps, not by which wakeup fires first: a
//! signal wins only if it was received strictly before the deadline. The same
//! rule applies when the race is picked up again after a restart.

use chrono::{DateTime, Utc};
use gantry_core::domain::event::PipelineEvent;
use gantry_core::domain::signal::{Signal, SignalKind};
use tracing::{info, warn};
use uuid::Uuid;

use crate::repository::StoreError;
use crate::workflow::coordinator::WorkflowEngine;

impl WorkflowEngine {
    pub(super) fn open_validation_window(&self) -> PipelineEvent {
        let window = chrono::Duration::from_std(self.settings.validation_window)
            .unwrap_or_else(|_| chrono::Duration::days(365));
        let deadline = Utc::now() + window;

        info!(deadline = %deadline, window_secs = window.num_seconds(), "Validation window opened");
        PipelineEvent::ValidationWindowOpened { deadline }
    }

    pub(super) async fn race_validation(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> Result<PipelineEvent, StoreError> {
        let wakeup = self.hub.subscribe(id).await;

        loop {
            if let Some(received) = self.store.next_signal(id, SignalKind::Validation).await? {
                if received.received_at >= deadline {
                    info!(received_at = %received.received_at, "Validation arrived after the deadline, timer wins");
                    return Ok(PipelineEvent::ValidationTimedOut);
                }

                match received.signal {
                    Signal::Validation(decision) => {
                        info!(
                            validated = decision.validated,
                            validator = %decision.validator,
                            reason = %decision.reason,
                            "Validation decision received"
                        );
                        return Ok(PipelineEvent::ValidationReceived {
                            signal_id: received.id,
                            decision,
                            received_at: received.received_at,
                        });
                    }
                    other => {
                        warn!(kind = %other.kind(), "Discarding mismatched signal from the validation inbox");
                        self.store.consume_signal(received.id).await?;
                        continue;
                    }
                }
            }

            let remaining = match (deadline - Utc::now()).to_std() {
                Ok(remaining) if !remaining.is_zero() => remaining,
                _ => {
                    warn!(deadline = %deadline, "Validation window expired without confirmation");
                    return Ok(PipelineEvent::ValidationTimedOut);
                }
            };

            tokio::select! {
                _ = wakeup.notified() => {}
                // One more inbox check after the sleep: a signal received just
                // before the deadline still wins.
                _ = tokio::time::sleep(remaining) => {}
            }
        }
    }
}
