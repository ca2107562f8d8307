//! In-memory pipeline store for tests and development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::domain::event::{PipelineEvent, RecordedEvent};
use gantry_core::domain::pipeline::PipelineRun;
use gantry_core::domain::signal::{ReceivedSignal, Signal, SignalKind};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::repository::{PipelineStore, SignalAdmission, StoreError, StoreResult, refuse_signal};

#[derive(Debug, Default)]
struct Inner {
    runs: HashMap<Uuid, PipelineRun>,
    events: HashMap<Uuid, Vec<RecordedEvent>>,
    signals: Vec<InboxEntry>,
    last_seq: i64,
    last_signal_id: i64,
}

#[derive(Debug)]
struct InboxEntry {
    run_id: Uuid,
    signal: ReceivedSignal,
    consumed: bool,
}

#[derive(Debug, Default)]
pub struct MemoryPipelineStore {
    inner: RwLock<Inner>,
}

impl MemoryPipelineStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of unconsumed signals of a run
    #[cfg(test)]
    pub async fn pending_signals(&self, run_id: Uuid) -> usize {
        self.inner
            .read()
            .await
            .signals
            .iter()
            .filter(|entry| entry.run_id == run_id && !entry.consumed)
            .count()
    }

    /// Put a signal in the inbox without asking its gate
    ///
    /// Lets tests recreate inboxes that admission would not produce, such as
    /// signals left over from before a restart.
    #[cfg(test)]
    pub async fn push_signal(&self, run_id: Uuid, signal: &Signal) -> StoreResult<ReceivedSignal> {
        let mut inner = self.inner.write().await;
        if !inner.runs.contains_key(&run_id) {
            return Err(StoreError::RunNotFound(run_id));
        }
        Ok(inner.enqueue(run_id, signal, Utc::now()))
    }
}

impl Inner {
    fn record(&mut self, run_id: Uuid, event: &PipelineEvent) -> StoreResult<RecordedEvent> {
        let log = self
            .events
            .get_mut(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;

        self.last_seq += 1;
        let recorded = RecordedEvent {
            seq: self.last_seq,
            recorded_at: Utc::now(),
            event: event.clone(),
        };
        log.push(recorded.clone());
        Ok(recorded)
    }

    fn has_pending(&self, run_id: Uuid, kind: SignalKind) -> bool {
        self.signals.iter().any(|entry| {
            entry.run_id == run_id && !entry.consumed && entry.signal.signal.kind() == kind
        })
    }

    fn enqueue(&mut self, run_id: Uuid, signal: &Signal, received_at: DateTime<Utc>) -> ReceivedSignal {
        self.last_signal_id += 1;
        let received = ReceivedSignal {
            id: self.last_signal_id,
            signal: signal.clone(),
            received_at,
        };
        self.signals.push(InboxEntry {
            run_id,
            signal: received.clone(),
            consumed: false,
        });
        received
    }
}

#[async_trait]
impl PipelineStore for MemoryPipelineStore {
    async fn create_run(&self, run: &PipelineRun) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        if inner.runs.contains_key(&run.id) {
            return Err(StoreError::DuplicateRun(run.id));
        }

        inner.runs.insert(run.id, run.clone());
        inner.last_seq += 1;
        let started = RecordedEvent {
            seq: inner.last_seq,
            recorded_at: run.created_at,
            event: PipelineEvent::Started {
                request: run.request.clone(),
            },
        };
        inner.events.insert(run.id, vec![started]);
        Ok(())
    }

    async fn list_runs(&self) -> StoreResult<Vec<PipelineRun>> {
        let mut runs: Vec<PipelineRun> = self.inner.read().await.runs.values().cloned().collect();
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(runs)
    }

    async fn append_event(&self, run_id: Uuid, event: &PipelineEvent) -> StoreResult<RecordedEvent> {
        self.inner.write().await.record(run_id, event)
    }

    async fn load_events(&self, run_id: Uuid) -> StoreResult<Vec<RecordedEvent>> {
        Ok(self
            .inner
            .read()
            .await
            .events
            .get(&run_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn admit_signal(&self, run_id: Uuid, signal: &Signal) -> StoreResult<SignalAdmission> {
        let mut inner = self.inner.write().await;
        let kind = signal.kind();
        let received_at = Utc::now();

        let events = inner
            .events
            .get(&run_id)
            .ok_or(StoreError::RunNotFound(run_id))?;
        let pending = inner.has_pending(run_id, kind);
        if let Some(refused) = refuse_signal(run_id, events, kind, pending, received_at)? {
            return Ok(refused);
        }

        Ok(SignalAdmission::Queued(inner.enqueue(run_id, signal, received_at)))
    }

    async fn next_signal(&self, run_id: Uuid, kind: SignalKind) -> StoreResult<Option<ReceivedSignal>> {
        Ok(self
            .inner
            .read()
            .await
            .signals
            .iter()
            .find(|entry| {
                entry.run_id == run_id && !entry.consumed && entry.signal.signal.kind() == kind
            })
            .map(|entry| entry.signal.clone()))
    }

    async fn consume_signal(&self, signal_id: i64) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.signals.iter_mut().find(|e| e.signal.id == signal_id) {
            entry.consumed = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_core::domain::pipeline::{Environment, PipelineRequest};
    use gantry_core::domain::signal::{ApprovalDecision, ValidationDecision};
    use gantry_core::domain::state::SignalRejection;

    fn run() -> PipelineRun {
        PipelineRun {
            id: Uuid::new_v4(),
            request: PipelineRequest {
                image_name: "demo-app".to_string(),
                tag: "v1.0.0".to_string(),
                registry_url: String::new(),
                build_context: "./sample-app".to_string(),
                dockerfile: "Dockerfile".to_string(),
                environment: Environment::Production,
            },
            created_at: Utc::now(),
        }
    }

    fn approval(approver: &str) -> Signal {
        Signal::Approval(ApprovalDecision {
            approved: true,
            approver: approver.to_string(),
            reason: String::new(),
        })
    }

    #[tokio::test]
    async fn test_create_run_records_started_event() {
        let store = MemoryPipelineStore::new();
        let run = run();
        store.create_run(&run).await.unwrap();

        let events = store.load_events(run.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0].event, PipelineEvent::Started { .. }));

        assert!(matches!(
            store.create_run(&run).await,
            Err(StoreError::DuplicateRun(_))
        ));
    }

    #[tokio::test]
    async fn test_append_to_unknown_run_fails() {
        let store = MemoryPipelineStore::new();
        let result = store
            .append_event(Uuid::new_v4(), &PipelineEvent::ValidationTimedOut)
            .await;
        assert!(matches!(result, Err(StoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_inbox_hands_out_oldest_signal_per_kind() {
        let store = MemoryPipelineStore::new();
        let run = run();
        store.create_run(&run).await.unwrap();

        let first = store.push_signal(run.id, &approval("alice")).await.unwrap();
        store
            .push_signal(
                run.id,
                &Signal::Validation(ValidationDecision {
                    validated: true,
                    validator: "qa".to_string(),
                    reason: String::new(),
                }),
            )
            .await
            .unwrap();
        let second = store.push_signal(run.id, &approval("bob")).await.unwrap();

        let next = store.next_signal(run.id, SignalKind::Approval).await.unwrap();
        assert_eq!(next.map(|s| s.id), Some(first.id));

        store.consume_signal(first.id).await.unwrap();
        let next = store.next_signal(run.id, SignalKind::Approval).await.unwrap();
        assert_eq!(next.map(|s| s.id), Some(second.id));
        assert_eq!(store.pending_signals(run.id).await, 2);
    }

    #[tokio::test]
    async fn test_admission_keeps_one_pending_decision_per_kind() {
        let store = MemoryPipelineStore::new();
        let run = run();
        store.create_run(&run).await.unwrap();

        let first = store.admit_signal(run.id, &approval("alice")).await.unwrap();
        assert!(matches!(first, SignalAdmission::Queued(_)));

        let second = store.admit_signal(run.id, &approval("bob")).await.unwrap();
        assert_eq!(second, SignalAdmission::AlreadyPending);

        let validation = Signal::Validation(ValidationDecision {
            validated: true,
            validator: "qa".to_string(),
            reason: String::new(),
        });
        let third = store.admit_signal(run.id, &validation).await.unwrap();
        assert!(matches!(third, SignalAdmission::Queued(_)));
        assert_eq!(store.pending_signals(run.id).await, 2);

        let unknown = store.admit_signal(Uuid::new_v4(), &approval("carol")).await;
        assert!(matches!(unknown, Err(StoreError::RunNotFound(_))));
    }

    #[tokio::test]
    async fn test_admission_refuses_signals_staging_cannot_use() {
        let store = MemoryPipelineStore::new();
        let mut run = run();
        run.request.environment = Environment::Staging;
        store.create_run(&run).await.unwrap();

        let admission = store.admit_signal(run.id, &approval("alice")).await.unwrap();
        assert_eq!(
            admission,
            SignalAdmission::Rejected(SignalRejection::NotApplicable(SignalKind::Approval))
        );
        assert_eq!(store.pending_signals(run.id).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_admissions_queue_a_single_decision() {
        let store = std::sync::Arc::new(MemoryPipelineStore::new());
        let run = run();
        store.create_run(&run).await.unwrap();
        let run_id = run.id;

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .admit_signal(run_id, &approval(&format!("approver-{}", i)))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut queued = 0;
        for handle in handles {
            if matches!(handle.await.unwrap(), SignalAdmission::Queued(_)) {
                queued += 1;
            }
        }
        assert_eq!(queued, 1);
        assert_eq!(store.pending_signals(run_id).await, 1);
    }
}
