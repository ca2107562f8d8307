//! Repository Module
//!
//! Durable state of the orchestrator: pipeline runs, their append-only event
//! logs and the signal inbox. The workflow driver only talks to the
//! `PipelineStore` trait, so Postgres and the in-memory store are
//! interchangeable.

pub mod memory;
pub mod pipeline;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::domain::event::{PipelineEvent, RecordedEvent};
use gantry_core::domain::pipeline::PipelineRun;
use gantry_core::domain::signal::{ReceivedSignal, Signal, SignalKind};
use gantry_core::domain::state::{PipelineState, SignalRejection, TransitionError};
use thiserror::Error;
use uuid::Uuid;

pub use memory::MemoryPipelineStore;
pub use pipeline::PgPipelineStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("stored payload could not be decoded: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("pipeline {0} not found")]
    RunNotFound(Uuid),

    #[error("pipeline {0} already exists")]
    DuplicateRun(Uuid),

    #[error("event log of pipeline {0} does not replay: {1}")]
    Replay(Uuid, TransitionError),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// What happened to a submitted signal
#[derive(Debug, Clone, PartialEq)]
pub enum SignalAdmission {
    /// Stored in the inbox, waiting for its gate
    Queued(ReceivedSignal),
    /// The pipeline can no longer use a signal of this kind
    Rejected(SignalRejection),
    /// A decision of the same kind is already waiting to be consumed
    AlreadyPending,
}

/// Decide whether a signal may join the inbox of a run
///
/// Stores call this while holding the run exclusively, so the replayed gate
/// state and the pending check cannot change before the insert. `None`
/// means the signal is admitted.
pub(crate) fn refuse_signal(
    run_id: Uuid,
    events: &[RecordedEvent],
    kind: SignalKind,
    pending: bool,
    received_at: DateTime<Utc>,
) -> StoreResult<Option<SignalAdmission>> {
    let state =
        PipelineState::replay(run_id, events).map_err(|e| StoreError::Replay(run_id, e))?;

    if let Err(rejection) = state.admits_signal(kind, received_at) {
        return Ok(Some(SignalAdmission::Rejected(rejection)));
    }
    if pending {
        return Ok(Some(SignalAdmission::AlreadyPending));
    }
    Ok(None)
}

#[async_trait]
pub trait PipelineStore: Send + Sync {
    /// Persist a new run together with its `started` event
    async fn create_run(&self, run: &PipelineRun) -> StoreResult<()>;

    /// All runs, newest first
    async fn list_runs(&self) -> StoreResult<Vec<PipelineRun>>;

    async fn append_event(&self, run_id: Uuid, event: &PipelineEvent) -> StoreResult<RecordedEvent>;

    /// The full log of a run, in append order
    async fn load_events(&self, run_id: Uuid) -> StoreResult<Vec<RecordedEvent>>;

    /// Put a signal in the inbox if its gate can still use it
    ///
    /// Checking the gate, checking for a pending decision of the same kind and
    /// inserting happen as one step per run, and appends to the same run wait
    /// for it. An admitted signal stays in the inbox until a gate consumes it.
    async fn admit_signal(&self, run_id: Uuid, signal: &Signal) -> StoreResult<SignalAdmission>;

    /// Oldest unconsumed signal of a kind
    async fn next_signal(&self, run_id: Uuid, kind: SignalKind) -> StoreResult<Option<ReceivedSignal>>;

    async fn consume_signal(&self, signal_id: i64) -> StoreResult<()>;
}
