//! Pipeline Repository
//!
//! Postgres implementation of the pipeline store.
//!
//! Appends and signal admission lock the `pipeline_runs` row of their run, so
//! a gate resolution and a signal for the same gate are always ordered.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use gantry_core::domain::event::{PipelineEvent, RecordedEvent};
use gantry_core::domain::pipeline::PipelineRun;
use gantry_core::domain::signal::{ReceivedSignal, Signal, SignalKind};
use sqlx::{PgConnection, PgExecutor, PgPool};
use uuid::Uuid;

use crate::repository::{PipelineStore, SignalAdmission, StoreError, StoreResult, refuse_signal};

pub struct PgPipelineStore {
    pool: PgPool,
}

impl PgPipelineStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PipelineStore for PgPipelineStore {
    async fn create_run(&self, run: &PipelineRun) -> StoreResult<()> {
        let started = PipelineEvent::Started {
            request: run.request.clone(),
        };

        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO pipeline_runs (id, request, created_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(run.id)
        .bind(serde_json::to_value(&run.request)?)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        if inserted.rows_affected() == 0 {
            return Err(StoreError::DuplicateRun(run.id));
        }

        sqlx::query(
            r#"
            INSERT INTO pipeline_events (run_id, event_type, payload, recorded_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run.id)
        .bind(started.name())
        .bind(serde_json::to_value(&started)?)
        .bind(run.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_runs(&self) -> StoreResult<Vec<PipelineRun>> {
        let rows = sqlx::query_as::<_, RunRow>(
            r#"
            SELECT id, request, created_at
            FROM pipeline_runs
            ORDER BY created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(PipelineRun::try_from).collect()
    }

    async fn append_event(&self, run_id: Uuid, event: &PipelineEvent) -> StoreResult<RecordedEvent> {
        let mut tx = self.pool.begin().await?;
        lock_run(&mut *tx, run_id).await?;

        let recorded_at = Utc::now();
        let seq = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO pipeline_events (run_id, event_type, payload, recorded_at)
            VALUES ($1, $2, $3, $4)
            RETURNING seq
            "#,
        )
        .bind(run_id)
        .bind(event.name())
        .bind(serde_json::to_value(event)?)
        .bind(recorded_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(RecordedEvent {
            seq,
            recorded_at,
            event: event.clone(),
        })
    }

    async fn load_events(&self, run_id: Uuid) -> StoreResult<Vec<RecordedEvent>> {
        fetch_events(&self.pool, run_id).await
    }

    async fn admit_signal(&self, run_id: Uuid, signal: &Signal) -> StoreResult<SignalAdmission> {
        let kind = signal.kind();
        let mut tx = self.pool.begin().await?;
        lock_run(&mut *tx, run_id).await?;

        let events = fetch_events(&mut *tx, run_id).await?;
        let pending = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pipeline_signals
                WHERE run_id = $1 AND kind = $2 AND consumed_at IS NULL
            )
            "#,
        )
        .bind(run_id)
        .bind(kind.as_str())
        .fetch_one(&mut *tx)
        .await?;

        let received_at = Utc::now();
        if let Some(refused) = refuse_signal(run_id, &events, kind, pending, received_at)? {
            return Ok(refused);
        }

        let id = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO pipeline_signals (run_id, kind, payload, received_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(run_id)
        .bind(kind.as_str())
        .bind(serde_json::to_value(signal)?)
        .bind(received_at)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(SignalAdmission::Queued(ReceivedSignal {
            id,
            signal: signal.clone(),
            received_at,
        }))
    }

    async fn next_signal(&self, run_id: Uuid, kind: SignalKind) -> StoreResult<Option<ReceivedSignal>> {
        let row = sqlx::query_as::<_, SignalRow>(
            r#"
            SELECT id, payload, received_at
            FROM pipeline_signals
            WHERE run_id = $1 AND kind = $2 AND consumed_at IS NULL
            ORDER BY id ASC
            LIMIT 1
            "#,
        )
        .bind(run_id)
        .bind(kind.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(ReceivedSignal::try_from).transpose()
    }

    async fn consume_signal(&self, signal_id: i64) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE pipeline_signals
            SET consumed_at = $1
            WHERE id = $2 AND consumed_at IS NULL
            "#,
        )
        .bind(Utc::now())
        .bind(signal_id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Take the row lock that serializes appends and signal admission of a run
async fn lock_run(conn: &mut PgConnection, run_id: Uuid) -> StoreResult<()> {
    sqlx::query_scalar::<_, Uuid>("SELECT id FROM pipeline_runs WHERE id = $1 FOR UPDATE")
        .bind(run_id)
        .fetch_optional(conn)
        .await?
        .map(|_| ())
        .ok_or(StoreError::RunNotFound(run_id))
}

async fn fetch_events<'e, E>(executor: E, run_id: Uuid) -> StoreResult<Vec<RecordedEvent>>
where
    E: PgExecutor<'e>,
{
    let rows = sqlx::query_as::<_, EventRow>(
        r#"
        SELECT seq, payload, recorded_at
        FROM pipeline_events
        WHERE run_id = $1
        ORDER BY seq ASC
        "#,
    )
    .bind(run_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter().map(RecordedEvent::try_from).collect()
}

// =============================================================================
// Database Row Types
// =============================================================================

#[derive(sqlx::FromRow)]
struct RunRow {
    id: Uuid,
    request: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl TryFrom<RunRow> for PipelineRun {
    type Error = StoreError;

    fn try_from(row: RunRow) -> Result<Self, Self::Error> {
        Ok(PipelineRun {
            id: row.id,
            request: serde_json::from_value(row.request)?,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct EventRow {
    seq: i64,
    payload: serde_json::Value,
    recorded_at: DateTime<Utc>,
}

impl TryFrom<EventRow> for RecordedEvent {
    type Error = StoreError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(RecordedEvent {
            seq: row.seq,
            recorded_at: row.recorded_at,
            event: serde_json::from_value(row.payload)?,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SignalRow {
    id: i64,
    payload: serde_json::Value,
    received_at: DateTime<Utc>,
}

impl TryFrom<SignalRow> for ReceivedSignal {
    type Error = StoreError;

    fn try_from(row: SignalRow) -> Result<Self, Self::Error> {
        Ok(ReceivedSignal {
            id: row.id,
            signal: serde_json::from_value(row.payload)?,
            received_at: row.received_at,
        })
    }
}
