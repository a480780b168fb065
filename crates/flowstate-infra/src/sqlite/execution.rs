//! SQLite execution repository implementation.
//!
//! Implements `ExecutionRepository` from `flowstate-core`. Inputs, outputs,
//! failures and trace outcomes are stored as JSON text; timestamps as
//! RFC 3339.

use chrono::{DateTime, Utc};
use flowstate_core::repository::ExecutionRepository;
use flowstate_types::error::RepositoryError;
use flowstate_types::execution::{
    ExecutionRecord, ExecutionStatus, Failure, TraceEvent, TraceOutcome,
};
use serde_json::Value;
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `ExecutionRepository`.
pub struct SqliteExecutionRepository {
    pool: DatabasePool,
}

impl SqliteExecutionRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct ExecutionRow {
    id: String,
    workflow_name: String,
    status: String,
    input: String,
    output: Option<String>,
    failure: Option<String>,
    started_at: String,
    stopped_at: Option<String>,
}

impl ExecutionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            workflow_name: row.try_get("workflow_name")?,
            status: row.try_get("status")?,
            input: row.try_get("input")?,
            output: row.try_get("output")?,
            failure: row.try_get("failure")?,
            started_at: row.try_get("started_at")?,
            stopped_at: row.try_get("stopped_at")?,
        })
    }

    fn into_record(self) -> Result<ExecutionRecord, RepositoryError> {
        let status: ExecutionStatus = self.status.parse().map_err(RepositoryError::Query)?;
        let failure = self
            .failure
            .as_deref()
            .map(|s| {
                serde_json::from_str::<Failure>(s)
                    .map_err(|e| RepositoryError::Query(format!("invalid failure JSON: {e}")))
            })
            .transpose()?;

        Ok(ExecutionRecord {
            id: parse_uuid(&self.id)?,
            workflow_name: self.workflow_name,
            status,
            input: parse_json(&self.input, "input")?,
            output: self
                .output
                .as_deref()
                .map(|s| parse_json(s, "output"))
                .transpose()?,
            failure,
            started_at: parse_datetime(&self.started_at)?,
            stopped_at: self.stopped_at.as_deref().map(parse_datetime).transpose()?,
        })
    }
}

struct TraceRow {
    execution_id: String,
    sequence: i64,
    path: String,
    state_name: String,
    state_type: String,
    attempt: i64,
    input: String,
    outcome: String,
    started_at: String,
    finished_at: String,
}

impl TraceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            execution_id: row.try_get("execution_id")?,
            sequence: row.try_get("sequence")?,
            path: row.try_get("path")?,
            state_name: row.try_get("state_name")?,
            state_type: row.try_get("state_type")?,
            attempt: row.try_get("attempt")?,
            input: row.try_get("input")?,
            outcome: row.try_get("outcome")?,
            started_at: row.try_get("started_at")?,
            finished_at: row.try_get("finished_at")?,
        })
    }

    fn into_event(self) -> Result<TraceEvent, RepositoryError> {
        let outcome: TraceOutcome = serde_json::from_str(&self.outcome)
            .map_err(|e| RepositoryError::Query(format!("invalid trace outcome JSON: {e}")))?;
        Ok(TraceEvent {
            execution_id: parse_uuid(&self.execution_id)?,
            sequence: self.sequence as u64,
            path: self.path,
            state_name: self.state_name,
            state_type: self.state_type,
            attempt: self.attempt as u32,
            input: parse_json(&self.input, "trace input")?,
            outcome,
            started_at: parse_datetime(&self.started_at)?,
            finished_at: parse_datetime(&self.finished_at)?,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_json(s: &str, what: &str) -> Result<Value, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {what} JSON: {e}")))
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// ExecutionRepository impl
// ---------------------------------------------------------------------------

impl ExecutionRepository for SqliteExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        let output = record.output.as_ref().map(to_json).transpose()?;
        let failure = record.failure.as_ref().map(to_json).transpose()?;

        sqlx::query(
            r#"INSERT INTO executions
               (id, workflow_name, status, input, output, failure, started_at, stopped_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(record.id.to_string())
        .bind(&record.workflow_name)
        .bind(record.status.as_str())
        .bind(to_json(&record.input)?)
        .bind(&output)
        .bind(&failure)
        .bind(format_datetime(&record.started_at))
        .bind(record.stopped_at.as_ref().map(format_datetime))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db) if db.is_unique_violation() => {
                RepositoryError::Conflict(format!("execution {} already exists", record.id))
            }
            other => query_error(other),
        })?;

        Ok(())
    }

    async fn finish_execution(
        &self,
        id: &Uuid,
        status: ExecutionStatus,
        output: Option<&Value>,
        failure: Option<&Failure>,
    ) -> Result<(), RepositoryError> {
        let output = output.map(to_json).transpose()?;
        let failure = failure.map(to_json).transpose()?;

        let result = sqlx::query(
            "UPDATE executions SET status = ?, output = ?, failure = ?, stopped_at = ? WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(&output)
        .bind(&failure)
        .bind(format_datetime(&Utc::now()))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM executions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        match row {
            Some(row) => {
                let r = ExecutionRow::from_row(&row).map_err(query_error)?;
                Ok(Some(r.into_record()?))
            }
            None => Ok(None),
        }
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM executions ORDER BY started_at DESC, id DESC LIMIT ?")
            .bind(limit as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = ExecutionRow::from_row(row).map_err(query_error)?;
            records.push(r.into_record()?);
        }
        Ok(records)
    }

    async fn append_trace(&self, events: &[TraceEvent]) -> Result<(), RepositoryError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for event in events {
            sqlx::query(
                r#"INSERT INTO trace_events
                   (execution_id, sequence, path, state_name, state_type, attempt,
                    input, outcome, started_at, finished_at)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(event.execution_id.to_string())
            .bind(event.sequence as i64)
            .bind(&event.path)
            .bind(&event.state_name)
            .bind(&event.state_type)
            .bind(event.attempt as i64)
            .bind(to_json(&event.input)?)
            .bind(to_json(&event.outcome)?)
            .bind(format_datetime(&event.started_at))
            .bind(format_datetime(&event.finished_at))
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get_trace(&self, execution_id: &Uuid) -> Result<Vec<TraceEvent>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM trace_events WHERE execution_id = ? ORDER BY sequence")
            .bind(execution_id.to_string())
            .fetch_all(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let mut events = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = TraceRow::from_row(row).map_err(query_error)?;
            events.push(r.into_event()?);
        }
        Ok(events)
    }
}
