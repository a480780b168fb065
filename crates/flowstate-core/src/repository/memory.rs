//! In-memory execution repository.

use chrono::Utc;
use dashmap::DashMap;
use flowstate_types::error::RepositoryError;
use flowstate_types::execution::{ExecutionRecord, ExecutionStatus, Failure, TraceEvent};
use serde_json::Value;
use uuid::Uuid;

use super::execution::ExecutionRepository;

#[derive(Debug, Default)]
pub struct MemoryExecutionRepository {
    records: DashMap<Uuid, ExecutionRecord>,
    traces: DashMap<Uuid, Vec<TraceEvent>>,
}

impl MemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ExecutionRepository for MemoryExecutionRepository {
    async fn create_execution(&self, record: &ExecutionRecord) -> Result<(), RepositoryError> {
        if self.records.contains_key(&record.id) {
            return Err(RepositoryError::Conflict(format!(
                "execution {} already exists",
                record.id
            )));
        }
        self.records.insert(record.id, record.clone());
        Ok(())
    }

    async fn finish_execution(
        &self,
        id: &Uuid,
        status: ExecutionStatus,
        output: Option<&Value>,
        failure: Option<&Failure>,
    ) -> Result<(), RepositoryError> {
        let mut record = self.records.get_mut(id).ok_or(RepositoryError::NotFound)?;
        record.status = status;
        record.output = output.cloned();
        record.failure = failure.cloned();
        record.stopped_at = Some(Utc::now());
        Ok(())
    }

    async fn get_execution(&self, id: &Uuid) -> Result<Option<ExecutionRecord>, RepositoryError> {
        Ok(self.records.get(id).map(|r| r.clone()))
    }

    async fn list_executions(&self, limit: u32) -> Result<Vec<ExecutionRecord>, RepositoryError> {
        let mut records: Vec<ExecutionRecord> =
            self.records.iter().map(|r| r.value().clone()).collect();
        // v7 ids sort by creation time.
        records.sort_by(|a, b| b.id.cmp(&a.id));
        records.truncate(limit as usize);
        Ok(records)
    }

    async fn append_trace(&self, events: &[TraceEvent]) -> Result<(), RepositoryError> {
        for event in events {
            self.traces
                .entry(event.execution_id)
                .or_default()
                .push(event.clone());
        }
        Ok(())
    }

    async fn get_trace(&self, execution_id: &Uuid) -> Result<Vec<TraceEvent>, RepositoryError> {
        let mut events = self
            .traces
            .get(execution_id)
            .map(|t| t.clone())
            .unwrap_or_default();
        events.sort_by_key(|e| e.sequence);
        Ok(events)
    }
}
