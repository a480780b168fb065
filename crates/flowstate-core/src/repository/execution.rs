//! Execution repository trait definition.

use flowstate_types::error::RepositoryError;
use flowstate_types::execution::{ExecutionRecord, ExecutionStatus, Failure, TraceEvent};
use serde_json::Value;
use uuid::Uuid;

/// Storage for execution records and their traces.
///
/// Uses native async fn in traits (Rust 2024 edition, no async_trait macro).
pub trait ExecutionRepository: Send + Sync + 'static {
    // -----------------------------------------------------------------------
    // Records
    // -----------------------------------------------------------------------

    /// Insert a new record. Fails with `Conflict` if the id exists.
    fn create_execution(
        &self,
        record: &ExecutionRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Move a running execution to a terminal status.
    fn finish_execution(
        &self,
        id: &Uuid,
        status: ExecutionStatus,
        output: Option<&Value>,
        failure: Option<&Failure>,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_execution(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<ExecutionRecord>, RepositoryError>> + Send;

    /// Most recent executions first.
    fn list_executions(
        &self,
        limit: u32,
    ) -> impl std::future::Future<Output = Result<Vec<ExecutionRecord>, RepositoryError>> + Send;

    // -----------------------------------------------------------------------
    // Trace
    // -----------------------------------------------------------------------

    fn append_trace(
        &self,
        events: &[TraceEvent],
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Trace events ordered by sequence.
    fn get_trace(
        &self,
        execution_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<TraceEvent>, RepositoryError>> + Send;
}
