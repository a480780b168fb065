//! Repository trait definitions (ports).
//!
//! The engine persists execution records and traces through these traits and
//! resolves secret parameters through [`ParameterStore`]. `flowstate-infra`
//! provides the SQLite and environment implementations; [`memory`] holds an
//! in-process execution store used by tests and ad-hoc CLI runs.

pub mod execution;
pub mod memory;
pub mod parameter;

pub use execution::ExecutionRepository;
pub use memory::MemoryExecutionRepository;
pub use parameter::ParameterStore;
