//! Engine configuration types.
//!
//! `EngineConfig` represents `flowstate.toml`. It is threaded explicitly into
//! the engine and the adapters; nothing reads configuration from globals.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration. All fields have defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Overall deadline for executions whose definition has no `TimeoutSeconds`.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Invocation timeout for Tasks without `TimeoutSeconds`.
    #[serde(default = "default_task_timeout_secs")]
    pub task_timeout_secs: u64,

    /// What happens to siblings when a Parallel branch or Map item fails.
    #[serde(default)]
    pub parallel_failure_mode: FailureMode,

    /// Maximum Parallel/Map nesting depth.
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    #[serde(default)]
    pub job_id: JobIdConfig,

    /// HTTP task registry keyed by resource name.
    #[serde(default)]
    pub tasks: BTreeMap<String, TaskEndpoint>,

    #[serde(default)]
    pub items: ItemsConfig,

    #[serde(default)]
    pub server: ServerConfig,

    /// Defaults to `sqlite://<data_dir>/flowstate.db?mode=rwc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_execution_timeout_secs() -> u64 {
    1800
}

fn default_task_timeout_secs() -> u64 {
    300
}

fn default_max_depth() -> u32 {
    16
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
            task_timeout_secs: default_task_timeout_secs(),
            parallel_failure_mode: FailureMode::default(),
            max_depth: default_max_depth(),
            job_id: JobIdConfig::default(),
            tasks: BTreeMap::new(),
            items: ItemsConfig::default(),
            server: ServerConfig::default(),
            database_url: None,
        }
    }
}

/// Sibling handling when one concurrent child fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureMode {
    /// Let every started sibling finish before the join reports the failure.
    #[default]
    RunToCompletion,
    /// Cancel running siblings as soon as one fails.
    FailFast,
}

/// Injection of a random job identifier into execution input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobIdConfig {
    #[serde(default)]
    pub inject: bool,
    #[serde(default = "default_job_id_key")]
    pub key: String,
    #[serde(default = "default_job_id_length")]
    pub length: usize,
}

fn default_job_id_key() -> String {
    "jobId".to_string()
}

fn default_job_id_length() -> usize {
    12
}

impl Default for JobIdConfig {
    fn default() -> Self {
        Self {
            inject: false,
            key: default_job_id_key(),
            length: default_job_id_length(),
        }
    }
}

/// An HTTP-reachable compute task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEndpoint {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
    /// Parameter store name holding a bearer token for this endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_secret: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ItemsConfig {
    /// Root directory of the directory items source.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    /// Directory of definitions served by name (file stem).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflows_dir: Option<String>,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            workflows_dir: None,
        }
    }
}
