//! Configuration loader for Flowstate.
//!
//! Reads `flowstate.toml` from the data directory (or an explicit path) and
//! deserializes it into [`EngineConfig`]. A missing file yields the defaults;
//! a file that exists but does not parse is an error.

use std::path::{Path, PathBuf};

use flowstate_types::config::EngineConfig;
use thiserror::Error;

/// Default config file name inside the data directory.
pub const CONFIG_FILE_NAME: &str = "flowstate.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A task endpoint names a parameter the store does not hold.
    #[error("task '{task}' references missing parameter '{parameter}'")]
    MissingParameter { task: String, parameter: String },

    #[error("parameter store error: {0}")]
    Parameter(String),

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Load configuration from `path`, or from `{data_dir}/flowstate.toml` when
/// no path is given.
///
/// An explicit path that does not exist is an error; the default location
/// falls back to [`EngineConfig::default()`].
pub async fn load_config(path: Option<&Path>, data_dir: &Path) -> Result<EngineConfig, ConfigError> {
    let (config_path, required) = match path {
        Some(path) => (path.to_path_buf(), true),
        None => (data_dir.join(CONFIG_FILE_NAME), false),
    };

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
            tracing::debug!("No {CONFIG_FILE_NAME} found at {}, using defaults", config_path.display());
            return Ok(EngineConfig::default());
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: config_path,
                source,
            });
        }
    };

    let config = toml::from_str::<EngineConfig>(&content).map_err(|source| ConfigError::Parse {
        path: config_path.clone(),
        source,
    })?;
    tracing::debug!(path = %config_path.display(), tasks = config.tasks.len(), "loaded configuration");
    Ok(config)
}

/// The configured database URL, or `sqlite://<data_dir>/flowstate.db?mode=rwc`.
pub fn database_url(config: &EngineConfig, data_dir: &Path) -> String {
    config.database_url.clone().unwrap_or_else(|| {
        format!("sqlite://{}?mode=rwc", data_dir.join("flowstate.db").display())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_types::config::FailureMode;
    use tempfile::TempDir;

    #[tokio::test]
    async fn load_config_missing_file_returns_default() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(None, tmp.path()).await.unwrap();
        assert_eq!(config.execution_timeout_secs, 1800);
        assert!(config.tasks.is_empty());
    }

    #[tokio::test]
    async fn load_config_explicit_missing_file_is_error() {
        let tmp = TempDir::new().unwrap();
        let missing = tmp.path().join("nope.toml");
        let err = load_config(Some(&missing), tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[tokio::test]
    async fn load_config_valid_toml_returns_parsed() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(
            tmp.path().join(CONFIG_FILE_NAME),
            r#"
task_timeout_secs = 20
parallel_failure_mode = "fail_fast"

[tasks.copy-in]
url = "http://127.0.0.1:9000/copy-in"
"#,
        )
        .await
        .unwrap();

        let config = load_config(None, tmp.path()).await.unwrap();
        assert_eq!(config.task_timeout_secs, 20);
        assert_eq!(config.parallel_failure_mode, FailureMode::FailFast);
        assert_eq!(config.tasks["copy-in"].url, "http://127.0.0.1:9000/copy-in");
    }

    #[tokio::test]
    async fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        tokio::fs::write(tmp.path().join(CONFIG_FILE_NAME), "this is not { valid toml !!!")
            .await
            .unwrap();

        let err = load_config(None, tmp.path()).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn database_url_defaults_to_data_dir() {
        let config = EngineConfig::default();
        let url = database_url(&config, Path::new("/var/lib/flowstate"));
        assert_eq!(url, "sqlite:///var/lib/flowstate/flowstate.db?mode=rwc");

        let config = EngineConfig {
            database_url: Some("sqlite::memory:".into()),
            ..EngineConfig::default()
        };
        assert_eq!(database_url(&config, Path::new("/x")), "sqlite::memory:");
    }
}
