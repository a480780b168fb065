//! Environment variable parameter store.
//!
//! Resolves a parameter name to `FLOWSTATE_PARAM_<NAME>`, where `<NAME>` is
//! the name upper-cased with every non-alphanumeric character replaced by
//! `_` (so `copy-token` reads `FLOWSTATE_PARAM_COPY_TOKEN`).

use flowstate_core::repository::ParameterStore;
use flowstate_types::error::RepositoryError;
use secrecy::SecretString;

const ENV_PREFIX: &str = "FLOWSTATE_PARAM_";

/// Read-only parameter store backed by environment variables.
#[derive(Debug, Default)]
pub struct EnvParameterStore;

impl EnvParameterStore {
    pub fn new() -> Self {
        Self
    }

    /// Environment variable consulted for `name`.
    pub fn env_key(name: &str) -> String {
        let suffix: String = name
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() {
                    c.to_ascii_uppercase()
                } else {
                    '_'
                }
            })
            .collect();
        format!("{ENV_PREFIX}{suffix}")
    }
}

impl ParameterStore for EnvParameterStore {
    async fn get(&self, name: &str) -> Result<Option<SecretString>, RepositoryError> {
        match std::env::var(Self::env_key(name)) {
            Ok(value) => Ok(Some(SecretString::from(value))),
            Err(std::env::VarError::NotPresent) => Ok(None),
            // Non-unicode values cannot be sent as header values anyway.
            Err(std::env::VarError::NotUnicode(_)) => Ok(None),
        }
    }
}
