//! Parameter store trait definition.

use flowstate_types::error::RepositoryError;
use secrecy::SecretString;

/// Read-only lookup of named secret parameters (API tokens for task
/// endpoints and the like).
pub trait ParameterStore: Send + Sync {
    /// Returns `None` if the parameter is not defined in this store.
    fn get(
        &self,
        name: &str,
    ) -> impl std::future::Future<Output = Result<Option<SecretString>, RepositoryError>> + Send;
}
