//! Task invocation port.
//!
//! `TaskInvoker` is implemented by whatever actually runs a Task's compute
//! unit (an HTTP endpoint, an in-process function, a test double). The engine
//! only sees [`BoxTaskInvoker`], usually wrapping a [`TaskRegistry`] that
//! dispatches on the state's `Resource` name.
//!
//! Invokers must classify their failures; the engine retries and routes
//! errors purely on [`ErrorClass`](flowstate_types::error::ErrorClass).

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use flowstate_types::error::ClassifiedError;
use serde_json::Value;

/// One invocation of a task.
#[derive(Debug, Clone, PartialEq)]
pub struct Invocation {
    /// Task name from the state's `Resource`.
    pub resource: String,
    pub payload: Value,
    pub timeout: Duration,
}

/// Something that can run a named task.
pub trait TaskInvoker: Send + Sync {
    fn invoke(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<Value, ClassifiedError>> + Send;
}

// ---------------------------------------------------------------------------
// Dynamic dispatch
// ---------------------------------------------------------------------------

/// Object-safe version of [`TaskInvoker`] with boxed futures.
pub trait TaskInvokerDyn: Send + Sync {
    fn invoke_boxed<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ClassifiedError>> + Send + 'a>>;
}

impl<T: TaskInvoker> TaskInvokerDyn for T {
    fn invoke_boxed<'a>(
        &'a self,
        invocation: &'a Invocation,
    ) -> Pin<Box<dyn Future<Output = Result<Value, ClassifiedError>> + Send + 'a>> {
        Box::pin(self.invoke(invocation))
    }
}

/// Type-erased, cheaply cloneable task invoker.
#[derive(Clone)]
pub struct BoxTaskInvoker {
    inner: Arc<dyn TaskInvokerDyn>,
}

impl BoxTaskInvoker {
    pub fn new<T: TaskInvoker + 'static>(invoker: T) -> Self {
        Self {
            inner: Arc::new(invoker),
        }
    }

    pub async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
        self.inner.invoke_boxed(invocation).await
    }
}

impl std::fmt::Debug for BoxTaskInvoker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoxTaskInvoker").finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Function tasks
// ---------------------------------------------------------------------------

/// Adapts an async closure over the payload into a [`TaskInvoker`].
pub struct FnTask<F> {
    f: F,
}

impl<F> FnTask<F> {
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F, Fut> TaskInvoker for FnTask<F>
where
    F: Fn(Value) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ClassifiedError>> + Send,
{
    fn invoke(
        &self,
        invocation: &Invocation,
    ) -> impl Future<Output = Result<Value, ClassifiedError>> + Send {
        (self.f)(invocation.payload.clone())
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Dispatches invocations to the invoker registered under `Resource`.
///
/// Unknown resources fail with `InvalidInput`; invocations that exceed their
/// timeout fail with `States.Timeout`.
#[derive(Clone, Debug, Default)]
pub struct TaskRegistry {
    tasks: BTreeMap<String, BoxTaskInvoker>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, invoker: BoxTaskInvoker) {
        self.tasks.insert(name.into(), invoker);
    }

    /// Builder-style [`register`](Self::register).
    pub fn with<T: TaskInvoker + 'static>(mut self, name: impl Into<String>, invoker: T) -> Self {
        self.register(name, BoxTaskInvoker::new(invoker));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tasks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tasks.keys().map(String::as_str)
    }
}

impl TaskInvoker for TaskRegistry {
    async fn invoke(&self, invocation: &Invocation) -> Result<Value, ClassifiedError> {
        let Some(task) = self.tasks.get(&invocation.resource) else {
            return Err(ClassifiedError::invalid_input(format!(
                "no task registered as '{}'",
                invocation.resource
            )));
        };
        match tokio::time::timeout(invocation.timeout, task.invoke(invocation)).await {
            Ok(result) => result,
            Err(_) => Err(ClassifiedError::timeout(format!(
                "task '{}' did not finish within {:?}",
                invocation.resource, invocation.timeout
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flowstate_types::error::ErrorClass;
    use serde_json::json;

    fn invocation(resource: &str, timeout: Duration) -> Invocation {
        Invocation {
            resource: resource.to_string(),
            payload: json!({"n": 2}),
            timeout,
        }
    }

    fn doubler() -> FnTask<impl Fn(Value) -> std::future::Ready<Result<Value, ClassifiedError>>> {
        FnTask::new(|payload: Value| {
            let n = payload["n"].as_i64().unwrap_or_default();
            std::future::ready(Ok(json!(n * 2)))
        })
    }

    #[tokio::test]
    async fn test_registry_dispatches_by_resource() {
        let registry = TaskRegistry::new().with("double", doubler());
        let result = registry
            .invoke(&invocation("double", Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result, json!(4));
        assert!(registry.contains("double"));
        assert_eq!(registry.names().collect::<Vec<_>>(), vec!["double"]);
    }

    #[tokio::test]
    async fn test_unknown_resource_is_invalid_input() {
        let registry = TaskRegistry::new();
        let err = registry
            .invoke(&invocation("nope", Duration::from_secs(1)))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::InvalidInput);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_task_times_out() {
        let slow = FnTask::new(|_payload: Value| async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, ClassifiedError>(json!(null))
        });
        let registry = TaskRegistry::new().with("slow", slow);
        let err = registry
            .invoke(&invocation("slow", Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(err.class, ErrorClass::Timeout);
    }

    #[tokio::test]
    async fn test_box_invoker_delegates() {
        let boxed = BoxTaskInvoker::new(TaskRegistry::new().with("double", doubler()));
        let result = boxed
            .invoke(&invocation("double", Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(result, json!(4));
    }
}
