//! Items source port for Map states with an `ItemReader`.
//!
//! Sources return a lazy stream so that large listings are pulled only as
//! fast as the Map dispatches work.

use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;

use flowstate_types::error::ClassifiedError;
use futures_util::{Stream, StreamExt};
use serde_json::Value;

pub type ItemStream = Pin<Box<dyn Stream<Item = Result<Value, ClassifiedError>> + Send + 'static>>;

/// Lists items for a Map state. `query` is the rendered
/// `ItemReader.Arguments` (or `null`).
pub trait ItemsSource: Send + Sync {
    fn list(&self, query: &Value) -> ItemStream;
}

/// A fixed list of items, independent of the query.
#[derive(Debug, Clone, Default)]
pub struct StaticItems {
    items: Vec<Value>,
}

impl StaticItems {
    pub fn new(items: Vec<Value>) -> Self {
        Self { items }
    }
}

impl ItemsSource for StaticItems {
    fn list(&self, _query: &Value) -> ItemStream {
        futures_util::stream::iter(self.items.clone().into_iter().map(Ok)).boxed()
    }
}

/// Items sources by `ItemReader.Resource` name.
#[derive(Clone, Default)]
pub struct ItemsSourceRegistry {
    sources: BTreeMap<String, Arc<dyn ItemsSource>>,
}

impl ItemsSourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, source: Arc<dyn ItemsSource>) {
        self.sources.insert(name.into(), source);
    }

    pub fn with(mut self, name: impl Into<String>, source: impl ItemsSource + 'static) -> Self {
        self.register(name, Arc::new(source));
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ItemsSource>> {
        self.sources.get(name).cloned()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }
}

impl std::fmt::Debug for ItemsSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemsSourceRegistry")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_items_stream_in_order() {
        let registry = ItemsSourceRegistry::new().with("fixed", StaticItems::new(vec![json!(1), json!(2)]));
        let source = registry.get("fixed").unwrap();
        let items: Vec<Value> = source
            .list(&Value::Null)
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(items, vec![json!(1), json!(2)]);
        assert!(registry.get("other").is_none());
    }
}
