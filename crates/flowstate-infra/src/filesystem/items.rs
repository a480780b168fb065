//! Directory-backed items source.
//!
//! Treats a directory tree as an object store: every regular file under the
//! root is an object whose key is its `/`-separated path relative to the
//! root. `list({"prefix": "in/"})` yields `{"key", "size"}` for each object
//! whose key starts with the prefix, in byte order of the key.

use std::path::{Component, Path, PathBuf};

use flowstate_core::workflow::{ItemStream, ItemsSource};
use flowstate_types::error::ClassifiedError;
use serde_json::{json, Value};

#[derive(Debug, Clone)]
pub struct DirectoryItemsSource {
    root: PathBuf,
}

impl DirectoryItemsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl ItemsSource for DirectoryItemsSource {
    fn list(&self, query: &Value) -> ItemStream {
        let root = self.root.clone();
        let prefix = query
            .get("prefix")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Box::pin(async_stream::stream! {
            if !is_safe_prefix(&prefix) {
                yield Err(ClassifiedError::invalid_input(format!("invalid prefix '{prefix}'")));
                return;
            }
            let mut objects = match list_objects(&root, &prefix).await {
                Ok(objects) => objects,
                Err(e) => {
                    yield Err(ClassifiedError::transient(format!(
                        "failed to list {}: {e}",
                        root.display()
                    )));
                    return;
                }
            };
            objects.sort_by(|a, b| a.0.cmp(&b.0));
            tracing::debug!(root = %root.display(), prefix = %prefix, count = objects.len(), "listed items");
            for (key, size) in objects {
                yield Ok(json!({"key": key, "size": size}));
            }
        })
    }
}

fn is_safe_prefix(prefix: &str) -> bool {
    Path::new(prefix)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

/// Walk the smallest directory that can contain keys with `prefix`.
async fn list_objects(root: &Path, prefix: &str) -> std::io::Result<Vec<(String, u64)>> {
    let base = match prefix.rfind('/') {
        Some(i) => &prefix[..i],
        None => "",
    };

    let mut objects = Vec::new();
    let mut pending = vec![root.join(base)];
    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() {
                let Some(key) = object_key(root, &path) else {
                    continue;
                };
                if key.starts_with(prefix) {
                    let size = entry.metadata().await?.len();
                    objects.push((key, size));
                }
            }
        }
    }
    Ok(objects)
}

fn object_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Option<Vec<&str>> = relative.components().map(|c| c.as_os_str().to_str()).collect();
    Some(parts?.join("/"))
}
