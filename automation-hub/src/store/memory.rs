//! In-process store for single-instance deployments and tests.

use super::{validate_key, PipelineStore};
use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};

/// A mutex-guarded map of collections.
#[derive(Debug, Default)]
pub struct MemoryStore {
    collections: RwLock<HashMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of entries in `collection`.
    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.collections
            .read()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }
}

#[async_trait]
impl PipelineStore for MemoryStore {
    async fn put(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        validate_key(key)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn get(&self, collection: &str, key: &str) -> Result<Option<serde_json::Value>> {
        validate_key(key)?;
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|c| c.get(key))
            .cloned())
    }

    async fn get_all(&self, collection: &str) -> Result<Vec<(String, serde_json::Value)>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .map(|c| c.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        validate_key(key)?;
        if let Some(c) = self.collections.write().get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_get_delete() {
        let store = MemoryStore::new();
        store.put("pipelines", "p1", json!({"name": "one"})).await.unwrap();

        assert_eq!(
            store.get("pipelines", "p1").await.unwrap(),
            Some(json!({"name": "one"}))
        );
        assert_eq!(store.len("pipelines"), 1);

        store.delete("pipelines", "p1").await.unwrap();
        assert!(store.get("pipelines", "p1").await.unwrap().is_none());
        store.delete("pipelines", "p1").await.unwrap();
    }

    #[tokio::test]
    async fn test_get_all_sorted_by_key() {
        let store = MemoryStore::new();
        store.put("pipelines", "b", json!(2)).await.unwrap();
        store.put("pipelines", "a", json!(1)).await.unwrap();
        store.put("other", "c", json!(3)).await.unwrap();

        let all = store.get_all("pipelines").await.unwrap();
        assert_eq!(all, vec![("a".to_string(), json!(1)), ("b".to_string(), json!(2))]);
        assert!(store.get_all("missing").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_key() {
        let store = MemoryStore::new();
        assert!(store.put("pipelines", "a/b", json!(1)).await.is_err());
    }
}
