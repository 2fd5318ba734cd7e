//! In-memory store for tests and embedding.

use std::sync::Mutex;

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
};

use crate::{Result, store::Store};

/// In-memory store backed by a JSON map. No persistence.
pub struct InMemoryStore {
    data: Mutex<Map<String, Value>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            data: Mutex::new(Map::new()),
        }
    }

    /// Start from pre-populated contents.
    pub fn with_data(data: Map<String, Value>) -> Self {
        Self {
            data: Mutex::new(data),
        }
    }

    /// Copy of everything currently stored.
    pub fn snapshot(&self) -> Map<String, Value> {
        self.data.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Store for InMemoryStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>> {
        let data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        Ok(select(&data, keys))
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<()> {
        let mut data = self.data.lock().unwrap_or_else(|e| e.into_inner());
        data.extend(entries);
        Ok(())
    }
}

/// Pick `keys` out of `data`, or clone everything for `None`.
pub(crate) fn select(data: &Map<String, Value>, keys: Option<&[String]>) -> Map<String, Value> {
    match keys {
        None => data.clone(),
        Some(keys) => keys
            .iter()
            .filter_map(|k| data.get(k).map(|v| (k.clone(), v.clone())))
            .collect(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json};

    fn keys(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = InMemoryStore::new();
        let mut entries = Map::new();
        entries.insert("channel".into(), json!("beta"));
        entries.insert("release_plugins_flat".into(), json!({}));
        store.set(entries).await.unwrap();

        let got = store.get(Some(&keys(&["channel"]))).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got["channel"], "beta");
    }

    #[tokio::test]
    async fn test_missing_keys_are_absent() {
        let store = InMemoryStore::new();
        let got = store.get(Some(&keys(&["nope"]))).await.unwrap();
        assert!(got.is_empty());
    }

    #[tokio::test]
    async fn test_set_merges() {
        let store = InMemoryStore::new();
        let mut first = Map::new();
        first.insert("a".into(), json!(1));
        first.insert("b".into(), json!(2));
        store.set(first).await.unwrap();

        let mut second = Map::new();
        second.insert("b".into(), json!(3));
        store.set(second).await.unwrap();

        let all = store.get(None).await.unwrap();
        assert_eq!(all["a"], 1);
        assert_eq!(all["b"], 3);
    }
}
