//! JSON file-backed store with atomic writes.

use std::path::{Path, PathBuf};

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
    tokio::{fs, sync::Mutex},
    tracing::warn,
};

use crate::{Error, Result, store::Store, store_memory::select};

/// File-backed store. All keys live in a single JSON object.
pub struct FileStore {
    path: PathBuf,
    /// Serialises read-modify-write cycles within this process.
    write_lock: Mutex<()>,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Default location: `<data dir>/storage.json`.
    pub fn default_path() -> PathBuf {
        iitcm_config::data_dir().join("storage.json")
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        if !fs::try_exists(&self.path).await.unwrap_or(false) {
            return Ok(Map::new());
        }
        let raw = fs::read_to_string(&self.path).await?;
        if raw.trim().is_empty() {
            return Ok(Map::new());
        }
        match serde_json::from_str(&raw)? {
            Value::Object(map) => Ok(map),
            _ => Err(Error::message(format!(
                "{} does not contain a JSON object",
                self.path.display()
            ))),
        }
    }

    /// Atomic write: write to temp, copy the current file to `.bak`, rename
    /// temp over target. The target path exists at every point, so readers
    /// never observe a missing document.
    async fn atomic_write(&self, data: &Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(data)?;
        let tmp = self.path.with_extension("json.tmp");

        fs::write(&tmp, json.as_bytes()).await?;

        if fs::try_exists(&self.path).await.unwrap_or(false) {
            let bak = self.path.with_extension("json.bak");
            if let Err(e) = fs::copy(&self.path, &bak).await {
                warn!(path = %bak.display(), error = %e, "failed to refresh storage backup");
            }
        }

        fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for FileStore {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>> {
        let data = self.load().await?;
        Ok(select(&data, keys))
    }

    async fn set(&self, entries: Map<String, Value>) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let mut data = self.load().await?;
        data.extend(entries);
        self.atomic_write(&data).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, serde_json::json, std::sync::Arc, tempfile::TempDir};

    fn entry(key: &str, value: Value) -> Map<String, Value> {
        let mut map = Map::new();
        map.insert(key.into(), value);
        map
    }

    #[tokio::test]
    async fn test_file_store_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("storage.json"));

        store.set(entry("channel", json!("beta"))).await.unwrap();
        store
            .set(entry("beta_plugins_flat", json!({"a+b": {"status": "on"}})))
            .await
            .unwrap();

        let all = store.get(None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["channel"], "beta");

        let reopened = FileStore::new(tmp.path().join("storage.json"));
        let got = reopened
            .get(Some(&["beta_plugins_flat".to_string()]))
            .await
            .unwrap();
        assert_eq!(got["beta_plugins_flat"]["a+b"]["status"], "on");
    }

    #[tokio::test]
    async fn test_file_store_load_empty() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("nested").join("storage.json"));
        assert!(store.get(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_file_store_creates_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("nested").join("storage.json");
        let store = FileStore::new(&path);
        store.set(entry("is_daemon", json!(false))).await.unwrap();
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_file_store_backup_created() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("storage.json"));

        store.set(entry("a", json!(1))).await.unwrap();
        store.set(entry("b", json!(2))).await.unwrap();

        assert!(tmp.path().join("storage.json.bak").exists());
        assert!(!tmp.path().join("storage.json.tmp").exists());
    }

    #[tokio::test]
    async fn test_file_store_backup_holds_previous_document() {
        let tmp = TempDir::new().unwrap();
        let store = FileStore::new(tmp.path().join("storage.json"));

        store.set(entry("a", json!(1))).await.unwrap();
        store.set(entry("b", json!(2))).await.unwrap();

        let raw = std::fs::read_to_string(tmp.path().join("storage.json.bak")).unwrap();
        let bak: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(bak, json!({"a": 1}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_file_store_reads_never_see_missing_document() {
        let tmp = TempDir::new().unwrap();
        let store = Arc::new(FileStore::new(tmp.path().join("storage.json")));
        store
            .set(entry("release_plugins_user", json!({"x+ns": {"user": true}})))
            .await
            .unwrap();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                for i in 0..100 {
                    store.set(entry("counter", json!(i))).await.unwrap();
                }
            })
        };
        while !writer.is_finished() {
            let data = store.get(None).await.unwrap();
            assert!(data.contains_key("release_plugins_user"), "read an empty document");
        }
        writer.await.unwrap();
        assert_eq!(store.get(None).await.unwrap()["counter"], 99);
    }

    #[tokio::test]
    async fn test_file_store_rejects_non_object() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("storage.json");
        std::fs::write(&path, "[1, 2, 3]").unwrap();

        let store = FileStore::new(&path);
        assert!(store.get(None).await.is_err());
    }
}
