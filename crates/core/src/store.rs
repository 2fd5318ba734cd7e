//! Key-value persistence contract consumed by the engine.

use {
    async_trait::async_trait,
    serde_json::{Map, Value},
};

use crate::Result;

/// Flat key-value storage.
///
/// Values are JSON documents. `get(None)` returns every key; keys that are
/// not stored are simply absent from the result. `set` merges the given
/// entries into the store, leaving other keys untouched.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, keys: Option<&[String]>) -> Result<Map<String, Value>>;
    async fn set(&self, data: Map<String, Value>) -> Result<()>;
}
