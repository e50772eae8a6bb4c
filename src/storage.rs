//! Persistent key-value storage abstraction.
//!
//! Models an origin-scoped persistent store (browser storage in the original
//! deployment target). The session manager treats it as advisory: corrupt or
//! missing entries are never fatal, and writes are last-writer-wins.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::SessionError;

/// Async string key-value store.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_item(&self, key: &str) -> Result<Option<String>, SessionError>;
    async fn set_item(&self, key: &str, value: &str) -> Result<(), SessionError>;
    async fn remove_item(&self, key: &str) -> Result<(), SessionError>;
}

/// In-memory store for tests and native callers without persistent storage.
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_item(&self, key: &str) -> Result<Option<String>, SessionError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &str) -> Result<(), SessionError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), SessionError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
