//! In-process remote store with fault injection.

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use super::{RemoteDocumentStore, RemoteFileInfo};
use crate::error::{SyncError, SyncResult};

/// Remote store kept in memory.
///
/// Queued faults are returned, one per call, before any operation touches
/// the documents. An optional latency is awaited on every `get` with
/// `tokio::time::sleep`, so paused-time tests can hold a cycle open.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    documents: Mutex<BTreeMap<String, Value>>,
    faults: Mutex<VecDeque<SyncError>>,
    saves: Mutex<Vec<(String, Value)>>,
    tokens: Mutex<Vec<String>>,
    latency: Mutex<Option<Duration>>,
    gets: AtomicUsize,
}

impl MemoryDocumentStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a document without recording a save.
    pub fn insert(&self, name: &str, content: Value) {
        lock(&self.documents).insert(name.to_string(), content);
    }

    pub fn document(&self, name: &str) -> Option<Value> {
        lock(&self.documents).get(name).cloned()
    }

    /// Return `error` from the next call.
    pub fn fail_next(&self, error: SyncError) {
        lock(&self.faults).push_back(error);
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Every successful save, in order.
    pub fn saves(&self) -> Vec<(String, Value)> {
        lock(&self.saves).clone()
    }

    pub fn saved_names(&self) -> Vec<String> {
        lock(&self.saves)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn clear_saves(&self) {
        lock(&self.saves).clear();
    }

    /// Number of `get` calls, including failed ones.
    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    /// Bearer tokens presented, in call order.
    pub fn tokens_seen(&self) -> Vec<String> {
        lock(&self.tokens).clone()
    }

    fn enter(&self, token: &str) -> SyncResult<()> {
        lock(&self.tokens).push(token.to_string());
        lock(&self.faults).pop_front().map_or(Ok(()), Err)
    }
}

#[async_trait]
impl RemoteDocumentStore for MemoryDocumentStore {
    async fn get(&self, token: &str, name: &str) -> SyncResult<Option<Value>> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        self.enter(token)?;
        Ok(self.document(name))
    }

    async fn save(&self, token: &str, name: &str, content: &Value) -> SyncResult<()> {
        self.enter(token)?;
        self.insert(name, content.clone());
        lock(&self.saves).push((name.to_string(), content.clone()));
        Ok(())
    }

    async fn delete(&self, token: &str, name: &str) -> SyncResult<()> {
        self.enter(token)?;
        lock(&self.documents).remove(name);
        Ok(())
    }

    async fn list(&self, token: &str, query: Option<&str>) -> SyncResult<Vec<RemoteFileInfo>> {
        self.enter(token)?;
        Ok(lock(&self.documents)
            .keys()
            .filter(|name| query.map_or(true, |query| name.contains(query)))
            .map(|name| RemoteFileInfo {
                id: name.clone(),
                name: name.clone(),
                modified_time: None,
            })
            .collect())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn save_then_get() {
        let store = MemoryDocumentStore::new();
        assert_eq!(store.get("t", "doc.json").await.unwrap(), None);

        store.save("t", "doc.json", &json!({"a": 1})).await.unwrap();
        assert_eq!(store.get("t", "doc.json").await.unwrap(), Some(json!({"a": 1})));
        assert_eq!(store.saved_names(), vec!["doc.json".to_string()]);
        assert_eq!(store.get_count(), 2);
    }

    #[tokio::test]
    async fn faults_are_returned_once_in_order() {
        let store = MemoryDocumentStore::new();
        store.fail_next(SyncError::TokenExpired);
        store.fail_next(SyncError::Network("offline".into()));

        assert!(matches!(store.get("t", "x").await, Err(SyncError::TokenExpired)));
        assert!(matches!(
            store.save("t", "x", &json!({})).await,
            Err(SyncError::Network(_))
        ));
        assert!(store.get("t", "x").await.is_ok());
        assert!(store.saves().is_empty());
    }

    #[tokio::test]
    async fn list_filters_and_delete_removes() {
        let store = MemoryDocumentStore::new();
        store.insert("precis-settings.json", json!({}));
        store.insert("precis-history.json", json!({}));

        assert_eq!(store.list("t", Some("history")).await.unwrap().len(), 1);
        store.delete("t", "precis-history.json").await.unwrap();
        assert_eq!(store.list("t", None).await.unwrap().len(), 1);
    }
}
