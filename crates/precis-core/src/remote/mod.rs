//! Remote document store.
//!
//! Each dataset lives in one named JSON document in the user's private
//! application storage. Documents are always replaced whole.

mod drive;
mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use drive::DriveDocumentStore;
pub use memory::MemoryDocumentStore;

use crate::error::SyncResult;

/// Metadata of one stored document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFileInfo {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub modified_time: Option<String>,
}

/// Named-document storage authorised by a bearer token.
///
/// An HTTP 401 surfaces as `SyncError::TokenExpired`; every other failure
/// as `SyncError::Network`.
#[async_trait]
pub trait RemoteDocumentStore: Send + Sync {
    /// Content of `name`, or `None` when it does not exist.
    async fn get(&self, token: &str, name: &str) -> SyncResult<Option<Value>>;

    /// Create `name` or replace its whole content.
    async fn save(&self, token: &str, name: &str, content: &Value) -> SyncResult<()>;

    /// Remove `name`; a missing document is not an error.
    async fn delete(&self, token: &str, name: &str) -> SyncResult<()>;

    /// Documents matching an optional backend query.
    async fn list(&self, token: &str, query: Option<&str>) -> SyncResult<Vec<RemoteFileInfo>>;
}
