//! Remote tree providers.
//!
//! The engine sees a remote store only through [`RemoteTreeProvider`]: paged
//! folder listings plus per-item lookups. Real service clients live outside
//! this crate; [`InMemoryTree`] and [`LocalDirProvider`] are the providers
//! shipped here.

mod local;
mod memory;

pub use local::LocalDirProvider;
pub use memory::{Call, InMemoryTree, Op};

use crate::error::TributaryError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tributary_db::{ItemKind, PermissionRecord, RevisionRecord};

/// One node of the remote tree as reported by the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteItem {
    /// Stable across runs and unique within the store.
    pub id: String,
    pub kind: ItemKind,
    pub name: String,
    pub parent_ids: Vec<String>,
    pub modified_at: DateTime<Utc>,
    /// Opaque comparable token: a revision id or a checksum.
    pub version: String,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    /// Provider-specific metadata kept when metadata extraction is on.
    #[serde(default)]
    pub properties: Option<serde_json::Value>,
}

impl RemoteItem {
    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// Whether the content is text a document can be generated from.
    pub fn is_text(&self) -> bool {
        if self.is_folder() {
            return false;
        }
        match self.mime_type.as_deref() {
            Some(mime) => {
                mime.starts_with("text/")
                    || matches!(
                        mime,
                        "application/json" | "application/xml" | "application/x-yaml"
                    )
            }
            None => {
                let lower = self.name.to_ascii_lowercase();
                [".md", ".markdown", ".txt", ".json", ".csv", ".yaml", ".yml"]
                    .iter()
                    .any(|ext| lower.ends_with(ext))
            }
        }
    }
}

/// A page of folder children.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub items: Vec<RemoteItem>,
    pub next_page_token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("transient failure for {id}: {message}")]
    Transient { id: String, message: String },

    #[error("{id} not found")]
    NotFound { id: String },
}

impl RemoteError {
    pub fn transient(id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            id: id.into(),
            message: message.into(),
        }
    }

    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }
}

impl From<RemoteError> for TributaryError {
    fn from(err: RemoteError) -> Self {
        match err {
            RemoteError::Transient { id, message } => TributaryError::TransientFetch { id, message },
            RemoteError::NotFound { id } => TributaryError::NotFound(id),
        }
    }
}

pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Read access to a remote hierarchical store.
#[async_trait::async_trait]
pub trait RemoteTreeProvider: Send + Sync {
    /// Label for logs, e.g. the service or directory name.
    fn label(&self) -> &str;

    /// One page of a folder's direct children.
    async fn list_children(&self, folder_id: &str, page_token: Option<&str>) -> RemoteResult<Page>;

    async fn get_item(&self, id: &str) -> RemoteResult<RemoteItem>;

    async fn get_permissions(&self, id: &str) -> RemoteResult<Vec<PermissionRecord>>;

    async fn get_revisions(&self, id: &str) -> RemoteResult<Vec<RevisionRecord>>;

    async fn get_content(&self, id: &str) -> RemoteResult<Vec<u8>>;

    /// Thumbnail bytes, when the store renders them.
    async fn get_thumbnail(&self, _id: &str) -> RemoteResult<Option<Vec<u8>>> {
        Ok(None)
    }
}
