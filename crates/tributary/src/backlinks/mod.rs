//! Backlink graph over a directory of generated documents.
//!
//! Documents are keyed by their path relative to the corpus root, normalized
//! the same way as link targets, so `Notes/Ideas.md` is the document that
//! `[[notes/ideas]]` points at. References to documents that do not exist
//! yet are kept as forward references.
//!
//! Each update holds the index write lock while the diff is computed,
//! persisted in one transaction and applied in memory, so readers see either
//! the old edge set or the new one.

mod index;
mod parse;

pub use index::{BacklinkIndex, LinkDiff};
pub use parse::{extract_references, normalize_target};

use crate::error::{Result, TributaryError};
use std::collections::BTreeSet;
use std::io;
use std::path::{Component, Path, PathBuf};
use tokio::sync::RwLock;
use tracing::debug;
use tributary_db::TributaryDb;

pub struct BacklinkMaintainer {
    root: PathBuf,
    index: RwLock<BacklinkIndex>,
    store: Option<TributaryDb>,
}

impl BacklinkMaintainer {
    /// Index that lives only in memory.
    pub fn in_memory(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            index: RwLock::new(BacklinkIndex::new()),
            store: None,
        }
    }

    /// Persistent index, warmed from the stored edges.
    pub async fn load(root: impl Into<PathBuf>, db: TributaryDb) -> Result<Self> {
        let edges = db.backlinks_all().await?;
        let index = BacklinkIndex::from_edges(edges);
        debug!(edges = index.edge_count(), "Loaded backlink index");
        Ok(Self {
            root: root.into(),
            index: RwLock::new(index),
            store: Some(db),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Key for a document path. Relative paths are taken as relative to the
    /// root; absolute paths must lie under it.
    pub fn document_key(&self, document_path: &Path) -> Result<String> {
        let relative = if document_path.is_absolute() {
            document_path.strip_prefix(&self.root).map_err(|_| {
                TributaryError::invariant(format!(
                    "{} is outside the document root {}",
                    document_path.display(),
                    self.root.display()
                ))
            })?
        } else {
            document_path
        };

        if relative
            .components()
            .any(|c| matches!(c, Component::ParentDir | Component::Prefix(_)))
        {
            return Err(TributaryError::invariant(format!(
                "document path {} escapes the document root",
                document_path.display()
            )));
        }

        let joined = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("/");
        normalize_target(&joined).ok_or_else(|| {
            TributaryError::invariant(format!("empty document path {}", document_path.display()))
        })
    }

    /// Re-read the document and bring its outbound edges up to date.
    ///
    /// A missing document has no outbound references.
    pub async fn update_backlinks_from_content(&self, document_path: &Path) -> Result<LinkDiff> {
        let key = self.document_key(document_path)?;
        let absolute = if document_path.is_absolute() {
            document_path.to_path_buf()
        } else {
            self.root.join(document_path)
        };

        let content = match tokio::fs::read_to_string(&absolute).await {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(e.into()),
        };
        self.set_outbound(&key, extract_references(&content)).await
    }

    /// Index `content` as the current text of the document at `key`.
    pub async fn update_from_text(&self, key: &str, content: &str) -> Result<LinkDiff> {
        let key = normalize_target(key)
            .ok_or_else(|| TributaryError::invariant("empty document key"))?;
        self.set_outbound(&key, extract_references(content)).await
    }

    /// Retract every outbound edge of a document.
    pub async fn remove_document(&self, document_path: &Path) -> Result<LinkDiff> {
        let key = self.document_key(document_path)?;
        self.set_outbound(&key, BTreeSet::new()).await
    }

    async fn set_outbound(&self, key: &str, targets: BTreeSet<String>) -> Result<LinkDiff> {
        let mut index = self.index.write().await;
        let diff = index.diff(key, &targets);
        if diff.is_empty() {
            return Ok(diff);
        }

        if let Some(db) = &self.store {
            db.backlinks_apply_diff(key, &diff.retract, &diff.add).await?;
        }
        index.apply(key, &diff);

        debug!(
            document = key,
            retracted = diff.retract.len(),
            added = diff.add.len(),
            "Updated backlinks"
        );
        Ok(diff)
    }

    /// Documents referencing `target` (normalized before lookup).
    pub async fn backlinks(&self, target: &str) -> Vec<String> {
        match normalize_target(target) {
            Some(target) => self.index.read().await.backlinks(&target),
            None => Vec::new(),
        }
    }

    pub async fn outbound(&self, document: &str) -> Vec<String> {
        match normalize_target(document) {
            Some(document) => self.index.read().await.outbound(&document),
            None => Vec::new(),
        }
    }

    pub async fn edge_count(&self) -> usize {
        self.index.read().await.edge_count()
    }
}
