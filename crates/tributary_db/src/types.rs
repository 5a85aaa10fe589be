//! Entities persisted by the state store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tributary_ids::{ConfigId, OperationId, RunId};

// ============================================================================
// Scrape configs
// ============================================================================

/// Which sub-extractions run for new or changed items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionToggles {
    pub permissions: bool,
    pub revisions: bool,
    pub content: bool,
    pub metadata: bool,
    pub thumbnail: bool,
}

impl Default for ExtractionToggles {
    fn default() -> Self {
        Self {
            permissions: true,
            revisions: true,
            content: true,
            metadata: true,
            thumbnail: false,
        }
    }
}

/// Outcome of the most recent run of a config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Success,
    Partial,
    Cancelled,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Partial => "partial",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "success" => Some(Self::Success),
            "partial" => Some(Self::Partial),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-supplied fields of a config; the key is `(user_id, workspace, name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfigSpec {
    pub user_id: String,
    pub workspace: String,
    pub name: String,
    pub enabled: bool,
    pub root_folder_ids: Vec<String>,
    pub include_subfolders: bool,
    pub max_results: u32,
    pub extract: ExtractionToggles,
}

/// A stored scrape config, including the status of its last run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeConfig {
    pub id: ConfigId,
    pub user_id: String,
    pub workspace: String,
    pub name: String,
    pub enabled: bool,
    pub root_folder_ids: Vec<String>,
    pub include_subfolders: bool,
    pub max_results: u32,
    pub extract: ExtractionToggles,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_sync_status: Option<SyncStatus>,
    pub last_sync_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ============================================================================
// Local records
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "file" => Some(Self::File),
            "folder" => Some(Self::Folder),
            _ => None,
        }
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Active,
    /// No longer enumerated under the config's roots.
    Stale,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Stale => "stale",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(Self::Active),
            "stale" => Some(Self::Stale),
            _ => None,
        }
    }
}

/// Persisted counterpart of one remote item under one config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalRecord {
    pub config_id: ConfigId,
    pub remote_id: String,
    pub workspace: String,
    pub kind: ItemKind,
    pub name: String,
    pub parent_ids: Vec<String>,
    pub mime_type: Option<String>,
    pub size: Option<u64>,
    pub modified_at: DateTime<Utc>,
    pub version: String,
    /// Materialized path of the containing folder, `/Root/Sub`.
    pub folder_path: String,
    pub status: RecordStatus,
    pub content_hash: Option<String>,
    pub thumbnail_hash: Option<String>,
    pub properties: Option<serde_json::Value>,
    pub output_path: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub indexed_at: DateTime<Utc>,
    pub stale_at: Option<DateTime<Utc>>,
}

impl LocalRecord {
    /// Path of this item itself (folder path joined with its name).
    pub fn item_path(&self) -> String {
        join_path(&self.folder_path, &self.name)
    }
}

/// Join a materialized folder path and a child name.
pub fn join_path(folder_path: &str, name: &str) -> String {
    if folder_path.is_empty() || folder_path == "/" {
        format!("/{}", name)
    } else {
        format!("{}/{}", folder_path.trim_end_matches('/'), name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionRecord {
    pub permission_id: String,
    pub role: String,
    /// user, group, domain or anyone
    pub principal_type: String,
    pub principal: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRecord {
    pub revision_id: String,
    pub modified_at: DateTime<Utc>,
    pub size: Option<u64>,
    pub author: Option<String>,
}

/// Everything written for one item, committed as a single transaction.
///
/// `None` children leave existing rows untouched; `Some` replaces them.
#[derive(Debug, Clone)]
pub struct ItemWrite {
    pub record: LocalRecord,
    pub permissions: Option<Vec<PermissionRecord>>,
    pub revisions: Option<Vec<RevisionRecord>>,
}

/// Child rows inserted by an [`ItemWrite`] that did not exist before.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ItemWriteStats {
    pub permissions_created: u64,
    pub revisions_created: u64,
}

// ============================================================================
// Runs
// ============================================================================

/// Stage of item processing where an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPhase {
    Enumerate,
    Permissions,
    Revisions,
    Content,
    Metadata,
    Thumbnail,
    Output,
    Provenance,
    Backlinks,
    Persist,
    Removal,
}

impl ErrorPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Enumerate => "enumerate",
            Self::Permissions => "permissions",
            Self::Revisions => "revisions",
            Self::Content => "content",
            Self::Metadata => "metadata",
            Self::Thumbnail => "thumbnail",
            Self::Output => "output",
            Self::Provenance => "provenance",
            Self::Backlinks => "backlinks",
            Self::Persist => "persist",
            Self::Removal => "removal",
        }
    }
}

impl fmt::Display for ErrorPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunError {
    pub item_id: String,
    pub phase: ErrorPhase,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunCounts {
    pub files_processed: u64,
    pub files_created: u64,
    pub files_updated: u64,
    pub files_unchanged: u64,
    pub folders_created: u64,
    pub folders_updated: u64,
    pub folders_unchanged: u64,
    pub items_removed: u64,
    pub permissions_created: u64,
    pub revisions_created: u64,
    pub documents_written: u64,
}

/// Aggregate of one config's run. Immutable once the run finishes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrapeRunResult {
    pub run_id: RunId,
    pub config_id: ConfigId,
    pub config_name: String,
    pub workspace: String,
    pub status: SyncStatus,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    /// Enumeration stopped at `max_results`.
    pub truncated: bool,
    /// The removal pass did not run because enumeration was incomplete.
    pub removal_skipped: bool,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
}

impl ScrapeRunResult {
    pub fn cancelled(&self) -> bool {
        self.status == SyncStatus::Cancelled
    }

    /// Summary suitable for `last_sync_error`.
    pub fn error_summary(&self) -> Option<String> {
        let first = self.errors.first()?;
        let more = self.errors.len() - 1;
        let head = format!("{} [{}]: {}", first.item_id, first.phase, first.message);
        Some(if more == 0 {
            head
        } else {
            format!("{head} (+{more} more)")
        })
    }
}

// ============================================================================
// Provenance
// ============================================================================

/// How an output file came to be: which sources, at which version, via
/// which operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvenanceRecord {
    pub output_path: String,
    pub operation_id: OperationId,
    pub operation: String,
    /// Source id to the version token observed when the output was written.
    pub sources: BTreeMap<String, String>,
    pub metadata: BTreeMap<String, serde_json::Value>,
    pub tracked_at: DateTime<Utc>,
}

impl ProvenanceRecord {
    pub fn source_ids(&self) -> BTreeSet<&str> {
        self.sources.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_join_path() {
        assert_eq!(join_path("", "Root"), "/Root");
        assert_eq!(join_path("/", "Root"), "/Root");
        assert_eq!(join_path("/Root", "A"), "/Root/A");
        assert_eq!(join_path("/Root/", "A"), "/Root/A");
    }

    #[test]
    fn test_enum_strings_roundtrip() {
        for kind in [ItemKind::File, ItemKind::Folder] {
            assert_eq!(ItemKind::parse(kind.as_str()), Some(kind));
        }
        for status in [SyncStatus::Success, SyncStatus::Partial, SyncStatus::Cancelled] {
            assert_eq!(SyncStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(RecordStatus::parse("gone"), None);
    }

    #[test]
    fn test_error_summary() {
        let mut result = ScrapeRunResult {
            run_id: RunId::new(),
            config_id: ConfigId::new(),
            config_name: "docs".into(),
            workspace: "default".into(),
            status: SyncStatus::Partial,
            started_at: Utc::now(),
            duration_ms: 0,
            truncated: false,
            removal_skipped: false,
            counts: RunCounts::default(),
            errors: vec![],
        };
        assert_eq!(result.error_summary(), None);

        result.errors.push(RunError {
            item_id: "x".into(),
            phase: ErrorPhase::Content,
            message: "timeout".into(),
        });
        assert_eq!(result.error_summary().unwrap(), "x [content]: timeout");

        result.errors.push(result.errors[0].clone());
        assert!(result.error_summary().unwrap().ends_with("(+1 more)"));
    }
}
