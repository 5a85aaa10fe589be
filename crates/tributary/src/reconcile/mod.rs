//! Incremental reconciliation of a remote tree into local records.
//!
//! A run enumerates the config's roots breadth-first, classifies each item
//! against the snapshot taken at run start and writes only new or changed
//! items. All remote fetches for an item happen before any local write. The
//! record commits in one transaction after its document, provenance record
//! and backlinks are in place; if any of those steps or the commit fails,
//! the document, provenance and backlinks are put back as they were and the
//! item is retried on the next run.

mod engine;
mod output;
mod tally;
mod traversal;

pub use engine::{ReconcileOptions, Reconciler};
pub use tributary_db::{ErrorPhase, RunCounts, RunError, ScrapeRunResult, SyncStatus};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Fate of records whose remote item is no longer enumerated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RemovalPolicy {
    /// Keep the record, flagged stale, along with its document and provenance.
    #[default]
    MarkStale,
    /// Delete the record, its child rows, its document, provenance and backlinks.
    HardDelete,
}

impl RemovalPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MarkStale => "mark-stale",
            Self::HardDelete => "hard-delete",
        }
    }
}

impl fmt::Display for RemovalPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for RemovalPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mark-stale" => Ok(Self::MarkStale),
            "hard-delete" => Ok(Self::HardDelete),
            other => Err(format!(
                "unknown removal policy '{other}' (expected mark-stale or hard-delete)"
            )),
        }
    }
}

/// How an enumerated item compares with its stored record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    New,
    Changed,
    Unchanged,
}
