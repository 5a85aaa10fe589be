//! Provenance tracking for generated output files.
//!
//! Each output path has exactly one record naming the sources (with the
//! version token seen at write time) and the operation that produced it.
//! Re-tracking a path overwrites its record. The tracker never touches the
//! output file itself.

use crate::error::{Result, TributaryError};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;
use tributary_db::{ProvenanceRecord, TributaryDb};
use tributary_ids::OperationId;

// ============================================================================
// Store
// ============================================================================

/// Persistence for provenance records.
#[async_trait]
pub trait ProvenanceStore: Send + Sync {
    async fn put(&self, record: &ProvenanceRecord) -> Result<()>;
    async fn get(&self, output_path: &str) -> Result<Option<ProvenanceRecord>>;
    async fn outputs_for_source(&self, source_id: &str) -> Result<Vec<String>>;
    async fn delete(&self, output_path: &str) -> Result<bool>;
}

#[async_trait]
impl ProvenanceStore for TributaryDb {
    async fn put(&self, record: &ProvenanceRecord) -> Result<()> {
        Ok(self.provenance_put(record).await?)
    }

    async fn get(&self, output_path: &str) -> Result<Option<ProvenanceRecord>> {
        Ok(self.provenance_get(output_path).await?)
    }

    async fn outputs_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        Ok(self.provenance_outputs_for_source(source_id).await?)
    }

    async fn delete(&self, output_path: &str) -> Result<bool> {
        Ok(self.provenance_delete(output_path).await?)
    }
}

/// Map-backed store for tests and dry runs.
#[derive(Default)]
pub struct InMemoryProvenanceStore {
    records: RwLock<BTreeMap<String, ProvenanceRecord>>,
}

impl InMemoryProvenanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProvenanceStore for InMemoryProvenanceStore {
    async fn put(&self, record: &ProvenanceRecord) -> Result<()> {
        self.records
            .write()
            .await
            .insert(record.output_path.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, output_path: &str) -> Result<Option<ProvenanceRecord>> {
        Ok(self.records.read().await.get(output_path).cloned())
    }

    async fn outputs_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        Ok(self
            .records
            .read()
            .await
            .values()
            .filter(|record| record.sources.contains_key(source_id))
            .map(|record| record.output_path.clone())
            .collect())
    }

    async fn delete(&self, output_path: &str) -> Result<bool> {
        Ok(self.records.write().await.remove(output_path).is_some())
    }
}

// ============================================================================
// Tracker
// ============================================================================

/// Result of comparing a record against current source tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Staleness {
    /// No record for the path.
    Untracked,
    Fresh,
    Stale {
        /// Sources whose current token differs from the recorded one.
        changed: Vec<String>,
        /// Tracked sources absent from the current token map.
        missing: Vec<String>,
    },
}

impl Staleness {
    pub fn is_stale(&self) -> bool {
        !matches!(self, Self::Fresh)
    }
}

#[derive(Clone)]
pub struct ProvenanceTracker {
    store: Arc<dyn ProvenanceStore>,
}

impl ProvenanceTracker {
    pub fn new(store: Arc<dyn ProvenanceStore>) -> Self {
        Self { store }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryProvenanceStore::new()))
    }

    /// Record (or overwrite) how `output_path` was produced.
    ///
    /// `sources` maps each source id to the version token it had when the
    /// output was written. An empty source set is rejected.
    pub async fn track_file_modification(
        &self,
        operation_id: &OperationId,
        output_path: &str,
        sources: BTreeMap<String, String>,
        operation: &str,
        metadata: BTreeMap<String, Value>,
    ) -> Result<ProvenanceRecord> {
        if output_path.trim().is_empty() {
            return Err(TributaryError::invariant("provenance output path is empty"));
        }
        if sources.is_empty() {
            return Err(TributaryError::invariant(format!(
                "provenance for {output_path} has no sources"
            )));
        }
        if sources.keys().any(|id| id.trim().is_empty()) {
            return Err(TributaryError::invariant(format!(
                "provenance for {output_path} has an empty source id"
            )));
        }
        if operation.trim().is_empty() {
            return Err(TributaryError::invariant(format!(
                "provenance for {output_path} has no operation name"
            )));
        }

        let record = ProvenanceRecord {
            output_path: output_path.to_string(),
            operation_id: operation_id.clone(),
            operation: operation.to_string(),
            sources,
            metadata,
            tracked_at: Utc::now(),
        };
        self.store.put(&record).await?;

        debug!(
            output = %record.output_path,
            operation = %record.operation,
            sources = record.sources.len(),
            "Tracked provenance"
        );
        Ok(record)
    }

    pub async fn get(&self, output_path: &str) -> Result<Option<ProvenanceRecord>> {
        self.store.get(output_path).await
    }

    pub async fn staleness(
        &self,
        output_path: &str,
        current_tokens: &HashMap<String, String>,
    ) -> Result<Staleness> {
        let Some(record) = self.store.get(output_path).await? else {
            return Ok(Staleness::Untracked);
        };

        let mut changed = Vec::new();
        let mut missing = Vec::new();
        for (source_id, recorded) in &record.sources {
            match current_tokens.get(source_id) {
                Some(current) if current == recorded => {}
                Some(_) => changed.push(source_id.clone()),
                None => missing.push(source_id.clone()),
            }
        }

        Ok(if changed.is_empty() && missing.is_empty() {
            Staleness::Fresh
        } else {
            Staleness::Stale { changed, missing }
        })
    }

    /// True when the output has no record or any tracked source moved on.
    pub async fn is_stale(
        &self,
        output_path: &str,
        current_tokens: &HashMap<String, String>,
    ) -> Result<bool> {
        Ok(self.staleness(output_path, current_tokens).await?.is_stale())
    }

    pub async fn outputs_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        self.store.outputs_for_source(source_id).await
    }

    /// Drop the record for an output that no longer exists.
    pub async fn forget(&self, output_path: &str) -> Result<bool> {
        self.store.delete(output_path).await
    }

    /// Put back a record previously read with [`Self::get`], as it was.
    pub async fn restore(&self, record: &ProvenanceRecord) -> Result<()> {
        debug!(output_path = %record.output_path, "Restoring provenance");
        self.store.put(record).await
    }
}
