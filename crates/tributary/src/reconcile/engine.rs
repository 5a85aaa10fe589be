use super::output;
use super::tally::RunTally;
use super::traversal::{self, bounded, Discovered};
use super::{Change, RemovalPolicy};
use crate::backlinks::BacklinkMaintainer;
use crate::cancel::CancelToken;
use crate::config::TributaryConfig;
use crate::error::{Result, TributaryError};
use crate::gate::CredentialSource;
use crate::provenance::ProvenanceTracker;
use crate::remote::RemoteTreeProvider;
use crate::signature::Position;
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use tributary_db::{
    ErrorPhase, ItemWrite, ItemWriteStats, LocalRecord, ProvenanceRecord, RecordStatus, RunError,
    ScrapeConfig, ScrapeRunResult, SyncStatus, TributaryDb,
};
use tributary_ids::OperationId;

/// Operation name stored in provenance records for scraped documents.
pub const SCRAPE_OPERATION: &str = "scrape";

#[derive(Debug, Clone)]
pub struct ReconcileOptions {
    pub removal_policy: RemovalPolicy,
    /// Documents are generated for text files only when this is set.
    pub output_root: Option<PathBuf>,
    pub signature_position: Position,
    pub source_kind: String,
    pub remote_timeout: Duration,
}

impl Default for ReconcileOptions {
    fn default() -> Self {
        Self::from_config(&TributaryConfig::default())
    }
}

impl ReconcileOptions {
    pub fn from_config(config: &TributaryConfig) -> Self {
        Self {
            removal_policy: config.removal_policy,
            output_root: config.output_root.clone(),
            signature_position: config.signature.position,
            source_kind: config.signature.source_kind.clone(),
            remote_timeout: config.remote_timeout(),
        }
    }
}

/// Why one item was not written.
struct ItemFailure {
    phase: ErrorPhase,
    error: TributaryError,
}

fn at<E: Into<TributaryError>>(phase: ErrorPhase) -> impl FnOnce(E) -> ItemFailure {
    move |err| ItemFailure {
        phase,
        error: err.into(),
    }
}

struct Applied {
    stats: ItemWriteStats,
    document: bool,
    /// Output key the record pointed at before this write, if it moved.
    retired: Option<String>,
}

/// A written document and what its path held before.
struct StagedDocument {
    key: String,
    path: PathBuf,
    prior_content: Option<Vec<u8>>,
    prior_provenance: Option<ProvenanceRecord>,
}

pub(crate) fn classify(previous: Option<&LocalRecord>, found: &Discovered) -> Change {
    let Some(record) = previous else {
        return Change::New;
    };
    let item = &found.item;
    let differs = record.status == RecordStatus::Stale
        || record.version != item.version
        || record.modified_at.timestamp_millis() != item.modified_at.timestamp_millis()
        || record.folder_path != found.folder_path
        || record.name != item.name;
    if differs {
        Change::Changed
    } else {
        Change::Unchanged
    }
}

/// Runs scrape configs against one remote provider.
pub struct Reconciler {
    db: TributaryDb,
    remote: Arc<dyn RemoteTreeProvider>,
    credentials: Arc<dyn CredentialSource>,
    provenance: ProvenanceTracker,
    backlinks: Option<Arc<BacklinkMaintainer>>,
    options: ReconcileOptions,
    cancel: CancelToken,
}

impl Reconciler {
    /// Provenance goes to `db`; backlinks are off until [`Self::with_backlinks`].
    pub fn new(
        db: TributaryDb,
        remote: Arc<dyn RemoteTreeProvider>,
        credentials: Arc<dyn CredentialSource>,
        options: ReconcileOptions,
    ) -> Self {
        Self {
            provenance: ProvenanceTracker::new(Arc::new(db.clone())),
            db,
            remote,
            credentials,
            backlinks: None,
            options,
            cancel: CancelToken::new(),
        }
    }

    /// The maintainer's root should be the output root.
    pub fn with_backlinks(mut self, backlinks: Arc<BacklinkMaintainer>) -> Self {
        self.backlinks = Some(backlinks);
        self
    }

    pub fn with_provenance(mut self, provenance: ProvenanceTracker) -> Self {
        self.provenance = provenance;
        self
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn provenance(&self) -> &ProvenanceTracker {
        &self.provenance
    }

    /// Run every enabled config of `user_id`, one after another.
    ///
    /// Fails before any run starts when the credential gate is closed or a
    /// config has no roots. Anything that goes wrong inside a run, item or
    /// storage, ends up in that run's result and the next config still runs.
    pub async fn scrape_for_user(
        &self,
        user_id: &str,
        profile_id: Option<&str>,
        workspace: Option<&str>,
    ) -> Result<Vec<ScrapeRunResult>> {
        if !self.credentials.is_configured(user_id, profile_id) {
            return Err(TributaryError::configuration(format!(
                "no credential configured for user '{user_id}'{}",
                profile_id
                    .map(|p| format!(" (profile '{p}')"))
                    .unwrap_or_default()
            )));
        }

        let configs: Vec<ScrapeConfig> = self
            .db
            .configs_list_for_user(user_id, workspace)
            .await?
            .into_iter()
            .filter(|c| c.enabled)
            .collect();

        for config in &configs {
            if config.root_folder_ids.iter().all(|r| r.trim().is_empty()) {
                return Err(TributaryError::configuration(format!(
                    "config '{}' in workspace '{}' has no root folders",
                    config.name, config.workspace
                )));
            }
        }

        info!(
            user_id,
            provider = self.remote.label(),
            configs = configs.len(),
            "Starting scrape"
        );

        let mut results = Vec::with_capacity(configs.len());
        for config in &configs {
            if self.cancel.is_cancelled() {
                break;
            }
            results.push(self.run_config(config).await);
        }
        Ok(results)
    }

    /// One reconciliation pass over one config.
    ///
    /// Storage failures are reported in the result under
    /// [`ErrorPhase::Persist`] with the config id as the item id.
    pub async fn run_config(&self, config: &ScrapeConfig) -> ScrapeRunResult {
        let mut tally = RunTally::start(config);
        debug!(config = %config.name, run_id = %tally.run_id(), "Run started");

        match self.db.items_for_config(&config.id).await {
            Ok(records) => self.reconcile(config, records, &mut tally).await,
            Err(err) => {
                tally.error(
                    config.id.as_str(),
                    ErrorPhase::Persist,
                    format!("loading stored items: {err}"),
                );
                tally.removal_skipped = true;
            }
        }

        let mut result = tally.finish();
        self.record_run(config, &mut result).await;

        info!(
            config = %config.name,
            workspace = %config.workspace,
            run_id = %result.run_id,
            status = %result.status,
            files_created = result.counts.files_created,
            files_updated = result.counts.files_updated,
            files_unchanged = result.counts.files_unchanged,
            folders_created = result.counts.folders_created,
            folders_updated = result.counts.folders_updated,
            items_removed = result.counts.items_removed,
            errors = result.errors.len(),
            truncated = result.truncated,
            duration_ms = result.duration_ms,
            "Scrape run finished"
        );
        result
    }

    async fn reconcile(
        &self,
        config: &ScrapeConfig,
        records: Vec<LocalRecord>,
        tally: &mut RunTally,
    ) {
        let operation_id = OperationId::new();
        let mut claims = output::KeyClaims::from_records(&records);
        let snapshot: HashMap<String, LocalRecord> = records
            .into_iter()
            .map(|record| (record.remote_id.clone(), record))
            .collect();

        let enumeration = traversal::enumerate(
            self.remote.as_ref(),
            config,
            self.options.remote_timeout,
            &self.cancel,
        )
        .await;
        let complete = enumeration.is_complete();
        tally.truncated = enumeration.truncated;
        tally.cancelled = enumeration.cancelled;
        tally.errors.extend(enumeration.errors.iter().cloned());

        let enumerated: HashSet<&str> = enumeration
            .items
            .iter()
            .map(|found| found.item.id.as_str())
            .collect();
        let mut vanished: Vec<&str> = Vec::new();

        for found in &enumeration.items {
            if self.cancel.is_cancelled() {
                tally.cancelled = true;
                break;
            }

            let item = &found.item;
            if !item.is_folder() {
                tally.counts.files_processed += 1;
            }

            let previous = snapshot.get(&item.id);
            let change = classify(previous, found);
            if change == Change::Unchanged {
                tally.unchanged(item.kind);
                continue;
            }

            match self
                .apply_item(config, found, previous, &operation_id, &mut claims)
                .await
            {
                Ok(applied) => {
                    tally.applied(item.kind, change, applied.stats, applied.document);
                    if let Some(old) = applied.retired {
                        claims.release(&old, &item.id);
                        if let Err(err) = self.retire_document(&old, &item.id).await {
                            warn!(item_id = %item.id, output = %old, error = %err, "Failed to retire moved document");
                        }
                    }
                }
                Err(ItemFailure {
                    error: TributaryError::NotFound(_),
                    ..
                }) => {
                    debug!(item_id = %item.id, "Item vanished during run");
                    vanished.push(&item.id);
                }
                Err(failure) => tally.error(&item.id, failure.phase, failure.error.to_string()),
            }
        }

        let mut candidates: Vec<&LocalRecord> = vanished
            .iter()
            .filter_map(|id| snapshot.get(*id))
            .collect();
        if complete && !tally.cancelled {
            candidates.extend(
                snapshot
                    .values()
                    .filter(|record| !enumerated.contains(record.remote_id.as_str())),
            );
        } else {
            tally.removal_skipped = true;
        }
        self.remove_records(config, &candidates, tally).await;
    }

    /// Store the run and the config's last sync outcome.
    async fn record_run(&self, config: &ScrapeConfig, result: &mut ScrapeRunResult) {
        if let Err(err) = self.db.runs_insert(result).await {
            warn!(config = %config.name, run_id = %result.run_id, error = %err, "Failed to record run");
            push_run_error(result, config, format!("recording run: {err}"));
        }
        if let Err(err) = self
            .db
            .configs_record_sync(
                &config.id,
                Utc::now(),
                result.status,
                result.error_summary().as_deref(),
            )
            .await
        {
            warn!(config = %config.name, error = %err, "Failed to record last sync");
            push_run_error(result, config, format!("recording last sync: {err}"));
        }
    }

    /// Fetch everything first, then write the document, then commit the
    /// record. A failed local step undoes the document.
    async fn apply_item(
        &self,
        config: &ScrapeConfig,
        found: &Discovered,
        previous: Option<&LocalRecord>,
        operation_id: &OperationId,
        claims: &mut output::KeyClaims,
    ) -> std::result::Result<Applied, ItemFailure> {
        let item = &found.item;
        let id = item.id.as_str();
        let timeout = self.options.remote_timeout;

        let permissions = if config.extract.permissions {
            Some(
                bounded(id, timeout, self.remote.get_permissions(id))
                    .await
                    .map_err(at(ErrorPhase::Permissions))?,
            )
        } else {
            None
        };

        let revisions = if config.extract.revisions {
            Some(
                bounded(id, timeout, self.remote.get_revisions(id))
                    .await
                    .map_err(at(ErrorPhase::Revisions))?,
            )
        } else {
            None
        };

        let properties = if !config.extract.metadata {
            previous.and_then(|p| p.properties.clone())
        } else if item.properties.is_some() {
            item.properties.clone()
        } else {
            bounded(id, timeout, self.remote.get_item(id))
                .await
                .map_err(at(ErrorPhase::Metadata))?
                .properties
        };

        let content = if !item.is_folder() && config.extract.content {
            Some(
                bounded(id, timeout, self.remote.get_content(id))
                    .await
                    .map_err(at(ErrorPhase::Content))?,
            )
        } else {
            None
        };

        let mut thumbnail_hash = previous.and_then(|p| p.thumbnail_hash.clone());
        if !item.is_folder() && config.extract.thumbnail {
            thumbnail_hash = bounded(id, timeout, self.remote.get_thumbnail(id))
                .await
                .map_err(at(ErrorPhase::Thumbnail))?
                .map(|bytes| blake3::hash(&bytes).to_hex().to_string());
        }

        let mut content_hash = previous.and_then(|p| p.content_hash.clone());
        let mut output_path = previous.and_then(|p| p.output_path.clone());
        let mut retired = None;
        let mut staged = None;
        if let Some(bytes) = &content {
            content_hash = Some(blake3::hash(bytes).to_hex().to_string());

            if let (Some(root), true) = (&self.options.output_root, item.is_text()) {
                let base = output::document_key(config, &found.folder_path, &item.name);
                let key = claims.claim(base, id, output_path.as_deref());
                match self
                    .write_document(root, &key, config, found, bytes, operation_id)
                    .await
                {
                    Ok(document) => staged = Some(document),
                    Err(failure) => {
                        if output_path.as_deref() != Some(key.as_str()) {
                            claims.release(&key, id);
                        }
                        return Err(failure);
                    }
                }
                retired = output_path.take().filter(|old| *old != key);
                output_path = Some(key);
            }
        }

        let now = Utc::now();
        let record = LocalRecord {
            config_id: config.id.clone(),
            remote_id: item.id.clone(),
            workspace: config.workspace.clone(),
            kind: item.kind,
            name: item.name.clone(),
            parent_ids: item.parent_ids.clone(),
            mime_type: item.mime_type.clone(),
            size: item.size,
            modified_at: item.modified_at,
            version: item.version.clone(),
            folder_path: found.folder_path.clone(),
            status: RecordStatus::Active,
            content_hash,
            thumbnail_hash,
            properties,
            output_path,
            created_at: previous.map(|p| p.created_at).unwrap_or(now),
            updated_at: now,
            indexed_at: now,
            stale_at: None,
        };

        let written = self
            .db
            .items_write(&ItemWrite {
                record,
                permissions,
                revisions,
            })
            .await;
        let stats = match written {
            Ok(stats) => stats,
            Err(err) => {
                if let Some(document) = &staged {
                    self.roll_back(document).await;
                    let held = previous.and_then(|p| p.output_path.as_deref());
                    if held != Some(document.key.as_str()) {
                        claims.release(&document.key, id);
                    }
                }
                return Err(at(ErrorPhase::Persist)(err));
            }
        };

        Ok(Applied {
            stats,
            document: staged.is_some(),
            retired,
        })
    }

    /// Write the signed document with its provenance and backlinks.
    ///
    /// On error nothing of the write remains.
    async fn write_document(
        &self,
        root: &Path,
        key: &str,
        config: &ScrapeConfig,
        found: &Discovered,
        content: &[u8],
        operation_id: &OperationId,
    ) -> std::result::Result<StagedDocument, ItemFailure> {
        let item = &found.item;
        let document = output::signed_document(
            content,
            &item.id,
            &self.options.source_kind,
            self.options.signature_position,
        )
        .map_err(at(ErrorPhase::Output))?;
        let path = output::absolute(root, key);
        let staged = StagedDocument {
            prior_content: output::read_if_present(&path)
                .await
                .map_err(at(ErrorPhase::Output))?,
            prior_provenance: self
                .provenance
                .get(key)
                .await
                .map_err(at(ErrorPhase::Provenance))?,
            key: key.to_string(),
            path,
        };
        output::write_atomic(&staged.path, document.as_bytes())
            .await
            .map_err(at(ErrorPhase::Output))?;

        let sources = BTreeMap::from([(item.id.clone(), item.version.clone())]);
        let metadata: BTreeMap<String, Value> = BTreeMap::from([
            ("config".to_string(), json!(config.name)),
            ("workspace".to_string(), json!(config.workspace)),
            ("remoteName".to_string(), json!(item.name)),
            ("folderPath".to_string(), json!(found.folder_path)),
            ("mimeType".to_string(), json!(item.mime_type)),
        ]);
        if let Err(err) = self
            .provenance
            .track_file_modification(operation_id, key, sources, SCRAPE_OPERATION, metadata)
            .await
        {
            self.roll_back(&staged).await;
            return Err(at(ErrorPhase::Provenance)(err));
        }

        if let Some(backlinks) = &self.backlinks {
            if let Err(err) = backlinks.update_backlinks_from_content(&staged.path).await {
                self.roll_back(&staged).await;
                return Err(at(ErrorPhase::Backlinks)(err));
            }
        }
        Ok(staged)
    }

    /// Put a document, its provenance and its backlinks back to how they
    /// were before [`Self::write_document`].
    async fn roll_back(&self, staged: &StagedDocument) {
        let file = match &staged.prior_content {
            Some(bytes) => output::write_atomic(&staged.path, bytes).await,
            None => output::remove_if_present(&staged.path).await.map(|_| ()),
        };
        if let Err(err) = file {
            warn!(output = %staged.key, error = %err, "Failed to restore document");
        }

        let provenance = match &staged.prior_provenance {
            Some(record) => self.provenance.restore(record).await,
            None => self.provenance.forget(&staged.key).await.map(|_| ()),
        };
        if let Err(err) = provenance {
            warn!(output = %staged.key, error = %err, "Failed to restore provenance");
        }

        if let Some(backlinks) = &self.backlinks {
            if let Err(err) = backlinks.update_backlinks_from_content(&staged.path).await {
                warn!(output = %staged.key, error = %err, "Failed to restore backlinks");
            }
        }
    }

    /// Delete a generated document and everything derived from it.
    ///
    /// Leaves the output alone when its provenance names other sources
    /// only. Returns whether anything was retired.
    async fn retire_document(&self, key: &str, remote_id: &str) -> Result<bool> {
        if let Some(record) = self.provenance.get(key).await? {
            if !record.sources.contains_key(remote_id) {
                debug!(output = key, remote_id, "Output belongs to another item, not retiring");
                return Ok(false);
            }
        }
        if let Some(root) = &self.options.output_root {
            let path = output::absolute(root, key);
            output::remove_if_present(&path).await?;
            if let Some(backlinks) = &self.backlinks {
                backlinks.remove_document(&path).await?;
            }
        }
        self.provenance.forget(key).await?;
        Ok(true)
    }

    async fn remove_records(
        &self,
        config: &ScrapeConfig,
        candidates: &[&LocalRecord],
        tally: &mut RunTally,
    ) {
        if candidates.is_empty() {
            return;
        }

        match self.options.removal_policy {
            RemovalPolicy::MarkStale => {
                let ids: Vec<String> = candidates
                    .iter()
                    .filter(|r| r.status == RecordStatus::Active)
                    .map(|r| r.remote_id.clone())
                    .collect();
                if ids.is_empty() {
                    return;
                }
                match self.db.items_mark_stale(&config.id, &ids, Utc::now()).await {
                    Ok(marked) => tally.counts.items_removed += marked,
                    Err(err) => tally.error(config.id.as_str(), ErrorPhase::Removal, err.to_string()),
                }
            }
            RemovalPolicy::HardDelete => {
                for record in candidates {
                    match self.hard_delete(record).await {
                        Ok(true) => tally.counts.items_removed += 1,
                        Ok(false) => {}
                        Err(err) => {
                            tally.error(&record.remote_id, ErrorPhase::Removal, err.to_string())
                        }
                    }
                }
            }
        }
    }

    async fn hard_delete(&self, record: &LocalRecord) -> Result<bool> {
        if let Some(key) = &record.output_path {
            self.retire_document(key, &record.remote_id).await?;
        }
        Ok(self
            .db
            .items_delete(&record.config_id, &record.remote_id)
            .await?)
    }
}

/// Add a run-level storage error to a finished result.
fn push_run_error(result: &mut ScrapeRunResult, config: &ScrapeConfig, message: String) {
    result.errors.push(RunError {
        item_id: config.id.to_string(),
        phase: ErrorPhase::Persist,
        message,
    });
    if result.status == SyncStatus::Success {
        result.status = SyncStatus::Partial;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteItem;
    use chrono::{Duration as ChronoDuration, TimeZone};
    use tributary_db::ItemKind;
    use tributary_ids::ConfigId;

    fn found(version: &str, folder_path: &str) -> Discovered {
        Discovered {
            item: RemoteItem {
                id: "f1".into(),
                kind: ItemKind::File,
                name: "a.md".into(),
                parent_ids: vec!["r".into()],
                modified_at: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                version: version.into(),
                mime_type: Some("text/markdown".into()),
                size: Some(3),
                properties: None,
            },
            folder_path: folder_path.into(),
        }
    }

    fn record_of(found: &Discovered) -> LocalRecord {
        let item = &found.item;
        LocalRecord {
            config_id: ConfigId::new(),
            remote_id: item.id.clone(),
            workspace: "default".into(),
            kind: item.kind,
            name: item.name.clone(),
            parent_ids: item.parent_ids.clone(),
            mime_type: item.mime_type.clone(),
            size: item.size,
            modified_at: item.modified_at,
            version: item.version.clone(),
            folder_path: found.folder_path.clone(),
            status: RecordStatus::Active,
            content_hash: None,
            thumbnail_hash: None,
            properties: None,
            output_path: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            indexed_at: Utc::now(),
            stale_at: None,
        }
    }

    #[test]
    fn test_classify() {
        let base = found("v1", "/Root");
        let record = record_of(&base);

        assert_eq!(classify(None, &base), Change::New);
        assert_eq!(classify(Some(&record), &base), Change::Unchanged);
        assert_eq!(classify(Some(&record), &found("v2", "/Root")), Change::Changed);
        assert_eq!(classify(Some(&record), &found("v1", "/Moved")), Change::Changed);

        let mut touched = base.clone();
        touched.item.modified_at += ChronoDuration::seconds(1);
        assert_eq!(classify(Some(&record), &touched), Change::Changed);

        let mut stale = record.clone();
        stale.status = RecordStatus::Stale;
        assert_eq!(classify(Some(&stale), &base), Change::Changed);
    }

    #[test]
    fn test_classify_ignores_sub_millisecond_drift() {
        let base = found("v1", "/Root");
        let record = record_of(&base);
        let mut drift = base.clone();
        drift.item.modified_at += ChronoDuration::microseconds(300);
        assert_eq!(classify(Some(&record), &drift), Change::Unchanged);
    }
}
