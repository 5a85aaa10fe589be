//! Accumulates counts and errors for one config's run.

use super::Change;
use chrono::{DateTime, Utc};
use std::time::Instant;
use tracing::warn;
use tributary_db::{
    ErrorPhase, ItemKind, ItemWriteStats, RunCounts, RunError, ScrapeConfig, ScrapeRunResult,
    SyncStatus,
};
use tributary_ids::RunId;

pub(crate) struct RunTally {
    run_id: RunId,
    config: ScrapeConfig,
    started_at: DateTime<Utc>,
    clock: Instant,
    pub counts: RunCounts,
    pub errors: Vec<RunError>,
    pub truncated: bool,
    pub removal_skipped: bool,
    pub cancelled: bool,
}

impl RunTally {
    pub fn start(config: &ScrapeConfig) -> Self {
        Self {
            run_id: RunId::new(),
            config: config.clone(),
            started_at: Utc::now(),
            clock: Instant::now(),
            counts: RunCounts::default(),
            errors: Vec::new(),
            truncated: false,
            removal_skipped: false,
            cancelled: false,
        }
    }

    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }

    pub fn error(&mut self, item_id: &str, phase: ErrorPhase, message: impl Into<String>) {
        let message = message.into();
        warn!(
            config = %self.config.name,
            item_id,
            phase = %phase,
            error = %message,
            "Item failed"
        );
        self.errors.push(RunError {
            item_id: item_id.to_string(),
            phase,
            message,
        });
    }

    pub fn unchanged(&mut self, kind: ItemKind) {
        match kind {
            ItemKind::File => self.counts.files_unchanged += 1,
            ItemKind::Folder => self.counts.folders_unchanged += 1,
        }
    }

    pub fn applied(&mut self, kind: ItemKind, change: Change, stats: ItemWriteStats, document: bool) {
        match (kind, change) {
            (ItemKind::File, Change::New) => self.counts.files_created += 1,
            (ItemKind::File, _) => self.counts.files_updated += 1,
            (ItemKind::Folder, Change::New) => self.counts.folders_created += 1,
            (ItemKind::Folder, _) => self.counts.folders_updated += 1,
        }
        self.counts.permissions_created += stats.permissions_created;
        self.counts.revisions_created += stats.revisions_created;
        if document {
            self.counts.documents_written += 1;
        }
    }

    pub fn status(&self) -> SyncStatus {
        if self.cancelled {
            SyncStatus::Cancelled
        } else if self.errors.is_empty() {
            SyncStatus::Success
        } else {
            SyncStatus::Partial
        }
    }

    pub fn finish(self) -> ScrapeRunResult {
        let status = self.status();
        ScrapeRunResult {
            run_id: self.run_id,
            config_id: self.config.id,
            config_name: self.config.name,
            workspace: self.config.workspace,
            status,
            started_at: self.started_at,
            duration_ms: self.clock.elapsed().as_millis() as u64,
            truncated: self.truncated,
            removal_skipped: self.removal_skipped,
            counts: self.counts,
            errors: self.errors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_db::ExtractionToggles;
    use tributary_ids::ConfigId;

    fn config() -> ScrapeConfig {
        ScrapeConfig {
            id: ConfigId::new(),
            user_id: "alice".into(),
            workspace: "default".into(),
            name: "docs".into(),
            enabled: true,
            root_folder_ids: vec!["r".into()],
            include_subfolders: true,
            max_results: 10,
            extract: ExtractionToggles::default(),
            last_sync_at: None,
            last_sync_status: None,
            last_sync_error: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_counts_by_kind_and_change() {
        let mut tally = RunTally::start(&config());
        let stats = ItemWriteStats {
            permissions_created: 2,
            revisions_created: 1,
        };
        tally.applied(ItemKind::Folder, Change::New, stats, false);
        tally.applied(ItemKind::File, Change::Changed, stats, true);
        tally.unchanged(ItemKind::File);

        let result = tally.finish();
        assert_eq!(result.status, SyncStatus::Success);
        assert_eq!(result.counts.folders_created, 1);
        assert_eq!(result.counts.files_updated, 1);
        assert_eq!(result.counts.files_unchanged, 1);
        assert_eq!(result.counts.permissions_created, 4);
        assert_eq!(result.counts.documents_written, 1);
    }

    #[test]
    fn test_status_precedence() {
        let mut tally = RunTally::start(&config());
        tally.error("x", ErrorPhase::Content, "boom");
        assert_eq!(tally.status(), SyncStatus::Partial);
        tally.cancelled = true;
        assert_eq!(tally.status(), SyncStatus::Cancelled);
    }
}
