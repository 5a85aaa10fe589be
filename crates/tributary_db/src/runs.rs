//! Run history.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::TributaryDb;
use sqlx::Row;
use tributary_ids::{ConfigId, RunId};

impl TributaryDb {
    pub async fn runs_insert(&self, run: &ScrapeRunResult) -> Result<()> {
        let counts_json = serde_json::to_string(&run.counts)?;
        let errors_json = serde_json::to_string(&run.errors)?;

        sqlx::query(
            r#"
            INSERT INTO scrape_runs (
                id, config_id, config_name, workspace, status, started_at, duration_ms,
                truncated, removal_skipped, counts, errors
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.run_id.as_str())
        .bind(run.config_id.as_str())
        .bind(&run.config_name)
        .bind(&run.workspace)
        .bind(run.status.as_str())
        .bind(run.started_at.timestamp_millis())
        .bind(run.duration_ms as i64)
        .bind(run.truncated)
        .bind(run.removal_skipped)
        .bind(&counts_json)
        .bind(&errors_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Most recent runs of a config, newest first.
    pub async fn runs_list_for_config(
        &self,
        config_id: &ConfigId,
        limit: u32,
    ) -> Result<Vec<ScrapeRunResult>> {
        let rows = sqlx::query(
            "SELECT id, config_id, config_name, workspace, status, started_at, duration_ms, \
             truncated, removal_skipped, counts, errors \
             FROM scrape_runs WHERE config_id = ? ORDER BY started_at DESC, rowid DESC LIMIT ?",
        )
        .bind(config_id.as_str())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<ScrapeRunResult> {
                let id: String = row.get("id");
                let config_id: String = row.get("config_id");
                let status: String = row.get("status");
                let counts: String = row.get("counts");
                let errors: String = row.get("errors");
                Ok(ScrapeRunResult {
                    run_id: RunId::parse(&id)?,
                    config_id: ConfigId::parse(&config_id)?,
                    config_name: row.get("config_name"),
                    workspace: row.get("workspace"),
                    status: SyncStatus::parse(&status)
                        .ok_or_else(|| DbError::corrupt(format!("unknown run status '{status}'")))?,
                    started_at: TributaryDb::millis_to_datetime(row.get("started_at")),
                    duration_ms: row.get::<i64, _>("duration_ms").max(0) as u64,
                    truncated: row.get("truncated"),
                    removal_skipped: row.get("removal_skipped"),
                    counts: serde_json::from_str(&counts)?,
                    errors: serde_json::from_str(&errors)?,
                })
            })
            .collect()
    }
}
