//! Scrape config operations.

use crate::error::{DbError, Result};
use crate::types::*;
use crate::TributaryDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tributary_ids::ConfigId;

const CONFIG_COLUMNS: &str = "id, user_id, workspace, name, enabled, root_folder_ids, include_subfolders, \
     max_results, extract_permissions, extract_revisions, extract_content, extract_metadata, \
     extract_thumbnail, last_sync_at, last_sync_status, last_sync_error, created_at, updated_at";

impl TributaryDb {
    /// Create or update the config keyed by `(user_id, workspace, name)`.
    ///
    /// The id, creation time and last-sync fields survive an update.
    pub async fn configs_upsert(&self, spec: &ScrapeConfigSpec) -> Result<ScrapeConfig> {
        if spec.user_id.trim().is_empty() || spec.name.trim().is_empty() {
            return Err(DbError::constraint("config requires a user id and a name"));
        }
        if spec.max_results == 0 {
            return Err(DbError::constraint("max_results must be at least 1"));
        }

        let roots_json = serde_json::to_string(&spec.root_folder_ids)?;
        let now = Self::now_millis();
        let new_id = ConfigId::new();

        sqlx::query(
            r#"
            INSERT INTO scrape_configs (
                id, user_id, workspace, name, enabled, root_folder_ids, include_subfolders,
                max_results, extract_permissions, extract_revisions, extract_content,
                extract_metadata, extract_thumbnail, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id, workspace, name) DO UPDATE SET
                enabled = excluded.enabled,
                root_folder_ids = excluded.root_folder_ids,
                include_subfolders = excluded.include_subfolders,
                max_results = excluded.max_results,
                extract_permissions = excluded.extract_permissions,
                extract_revisions = excluded.extract_revisions,
                extract_content = excluded.extract_content,
                extract_metadata = excluded.extract_metadata,
                extract_thumbnail = excluded.extract_thumbnail,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(new_id.as_str())
        .bind(&spec.user_id)
        .bind(&spec.workspace)
        .bind(&spec.name)
        .bind(spec.enabled)
        .bind(&roots_json)
        .bind(spec.include_subfolders)
        .bind(spec.max_results as i64)
        .bind(spec.extract.permissions)
        .bind(spec.extract.revisions)
        .bind(spec.extract.content)
        .bind(spec.extract.metadata)
        .bind(spec.extract.thumbnail)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.configs_get_by_name(&spec.user_id, &spec.workspace, &spec.name)
            .await?
            .ok_or_else(|| DbError::not_found(format!("config {} after upsert", spec.name)))
    }

    pub async fn configs_get(&self, id: &ConfigId) -> Result<Option<ScrapeConfig>> {
        let sql = format!("SELECT {CONFIG_COLUMNS} FROM scrape_configs WHERE id = ?");
        let row = sqlx::query(&sql)
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_config(&row)).transpose()
    }

    pub async fn configs_get_by_name(
        &self,
        user_id: &str,
        workspace: &str,
        name: &str,
    ) -> Result<Option<ScrapeConfig>> {
        let sql = format!(
            "SELECT {CONFIG_COLUMNS} FROM scrape_configs WHERE user_id = ? AND workspace = ? AND name = ?"
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(workspace)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_config(&row)).transpose()
    }

    /// Configs for a user, optionally limited to one workspace, in stable
    /// `(workspace, name)` order.
    pub async fn configs_list_for_user(
        &self,
        user_id: &str,
        workspace: Option<&str>,
    ) -> Result<Vec<ScrapeConfig>> {
        let rows = match workspace {
            Some(workspace) => {
                let sql = format!(
                    "SELECT {CONFIG_COLUMNS} FROM scrape_configs \
                     WHERE user_id = ? AND workspace = ? ORDER BY workspace, name"
                );
                sqlx::query(&sql)
                    .bind(user_id)
                    .bind(workspace)
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {CONFIG_COLUMNS} FROM scrape_configs WHERE user_id = ? ORDER BY workspace, name"
                );
                sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?
            }
        };

        rows.iter().map(row_to_config).collect()
    }

    /// Fold a run outcome into the config's `last_sync_*` fields.
    pub async fn configs_record_sync(
        &self,
        id: &ConfigId,
        at: DateTime<Utc>,
        status: SyncStatus,
        error: Option<&str>,
    ) -> Result<()> {
        let result = sqlx::query(
            "UPDATE scrape_configs SET last_sync_at = ?, last_sync_status = ?, last_sync_error = ? WHERE id = ?",
        )
        .bind(at.timestamp_millis())
        .bind(status.as_str())
        .bind(error)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DbError::not_found(format!("config {}", id)));
        }
        Ok(())
    }
}

fn row_to_config(row: &SqliteRow) -> Result<ScrapeConfig> {
    let id: String = row.get("id");
    let roots_json: String = row.get("root_folder_ids");
    let status: Option<String> = row.get("last_sync_status");
    let last_sync_status = match status {
        Some(s) => Some(
            SyncStatus::parse(&s)
                .ok_or_else(|| DbError::corrupt(format!("unknown sync status '{s}'")))?,
        ),
        None => None,
    };

    Ok(ScrapeConfig {
        id: ConfigId::parse(&id)?,
        user_id: row.get("user_id"),
        workspace: row.get("workspace"),
        name: row.get("name"),
        enabled: row.get("enabled"),
        root_folder_ids: serde_json::from_str(&roots_json)?,
        include_subfolders: row.get("include_subfolders"),
        max_results: row.get::<i64, _>("max_results").clamp(0, u32::MAX as i64) as u32,
        extract: ExtractionToggles {
            permissions: row.get("extract_permissions"),
            revisions: row.get("extract_revisions"),
            content: row.get("extract_content"),
            metadata: row.get("extract_metadata"),
            thumbnail: row.get("extract_thumbnail"),
        },
        last_sync_at: row
            .get::<Option<i64>, _>("last_sync_at")
            .map(TributaryDb::millis_to_datetime),
        last_sync_status,
        last_sync_error: row.get("last_sync_error"),
        created_at: TributaryDb::millis_to_datetime(row.get("created_at")),
        updated_at: TributaryDb::millis_to_datetime(row.get("updated_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;

    fn spec(name: &str) -> ScrapeConfigSpec {
        ScrapeConfigSpec {
            user_id: "alice".into(),
            workspace: "default".into(),
            name: name.into(),
            enabled: true,
            root_folder_ids: vec!["root".into()],
            include_subfolders: true,
            max_results: 1000,
            extract: ExtractionToggles::default(),
        }
    }

    #[tokio::test]
    async fn test_upsert_preserves_identity() {
        let (_tmp, db) = open_temp().await;

        let first = db.configs_upsert(&spec("docs")).await.unwrap();
        db.configs_record_sync(&first.id, Utc::now(), SyncStatus::Partial, Some("boom"))
            .await
            .unwrap();

        let mut changed = spec("docs");
        changed.root_folder_ids = vec!["a".into(), "b".into()];
        changed.include_subfolders = false;
        let second = db.configs_upsert(&changed).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(second.root_folder_ids, vec!["a", "b"]);
        assert!(!second.include_subfolders);
        assert_eq!(second.last_sync_status, Some(SyncStatus::Partial));
        assert_eq!(second.last_sync_error.as_deref(), Some("boom"));
    }

    #[tokio::test]
    async fn test_list_filters_by_workspace() {
        let (_tmp, db) = open_temp().await;
        db.configs_upsert(&spec("b")).await.unwrap();
        db.configs_upsert(&spec("a")).await.unwrap();
        let mut other = spec("c");
        other.workspace = "research".into();
        db.configs_upsert(&other).await.unwrap();

        let all = db.configs_list_for_user("alice", None).await.unwrap();
        let names: Vec<_> = all.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b", "c"]);

        let research = db
            .configs_list_for_user("alice", Some("research"))
            .await
            .unwrap();
        assert_eq!(research.len(), 1);
        assert!(db.configs_list_for_user("bob", None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_rejects_missing_fields() {
        let (_tmp, db) = open_temp().await;
        let mut bad = spec("");
        assert!(matches!(
            db.configs_upsert(&bad).await,
            Err(DbError::Constraint(_))
        ));
        bad.name = "ok".into();
        bad.max_results = 0;
        assert!(matches!(
            db.configs_upsert(&bad).await,
            Err(DbError::Constraint(_))
        ));
    }

    #[tokio::test]
    async fn test_record_sync_unknown_config() {
        let (_tmp, db) = open_temp().await;
        let err = db
            .configs_record_sync(&ConfigId::new(), Utc::now(), SyncStatus::Success, None)
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }
}
