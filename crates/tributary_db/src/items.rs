//! Local record operations (scrape_items and their child rows).

use crate::error::{DbError, Result};
use crate::types::*;
use crate::TributaryDb;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, Transaction};
use std::collections::HashSet;
use tributary_ids::ConfigId;

const ITEM_COLUMNS: &str = "config_id, remote_id, workspace, kind, name, parent_ids, mime_type, size, \
     modified_at, version, folder_path, status, content_hash, thumbnail_hash, properties, \
     output_path, created_at, updated_at, indexed_at, stale_at";

impl TributaryDb {
    // ========================================================================
    // Writes
    // ========================================================================

    /// Persist one item with its permissions and revisions atomically.
    ///
    /// `created_at` of an existing row is kept; everything else is replaced.
    pub async fn items_write(&self, write: &ItemWrite) -> Result<ItemWriteStats> {
        let record = &write.record;
        let parent_json = serde_json::to_string(&record.parent_ids)?;
        let properties_json = record
            .properties
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO scrape_items (
                config_id, remote_id, workspace, kind, name, parent_ids, mime_type, size,
                modified_at, version, folder_path, status, content_hash, thumbnail_hash,
                properties, output_path, created_at, updated_at, indexed_at, stale_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(config_id, remote_id) DO UPDATE SET
                workspace = excluded.workspace,
                kind = excluded.kind,
                name = excluded.name,
                parent_ids = excluded.parent_ids,
                mime_type = excluded.mime_type,
                size = excluded.size,
                modified_at = excluded.modified_at,
                version = excluded.version,
                folder_path = excluded.folder_path,
                status = excluded.status,
                content_hash = excluded.content_hash,
                thumbnail_hash = excluded.thumbnail_hash,
                properties = excluded.properties,
                output_path = excluded.output_path,
                updated_at = excluded.updated_at,
                indexed_at = excluded.indexed_at,
                stale_at = excluded.stale_at
            "#,
        )
        .bind(record.config_id.as_str())
        .bind(&record.remote_id)
        .bind(&record.workspace)
        .bind(record.kind.as_str())
        .bind(&record.name)
        .bind(&parent_json)
        .bind(&record.mime_type)
        .bind(record.size.map(|s| s as i64))
        .bind(record.modified_at.timestamp_millis())
        .bind(&record.version)
        .bind(&record.folder_path)
        .bind(record.status.as_str())
        .bind(&record.content_hash)
        .bind(&record.thumbnail_hash)
        .bind(&properties_json)
        .bind(&record.output_path)
        .bind(record.created_at.timestamp_millis())
        .bind(record.updated_at.timestamp_millis())
        .bind(record.indexed_at.timestamp_millis())
        .bind(record.stale_at.map(|t| t.timestamp_millis()))
        .execute(&mut *tx)
        .await?;

        let mut stats = ItemWriteStats::default();
        if let Some(permissions) = &write.permissions {
            stats.permissions_created =
                replace_permissions(&mut tx, &record.config_id, &record.remote_id, permissions)
                    .await?;
        }
        if let Some(revisions) = &write.revisions {
            stats.revisions_created =
                replace_revisions(&mut tx, &record.config_id, &record.remote_id, revisions).await?;
        }

        tx.commit().await?;
        Ok(stats)
    }

    /// Flag records as stale. Already-stale records keep their `stale_at`.
    pub async fn items_mark_stale(
        &self,
        config_id: &ConfigId,
        remote_ids: &[String],
        at: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let mut marked = 0;
        for remote_id in remote_ids {
            let result = sqlx::query(
                "UPDATE scrape_items SET status = 'stale', stale_at = ?, updated_at = ? \
                 WHERE config_id = ? AND remote_id = ? AND status = 'active'",
            )
            .bind(at.timestamp_millis())
            .bind(at.timestamp_millis())
            .bind(config_id.as_str())
            .bind(remote_id)
            .execute(&mut *tx)
            .await?;
            marked += result.rows_affected();
        }
        tx.commit().await?;
        Ok(marked)
    }

    /// Delete a record together with its permissions and revisions.
    pub async fn items_delete(&self, config_id: &ConfigId, remote_id: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        for table in ["scrape_permissions", "scrape_revisions"] {
            let sql = format!("DELETE FROM {table} WHERE config_id = ? AND remote_id = ?");
            sqlx::query(&sql)
                .bind(config_id.as_str())
                .bind(remote_id)
                .execute(&mut *tx)
                .await?;
        }
        let result = sqlx::query("DELETE FROM scrape_items WHERE config_id = ? AND remote_id = ?")
            .bind(config_id.as_str())
            .bind(remote_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub async fn items_get(&self, config_id: &ConfigId, remote_id: &str) -> Result<Option<LocalRecord>> {
        let sql = format!("SELECT {ITEM_COLUMNS} FROM scrape_items WHERE config_id = ? AND remote_id = ?");
        let row = sqlx::query(&sql)
            .bind(config_id.as_str())
            .bind(remote_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| row_to_record(&row)).transpose()
    }

    /// All records of a config (active and stale), ordered by path.
    pub async fn items_for_config(&self, config_id: &ConfigId) -> Result<Vec<LocalRecord>> {
        let sql = format!(
            "SELECT {ITEM_COLUMNS} FROM scrape_items WHERE config_id = ? ORDER BY folder_path, name"
        );
        let rows = sqlx::query(&sql)
            .bind(config_id.as_str())
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(row_to_record).collect()
    }

    pub async fn items_permissions(
        &self,
        config_id: &ConfigId,
        remote_id: &str,
    ) -> Result<Vec<PermissionRecord>> {
        let rows = sqlx::query(
            "SELECT permission_id, role, principal_type, principal FROM scrape_permissions \
             WHERE config_id = ? AND remote_id = ? ORDER BY permission_id",
        )
        .bind(config_id.as_str())
        .bind(remote_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| PermissionRecord {
                permission_id: row.get("permission_id"),
                role: row.get("role"),
                principal_type: row.get("principal_type"),
                principal: row.get("principal"),
            })
            .collect())
    }

    pub async fn items_revisions(
        &self,
        config_id: &ConfigId,
        remote_id: &str,
    ) -> Result<Vec<RevisionRecord>> {
        let rows = sqlx::query(
            "SELECT revision_id, modified_at, size, author FROM scrape_revisions \
             WHERE config_id = ? AND remote_id = ? ORDER BY modified_at, revision_id",
        )
        .bind(config_id.as_str())
        .bind(remote_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|row| RevisionRecord {
                revision_id: row.get("revision_id"),
                modified_at: TributaryDb::millis_to_datetime(row.get("modified_at")),
                size: row.get::<Option<i64>, _>("size").map(|s| s.max(0) as u64),
                author: row.get("author"),
            })
            .collect())
    }
}

async fn existing_child_ids(
    tx: &mut Transaction<'_, Sqlite>,
    table: &str,
    id_column: &str,
    config_id: &ConfigId,
    remote_id: &str,
) -> Result<HashSet<String>> {
    let sql = format!("SELECT {id_column} FROM {table} WHERE config_id = ? AND remote_id = ?");
    let rows = sqlx::query(&sql)
        .bind(config_id.as_str())
        .bind(remote_id)
        .fetch_all(&mut **tx)
        .await?;
    Ok(rows.iter().map(|row| row.get::<String, _>(0)).collect())
}

async fn replace_permissions(
    tx: &mut Transaction<'_, Sqlite>,
    config_id: &ConfigId,
    remote_id: &str,
    permissions: &[PermissionRecord],
) -> Result<u64> {
    let before = existing_child_ids(tx, "scrape_permissions", "permission_id", config_id, remote_id).await?;

    sqlx::query("DELETE FROM scrape_permissions WHERE config_id = ? AND remote_id = ?")
        .bind(config_id.as_str())
        .bind(remote_id)
        .execute(&mut **tx)
        .await?;

    let mut created = 0;
    for permission in permissions {
        sqlx::query(
            "INSERT OR REPLACE INTO scrape_permissions \
             (config_id, remote_id, permission_id, role, principal_type, principal) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(config_id.as_str())
        .bind(remote_id)
        .bind(&permission.permission_id)
        .bind(&permission.role)
        .bind(&permission.principal_type)
        .bind(&permission.principal)
        .execute(&mut **tx)
        .await?;
        if !before.contains(&permission.permission_id) {
            created += 1;
        }
    }
    Ok(created)
}

async fn replace_revisions(
    tx: &mut Transaction<'_, Sqlite>,
    config_id: &ConfigId,
    remote_id: &str,
    revisions: &[RevisionRecord],
) -> Result<u64> {
    let before = existing_child_ids(tx, "scrape_revisions", "revision_id", config_id, remote_id).await?;

    sqlx::query("DELETE FROM scrape_revisions WHERE config_id = ? AND remote_id = ?")
        .bind(config_id.as_str())
        .bind(remote_id)
        .execute(&mut **tx)
        .await?;

    let mut created = 0;
    for revision in revisions {
        sqlx::query(
            "INSERT OR REPLACE INTO scrape_revisions \
             (config_id, remote_id, revision_id, modified_at, size, author) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(config_id.as_str())
        .bind(remote_id)
        .bind(&revision.revision_id)
        .bind(revision.modified_at.timestamp_millis())
        .bind(revision.size.map(|s| s as i64))
        .bind(&revision.author)
        .execute(&mut **tx)
        .await?;
        if !before.contains(&revision.revision_id) {
            created += 1;
        }
    }
    Ok(created)
}

fn row_to_record(row: &SqliteRow) -> Result<LocalRecord> {
    let config_id: String = row.get("config_id");
    let kind: String = row.get("kind");
    let status: String = row.get("status");
    let parent_json: String = row.get("parent_ids");
    let properties: Option<String> = row.get("properties");

    Ok(LocalRecord {
        config_id: ConfigId::parse(&config_id)?,
        remote_id: row.get("remote_id"),
        workspace: row.get("workspace"),
        kind: ItemKind::parse(&kind)
            .ok_or_else(|| DbError::corrupt(format!("unknown item kind '{kind}'")))?,
        name: row.get("name"),
        parent_ids: serde_json::from_str(&parent_json)?,
        mime_type: row.get("mime_type"),
        size: row.get::<Option<i64>, _>("size").map(|s| s.max(0) as u64),
        modified_at: TributaryDb::millis_to_datetime(row.get("modified_at")),
        version: row.get("version"),
        folder_path: row.get("folder_path"),
        status: RecordStatus::parse(&status)
            .ok_or_else(|| DbError::corrupt(format!("unknown record status '{status}'")))?,
        content_hash: row.get("content_hash"),
        thumbnail_hash: row.get("thumbnail_hash"),
        properties: properties.map(|p| serde_json::from_str(&p)).transpose()?,
        output_path: row.get("output_path"),
        created_at: TributaryDb::millis_to_datetime(row.get("created_at")),
        updated_at: TributaryDb::millis_to_datetime(row.get("updated_at")),
        indexed_at: TributaryDb::millis_to_datetime(row.get("indexed_at")),
        stale_at: row
            .get::<Option<i64>, _>("stale_at")
            .map(TributaryDb::millis_to_datetime),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;
    use chrono::TimeZone;

    async fn seed_config(db: &TributaryDb) -> ConfigId {
        db.configs_upsert(&ScrapeConfigSpec {
            user_id: "alice".into(),
            workspace: "default".into(),
            name: "docs".into(),
            enabled: true,
            root_folder_ids: vec!["root".into()],
            include_subfolders: true,
            max_results: 100,
            extract: ExtractionToggles::default(),
        })
        .await
        .unwrap()
        .id
    }

    fn record(config_id: &ConfigId, remote_id: &str, version: &str) -> LocalRecord {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();
        LocalRecord {
            config_id: config_id.clone(),
            remote_id: remote_id.into(),
            workspace: "default".into(),
            kind: ItemKind::File,
            name: format!("{remote_id}.md"),
            parent_ids: vec!["root".into()],
            mime_type: Some("text/markdown".into()),
            size: Some(42),
            modified_at: at,
            version: version.into(),
            folder_path: "/Root".into(),
            status: RecordStatus::Active,
            content_hash: None,
            thumbnail_hash: None,
            properties: Some(serde_json::json!({"starred": true})),
            output_path: None,
            created_at: at,
            updated_at: at,
            indexed_at: at,
            stale_at: None,
        }
    }

    fn permission(id: &str) -> PermissionRecord {
        PermissionRecord {
            permission_id: id.into(),
            role: "reader".into(),
            principal_type: "user".into(),
            principal: Some(format!("{id}@example.com")),
        }
    }

    #[tokio::test]
    async fn test_write_and_read_back() {
        let (_tmp, db) = open_temp().await;
        let config_id = seed_config(&db).await;
        let rec = record(&config_id, "x", "v1");

        let stats = db
            .items_write(&ItemWrite {
                record: rec.clone(),
                permissions: Some(vec![permission("p1"), permission("p2")]),
                revisions: None,
            })
            .await
            .unwrap();
        assert_eq!(stats.permissions_created, 2);
        assert_eq!(stats.revisions_created, 0);

        let loaded = db.items_get(&config_id, "x").await.unwrap().unwrap();
        assert_eq!(loaded, rec);
        assert_eq!(loaded.item_path(), "/Root/x.md");
        assert_eq!(db.items_permissions(&config_id, "x").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_rewrite_counts_only_new_children_and_keeps_created_at() {
        let (_tmp, db) = open_temp().await;
        let config_id = seed_config(&db).await;
        let original = record(&config_id, "x", "v1");
        db.items_write(&ItemWrite {
            record: original.clone(),
            permissions: Some(vec![permission("p1")]),
            revisions: None,
        })
        .await
        .unwrap();

        let mut updated = record(&config_id, "x", "v2");
        updated.created_at = Utc::now();
        let stats = db
            .items_write(&ItemWrite {
                record: updated,
                permissions: Some(vec![permission("p1"), permission("p3")]),
                revisions: None,
            })
            .await
            .unwrap();
        assert_eq!(stats.permissions_created, 1);

        let loaded = db.items_get(&config_id, "x").await.unwrap().unwrap();
        assert_eq!(loaded.version, "v2");
        assert_eq!(loaded.created_at, original.created_at);
    }

    #[tokio::test]
    async fn test_none_children_leave_rows_untouched() {
        let (_tmp, db) = open_temp().await;
        let config_id = seed_config(&db).await;
        db.items_write(&ItemWrite {
            record: record(&config_id, "x", "v1"),
            permissions: Some(vec![permission("p1")]),
            revisions: None,
        })
        .await
        .unwrap();
        db.items_write(&ItemWrite {
            record: record(&config_id, "x", "v2"),
            permissions: None,
            revisions: None,
        })
        .await
        .unwrap();

        assert_eq!(db.items_permissions(&config_id, "x").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_mark_stale_and_delete() {
        let (_tmp, db) = open_temp().await;
        let config_id = seed_config(&db).await;
        for id in ["a", "b"] {
            db.items_write(&ItemWrite {
                record: record(&config_id, id, "v1"),
                permissions: Some(vec![permission("p1")]),
                revisions: Some(vec![RevisionRecord {
                    revision_id: "r1".into(),
                    modified_at: Utc::now(),
                    size: Some(1),
                    author: None,
                }]),
            })
            .await
            .unwrap();
        }

        let marked = db
            .items_mark_stale(&config_id, &["a".to_string()], Utc::now())
            .await
            .unwrap();
        assert_eq!(marked, 1);
        let again = db
            .items_mark_stale(&config_id, &["a".to_string()], Utc::now())
            .await
            .unwrap();
        assert_eq!(again, 0);

        let a = db.items_get(&config_id, "a").await.unwrap().unwrap();
        assert_eq!(a.status, RecordStatus::Stale);
        assert!(a.stale_at.is_some());

        assert!(db.items_delete(&config_id, "b").await.unwrap());
        assert!(db.items_get(&config_id, "b").await.unwrap().is_none());
        assert!(db.items_revisions(&config_id, "b").await.unwrap().is_empty());
        assert!(!db.items_delete(&config_id, "b").await.unwrap());

        assert_eq!(db.items_for_config(&config_id).await.unwrap().len(), 1);
    }
}
