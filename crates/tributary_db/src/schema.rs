//! Table definitions. All CREATE statements live here.

use crate::error::Result;
use crate::TributaryDb;
use tracing::debug;

const STATEMENTS: &[&str] = &[
    // Scrape configs: one per (user, workspace, name)
    r#"CREATE TABLE IF NOT EXISTS scrape_configs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        workspace TEXT NOT NULL,
        name TEXT NOT NULL,
        enabled INTEGER NOT NULL DEFAULT 1,
        root_folder_ids TEXT NOT NULL,
        include_subfolders INTEGER NOT NULL DEFAULT 1,
        max_results INTEGER NOT NULL,
        extract_permissions INTEGER NOT NULL DEFAULT 1,
        extract_revisions INTEGER NOT NULL DEFAULT 1,
        extract_content INTEGER NOT NULL DEFAULT 1,
        extract_metadata INTEGER NOT NULL DEFAULT 1,
        extract_thumbnail INTEGER NOT NULL DEFAULT 0,
        last_sync_at INTEGER,
        last_sync_status TEXT,
        last_sync_error TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        UNIQUE(user_id, workspace, name)
    )"#,
    // Local snapshot of remote items
    r#"CREATE TABLE IF NOT EXISTS scrape_items (
        config_id TEXT NOT NULL REFERENCES scrape_configs(id),
        remote_id TEXT NOT NULL,
        workspace TEXT NOT NULL,
        kind TEXT NOT NULL,
        name TEXT NOT NULL,
        parent_ids TEXT NOT NULL,
        mime_type TEXT,
        size INTEGER,
        modified_at INTEGER NOT NULL,
        version TEXT NOT NULL,
        folder_path TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'active',
        content_hash TEXT,
        thumbnail_hash TEXT,
        properties TEXT,
        output_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL,
        indexed_at INTEGER NOT NULL,
        stale_at INTEGER,
        PRIMARY KEY (config_id, remote_id)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_scrape_items_folder ON scrape_items(config_id, folder_path)",
    r#"CREATE TABLE IF NOT EXISTS scrape_permissions (
        config_id TEXT NOT NULL,
        remote_id TEXT NOT NULL,
        permission_id TEXT NOT NULL,
        role TEXT NOT NULL,
        principal_type TEXT NOT NULL,
        principal TEXT,
        PRIMARY KEY (config_id, remote_id, permission_id),
        FOREIGN KEY (config_id, remote_id) REFERENCES scrape_items(config_id, remote_id)
    )"#,
    r#"CREATE TABLE IF NOT EXISTS scrape_revisions (
        config_id TEXT NOT NULL,
        remote_id TEXT NOT NULL,
        revision_id TEXT NOT NULL,
        modified_at INTEGER NOT NULL,
        size INTEGER,
        author TEXT,
        PRIMARY KEY (config_id, remote_id, revision_id),
        FOREIGN KEY (config_id, remote_id) REFERENCES scrape_items(config_id, remote_id)
    )"#,
    // Run history
    r#"CREATE TABLE IF NOT EXISTS scrape_runs (
        id TEXT PRIMARY KEY,
        config_id TEXT NOT NULL REFERENCES scrape_configs(id),
        config_name TEXT NOT NULL,
        workspace TEXT NOT NULL,
        status TEXT NOT NULL,
        started_at INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL,
        truncated INTEGER NOT NULL DEFAULT 0,
        removal_skipped INTEGER NOT NULL DEFAULT 0,
        counts TEXT NOT NULL,
        errors TEXT NOT NULL
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_scrape_runs_config ON scrape_runs(config_id, started_at)",
    // Provenance: one record per output path
    r#"CREATE TABLE IF NOT EXISTS provenance (
        output_path TEXT PRIMARY KEY,
        operation_id TEXT NOT NULL,
        operation TEXT NOT NULL,
        sources TEXT NOT NULL,
        metadata TEXT NOT NULL,
        tracked_at INTEGER NOT NULL
    )"#,
    r#"CREATE TABLE IF NOT EXISTS provenance_sources (
        source_id TEXT NOT NULL,
        output_path TEXT NOT NULL REFERENCES provenance(output_path),
        PRIMARY KEY (source_id, output_path)
    )"#,
    // Backlinks: target <- document
    r#"CREATE TABLE IF NOT EXISTS backlink_edges (
        target TEXT NOT NULL,
        document TEXT NOT NULL,
        PRIMARY KEY (target, document)
    )"#,
    "CREATE INDEX IF NOT EXISTS idx_backlink_edges_document ON backlink_edges(document)",
];

impl TributaryDb {
    pub(crate) async fn ensure_schema(&self) -> Result<()> {
        // WAL lets a reader (e.g. the CLI) coexist with a running scrape
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;
        sqlx::query("PRAGMA foreign_keys=ON")
            .execute(&self.pool)
            .await?;

        for statement in STATEMENTS {
            sqlx::query(statement).execute(&self.pool).await?;
        }

        debug!(tables = STATEMENTS.len(), "Database schema verified");
        Ok(())
    }
}
