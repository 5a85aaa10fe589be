//! State store for Tributary.
//!
//! One SQLite database holds everything a scrape run reads or writes:
//! scrape configs, the local record snapshot (plus permissions and
//! revisions), run history, provenance records and backlink edges.
//!
//! ```rust,ignore
//! use tributary_db::TributaryDb;
//!
//! let db = TributaryDb::open("~/.tributary/tributary.sqlite3").await?;
//! let configs = db.configs_list_for_user("alice", None).await?;
//! ```
//!
//! Every multi-row mutation (one item with its children, one document's
//! backlink diff, one provenance record with its source index) runs inside a
//! single transaction.

mod error;
mod schema;
mod types;

mod backlinks;
mod configs;
mod items;
mod provenance;
mod runs;

pub use error::{DbError, Result};
pub use types::*;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Handle to the Tributary database. Cheap to clone.
#[derive(Clone)]
pub struct TributaryDb {
    pool: SqlitePool,
}

impl TributaryDb {
    /// Open or create a database at the given path, creating tables as needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let url = format!("sqlite:{}?mode=rwc", path.display());
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.ensure_schema().await?;

        info!(path = %path.display(), "Database opened");
        Ok(db)
    }

    /// Escape hatch for ad-hoc queries. Prefer the typed methods.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}

// Timestamp utilities
impl TributaryDb {
    /// Current time as milliseconds since Unix epoch.
    pub fn now_millis() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    pub fn millis_to_datetime(millis: i64) -> chrono::DateTime<chrono::Utc> {
        chrono::DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::TributaryDb;
    use tempfile::TempDir;

    pub async fn open_temp() -> (TempDir, TributaryDb) {
        let tmp = TempDir::new().unwrap();
        let db = TributaryDb::open(tmp.path().join("state.sqlite3"))
            .await
            .unwrap();
        (tmp, db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_open_creates_database_and_parent_dirs() {
        let tmp = TempDir::new().unwrap();
        let db_path = tmp.path().join("nested").join("state.sqlite3");

        let db = TributaryDb::open(&db_path).await.unwrap();
        assert!(db_path.exists());
        db.close().await;

        // Reopening an existing file re-verifies the schema without error.
        let db = TributaryDb::open(&db_path).await.unwrap();
        db.close().await;
    }

    #[test]
    fn test_millis_roundtrip() {
        let now = TributaryDb::now_millis();
        assert_eq!(TributaryDb::millis_to_datetime(now).timestamp_millis(), now);
    }
}
