//! Provenance records: one row per output path plus a source index.

use crate::error::Result;
use crate::types::ProvenanceRecord;
use crate::TributaryDb;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use tributary_ids::OperationId;

impl TributaryDb {
    /// Insert or overwrite the record for `record.output_path`.
    pub async fn provenance_put(&self, record: &ProvenanceRecord) -> Result<()> {
        let sources_json = serde_json::to_string(&record.sources)?;
        let metadata_json = serde_json::to_string(&record.metadata)?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM provenance_sources WHERE output_path = ?")
            .bind(&record.output_path)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO provenance (output_path, operation_id, operation, sources, metadata, tracked_at)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(output_path) DO UPDATE SET
                operation_id = excluded.operation_id,
                operation = excluded.operation,
                sources = excluded.sources,
                metadata = excluded.metadata,
                tracked_at = excluded.tracked_at
            "#,
        )
        .bind(&record.output_path)
        .bind(record.operation_id.as_str())
        .bind(&record.operation)
        .bind(&sources_json)
        .bind(&metadata_json)
        .bind(record.tracked_at.timestamp_millis())
        .execute(&mut *tx)
        .await?;

        for source_id in record.sources.keys() {
            sqlx::query("INSERT INTO provenance_sources (source_id, output_path) VALUES (?, ?)")
                .bind(source_id)
                .bind(&record.output_path)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    pub async fn provenance_get(&self, output_path: &str) -> Result<Option<ProvenanceRecord>> {
        let row = sqlx::query(
            "SELECT output_path, operation_id, operation, sources, metadata, tracked_at \
             FROM provenance WHERE output_path = ?",
        )
        .bind(output_path)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_provenance(&row)).transpose()
    }

    /// Output paths derived from a source, sorted.
    pub async fn provenance_outputs_for_source(&self, source_id: &str) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT output_path FROM provenance_sources WHERE source_id = ? ORDER BY output_path",
        )
        .bind(source_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|row| row.get("output_path")).collect())
    }

    pub async fn provenance_delete(&self, output_path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM provenance_sources WHERE output_path = ?")
            .bind(output_path)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM provenance WHERE output_path = ?")
            .bind(output_path)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(result.rows_affected() > 0)
    }
}

fn row_to_provenance(row: &SqliteRow) -> Result<ProvenanceRecord> {
    let operation_id: String = row.get("operation_id");
    let sources: String = row.get("sources");
    let metadata: String = row.get("metadata");

    Ok(ProvenanceRecord {
        output_path: row.get("output_path"),
        operation_id: OperationId::parse(&operation_id)?,
        operation: row.get("operation"),
        sources: serde_json::from_str(&sources)?,
        metadata: serde_json::from_str(&metadata)?,
        tracked_at: TributaryDb::millis_to_datetime(row.get("tracked_at")),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::open_temp;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn record(path: &str, sources: &[(&str, &str)]) -> ProvenanceRecord {
        ProvenanceRecord {
            output_path: path.into(),
            operation_id: OperationId::new(),
            operation: "scrape".into(),
            sources: sources
                .iter()
                .map(|(id, token)| (id.to_string(), token.to_string()))
                .collect(),
            metadata: BTreeMap::from([("mime".to_string(), serde_json::json!("text/plain"))]),
            tracked_at: Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_put_overwrites_and_reindexes_sources() {
        let (_tmp, db) = open_temp().await;

        db.provenance_put(&record("out/a.md", &[("s1", "v1"), ("s2", "v1")]))
            .await
            .unwrap();
        let second = record("out/a.md", &[("s2", "v2")]);
        db.provenance_put(&second).await.unwrap();

        let loaded = db.provenance_get("out/a.md").await.unwrap().unwrap();
        assert_eq!(loaded, second);
        assert!(db.provenance_outputs_for_source("s1").await.unwrap().is_empty());
        assert_eq!(
            db.provenance_outputs_for_source("s2").await.unwrap(),
            vec!["out/a.md".to_string()]
        );
    }

    #[tokio::test]
    async fn test_delete() {
        let (_tmp, db) = open_temp().await;
        db.provenance_put(&record("out/b.md", &[("s1", "v1")]))
            .await
            .unwrap();

        assert!(db.provenance_delete("out/b.md").await.unwrap());
        assert!(db.provenance_get("out/b.md").await.unwrap().is_none());
        assert!(db.provenance_outputs_for_source("s1").await.unwrap().is_empty());
        assert!(!db.provenance_delete("out/b.md").await.unwrap());
    }
}
