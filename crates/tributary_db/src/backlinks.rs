//! Backlink edges, stored one row per `(target, document)` pair.

use crate::error::Result;
use crate::TributaryDb;
use sqlx::Row;

impl TributaryDb {
    /// Apply one document's edge diff in a single transaction.
    pub async fn backlinks_apply_diff(
        &self,
        document: &str,
        retract: &[String],
        add: &[String],
    ) -> Result<()> {
        if retract.is_empty() && add.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for target in retract {
            sqlx::query("DELETE FROM backlink_edges WHERE target = ? AND document = ?")
                .bind(target)
                .bind(document)
                .execute(&mut *tx)
                .await?;
        }
        for target in add {
            sqlx::query("INSERT OR IGNORE INTO backlink_edges (target, document) VALUES (?, ?)")
                .bind(target)
                .bind(document)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Drop every outbound edge of `document`.
    pub async fn backlinks_remove_document(&self, document: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM backlink_edges WHERE document = ?")
            .bind(document)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Documents referencing `target`, sorted.
    pub async fn backlinks_for_target(&self, target: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT document FROM backlink_edges WHERE target = ? ORDER BY document")
            .bind(target)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("document")).collect())
    }

    /// Targets referenced by `document`, sorted.
    pub async fn backlinks_outbound(&self, document: &str) -> Result<Vec<String>> {
        let rows = sqlx::query("SELECT target FROM backlink_edges WHERE document = ? ORDER BY target")
            .bind(document)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(|row| row.get("target")).collect())
    }

    /// Every edge as `(target, document)`, for rebuilding an in-memory index.
    pub async fn backlinks_all(&self) -> Result<Vec<(String, String)>> {
        let rows = sqlx::query("SELECT target, document FROM backlink_edges ORDER BY target, document")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .map(|row| (row.get("target"), row.get("document")))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::open_temp;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_apply_diff_moves_edges() {
        let (_tmp, db) = open_temp().await;

        db.backlinks_apply_diff("notes/d.md", &[], &strings(&["a", "b"]))
            .await
            .unwrap();
        db.backlinks_apply_diff("notes/d.md", &strings(&["a"]), &strings(&["c"]))
            .await
            .unwrap();

        assert!(db.backlinks_for_target("a").await.unwrap().is_empty());
        assert_eq!(db.backlinks_for_target("b").await.unwrap(), strings(&["notes/d.md"]));
        assert_eq!(db.backlinks_outbound("notes/d.md").await.unwrap(), strings(&["b", "c"]));
    }

    #[tokio::test]
    async fn test_remove_document() {
        let (_tmp, db) = open_temp().await;
        db.backlinks_apply_diff("x.md", &[], &strings(&["a", "b"]))
            .await
            .unwrap();
        db.backlinks_apply_diff("y.md", &[], &strings(&["a"]))
            .await
            .unwrap();

        assert_eq!(db.backlinks_remove_document("x.md").await.unwrap(), 2);
        assert_eq!(
            db.backlinks_all().await.unwrap(),
            vec![("a".to_string(), "y.md".to_string())]
        );
    }
}
