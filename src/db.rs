use sqlx::{sqlite::SqlitePoolOptions, FromRow, SqlitePool};

/// Serialized payload row; `items` is a JSON array.
#[derive(Debug, Clone, FromRow)]
pub struct StoredPayload {
    pub source: String,
    pub items: String,
    pub fetched_at: i64,
}

pub struct Database {
    pool: SqlitePool,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // every connection to an in-memory database is a separate database
        let options = if database_url.contains(":memory:") {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            SqlitePoolOptions::new().max_connections(5)
        };

        let pool = options.connect(database_url).await?;

        Ok(Self { pool })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS cooldowns (
                source TEXT PRIMARY KEY,
                last_refresh INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS payloads (
                source TEXT PRIMARY KEY,
                items TEXT NOT NULL,
                fetched_at INTEGER NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get_last_refresh(&self, source: &str) -> anyhow::Result<Option<i64>> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT last_refresh FROM cooldowns WHERE source = ?")
                .bind(source)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    /// Store `at` as the last refresh unless a later one is already recorded.
    pub async fn record_refresh(&self, source: &str, at: i64) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO cooldowns (source, last_refresh)
            VALUES (?, ?)
            ON CONFLICT(source) DO UPDATE SET
                last_refresh = MAX(cooldowns.last_refresh, excluded.last_refresh)
            "#,
        )
        .bind(source)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_payload(&self, source: &str) -> anyhow::Result<Option<StoredPayload>> {
        let payload = sqlx::query_as::<_, StoredPayload>(
            "SELECT source, items, fetched_at FROM payloads WHERE source = ?",
        )
        .bind(source)
        .fetch_optional(&self.pool)
        .await?;
        Ok(payload)
    }

    pub async fn save_payload(
        &self,
        source: &str,
        items: &str,
        fetched_at: i64,
    ) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO payloads (source, items, fetched_at)
            VALUES (?, ?, ?)
            ON CONFLICT(source) DO UPDATE SET
                items = excluded.items,
                fetched_at = excluded.fetched_at
            "#,
        )
        .bind(source)
        .bind(items)
        .bind(fetched_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn create_test_db() -> Database {
        let db = Database::new("sqlite::memory:").await.unwrap();
        db.initialize().await.unwrap();
        db
    }

    mod initialization_tests {
        use super::*;

        #[tokio::test]
        async fn test_database_creation() {
            let db = Database::new("sqlite::memory:").await;
            assert!(db.is_ok());
        }

        #[tokio::test]
        async fn test_double_initialization_is_safe() {
            let db = create_test_db().await;
            let result = db.initialize().await;
            assert!(result.is_ok());
        }

        #[tokio::test]
        async fn test_queries_fail_before_initialization() {
            let db = Database::new("sqlite::memory:").await.unwrap();
            assert!(db.get_last_refresh("social").await.is_err());
        }
    }

    mod cooldown_tests {
        use super::*;

        #[tokio::test]
        async fn test_unknown_source_has_no_refresh() {
            let db = create_test_db().await;
            assert_eq!(db.get_last_refresh("social").await.unwrap(), None);
        }

        #[tokio::test]
        async fn test_record_and_read_back() {
            let db = create_test_db().await;
            db.record_refresh("social", 1_000).await.unwrap();
            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(1_000));
        }

        #[tokio::test]
        async fn test_record_moves_forward() {
            let db = create_test_db().await;
            db.record_refresh("social", 1_000).await.unwrap();
            db.record_refresh("social", 2_000).await.unwrap();
            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(2_000));
        }

        #[tokio::test]
        async fn test_record_never_moves_backwards() {
            let db = create_test_db().await;
            db.record_refresh("social", 2_000).await.unwrap();
            db.record_refresh("social", 1_000).await.unwrap();
            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(2_000));
        }

        #[tokio::test]
        async fn test_sources_are_independent() {
            let db = create_test_db().await;
            db.record_refresh("social", 1_000).await.unwrap();
            db.record_refresh("news", 5_000).await.unwrap();
            assert_eq!(db.get_last_refresh("social").await.unwrap(), Some(1_000));
            assert_eq!(db.get_last_refresh("news").await.unwrap(), Some(5_000));
        }
    }

    mod payload_tests {
        use super::*;

        #[tokio::test]
        async fn test_missing_payload() {
            let db = create_test_db().await;
            assert!(db.get_payload("social").await.unwrap().is_none());
        }

        #[tokio::test]
        async fn test_save_and_load_payload() {
            let db = create_test_db().await;
            db.save_payload("social", r#"["a","b"]"#, 1_000).await.unwrap();

            let payload = db.get_payload("social").await.unwrap().unwrap();
            assert_eq!(payload.source, "social");
            assert_eq!(payload.items, r#"["a","b"]"#);
            assert_eq!(payload.fetched_at, 1_000);
        }

        #[tokio::test]
        async fn test_save_replaces_previous_payload() {
            let db = create_test_db().await;
            db.save_payload("social", r#"["old"]"#, 1_000).await.unwrap();
            db.save_payload("social", r#"["new"]"#, 2_000).await.unwrap();

            let payload = db.get_payload("social").await.unwrap().unwrap();
            assert_eq!(payload.items, r#"["new"]"#);
            assert_eq!(payload.fetched_at, 2_000);
        }
    }
}
