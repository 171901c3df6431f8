use std::time::Duration;

use sqlx::postgres::PgPool;

use crate::store::{ArtifactKey, ArtifactStore, StoreError};

/// Key/value artifact store on Postgres.
///
/// Writes are upserts with bounded retry and linear backoff; the pipeline
/// is the sole writer, so the last write for a key wins by design.
pub struct PgArtifactStore {
    pool: PgPool,
    table: String,
    max_retries: u32,
    retry_backoff: Duration,
}

impl PgArtifactStore {
    pub fn new(pool: PgPool, table: String, max_retries: u32, retry_backoff: Duration) -> Self {
        Self {
            pool,
            table,
            max_retries,
            retry_backoff,
        }
    }

    async fn upsert(&self, key: &ArtifactKey, blob: &[u8]) -> Result<(), sqlx::Error> {
        let sql = format!(
            "INSERT INTO {} (key, value, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_at = now()",
            self.table
        );
        sqlx::query(&sql)
            .bind(key.as_str())
            .bind(blob)
            .execute(&self.pool)
            .await
            .map(|_| ())
    }
}

#[async_trait::async_trait]
impl ArtifactStore for PgArtifactStore {
    async fn put(&self, key: &ArtifactKey, blob: Vec<u8>) -> Result<(), StoreError> {
        let mut attempt: u32 = 0;
        loop {
            match self.upsert(key, &blob).await {
                Ok(()) => {
                    metrics::counter!("artifacts_published_total").increment(1);
                    return Ok(());
                }
                Err(e) if attempt < self.max_retries => {
                    attempt += 1;
                    let sleep_for = self.retry_backoff * attempt;
                    tracing::warn!(
                        key = %key,
                        error = %e,
                        attempt,
                        "artifact publish failed, retrying with backoff"
                    );
                    tokio::time::sleep(sleep_for).await;
                }
                Err(e) => {
                    tracing::error!(key = %key, error = %e, "artifact publish failed, giving up");
                    metrics::counter!("artifact_store_errors_total").increment(1);
                    return Err(StoreError::Backend(e.to_string()));
                }
            }
        }
    }

    async fn get(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StoreError> {
        let sql = format!("SELECT value FROM {} WHERE key = $1", self.table);
        let row: Option<(Vec<u8>,)> = sqlx::query_as(&sql)
            .bind(key.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| StoreError::Backend(e.to_string()))?;
        Ok(row.map(|(value,)| value))
    }
}
