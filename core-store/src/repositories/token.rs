//! Token repository trait and SQLite implementation

use crate::backoff::BackoffPolicy;
use crate::error::{Result, StoreError};
use crate::models::{ObservedToken, TokenKey, TokenKind, TokenRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{query, Row, SqlitePool};

const COLUMNS: &str = "contract, token_id, kind, block_number, block_hash, metadata, token_uri, \
                       cached_location, processed, attempt_count, last_attempt_at, updated_at";

/// Data access for mirrored tokens.
///
/// Every mutation is a single statement keyed by `(contract, token_id)`, so
/// concurrent workers never need a transaction.
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// Find a token by key
    async fn find(&self, kind: TokenKind, key: &TokenKey) -> Result<Option<TokenRecord>>;

    /// Insert a newly observed token, or reset an existing one whose block
    /// changed.
    ///
    /// A reset clears `processed`, `cached_location`, `attempt_count` and
    /// `last_attempt_at`. An existing row with the same block is left alone.
    ///
    /// # Returns
    /// - `Ok(true)` if a row was inserted or reset
    /// - `Ok(false)` if the stored row already matched
    async fn upsert_observed(&self, token: &ObservedToken, now: DateTime<Utc>) -> Result<bool>;

    /// Record a successful acquisition
    async fn mark_processed(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        cached_location: &str,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Count one failed acquisition
    async fn record_failure(&self, kind: TokenKind, key: &TokenKey, now: DateTime<Utc>)
        -> Result<bool>;

    /// Raise the attempt count to `ceiling` so the token is never selected again
    async fn mark_abandoned(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        ceiling: i64,
        now: DateTime<Utc>,
    ) -> Result<bool>;

    /// Unprocessed tokens due under `policy`, least attempted first
    async fn select_due(
        &self,
        kind: TokenKind,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TokenRecord>>;

    /// Most recent tokens by descending block number
    async fn recent(&self, kind: TokenKind, limit: u32) -> Result<Vec<TokenRecord>>;

    /// Keys of every token minted strictly above `block_number`
    async fn keys_above(&self, kind: TokenKind, block_number: i64) -> Result<Vec<TokenKey>>;

    /// Delete every token minted strictly above `block_number`
    ///
    /// # Returns
    /// Number of deleted rows
    async fn delete_above(&self, kind: TokenKind, block_number: i64) -> Result<u64>;

    /// Count tokens of a kind
    async fn count(&self, kind: TokenKind) -> Result<i64>;
}

/// SQLite implementation of TokenRepository
pub struct SqliteTokenRepository {
    pool: SqlitePool,
}

impl SqliteTokenRepository {
    /// Create a new SqliteTokenRepository
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &SqliteRow) -> Result<TokenRecord> {
        let kind: String = row.try_get("kind")?;
        let last_attempt_at: Option<i64> = row.try_get("last_attempt_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(TokenRecord {
            key: TokenKey::new(
                row.try_get::<String, _>("contract")?,
                row.try_get::<String, _>("token_id")?,
            ),
            kind: kind.parse()?,
            block_number: row.try_get("block_number")?,
            block_hash: row.try_get("block_hash")?,
            metadata: row.try_get("metadata")?,
            token_uri: row.try_get("token_uri")?,
            cached_location: row.try_get("cached_location")?,
            processed: row.try_get("processed")?,
            attempt_count: row.try_get("attempt_count")?,
            last_attempt_at: last_attempt_at
                .map(|ts| timestamp("last_attempt_at", ts))
                .transpose()?,
            updated_at: timestamp("updated_at", updated_at)?,
        })
    }

    fn map_rows(rows: &[SqliteRow]) -> Result<Vec<TokenRecord>> {
        rows.iter().map(Self::map_row).collect()
    }
}

fn timestamp(field: &str, secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| StoreError::InvalidData {
        field: field.to_string(),
        message: format!("timestamp {} out of range", secs),
    })
}

/// SQL predicate and bind order for [`BackoffPolicy`]
fn due_predicate(policy: &BackoffPolicy) -> String {
    let mut predicate = String::from("attempt_count < ?");
    for _ in policy.tiers() {
        predicate.push_str(
            " OR (last_attempt_at IS NOT NULL AND last_attempt_at < ? AND attempt_count < ?)",
        );
    }
    predicate
}

#[async_trait]
impl TokenRepository for SqliteTokenRepository {
    async fn find(&self, kind: TokenKind, key: &TokenKey) -> Result<Option<TokenRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE contract = ? AND token_id = ?",
            COLUMNS,
            kind.layout().local_table
        );

        let row = query(&sql)
            .bind(&key.contract)
            .bind(&key.token_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn upsert_observed(&self, token: &ObservedToken, now: DateTime<Utc>) -> Result<bool> {
        if token.block_number < 0 {
            return Err(StoreError::InvalidInput {
                field: "block_number".to_string(),
                message: format!("negative block number {}", token.block_number),
            });
        }

        let table = token.kind.layout().local_table;
        let sql = format!(
            r#"
            INSERT INTO {table} (
                contract, token_id, kind, block_number, block_hash, metadata, token_uri,
                cached_location, processed, attempt_count, last_attempt_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, NULL, 0, 0, NULL, ?)
            ON CONFLICT (contract, token_id) DO UPDATE SET
                block_number = excluded.block_number,
                block_hash = excluded.block_hash,
                metadata = excluded.metadata,
                token_uri = excluded.token_uri,
                cached_location = NULL,
                processed = 0,
                attempt_count = 0,
                last_attempt_at = NULL,
                updated_at = excluded.updated_at
            WHERE {table}.block_hash <> excluded.block_hash
               OR {table}.block_number <> excluded.block_number
            "#
        );

        let result = query(&sql)
            .bind(&token.key.contract)
            .bind(&token.key.token_id)
            .bind(token.kind.as_str())
            .bind(token.block_number)
            .bind(&token.block_hash)
            .bind(&token.metadata)
            .bind(&token.token_uri)
            .bind(now.timestamp())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_processed(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        cached_location: &str,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET processed = 1, cached_location = ?, updated_at = ? \
             WHERE contract = ? AND token_id = ?",
            kind.layout().local_table
        );

        let result = query(&sql)
            .bind(cached_location)
            .bind(now.timestamp())
            .bind(&key.contract)
            .bind(&key.token_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn record_failure(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET attempt_count = attempt_count + 1, last_attempt_at = ?, updated_at = ? \
             WHERE contract = ? AND token_id = ? AND processed = 0",
            kind.layout().local_table
        );

        let result = query(&sql)
            .bind(now.timestamp())
            .bind(now.timestamp())
            .bind(&key.contract)
            .bind(&key.token_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn mark_abandoned(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        ceiling: i64,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let sql = format!(
            "UPDATE {} SET attempt_count = MAX(attempt_count, ?), last_attempt_at = ?, updated_at = ? \
             WHERE contract = ? AND token_id = ? AND processed = 0",
            kind.layout().local_table
        );

        let result = query(&sql)
            .bind(ceiling)
            .bind(now.timestamp())
            .bind(now.timestamp())
            .bind(&key.contract)
            .bind(&key.token_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn select_due(
        &self,
        kind: TokenKind,
        policy: &BackoffPolicy,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<TokenRecord>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE processed = 0 AND ({}) \
             ORDER BY attempt_count ASC, block_number DESC LIMIT ?",
            COLUMNS,
            kind.layout().local_table,
            due_predicate(policy)
        );

        let now_ts = now.timestamp();
        let mut statement = query(&sql).bind(policy.unconditional_below());
        for tier in policy.tiers() {
            statement = statement
                .bind(now_ts - tier.elapsed.num_seconds())
                .bind(tier.ceiling);
        }

        let rows = statement.bind(limit).fetch_all(&self.pool).await?;
        Self::map_rows(&rows)
    }

    async fn recent(&self, kind: TokenKind, limit: u32) -> Result<Vec<TokenRecord>> {
        let sql = format!(
            "SELECT {} FROM {} ORDER BY block_number DESC, contract ASC, token_id ASC LIMIT ?",
            COLUMNS,
            kind.layout().local_table
        );

        let rows = query(&sql).bind(limit).fetch_all(&self.pool).await?;
        Self::map_rows(&rows)
    }

    async fn keys_above(&self, kind: TokenKind, block_number: i64) -> Result<Vec<TokenKey>> {
        let sql = format!(
            "SELECT contract, token_id FROM {} WHERE block_number > ?",
            kind.layout().local_table
        );

        let rows = query(&sql)
            .bind(block_number)
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                Ok(TokenKey::new(
                    row.try_get::<String, _>("contract")?,
                    row.try_get::<String, _>("token_id")?,
                ))
            })
            .collect()
    }

    async fn delete_above(&self, kind: TokenKind, block_number: i64) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE block_number > ?",
            kind.layout().local_table
        );

        let result = query(&sql)
            .bind(block_number)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self, kind: TokenKind) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", kind.layout().local_table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(count)
    }
}
