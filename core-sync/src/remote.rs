//! # Remote Ledgers
//!
//! Read access to the indexer databases tokens are mirrored from, plus the
//! one write the mirror performs there: the cached location column.
//!
//! Each remote exposes one table per [`TokenKind`] (names come from
//! [`TokenKind::layout`]) and a `blocks(number, hash)` table.

use crate::error::{Result, SyncError};
use crate::registry::SourceId;
use async_trait::async_trait;
use core_store::{TokenKey, TokenKind};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::debug;

/// Metadata placeholder some indexers write when a document failed to parse
pub const INVALID_METADATA: &str = "___INVALID_METADATA___";

/// Remote-side name of the cached location column
pub const CACHE_COLUMN: &str = "image_cache";

/// A remote row without a cached location
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteToken {
    pub key: TokenKey,
    pub block_number: i64,
    pub metadata: String,
    pub token_uri: Option<String>,
}

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Rows of `kind` that still need media, newest block first
    async fn pending_tokens(&self, kind: TokenKind, limit: u32) -> Result<Vec<RemoteToken>>;

    /// Hash of block `number`, if the remote knows it
    async fn block_hash(&self, number: i64) -> Result<Option<String>>;

    /// Highest block number the remote has indexed
    async fn head_block(&self) -> Result<Option<i64>>;

    /// Set or clear the cached location of one token
    ///
    /// # Returns
    /// Number of updated rows
    async fn set_cached_location(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        location: Option<&str>,
    ) -> Result<u64>;
}

/// PostgreSQL remote ledger
pub struct PgRemoteLedger {
    source: SourceId,
    pool: PgPool,
}

impl PgRemoteLedger {
    pub fn new(source: SourceId, pool: PgPool) -> Self {
        Self { source, pool }
    }

    pub fn source(&self) -> &SourceId {
        &self.source
    }

    fn map_error(&self, error: sqlx::Error) -> SyncError {
        SyncError::remote(&self.source, error)
    }

    fn map_row(&self, row: &PgRow) -> Result<RemoteToken> {
        let read = || -> std::result::Result<RemoteToken, sqlx::Error> {
            Ok(RemoteToken {
                key: TokenKey::new(
                    row.try_get::<String, _>("contract")?,
                    row.try_get::<String, _>("token_id")?,
                ),
                block_number: row.try_get("block_number")?,
                metadata: row.try_get("metadata")?,
                token_uri: row.try_get("token_uri")?,
            })
        };
        read().map_err(|e| self.map_error(e))
    }
}

#[async_trait]
impl RemoteLedger for PgRemoteLedger {
    async fn pending_tokens(&self, kind: TokenKind, limit: u32) -> Result<Vec<RemoteToken>> {
        let layout = kind.layout();
        let sql = format!(
            r#"
            SELECT contract::text AS contract,
                   token_id::text AS token_id,
                   {order}::bigint AS block_number,
                   metadata::text AS metadata,
                   token_uri::text AS token_uri
            FROM {table}
            WHERE ({cache} IS NULL OR {cache} = '')
              AND metadata IS NOT NULL
              AND metadata::text NOT IN ($1, $2)
            ORDER BY {order} DESC
            LIMIT $3
            "#,
            order = layout.order_field,
            table = layout.remote_table,
            cache = CACHE_COLUMN,
        );

        let rows = sqlx::query(&sql)
            .bind(INVALID_METADATA)
            .bind(format!("\"{}\"", INVALID_METADATA))
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(|e| self.map_error(e))?;

        debug!(source = %self.source, kind = %kind, rows = rows.len(), "Fetched pending remote rows");

        rows.iter().map(|row| self.map_row(row)).collect()
    }

    async fn block_hash(&self, number: i64) -> Result<Option<String>> {
        sqlx::query_scalar::<_, String>("SELECT hash::text FROM blocks WHERE number = $1 LIMIT 1")
            .bind(number)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn head_block(&self) -> Result<Option<i64>> {
        sqlx::query_scalar::<_, i64>("SELECT number::bigint FROM blocks ORDER BY number DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| self.map_error(e))
    }

    async fn set_cached_location(
        &self,
        kind: TokenKind,
        key: &TokenKey,
        location: Option<&str>,
    ) -> Result<u64> {
        let sql = format!(
            "UPDATE {} SET {} = $1 WHERE contract = $2 AND token_id = $3",
            kind.layout().remote_table,
            CACHE_COLUMN
        );

        let result = sqlx::query(&sql)
            .bind(location)
            .bind(&key.contract)
            .bind(&key.token_id)
            .execute(&self.pool)
            .await
            .map_err(|e| self.map_error(e))?;

        Ok(result.rows_affected())
    }
}
