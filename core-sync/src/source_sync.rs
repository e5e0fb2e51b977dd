//! # Source Sync
//!
//! Pulls tokens without a cached location from every remote ledger into the
//! local mirror, and pushes cached locations back out.
//!
//! ## Per row
//!
//! 1. Local record already processed: push its cached location to the remote
//!    that reported it as missing
//! 2. Local record abandoned: skip
//! 3. Already upserted from an earlier remote this pass: skip
//! 4. Otherwise look up the block hash on the same remote and upsert. A
//!    changed block resets the record so it is fetched again. Only a
//!    successful upsert claims the row for this pass; an unknown block or a
//!    failed write leaves it to the next remote.
//!
//! A failure on one remote and kind is logged and only skips that unit.

use crate::error::Result;
use crate::registry::{SourceId, SourceRegistry};
use crate::remote::{RemoteLedger, RemoteToken};
use bridge_traits::pinning::ContentPinner;
use bridge_traits::time::Clock;
use core_media::{extract_content_id, GatewayResolver};
use core_store::{BackoffPolicy, ObservedToken, TokenKey, TokenKind, TokenRepository};
use futures::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Counters for one [`SourceSync::sync_all`] pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Remote rows examined
    pub observed: usize,
    /// Local records inserted or reset
    pub upserted: usize,
    /// Cached locations pushed to the reporting remote
    pub pushed: usize,
    pub skipped_abandoned: usize,
    pub skipped_duplicate: usize,
    /// Rows whose block is unknown on their remote
    pub skipped_unknown_block: usize,
    /// Remote/kind units that failed as a whole
    pub failed_units: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowOutcome {
    Upserted,
    Unchanged,
    Pushed,
    Abandoned,
    Duplicate,
    UnknownBlock,
}

pub struct SourceSync {
    registry: Arc<SourceRegistry>,
    tokens: Arc<dyn TokenRepository>,
    resolver: GatewayResolver,
    pinner: Arc<dyn ContentPinner>,
    clock: Arc<dyn Clock>,
    page_size: u32,
    terminal_ceiling: i64,
}

impl SourceSync {
    pub fn new(
        registry: Arc<SourceRegistry>,
        tokens: Arc<dyn TokenRepository>,
        resolver: GatewayResolver,
        pinner: Arc<dyn ContentPinner>,
        clock: Arc<dyn Clock>,
        page_size: u32,
    ) -> Self {
        Self {
            registry,
            tokens,
            resolver,
            pinner,
            clock,
            page_size,
            terminal_ceiling: BackoffPolicy::default().terminal_ceiling(),
        }
    }

    pub fn with_terminal_ceiling(mut self, ceiling: i64) -> Self {
        self.terminal_ceiling = ceiling;
        self
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// Mirror pending rows from every remote, in configuration order
    #[instrument(skip(self))]
    pub async fn sync_all(&self) -> SyncReport {
        let mut report = SyncReport::default();
        let mut upserted_this_pass: HashSet<(TokenKind, TokenKey)> = HashSet::new();

        for (source, ledger) in self.registry.ledgers().await {
            for kind in TokenKind::ALL {
                if let Err(e) = self
                    .sync_unit(&source, ledger.as_ref(), kind, &mut upserted_this_pass, &mut report)
                    .await
                {
                    warn!(source = %source, kind = %kind, error = %e, "Skipping remote for this pass");
                    report.failed_units += 1;
                }
            }
        }

        info!(
            observed = report.observed,
            upserted = report.upserted,
            pushed = report.pushed,
            failed_units = report.failed_units,
            "Source sync finished"
        );
        report
    }

    async fn sync_unit(
        &self,
        source: &SourceId,
        ledger: &dyn RemoteLedger,
        kind: TokenKind,
        upserted_this_pass: &mut HashSet<(TokenKind, TokenKey)>,
        report: &mut SyncReport,
    ) -> Result<()> {
        let rows = ledger.pending_tokens(kind, self.page_size).await?;
        if rows.is_empty() {
            debug!(source = %source, kind = %kind, "No pending rows");
            return Ok(());
        }

        for row in rows {
            report.observed += 1;
            let outcome = match self
                .sync_row(ledger, kind, &row, upserted_this_pass)
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(source = %source, key = %row.key, error = %e, "Failed to mirror remote row");
                    continue;
                }
            };

            match outcome {
                RowOutcome::Upserted => report.upserted += 1,
                RowOutcome::Pushed => report.pushed += 1,
                RowOutcome::Abandoned => report.skipped_abandoned += 1,
                RowOutcome::Duplicate => report.skipped_duplicate += 1,
                RowOutcome::UnknownBlock => {
                    debug!(source = %source, block = row.block_number, "Block not found on remote");
                    report.skipped_unknown_block += 1;
                }
                RowOutcome::Unchanged => {}
            }
        }

        Ok(())
    }

    async fn sync_row(
        &self,
        ledger: &dyn RemoteLedger,
        kind: TokenKind,
        row: &RemoteToken,
        upserted_this_pass: &mut HashSet<(TokenKind, TokenKey)>,
    ) -> Result<RowOutcome> {
        if let Some(local) = self.tokens.find(kind, &row.key).await? {
            if local.processed {
                if let Some(location) = local.cached_location.as_deref() {
                    ledger.set_cached_location(kind, &row.key, Some(location)).await?;
                    return Ok(RowOutcome::Pushed);
                }
            } else if local.attempt_count >= self.terminal_ceiling {
                return Ok(RowOutcome::Abandoned);
            }
        }

        let id = (kind, row.key.clone());
        if upserted_this_pass.contains(&id) {
            return Ok(RowOutcome::Duplicate);
        }

        // A remote that cannot vouch for the block leaves the row to later remotes
        let Some(block_hash) = ledger.block_hash(row.block_number).await? else {
            return Ok(RowOutcome::UnknownBlock);
        };

        let observed = ObservedToken {
            key: row.key.clone(),
            kind,
            block_number: row.block_number,
            block_hash,
            metadata: row.metadata.clone(),
            token_uri: row.token_uri.clone(),
        };

        let changed = self.tokens.upsert_observed(&observed, self.clock.now()).await?;
        upserted_this_pass.insert(id);
        if !changed {
            return Ok(RowOutcome::Unchanged);
        }

        info!(kind = %kind, key = %row.key, block = row.block_number, "Mirrored token");
        self.pin(&observed);
        Ok(RowOutcome::Upserted)
    }

    fn pin(&self, token: &ObservedToken) {
        let Ok(url) = self
            .resolver
            .resolve_raw(&token.metadata, token.token_uri.as_deref())
        else {
            return;
        };
        if let Some(content_id) = extract_content_id(&url) {
            debug!(key = %token.key, content_id = %content_id, "Submitting content for pinning");
            self.pinner.submit(&content_id);
        }
    }

    /// Write `location` to every remote, concurrently.
    ///
    /// # Returns
    /// Number of remotes that accepted the write
    pub async fn publish_cached_location(&self, kind: TokenKind, key: &TokenKey, location: &str) -> usize {
        let ledgers = self.registry.ledgers().await;
        let writes = ledgers.iter().map(|(source, ledger)| async move {
            match ledger.set_cached_location(kind, key, Some(location)).await {
                Ok(_) => true,
                Err(e) => {
                    warn!(source = %source, key = %key, error = %e, "Failed to publish cached location");
                    false
                }
            }
        });

        join_all(writes).await.into_iter().filter(|ok| *ok).count()
    }

    /// Clear the cached location of `keys` on every remote.
    ///
    /// # Returns
    /// Number of successful per-key writes
    pub async fn clear_cached_locations(&self, kind: TokenKind, keys: &[TokenKey]) -> usize {
        if keys.is_empty() {
            return 0;
        }

        let ledgers = self.registry.ledgers().await;
        let clears = ledgers.iter().map(|(source, ledger)| async move {
            let mut cleared: usize = 0;
            for key in keys {
                match ledger.set_cached_location(kind, key, None).await {
                    Ok(_) => cleared += 1,
                    Err(e) => {
                        warn!(source = %source, key = %key, error = %e, "Failed to clear cached location")
                    }
                }
            }
            info!(source = %source, kind = %kind, cleared, "Cleared remote cached locations");
            cleared
        });

        join_all(clears).await.into_iter().sum()
    }
}
