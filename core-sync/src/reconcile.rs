//! # Reconciliation
//!
//! Detects chain reorganisations by comparing the block hashes stored with
//! local records against the remote with the highest indexed block, and
//! rolls the mirror back to the last block both agree on.
//!
//! The search has no iteration cap. It widens its window of recent records
//! pass after pass and pauses between passes once it has seen every local
//! record without finding agreement.

use crate::error::Result;
use crate::registry::SourceId;
use crate::remote::RemoteLedger;
use crate::source_sync::SourceSync;
use core_store::{TokenKind, TokenRepository};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// What one [`ReconciliationEngine::reconcile`] pass rolled back, per kind
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub rollbacks: Vec<Rollback>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rollback {
    pub kind: TokenKind,
    /// Last block whose hash matched the arbiter
    pub last_correct_block: i64,
    /// Local records removed above it
    pub deleted: u64,
    /// Remote cached locations cleared, summed over remotes
    pub cleared: usize,
}

impl ReconcileReport {
    pub fn deleted(&self) -> u64 {
        self.rollbacks.iter().map(|rollback| rollback.deleted).sum()
    }
}

pub struct ReconciliationEngine {
    sync: Arc<SourceSync>,
    tokens: Arc<dyn TokenRepository>,
    batch_step: u32,
    retry_delay: Duration,
}

impl ReconciliationEngine {
    pub fn new(
        sync: Arc<SourceSync>,
        tokens: Arc<dyn TokenRepository>,
        batch_step: u32,
        retry_delay: Duration,
    ) -> Self {
        Self {
            sync,
            tokens,
            batch_step: batch_step.max(1),
            retry_delay,
        }
    }

    /// Remote reporting the highest head block; ties go to the earlier source
    async fn arbiter(&self) -> Option<(SourceId, Arc<dyn RemoteLedger>, i64)> {
        let mut best: Option<(SourceId, Arc<dyn RemoteLedger>, i64)> = None;

        for (source, ledger) in self.sync.registry().ledgers().await {
            match ledger.head_block().await {
                Ok(Some(head)) => {
                    if best.as_ref().map_or(true, |(_, _, current)| head > *current) {
                        best = Some((source, ledger, head));
                    }
                }
                Ok(None) => debug!(source = %source, "Remote has no blocks"),
                Err(e) => warn!(source = %source, error = %e, "Failed to read remote head block"),
            }
        }

        best
    }

    /// Highest local block whose stored hash matches the arbiter.
    ///
    /// Returns 0 when there are no local records of `kind`.
    #[instrument(skip(self))]
    pub async fn find_last_correct_block(&self, kind: TokenKind) -> Result<i64> {
        let mut pass: u32 = 1;

        loop {
            let window = pass.saturating_mul(self.batch_step);
            let records = match self.tokens.recent(kind, window).await {
                Ok(records) => records,
                Err(e) => {
                    warn!(error = %e, "Failed to load recent records");
                    tokio::time::sleep(self.retry_delay).await;
                    continue;
                }
            };
            if records.is_empty() {
                return Ok(0);
            }
            let covers_all = records.len() < window as usize;

            let Some((source, arbiter, head)) = self.arbiter().await else {
                warn!("No remote reported a head block");
                tokio::time::sleep(self.retry_delay).await;
                continue;
            };
            debug!(source = %source, head, window, "Checking block hashes against arbiter");

            let mut hashes: HashMap<i64, Option<String>> = HashMap::new();
            for record in &records {
                let remote_hash = match hashes.get(&record.block_number) {
                    Some(hash) => hash.clone(),
                    None => match arbiter.block_hash(record.block_number).await {
                        Ok(hash) => {
                            hashes.insert(record.block_number, hash.clone());
                            hash
                        }
                        Err(e) => {
                            warn!(source = %source, block = record.block_number, error = %e, "Block hash lookup failed");
                            continue;
                        }
                    },
                };

                match remote_hash {
                    Some(hash) if hash == record.block_hash => {
                        debug!(block = record.block_number, "Found last correct block");
                        return Ok(record.block_number);
                    }
                    Some(_) => debug!(
                        source = %source,
                        block = record.block_number,
                        "Block hash differs, fork detected"
                    ),
                    None => {}
                }
            }

            if covers_all {
                warn!(
                    records = records.len(),
                    "No local block agrees with the arbiter, retrying"
                );
                tokio::time::sleep(self.retry_delay).await;
            }
            pass = pass.saturating_add(1);
        }
    }

    /// Roll every kind back to its last correct block
    #[instrument(skip(self))]
    pub async fn reconcile(&self) -> Result<ReconcileReport> {
        let mut report = ReconcileReport::default();

        for kind in TokenKind::ALL {
            let last_correct_block = self.find_last_correct_block(kind).await?;
            if last_correct_block <= 0 {
                continue;
            }

            let keys = self.tokens.keys_above(kind, last_correct_block).await?;
            if keys.is_empty() {
                continue;
            }

            let deleted = self.tokens.delete_above(kind, last_correct_block).await?;
            info!(
                kind = %kind,
                last_correct_block,
                deleted,
                "Rolled back records above last correct block"
            );

            let cleared = self.sync.clear_cached_locations(kind, &keys).await;
            report.rollbacks.push(Rollback {
                kind,
                last_correct_block,
                deleted,
                cleared,
            });
        }

        Ok(report)
    }
}
