//! Processing of a single selected record: resolve, acquire, record outcome

use crate::error::Result;
use crate::source_sync::SourceSync;
use bridge_traits::time::Clock;
use core_media::{GatewayResolver, MediaPipeline, ResolveError};
use core_store::{BackoffPolicy, TokenRecord, TokenRepository};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// How one attempt ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Renditions published at this location
    Published { location: String, remotes: usize },
    /// Counted as a failed attempt, retried later
    Failed { reason: String },
    /// Raised to the terminal ceiling, never retried
    Abandoned { reason: String },
    /// The local record was rolled back while the attempt ran; nothing was published
    Discarded,
}

pub struct TokenProcessor {
    tokens: Arc<dyn TokenRepository>,
    resolver: GatewayResolver,
    pipeline: Arc<MediaPipeline>,
    sync: Arc<SourceSync>,
    clock: Arc<dyn Clock>,
    terminal_ceiling: i64,
}

impl TokenProcessor {
    pub fn new(
        tokens: Arc<dyn TokenRepository>,
        resolver: GatewayResolver,
        pipeline: Arc<MediaPipeline>,
        sync: Arc<SourceSync>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            resolver,
            pipeline,
            sync,
            clock,
            terminal_ceiling: BackoffPolicy::default().terminal_ceiling(),
        }
    }

    pub fn with_terminal_ceiling(mut self, ceiling: i64) -> Self {
        self.terminal_ceiling = ceiling;
        self
    }

    /// Run one acquisition attempt and write its outcome to the local store.
    ///
    /// Only local store failures are returned as errors; acquisition problems
    /// are outcomes.
    #[instrument(skip(self, record), fields(kind = %record.kind, key = %record.key))]
    pub async fn process(&self, record: &TokenRecord) -> Result<ProcessOutcome> {
        let url = match self
            .resolver
            .resolve_raw(&record.metadata, record.token_uri.as_deref())
        {
            Ok(url) => url,
            Err(ResolveError::NotFound) => {
                return self.abandon(record, ResolveError::NotFound.to_string()).await;
            }
        };
        debug!(url = %url, attempt = record.attempt_count + 1, "Acquiring media");

        match self.pipeline.acquire(&record.key, &url).await {
            Ok(acquired) => {
                let marked = self
                    .tokens
                    .mark_processed(
                        record.kind,
                        &record.key,
                        &acquired.cached_location,
                        self.clock.now(),
                    )
                    .await?;
                if !marked {
                    warn!(location = %acquired.cached_location, "Record vanished during acquisition, not publishing");
                    return Ok(ProcessOutcome::Discarded);
                }

                let remotes = self
                    .sync
                    .publish_cached_location(record.kind, &record.key, &acquired.cached_location)
                    .await;

                info!(location = %acquired.cached_location, remotes, "Token cached");
                Ok(ProcessOutcome::Published {
                    location: acquired.cached_location,
                    remotes,
                })
            }
            Err(e) if e.is_permanent() => self.abandon(record, e.to_string()).await,
            Err(e) => {
                warn!(url = %url, error = %e, "Acquisition failed");
                self.tokens
                    .record_failure(record.kind, &record.key, self.clock.now())
                    .await?;
                Ok(ProcessOutcome::Failed {
                    reason: e.to_string(),
                })
            }
        }
    }

    async fn abandon(&self, record: &TokenRecord, reason: String) -> Result<ProcessOutcome> {
        warn!(reason = %reason, "Abandoning token");
        self.tokens
            .mark_abandoned(record.kind, &record.key, self.terminal_ceiling, self.clock.now())
            .await?;
        Ok(ProcessOutcome::Abandoned { reason })
    }
}
