//! # Mirror Coordinator
//!
//! Drives the mirror in cycles. Each cycle runs, in order:
//!
//! 1. Reconciliation: roll back records above the last correct block
//! 2. Source sync: pull pending rows from every remote
//! 3. Selection: pick due records from the local store
//! 4. Dispatch: hand them to the worker pool
//!
//! Between cycles the coordinator sleeps for the configured delay and then
//! waits until the pool's queue has drained below its concurrency, so that
//! selection never runs far ahead of the workers.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tokio_util::sync::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! coordinator.run(shutdown.clone()).await;
//! ```

use crate::pool::WorkerPool;
use crate::reconcile::{ReconcileReport, ReconciliationEngine};
use crate::selector::WorkSelector;
use crate::source_sync::{SourceSync, SyncReport};
use crate::worker::{ProcessOutcome, TokenProcessor};
use core_store::{TokenKey, TokenKind, TokenRecord};
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Tunables for the driver loop
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Records selected per cycle
    pub selection_page_size: u32,
    /// Pause after each cycle
    pub cycle_delay: Duration,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            selection_page_size: 500,
            cycle_delay: Duration::from_secs(5),
        }
    }
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub reconcile: ReconcileReport,
    pub sync: SyncReport,
    pub selected: usize,
    pub dispatched: usize,
    /// Selected records skipped because an earlier cycle is still working on them
    pub already_in_flight: usize,
}

type InFlight = Arc<Mutex<HashSet<(TokenKind, TokenKey)>>>;

pub struct MirrorCoordinator {
    reconciler: Arc<ReconciliationEngine>,
    sync: Arc<SourceSync>,
    selector: WorkSelector,
    processor: Arc<TokenProcessor>,
    pool: WorkerPool,
    in_flight: InFlight,
    config: CoordinatorConfig,
}

fn lock(in_flight: &InFlight) -> MutexGuard<'_, HashSet<(TokenKind, TokenKey)>> {
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Releases a dispatched record when its task ends, panics included
struct InFlightGuard {
    in_flight: InFlight,
    id: (TokenKind, TokenKey),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        lock(&self.in_flight).remove(&self.id);
    }
}

impl MirrorCoordinator {
    pub fn new(
        reconciler: Arc<ReconciliationEngine>,
        sync: Arc<SourceSync>,
        selector: WorkSelector,
        processor: Arc<TokenProcessor>,
        pool: WorkerPool,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            reconciler,
            sync,
            selector,
            processor,
            pool,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            config,
        }
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// One reconcile, sync, select, dispatch pass
    #[instrument(skip(self))]
    pub async fn run_cycle(&self) -> CycleReport {
        let mut report = CycleReport::default();

        match self.reconciler.reconcile().await {
            Ok(reconcile) => report.reconcile = reconcile,
            Err(e) => warn!(error = %e, "Reconciliation failed, continuing with sync"),
        }

        report.sync = self.sync.sync_all().await;

        let selected = match self.selector.select(self.config.selection_page_size).await {
            Ok(selected) => selected,
            Err(e) => {
                warn!(error = %e, "Selecting due records failed");
                Vec::new()
            }
        };
        report.selected = selected.len();

        for record in selected {
            if self.dispatch(record) {
                report.dispatched += 1;
            } else {
                report.already_in_flight += 1;
            }
        }

        info!(
            deleted = report.reconcile.deleted(),
            upserted = report.sync.upserted,
            selected = report.selected,
            dispatched = report.dispatched,
            queued = self.pool.queued(),
            "Cycle complete"
        );
        report
    }

    fn dispatch(&self, record: TokenRecord) -> bool {
        let id = (record.kind, record.key.clone());
        if !lock(&self.in_flight).insert(id.clone()) {
            debug!(key = %record.key, "Record still in flight");
            return false;
        }

        let processor = Arc::clone(&self.processor);
        let guard = InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
            id,
        };
        self.pool.submit(async move {
            let _guard = guard;
            match processor.process(&record).await {
                Ok(ProcessOutcome::Published { .. }) => {}
                Ok(outcome) => debug!(key = %record.key, outcome = ?outcome, "Attempt finished"),
                Err(e) => warn!(key = %record.key, error = %e, "Failed to record attempt outcome"),
            }
        });
        true
    }

    /// Run cycles until `shutdown` fires, then drain the pool
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            concurrency = self.pool.concurrency(),
            cycle_delay_ms = self.config.cycle_delay.as_millis() as u64,
            "Mirror loop started"
        );

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.run_cycle() => {}
            }

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.config.cycle_delay) => {}
            }

            debug!(queued = self.pool.queued(), "Waiting for queue to drain");
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.pool.wait_until_queue_below(self.pool.concurrency()) => {}
            }
        }

        info!(running = self.pool.running(), queued = self.pool.queued(), "Shutting down, draining workers");
        self.pool.wait_idle().await;
        info!("Mirror loop stopped");
    }
}
