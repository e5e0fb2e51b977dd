//! # Mirror Sync
//!
//! Keeps the local mirror in step with the remote ledgers and drives media
//! acquisition.
//!
//! ## Overview
//!
//! Each cycle of the [`MirrorCoordinator`]:
//! - Rolls back local records invalidated by a chain reorganisation
//!   ([`ReconciliationEngine`])
//! - Pulls rows without a cached location from every remote ([`SourceSync`])
//! - Picks due records under the retry backoff ([`WorkSelector`])
//! - Runs acquisitions on a bounded [`WorkerPool`] ([`TokenProcessor`])
//!
//! ## Components
//!
//! - **Registry** (`registry`): lazily connected remote ledgers keyed by source
//! - **Remote** (`remote`): the [`RemoteLedger`] trait and its PostgreSQL implementation
//! - **Source Sync** (`source_sync`): remote → local mirroring and cached location pushes
//! - **Reconciliation** (`reconcile`): fork detection and rollback
//! - **Selector** (`selector`): due-record selection
//! - **Worker** (`worker`): one acquisition attempt and its outcome
//! - **Pool** (`pool`): bounded task execution
//! - **Coordinator** (`coordinator`): the driver loop

pub mod coordinator;
pub mod error;
pub mod pool;
pub mod reconcile;
pub mod registry;
pub mod remote;
pub mod selector;
pub mod source_sync;
pub mod worker;

pub use coordinator::{CoordinatorConfig, CycleReport, MirrorCoordinator};
pub use error::{Result, SyncError};
pub use pool::{PoolStats, WorkerPool};
pub use reconcile::{ReconcileReport, ReconciliationEngine, Rollback};
pub use registry::{LedgerConnector, PgConnector, SourceId, SourceRegistry};
pub use remote::{PgRemoteLedger, RemoteLedger, RemoteToken};
pub use selector::WorkSelector;
pub use source_sync::{SourceSync, SyncReport};
pub use worker::{ProcessOutcome, TokenProcessor};
