//! # mintmirror
//!
//! Wires the workspace crates into a running media mirror.
//!
//! [`MirrorService::build`] takes a validated
//! [`MirrorConfig`](core_runtime::MirrorConfig) once and hands the relevant
//! parts to each component. Nothing reads configuration after that.
//!
//! ```rust,ignore
//! let config = MirrorConfig::from_json_file("config.json")?;
//! let service = MirrorService::build(&config).await?;
//! service.run(CancellationToken::new()).await;
//! ```

use anyhow::{Context, Result};
use bridge_native::{IpfsCliPinner, PinningOptions, ReqwestHttpClient};
use bridge_traits::pinning::{ContentPinner, NoopPinner};
use bridge_traits::time::{Clock, SystemClock};
use core_media::{GatewayResolver, MediaConfig, MediaPipeline};
use core_runtime::MirrorConfig;
use core_store::db::{create_pool, DatabaseConfig};
use core_store::{BackoffPolicy, SqliteTokenRepository, TokenRepository};
use core_sync::{
    CoordinatorConfig, MirrorCoordinator, PgConnector, ReconciliationEngine, SourceRegistry,
    SourceSync, TokenProcessor, WorkSelector, WorkerPool,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// A fully wired mirror
pub struct MirrorService {
    coordinator: MirrorCoordinator,
}

impl MirrorService {
    /// Open the local store, set up remotes and build every component.
    ///
    /// Remote connections are lazy; an unreachable remote does not fail the
    /// build.
    pub async fn build(config: &MirrorConfig) -> Result<Self> {
        let pool = create_pool(DatabaseConfig::new(&config.local_database))
            .await
            .with_context(|| {
                format!("opening local store {}", config.local_database.display())
            })?;
        let tokens: Arc<dyn TokenRepository> = Arc::new(SqliteTokenRepository::new(pool));
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let policy = BackoffPolicy::default();
        let terminal_ceiling = policy.terminal_ceiling();

        let pinner: Arc<dyn ContentPinner> = match &config.pinning {
            Some(pinning) => {
                info!(binary = %pinning.binary.display(), "Local pinning enabled");
                Arc::new(IpfsCliPinner::spawn(PinningOptions {
                    binary: pinning.binary.clone(),
                    ipfs_path: pinning.ipfs_path.clone(),
                    ..PinningOptions::default()
                }))
            }
            None => Arc::new(NoopPinner),
        };

        let registry = Arc::new(SourceRegistry::new(
            config.sources.clone(),
            Arc::new(PgConnector::new(config.remote_max_connections)),
        ));
        let resolver = GatewayResolver::new(config.gateway_root());

        let sync = Arc::new(
            SourceSync::new(
                registry,
                Arc::clone(&tokens),
                resolver.clone(),
                pinner,
                Arc::clone(&clock),
                config.sync_page_size,
            )
            .with_terminal_ceiling(terminal_ceiling),
        );

        let reconciler = Arc::new(ReconciliationEngine::new(
            Arc::clone(&sync),
            Arc::clone(&tokens),
            config.reconcile_batch_step,
            config.reconcile_retry_delay(),
        ));

        let http = ReqwestHttpClient::new(config.timeouts).context("building HTTP client")?;
        let media = MediaConfig::new(&config.root_dir, &config.temp_dir, config.root_url())
            .with_timeouts(config.timeouts)
            .with_max_download_bytes(config.max_download_bytes)
            .with_max_url_length(config.max_url_length)
            .with_webp_quality(config.webp_quality);
        let pipeline = Arc::new(MediaPipeline::new(Arc::new(http), media));

        let processor = Arc::new(
            TokenProcessor::new(
                Arc::clone(&tokens),
                resolver,
                pipeline,
                Arc::clone(&sync),
                Arc::clone(&clock),
            )
            .with_terminal_ceiling(terminal_ceiling),
        );

        let coordinator = MirrorCoordinator::new(
            reconciler,
            sync,
            WorkSelector::new(tokens, policy, clock),
            processor,
            WorkerPool::new(config.worker_concurrency),
            CoordinatorConfig {
                selection_page_size: config.selection_page_size,
                cycle_delay: config.cycle_delay(),
            },
        );

        info!(
            sources = config.sources.len(),
            workers = config.worker_concurrency,
            root_url = %config.root_url(),
            "Mirror service ready"
        );
        Ok(Self { coordinator })
    }

    pub fn coordinator(&self) -> &MirrorCoordinator {
        &self.coordinator
    }

    /// Run until `shutdown` is cancelled
    pub async fn run(&self, shutdown: CancellationToken) {
        self.coordinator.run(shutdown).await;
    }
}
