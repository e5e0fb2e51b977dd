//! # Source Registry
//!
//! Owns the connections to every configured remote ledger. Connections are
//! created on first use through a [`LedgerConnector`] and then reused for the
//! lifetime of the registry.

use crate::error::{Result, SyncError};
use crate::remote::{PgRemoteLedger, RemoteLedger};
use async_trait::async_trait;
use core_runtime::config::RemoteSourceConfig;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Identity of a remote ledger: host plus database name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SourceId {
    pub host: String,
    pub name: String,
}

impl SourceId {
    pub fn new(host: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            name: name.into(),
        }
    }
}

impl From<&RemoteSourceConfig> for SourceId {
    fn from(config: &RemoteSourceConfig) -> Self {
        Self::new(&config.host, &config.name)
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.name)
    }
}

/// Creates a ledger handle for one configured source
#[async_trait]
pub trait LedgerConnector: Send + Sync {
    async fn connect(&self, source: &RemoteSourceConfig) -> Result<Arc<dyn RemoteLedger>>;
}

/// Connects to PostgreSQL remotes with a small lazy pool per source
#[derive(Debug, Clone)]
pub struct PgConnector {
    max_connections: u32,
    acquire_timeout: Duration,
}

impl PgConnector {
    pub fn new(max_connections: u32) -> Self {
        Self {
            max_connections,
            acquire_timeout: Duration::from_secs(10),
        }
    }

    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

#[async_trait]
impl LedgerConnector for PgConnector {
    async fn connect(&self, source: &RemoteSourceConfig) -> Result<Arc<dyn RemoteLedger>> {
        let mut options = PgConnectOptions::new()
            .host(&source.host)
            .port(source.port)
            .database(&source.name);
        if let Some(user) = &source.user {
            options = options.username(user);
        }
        if let Some(password) = &source.password {
            options = options.password(password);
        }

        // Sockets are opened on first query; an unreachable remote shows up
        // as a query error in the cycle that needs it.
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect_lazy_with(options);

        Ok(Arc::new(PgRemoteLedger::new(SourceId::from(source), pool)))
    }
}

/// Registry of remote ledgers keyed by [`SourceId`]
pub struct SourceRegistry {
    sources: Vec<RemoteSourceConfig>,
    connector: Arc<dyn LedgerConnector>,
    ledgers: Mutex<HashMap<SourceId, Arc<dyn RemoteLedger>>>,
}

impl SourceRegistry {
    /// Duplicate sources (same host and name) are collapsed, first one wins.
    pub fn new(sources: Vec<RemoteSourceConfig>, connector: Arc<dyn LedgerConnector>) -> Self {
        let mut unique: Vec<RemoteSourceConfig> = Vec::with_capacity(sources.len());
        for source in sources {
            if unique.iter().any(|known| SourceId::from(known) == SourceId::from(&source)) {
                warn!(source = %SourceId::from(&source), "Ignoring duplicate remote source");
                continue;
            }
            unique.push(source);
        }

        Self {
            sources: unique,
            connector,
            ledgers: Mutex::new(HashMap::new()),
        }
    }

    /// Configured sources in configuration order
    pub fn source_ids(&self) -> Vec<SourceId> {
        self.sources.iter().map(SourceId::from).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    /// Ledger for `id`, connecting on first use
    pub async fn ledger(&self, id: &SourceId) -> Result<Arc<dyn RemoteLedger>> {
        let mut ledgers = self.ledgers.lock().await;
        if let Some(ledger) = ledgers.get(id) {
            return Ok(Arc::clone(ledger));
        }

        let source = self
            .sources
            .iter()
            .find(|source| SourceId::from(*source) == *id)
            .ok_or_else(|| SyncError::UnknownSource(id.to_string()))?;

        let ledger = self.connector.connect(source).await?;
        info!(source = %id, "Connected remote ledger");
        ledgers.insert(id.clone(), Arc::clone(&ledger));
        Ok(ledger)
    }

    /// Every ledger that could be connected, in configuration order.
    ///
    /// Sources whose connector fails are logged and left out; they are
    /// retried on the next call.
    pub async fn ledgers(&self) -> Vec<(SourceId, Arc<dyn RemoteLedger>)> {
        let mut connected = Vec::with_capacity(self.sources.len());
        for id in self.source_ids() {
            match self.ledger(&id).await {
                Ok(ledger) => connected.push((id, ledger)),
                Err(e) => warn!(source = %id, error = %e, "Remote ledger unavailable"),
            }
        }
        connected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::RemoteToken;
    use core_store::{TokenKey, TokenKind};
    use mockall::mock;

    struct NullLedger;

    #[async_trait]
    impl RemoteLedger for NullLedger {
        async fn pending_tokens(&self, _kind: TokenKind, _limit: u32) -> Result<Vec<RemoteToken>> {
            Ok(Vec::new())
        }

        async fn block_hash(&self, _number: i64) -> Result<Option<String>> {
            Ok(None)
        }

        async fn head_block(&self) -> Result<Option<i64>> {
            Ok(None)
        }

        async fn set_cached_location(
            &self,
            _kind: TokenKind,
            _key: &TokenKey,
            _location: Option<&str>,
        ) -> Result<u64> {
            Ok(0)
        }
    }

    mock! {
        pub Connector {}

        #[async_trait]
        impl LedgerConnector for Connector {
            async fn connect(&self, source: &RemoteSourceConfig) -> Result<Arc<dyn RemoteLedger>>;
        }
    }

    fn sources() -> Vec<RemoteSourceConfig> {
        vec![
            RemoteSourceConfig::new("10.0.0.1", "mainnet"),
            RemoteSourceConfig::new("10.0.0.2", "mainnet"),
        ]
    }

    #[tokio::test]
    async fn test_ledger_is_connected_once() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .times(2)
            .returning(|_| Ok(Arc::new(NullLedger) as Arc<dyn RemoteLedger>));

        let registry = SourceRegistry::new(sources(), Arc::new(connector));
        let id = SourceId::new("10.0.0.1", "mainnet");

        let first = registry.ledger(&id).await.unwrap();
        let second = registry.ledger(&id).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        // One more connect for the second source, none for repeats
        assert_eq!(registry.ledgers().await.len(), 2);
        assert_eq!(registry.ledgers().await.len(), 2);
    }

    #[tokio::test]
    async fn test_failed_connect_is_skipped_and_retried() {
        let mut connector = MockConnector::new();
        connector
            .expect_connect()
            .withf(|source| source.host == "10.0.0.1")
            .returning(|_| Ok(Arc::new(NullLedger) as Arc<dyn RemoteLedger>));
        connector
            .expect_connect()
            .withf(|source| source.host == "10.0.0.2")
            .times(2)
            .returning(|source| Err(SyncError::remote(SourceId::from(source), "refused")));

        let registry = SourceRegistry::new(sources(), Arc::new(connector));

        let connected = registry.ledgers().await;
        assert_eq!(connected.len(), 1);
        assert_eq!(connected[0].0, SourceId::new("10.0.0.1", "mainnet"));

        assert_eq!(registry.ledgers().await.len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let connector = MockConnector::new();
        let registry = SourceRegistry::new(sources(), Arc::new(connector));

        let result = registry.ledger(&SourceId::new("elsewhere", "mainnet")).await;
        assert!(matches!(result, Err(SyncError::UnknownSource(_))));
    }

    #[test]
    fn test_duplicate_sources_collapse() {
        let mut configured = sources();
        configured.push(RemoteSourceConfig::new("10.0.0.1", "mainnet").with_port(6543));

        let registry = SourceRegistry::new(configured, Arc::new(MockConnector::new()));
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.source_ids()[0].to_string(), "10.0.0.1:mainnet");
    }

    #[tokio::test]
    async fn test_pg_connector_is_lazy() {
        // Nothing listens here; a lazy pool must still be created
        let connector = PgConnector::new(1).with_acquire_timeout(Duration::from_millis(100));
        let source = RemoteSourceConfig::new("127.0.0.1", "absent")
            .with_port(9)
            .with_credentials("mirror", "secret");

        let ledger = connector.connect(&source).await.unwrap();
        assert!(ledger.head_block().await.is_err());
    }
}
