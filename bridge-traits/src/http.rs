//! HTTP Download Abstraction
//!
//! Media acquisition only ever needs one operation: open a streaming GET and
//! read the body incrementally. Connection-level budgets (DNS lookup, TCP
//! connect, TLS handshake) are the implementation's responsibility; the
//! caller enforces the response, idle and total budgets around the stream.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::Result;

/// Boxed byte stream returned by [`HttpClient::download_stream`].
pub type DownloadStream = Box<dyn tokio::io::AsyncRead + Send + Unpin>;

/// Per-phase time limits for a single download.
///
/// Each phase has its own budget so that a peer which stalls in one phase
/// cannot hold a worker for the sum of all of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutBudget {
    /// DNS resolution
    pub lookup_ms: u64,
    /// TCP connect
    pub connect_ms: u64,
    /// TLS handshake, added on top of connect
    pub tls_ms: u64,
    /// Maximum silence between two reads of the body
    pub idle_ms: u64,
    /// Time until response headers arrive
    pub response_ms: u64,
    /// Hard cap on the whole download
    pub total_ms: u64,
}

impl Default for TimeoutBudget {
    fn default() -> Self {
        Self {
            lookup_ms: 1_000,
            connect_ms: 5_000,
            tls_ms: 5_000,
            idle_ms: 5_000,
            response_ms: 10_000,
            total_ms: 30_000,
        }
    }
}

impl TimeoutBudget {
    pub fn lookup(&self) -> Duration {
        Duration::from_millis(self.lookup_ms)
    }

    /// Connect budget including the TLS handshake.
    pub fn connect_with_tls(&self) -> Duration {
        Duration::from_millis(self.connect_ms.saturating_add(self.tls_ms))
    }

    pub fn idle(&self) -> Duration {
        Duration::from_millis(self.idle_ms)
    }

    pub fn response(&self) -> Duration {
        Duration::from_millis(self.response_ms)
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.total_ms)
    }
}

/// Streaming HTTP client used by the media pipeline.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::http::HttpClient;
/// use tokio::io::AsyncReadExt;
///
/// async fn fetch(client: &dyn HttpClient, url: &str) -> bridge_traits::error::Result<Vec<u8>> {
///     let mut stream = client.download_stream(url).await?;
///     let mut body = Vec::new();
///     stream.read_to_end(&mut body).await?;
///     Ok(body)
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync {
    /// Issue a GET request and return the body as a stream once the response
    /// headers have arrived with a success status.
    ///
    /// Non-success statuses are reported as
    /// [`BridgeError::HttpStatus`](crate::error::BridgeError::HttpStatus).
    async fn download_stream(&self, url: &str) -> Result<DownloadStream>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_budget_matches_phase_limits() {
        let budget = TimeoutBudget::default();
        assert_eq!(budget.lookup(), Duration::from_secs(1));
        assert_eq!(budget.connect_with_tls(), Duration::from_secs(10));
        assert_eq!(budget.idle(), Duration::from_secs(5));
        assert_eq!(budget.response(), Duration::from_secs(10));
        assert_eq!(budget.total(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_budget_deserializes_with_defaults() {
        let budget: TimeoutBudget = serde_json::from_str(r#"{"total_ms": 2000}"#).unwrap();
        assert_eq!(budget.total_ms, 2_000);
        assert_eq!(budget.lookup_ms, 1_000);
    }
}
