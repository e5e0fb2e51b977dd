//! HTTP Client Implementation using Reqwest

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    http::{DownloadStream, HttpClient, TimeoutBudget},
};
use futures_util::TryStreamExt;
use reqwest::dns::{Addrs, Name, Resolve, Resolving};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

const USER_AGENT: &str = concat!("mintmirror/", env!("CARGO_PKG_VERSION"));

/// Reqwest-based streaming client
///
/// Enforces the connection-level part of a [`TimeoutBudget`]:
/// - DNS lookup through [`TimedResolver`]
/// - TCP connect plus TLS handshake through `connect_timeout`
/// - socket idle through `read_timeout`
///
/// The response and total budgets are applied by the caller around the
/// returned stream.
pub struct ReqwestHttpClient {
    client: Client,
}

impl ReqwestHttpClient {
    /// Create a client honoring the given budget
    pub fn new(budget: TimeoutBudget) -> Result<Self> {
        let client = Client::builder()
            .dns_resolver(Arc::new(TimedResolver::new(budget.lookup())))
            .connect_timeout(budget.connect_with_tls())
            .read_timeout(budget.idle())
            .timeout(budget.total())
            .pool_max_idle_per_host(10)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| BridgeError::OperationFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// Wrap an already configured client
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    fn map_error(url: &str, error: reqwest::Error) -> BridgeError {
        if error.is_timeout() {
            BridgeError::Timeout(format!("request to {}", url))
        } else if error.is_connect() {
            BridgeError::OperationFailed(format!("Connection to {} failed: {}", url, error))
        } else {
            BridgeError::OperationFailed(error.to_string())
        }
    }
}

#[async_trait]
impl HttpClient for ReqwestHttpClient {
    async fn download_stream(&self, url: &str) -> Result<DownloadStream> {
        debug!(url = %url, "Opening download stream");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::map_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(BridgeError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        let reader = tokio_util::io::StreamReader::new(stream);

        Ok(Box::new(reader))
    }
}

/// DNS resolver that gives up after a fixed budget.
///
/// Uses the system resolver through `tokio::net::lookup_host`.
#[derive(Debug, Clone)]
pub struct TimedResolver {
    budget: Duration,
}

impl TimedResolver {
    pub fn new(budget: Duration) -> Self {
        Self { budget }
    }
}

impl Resolve for TimedResolver {
    fn resolve(&self, name: Name) -> Resolving {
        let budget = self.budget;
        Box::pin(async move {
            let host = name.as_str().to_string();
            let lookup = tokio::net::lookup_host((host.clone(), 0));
            match tokio::time::timeout(budget, lookup).await {
                Ok(Ok(addrs)) => {
                    let addrs: Addrs = Box::new(addrs.collect::<Vec<_>>().into_iter());
                    Ok(addrs)
                }
                Ok(Err(e)) => Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>),
                Err(_) => Err(Box::new(BridgeError::Timeout(format!("DNS lookup of {}", host)))
                    as Box<dyn std::error::Error + Send + Sync>),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = ReqwestHttpClient::new(TimeoutBudget::default());
        assert!(client.is_ok());
    }

    #[tokio::test]
    async fn test_unreachable_host_is_reported() {
        let budget = TimeoutBudget {
            connect_ms: 200,
            tls_ms: 0,
            ..TimeoutBudget::default()
        };
        let client = ReqwestHttpClient::new(budget).unwrap();
        let result = client.download_stream("http://127.0.0.1:9/image.png").await;
        assert!(result.is_err());
    }
}
