//! # Host Bridge Traits
//!
//! Capability traits that the mirror core depends on but does not implement
//! itself.
//!
//! ## Traits
//!
//! - [`HttpClient`](http::HttpClient) - Streaming downloads under a [`TimeoutBudget`](http::TimeoutBudget)
//! - [`ContentPinner`](pinning::ContentPinner) - Fire-and-forget content pinning
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//!
//! Native implementations live in `bridge-native`.
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Implementations
//! convert client-specific errors into it and include the URL or resource
//! involved in the message.
//!
//! ## Thread Safety
//!
//! Every trait requires `Send + Sync` so a single instance can be shared by
//! the whole worker pool behind an `Arc`.

pub mod error;
pub mod http;
pub mod pinning;
pub mod time;

pub use error::BridgeError;

pub use http::{DownloadStream, HttpClient, TimeoutBudget};
pub use pinning::{ContentPinner, NoopPinner};
pub use time::{Clock, LogLevel, ManualClock, SystemClock};
