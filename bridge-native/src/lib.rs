//! # Native Bridge Implementations
//!
//! Tokio and reqwest backed implementations of the `bridge-traits`
//! capabilities for server deployments.

pub mod http;
pub mod pinning;

pub use http::ReqwestHttpClient;
pub use pinning::{IpfsCliPinner, PinningOptions};
