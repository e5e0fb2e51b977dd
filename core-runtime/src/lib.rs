//! # Core Runtime Module
//!
//! Process-level infrastructure shared by every mirror component:
//! - [`config`]: the validated [`MirrorConfig`](config::MirrorConfig) built once at startup
//! - [`logging`]: `tracing` subscriber setup
//!
//! ## Overview
//!
//! The binary constructs a `MirrorConfig`, initializes logging from it and
//! hands the config by reference to each component constructor.

pub mod config;
pub mod error;
pub mod logging;

pub use config::{MirrorConfig, MirrorConfigBuilder, PinningConfig, RemoteSourceConfig};
pub use error::{Error, Result};
pub use logging::{init_logging, LogFormat, LoggingConfig};
