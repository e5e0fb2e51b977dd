//! # Core Store
//!
//! The local mirror of remote token records.
//!
//! ## Overview
//!
//! - [`db`]: SQLite pool creation and migrations
//! - [`models`]: [`TokenRecord`], [`TokenKey`] and the closed [`TokenKind`]
//!   enum carrying per-kind table names
//! - [`backoff`]: the tiered retry policy used to pick due work
//! - [`repositories`]: the [`TokenRepository`] trait and its SQLite
//!   implementation

pub mod backoff;
pub mod db;
pub mod error;
pub mod models;
pub mod repositories;

pub use backoff::{BackoffPolicy, BackoffTier};
pub use error::{Result, StoreError};
pub use models::{KindLayout, ObservedToken, TokenKey, TokenKind, TokenRecord};
pub use repositories::{SqliteTokenRepository, TokenRepository};
