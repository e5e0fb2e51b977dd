//! # Repository Pattern Implementation
//!
//! - Traits define the data access interface
//! - SQLite implementations use sqlx for async access
//!
//! ## Available Repositories
//!
//! - `TokenRepository` - Mirrored tokens and their acquisition state

pub mod token;

pub use token::{SqliteTokenRepository, TokenRepository};
