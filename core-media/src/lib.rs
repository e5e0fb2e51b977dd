//! # Core Media
//!
//! Everything between a token's metadata and its published renditions.
//!
//! - [`gateway`]: picks an image reference from untrusted metadata and
//!   rewrites it onto the configured gateway
//! - [`content_id`]: finds the content identifier inside a media URL, for
//!   pinning
//! - [`pipeline`]: budgeted download, rendering and atomic publish
//! - [`rendition`]: decoding and WebP encoding on the blocking pool

pub mod content_id;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod rendition;

pub use content_id::extract_content_id;
pub use error::{MediaError, Result, TimeoutPhase};
pub use gateway::{GatewayResolver, ResolveError};
pub use pipeline::{Acquired, MediaConfig, MediaPipeline};
pub use rendition::{Rendition, RENDITION_WIDTHS};
