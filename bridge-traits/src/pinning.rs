//! Content Pinning Side Channel
//!
//! Newly mirrored tokens can have their content identifiers pinned on a local
//! content-addressed node. The core hands identifiers over and moves on: it
//! never awaits the outcome, and failures are reported by the implementation
//! through its own logging.

/// Fire-and-forget pinning capability.
///
/// `submit` must not block. Implementations typically enqueue the identifier
/// for a background worker and drop it (with a log line) when saturated.
pub trait ContentPinner: Send + Sync {
    fn submit(&self, content_id: &str);
}

/// Pinner used when local pinning is disabled.
#[derive(Debug, Clone, Default)]
pub struct NoopPinner;

impl ContentPinner for NoopPinner {
    fn submit(&self, _content_id: &str) {}
}
