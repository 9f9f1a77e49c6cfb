use std::collections::HashMap;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Groups in-flight and queued calls by a caller-chosen tag so they can be
/// cancelled together. Cancelling a tag fires every token handed out for it,
/// including calls that have not been dispatched yet; other tags are
/// untouched. Cancellation is fire-and-forget and never blocks.
#[derive(Default)]
pub struct CancelRegistry {
    tags: Mutex<HashMap<String, CancellationToken>>,
}

impl CancelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a child token for the tag. Every call registered under the
    /// same tag shares the parent, so one `cancel` reaches all of them.
    pub fn token(&self, tag: &str) -> CancellationToken {
        self.tags
            .lock()
            .entry(tag.to_string())
            .or_insert_with(CancellationToken::new)
            .child_token()
    }

    /// Cancels every call registered under `tag`. Tokens handed out for the
    /// tag after this call belong to a fresh parent.
    pub fn cancel(&self, tag: &str) {
        if let Some(token) = self.tags.lock().remove(tag) {
            debug!(tag, "cancelling tagged calls");
            token.cancel();
        }
    }

    /// Cancels every call registered under any tag.
    pub fn cancel_all(&self) {
        let tokens: Vec<_> = self.tags.lock().drain().collect();
        for (tag, token) in tokens {
            debug!(tag, "cancelling tagged calls");
            token.cancel();
        }
    }
}
