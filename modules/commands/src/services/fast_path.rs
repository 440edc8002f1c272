//! After-commit fast path
//!
//! The transactional outbox makes every dispatch durable before it is
//! visible; the fast path only lowers the publish latency from "sweep
//! interval" to "network round trip". A `PostCommitQueue` is the explicit
//! post-commit seam: rows are armed while the transaction is open, and
//! `fire` runs only after the caller has committed. Rolling back means
//! dropping the queue unfired — the rows never became visible, so there is
//! nothing to publish.

use std::sync::Arc;
use uuid::Uuid;

use super::relay::Relay;

/// Outbox ids to publish immediately after one transaction commits
pub struct PostCommitQueue {
    relay: Arc<Relay>,
    armed: Vec<Uuid>,
}

impl PostCommitQueue {
    pub(crate) fn new(relay: Arc<Relay>) -> Self {
        Self {
            relay,
            armed: Vec::new(),
        }
    }

    /// Arm a row inserted in the current transaction
    pub fn arm(&mut self, outbox_id: Uuid) {
        self.armed.push(outbox_id);
    }

    /// Spawn a best-effort publish per armed row. Call strictly after the
    /// transaction committed. Failures are swallowed here — the work is
    /// already durable in the outbox and the sweep is the backstop.
    pub fn fire(self) {
        for outbox_id in self.armed {
            let relay = self.relay.clone();
            tokio::spawn(async move {
                if let Err(e) = relay.publish_now(outbox_id).await {
                    tracing::warn!(
                        outbox_id = %outbox_id,
                        error = %e,
                        "fast-path publish failed, sweep will pick the row up"
                    );
                }
            });
        }
    }
}
