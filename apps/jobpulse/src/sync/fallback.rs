use std::sync::Arc;
use std::time::Duration;

use super::channel::SyncShared;
use crate::notify::Notice;
use crate::session::AccountBackend;

pub const FALLBACK_FAILED_NOTICE: &str = "Failed to fetch emails. Please try again later.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackOutcome {
    /// The channel was connected when the timer fired.
    Skipped,
    /// Snapshot fetched and applied; carries the record count.
    Fetched(usize),
    /// Fetched, but the sync was torn down before it could be applied.
    Discarded,
    Failed,
}

/// One deferred snapshot fetch, armed when the channel starts connecting.
pub(crate) struct FallbackPoller {
    delay: Duration,
    backend: Arc<dyn AccountBackend>,
    token: String,
}

impl FallbackPoller {
    pub(crate) fn new(delay: Duration, backend: Arc<dyn AccountBackend>, token: String) -> Self {
        Self {
            delay,
            backend,
            token,
        }
    }

    pub(crate) async fn run(self, shared: Arc<SyncShared>) -> FallbackOutcome {
        tokio::time::sleep(self.delay).await;

        let outcome = self.fire(&shared).await;
        shared.record_fallback(outcome);
        outcome
    }

    async fn fire(&self, shared: &SyncShared) -> FallbackOutcome {
        if shared.is_closed() {
            return FallbackOutcome::Discarded;
        }
        if shared.channel_state().is_connected() {
            return FallbackOutcome::Skipped;
        }

        tracing::info!(
            target: "jobpulse::sync",
            delay_ms = self.delay.as_millis() as u64,
            "realtime channel not connected; fetching snapshot"
        );
        match self.backend.fetch_emails(&self.token, false).await {
            Ok(emails) => {
                let count = emails.len();
                if shared.replace_snapshot(emails) {
                    FallbackOutcome::Fetched(count)
                } else {
                    FallbackOutcome::Discarded
                }
            }
            Err(err) => {
                tracing::warn!(target: "jobpulse::sync", error = %err, "fallback fetch failed");
                if !shared.is_closed() {
                    shared.notify(Notice::error(FALLBACK_FAILED_NOTICE));
                }
                FallbackOutcome::Failed
            }
        }
    }
}
