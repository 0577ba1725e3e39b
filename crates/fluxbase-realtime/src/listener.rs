//! The change-feed worker: one task that owns the feed connection,
//! batches events per commit, and hands them to the registry.
//!
//! Reconnection uses exponential backoff from 100 ms up to 10 s. A
//! source that supports rewind resumes from the last acknowledged LSN;
//! when rewind is impossible (NOTIFY) or fails, a single resync signal
//! cancels all table subscriptions so clients know to re-sync and
//! re-subscribe.

use crate::feed::ChangeFeedSource;
use crate::registry::SubscriptionRegistry;
use fluxbase_core::change::{ChangeEvent, Lsn};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// How long a partially filled commit batch may wait for more events
/// before being dispatched anyway.
const BATCH_LINGER: Duration = Duration::from_millis(25);

pub struct FeedWorker {
    source: Arc<dyn ChangeFeedSource>,
    registry: Arc<SubscriptionRegistry>,
    shutdown: watch::Receiver<bool>,
}

impl FeedWorker {
    pub fn new(
        source: Arc<dyn ChangeFeedSource>,
        registry: Arc<SubscriptionRegistry>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        FeedWorker {
            source,
            registry,
            shutdown,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut backoff = BACKOFF_INITIAL;
        let mut last_acked: Option<Lsn> = None;
        let mut had_stream = false;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.source.connect(last_acked).await {
                Ok(mut stream) => {
                    // Reconnecting over a source that cannot replay means
                    // events may have been lost in the gap.
                    if had_stream && !self.source.supports_rewind() {
                        self.registry
                            .fail_table_subscriptions("change feed resynchronized")
                            .await;
                    }
                    had_stream = true;
                    backoff = BACKOFF_INITIAL;

                    if let Some(acked) = self
                        .pump(&mut *stream, last_acked)
                        .await
                    {
                        last_acked = Some(acked);
                    }
                    if *self.shutdown.borrow() {
                        return;
                    }
                    tracing::warn!("change feed stream ended; reconnecting");
                }
                Err(e) => {
                    tracing::warn!(error = %e, backoff_ms = backoff.as_millis() as u64,
                        "change feed connect failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.changed() => return,
            }
            backoff = (backoff * 2).min(BACKOFF_CAP);
        }
    }

    /// Read the stream until it errors, dispatching commit batches.
    /// Returns the last acknowledged LSN, if any events arrived.
    async fn pump(
        &mut self,
        stream: &mut dyn crate::feed::FeedStream,
        mut last_acked: Option<Lsn>,
    ) -> Option<Lsn> {
        let mut batch: Vec<ChangeEvent> = Vec::new();
        let mut last_dedup: Option<String> = None;

        loop {
            let next = tokio::select! {
                event = stream.next() => event,
                _ = tokio::time::sleep(BATCH_LINGER), if !batch.is_empty() => {
                    last_acked = self.flush(&mut batch, last_acked).await;
                    continue;
                }
                _ = self.shutdown.changed() => {
                    self.flush(&mut batch, last_acked).await;
                    return last_acked;
                }
            };

            let event = match next {
                Ok(event) => event,
                Err(e) => {
                    tracing::warn!(error = %e, "change feed read failed");
                    last_acked = self.flush(&mut batch, last_acked).await;
                    return last_acked;
                }
            };

            // Consecutive duplicates (replayed notifications) are
            // suppressed.
            let dedup = format!("{:?}", event.dedup_key());
            if last_dedup.as_deref() == Some(dedup.as_str()) {
                continue;
            }
            last_dedup = Some(dedup);

            // A new commit LSN closes the previous batch.
            if batch
                .last()
                .is_some_and(|prev| prev.commit_lsn != event.commit_lsn)
            {
                last_acked = self.flush(&mut batch, last_acked).await;
            }
            batch.push(event);
        }
    }

    async fn flush(&self, batch: &mut Vec<ChangeEvent>, last_acked: Option<Lsn>) -> Option<Lsn> {
        if batch.is_empty() {
            return last_acked;
        }
        let events = std::mem::take(batch);
        let acked = events.last().map(|e| e.commit_lsn);
        self.registry.dispatch_commit(&events).await;
        acked.or(last_acked)
    }
}
