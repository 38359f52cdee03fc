use futures::StreamExt;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{Instrument, error, info};

use crate::anonymizer::Anonymizer;
use crate::concurrency::shutdown::{ShutdownRx, ShutdownTx, create_shutdown_channel};
use crate::error::{ErrorKind, MirrorResult};
use crate::metrics::MIRROR_EVENTS_RECEIVED_TOTAL;
use crate::source::Source;
use crate::types::{PendingItem, PipelineId, ResumeToken};
use crate::workers::join_error;

/// Handle of a running [`FeedWorker`].
#[derive(Debug)]
pub struct FeedWorkerHandle {
    handle: Option<JoinHandle<MirrorResult<()>>>,
    stop_tx: ShutdownTx,
}

impl FeedWorkerHandle {
    /// Asks the worker to stop taking events from the feed.
    ///
    /// Events already handed to the flush worker are unaffected. Calling this more than once,
    /// or after the worker finished, has no effect.
    pub fn stop(&self) {
        let _ = self.stop_tx.shutdown();
    }

    /// Waits for the worker to finish.
    ///
    /// Returns the feed error that stopped the worker, if any.
    pub async fn wait(mut self) -> MirrorResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .await
            .map_err(|err| join_error(err, ErrorKind::FeedWorkerPanic, "feed worker"))??;

        Ok(())
    }
}

/// Worker that follows the source insert feed.
///
/// Every event is anonymized right away and sent, together with its token, to the flush worker.
/// Sending never waits on the flush worker, so a slow sink does not slow down the consumption
/// of the feed.
#[derive(Debug)]
pub struct FeedWorker<S> {
    pipeline_id: PipelineId,
    source: S,
    anonymizer: Anonymizer,
    items_tx: mpsc::UnboundedSender<PendingItem>,
    shutdown_rx: ShutdownRx,
}

impl<S> FeedWorker<S>
where
    S: Source + Send + Sync + 'static,
{
    pub fn new(
        pipeline_id: PipelineId,
        source: S,
        anonymizer: Anonymizer,
        items_tx: mpsc::UnboundedSender<PendingItem>,
        shutdown_rx: ShutdownRx,
    ) -> Self {
        Self {
            pipeline_id,
            source,
            anonymizer,
            items_tx,
            shutdown_rx,
        }
    }

    /// Subscribes to the feed after `after`, or at its tail, and spawns the worker.
    ///
    /// The subscription is established when this returns, so every record inserted afterwards
    /// reaches the flush worker unless the worker is stopped first.
    pub async fn start(self, after: Option<ResumeToken>) -> MirrorResult<FeedWorkerHandle> {
        info!(
            source = S::name(),
            after = after.as_ref().map(ResumeToken::as_str),
            "starting feed worker"
        );

        let mut feed = self.source.subscribe(after).await?;

        let (stop_tx, mut stop_rx) = create_shutdown_channel();
        let mut shutdown_rx = self.shutdown_rx;
        let anonymizer = self.anonymizer;
        let items_tx = self.items_tx;

        let feed_worker_span = tracing::info_span!("feed_worker", pipeline_id = self.pipeline_id);
        let feed_worker = async move {
            let mut received: u64 = 0;

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown_rx.requested() => {
                        info!("feed worker received shutdown signal");
                        break;
                    }

                    _ = stop_rx.requested() => {
                        info!("feed worker was stopped");
                        break;
                    }

                    event = feed.next() => {
                        let event = match event {
                            Some(Ok(event)) => event,
                            Some(Err(err)) => {
                                error!(error = %err, received, "source feed failed");
                                return Err(err);
                            }
                            None => {
                                info!("source feed ended");
                                break;
                            }
                        };

                        received += 1;
                        counter!(MIRROR_EVENTS_RECEIVED_TOTAL).increment(1);

                        let item = PendingItem {
                            record: anonymizer.anonymize(&event.record),
                            token: event.token,
                        };

                        if items_tx.send(item).is_err() {
                            info!("flush worker stopped, feed worker is stopping too");
                            break;
                        }
                    }
                }
            }

            // Dropping the stream ends the subscription.
            drop(feed);

            info!(received, "feed worker completed");

            Ok(())
        }
        .instrument(feed_worker_span.or_current());

        let handle = tokio::spawn(feed_worker);

        Ok(FeedWorkerHandle {
            handle: Some(handle),
            stop_tx,
        })
    }
}
