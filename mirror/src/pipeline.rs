use mirror_config::shared::PipelineConfig;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::anonymizer::Anonymizer;
use crate::checkpoint::CheckpointStore;
use crate::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use crate::error::MirrorResult;
use crate::sink::Sink;
use crate::source::Source;
use crate::types::PipelineId;
use crate::workers::feed::{FeedWorker, FeedWorkerHandle};
use crate::workers::flush::{FlushWorker, FlushWorkerHandle};

#[derive(Debug)]
enum PipelineState {
    NotStarted,
    Started {
        feed_worker: FeedWorkerHandle,
        flush_worker: FlushWorkerHandle,
    },
}

/// Continuous mirror from a [`Source`] insert feed into a [`Sink`].
///
/// A started pipeline resumes the feed right after the token found in its [`CheckpointStore`],
/// or at the feed tail when there is none, and flushes anonymized records until it is shut down
/// or fails.
#[derive(Debug)]
pub struct Pipeline<S, K, C> {
    config: Arc<PipelineConfig>,
    source: S,
    sink: K,
    checkpoint_store: C,
    state: PipelineState,
    shutdown_tx: ShutdownTx,
}

impl<S, K, C> Pipeline<S, K, C>
where
    S: Source + Clone + Send + Sync + 'static,
    K: Sink + Clone + Send + Sync + 'static,
    C: CheckpointStore + Clone + Send + Sync + 'static,
{
    pub fn new(config: PipelineConfig, source: S, sink: K, checkpoint_store: C) -> Self {
        // The receiver is dropped on purpose, workers get theirs through `subscribe`.
        let (shutdown_tx, _) = create_shutdown_channel();

        Self {
            config: Arc::new(config),
            source,
            sink,
            checkpoint_store,
            state: PipelineState::NotStarted,
            shutdown_tx,
        }
    }

    pub fn id(&self) -> PipelineId {
        self.config.id
    }

    pub fn shutdown_tx(&self) -> ShutdownTx {
        self.shutdown_tx.clone()
    }

    /// Loads the checkpoint and starts the flush and feed workers.
    pub async fn start(&mut self) -> MirrorResult<()> {
        info!(
            pipeline_id = self.id(),
            source = S::name(),
            sink = K::name(),
            "starting pipeline"
        );

        let resume_token = self.checkpoint_store.load().await?;
        match &resume_token {
            Some(token) => info!(token = %token, "resuming feed after checkpoint"),
            None => info!("no checkpoint found, following the feed from its tail"),
        }

        let (items_tx, items_rx) = mpsc::unbounded_channel();

        // The flush worker starts first, so that it is ready as soon as events flow.
        let flush_worker = FlushWorker::new(
            self.id(),
            self.config.clone(),
            self.sink.clone(),
            self.checkpoint_store.clone(),
            items_rx,
        )
        .start();

        let feed_worker = FeedWorker::new(
            self.id(),
            self.source.clone(),
            Anonymizer::new(&self.config.anonymization),
            items_tx,
            self.shutdown_tx.subscribe(),
        );
        let feed_worker = match feed_worker.start(resume_token).await {
            Ok(feed_worker) => feed_worker,
            Err(err) => {
                error!(error = %err, "failed to start feed worker, stopping the pipeline");
                self.release_after_failed_start(flush_worker).await;

                return Err(err);
            }
        };

        self.state = PipelineState::Started {
            feed_worker,
            flush_worker,
        };

        Ok(())
    }

    /// Stops the already running flush worker and releases the source and the sink.
    ///
    /// The start error is the one returned, so the failures met here are only logged.
    async fn release_after_failed_start(&self, flush_worker: FlushWorkerHandle) {
        // The channel sender was dropped with the feed worker, so the flush worker exits.
        if let Err(err) = flush_worker.wait().await {
            error!(error = %err, "flush worker failed after an aborted start");
        }
        if let Err(err) = self.source.shutdown().await {
            error!(error = %err, "failed to shut down the source after an aborted start");
        }
        if let Err(err) = self.sink.shutdown().await {
            error!(error = %err, "failed to shut down the sink after an aborted start");
        }
    }

    /// Waits for the pipeline to stop, then releases the source and the sink.
    ///
    /// The flush worker stops after the feed worker did and every pending record was flushed,
    /// so resources are never released in the middle of a flush.
    pub async fn wait(self) -> MirrorResult<()> {
        let PipelineState::Started {
            feed_worker,
            flush_worker,
        } = self.state
        else {
            info!("pipeline was not started, nothing to wait for");

            return Ok(());
        };

        let mut errors = vec![];

        info!("waiting for flush worker to complete");

        if let Err(err) = flush_worker.wait().await {
            errors.push(err);

            // Without a flush worker the feed has nowhere to go.
            feed_worker.stop();

            info!("flush worker completed with an error, stopping feed worker");
        }

        info!("waiting for feed worker to complete");

        if let Err(err) = feed_worker.wait().await {
            errors.push(err);
        }

        if let Err(err) = self.source.shutdown().await {
            errors.push(err);
        }
        if let Err(err) = self.sink.shutdown().await {
            errors.push(err);
        }

        if !errors.is_empty() {
            return Err(errors.into());
        }

        info!("pipeline completed");

        Ok(())
    }

    /// Signals the pipeline to stop taking new events.
    pub fn shutdown(&self) {
        info!("trying to shut down the pipeline");

        if let Err(err) = self.shutdown_tx.shutdown() {
            error!("failed to send shutdown signal to the pipeline: {}", err);
            return;
        }

        info!("shut down signal successfully sent to all workers");
    }

    pub async fn shutdown_and_wait(self) -> MirrorResult<()> {
        self.shutdown();
        self.wait().await
    }
}

