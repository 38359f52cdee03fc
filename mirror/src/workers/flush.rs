use metrics::{counter, gauge, histogram};
use mirror_config::shared::PipelineConfig;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{Instrument, error, info, warn};

use crate::checkpoint::CheckpointStore;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{FLUSH__AFTER_SINK_WRITE, mirror_fail_point};
use crate::metrics::{
    MIRROR_CHECKPOINT_ADVANCES_TOTAL, MIRROR_DUPLICATES_TOLERATED_TOTAL,
    MIRROR_FLUSH_DURATION_SECONDS, MIRROR_FLUSH_FAILURES_TOTAL, MIRROR_PENDING_ITEMS,
    MIRROR_RECORDS_FLUSHED_TOTAL, SINK_LABEL,
};
use crate::mirror_error;
use crate::sink::{InsertOutcome, Sink};
use crate::types::{PendingItem, PipelineId, ResumeToken};
use crate::workers::join_error;

/// Handle of a running [`FlushWorker`].
#[derive(Debug)]
pub struct FlushWorkerHandle {
    handle: Option<JoinHandle<MirrorResult<()>>>,
}

impl FlushWorkerHandle {
    /// Waits for the worker to finish.
    ///
    /// The worker finishes once the feed side of its channel is closed and every pending record
    /// was flushed, or as soon as it gives up after the configured number of consecutive failed flushes.
    pub async fn wait(mut self) -> MirrorResult<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        handle
            .await
            .map_err(|err| join_error(err, ErrorKind::FlushWorkerPanic, "flush worker"))??;

        Ok(())
    }
}

/// State of the flush cycles, owned by the worker.
#[derive(Debug, Default)]
struct FlushState {
    /// Records waiting to be flushed, oldest first.
    queue: VecDeque<PendingItem>,
    consecutive_failures: u32,
    /// Token saved by the last successful flush.
    last_token: Option<ResumeToken>,
    flushes: u64,
    flushed_records: u64,
    tolerated_duplicates: u64,
}

/// Worker that writes pending records to the sink on a fixed interval.
///
/// Each tick takes up to `batch.max_size` of the oldest pending records, inserts them into the
/// sink and then saves the token of the last of them. A flush runs inside the worker loop, so
/// only one flush is ever in flight and ticks elapsing during a flush are skipped.
///
/// A failed flush puts its records back at the front of the queue, so the next tick retries the
/// same batch and checkpoints never skip a position. Failed flushes are retried for as long as
/// they keep failing, unless `max_flush_retries` bounds the number of consecutive failures.
#[derive(Debug)]
pub struct FlushWorker<K, C> {
    pipeline_id: PipelineId,
    config: Arc<PipelineConfig>,
    sink: K,
    checkpoint_store: C,
    items_rx: mpsc::UnboundedReceiver<PendingItem>,
}

impl<K, C> FlushWorker<K, C>
where
    K: Sink + Send + Sync + 'static,
    C: CheckpointStore + Send + Sync + 'static,
{
    pub fn new(
        pipeline_id: PipelineId,
        config: Arc<PipelineConfig>,
        sink: K,
        checkpoint_store: C,
        items_rx: mpsc::UnboundedReceiver<PendingItem>,
    ) -> Self {
        Self {
            pipeline_id,
            config,
            sink,
            checkpoint_store,
            items_rx,
        }
    }

    /// Spawns the worker.
    pub fn start(self) -> FlushWorkerHandle {
        info!(
            sink = K::name(),
            max_size = self.config.batch.max_size,
            interval_ms = self.config.batch.interval_ms,
            "starting flush worker"
        );

        let flush_worker_span =
            tracing::info_span!("flush_worker", pipeline_id = self.pipeline_id);
        let handle = tokio::spawn(self.run().instrument(flush_worker_span.or_current()));

        FlushWorkerHandle {
            handle: Some(handle),
        }
    }

    async fn run(mut self) -> MirrorResult<()> {
        let period = Duration::from_millis(self.config.batch.interval_ms);
        let mut interval = interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut state = FlushState::default();

        loop {
            tokio::select! {
                biased;

                _ = interval.tick() => {
                    self.flush_cycle(&mut state).await?;
                }

                item = self.items_rx.recv() => {
                    let Some(item) = item else {
                        break;
                    };

                    state.queue.push_back(item);
                    gauge!(MIRROR_PENDING_ITEMS).set(state.queue.len() as f64);
                }
            }
        }

        info!(
            pending = state.queue.len(),
            "feed closed, draining pending records"
        );

        while !state.queue.is_empty() {
            let failures = state.consecutive_failures;
            self.flush_cycle(&mut state).await?;

            if state.consecutive_failures > failures {
                warn!(
                    pending = state.queue.len(),
                    "flush failed while draining, pending records will be replayed from the checkpoint after a restart"
                );
                break;
            }
        }

        info!(
            flushes = state.flushes,
            records = state.flushed_records,
            duplicates = state.tolerated_duplicates,
            last_token = state.last_token.as_ref().map(ResumeToken::as_str),
            "flush worker completed"
        );

        Ok(())
    }

    /// Runs one flush of the oldest pending records, if any.
    ///
    /// Fails only when the flush failed and a configured retry bound is exhausted.
    async fn flush_cycle(&self, state: &mut FlushState) -> MirrorResult<()> {
        if state.queue.is_empty() {
            return Ok(());
        }

        let size = state.queue.len().min(self.config.batch.max_size);
        let batch: Vec<PendingItem> = state.queue.drain(..size).collect();

        let started_at = std::time::Instant::now();
        match self.flush(&batch).await {
            Ok(outcome) => {
                state.consecutive_failures = 0;
                state.flushes += 1;
                state.flushed_records += outcome.inserted as u64;
                state.tolerated_duplicates += outcome.duplicates.len() as u64;
                state.last_token = batch.last().map(|item| item.token.clone());

                histogram!(MIRROR_FLUSH_DURATION_SECONDS, SINK_LABEL => K::name())
                    .record(started_at.elapsed().as_secs_f64());
            }
            Err(err) => {
                state.consecutive_failures += 1;
                counter!(MIRROR_FLUSH_FAILURES_TOTAL, SINK_LABEL => K::name()).increment(1);

                // The batch goes back in front, in its original order.
                for item in batch.into_iter().rev() {
                    state.queue.push_front(item);
                }

                if let Some(max_failures) = self.config.max_flush_retries
                    && state.consecutive_failures >= max_failures
                {
                    error!(
                        error = %err,
                        failures = state.consecutive_failures,
                        pending = state.queue.len(),
                        "flush failed too many times in a row, aborting"
                    );

                    return Err(retries_exhausted(err, state.consecutive_failures));
                }

                error!(
                    error = %err,
                    failures = state.consecutive_failures,
                    pending = state.queue.len(),
                    "flush failed, the batch will be retried on the next tick"
                );
            }
        }

        gauge!(MIRROR_PENDING_ITEMS).set(state.queue.len() as f64);

        Ok(())
    }

    /// Writes `batch` to the sink, then saves the token of its last record.
    async fn flush(&self, batch: &[PendingItem]) -> MirrorResult<InsertOutcome> {
        let Some(last) = batch.last() else {
            return Ok(InsertOutcome::default());
        };

        let records = batch.iter().map(|item| item.record.clone()).collect();
        let outcome = self.sink.insert_many(records).await?;

        counter!(MIRROR_RECORDS_FLUSHED_TOTAL, SINK_LABEL => K::name())
            .increment(outcome.inserted as u64);

        if !outcome.duplicates.is_empty() {
            counter!(MIRROR_DUPLICATES_TOLERATED_TOTAL, SINK_LABEL => K::name())
                .increment(outcome.duplicates.len() as u64);

            warn!(
                duplicates = outcome.duplicates.len(),
                first_duplicate = %outcome.duplicates[0],
                "records were already in the sink, skipping them"
            );
        }

        #[cfg(feature = "failpoints")]
        mirror_fail_point(FLUSH__AFTER_SINK_WRITE)?;

        self.checkpoint_store.save(&last.token).await?;
        counter!(MIRROR_CHECKPOINT_ADVANCES_TOTAL).increment(1);

        info!(
            records = batch.len(),
            inserted = outcome.inserted,
            duplicates = outcome.duplicates.len(),
            token = %last.token,
            "checkpoint advanced"
        );

        Ok(outcome)
    }
}

fn retries_exhausted(err: MirrorError, failures: u32) -> MirrorError {
    let detail = format!("{failures} consecutive flushes failed, last error: {err}");
    mirror_error!(
        err.kind(),
        "Flush failed too many times in a row",
        detail,
        source: err
    )
}
