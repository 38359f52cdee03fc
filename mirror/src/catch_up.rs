//! One-shot reconciliation of the sink with the whole source.
//!
//! The sync scans every source record in creation order, anonymizes it and upserts it into the
//! sink in small groups. Since identities and pseudonyms are deterministic, running it again
//! after a partial failure converges to the same sink content. Sink records without a source
//! counterpart are left in place.

use futures::StreamExt;
use metrics::counter;
use mirror_config::shared::PipelineConfig;
use std::sync::Arc;
use tracing::{Instrument, error, info};

use crate::anonymizer::Anonymizer;
use crate::concurrency::shutdown::ShutdownRx;
use crate::error::{ErrorKind, MirrorError, MirrorResult};
#[cfg(feature = "failpoints")]
use crate::failpoints::{CATCH_UP__BEFORE_UPSERT, mirror_fail_point};
use crate::metrics::{MIRROR_RECORDS_UPSERTED_TOTAL, SINK_LABEL};
use crate::mirror_error;
use crate::sink::Sink;
use crate::source::Source;

/// Progress of a catch-up sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchUpReport {
    /// Records read from the source.
    pub scanned: u64,
    /// Records written to the sink.
    pub upserted: u64,
    /// Whether the sync stopped early because shutdown was requested.
    pub interrupted: bool,
}

/// Catch-up sync of a [`Source`] into a [`Sink`].
#[derive(Debug)]
pub struct CatchUpSync<S, K> {
    config: Arc<PipelineConfig>,
    source: S,
    sink: K,
    shutdown_rx: ShutdownRx,
}

impl<S, K> CatchUpSync<S, K>
where
    S: Source + Send + Sync,
    K: Sink + Send + Sync,
{
    pub fn new(config: PipelineConfig, source: S, sink: K, shutdown_rx: ShutdownRx) -> Self {
        Self {
            config: Arc::new(config),
            source,
            sink,
            shutdown_rx,
        }
    }

    /// Runs the sync to completion, or until shutdown is requested between two groups.
    ///
    /// On failure the error detail reports how far the sync got. Re-running from the start is
    /// always safe.
    pub async fn run(self) -> MirrorResult<CatchUpReport> {
        let catch_up_span = tracing::info_span!("catch_up", pipeline_id = self.config.id);

        async move {
            info!(
                source = S::name(),
                sink = K::name(),
                group_size = self.config.catch_up.group_size,
                "starting catch-up sync"
            );

            let mut report = CatchUpReport::default();
            let result = self.sync(&mut report).await;

            let release_results = [self.source.shutdown().await, self.sink.shutdown().await];

            if let Err(err) = result {
                error!(
                    error = %err,
                    scanned = report.scanned,
                    upserted = report.upserted,
                    "catch-up sync failed, it is safe to run it again"
                );

                return Err(failed(err, &report));
            }

            for release_result in release_results {
                release_result?;
            }

            info!(
                scanned = report.scanned,
                upserted = report.upserted,
                interrupted = report.interrupted,
                "catch-up sync completed"
            );

            Ok(report)
        }
        .instrument(catch_up_span)
        .await
    }

    async fn sync(&self, report: &mut CatchUpReport) -> MirrorResult<()> {
        let anonymizer = Anonymizer::new(&self.config.anonymization);
        let mut groups = self
            .source
            .scan()
            .await?
            .chunks(self.config.catch_up.group_size);

        while let Some(group) = groups.next().await {
            if self.shutdown_rx.is_requested() {
                info!("catch-up sync received shutdown signal");
                report.interrupted = true;

                return Ok(());
            }

            let mut records = Vec::with_capacity(group.len());
            for record in group {
                records.push(anonymizer.anonymize(&record?));
                report.scanned += 1;
            }

            #[cfg(feature = "failpoints")]
            mirror_fail_point(CATCH_UP__BEFORE_UPSERT)?;

            let upserted = self.sink.upsert(records).await?;
            report.upserted += upserted as u64;
            counter!(MIRROR_RECORDS_UPSERTED_TOTAL, SINK_LABEL => K::name())
                .increment(upserted as u64);

            info!(
                scanned = report.scanned,
                upserted = report.upserted,
                "upserted catch-up group"
            );
        }

        Ok(())
    }
}

fn failed(err: MirrorError, report: &CatchUpReport) -> MirrorError {
    let detail = format!(
        "{} records scanned and {} upserted before failing: {err}",
        report.scanned, report.upserted
    );
    mirror_error!(
        ErrorKind::CatchUpFailed,
        "Catch-up sync failed",
        detail,
        source: err
    )
}
