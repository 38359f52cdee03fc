use mirror::catch_up::CatchUpSync;
use mirror::checkpoint::FileCheckpointStore;
use mirror::concurrency::shutdown::{ShutdownTx, create_shutdown_channel};
use mirror::generator::CustomerGenerator;
use mirror::pipeline::Pipeline;
use mirror::sink::PostgresSink;
use mirror::source::{PostgresSource, Source};
use mirror_config::shared::{
    BatchConfig, CheckpointConfig, MirrorConfig, PgConnectionConfig, PipelineConfig, SinkConfig,
    SourceConfig,
};
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cli::{GenerateArgs, Mode};
use crate::error::ReplicatorResult;

/// Runs the selected mode until it completes, fails, or is terminated by a signal.
pub async fn start_replicator_with_config(
    config: MirrorConfig,
    mode: Mode,
) -> ReplicatorResult<()> {
    log_config(&config);

    match mode {
        Mode::Continuous => run_continuous(config).await,
        Mode::CatchUp => run_catch_up(config).await,
        Mode::Generate(args) => run_generator(config, args).await,
    }
}

async fn connect_sink(config: &MirrorConfig) -> ReplicatorResult<PostgresSink> {
    let sink = PostgresSink::connect(config.sink_connection(), &config.sink).await?;
    sink.ensure_table().await?;

    Ok(sink)
}

#[tracing::instrument(skip(config), fields(pipeline_id = config.pipeline.id))]
async fn run_continuous(config: MirrorConfig) -> ReplicatorResult<()> {
    let source = PostgresSource::connect(&config.source).await?;
    let sink = connect_sink(&config).await?;
    let checkpoint_store = FileCheckpointStore::new(config.checkpoint.path.clone());

    let mut pipeline = Pipeline::new(config.pipeline, source, sink, checkpoint_store);

    // Installed before the workers start, so that running workers always have a signal handler.
    let shutdown_handle = spawn_shutdown_task(pipeline.shutdown_tx())?;

    if let Err(err) = pipeline.start().await {
        shutdown_handle.abort();
        let _ = shutdown_handle.await;

        return Err(err.into());
    }

    // Returns once the feed stopped and the pending queue was flushed, or on a fatal failure.
    let result = pipeline.wait().await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    result?;

    info!("continuous mirror stopped cleanly");

    Ok(())
}

#[tracing::instrument(skip(config), fields(pipeline_id = config.pipeline.id))]
async fn run_catch_up(config: MirrorConfig) -> ReplicatorResult<()> {
    let source = PostgresSource::connect(&config.source).await?;
    let sink = connect_sink(&config).await?;

    let (shutdown_tx, shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_shutdown_task(shutdown_tx.clone())?;

    let result = CatchUpSync::new(config.pipeline, source, sink, shutdown_rx)
        .run()
        .await;

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    let report = result?;
    if report.interrupted {
        warn!(
            scanned = report.scanned,
            upserted = report.upserted,
            "catch-up sync interrupted, run it again to complete the sink"
        );
    }

    Ok(())
}

async fn run_generator(config: MirrorConfig, args: GenerateArgs) -> ReplicatorResult<()> {
    let source = PostgresSource::connect(&config.source).await?;
    source.ensure_table().await?;

    let (shutdown_tx, mut shutdown_rx) = create_shutdown_channel();
    let shutdown_handle = spawn_shutdown_task(shutdown_tx.clone())?;

    info!(
        table = config.source.table,
        interval_ms = args.interval_ms,
        min_batch = args.min_batch,
        max_batch = args.max_batch,
        "starting load generator"
    );

    // Continues after existing records, so that the feed never misses generated ones.
    let generator = match source.last_record_id().await? {
        Some(last) => CustomerGenerator::starting_after(last),
        None => CustomerGenerator::new(),
    };
    let mut ticker = interval(Duration::from_millis(args.interval_ms));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut inserted = 0u64;
    let result = loop {
        tokio::select! {
            biased;

            _ = shutdown_rx.requested() => break Ok(()),

            _ = ticker.tick() => {
                let records = generator.generate_batch(args.min_batch..=args.max_batch);
                match source.insert_records(&records).await {
                    Ok(count) => {
                        inserted += count;
                        debug!(records = count, "inserted generated customers");
                    }
                    Err(err) => break Err(err),
                }
            }
        }
    };

    shutdown_handle.abort();
    let _ = shutdown_handle.await;

    source.shutdown().await?;
    result?;

    info!(inserted, "load generator stopped");

    Ok(())
}

/// Spawns a task requesting shutdown on the first SIGINT or SIGTERM.
///
/// SIGTERM is what container runtimes send before killing the process, so a pending batch gets
/// flushed and checkpointed before exit.
fn spawn_shutdown_task(shutdown_tx: ShutdownTx) -> ReplicatorResult<JoinHandle<()>> {
    let mut sigterm = signal(SignalKind::terminate())?;

    let handle = tokio::spawn(async move {
        let received = tokio::select! {
            result = tokio::signal::ctrl_c() => result.map(|()| "sigint"),
            _ = sigterm.recv() => Ok("sigterm"),
        };

        let signal = match received {
            Ok(signal) => signal,
            Err(err) => {
                warn!(error = %err, "failed to listen for sigint, waiting for sigterm only");
                sigterm.recv().await;
                "sigterm"
            }
        };

        info!(signal, "termination signal received, shutting down");

        if let Err(err) = shutdown_tx.shutdown() {
            warn!(error = ?err, "failed to send shutdown signal");
        }
    });

    Ok(handle)
}

fn log_config(config: &MirrorConfig) {
    log_source_config(&config.source);
    log_sink_config(&config.sink, config.sink_connection());
    log_pipeline_config(&config.pipeline);
    log_checkpoint_config(&config.checkpoint);
}

fn log_source_config(config: &SourceConfig) {
    debug!(
        table = config.table,
        poll_interval_ms = config.poll_interval_ms,
        page_size = config.page_size,
        "source config"
    );
    log_pg_connection_config("source", &config.connection);
}

fn log_sink_config(config: &SinkConfig, connection: &PgConnectionConfig) {
    debug!(
        table = config.table,
        shares_source_connection = config.connection.is_none(),
        "sink config"
    );
    log_pg_connection_config("sink", connection);
}

fn log_pg_connection_config(role: &'static str, config: &PgConnectionConfig) {
    debug!(
        role,
        host = config.host,
        port = config.port,
        dbname = config.name,
        username = config.username,
        tls_enabled = config.tls.enabled,
        "postgres connection config",
    );
}

fn log_pipeline_config(config: &PipelineConfig) {
    debug!(
        pipeline_id = config.id,
        max_flush_retries = ?config.max_flush_retries,
        catch_up_group_size = config.catch_up.group_size,
        token_length = config.anonymization.token_length,
        "pipeline config"
    );
    log_batch_config(&config.batch);
}

fn log_batch_config(config: &BatchConfig) {
    debug!(
        max_size = config.max_size,
        interval_ms = config.interval_ms,
        "batch config"
    );
}

fn log_checkpoint_config(config: &CheckpointConfig) {
    debug!(path = %config.path.display(), "checkpoint config");
}
