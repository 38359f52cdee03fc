use mirror::anonymizer::Anonymizer;
use mirror::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use mirror::error::ErrorKind;
use mirror::generator::CustomerGenerator;
use mirror::pipeline::Pipeline;
use mirror::sink::MemorySink;
use mirror::source::MemorySource;
use mirror::test_utils::faults::{FaultInjectingCheckpointStore, FaultInjectingSink};
use mirror::test_utils::notifying_store::NotifyingCheckpointStore;
use mirror::test_utils::pipeline::{random_pipeline_id, test_pipeline_config};
use mirror::test_utils::slow_sink::SlowSink;
use mirror::test_utils::test_sink_wrapper::TestSinkWrapper;
use mirror::types::{Record, ResumeToken};
use mirror_telemetry::tracing::init_test_tracing;
use std::time::Duration;

fn position(position: usize) -> ResumeToken {
    ResumeToken::new(format!("{position:020}")).unwrap()
}

async fn assert_mirrored(sink: &MemorySink, records: &[Record]) {
    let anonymizer = Anonymizer::default();

    assert_eq!(sink.len().await, records.len());
    for record in records {
        assert_eq!(
            sink.get(record.id).await,
            Some(anonymizer.anonymize(record)),
            "record {} is not mirrored",
            record.id
        );
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn batches_are_flushed_in_source_order_and_checkpointed() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(3);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let test_sink = TestSinkWrapper::wrap(sink.clone());
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 2, 100),
        source.clone(),
        test_sink.clone(),
        store.clone(),
    );

    let last_saved = store.notify_on_token(position(3)).await;

    pipeline.start().await.unwrap();
    last_saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.history().await, vec![position(2), position(3)]);
    assert_eq!(
        test_sink.insert_calls().await,
        vec![vec![records[0].id, records[1].id], vec![records[2].id]]
    );
    assert!(test_sink.tolerated_duplicates().await.is_empty());
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_without_checkpoint_follows_the_tail() {
    init_test_tracing();

    let generator = CustomerGenerator::new();
    let source = MemorySource::new();
    source.insert_many(generator.generate(5)).await;

    let sink = MemorySink::new();
    let store = NotifyingCheckpointStore::new();

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        sink.clone(),
        store.clone(),
    );

    let saved = store.notify_on_token(position(6)).await;

    pipeline.start().await.unwrap();
    let record = generator.customer();
    source.insert(record.clone()).await;

    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.loads().await, 1);
    assert_eq!(store.history().await, vec![position(6)]);
    assert_mirrored(&sink, &[record]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn restarted_pipeline_resumes_after_the_checkpoint() {
    init_test_tracing();

    let generator = CustomerGenerator::new();
    let source = MemorySource::new();
    let first_records = generator.generate(3);
    source.insert_many(first_records.clone()).await;

    let sink = MemorySink::new();
    let checkpoint = MemoryCheckpointStore::with_token(MemorySource::origin_token());

    let store = NotifyingCheckpointStore::wrap(checkpoint.clone());
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        sink.clone(),
        store.clone(),
    );
    let saved = store.notify_on_token(position(3)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    // Records inserted while the mirror is down.
    let second_records = generator.generate(2);
    source.insert_many(second_records.clone()).await;

    let test_sink = TestSinkWrapper::wrap(sink.clone());
    let store = NotifyingCheckpointStore::wrap(checkpoint.clone());
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        test_sink.clone(),
        store.clone(),
    );
    let saved = store.notify_on_token(position(5)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        test_sink.insert_calls().await,
        vec![vec![second_records[0].id, second_records[1].id]]
    );
    assert_eq!(checkpoint.token().await, Some(position(5)));
    assert_mirrored(&sink, &[first_records, second_records].concat()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn replaying_the_feed_tolerates_duplicates() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(5);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();

    for run in 0..2 {
        let test_sink = TestSinkWrapper::wrap(sink.clone());
        let store = NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(
            MemorySource::origin_token(),
        ));
        let mut pipeline = Pipeline::new(
            test_pipeline_config(random_pipeline_id(), 10, 20),
            source.clone(),
            test_sink.clone(),
            store.clone(),
        );

        let saved = store.notify_on_token(position(5)).await;
        pipeline.start().await.unwrap();
        saved.notified().await;
        pipeline.shutdown_and_wait().await.unwrap();

        let expected_duplicates = if run == 0 { 0 } else { 5 };
        assert_eq!(
            test_sink.tolerated_duplicates().await.len(),
            expected_duplicates
        );
    }

    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn records_written_without_checkpoint_are_replayed_after_restart() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(3);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let checkpoint = MemoryCheckpointStore::with_token(MemorySource::origin_token());

    // Every save fails, as if the process died right after each sink write.
    let failing_store = FaultInjectingCheckpointStore::wrap(checkpoint.clone());
    failing_store.fail_next_saves(u32::MAX);

    let mut config = test_pipeline_config(random_pipeline_id(), 10, 20);
    config.max_flush_retries = Some(3);
    let mut pipeline = Pipeline::new(
        config.clone(),
        source.clone(),
        sink.clone(),
        failing_store.clone(),
    );
    pipeline.start().await.unwrap();

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CheckpointSaveFailed);
    assert_eq!(failing_store.failed_saves(), 3);
    assert_eq!(checkpoint.load().await.unwrap(), Some(MemorySource::origin_token()));
    assert_eq!(sink.len().await, 3);

    let test_sink = TestSinkWrapper::wrap(sink.clone());
    let store = NotifyingCheckpointStore::wrap(checkpoint.clone());
    let mut pipeline = Pipeline::new(config, source.clone(), test_sink.clone(), store.clone());

    let saved = store.notify_on_token(position(3)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(
        test_sink.tolerated_duplicates().await,
        records.iter().map(|record| record.id).collect::<Vec<_>>()
    );
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_flushes_retry_the_same_batch() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(3);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let faulty_sink = FaultInjectingSink::wrap(sink.clone());
    faulty_sink.fail_next_inserts(2);
    let test_sink = TestSinkWrapper::wrap(faulty_sink);
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        test_sink.clone(),
        store.clone(),
    );

    let saved = store.notify_on_token(position(3)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let batch: Vec<_> = records.iter().map(|record| record.id).collect();
    assert_eq!(test_sink.insert_calls().await, vec![batch.clone(), batch.clone(), batch]);
    assert_eq!(store.history().await, vec![position(3)]);
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn slow_flushes_never_overlap_and_checkpoints_only_move_forward() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(10);
    source.insert_many(records.clone()).await;

    // Every insert outlasts several ticks.
    let sink = MemorySink::new();
    let slow_sink = SlowSink::wrap(sink.clone(), Duration::from_millis(100));
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 2, 10),
        source.clone(),
        slow_sink.clone(),
        store.clone(),
    );

    let saved = store.notify_on_token(position(10)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(slow_sink.max_in_flight(), 1);
    let inserts = slow_sink.inserts().await;
    assert_eq!(inserts.len(), 5);
    for pair in inserts.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "an insert started before the previous one ended");
    }

    let history = store.history().await;
    let positions: Vec<usize> = history
        .iter()
        .map(|token| MemorySource::position_of(token).unwrap())
        .collect();
    assert_eq!(positions, vec![2, 4, 6, 8, 10]);
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_keeps_retrying_through_a_sink_outage() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(2);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let faulty_sink = FaultInjectingSink::wrap(sink.clone());
    faulty_sink.fail_next_inserts(15);
    let test_sink = TestSinkWrapper::wrap(faulty_sink);
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    // No retry bound is configured, so the outage outlasts any fixed number of cycles.
    let config = test_pipeline_config(random_pipeline_id(), 10, 20);
    assert_eq!(config.max_flush_retries, None);
    let mut pipeline = Pipeline::new(config, source.clone(), test_sink.clone(), store.clone());

    let recovered = test_sink.wait_for_records(records.len()).await;
    let saved = store.notify_on_token(position(2)).await;

    pipeline.start().await.unwrap();
    recovered.notified().await;
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(test_sink.insert_calls().await.len(), 16);
    assert_eq!(store.history().await, vec![position(2)]);
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn configured_retry_bound_fails_the_pipeline() {
    init_test_tracing();

    let source = MemorySource::new();
    source
        .insert_many(CustomerGenerator::new().generate(2))
        .await;

    let sink = MemorySink::new();
    let faulty_sink = FaultInjectingSink::wrap(sink.clone());
    faulty_sink.fail_next_inserts(u32::MAX);
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut config = test_pipeline_config(random_pipeline_id(), 10, 20);
    config.max_flush_retries = Some(2);
    let mut pipeline = Pipeline::new(config, source.clone(), faulty_sink, store.clone());

    pipeline.start().await.unwrap();
    let err = pipeline.wait().await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
    assert!(store.history().await.is_empty());
    assert!(sink.is_empty().await);
    assert!(source.shutdown_called().await);
    assert!(sink.shutdown_called().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_during_an_outage_leaves_pending_records_for_replay() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(3);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let faulty_sink = FaultInjectingSink::wrap(sink.clone());
    faulty_sink.fail_next_inserts(u32::MAX);
    let checkpoint = MemoryCheckpointStore::with_token(MemorySource::origin_token());

    // The interval never elapses during the test, only the drain flushes.
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 60_000),
        source.clone(),
        faulty_sink,
        checkpoint.clone(),
    );
    pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert!(sink.is_empty().await);
    assert_eq!(checkpoint.token().await, Some(MemorySource::origin_token()));

    let store = NotifyingCheckpointStore::wrap(checkpoint.clone());
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        sink.clone(),
        store.clone(),
    );
    let saved = store.notify_on_token(position(3)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_failure_stops_the_pipeline_after_flushing_received_records() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(2);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        sink.clone(),
        store.clone(),
    );

    let saved = store.notify_on_token(position(2)).await;
    pipeline.start().await.unwrap();
    saved.notified().await;

    source.fail_feed("connection reset by peer").await;

    let err = pipeline.wait().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SourceIoError);
    assert_eq!(store.history().await, vec![position(2)]);
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn shutdown_drains_pending_records() {
    init_test_tracing();

    let source = MemorySource::new();
    let records = CustomerGenerator::new().generate(3);
    source.insert_many(records.clone()).await;

    let sink = MemorySink::new();
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    // The interval never elapses during the test, only the drain flushes.
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 2, 60_000),
        source.clone(),
        sink.clone(),
        store.clone(),
    );

    pipeline.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.shutdown_and_wait().await.unwrap();

    assert_eq!(store.history().await, vec![position(2), position(3)]);
    assert_mirrored(&sink, &records).await;
    assert!(source.shutdown_called().await);
    assert!(sink.shutdown_called().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn checkpoints_advance_through_every_batch_boundary() {
    init_test_tracing();

    let generator = CustomerGenerator::new();
    let source = MemorySource::new();
    let sink = MemorySink::new();
    let test_sink = TestSinkWrapper::wrap(sink.clone());
    let store =
        NotifyingCheckpointStore::wrap(MemoryCheckpointStore::with_token(MemorySource::origin_token()));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 4, 10),
        source.clone(),
        test_sink.clone(),
        store.clone(),
    );

    let mut records = Vec::new();
    let saved = store.notify_on_token(position(25)).await;
    pipeline.start().await.unwrap();
    for _ in 0..5 {
        let batch = generator.generate(5);
        source.insert_many(batch.clone()).await;
        records.extend(batch);
        tokio::time::sleep(Duration::from_millis(15)).await;
    }
    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    let history = store.history().await;
    let insert_calls = test_sink.insert_calls().await;
    assert_eq!(history.len(), insert_calls.len());

    let mut flushed = 0;
    for (token, call) in history.iter().zip(&insert_calls) {
        assert!(call.len() <= 4);
        flushed += call.len();
        assert_eq!(MemorySource::position_of(token).unwrap(), flushed);
    }
    assert_eq!(flushed, 25);
    assert_mirrored(&sink, &records).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_that_was_not_started_waits_immediately() {
    init_test_tracing();

    let pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        MemorySource::new(),
        MemorySink::new(),
        MemoryCheckpointStore::new(),
    );

    pipeline.shutdown_and_wait().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn invalid_checkpoint_fails_the_start() {
    init_test_tracing();

    let source = MemorySource::new();
    let sink = MemorySink::new();
    let store = MemoryCheckpointStore::with_token(position(42));

    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 20),
        source.clone(),
        sink.clone(),
        store,
    );

    let err = pipeline.start().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidResumeToken);

    assert!(source.shutdown_called().await);
    assert!(sink.shutdown_called().await);
    assert!(pipeline.wait().await.is_ok());
}
