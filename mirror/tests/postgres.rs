use futures::{StreamExt, TryStreamExt};
use mirror::anonymizer::Anonymizer;
use mirror::error::ErrorKind;
use mirror::generator::CustomerGenerator;
use mirror::pipeline::Pipeline;
use mirror::sink::{PostgresSink, Sink};
use mirror::source::{InsertEventStream, PostgresSource, Source};
use mirror::test_utils::database::TestDatabase;
use mirror::test_utils::notifying_store::NotifyingCheckpointStore;
use mirror::test_utils::pipeline::{random_pipeline_id, test_pipeline_config};
use mirror::types::{AnonymizedRecord, InsertEvent, Record, RecordId, ResumeToken};
use mirror_config::shared::AnonymizationConfig;
use mirror_telemetry::tracing::init_test_tracing;
use sqlx::PgPool;
use std::time::Duration;

const SOURCE_TABLE: &str = "customers";
const SINK_TABLE: &str = "customers_anonymized";

async fn source(database: &TestDatabase, page_size: u32) -> PostgresSource {
    let source = PostgresSource::with_pool(
        database.connect().await,
        &database.source_config(SOURCE_TABLE, page_size),
    );
    source.ensure_table().await.unwrap();

    source
}

async fn sink(database: &TestDatabase) -> PostgresSink {
    let sink = PostgresSink::with_pool(
        database.connect().await,
        &database.sink_config(SINK_TABLE),
    );
    sink.ensure_table().await.unwrap();

    sink
}

fn anonymize(records: &[Record]) -> Vec<AnonymizedRecord> {
    let anonymizer = Anonymizer::default();
    records.iter().map(|record| anonymizer.anonymize(record)).collect()
}

fn ids(records: &[Record]) -> Vec<RecordId> {
    records.iter().map(|record| record.id).collect()
}

async fn sink_first_names(pool: &PgPool) -> Vec<(i64, String)> {
    sqlx::query_as(&format!(
        "select id, first_name from {SINK_TABLE} order by id"
    ))
    .fetch_all(pool)
    .await
    .unwrap()
}

async fn next_events(feed: &mut InsertEventStream, count: usize) -> Vec<InsertEvent> {
    let mut events = Vec::with_capacity(count);
    for _ in 0..count {
        let event = tokio::time::timeout(Duration::from_secs(10), feed.next())
            .await
            .expect("timed out waiting for a feed event")
            .expect("the feed ended")
            .unwrap();
        events.push(event);
    }

    events
}

#[tokio::test(flavor = "multi_thread")]
async fn bulk_insert_reports_rows_already_in_the_sink_as_duplicates() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let sink = sink(&database).await;

    let records = CustomerGenerator::new().generate(3);
    let anonymized = anonymize(&records);

    let outcome = sink.insert_many(anonymized[..2].to_vec()).await.unwrap();
    assert_eq!(outcome.inserted, 2);
    assert!(outcome.duplicates.is_empty());

    let outcome = sink.insert_many(anonymized.clone()).await.unwrap();
    assert_eq!(outcome.inserted, 1);
    assert_eq!(outcome.duplicates, ids(&records[..2]));

    let rows = sink_first_names(&database.pool()).await;
    let expected: Vec<(i64, String)> = anonymized
        .iter()
        .map(|record| (record.id().as_i64(), record.as_record().first_name.clone()))
        .collect();
    assert_eq!(rows, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn upsert_overwrites_rows_already_in_the_sink() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let sink = sink(&database).await;

    let records = CustomerGenerator::new().generate(2);
    sink.insert_many(anonymize(&records[..1])).await.unwrap();

    let salted = Anonymizer::new(&AnonymizationConfig {
        token_length: 8,
        seed_salt: 0x5eed,
    });
    let reanonymized: Vec<_> = records.iter().map(|record| salted.anonymize(record)).collect();

    assert_eq!(sink.upsert(reanonymized.clone()).await.unwrap(), 2);

    let rows = sink_first_names(&database.pool()).await;
    let expected: Vec<(i64, String)> = reanonymized
        .iter()
        .map(|record| (record.id().as_i64(), record.as_record().first_name.clone()))
        .collect();
    assert_eq!(rows, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_resumes_after_the_record_named_by_a_token() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 2).await;

    let records = CustomerGenerator::new().generate(5);
    assert_eq!(source.insert_records(&records).await.unwrap(), 5);

    let token = ResumeToken::new(records[1].id.to_string()).unwrap();
    let mut feed = source.subscribe(Some(token)).await.unwrap();

    // Three records remain after the token, spread over two pages.
    let events = next_events(&mut feed, 3).await;
    let delivered: Vec<RecordId> = events.iter().map(|event| event.record.id).collect();
    assert_eq!(delivered, ids(&records[2..]));
    for event in &events {
        assert_eq!(event.token.as_str(), event.record.id.to_string());
        assert_eq!(event.token.as_str().len(), 14);
    }
    assert_eq!(events[2].record.email, records[4].email);
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_without_token_starts_at_the_tail() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 10).await;

    let generator = CustomerGenerator::new();
    source.insert_records(&generator.generate(3)).await.unwrap();

    let mut feed = source.subscribe(None).await.unwrap();
    let later = generator.generate(2);
    source.insert_records(&later).await.unwrap();

    let events = next_events(&mut feed, 2).await;
    let delivered: Vec<RecordId> = events.iter().map(|event| event.record.id).collect();
    assert_eq!(delivered, ids(&later));
}

#[tokio::test(flavor = "multi_thread")]
async fn feed_rejects_a_token_that_is_not_a_record_identity() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 10).await;

    let err = source
        .subscribe(Some(ResumeToken::new("not-an-identity").unwrap()))
        .await
        .err()
        .unwrap();

    assert_eq!(err.kind(), ErrorKind::InvalidResumeToken);
}

#[tokio::test(flavor = "multi_thread")]
async fn scan_pages_through_the_table_in_creation_order() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 2).await;

    let mut records = CustomerGenerator::new().generate(5);
    source.insert_records(&records).await.unwrap();

    let scanned: Vec<Record> = source.scan().await.unwrap().try_collect().await.unwrap();

    // Stored timestamps are truncated to microseconds, identities compare exactly.
    records.sort_by_key(|record| (record.created_at, record.id));
    assert_eq!(ids(&scanned), ids(&records));
    assert_eq!(scanned[0].email, records[0].email);
}

#[tokio::test(flavor = "multi_thread")]
async fn pipeline_mirrors_new_postgres_records() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 10).await;
    let sink = sink(&database).await;

    let generator = CustomerGenerator::new();
    let existing = generator.generate(2);
    source.insert_records(&existing).await.unwrap();

    let store = NotifyingCheckpointStore::new();
    let mut pipeline = Pipeline::new(
        test_pipeline_config(random_pipeline_id(), 10, 50),
        source.clone(),
        sink,
        store.clone(),
    );
    pipeline.start().await.unwrap();

    let records = generator.generate(3);
    let last_token = ResumeToken::new(records[2].id.to_string()).unwrap();
    let saved = store.notify_on_token(last_token).await;
    source.insert_records(&records).await.unwrap();

    saved.notified().await;
    pipeline.shutdown_and_wait().await.unwrap();

    // Records present before the pipeline started are left to the catch-up sync.
    let rows = sink_first_names(&database.pool()).await;
    let expected: Vec<(i64, String)> = anonymize(&records)
        .iter()
        .map(|record| (record.id().as_i64(), record.as_record().first_name.clone()))
        .collect();
    assert_eq!(rows, expected);
}

#[tokio::test(flavor = "multi_thread")]
async fn generator_resumes_after_the_largest_source_identity() {
    init_test_tracing();
    let Some(database) = TestDatabase::spawn().await else {
        return;
    };
    let source = source(&database, 10).await;
    assert_eq!(source.last_record_id().await.unwrap(), None);

    // A record stamped far in the future, as a previous writer with a fast clock would leave.
    let mut ahead = CustomerGenerator::new().customer();
    ahead.id = RecordId::new(u32::MAX - 1, 7);
    source.insert_records(&[ahead.clone()]).await.unwrap();

    let last = source.last_record_id().await.unwrap().unwrap();
    assert_eq!(last, ahead.id);

    let records = CustomerGenerator::starting_after(last).generate(3);
    assert!(records.iter().all(|record| record.id > ahead.id));
    source.insert_records(&records).await.unwrap();

    let mut feed = source
        .subscribe(Some(ResumeToken::new(ahead.id.to_string()).unwrap()))
        .await
        .unwrap();
    let delivered: Vec<RecordId> = next_events(&mut feed, 3)
        .await
        .iter()
        .map(|event| event.record.id)
        .collect();
    assert_eq!(delivered, ids(&records));
}
