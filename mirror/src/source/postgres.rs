use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use mirror_config::shared::SourceConfig;
use pg_escape::quote_identifier;
use sqlx::PgPool;
use std::collections::VecDeque;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::mirror_error;
use crate::postgres::{
    CUSTOMER_COLUMNS, RecordColumns, UNNEST_RECORD_COLUMNS, classify, connect,
    ensure_customer_table, record_from_row,
};
use crate::source::{InsertEventStream, RecordStream, Source};
use crate::types::{InsertEvent, Record, RecordId, ResumeToken};

/// Connections kept by the source pool: one for the feed, one for scans and administration.
const MAX_CONNECTIONS: u32 = 2;

/// Customer table in Postgres, followed by polling.
///
/// The insert feed is a keyset poll on the primary key: every `poll_interval_ms` the source
/// reads up to `page_size` records with an identity greater than the last delivered one. The
/// token of an event is the hex form of the record identity.
///
/// Polling relies on identities becoming visible in increasing order, which holds when a single
/// writer inserts records in creation order. A record committed with a lower identity than an
/// already delivered one is never delivered by the feed; the catch-up sync picks it up.
#[derive(Debug, Clone)]
pub struct PostgresSource {
    pool: PgPool,
    table: String,
    poll_interval: Duration,
    page_size: u32,
}

impl PostgresSource {
    /// Connects to the database holding the source table.
    pub async fn connect(config: &SourceConfig) -> MirrorResult<Self> {
        let pool = connect(
            &config.connection,
            MAX_CONNECTIONS,
            ErrorKind::SourceConnectionFailed,
        )
        .await?;

        Ok(Self::with_pool(pool, config))
    }

    pub fn with_pool(pool: PgPool, config: &SourceConfig) -> Self {
        Self {
            pool,
            table: config.table.clone(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            page_size: config.page_size,
        }
    }

    /// Creates the source table if it does not exist yet.
    pub async fn ensure_table(&self) -> MirrorResult<()> {
        ensure_customer_table(&self.pool, &self.table)
            .await
            .map_err(|err| self.query_error(err, "Failed to create the source table"))
    }

    /// Inserts new records, as an application writing customers would.
    pub async fn insert_records(&self, records: &[Record]) -> MirrorResult<u64> {
        let query = format!(
            "INSERT INTO {} ({CUSTOMER_COLUMNS}) SELECT * FROM {UNNEST_RECORD_COLUMNS}",
            quote_identifier(&self.table)
        );

        let result = records
            .iter()
            .collect::<RecordColumns>()
            .bind(sqlx::query(&query))
            .execute(&self.pool)
            .await
            .map_err(|err| self.query_error(err, "Failed to insert source records"))?;

        Ok(result.rows_affected())
    }

    fn query_error(&self, err: sqlx::Error, description: &'static str) -> MirrorError {
        classify(
            err,
            ErrorKind::SourceConnectionFailed,
            ErrorKind::SourceQueryFailed,
            description,
        )
    }

    /// Returns the greatest record identity in the source table, if any.
    pub async fn last_record_id(&self) -> MirrorResult<Option<RecordId>> {
        match self.max_id().await? {
            0 => Ok(None),
            id => RecordId::from_i64(id).map(Some),
        }
    }

    async fn max_id(&self) -> MirrorResult<i64> {
        let query = format!(
            "SELECT COALESCE(MAX(id), 0) FROM {}",
            quote_identifier(&self.table)
        );

        sqlx::query_scalar(&query)
            .fetch_one(&self.pool)
            .await
            .map_err(|err| self.query_error(err, "Failed to read the source feed tail"))
    }
}

struct Poller {
    source: PostgresSource,
    query: String,
    last_id: i64,
    buffer: VecDeque<Record>,
    poll_now: bool,
}

impl Poller {
    async fn next_event(mut self) -> Option<(MirrorResult<InsertEvent>, Self)> {
        loop {
            if let Some(record) = self.buffer.pop_front() {
                let token = ResumeToken::from_source(record.id.to_string());
                return Some((Ok(InsertEvent { record, token }), self));
            }

            if !self.poll_now {
                tokio::time::sleep(self.source.poll_interval).await;
            }
            self.poll_now = false;

            match self.poll().await {
                Ok(records) => {
                    if let Some(last) = records.last() {
                        self.last_id = last.id.as_i64();
                        debug!(records = records.len(), "polled source feed");
                    }
                    // A full page means more records are already waiting.
                    self.poll_now = records.len() as u64 == self.source.page_size as u64;
                    self.buffer.extend(records);
                }
                Err(err) => return Some((Err(err), self)),
            }
        }
    }

    async fn poll(&self) -> MirrorResult<Vec<Record>> {
        let rows = sqlx::query(&self.query)
            .bind(self.last_id)
            .bind(self.source.page_size as i64)
            .fetch_all(&self.source.pool)
            .await
            .map_err(|err| {
                classify(
                    err,
                    ErrorKind::SourceIoError,
                    ErrorKind::SourceQueryFailed,
                    "Failed to poll the source feed",
                )
            })?;

        rows.iter().map(record_from_row).collect()
    }
}

#[derive(Clone)]
struct ScanCursor {
    created_at: DateTime<Utc>,
    id: i64,
}

impl Source for PostgresSource {
    fn name() -> &'static str {
        "postgres"
    }

    async fn subscribe(&self, after: Option<ResumeToken>) -> MirrorResult<InsertEventStream> {
        let last_id = match after {
            Some(token) => token
                .as_str()
                .parse::<RecordId>()
                .map_err(|err| {
                    mirror_error!(
                        ErrorKind::InvalidResumeToken,
                        "Resume token is not a record identity",
                        token,
                        source: err
                    )
                })?
                .as_i64(),
            None => self.max_id().await?,
        };

        info!(table = %self.table, last_id, "subscribed to postgres source feed");

        let poller = Poller {
            source: self.clone(),
            query: format!(
                "SELECT {CUSTOMER_COLUMNS} FROM {} WHERE id > $1 ORDER BY id LIMIT $2",
                quote_identifier(&self.table)
            ),
            last_id,
            buffer: VecDeque::new(),
            poll_now: true,
        };

        Ok(stream::unfold(poller, Poller::next_event).boxed())
    }

    async fn scan(&self) -> MirrorResult<RecordStream> {
        let table = quote_identifier(&self.table).into_owned();
        let first_page = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM {table} ORDER BY created_at, id LIMIT $1"
        );
        let next_page = format!(
            "SELECT {CUSTOMER_COLUMNS} FROM {table} WHERE (created_at, id) > ($1, $2) \
             ORDER BY created_at, id LIMIT $3"
        );
        let source = self.clone();

        let pages = stream::try_unfold(Some(None::<ScanCursor>), move |cursor| {
            let source = source.clone();
            let first_page = first_page.clone();
            let next_page = next_page.clone();

            async move {
                // `None` marks the end of the scan, `Some(None)` its beginning.
                let Some(cursor) = cursor else {
                    return Ok::<_, MirrorError>(None);
                };

                let query = match &cursor {
                    None => sqlx::query(&first_page).bind(source.page_size as i64),
                    Some(cursor) => sqlx::query(&next_page)
                        .bind(cursor.created_at)
                        .bind(cursor.id)
                        .bind(source.page_size as i64),
                };

                let rows = query
                    .fetch_all(&source.pool)
                    .await
                    .map_err(|err| source.query_error(err, "Failed to scan the source table"))?;
                let records = rows
                    .iter()
                    .map(record_from_row)
                    .collect::<MirrorResult<Vec<_>>>()?;

                let next = match records.last() {
                    Some(last) if records.len() as u64 == source.page_size as u64 => {
                        Some(Some(ScanCursor {
                            created_at: last.created_at,
                            id: last.id.as_i64(),
                        }))
                    }
                    _ => None,
                };

                if records.is_empty() {
                    return Ok(None);
                }

                Ok(Some((records, next)))
            }
        });

        Ok(pages
            .map_ok(|records| stream::iter(records.into_iter().map(Ok)))
            .try_flatten()
            .boxed())
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.pool.close().await;

        Ok(())
    }
}
