use mirror_config::shared::{PgConnectionConfig, SinkConfig};
use pg_escape::quote_identifier;
use sqlx::PgPool;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{ErrorKind, MirrorError, MirrorResult};
use crate::postgres::{
    CUSTOMER_COLUMNS, RecordColumns, UNNEST_RECORD_COLUMNS, classify, connect,
    ensure_customer_table,
};
use crate::sink::{InsertOutcome, Sink};
use crate::types::{AnonymizedRecord, RecordId};

/// Connections kept by the sink pool. Flushes and upsert groups are sequential.
const MAX_CONNECTIONS: u32 = 2;

/// Anonymized customer table in Postgres.
///
/// Each bulk operation is a single statement over `UNNEST`ed column arrays, so a batch is
/// written atomically.
#[derive(Debug, Clone)]
pub struct PostgresSink {
    pool: PgPool,
    insert_query: String,
    upsert_query: String,
    table: String,
}

impl PostgresSink {
    /// Connects to the database holding the sink table.
    pub async fn connect(connection: &PgConnectionConfig, config: &SinkConfig) -> MirrorResult<Self> {
        let pool = connect(connection, MAX_CONNECTIONS, ErrorKind::SinkConnectionFailed).await?;

        Ok(Self::with_pool(pool, config))
    }

    pub fn with_pool(pool: PgPool, config: &SinkConfig) -> Self {
        let table = quote_identifier(&config.table);

        let insert_query = format!(
            "INSERT INTO {table} ({CUSTOMER_COLUMNS}) SELECT * FROM {UNNEST_RECORD_COLUMNS} \
             ON CONFLICT (id) DO NOTHING RETURNING id"
        );
        let upsert_query = format!(
            "INSERT INTO {table} ({CUSTOMER_COLUMNS}) SELECT * FROM {UNNEST_RECORD_COLUMNS} \
             ON CONFLICT (id) DO UPDATE SET \
                first_name = EXCLUDED.first_name, \
                last_name = EXCLUDED.last_name, \
                email = EXCLUDED.email, \
                line1 = EXCLUDED.line1, \
                line2 = EXCLUDED.line2, \
                postcode = EXCLUDED.postcode, \
                city = EXCLUDED.city, \
                state = EXCLUDED.state, \
                country = EXCLUDED.country, \
                created_at = EXCLUDED.created_at"
        );

        Self {
            pool,
            insert_query,
            upsert_query,
            table: config.table.clone(),
        }
    }

    /// Creates the sink table if it does not exist yet.
    pub async fn ensure_table(&self) -> MirrorResult<()> {
        ensure_customer_table(&self.pool, &self.table)
            .await
            .map_err(|err| write_error(err, "Failed to create the sink table"))
    }
}

fn write_error(err: sqlx::Error, description: &'static str) -> MirrorError {
    classify(
        err,
        ErrorKind::SinkConnectionFailed,
        ErrorKind::SinkWriteFailed,
        description,
    )
}

impl Sink for PostgresSink {
    fn name() -> &'static str {
        "postgres"
    }

    async fn insert_many(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<InsertOutcome> {
        if records.is_empty() {
            return Ok(InsertOutcome::default());
        }

        let columns = records
            .iter()
            .map(AnonymizedRecord::as_record)
            .collect::<RecordColumns>();

        let inserted: Vec<i64> = sqlx::query_scalar(&self.insert_query)
            .bind(columns.ids)
            .bind(columns.first_names)
            .bind(columns.last_names)
            .bind(columns.emails)
            .bind(columns.line1s)
            .bind(columns.line2s)
            .bind(columns.postcodes)
            .bind(columns.cities)
            .bind(columns.states)
            .bind(columns.countries)
            .bind(columns.created_ats)
            .fetch_all(&self.pool)
            .await
            .map_err(|err| write_error(err, "Failed to insert records into the sink"))?;

        let inserted_ids: HashSet<i64> = inserted.into_iter().collect();
        let duplicates: Vec<RecordId> = records
            .iter()
            .map(AnonymizedRecord::id)
            .filter(|id| !inserted_ids.contains(&id.as_i64()))
            .collect();

        debug!(
            table = %self.table,
            inserted = inserted_ids.len(),
            duplicates = duplicates.len(),
            "inserted records into postgres sink"
        );

        Ok(InsertOutcome {
            inserted: inserted_ids.len(),
            duplicates,
        })
    }

    async fn upsert(&self, records: Vec<AnonymizedRecord>) -> MirrorResult<usize> {
        if records.is_empty() {
            return Ok(0);
        }

        let result = records
            .iter()
            .map(AnonymizedRecord::as_record)
            .collect::<RecordColumns>()
            .bind(sqlx::query(&self.upsert_query))
            .execute(&self.pool)
            .await
            .map_err(|err| write_error(err, "Failed to upsert records into the sink"))?;

        Ok(result.rows_affected() as usize)
    }

    async fn shutdown(&self) -> MirrorResult<()> {
        self.pool.close().await;

        Ok(())
    }
}
