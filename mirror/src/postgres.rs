//! Postgres plumbing shared by [`crate::source::PostgresSource`] and
//! [`crate::sink::PostgresSink`].
//!
//! Both sides store customers in tables of the same shape, keyed by the integer form of the
//! record identity.

use chrono::{DateTime, Utc};
use mirror_config::shared::{IntoConnectOptions, PgConnectionConfig};
use pg_escape::quote_identifier;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use std::time::Duration;

use crate::error::{ErrorKind, MirrorError, MirrorResult, database_error_kind};
use crate::mirror_error;
use crate::types::{Address, Record, RecordId};

/// Columns of a customer table, in binding order.
pub(crate) const CUSTOMER_COLUMNS: &str = "id, first_name, last_name, email, line1, line2, \
     postcode, city, state, country, created_at";

/// How long acquiring a pooled connection may take.
const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Opens a connection pool, failing with `kind` when the database is unreachable.
pub(crate) async fn connect(
    config: &PgConnectionConfig,
    max_connections: u32,
    kind: ErrorKind,
) -> MirrorResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(max_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .connect_with(config.with_db())
        .await
        .map_err(|err| {
            mirror_error!(
                kind,
                "Failed to connect to Postgres",
                format!("{}:{}/{}: {err}", config.host, config.port, config.name),
                source: err
            )
        })
}

/// Creates the customer table if it does not exist yet.
pub(crate) async fn ensure_customer_table(pool: &PgPool, table: &str) -> Result<(), sqlx::Error> {
    let query = format!(
        r#"
        CREATE TABLE IF NOT EXISTS {} (
            id BIGINT PRIMARY KEY,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            email TEXT NOT NULL,
            line1 TEXT NOT NULL,
            line2 TEXT NOT NULL,
            postcode TEXT NOT NULL,
            city TEXT NOT NULL,
            state TEXT NOT NULL,
            country TEXT NOT NULL,
            created_at TIMESTAMPTZ NOT NULL
        )
        "#,
        quote_identifier(table)
    );
    sqlx::query(&query).execute(pool).await?;

    let index = quote_identifier(&format!("{table}_created_at_id_idx")).into_owned();
    let query = format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {} (created_at, id)",
        quote_identifier(table)
    );
    sqlx::query(&query).execute(pool).await?;

    Ok(())
}

/// Decodes a customer table row.
pub(crate) fn record_from_row(row: &PgRow) -> MirrorResult<Record> {
    Ok(Record {
        id: RecordId::from_i64(row.try_get("id")?)?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        email: row.try_get("email")?,
        address: Address {
            line1: row.try_get("line1")?,
            line2: row.try_get("line2")?,
            postcode: row.try_get("postcode")?,
            city: row.try_get("city")?,
            state: row.try_get("state")?,
            country: row.try_get("country")?,
        },
        created_at: row.try_get("created_at")?,
    })
}

/// Column-wise arrays of a set of records, bound to `UNNEST` for bulk statements.
#[derive(Debug, Default)]
pub(crate) struct RecordColumns {
    pub ids: Vec<i64>,
    pub first_names: Vec<String>,
    pub last_names: Vec<String>,
    pub emails: Vec<String>,
    pub line1s: Vec<String>,
    pub line2s: Vec<String>,
    pub postcodes: Vec<String>,
    pub cities: Vec<String>,
    pub states: Vec<String>,
    pub countries: Vec<String>,
    pub created_ats: Vec<DateTime<Utc>>,
}

impl RecordColumns {
    pub(crate) fn push(&mut self, record: &Record) {
        self.ids.push(record.id.as_i64());
        self.first_names.push(record.first_name.clone());
        self.last_names.push(record.last_name.clone());
        self.emails.push(record.email.clone());
        self.line1s.push(record.address.line1.clone());
        self.line2s.push(record.address.line2.clone());
        self.postcodes.push(record.address.postcode.clone());
        self.cities.push(record.address.city.clone());
        self.states.push(record.address.state.clone());
        self.countries.push(record.address.country.clone());
        self.created_ats.push(record.created_at);
    }

    /// Binds the arrays in [`CUSTOMER_COLUMNS`] order, as parameters `$1` to `$11`.
    pub(crate) fn bind<'q>(
        self,
        query: sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments>,
    ) -> sqlx::query::Query<'q, sqlx::Postgres, sqlx::postgres::PgArguments> {
        query
            .bind(self.ids)
            .bind(self.first_names)
            .bind(self.last_names)
            .bind(self.emails)
            .bind(self.line1s)
            .bind(self.line2s)
            .bind(self.postcodes)
            .bind(self.cities)
            .bind(self.states)
            .bind(self.countries)
            .bind(self.created_ats)
    }
}

impl<'a> FromIterator<&'a Record> for RecordColumns {
    fn from_iter<I: IntoIterator<Item = &'a Record>>(iter: I) -> Self {
        let mut columns = RecordColumns::default();
        for record in iter {
            columns.push(record);
        }
        columns
    }
}

/// `UNNEST` clause matching [`RecordColumns::bind`].
pub(crate) const UNNEST_RECORD_COLUMNS: &str = "UNNEST($1::BIGINT[], $2::TEXT[], $3::TEXT[], \
     $4::TEXT[], $5::TEXT[], $6::TEXT[], $7::TEXT[], $8::TEXT[], $9::TEXT[], $10::TEXT[], \
     $11::TIMESTAMPTZ[])";

/// Re-classifies a database error raised by a source or sink operation.
pub(crate) fn classify(
    err: sqlx::Error,
    connection_kind: ErrorKind,
    query_kind: ErrorKind,
    description: &'static str,
) -> MirrorError {
    let kind = match database_error_kind(&err) {
        ErrorKind::DatabaseConnectionFailed => connection_kind,
        _ => query_kind,
    };

    mirror_error!(kind, description, err.to_string(), source: err)
}
