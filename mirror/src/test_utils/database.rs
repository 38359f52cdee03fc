use mirror_config::shared::{
    IntoConnectOptions, PgConnectionConfig, SinkConfig, SourceConfig, TlsConfig,
};
use sqlx::{Connection, Executor, PgConnection, PgPool};
use tokio::runtime::Handle;
use tracing::warn;
use uuid::Uuid;

/// Default port used when `TESTS_DATABASE_PORT` is not set.
const DEFAULT_TESTS_DATABASE_PORT: u16 = 5432;

/// Reads the connection settings of the Postgres server used by integration tests.
///
/// Returns `None` when `TESTS_DATABASE_HOST` is not set, so that the tests can be skipped on
/// machines without a server. Each call names a new database after a random UUID.
///
/// - `TESTS_DATABASE_HOST`: server hostname
/// - `TESTS_DATABASE_PORT`: server port, 5432 when unset
/// - `TESTS_DATABASE_USERNAME`: user allowed to create databases, `postgres` when unset
/// - `TESTS_DATABASE_PASSWORD`: password of that user (optional)
pub fn local_pg_connection_config() -> Option<PgConnectionConfig> {
    let host = std::env::var("TESTS_DATABASE_HOST").ok()?;

    Some(PgConnectionConfig {
        host,
        port: std::env::var("TESTS_DATABASE_PORT")
            .map(|port| {
                port.parse()
                    .expect("TESTS_DATABASE_PORT must be a valid port number")
            })
            .unwrap_or(DEFAULT_TESTS_DATABASE_PORT),
        name: Uuid::new_v4().to_string(),
        username: std::env::var("TESTS_DATABASE_USERNAME")
            .unwrap_or_else(|_| "postgres".to_string()),
        password: std::env::var("TESTS_DATABASE_PASSWORD")
            .ok()
            .map(Into::into),
        tls: TlsConfig::disabled(),
    })
}

/// Database created for a single test and dropped with it.
///
/// Dropping blocks the current thread, so tests holding one must run on the multi-thread
/// runtime.
pub struct TestDatabase {
    config: PgConnectionConfig,
    pool: PgPool,
}

impl TestDatabase {
    /// Creates a fresh database, or returns `None` when no test server is configured.
    ///
    /// # Panics
    ///
    /// Panics if the configured server cannot be reached or the database cannot be created.
    pub async fn spawn() -> Option<Self> {
        let Some(config) = local_pg_connection_config() else {
            warn!("TESTS_DATABASE_HOST is not set, skipping the Postgres test");
            return None;
        };

        let mut connection = PgConnection::connect_with(&config.without_db())
            .await
            .expect("Failed to connect to Postgres");
        connection
            .execute(&*format!(r#"create database "{}";"#, config.name))
            .await
            .expect("Failed to create database");

        let pool = PgPool::connect_with(config.with_db())
            .await
            .expect("Failed to connect to the test database");

        Some(Self { config, pool })
    }

    /// Returns the pool opened with the database, for assertions on its tables.
    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Opens another pool on the database.
    ///
    /// Sources and sinks close their pool on shutdown, so each gets its own.
    pub async fn connect(&self) -> PgPool {
        PgPool::connect_with(self.config.with_db())
            .await
            .expect("Failed to connect to the test database")
    }

    /// Source settings for `table`, polling every 20 milliseconds.
    pub fn source_config(&self, table: &str, page_size: u32) -> SourceConfig {
        SourceConfig {
            connection: self.config.clone(),
            table: table.to_string(),
            poll_interval_ms: 20,
            page_size,
        }
    }

    /// Sink settings for `table`, sharing the source connection.
    pub fn sink_config(&self, table: &str) -> SinkConfig {
        SinkConfig {
            connection: None,
            table: table.to_string(),
        }
    }
}

impl Drop for TestDatabase {
    fn drop(&mut self) {
        let config = self.config.clone();
        tokio::task::block_in_place(move || Handle::current().block_on(drop_database(&config)));
    }
}

/// Terminates the remaining connections to the test database and drops it.
///
/// Failures are only reported, a leftover database does not fail the test.
async fn drop_database(config: &PgConnectionConfig) {
    let mut connection = match PgConnection::connect_with(&config.without_db()).await {
        Ok(connection) => connection,
        Err(err) => {
            warn!(error = %err, "failed to connect to Postgres to drop the test database");
            return;
        }
    };

    let terminate = format!(
        "select pg_terminate_backend(pid) from pg_stat_activity \
         where datname = '{}' and pid <> pg_backend_pid();",
        config.name
    );
    if let Err(err) = connection.execute(&*terminate).await {
        warn!(error = %err, database = config.name, "failed to terminate test database connections");
    }

    if let Err(err) = connection
        .execute(&*format!(r#"drop database if exists "{}";"#, config.name))
        .await
    {
        warn!(error = %err, database = config.name, "failed to drop the test database");
    }
}
