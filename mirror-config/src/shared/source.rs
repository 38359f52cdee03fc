use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError, validate_table_name};

/// Configuration of the source store holding the original customer records.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SourceConfig {
    pub connection: PgConnectionConfig,
    /// Table holding the original customer records.
    #[serde(default = "default_source_table")]
    pub table: String,
    /// Delay between two polls of the insert feed when no new record was found.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Maximum number of records fetched by a single feed poll or scan page.
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl SourceConfig {
    pub const DEFAULT_TABLE: &'static str = "customers";

    pub const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

    pub const DEFAULT_PAGE_SIZE: u32 = 1000;

    pub fn validate(&self) -> Result<(), ValidationError> {
        self.connection.validate()?;
        validate_table_name(&self.table)?;

        if self.poll_interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.poll_interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.page_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "source.page_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

fn default_source_table() -> String {
    SourceConfig::DEFAULT_TABLE.to_string()
}

fn default_poll_interval_ms() -> u64 {
    SourceConfig::DEFAULT_POLL_INTERVAL_MS
}

fn default_page_size() -> u32 {
    SourceConfig::DEFAULT_PAGE_SIZE
}
