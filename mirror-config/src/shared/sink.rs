use serde::Deserialize;

use crate::shared::{PgConnectionConfig, ValidationError, validate_table_name};

/// Configuration of the sink store receiving anonymized records.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SinkConfig {
    /// Connection to the sink database. When `None`, the source connection is reused.
    #[serde(default)]
    pub connection: Option<PgConnectionConfig>,
    /// Table receiving the anonymized records.
    #[serde(default = "default_sink_table")]
    pub table: String,
}

impl SinkConfig {
    pub const DEFAULT_TABLE: &'static str = "customers_anonymized";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(connection) = &self.connection {
            connection.validate()?;
        }

        validate_table_name(&self.table)
    }
}

fn default_sink_table() -> String {
    SinkConfig::DEFAULT_TABLE.to_string()
}
