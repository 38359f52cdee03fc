use serde::Deserialize;

use crate::shared::{
    CheckpointConfig, PgConnectionConfig, PipelineConfig, SinkConfig, SourceConfig,
    ValidationError,
};

/// Complete configuration of the mirror replicator.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking secrets.
#[derive(Debug, Clone, Deserialize)]
pub struct MirrorConfig {
    pub source: SourceConfig,
    pub sink: SinkConfig,
    pub pipeline: PipelineConfig,
    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

impl MirrorConfig {
    /// Validates the complete configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.source.validate()?;
        self.sink.validate()?;
        self.pipeline.validate()?;
        self.checkpoint.validate()?;

        if self.sink.connection.is_none() && self.sink.table == self.source.table {
            return Err(ValidationError::InvalidFieldValue {
                field: "sink.table".to_string(),
                constraint: "must differ from `source.table` when both live in the same database"
                    .to_string(),
            });
        }

        Ok(())
    }

    /// Returns the connection used for the sink, falling back to the source connection.
    pub fn sink_connection(&self) -> &PgConnectionConfig {
        self.sink
            .connection
            .as_ref()
            .unwrap_or(&self.source.connection)
    }
}
