use serde::{Deserialize, Serialize};

use crate::shared::ValidationError;

/// Batch processing configuration for the continuous pipeline.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct BatchConfig {
    /// Maximum number of pending items written to the sink in one flush.
    #[serde(default = "default_batch_max_size")]
    pub max_size: usize,
    /// Interval, in milliseconds, between two flush ticks.
    #[serde(default = "default_batch_interval_ms")]
    pub interval_ms: u64,
}

impl BatchConfig {
    /// Default maximum batch size.
    pub const DEFAULT_MAX_SIZE: usize = 1000;

    /// Default flush interval in milliseconds.
    pub const DEFAULT_INTERVAL_MS: u64 = 1000;

    /// Validates batch configuration settings.
    ///
    /// Ensures both the size and the interval are non-zero.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.max_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.interval_ms == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "batch.interval_ms".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_size: default_batch_max_size(),
            interval_ms: default_batch_interval_ms(),
        }
    }
}

fn default_batch_max_size() -> usize {
    BatchConfig::DEFAULT_MAX_SIZE
}

fn default_batch_interval_ms() -> u64 {
    BatchConfig::DEFAULT_INTERVAL_MS
}
