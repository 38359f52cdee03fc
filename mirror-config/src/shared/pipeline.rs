use serde::{Deserialize, Serialize};

use crate::shared::{BatchConfig, ValidationError};

/// Parameters of the deterministic anonymization function.
///
/// Changing any of these values changes every pseudonym, so they must stay fixed for the
/// lifetime of a sink.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct AnonymizationConfig {
    /// Length of the generated alphanumeric tokens.
    #[serde(default = "default_token_length")]
    pub token_length: usize,
    /// Value mixed into every per-record seed.
    #[serde(default)]
    pub seed_salt: u64,
}

impl AnonymizationConfig {
    pub const DEFAULT_TOKEN_LENGTH: usize = 8;
}

impl Default for AnonymizationConfig {
    fn default() -> Self {
        Self {
            token_length: default_token_length(),
            seed_salt: 0,
        }
    }
}

fn default_token_length() -> usize {
    AnonymizationConfig::DEFAULT_TOKEN_LENGTH
}

/// Settings of the one-shot catch-up sync.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CatchUpConfig {
    /// Number of records upserted together.
    #[serde(default = "default_group_size")]
    pub group_size: usize,
}

impl CatchUpConfig {
    pub const DEFAULT_GROUP_SIZE: usize = 100;
}

impl Default for CatchUpConfig {
    fn default() -> Self {
        Self {
            group_size: default_group_size(),
        }
    }
}

fn default_group_size() -> usize {
    CatchUpConfig::DEFAULT_GROUP_SIZE
}

/// Configuration of a mirror pipeline, shared by the continuous and catch-up modes.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct PipelineConfig {
    /// Identifier attached to logs and metrics.
    pub id: u64,
    #[serde(default)]
    pub batch: BatchConfig,
    /// Number of consecutive failed flush cycles after which the continuous pipeline gives up.
    ///
    /// Unset by default: failed flushes are retried until the sink and checkpoint recover.
    #[serde(default)]
    pub max_flush_retries: Option<u32>,
    #[serde(default)]
    pub catch_up: CatchUpConfig,
    #[serde(default)]
    pub anonymization: AnonymizationConfig,
}

impl PipelineConfig {
    /// Validates pipeline configuration settings.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.batch.validate()?;

        if self.catch_up.group_size == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.catch_up.group_size".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        if self.max_flush_retries == Some(0) {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.max_flush_retries".to_string(),
                constraint: "must be greater than 0 when set".to_string(),
            });
        }

        if self.anonymization.token_length == 0 {
            return Err(ValidationError::InvalidFieldValue {
                field: "pipeline.anonymization.token_length".to_string(),
                constraint: "must be greater than 0".to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_id_is_required() {
        let config: PipelineConfig = serde_json::from_str(r#"{ "id": 7 }"#).unwrap();

        assert_eq!(config.id, 7);
        assert_eq!(config.batch, BatchConfig::default());
        assert_eq!(config.max_flush_retries, None);
        assert_eq!(config.catch_up.group_size, 100);
        assert_eq!(config.anonymization.token_length, 8);
        assert_eq!(config.anonymization.seed_salt, 0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_token_length_is_rejected() {
        let mut config: PipelineConfig = serde_json::from_str(r#"{ "id": 1 }"#).unwrap();
        config.anonymization.token_length = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_flush_retry_bound_is_rejected() {
        let mut config: PipelineConfig =
            serde_json::from_str(r#"{ "id": 1, "max_flush_retries": 3 }"#).unwrap();
        assert_eq!(config.max_flush_retries, Some(3));
        assert!(config.validate().is_ok());

        config.max_flush_retries = Some(0);
        assert!(config.validate().is_err());
    }
}
