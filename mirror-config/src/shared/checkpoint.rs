use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::shared::ValidationError;

/// Location of the persisted resume token.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct CheckpointConfig {
    /// Path of the file holding the last durably mirrored feed position.
    #[serde(default = "default_checkpoint_path")]
    pub path: PathBuf,
}

impl CheckpointConfig {
    /// Default checkpoint file path, relative to the working directory.
    pub const DEFAULT_PATH: &'static str = "./resume_token.txt";

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.path.as_os_str().is_empty() || self.path.file_name().is_none() {
            return Err(ValidationError::InvalidFieldValue {
                field: "checkpoint.path".to_string(),
                constraint: "must point to a file".to_string(),
            });
        }

        Ok(())
    }
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            path: default_checkpoint_path(),
        }
    }
}

fn default_checkpoint_path() -> PathBuf {
    PathBuf::from(CheckpointConfig::DEFAULT_PATH)
}
