use mirror_config::load_config;
use mirror_config::shared::MirrorConfig;

use crate::error::{ReplicatorError, ReplicatorResult};

/// Loads and validates the replicator configuration.
///
/// Reads the base and environment files from the configuration directory and applies `APP_`
/// environment overrides.
pub fn load_mirror_config() -> ReplicatorResult<MirrorConfig> {
    let config = load_config::<MirrorConfig>().map_err(ReplicatorError::config)?;
    config.validate().map_err(ReplicatorError::config)?;

    Ok(config)
}
