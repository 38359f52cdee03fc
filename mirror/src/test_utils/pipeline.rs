use mirror_config::shared::{AnonymizationConfig, BatchConfig, CatchUpConfig, PipelineConfig};

use crate::types::PipelineId;

/// Builds a pipeline configuration flushing up to `max_size` records every `interval_ms`.
pub fn test_pipeline_config(
    pipeline_id: PipelineId,
    max_size: usize,
    interval_ms: u64,
) -> PipelineConfig {
    PipelineConfig {
        id: pipeline_id,
        batch: BatchConfig {
            max_size,
            interval_ms,
        },
        max_flush_retries: None,
        catch_up: CatchUpConfig::default(),
        anonymization: AnonymizationConfig::default(),
    }
}

/// Returns a random pipeline id.
pub fn random_pipeline_id() -> PipelineId {
    rand::random()
}
