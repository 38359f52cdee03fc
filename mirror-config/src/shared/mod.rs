//! Shared configuration types for mirror pipelines.

mod base;
mod batch;
mod checkpoint;
mod connection;
mod mirror;
mod pipeline;
mod sink;
mod source;

pub use base::{ValidationError, validate_table_name};
pub use batch::BatchConfig;
pub use checkpoint::CheckpointConfig;
pub use connection::{IntoConnectOptions, PgConnectionConfig, TlsConfig};
pub use mirror::MirrorConfig;
pub use pipeline::{AnonymizationConfig, CatchUpConfig, PipelineConfig};
pub use sink::SinkConfig;
pub use source::SourceConfig;
