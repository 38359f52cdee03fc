//! Continuous anonymizing mirror of a customer table.
//!
//! A [`pipeline::Pipeline`] follows the insert feed of a [`source::Source`], pseudonymizes every
//! new record with the [`anonymizer::Anonymizer`] and writes batches of anonymized records to a
//! [`sink::Sink`]. After each successful write the position of the last written event is saved
//! to a [`checkpoint::CheckpointStore`], so a restarted pipeline resumes right after it. Records
//! may be written twice after a crash; sinks tolerate such duplicates.
//!
//! [`catch_up::CatchUpSync`] is the one-shot counterpart that reconciles the sink with a full
//! scan of the source.

pub mod anonymizer;
pub mod catch_up;
pub mod checkpoint;
pub mod concurrency;
pub mod error;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod generator;
mod macros;
pub mod metrics;
pub mod pipeline;
mod postgres;
pub mod sink;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod workers;
