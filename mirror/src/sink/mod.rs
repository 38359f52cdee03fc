//! Sinks receiving anonymized records.

mod base;
pub mod memory;
pub mod postgres;

pub use base::{InsertOutcome, Sink};
pub use memory::MemorySink;
pub use postgres::PostgresSink;
