//! Sources of customer records: an ordered insert feed plus a full scan.

mod base;
pub mod memory;
pub mod postgres;

pub use base::{InsertEventStream, RecordStream, Source};
pub use memory::MemorySource;
pub use postgres::PostgresSource;
