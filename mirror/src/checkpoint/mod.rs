//! Persistence of the last durably mirrored feed position.

mod base;
pub mod file;
pub mod memory;

pub use base::CheckpointStore;
pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
