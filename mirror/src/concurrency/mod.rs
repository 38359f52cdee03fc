//! Concurrency primitives coordinating the mirror workers.

pub mod shutdown;
