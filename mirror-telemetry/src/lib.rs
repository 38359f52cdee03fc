//! Tracing and metrics initialization shared by the mirror binaries and tests.

pub mod metrics;
pub mod tracing;
