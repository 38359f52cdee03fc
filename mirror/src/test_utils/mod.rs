//! Utilities for testing mirror pipelines.
//!
//! - [`notify`] - notifications with timeouts, so tests waiting for a condition fail instead of
//!   hanging
//! - [`notifying_store`] - checkpoint store recording every save
//! - [`test_sink_wrapper`] - sink wrapper recording every call
//! - [`faults`] - checkpoint store and sink wrappers failing on demand
//! - [`slow_sink`] - sink wrapper delaying inserts and recording their overlap
//! - [`pipeline`] - constructors for test pipelines and configurations
//! - [`failpoints`] - scoped `fail` crate configuration
//! - [`database`] - throwaway Postgres databases for integration tests

pub mod database;
#[cfg(feature = "failpoints")]
pub mod failpoints;
pub mod faults;
pub mod notify;
pub mod notifying_store;
pub mod pipeline;
pub mod slow_sink;
pub mod test_sink_wrapper;
