//! Background workers of the continuous pipeline.
//!
//! The feed worker anonymizes insert events and hands them over to the flush worker through an
//! unbounded channel. The flush worker is the only owner of the pending queue and the only
//! writer of the sink and of the checkpoint.

pub mod feed;
pub mod flush;

use tokio::task::JoinError;

use crate::error::{ErrorKind, MirrorError};
use crate::mirror_error;

/// Converts the failure of joining a worker task into a [`MirrorError`].
fn join_error(err: JoinError, panic_kind: ErrorKind, worker: &'static str) -> MirrorError {
    if err.is_cancelled() {
        mirror_error!(
            ErrorKind::WorkerCancelled,
            "Worker was cancelled",
            worker,
            source: err
        )
    } else {
        mirror_error!(panic_kind, "Worker panicked", worker, source: err)
    }
}
