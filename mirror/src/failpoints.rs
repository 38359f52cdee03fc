use fail::fail_point;

use crate::bail;
use crate::error::{ErrorKind, MirrorResult};

/// Triggered after a batch reached the sink and before its checkpoint is saved.
pub const FLUSH__AFTER_SINK_WRITE: &str = "flush.after_sink_write";

/// Triggered before each group upsert of the catch-up sync.
pub const CATCH_UP__BEFORE_UPSERT: &str = "catch_up.before_upsert";

pub fn mirror_fail_point(name: &str) -> MirrorResult<()> {
    fail_point!(name, |parameter| {
        let detail = match parameter {
            Some(parameter) => format!("The failpoint '{name}' returned an error: {parameter}"),
            None => format!("The failpoint '{name}' returned an error"),
        };

        bail!(
            ErrorKind::InjectedFault,
            "An error occurred in a fail point",
            detail
        );
    });

    Ok(())
}
