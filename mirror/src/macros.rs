//! Macros for mirror error handling.

/// Builds a [`crate::error::MirrorError`] from a kind and a static description.
///
/// An optional third argument is rendered with [`ToString`] as the error detail, and a trailing
/// `source: err` attaches the underlying error.
///
/// ```ignore
/// mirror_error!(ErrorKind::InvalidResumeToken, "Resume token is empty");
/// mirror_error!(ErrorKind::SinkWriteFailed, "Bulk insert failed", table, source: err);
/// ```
#[macro_export]
macro_rules! mirror_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::MirrorError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::MirrorError::from((
            $kind,
            $desc,
            ::std::string::ToString::to_string(&$detail),
        ))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::mirror_error!($kind, $desc, $detail).with_source($source)
    };
}

/// Returns early with the [`crate::error::MirrorError`] built by [`mirror_error!`] from the same
/// arguments.
#[macro_export]
macro_rules! bail {
    ($($arg:tt)+) => {
        return ::core::result::Result::Err($crate::mirror_error!($($arg)+))
    };
}
