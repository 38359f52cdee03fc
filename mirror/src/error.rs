//! Error types and result definitions for mirror operations.
//!
//! [`MirrorError`] carries an [`ErrorKind`] classification, a static description, optional
//! dynamic detail, an optional source error, the callsite location and a captured backtrace.
//! Multiple errors (for example from several workers) can be aggregated into a single value.

use std::backtrace::Backtrace;
use std::borrow::Cow;
use std::error;
use std::fmt;
use std::panic::Location;
use std::sync::Arc;

/// Convenient result type for mirror operations using [`MirrorError`] as the error type.
pub type MirrorResult<T> = Result<T, MirrorError>;

/// Detailed payload stored for single [`MirrorError`] instances.
#[derive(Debug, Clone)]
struct ErrorPayload {
    kind: ErrorKind,
    description: Cow<'static, str>,
    detail: Option<Cow<'static, str>>,
    source: Option<Arc<dyn error::Error + Send + Sync>>,
    location: &'static Location<'static>,
    backtrace: Arc<Backtrace>,
}

/// Main error type for mirror operations.
#[derive(Debug, Clone)]
pub struct MirrorError {
    repr: ErrorRepr,
}

#[derive(Debug, Clone)]
enum ErrorRepr {
    /// Single error payload holding rich metadata.
    Single(ErrorPayload),
    /// Multiple aggregated errors, mainly used to report several worker failures at once.
    Many {
        errors: Vec<MirrorError>,
        location: &'static Location<'static>,
    },
}

/// Categories of errors that can occur while mirroring.
#[derive(PartialEq, Eq, Copy, Clone, Debug, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    // Source errors
    SourceConnectionFailed,
    SourceQueryFailed,
    SourceIoError,

    // Sink errors
    SinkConnectionFailed,
    SinkWriteFailed,

    // Checkpoint errors
    CheckpointLoadFailed,
    CheckpointSaveFailed,
    InvalidResumeToken,

    // Database errors not yet attributed to the source or the sink
    DatabaseConnectionFailed,
    DatabaseQueryFailed,

    // Data errors
    InvalidData,
    ConversionError,

    // Configuration errors
    ConfigError,
    ValidationError,

    // IO errors
    IoError,

    // Workflow errors
    InvalidState,
    FeedWorkerPanic,
    FlushWorkerPanic,
    WorkerCancelled,
    CatchUpFailed,

    // Unknown / uncategorized
    Unknown,

    // Error kind returned by fault injection points.
    #[cfg(feature = "failpoints")]
    InjectedFault,
}

impl MirrorError {
    /// Returns the [`ErrorKind`] of this error.
    ///
    /// For aggregated errors, returns the kind of the first error or [`ErrorKind::Unknown`]
    /// if the aggregation is empty.
    pub fn kind(&self) -> ErrorKind {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.kind,
            ErrorRepr::Many { ref errors, .. } => errors
                .first()
                .map(|err| err.kind())
                .unwrap_or(ErrorKind::Unknown),
        }
    }

    /// Returns all [`ErrorKind`]s present in this error, flattened.
    pub fn kinds(&self) -> Vec<ErrorKind> {
        match self.repr {
            ErrorRepr::Single(ref payload) => vec![payload.kind],
            ErrorRepr::Many { ref errors, .. } => {
                errors.iter().flat_map(|err| err.kinds()).collect()
            }
        }
    }

    /// Returns the dynamic detail of the error, or of the first aggregated error having one.
    pub fn detail(&self) -> Option<&str> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.detail.as_deref(),
            ErrorRepr::Many { ref errors, .. } => errors.iter().find_map(|e| e.detail()),
        }
    }

    /// Returns the static description of the error.
    pub fn description(&self) -> &str {
        match self.repr {
            ErrorRepr::Single(ref payload) => &payload.description,
            ErrorRepr::Many { .. } => "Multiple errors occurred",
        }
    }

    /// Returns the aggregated errors, if this error is an aggregation.
    pub fn errors(&self) -> Option<&[MirrorError]> {
        match self.repr {
            ErrorRepr::Single(_) => None,
            ErrorRepr::Many { ref errors, .. } => Some(errors),
        }
    }

    /// Returns the captured backtrace for this error.
    pub fn backtrace(&self) -> Option<&Backtrace> {
        match self.repr {
            ErrorRepr::Single(ref payload) => Some(payload.backtrace.as_ref()),
            ErrorRepr::Many { .. } => None,
        }
    }

    /// Returns the captured callsite location for this error.
    pub fn location(&self) -> &'static Location<'static> {
        match self.repr {
            ErrorRepr::Single(ref payload) => payload.location,
            ErrorRepr::Many { location, .. } => location,
        }
    }

    /// Attaches an originating error and returns the modified instance.
    ///
    /// Has no effect on aggregated errors, which forward their first error as source.
    pub fn with_source<E>(mut self, source: E) -> Self
    where
        E: error::Error + Send + Sync + 'static,
    {
        if let ErrorRepr::Single(ref mut payload) = self.repr {
            payload.source = Some(Arc::new(source));
        }
        self
    }

    #[track_caller]
    fn from_components(
        kind: ErrorKind,
        description: Cow<'static, str>,
        detail: Option<Cow<'static, str>>,
        source: Option<Arc<dyn error::Error + Send + Sync>>,
    ) -> Self {
        MirrorError {
            repr: ErrorRepr::Single(ErrorPayload {
                kind,
                description,
                detail,
                source,
                location: Location::caller(),
                backtrace: Arc::new(Backtrace::capture()),
            }),
        }
    }
}

impl PartialEq for MirrorError {
    fn eq(&self, other: &MirrorError) -> bool {
        match (&self.repr, &other.repr) {
            (ErrorRepr::Single(a), ErrorRepr::Single(b)) => a.kind == b.kind,
            (ErrorRepr::Many { errors: a, .. }, ErrorRepr::Many { errors: b, .. }) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for MirrorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.repr {
            ErrorRepr::Single(payload) => {
                let location = payload.location;
                write!(
                    f,
                    "[{:?}] {} @ {}:{}:{}",
                    payload.kind,
                    payload.description,
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                if let Some(detail) = payload.detail.as_deref() {
                    write!(f, "\n  Detail:")?;
                    for line in detail.lines() {
                        write!(f, "\n    {line}")?;
                    }
                }

                Ok(())
            }
            ErrorRepr::Many { errors, location } => {
                let count = errors.len();
                write!(
                    f,
                    "[Many] {} error{} aggregated @ {}:{}:{}",
                    count,
                    if count == 1 { "" } else { "s" },
                    location.file(),
                    location.line(),
                    location.column()
                )?;

                for (index, error) in errors.iter().enumerate() {
                    let rendered = error.to_string();
                    let mut lines = rendered.lines();
                    match lines.next() {
                        Some(first_line) => write!(f, "\n  {}. {}", index + 1, first_line)?,
                        None => write!(f, "\n  {}.", index + 1)?,
                    }
                    for line in lines {
                        write!(f, "\n     {line}")?;
                    }
                }

                Ok(())
            }
        }
    }
}

impl error::Error for MirrorError {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match &self.repr {
            ErrorRepr::Single(payload) => payload
                .source
                .as_ref()
                .map(|source| source.as_ref() as &(dyn error::Error + 'static)),
            ErrorRepr::Many { errors, .. } => errors
                .first()
                .map(|error| error as &(dyn error::Error + 'static)),
        }
    }
}

/// Creates a [`MirrorError`] from an error kind and static description.
impl From<(ErrorKind, &'static str)> for MirrorError {
    #[track_caller]
    fn from((kind, desc): (ErrorKind, &'static str)) -> MirrorError {
        MirrorError::from_components(kind, Cow::Borrowed(desc), None, None)
    }
}

/// Creates a [`MirrorError`] from an error kind, static description, and dynamic detail.
impl<D> From<(ErrorKind, &'static str, D)> for MirrorError
where
    D: Into<Cow<'static, str>>,
{
    #[track_caller]
    fn from((kind, desc, detail): (ErrorKind, &'static str, D)) -> MirrorError {
        MirrorError::from_components(kind, Cow::Borrowed(desc), Some(detail.into()), None)
    }
}

/// Aggregates a vector of errors.
///
/// A vector holding exactly one error yields that error unchanged.
impl<E> From<Vec<E>> for MirrorError
where
    E: Into<MirrorError>,
{
    #[track_caller]
    fn from(errors: Vec<E>) -> MirrorError {
        let location = Location::caller();
        let mut errors: Vec<MirrorError> = errors.into_iter().map(Into::into).collect();

        if errors.len() == 1
            && let Some(error) = errors.pop()
        {
            return error;
        }

        MirrorError {
            repr: ErrorRepr::Many { errors, location },
        }
    }
}

/// Converts [`std::io::Error`] to [`MirrorError`] with [`ErrorKind::IoError`].
impl From<std::io::Error> for MirrorError {
    #[track_caller]
    fn from(err: std::io::Error) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::IoError,
            Cow::Borrowed("I/O operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`std::num::ParseIntError`] to [`MirrorError`] with [`ErrorKind::ConversionError`].
impl From<std::num::ParseIntError> for MirrorError {
    #[track_caller]
    fn from(err: std::num::ParseIntError) -> MirrorError {
        let detail = err.to_string();
        MirrorError::from_components(
            ErrorKind::ConversionError,
            Cow::Borrowed("Integer parsing failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Converts [`sqlx::Error`] to [`MirrorError`].
///
/// Pool and connection problems map to [`ErrorKind::DatabaseConnectionFailed`], everything
/// else to [`ErrorKind::DatabaseQueryFailed`]. Sources and sinks re-classify these errors
/// where the distinction matters.
impl From<sqlx::Error> for MirrorError {
    #[track_caller]
    fn from(err: sqlx::Error) -> MirrorError {
        let kind = database_error_kind(&err);
        let detail = err.to_string();
        MirrorError::from_components(
            kind,
            Cow::Borrowed("Database operation failed"),
            Some(Cow::Owned(detail)),
            Some(Arc::new(err)),
        )
    }
}

/// Returns the [`ErrorKind`] matching a database error.
pub(crate) fn database_error_kind(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolClosed
        | sqlx::Error::PoolTimedOut => ErrorKind::DatabaseConnectionFailed,
        _ => ErrorKind::DatabaseQueryFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{bail, mirror_error};

    fn failing() -> MirrorResult<()> {
        bail!(
            ErrorKind::SinkWriteFailed,
            "Bulk insert failed",
            format!("{} records rejected", 3)
        );
    }

    #[test]
    fn bail_builds_error_with_detail() {
        let err = failing().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::SinkWriteFailed);
        assert_eq!(err.description(), "Bulk insert failed");
        assert_eq!(err.detail(), Some("3 records rejected"));
        assert!(err.to_string().contains("[SinkWriteFailed] Bulk insert failed"));
    }

    #[test]
    fn aggregation_flattens_kinds_and_unwraps_single_errors() {
        let single: MirrorError = vec![mirror_error!(ErrorKind::IoError, "a")].into();
        assert!(single.errors().is_none());
        assert_eq!(single.kind(), ErrorKind::IoError);

        let many: MirrorError = vec![
            mirror_error!(ErrorKind::SourceIoError, "feed interrupted"),
            mirror_error!(ErrorKind::SinkWriteFailed, "write failed", "detail"),
        ]
        .into();

        assert_eq!(
            many.kinds(),
            vec![ErrorKind::SourceIoError, ErrorKind::SinkWriteFailed]
        );
        assert_eq!(many.detail(), Some("detail"));
        assert!(many.to_string().starts_with("[Many] 2 errors aggregated"));
    }

    #[test]
    fn io_errors_keep_their_source() {
        let err: MirrorError =
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();

        assert_eq!(err.kind(), ErrorKind::IoError);
        assert!(error::Error::source(&err).is_some());
    }
}
