use serde::{Deserialize, Serialize};
use std::fmt;

use crate::bail;
use crate::error::{ErrorKind, MirrorError, MirrorResult};

/// Opaque marker of a position in the source insert feed.
///
/// A token is produced by a [`crate::source::Source`] for every insert event and handed back to
/// the same source to resume a subscription after that event. Its content is only meaningful to
/// the source that produced it; the rest of the mirror merely stores and forwards it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResumeToken(String);

impl ResumeToken {
    /// Creates a token, rejecting empty values and non printable ASCII.
    pub fn new(value: impl Into<String>) -> MirrorResult<Self> {
        let value = value.into();

        if value.is_empty() {
            bail!(ErrorKind::InvalidResumeToken, "Resume token is empty");
        }

        if !value.bytes().all(|b| b.is_ascii_graphic()) {
            bail!(
                ErrorKind::InvalidResumeToken,
                "Resume token contains unsupported characters",
                value
            );
        }

        Ok(Self(value))
    }

    /// Wraps a value a source built from its own position encoding, which is always valid.
    pub(crate) fn from_source(value: String) -> Self {
        debug_assert!(!value.is_empty() && value.bytes().all(|b| b.is_ascii_graphic()));
        Self(value)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResumeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for ResumeToken {
    type Error = MirrorError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        ResumeToken::new(value)
    }
}

impl From<ResumeToken> for String {
    fn from(value: ResumeToken) -> Self {
        value.0
    }
}
