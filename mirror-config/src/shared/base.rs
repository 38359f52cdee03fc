use thiserror::Error;

/// Maximum length of a Postgres identifier.
const MAX_IDENTIFIER_LENGTH: usize = 63;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A field holds a value outside of its allowed range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
    /// TLS is enabled but no trusted root certificates are provided.
    #[error("Invalid TLS config: `trusted_root_certs` must be set when `enabled` is true")]
    MissingTrustedRootCerts,
    /// A table name is empty, too long, or contains unsupported characters.
    #[error("invalid table name `{0}`")]
    InvalidTableName(String),
}

/// Validates that `table` is a plain, unqualified Postgres identifier.
pub fn validate_table_name(table: &str) -> Result<(), ValidationError> {
    let valid = !table.is_empty()
        && table.len() <= MAX_IDENTIFIER_LENGTH
        && table
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && table
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_');

    if !valid {
        return Err(ValidationError::InvalidTableName(table.to_string()));
    }

    Ok(())
}
