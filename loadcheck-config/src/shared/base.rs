use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// At least one table must be monitored.
    #[error("`tables` cannot be empty")]
    NoTables,
    /// Two tables share the same name.
    #[error("table `{0}` is configured more than once")]
    DuplicateTable(String),
    /// A field holds a value outside of its accepted range.
    #[error("invalid value for `{field}`: {constraint}")]
    InvalidFieldValue { field: String, constraint: String },
}
