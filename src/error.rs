//! Error types shared by every store component.

/// Errors raised by the schema model, the index compilers, the key codec
/// and the stores that execute their statements.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A referenced attribute, index or schema does not exist or does not fit.
    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A query cannot be compiled against the target index.
    #[error("Query validation failed: {0}")]
    QueryValidation(String),

    /// The backend rejected an index write because of a unique constraint.
    #[error("Uniqueness conflict: type={type_name}, index={index}")]
    UniquenessConflict { type_name: String, index: String },

    /// A unique index returned more than one row.
    #[error("Consistency violation: {0}")]
    ConsistencyViolation(String),

    #[error("Invalid cursor: {0}")]
    InvalidCursor(String),

    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// The type was never registered with the type authority.
    #[error("Unknown type: {0}")]
    UnknownType(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Query build error: {0}")]
    QueryBuild(#[from] sea_query::error::Error),

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, StoreError>;
