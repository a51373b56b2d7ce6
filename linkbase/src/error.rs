use thiserror::Error;

use crate::id::Id;

#[derive(Error, Debug)]
pub enum LinkbaseError {
    /// Structural problem in a schema definition. Fatal: the database is never built.
    #[error("Schema syntax error: {0}")]
    SchemaSyntax(String),

    #[error("Unique constraint violation: {collection}.by.{index} key {key} is already held by {owner}")]
    UniqueConstraintViolation {
        collection: String,
        index: String,
        key: String,
        owner: Id,
    },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Unknown reference: {collection}/{id}")]
    UnknownReference { collection: String, id: String },

    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    #[error("Property not found: {collection}.{property}")]
    PropertyNotFound { collection: String, property: String },

    #[error("Index not found: {collection}.by.{index}")]
    IndexNotFound { collection: String, index: String },

    #[error("Item not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("Invalid identifier: {0:?}")]
    InvalidId(String),

    #[error("Malformed update log: {0}")]
    UpdateLog(String),

    #[error("Incompatible update log version {remote} (local {local})")]
    VersionMismatch { local: String, remote: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LinkbaseError {
    /// Whether the failed operation left the database untouched and may be retried
    /// with different input.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            LinkbaseError::UniqueConstraintViolation { .. }
                | LinkbaseError::Validation(_)
                | LinkbaseError::UnknownReference { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, LinkbaseError>;
