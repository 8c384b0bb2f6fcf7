//! Registry error taxonomy.

use bastion_core::ValidationError;
use bastion_core::db::DatabaseError;

/// Result type alias for registry operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors returned by the machine store and the registry facade.
///
/// Each variant maps to one stable status category at the HTTP boundary.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// Malformed name, owner, local user or public key.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A machine with this name already exists.
    #[error("machine {0:?} already registered")]
    NameConflict(String),

    /// No machine with this name exists.
    #[error("machine {0:?} not found")]
    NotFound(String),

    /// Every port in the pool is assigned.
    #[error("no available ports (all {capacity} slots in use)")]
    PoolExhausted { capacity: usize },

    /// Underlying persistence failure. Never shown verbatim to clients.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DatabaseError> for RegistryError {
    fn from(e: DatabaseError) -> Self {
        Self::Storage(e.to_string())
    }
}

impl From<sqlx::Error> for RegistryError {
    fn from(e: sqlx::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
