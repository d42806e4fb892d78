//! Error types of the database layer

use thiserror::Error;

/// Result type of the database layer
pub type Result<T> = std::result::Result<T, DatabaseError>;

/// Errors raised by database wrappers and backends
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DatabaseError {
    /// Error of the value model
    #[error(transparent)]
    Core(#[from] inox_core::Error),

    /// The owner state of the database has not been set
    #[error("owner state not set")]
    OwnerStateNotSet,

    /// The owner state of the database was already set
    #[error("owner state already set")]
    OwnerStateAlreadySet,

    /// A top-level entity has the name of a database property
    #[error("name collision with initial database property name: {0}")]
    NameCollision(String),

    /// The backend was asked to update its schema after loading its entities
    #[error("top-level entities already loaded")]
    TopLevelEntitiesAlreadyLoaded,

    /// The schema was updated from a context other than the owner
    #[error("database schema can only be updated by owner state")]
    NotOwner,

    /// The database was wrapped without expecting a schema update
    #[error("no database schema update is expected")]
    NoSchemaUpdateExpected,

    /// The schema was already updated
    #[error("database schema already updated or no longer allowed")]
    SchemaAlreadyUpdated,

    /// Entities were accessed before the expected schema update
    #[error("access to database is not allowed because schema is not updated yet")]
    SchemaNotUpdatedYet,

    /// An entry of the next schema has no loading function
    #[error("failed to update schema: pattern of .{0} has no loading function")]
    NoLoadingFunction(String),

    /// A migration object is malformed
    #[error("invalid migration object: {0}")]
    InvalidMigrationObject(String),

    /// A migration operation cannot be applied by the backend
    #[error("unsupported migration operation at {0}")]
    UnsupportedMigration(String),

    /// A migration operation needs a handler that was not provided
    #[error("missing migration handler for {0}")]
    MissingMigrationHandler(String),

    /// Database properties are read-only
    #[error("database properties cannot be set")]
    CannotSetProp,

    /// The property is neither a database property nor a top-level entity
    #[error("property .{0} does not exist")]
    PropertyDoesNotExist(String),

    /// The database is closed
    #[error("database is closed")]
    Closed,

    /// The operation is not supported by the backend
    #[error("not implemented")]
    NotImplemented,

    /// No open function is registered for the scheme
    #[error("no open function registered for scheme {0}")]
    NoOpenFunction(String),

    /// I/O failure of a file-backed backend
    #[error("I/O error: {0}")]
    Io(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl From<std::io::Error> for DatabaseError {
    fn from(e: std::io::Error) -> Self {
        DatabaseError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DatabaseError {
    fn from(e: serde_json::Error) -> Self {
        DatabaseError::Core(inox_core::Error::from(e))
    }
}
