//! Database layer of the Inox value model
//!
//! This crate wraps storage backends for Inox code:
//! - Database: the [`Database`] backend trait and the [`DatabaseIL`] wrapper
//!   enforcing the one-shot, owner-only schema update
//! - Migration handlers: functions applying the operations computed between
//!   two schemas
//! - Local databases: a backend persisting entities as JSON representations
//! - Open functions: backends keyed by URL scheme
//! - Configuration: `inox.toml`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod database;
pub mod error;
pub mod local;
pub mod migration_handlers;
pub mod registry;

pub use config::{InoxConfig, StorageConfig, CONFIG_FILE_NAME};
pub use database::{
    Database, DatabaseIL, DatabaseProperty, DatabaseWrappingArgs, FailedToOpenDatabase, CLOSE_PROP_NAME,
    DATABASE_PROPNAMES, SCHEMA_PROP_NAME, UPDATE_SCHEMA_PROP_NAME,
};
pub use error::{DatabaseError, Result};
pub use local::{FileValueStorage, LocalDatabase};
pub use migration_handlers::{HandlerKind, MigrationHandlers};
pub use registry::{DbOpenConfiguration, OpenDbFn, OpenDbFnRegistry, LOCAL_DB_SCHEME};
