//! Inox - mutable value model with shared containers and databases
//!
//! Inox values are plain data (integers, strings, paths, URLs) and mutable
//! containers (objects, records, lists, sets, dictionaries). Containers can
//! be shared between execution contexts, watched for mutations and stored
//! in databases whose schema is a pattern.
//!
//! # Quick Start
//!
//! ```ignore
//! use inox::{Context, ContextConfig, Object, Value};
//!
//! let ctx = Context::new(ContextConfig::default());
//! let user = Object::from_entries([("name", Value::from("alice"))])?;
//! user.set_prop(&ctx, "name", Value::from("bob"))?;
//! assert_eq!(user.prop(&ctx, "name")?, Value::from("bob"));
//! ```
//!
//! # Architecture
//!
//! - `inox-concurrency`: smart locks and transaction isolation
//! - `inox-core`: values, containers, patterns, representations and registries
//! - `inox-engine`: the database wrapper, local databases and configuration

pub use inox_concurrency::{CancellationToken, ConcurrencyError, SmartLock, TransactionIsolator};

pub use inox_core::*;
pub use inox_engine::{
    Database, DatabaseError, DatabaseIL, DatabaseWrappingArgs, DbOpenConfiguration, InoxConfig,
    LocalDatabase, MigrationHandlers, OpenDbFnRegistry,
};
