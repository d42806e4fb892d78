//! Open-database functions keyed by URL scheme
//!
//! A registry is built once at process start (or per test) and passed to
//! whoever opens databases; [`OpenDbFnRegistry::with_defaults`] registers
//! the `ldb` scheme served by [`LocalDatabase`].

use crate::config::InoxConfig;
use crate::database::Database;
use crate::error::{DatabaseError, Result};
use crate::local::LocalDatabase;
use dashmap::DashMap;
use inox_core::{Context, InMemoryValueStorage, ObjectPattern, Pattern, Url, Value};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Scheme of local databases
pub const LOCAL_DB_SCHEME: &str = "ldb";

/// What to open
#[derive(Debug, Clone)]
pub struct DbOpenConfiguration {
    /// Resource of the database (`ldb://main/`)
    pub resource: Url,
    /// Backend-specific data locating the database, `nil` when there is none
    pub resolution_data: Value,
    /// Whether the opener has full access
    pub full_access: bool,
}

impl DbOpenConfiguration {
    /// Open configuration of `resource` located by the `[storage]` section
    /// of `config`
    pub fn from_config(resource: Url, config: &InoxConfig) -> Self {
        let resolution_data = match &config.storage.path {
            Some(path) => Value::Str(path.display().to_string()),
            None => Value::Nil,
        };
        DbOpenConfiguration {
            resource,
            resolution_data,
            full_access: true,
        }
    }
}

/// Function opening a database
pub type OpenDbFn = dyn Fn(&Context, DbOpenConfiguration) -> Result<Arc<dyn Database>> + Send + Sync;

/// Open-database functions keyed by scheme
#[derive(Default)]
pub struct OpenDbFnRegistry {
    functions: DashMap<String, Arc<OpenDbFn>>,
}

impl fmt::Debug for OpenDbFnRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut schemes: Vec<String> = self.functions.iter().map(|e| e.key().clone()).collect();
        schemes.sort();
        f.debug_struct("OpenDbFnRegistry").field("schemes", &schemes).finish()
    }
}

impl OpenDbFnRegistry {
    /// Registry with the `ldb` scheme
    pub fn with_defaults() -> Self {
        let registry = Self::default();
        registry.register(LOCAL_DB_SCHEME, Arc::new(open_local_database));
        registry
    }

    /// Register the open function of `scheme`
    ///
    /// # Panics
    ///
    /// Panics if a function is already registered for `scheme`.
    pub fn register(&self, scheme: &str, f: Arc<OpenDbFn>) {
        if self.functions.contains_key(scheme) {
            panic!("non unique open DB function registration for scheme {scheme}");
        }
        self.functions.insert(scheme.to_string(), f);
        debug!(scheme, "open DB function registered");
    }

    /// Open function of `scheme`
    pub fn get(&self, scheme: &str) -> Option<Arc<OpenDbFn>> {
        self.functions.get(scheme).map(|f| Arc::clone(f.value()))
    }

    /// Open the database described by `config` with the function of its scheme
    pub fn open(&self, ctx: &Context, config: DbOpenConfiguration) -> Result<Arc<dyn Database>> {
        let scheme = config.resource.scheme().as_str().to_string();
        let f = self
            .get(&scheme)
            .ok_or(DatabaseError::NoOpenFunction(scheme))?;
        f(ctx, config)
    }
}

/// Open a local database: `resolution_data` is the path of its snapshot
/// file, or `nil` for an in-memory database. The database starts with an
/// empty inexact schema.
fn open_local_database(_ctx: &Context, config: DbOpenConfiguration) -> Result<Arc<dyn Database>> {
    let schema = ObjectPattern::inexact(Vec::<(String, Pattern)>::new());
    let db = match &config.resolution_data {
        Value::Nil => LocalDatabase::new(schema, Arc::new(InMemoryValueStorage::new(config.resource))),
        Value::Path(path) => LocalDatabase::open_file(config.resource, schema, path.as_str())?,
        Value::Str(path) => LocalDatabase::open_file(config.resource, schema, path.as_str())?,
        other => {
            return Err(DatabaseError::Config(format!(
                "invalid resolution data for a local database: {}",
                other.kind()
            )))
        }
    };
    Ok(Arc::new(db))
}
