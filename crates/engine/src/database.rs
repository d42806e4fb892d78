//! Database wrapper exposed to Inox code
//!
//! [`DatabaseIL`] wraps a storage backend implementing [`Database`] and
//! enforces the schema-update state machine:
//!
//! ```text
//!            wrap(expected_schema_update = false)
//!   ┌───────────────────────────────────────────────┐
//!   │                                               ▼
//! wrap ──► awaiting update ──update_schema──► updated (entities readable)
//!                 │
//!                 └── entity access fails with SchemaNotUpdatedYet
//! ```
//!
//! Only the owner context may update the schema, and only once. Validation
//! failures (missing loading function, migration computation error, invalid
//! migration specification) leave the database updatable. Once the backend
//! has been asked to update, the schema is marked updated even if the
//! backend fails.

use crate::error::{DatabaseError, Result};
use crate::migration_handlers::MigrationHandlers;
use inox_core::{get_migration_operations, Context, ObjectPattern, StateId, Url, Value};
use once_cell::sync::OnceCell;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Name of the property holding the initial schema
pub const SCHEMA_PROP_NAME: &str = "schema";
/// Name of the schema update method
pub const UPDATE_SCHEMA_PROP_NAME: &str = "update_schema";
/// Name of the close method
pub const CLOSE_PROP_NAME: &str = "close";

/// Properties every database has, in this order
pub const DATABASE_PROPNAMES: [&str; 3] = [UPDATE_SCHEMA_PROP_NAME, CLOSE_PROP_NAME, SCHEMA_PROP_NAME];

/// Storage backend of a database
pub trait Database: Send + Sync {
    /// Resource identifying the database (`ldb://main/`)
    fn resource(&self) -> Url;

    /// Current schema
    fn schema(&self) -> ObjectPattern;

    /// Update the schema and migrate the stored content
    ///
    /// Must fail with [`DatabaseError::TopLevelEntitiesAlreadyLoaded`] once
    /// [`Database::top_level_entities`] has been called. Every entry pattern
    /// of `schema` has a loading function.
    fn update_schema(&self, ctx: &Context, schema: &ObjectPattern, handlers: &MigrationHandlers) -> Result<()>;

    /// Top-level entities, keyed by schema entry name
    fn top_level_entities(&self, ctx: &Context) -> Result<BTreeMap<String, Value>>;

    /// Close the database
    fn close(&self, ctx: &Context) -> Result<()>;
}

/// Arguments of [`DatabaseIL::wrap`]
pub struct DatabaseWrappingArgs {
    /// Storage backend
    pub inner: Arc<dyn Database>,
    /// Owner state, can be set later with [`DatabaseIL::set_owner_state_once`]
    pub owner_state: Option<StateId>,
    /// Whether the owner is expected to update the schema before use
    pub expected_schema_update: bool,
}

/// Property of a database
#[derive(Debug, Clone)]
pub enum DatabaseProperty {
    /// The initial schema
    Schema(ObjectPattern),
    /// The schema update method
    UpdateSchema,
    /// The close method
    Close,
    /// A top-level entity
    Entity(Value),
}

/// Database as seen by Inox code
pub struct DatabaseIL {
    inner: Arc<dyn Database>,
    initial_schema: ObjectPattern,
    schema_update_expected: bool,
    schema_updated: AtomicBool,
    schema_update_lock: Mutex<()>,
    owner_state: OnceCell<StateId>,
    property_names: Vec<String>,
    top_level_entities: RwLock<BTreeMap<String, Value>>,
}

impl fmt::Debug for DatabaseIL {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseIL")
            .field("resource", &self.inner.resource())
            .field("schema_update_expected", &self.schema_update_expected)
            .field("schema_updated", &self.schema_updated.load(Ordering::Acquire))
            .field("owner_state", &self.owner_state.get())
            .finish()
    }
}

impl DatabaseIL {
    /// Wrap a backend
    ///
    /// Entities are loaded immediately when no schema update is expected.
    pub fn wrap(ctx: &Context, args: DatabaseWrappingArgs) -> Result<Self> {
        let schema = args.inner.schema();

        let mut property_names: Vec<String> = DATABASE_PROPNAMES.iter().map(|s| s.to_string()).collect();
        let mut collision = None;
        schema.for_each_entry(|name, _, _| {
            if DATABASE_PROPNAMES.contains(&name) {
                collision.get_or_insert_with(|| name.to_string());
            } else {
                property_names.push(name.to_string());
            }
            Ok(())
        })?;
        if let Some(name) = collision {
            return Err(DatabaseError::NameCollision(name));
        }

        let top_level_entities = if args.expected_schema_update {
            BTreeMap::new()
        } else {
            args.inner.top_level_entities(ctx)?
        };

        let owner_state = OnceCell::new();
        if let Some(owner) = args.owner_state {
            let _ = owner_state.set(owner);
        }

        debug!(
            resource = %args.inner.resource(),
            expected_schema_update = args.expected_schema_update,
            "database wrapped"
        );
        Ok(DatabaseIL {
            inner: args.inner,
            initial_schema: schema,
            schema_update_expected: args.expected_schema_update,
            schema_updated: AtomicBool::new(false),
            schema_update_lock: Mutex::new(()),
            owner_state,
            property_names,
            top_level_entities: RwLock::new(top_level_entities),
        })
    }

    /// Set the owner state, fails if it is already set
    pub fn set_owner_state_once(&self, owner: StateId) -> Result<()> {
        self.owner_state
            .set(owner)
            .map_err(|_| DatabaseError::OwnerStateAlreadySet)
    }

    /// Owner state, if set
    pub fn owner_state(&self) -> Option<StateId> {
        self.owner_state.get().copied()
    }

    fn check_owner_set(&self) -> Result<StateId> {
        self.owner_state().ok_or(DatabaseError::OwnerStateNotSet)
    }

    /// Resource of the backend
    pub fn resource(&self) -> Url {
        self.inner.resource()
    }

    /// Schema the database was wrapped with
    pub fn initial_schema(&self) -> &ObjectPattern {
        &self.initial_schema
    }

    /// Whether the schema was updated
    pub fn is_schema_updated(&self) -> bool {
        self.schema_updated.load(Ordering::Acquire)
    }

    /// Update the schema to `next`
    ///
    /// `migrations` must hold exactly one specification when the schemas
    /// differ.
    ///
    /// # Panics
    ///
    /// Panics if the schemas differ and `migrations` does not hold exactly
    /// one specification.
    pub fn update_schema(&self, ctx: &Context, next: &ObjectPattern, migrations: &[MigrationHandlers]) -> Result<()> {
        let owner = self.check_owner_set()?;
        if !self.schema_update_expected {
            return Err(DatabaseError::NoSchemaUpdateExpected);
        }
        if ctx.state_id() != owner {
            return Err(DatabaseError::NotOwner);
        }

        let _update = self.schema_update_lock.lock();
        if self.is_schema_updated() {
            return Err(DatabaseError::SchemaAlreadyUpdated);
        }

        let loading = ctx.registries().loading();
        let mut missing = None;
        next.for_each_entry(|name, pattern, _| {
            if missing.is_none() && !loading.has_loading_function(pattern) {
                missing = Some(name.to_string());
            }
            Ok(())
        })?;
        if let Some(name) = missing {
            return Err(DatabaseError::NoLoadingFunction(name));
        }

        let current = inox_core::Pattern::Object(self.initial_schema.clone());
        let next_pattern = inox_core::Pattern::Object(next.clone());
        let ops = get_migration_operations(ctx, &current, &next_pattern, "/")?;

        let empty = MigrationHandlers::default();
        let handlers = if ops.is_empty() {
            &empty
        } else {
            assert!(
                migrations.len() == 1,
                "exactly one migration specification is expected when the schema changes, got {}",
                migrations.len()
            );
            &migrations[0]
        };

        self.schema_updated.store(true, Ordering::Release);
        info!(resource = %self.inner.resource(), ops = ops.len(), "updating database schema");

        if let Err(e) = self.inner.update_schema(ctx, next, handlers) {
            warn!(resource = %self.inner.resource(), error = %e, "backend failed to update schema");
            return Err(e);
        }
        *self.top_level_entities.write() = self.inner.top_level_entities(ctx)?;
        Ok(())
    }

    /// Close the backend
    pub fn close(&self, ctx: &Context) -> Result<()> {
        self.check_owner_set()?;
        self.inner.close(ctx)
    }

    /// Property `name`
    ///
    /// `schema` is always the initial schema. Top-level entities are only
    /// readable once the expected schema update is done.
    pub fn prop(&self, _ctx: &Context, name: &str) -> Result<DatabaseProperty> {
        self.check_owner_set()?;
        match name {
            SCHEMA_PROP_NAME => Ok(DatabaseProperty::Schema(self.initial_schema.clone())),
            UPDATE_SCHEMA_PROP_NAME => Ok(DatabaseProperty::UpdateSchema),
            CLOSE_PROP_NAME => Ok(DatabaseProperty::Close),
            _ => {
                if self.schema_update_expected && !self.is_schema_updated() {
                    return Err(DatabaseError::SchemaNotUpdatedYet);
                }
                self.top_level_entities
                    .read()
                    .get(name)
                    .cloned()
                    .map(DatabaseProperty::Entity)
                    .ok_or_else(|| DatabaseError::PropertyDoesNotExist(name.to_string()))
            }
        }
    }

    /// Database properties followed by the entries of the initial schema
    pub fn property_names(&self) -> &[String] {
        &self.property_names
    }

    /// Database properties cannot be set
    pub fn set_prop(&self, _ctx: &Context, _name: &str, _value: Value) -> Result<()> {
        Err(DatabaseError::CannotSetProp)
    }
}

/// Backend standing in for a database that could not be opened
#[derive(Debug, Clone)]
pub struct FailedToOpenDatabase {
    resource: Url,
}

impl FailedToOpenDatabase {
    /// Create a placeholder for `resource`
    pub fn new(resource: Url) -> Self {
        FailedToOpenDatabase { resource }
    }
}

impl Database for FailedToOpenDatabase {
    fn resource(&self) -> Url {
        self.resource.clone()
    }

    fn schema(&self) -> ObjectPattern {
        ObjectPattern::inexact(Vec::<(String, inox_core::Pattern)>::new())
    }

    fn update_schema(&self, _ctx: &Context, _schema: &ObjectPattern, _handlers: &MigrationHandlers) -> Result<()> {
        Err(DatabaseError::NotImplemented)
    }

    fn top_level_entities(&self, _ctx: &Context) -> Result<BTreeMap<String, Value>> {
        Ok(BTreeMap::new())
    }

    fn close(&self, _ctx: &Context) -> Result<()> {
        Err(DatabaseError::NotImplemented)
    }
}
