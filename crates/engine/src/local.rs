//! Storage-backed database
//!
//! [`LocalDatabase`] stores each top-level entity as the JSON representation
//! of its value at `/<entry name>` in a [`SerializedValueStorage`], and
//! materializes entities with the loading functions of the context's
//! registries.
//!
//! [`FileValueStorage`] keeps the serialized values in memory and snapshots
//! them to a JSON file on [`FileValueStorage::flush`] and when the database
//! is closed.

use crate::database::Database;
use crate::error::{DatabaseError, Result};
use crate::migration_handlers::MigrationHandlers;
use inox_core::{
    get_migration_operations, parse_json_repr, to_json_repr, Context, InstanceLoadArgs, MigrationOp,
    ObjectPattern, Path, Pattern, SerializedValueStorage, Url, Value,
};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

// ============================================================================
// File storage
// ============================================================================

/// Serialized values snapshotted to a JSON file
pub struct FileValueStorage {
    base_url: Url,
    file: PathBuf,
    values: DashMap<String, String>,
    flush_lock: Mutex<()>,
}

impl fmt::Debug for FileValueStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileValueStorage")
            .field("base_url", &self.base_url)
            .field("file", &self.file)
            .field("values", &self.values.len())
            .finish()
    }
}

impl FileValueStorage {
    /// Open the snapshot at `file`, a missing file gives an empty storage
    pub fn open(base_url: Url, file: impl Into<PathBuf>) -> Result<Self> {
        let file = file.into();
        let values = DashMap::new();
        if file.exists() {
            let content = std::fs::read_to_string(&file)?;
            let snapshot: BTreeMap<String, String> = serde_json::from_str(&content)?;
            for (key, value) in snapshot {
                values.insert(key, value);
            }
            debug!(file = %file.display(), values = values.len(), "snapshot loaded");
        }
        Ok(FileValueStorage {
            base_url,
            file,
            values,
            flush_lock: Mutex::new(()),
        })
    }

    /// Snapshot file
    pub fn file(&self) -> &FsPath {
        &self.file
    }

    /// Write every value to the snapshot file
    pub fn flush(&self) -> Result<()> {
        let _flush = self.flush_lock.lock();
        let snapshot: BTreeMap<String, String> = self
            .values
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();
        let content = serde_json::to_string_pretty(&snapshot)?;
        let tmp = self.file.with_extension("tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.file)?;
        debug!(file = %self.file.display(), values = snapshot.len(), "snapshot written");
        Ok(())
    }
}

impl SerializedValueStorage for FileValueStorage {
    fn base_url(&self) -> Url {
        self.base_url.clone()
    }

    fn get_serialized(&self, _ctx: &Context, key: &Path) -> inox_core::Result<Option<String>> {
        Ok(self.values.get(key.as_str()).map(|v| v.value().clone()))
    }

    fn set_serialized(&self, _ctx: &Context, key: &Path, serialized: &str) -> inox_core::Result<()> {
        self.values.insert(key.to_string(), serialized.to_string());
        Ok(())
    }
}

// ============================================================================
// Local database
// ============================================================================

/// Database whose top-level entities live in a serialized value storage
pub struct LocalDatabase {
    resource: Url,
    schema: RwLock<ObjectPattern>,
    storage: Arc<dyn SerializedValueStorage>,
    file: Option<Arc<FileValueStorage>>,
    entities: Mutex<Option<BTreeMap<String, Value>>>,
    closed: AtomicBool,
}

impl fmt::Debug for LocalDatabase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalDatabase")
            .field("resource", &self.resource)
            .field("entities_loaded", &self.entities.lock().is_some())
            .field("closed", &self.closed.load(Ordering::Acquire))
            .finish()
    }
}

impl LocalDatabase {
    /// Database over `storage`, its resource is the storage's base URL
    pub fn new(schema: ObjectPattern, storage: Arc<dyn SerializedValueStorage>) -> Self {
        LocalDatabase {
            resource: storage.base_url(),
            schema: RwLock::new(schema),
            storage,
            file: None,
            entities: Mutex::new(None),
            closed: AtomicBool::new(false),
        }
    }

    /// Database snapshotted to `file`
    pub fn open_file(resource: Url, schema: ObjectPattern, file: impl Into<PathBuf>) -> Result<Self> {
        let storage = Arc::new(FileValueStorage::open(resource, file)?);
        let mut db = Self::new(schema, Arc::clone(&storage) as Arc<dyn SerializedValueStorage>);
        db.file = Some(storage);
        Ok(db)
    }

    /// Storage holding the serialized entities
    pub fn storage(&self) -> &Arc<dyn SerializedValueStorage> {
        &self.storage
    }

    fn check_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DatabaseError::Closed);
        }
        Ok(())
    }

    fn entity_key(name: &str) -> Result<Path> {
        Ok(Path::new(format!("/{name}"))?)
    }

    fn read_entity(&self, ctx: &Context, name: &str, pattern: &Pattern) -> Result<Option<Value>> {
        match self.storage.get_serialized(ctx, &Self::entity_key(name)?)? {
            Some(data) => Ok(Some(parse_json_repr(ctx, &data, Some(pattern))?)),
            None => Ok(None),
        }
    }

    fn write_entity(&self, ctx: &Context, name: &str, pattern: &Pattern, value: &Value) -> Result<()> {
        let data = to_json_repr(ctx, value, Some(pattern))?;
        self.storage.set_serialized(ctx, &Self::entity_key(name)?, &data)?;
        Ok(())
    }

    /// Apply one top-level operation
    fn apply(&self, ctx: &Context, op: &MigrationOp, current: &ObjectPattern, handlers: &MigrationHandlers) -> Result<()> {
        let pseudo_path = op.pseudo_path();
        let name = match pseudo_path.strip_prefix('/') {
            Some(name) if !name.is_empty() && !name.contains('/') => name,
            _ => return Err(DatabaseError::UnsupportedMigration(pseudo_path.to_string())),
        };
        let handler = handlers.handler_for(op);

        match op {
            MigrationOp::Removal { value, .. } => {
                if let (Some(handler), Some(previous)) = (handler, self.read_entity(ctx, name, value)?) {
                    handler.call(ctx, &[previous])?;
                }
            }
            MigrationOp::Inclusion { value, .. } | MigrationOp::Initialization { value, .. } => {
                let exists = self.storage.get_serialized(ctx, &Self::entity_key(name)?)?.is_some();
                if let (Some(handler), false) = (handler, exists) {
                    let initial = handler.call(ctx, &[])?;
                    self.write_entity(ctx, name, value, &initial)?;
                }
            }
            MigrationOp::Replacement { next, .. } => {
                let previous_pattern = current
                    .entry(name)
                    .ok_or_else(|| DatabaseError::UnsupportedMigration(pseudo_path.to_string()))?;
                if let Some(previous) = self.read_entity(ctx, name, previous_pattern)? {
                    let handler =
                        handler.ok_or_else(|| DatabaseError::MissingMigrationHandler(op.to_string()))?;
                    let replaced = handler.call(ctx, &[previous])?;
                    self.write_entity(ctx, name, next, &replaced)?;
                }
            }
        }
        debug!(op = %op, "migration operation applied");
        Ok(())
    }
}

impl Database for LocalDatabase {
    fn resource(&self) -> Url {
        self.resource.clone()
    }

    fn schema(&self) -> ObjectPattern {
        self.schema.read().clone()
    }

    fn update_schema(&self, ctx: &Context, schema: &ObjectPattern, handlers: &MigrationHandlers) -> Result<()> {
        self.check_open()?;
        if self.entities.lock().is_some() {
            return Err(DatabaseError::TopLevelEntitiesAlreadyLoaded);
        }

        let current = self.schema();
        let ops = get_migration_operations(
            ctx,
            &Pattern::Object(current.clone()),
            &Pattern::Object(schema.clone()),
            "/",
        )?;
        for op in &ops {
            self.apply(ctx, op, &current, handlers)?;
        }
        *self.schema.write() = schema.clone();
        info!(resource = %self.resource, ops = ops.len(), "schema updated");
        Ok(())
    }

    fn top_level_entities(&self, ctx: &Context) -> Result<BTreeMap<String, Value>> {
        self.check_open()?;
        let mut entities = self.entities.lock();
        if let Some(entities) = entities.as_ref() {
            return Ok(entities.clone());
        }

        let schema = self.schema();
        let loading = ctx.registries().loading();
        let mut loaded = BTreeMap::new();
        let mut entries = Vec::new();
        schema.for_each_entry(|name, pattern, optional| {
            entries.push((name.to_string(), pattern.clone(), optional));
            Ok(())
        })?;
        for (name, pattern, optional) in entries {
            let key = Self::entity_key(&name)?;
            if optional && self.storage.get_serialized(ctx, &key)?.is_none() {
                continue;
            }
            let value = loading.load(
                ctx,
                InstanceLoadArgs {
                    key,
                    pattern,
                    storage: Arc::clone(&self.storage),
                    allow_missing: true,
                },
            )?;
            loaded.insert(name, value);
        }
        debug!(resource = %self.resource, entities = loaded.len(), "top-level entities loaded");
        *entities = Some(loaded.clone());
        Ok(loaded)
    }

    fn close(&self, _ctx: &Context) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Some(file) = &self.file {
            if let Err(e) = file.flush() {
                warn!(file = %file.file().display(), error = %e, "failed to write snapshot on close");
                return Err(e);
            }
        }
        info!(resource = %self.resource, "database closed");
        Ok(())
    }
}
