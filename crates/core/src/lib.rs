//! Mutable value model of the Inox runtime
//!
//! This crate defines the values shared between execution contexts:
//! - Context: identity, permissions, transaction and registries of an execution
//! - Value: tagged union of primitives, resources and containers
//! - Containers: Object, Record, Tuple, Dictionary, List, Array, Set
//! - Watching: watchers, mutation callbacks and depth-limited propagation
//! - Patterns: structural descriptors and migration operations between them
//! - Representations: canonical (IXON) and JSON, plus the parsers reading them
//! - Storage: serialized value storage and loading functions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod constraint;
pub mod containers;
pub mod context;
pub mod error;
pub mod json;
pub mod map;
pub mod migration;
pub mod parser;
pub mod pattern;
pub mod registry;
pub mod repr;
pub mod resource;
pub mod storage;
pub mod value;
pub mod watch;

pub use constraint::{ConstraintId, ConstraintRegistry};
pub use containers::{
    load_set, Array, Dictionary, List, Object, PotentiallySharable, Record, Set, SetConfig, Tuple,
    UniquenessConstraint,
};
pub use context::{Context, ContextConfig, Permission, PermissionEntity, PermissionKind};
pub use error::{Error, Result};
pub use json::{from_json_value, parse_json_repr, to_json_repr, to_json_value};
pub use map::{map, Mapper, Mapping, MappingKey, MappingResult};
pub use migration::{get_migration_operations, MigrationOp};
pub use parser::{IxonParser, JsonParser, ParserRegistry, StatelessParser, IXON_MIME_TYPE, JSON_MIME_TYPE};
pub use pattern::{ListPattern, ObjectPattern, Pattern, PatternKind, SetPattern, UnionPattern};
pub use registry::Registries;
pub use repr::{parse_repr, write_repr};
pub use resource::{Host, HostPattern, Path, PathPattern, Url, UrlPattern};
pub use storage::{
    load_object, InMemoryValueStorage, InstanceLoadArgs, LoadInstanceFn, LoadingRegistry,
    SerializedValueStorage,
};
pub use value::{NativeFunction, Value, ValueKind};
pub use watch::{
    mutation_callback, CallbackHandle, Mutation, MutationCallback, MutationKind, MutationWatcher,
    MutationWatchingConfig, Watchable, WatchingDepth,
};

// Concurrency primitives used in this crate's signatures
pub use inox_concurrency::{IsolationLevel, StateId, Transaction};
