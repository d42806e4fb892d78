//! Containers of the value model
//!
//! - [`Object`]: sorted properties, identity URL, constraint
//! - [`Record`] and [`Tuple`]: immutable object and sequence
//! - [`Dictionary`]: entries keyed by the representation of their key
//! - [`List`]: sequence backed by a packed or generic store
//! - [`Array`]: fixed-length sequence, cloned instead of shared
//! - [`Set`]: elements deduplicated by a uniqueness key, optionally durable
//!
//! Mutable containers start private. Exposing one to another execution
//! context shares it (see [`PotentiallySharable`]): from then on every access
//! takes its [`SmartLock`].

pub mod array;
pub mod dictionary;
pub mod list;
pub mod object;
pub mod record;
pub mod set;

pub use array::Array;
pub use dictionary::Dictionary;
pub use list::{List, UnderlyingList};
pub use object::{is_index_key, Object, ValMap};
pub use record::{Record, Tuple};
pub use set::{load_set, Set, SetConfig, UniquenessConstraint};

use inox_concurrency::{SmartLock, StateId};

/// Containers that can be promoted to shared
pub trait PotentiallySharable {
    /// Whether the container is shared or every value it holds can be
    /// shared or cloned; the error is the reason it cannot
    fn is_sharable(&self) -> Result<(), String>;

    /// Promote the container to shared, sharing or cloning every value it
    /// holds exactly once
    ///
    /// # Panics
    ///
    /// Panics if a held value cannot be shared: callers check
    /// [`PotentiallySharable::is_sharable`] first.
    fn share(&self, origin: StateId);

    /// Whether the container was promoted
    fn is_shared(&self) -> bool {
        self.smart_lock().is_value_shared()
    }

    /// Lock of the container
    fn smart_lock(&self) -> &SmartLock;
}

/// Check that every value can be shared or cloned
pub(crate) fn check_all_sharable<'a>(
    values: impl IntoIterator<Item = &'a crate::Value>,
) -> Result<(), String> {
    values.into_iter().try_for_each(|v| v.is_sharable())
}

/// Share or clone every value, used by share initializers
pub(crate) fn share_or_clone_all(values: &[crate::Value], origin: StateId) -> Vec<crate::Value> {
    values
        .iter()
        .map(|v| {
            v.share_or_clone(origin)
                .unwrap_or_else(|e| panic!("value held by a sharable container cannot be shared: {e}"))
        })
        .collect()
}
