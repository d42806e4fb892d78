//! Migration operations between two patterns
//!
//! [`get_migration_operations`] compares the current and next pattern of a
//! stored value and lists the operations a storage backend must apply to
//! migrate the value. Entries are visited in name order so the result is
//! reproducible.
//!
//! | Current entry | Next entry | Operation |
//! |---------------|------------|-----------|
//! | present | absent | `Removal` |
//! | absent | present | `Inclusion` |
//! | optional | required, same pattern | `Initialization` |
//! | object/set/list | same kind | recursion |
//! | any other difference | | `Replacement` |

use crate::context::Context;
use crate::error::Result;
use crate::pattern::{ListPattern, ObjectPattern, Pattern};
use std::collections::BTreeSet;
use std::fmt;
use tracing::debug;

/// One step of a migration
#[derive(Debug, Clone, PartialEq)]
pub enum MigrationOp {
    /// The value at the path is no longer part of the schema
    Removal {
        /// Pattern of the removed value
        value: Pattern,
        /// Location in the schema
        pseudo_path: String,
    },
    /// The value at the path must be replaced by a value matching `next`
    Replacement {
        /// Current pattern
        current: Pattern,
        /// Next pattern
        next: Pattern,
        /// Location in the schema
        pseudo_path: String,
    },
    /// A new value is part of the schema
    Inclusion {
        /// Pattern of the new value
        value: Pattern,
        /// Whether the new entry is optional
        optional: bool,
        /// Location in the schema
        pseudo_path: String,
    },
    /// An optional value became required and must be initialized where missing
    Initialization {
        /// Pattern of the value
        value: Pattern,
        /// Location in the schema
        pseudo_path: String,
    },
}

impl MigrationOp {
    /// Location of the operation in the schema (`/users`, `/users/*/name`)
    pub fn pseudo_path(&self) -> &str {
        match self {
            MigrationOp::Removal { pseudo_path, .. }
            | MigrationOp::Replacement { pseudo_path, .. }
            | MigrationOp::Inclusion { pseudo_path, .. }
            | MigrationOp::Initialization { pseudo_path, .. } => pseudo_path,
        }
    }

    /// Name of the operation kind
    pub fn kind_name(&self) -> &'static str {
        match self {
            MigrationOp::Removal { .. } => "removal",
            MigrationOp::Replacement { .. } => "replacement",
            MigrationOp::Inclusion { .. } => "inclusion",
            MigrationOp::Initialization { .. } => "initialization",
        }
    }
}

impl fmt::Display for MigrationOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.kind_name(), self.pseudo_path())
    }
}

/// Join a pseudo path and an entry name
pub fn join_pseudo_path(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{base}{name}")
    } else {
        format!("{base}/{name}")
    }
}

/// Operations migrating values matching `current` to values matching `next`
pub fn get_migration_operations(
    ctx: &Context,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
) -> Result<Vec<MigrationOp>> {
    let mut ops = Vec::new();
    collect_operations(ctx, current, next, pseudo_path, &mut ops)?;
    debug!(pseudo_path, ops = ops.len(), "migration operations computed");
    Ok(ops)
}

fn collect_operations(
    ctx: &Context,
    current: &Pattern,
    next: &Pattern,
    pseudo_path: &str,
    ops: &mut Vec<MigrationOp>,
) -> Result<()> {
    if current == next {
        return Ok(());
    }
    match (current, next) {
        (Pattern::Object(a), Pattern::Object(b)) | (Pattern::Record(a), Pattern::Record(b)) => {
            collect_entry_operations(ctx, a, b, pseudo_path, ops)
        }
        (Pattern::Set(a), Pattern::Set(b)) if a.uniqueness() == b.uniqueness() => collect_operations(
            ctx,
            a.element(),
            b.element(),
            &join_pseudo_path(pseudo_path, "*"),
            ops,
        ),
        (Pattern::List(ListPattern::Of(a)), Pattern::List(ListPattern::Of(b))) => {
            collect_operations(ctx, a, b, &join_pseudo_path(pseudo_path, "*"), ops)
        }
        _ => {
            ops.push(MigrationOp::Replacement {
                current: current.clone(),
                next: next.clone(),
                pseudo_path: pseudo_path.to_string(),
            });
            Ok(())
        }
    }
}

fn collect_entry_operations(
    ctx: &Context,
    current: &ObjectPattern,
    next: &ObjectPattern,
    pseudo_path: &str,
    ops: &mut Vec<MigrationOp>,
) -> Result<()> {
    let mut names = BTreeSet::new();
    current.for_each_entry(|name, _, _| {
        names.insert(name.to_string());
        Ok(())
    })?;
    next.for_each_entry(|name, _, _| {
        names.insert(name.to_string());
        Ok(())
    })?;

    for name in names {
        let path = join_pseudo_path(pseudo_path, &name);
        match (current.entry(&name), next.entry(&name)) {
            (Some(value), None) => ops.push(MigrationOp::Removal {
                value: value.clone(),
                pseudo_path: path,
            }),
            (None, Some(value)) => ops.push(MigrationOp::Inclusion {
                value: value.clone(),
                optional: next.is_optional(&name),
                pseudo_path: path,
            }),
            (Some(current_value), Some(next_value)) => {
                let becomes_required = current.is_optional(&name) && !next.is_optional(&name);
                if becomes_required && current_value == next_value {
                    ops.push(MigrationOp::Initialization {
                        value: next_value.clone(),
                        pseudo_path: path,
                    });
                } else {
                    collect_operations(ctx, current_value, next_value, &path, ops)?;
                }
            }
            (None, None) => unreachable!("entry {name} listed by neither pattern"),
        }
    }
    Ok(())
}
