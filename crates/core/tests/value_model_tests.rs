//! Multi-context tests for inox-core
//!
//! These tests drive containers from several execution contexts:
//!
//! 1. **Sharing** - shared containers accept concurrent writers
//! 2. **Transactions** - a value is held by one transaction at a time
//! 3. **Watching** - mutations reach watchers of enclosing containers
//! 4. **Scenarios** - end-to-end behavior of patterns and representations
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test value_model_tests
//! ```

use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use inox_concurrency::ConcurrencyError;
use inox_core::{
    get_migration_operations, parse_repr, write_repr, Context, ContextConfig, Dictionary, Error,
    List, MutationKind, MutationWatchingConfig, Object, ObjectPattern, Path, Pattern,
    PotentiallySharable, Registries, Set, SetConfig, UniquenessConstraint, Value, ValueKind,
    Watchable, WatchingDepth,
};

fn ctx() -> Context {
    Context::new(ContextConfig {
        registries: Some(Arc::new(Registries::with_defaults())),
        lock_poll_interval: Duration::from_millis(2),
        ..ContextConfig::default()
    })
}

fn object(entries: Vec<(&str, Value)>) -> Arc<Object> {
    Arc::new(Object::from_entries(entries).unwrap())
}

// ============================================================================
// SECTION 1: Sharing
// ============================================================================

mod sharing {
    use super::*;

    #[test]
    fn test_concurrent_writers_on_shared_object() {
        let ctx = ctx();
        let obj = object(vec![]);
        obj.share(ctx.state_id());

        let barrier = Arc::new(Barrier::new(8));
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let obj = Arc::clone(&obj);
                let barrier = Arc::clone(&barrier);
                let ctx = ctx.fork();
                thread::spawn(move || {
                    barrier.wait();
                    for j in 0..20 {
                        obj.set_prop(&ctx, &format!("k{i}"), Value::Int(j)).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let names = obj.property_names(&ctx).unwrap();
        assert_eq!(names.len(), 8);
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        for name in names {
            assert_eq!(obj.prop(&ctx, &name).unwrap(), Value::Int(19));
        }
    }

    #[test]
    fn test_shared_list_collects_every_append() {
        let ctx = ctx();
        let list = Arc::new(List::new(Vec::new()).unwrap());
        list.share(ctx.state_id());

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let list = Arc::clone(&list);
                let ctx = ctx.fork();
                thread::spawn(move || {
                    for j in 0..25 {
                        list.append(&ctx, vec![Value::Int(i * 100 + j)]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(list.len(), 100);
    }

    #[test]
    fn test_sharing_propagates_to_nested_containers() {
        let ctx = ctx();
        let inner = List::new(vec![Value::Int(1)]).unwrap();
        let obj = object(vec![("list", Value::from(inner))]);
        obj.share(ctx.state_id());

        match obj.prop(&ctx, "list").unwrap() {
            Value::List(list) => assert!(list.is_shared()),
            other => panic!("unexpected value {other:?}"),
        }
    }
}

// ============================================================================
// SECTION 2: Transactions
// ============================================================================

mod transactions {
    use super::*;

    fn non_blocking() -> Context {
        Context::new(ContextConfig {
            can_block: false,
            registries: Some(Arc::new(Registries::with_defaults())),
            ..ContextConfig::default()
        })
    }

    #[test]
    fn test_other_context_cannot_write_while_held() {
        let owner = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        owner.start_transaction(false).unwrap();
        obj.set_prop(&owner, "a", Value::Int(2)).unwrap();

        let other = non_blocking();
        let err = obj.set_prop(&other, "a", Value::Int(3)).unwrap_err();
        assert!(matches!(
            err,
            Error::Concurrency(ConcurrencyError::WaitRefused { .. })
        ));

        owner.commit_transaction().unwrap();
        obj.set_prop(&other, "a", Value::Int(3)).unwrap();
        assert_eq!(obj.prop(&owner, "a").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_blocked_writer_resumes_after_commit() {
        let owner = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        owner.start_transaction(false).unwrap();
        obj.set_prop(&owner, "a", Value::Int(2)).unwrap();

        let writer = {
            let obj = Arc::clone(&obj);
            let ctx = owner.fork();
            thread::spawn(move || obj.set_prop(&ctx, "a", Value::Int(3)))
        };
        thread::sleep(Duration::from_millis(30));
        assert_eq!(obj.prop(&owner, "a").unwrap(), Value::Int(2));

        owner.commit_transaction().unwrap();
        writer.join().unwrap().unwrap();
        assert_eq!(obj.prop(&owner, "a").unwrap(), Value::Int(3));
    }

    #[test]
    fn test_cancelled_waiter_gives_up() {
        let owner = ctx();
        let obj = object(vec![("a", Value::Int(1))]);
        owner.start_transaction(false).unwrap();
        obj.set_prop(&owner, "a", Value::Int(2)).unwrap();

        let waiter_ctx = owner.fork();
        let writer = {
            let obj = Arc::clone(&obj);
            let ctx = waiter_ctx.clone();
            thread::spawn(move || obj.set_prop(&ctx, "a", Value::Int(3)))
        };
        thread::sleep(Duration::from_millis(20));
        waiter_ctx.cancel();
        let err = writer.join().unwrap().unwrap_err();
        assert_eq!(err, Error::Concurrency(ConcurrencyError::Cancelled));
        owner.rollback_transaction().unwrap();
    }
}

// ============================================================================
// SECTION 3: Watching
// ============================================================================

mod watching {
    use super::*;

    #[test]
    fn test_deep_watcher_sees_nested_dictionary_mutation() {
        let ctx = ctx();
        let dict = Arc::new(Dictionary::new(Vec::<(String, Value)>::new()).unwrap());
        let list = Arc::new(List::new(vec![Value::Dictionary(Arc::clone(&dict))]).unwrap());
        let root = object(vec![("list", Value::List(Arc::clone(&list)))]);

        let watcher = root
            .watcher(&ctx, MutationWatchingConfig::with_depth(WatchingDepth::Deep))
            .unwrap();
        dict.set_value(&ctx, Value::from(Path::new("/a").unwrap()), Value::Int(1))
            .unwrap();

        let mutation = watcher.next_mutation(Duration::from_millis(50)).unwrap();
        assert_eq!(mutation.kind, MutationKind::AddEntry);
        assert!(mutation.path.starts_with("/list/0"));
    }

    #[test]
    fn test_watcher_on_other_thread() {
        let ctx = ctx();
        let obj = object(vec![]);
        obj.share(ctx.state_id());
        let watcher = obj.watcher(&ctx, MutationWatchingConfig::default()).unwrap();

        let writer = {
            let obj = Arc::clone(&obj);
            let ctx = ctx.fork();
            thread::spawn(move || obj.set_prop(&ctx, "a", Value::Int(1)).unwrap())
        };
        writer.join().unwrap();
        let mutation = watcher.next_mutation(Duration::from_millis(50)).unwrap();
        assert_eq!(mutation.kind, MutationKind::AddProp);
    }
}

// ============================================================================
// SECTION 4: Scenarios
// ============================================================================

mod scenarios {
    use super::*;

    #[test]
    fn test_constraint_keeps_previous_value() {
        let ctx = ctx();
        let id = ctx
            .registries()
            .constraints()
            .register(ObjectPattern::exact([("a", Pattern::Type(ValueKind::Int))]));
        let obj = object(vec![("a", Value::Int(1))]);
        obj.set_constraint(&ctx, id).unwrap();

        let err = obj.set_prop(&ctx, "a", Value::from("x")).unwrap_err();
        assert!(matches!(err, Error::ConstraintViolation { .. }));
        assert_eq!(obj.prop(&ctx, "a").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_dictionary_path_keys() {
        let ctx = ctx();
        let dict = Dictionary::new([("/a", Value::Int(0))]).unwrap();
        assert_eq!(
            dict.value(&ctx, &Value::from(Path::new("/a").unwrap())).unwrap(),
            Some(Value::Int(0))
        );
        assert_eq!(
            dict.value(&ctx, &Value::from(Path::new("/b").unwrap())).unwrap(),
            None
        );
    }

    #[test]
    fn test_exact_and_inexact_object_patterns() {
        let ctx = ctx();
        let value = Value::from(
            Object::from_entries([("a", Value::Int(1)), ("b", Value::Int(2))]).unwrap(),
        );
        let entries = [("a", Pattern::Type(ValueKind::Int))];
        assert!(!Pattern::Object(ObjectPattern::exact(entries.clone())).test(&ctx, &value));
        assert!(Pattern::Object(ObjectPattern::inexact(entries)).test(&ctx, &value));
    }

    #[test]
    fn test_repr_round_trip_of_nested_containers() {
        let list = Value::from(List::new(vec![Value::Int(1), Value::from("two")]).unwrap());
        let obj = Value::from(Object::from_entries([("list", list), ("n", Value::Int(3))]).unwrap());
        let repr = write_repr(&obj).unwrap();
        let parsed = parse_repr(&repr).unwrap();
        assert_eq!(write_repr(&parsed).unwrap(), repr);
        assert_eq!(parsed, obj);
    }

    #[test]
    fn test_set_deduplicates_by_repr() {
        let ctx = ctx();
        let set = Set::new(&ctx, Vec::new(), SetConfig::default()).unwrap();
        set.add(&ctx, Value::from("a")).unwrap();
        set.add(&ctx, Value::from("a")).unwrap();
        set.add(&ctx, Value::from("b")).unwrap();
        assert_eq!(set.len(), 2);

        let by_url = Set::new(
            &ctx,
            Vec::new(),
            SetConfig {
                element: Pattern::Serializable,
                uniqueness: UniquenessConstraint::Url,
            },
        )
        .unwrap();
        assert!(by_url.add(&ctx, Value::from("a")).is_err());
    }

    #[test]
    fn test_migration_of_identical_schemas_is_empty() {
        let ctx = ctx();
        let schema = Pattern::Object(ObjectPattern::exact([
            ("users", Pattern::Type(ValueKind::List)),
            ("count", Pattern::Type(ValueKind::Int)),
        ]));
        assert!(get_migration_operations(&ctx, &schema, &schema, "/")
            .unwrap()
            .is_empty());
    }
}
