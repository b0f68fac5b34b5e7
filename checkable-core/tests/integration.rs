//! Integration Tests for Checkable Trees
//!
//! These tests drive whole trees through the public API: construction,
//! edits, activation, async settlement and reset.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::FutureExt;
use parking_lot::Mutex;
use serde_json::json;

use checkable_core::{
    checkable, Activity, CheckableError, CollKind, CollSpec, Config, IndexBy, Key, Node, Options,
    Path, Pending, Predicate, Requirement, ResetOptions, Settler, Status, Value, Verdict,
};

fn key(name: &str) -> Key {
    Key::from(name)
}

fn value(json: serde_json::Value) -> Value {
    Value::from(json)
}

fn positive() -> Predicate {
    Predicate::from_fn(|v| match v.as_i64() {
        Some(n) if n > 0 => Ok(()),
        _ => Err("must be positive".to_string()),
    })
}

/// A predicate whose verdicts are settled by hand, one settler per
/// evaluation.
fn manual() -> (Predicate, Arc<Mutex<Vec<Settler>>>) {
    let settlers = Arc::new(Mutex::new(Vec::new()));
    let settlers_clone = settlers.clone();
    let predicate = Predicate::new(move |_| {
        let (pending, settler) = Pending::new();
        settlers_clone.lock().push(settler);
        Verdict::Pending(pending)
    });
    (predicate, settlers)
}

fn counted(calls: &Arc<AtomicUsize>) -> Predicate {
    let calls = calls.clone();
    Predicate::new(move |_| {
        calls.fetch_add(1, Ordering::SeqCst);
        Verdict::Valid
    })
}

fn record_calls(node: &Node) -> (Arc<Mutex<Vec<Status>>>, checkable_core::Subscription) {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let seen_clone = seen.clone();
    let sub = node.subscribe(move |status| seen_clone.lock().push(status.clone()));
    (seen, sub)
}

/// Setting a deep-equal value does not reach subscribers again.
#[test]
fn equal_set_is_not_republished() {
    let spec = CollSpec::record().field("a", positive());
    let node = checkable(spec, value(json!({"a": 1})), Options::new().active(true)).unwrap();

    let (first, _sub1) = record_calls(&node);
    let (second, _sub2) = record_calls(&node);
    assert_eq!(first.lock().len(), 1);
    assert_eq!(second.lock().len(), 1);

    node.set(value(json!({"a": 1})));
    node.child(&key("a")).unwrap().set(1);
    assert_eq!(first.lock().len(), 1);
    assert_eq!(second.lock().len(), 1);
}

/// No predicate runs until the tree, or an ancestor, is activated.
#[test]
fn nodes_are_lazy_by_default() {
    let calls = Arc::new(AtomicUsize::new(0));
    let spec = CollSpec::record()
        .field("a", counted(&calls))
        .field("nested", CollSpec::record().field("b", counted(&calls)));
    let node = checkable(spec, value(json!({"a": 1, "nested": {"b": 2}})), Options::new()).unwrap();

    node.set(value(json!({"a": 5, "nested": {"b": 6}})));
    node.child(&key("a")).unwrap().set(7);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(node.status().is_inactive());
    assert!(!node.is_dirty());

    let status = node.activate(true).now_or_never().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(status.valid(), Some(true));
    assert_eq!(status.active, Activity::Active);
    assert!(status.dirty);
}

/// A synchronous failure wins over a pending sibling, however the sibling
/// settles.
#[test]
fn first_invalid_is_order_stable() {
    let (slow, settlers) = manual();
    let spec = CollSpec::record()
        .field("a", Predicate::from_fn(|_| Err("a is wrong".to_string())))
        .field("b", slow);
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new().active(true)).unwrap();

    let status = node.status();
    assert_eq!(status.reason(), Some("a is wrong"));
    assert_eq!(status.pendings.get(&key("b")), Some(&true));

    let settler = settlers.lock().pop().unwrap();
    settler.settle(Verdict::Valid);
    let status = node.status();
    assert_eq!(status.reason(), Some("a is wrong"));
    assert_eq!(status.pendings.get(&key("b")), Some(&false));

    // Already settled before anyone asked.
    let spec = CollSpec::record()
        .field("a", Predicate::from_fn(|_| Err("a is wrong".to_string())))
        .field("b", Predicate::new(|_| Verdict::Pending(Pending::ready(Verdict::Valid))));
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new().active(true)).unwrap();
    assert_eq!(node.status().reason(), Some("a is wrong"));
}

/// Two pending children: the tree stays pending until one fails, and never
/// reports valid along the way.
#[test]
fn pending_children_race_by_hand() {
    let (check_a, settlers_a) = manual();
    let (check_b, settlers_b) = manual();
    let spec = CollSpec::record().field("a", check_a).field("b", check_b);
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new()).unwrap();

    let (seen, _sub) = record_calls(&node);
    let mut settled = Box::pin(node.activate(true));
    assert!(node.status().is_pending());
    assert!(settled.as_mut().now_or_never().is_none());

    settlers_b.lock().pop().unwrap().settle(Verdict::Valid);
    assert!(node.status().is_pending());

    settlers_a.lock().pop().unwrap().settle(Verdict::invalid("a failed"));
    let status = settled.now_or_never().unwrap();
    assert_eq!(status.reason(), Some("a failed"));
    assert_eq!(status.path().unwrap().to_string(), "a");
    assert!(seen.lock().iter().all(|s| !(s.valid() == Some(true) && s.active.engaged())));
}

/// The same race on a real runtime: the slow failure beats the fast
/// success.
#[tokio::test]
async fn pending_children_race_on_runtime() {
    let slow_invalid = Predicate::from_future(|_| async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Verdict::invalid("slow failure")
    });
    let fast_valid = Predicate::from_future(|_| async {
        tokio::time::sleep(Duration::from_millis(1)).await;
        Verdict::Valid
    });
    let spec = CollSpec::record().field("a", slow_invalid).field("b", fast_valid);
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new()).unwrap();

    let status = node.activate(true).await;
    assert_eq!(status.valid(), Some(false));
    assert_eq!(status.reason(), Some("slow failure"));
    assert!(!node.validate().await);
}

/// A slow verdict for an old value never overwrites the current one.
#[test]
fn stale_continuation_is_discarded() {
    let (check, settlers) = manual();
    let spec = CollSpec::record().field("name", check);
    let node = checkable(spec, value(json!({"name": "a"})), Options::new().active(true)).unwrap();

    node.set(value(json!({"name": "ab"})));
    let (first, second) = {
        let mut settlers = settlers.lock();
        assert_eq!(settlers.len(), 2);
        let second = settlers.pop().unwrap();
        let first = settlers.pop().unwrap();
        (first, second)
    };

    second.settle(Verdict::Valid);
    assert_eq!(node.status().valid(), Some(true));

    first.settle(Verdict::invalid("stale"));
    assert_eq!(node.status().valid(), Some(true));
    assert_eq!(node.child(&key("name")).unwrap().status().valid(), Some(true));
}

/// Children mirror value keys plus declared keys; undeclared keys that
/// disappear take their child and pendings slot with them.
#[test]
fn children_track_structure() {
    let spec = CollSpec::record()
        .field("x", positive())
        .field("z", Predicate::always_valid())
        .spread(positive());
    let node = checkable(spec, value(json!({"x": 1, "y": 2})), Options::new().active(true)).unwrap();

    let keys: Vec<Key> = node.children().into_iter().map(|(k, _)| k).collect();
    assert_eq!(keys, vec![key("x"), key("y"), key("z")]);
    assert_eq!(node.child(&key("z")).unwrap().get(), Value::Undefined);
    assert_eq!(node.status().pendings.len(), 3);

    node.set(value(json!({"x": 1})));
    assert!(node.child(&key("y")).is_none());
    assert!(node.child(&key("z")).is_some());
    let status = node.status();
    assert!(!status.pendings.contains_key(&key("y")));
    assert_eq!(status.pendings.len(), 2);
}

/// A nested collection missing from the value is built empty.
#[test]
fn missing_collections_are_built_empty() {
    let spec = CollSpec::record().field("tags", CollSpec::sequence().spread(Predicate::always_valid()));
    let node = checkable(spec, value(json!({})), Options::new()).unwrap();
    assert_eq!(node.child(&key("tags")).unwrap().get(), Value::empty(CollKind::Sequence));
}

/// Reset with no argument restores the state right after construction.
#[test]
fn reset_round_trips() {
    let spec = CollSpec::record().field("a", positive()).spread(positive());
    let initial = value(json!({"a": 1, "b": 2}));
    let node = checkable(spec, initial.clone(), Options::new()).unwrap();
    let fresh_status = node.status();

    node.reset(Some(initial.clone()), ResetOptions::default());
    node.set(value(json!({"a": -1, "c": 0})));
    let _ = node.activate(true);
    node.set_context("other");
    assert_eq!(node.status().valid(), Some(false));

    node.reset(None, ResetOptions::default());
    assert_eq!(node.get(), initial);
    assert_eq!(node.status(), fresh_status);
    assert_eq!(node.context(), Value::Undefined);
    assert!(!node.is_dirty());
}

/// Required leaves fail on undefined; optional ones pass.
#[test]
fn required_semantics() {
    let required = checkable(
        positive(),
        Value::Undefined,
        Options::new().active(true).required(true),
    )
    .unwrap();
    assert_eq!(required.status().reason(), Some("is required"));
    assert_eq!(required.status().path(), Some(&Path::root()));

    let optional = checkable(positive(), Value::Undefined, Options::new().active(true)).unwrap();
    assert_eq!(optional.status().valid(), Some(true));

    required.set("");
    assert_eq!(required.status().reason(), Some("is required"));
    required.set(3);
    assert_eq!(required.status().valid(), Some(true));
}

/// Requirement trees reach into children, and messages come from the
/// configuration.
#[test]
fn requirement_tree_and_messages() {
    let config = Config::from_json(r#"{"messages": {"is_required": "needed"}}"#).unwrap();
    let spec = CollSpec::record()
        .field("name", Predicate::always_valid())
        .field("nickname", Predicate::always_valid());
    let requirement = Requirement::tree().entry("name", true);
    let node = checkable(
        spec,
        value(json!({})),
        Options::new().active(true).required(requirement).config(config),
    )
    .unwrap();

    let status = node.status();
    assert_eq!(status.reason(), Some("needed"));
    assert_eq!(status.path().unwrap().to_string(), "name");
    assert!(node.child(&key("name")).unwrap().is_required());
    assert!(!node.child(&key("nickname")).unwrap().is_required());
}

/// Scoped predicates re-run when another part of the tree changes.
#[test]
fn scoped_predicate_follows_root() {
    let confirm = Predicate::with_scope(|v, scope| {
        if *v == scope.lookup("../password") {
            Verdict::Valid
        } else {
            Verdict::invalid("does not match")
        }
    });
    let spec = CollSpec::record()
        .field("password", Predicate::always_valid())
        .field("confirm", confirm);
    let node = checkable(
        spec,
        value(json!({"password": "hunter2", "confirm": "hunter2"})),
        Options::new().active(true),
    )
    .unwrap();
    assert_eq!(node.status().valid(), Some(true));

    node.child(&key("password")).unwrap().set("hunter3");
    let status = node.status();
    assert_eq!(status.reason(), Some("does not match"));
    assert_eq!(status.path().unwrap().to_string(), "confirm");

    node.child(&key("confirm")).unwrap().set("hunter3");
    assert_eq!(node.status().valid(), Some(true));
}

/// Context reaches predicates and can be replaced for a whole subtree.
#[test]
fn context_reaches_predicates() {
    let limit = Predicate::with_scope(|v, scope| {
        let max = scope.context().as_i64().unwrap_or(i64::MAX);
        match v.as_i64() {
            Some(n) if n <= max => Verdict::Valid,
            _ => Verdict::invalid("over the limit"),
        }
    });
    let spec = CollSpec::sequence().spread(limit);
    let node = checkable(spec, value(json!([1, 5, 9])), Options::new().active(true).context(10)).unwrap();
    assert_eq!(node.status().valid(), Some(true));

    node.set_context(6);
    let status = node.status();
    assert_eq!(status.reason(), Some("over the limit"));
    assert_eq!(status.path().unwrap().to_string(), "2");
    assert_eq!(node.child(&Key::Index(0)).unwrap().context(), Value::Int(6));
}

/// With key derivation, children keep their identity when the sequence is
/// reordered, and their paths follow the new positions.
#[test]
fn derived_keys_survive_reordering() {
    let spec = CollSpec::sequence().spread(CollSpec::record().field("age", positive()));
    let node = checkable(
        spec,
        value(json!([{"id": "ann", "age": 3}, {"id": "bob", "age": 0}])),
        Options::new().active(true).index_by(IndexBy::field("id")),
    )
    .unwrap();
    let bob = node.child(&key("bob")).unwrap();
    assert_eq!(node.status().path().unwrap().to_string(), "1.age");

    node.set(value(json!([{"id": "bob", "age": 0}, {"id": "ann", "age": 3}])));
    assert_eq!(node.child(&key("bob")).unwrap().id(), bob.id());
    assert_eq!(bob.path().to_string(), "0");
    assert_eq!(node.status().path().unwrap().to_string(), "0.age");
    assert_eq!(node.order(), vec![key("bob"), key("ann")]);
}

/// Reordering changes display order only.
#[test]
fn reorder_leaves_validation_alone() {
    let calls = Arc::new(AtomicUsize::new(0));
    let spec = CollSpec::record().spread(counted(&calls));
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new().active(true)).unwrap();
    let before = calls.load(Ordering::SeqCst);
    let status = node.status();

    assert!(node.reorder(vec![key("b"), key("a")]));
    let order: Vec<Key> = node.children().into_iter().map(|(k, _)| k).collect();
    assert_eq!(order, vec![key("b"), key("a")]);
    assert_eq!(calls.load(Ordering::SeqCst), before);
    assert_eq!(node.status(), status);
}

/// Activating one child through a published status leaves the tree mixed
/// and dirty; activating everything makes it active.
#[test]
fn activation_from_status() {
    let spec = CollSpec::record().field("a", positive()).field("b", positive());
    let node = checkable(spec, value(json!({"a": 0, "b": 1})), Options::new()).unwrap();

    assert!(node.status().activate(Some(&key("b"))));
    let status = node.status();
    assert_eq!(status.active, Activity::Mixed);
    assert_eq!(status.valid(), Some(true));
    assert!(status.dirty);

    assert!(node.status().activate(None));
    let status = node.status();
    assert_eq!(status.active, Activity::Active);
    assert_eq!(status.reason(), Some("must be positive"));

    let status = node.toggle().now_or_never().unwrap();
    assert_eq!(status.active, Activity::Inactive);
    assert_eq!(status.valid(), Some(true));
    assert!(status.dirty);
}

/// Published statuses serialize to the shape UI bindings consume.
#[test]
fn status_boundary_shape() {
    let spec = CollSpec::record().field("a", positive());
    let node = checkable(spec, value(json!({"a": -4})), Options::new().active(true)).unwrap();
    assert_eq!(
        serde_json::to_value(node.status()).unwrap(),
        json!({
            "valid": false,
            "reason": "must be positive",
            "path": ["a"],
            "active": true,
            "pendings": {"a": false},
            "dirty": true,
        })
    );
}

/// Malformed specs are rejected at construction.
#[test]
fn malformed_spec_is_rejected() {
    let spec = CollSpec::sequence().field("name", positive());
    let err = checkable(spec, Value::Undefined, Options::new()).unwrap_err();
    assert!(matches!(err, CheckableError::KeyKindMismatch { .. }));

    let spec = CollSpec::record().spread(positive());
    let err = checkable(spec, Value::Undefined, Options::new().index_by(IndexBy::field("id"))).unwrap_err();
    assert!(matches!(err, CheckableError::IndexByUnsupported { .. }));
}

/// A collection context is split by key; anything else is inherited whole.
#[test]
fn context_splits_along_keys() {
    let expects_five = Predicate::with_scope(|_, scope| {
        if scope.context().as_i64() == Some(5) {
            Verdict::Valid
        } else {
            Verdict::invalid("context is not 5")
        }
    });
    let spec = CollSpec::record()
        .field("a", expects_five)
        .field("b", Predicate::always_valid());
    let node = checkable(
        spec,
        value(json!({"a": 1, "b": 2})),
        Options::new().active(true).context(value(json!({"a": 5}))),
    )
    .unwrap();

    assert_eq!(node.child(&key("a")).unwrap().context(), Value::Int(5));
    assert_eq!(node.child(&key("b")).unwrap().context(), value(json!({"a": 5})));
    assert_eq!(node.status().valid(), Some(true));

    node.set_context(value(json!({"a": 6})));
    assert_eq!(node.child(&key("a")).unwrap().context(), Value::Int(6));
    let status = node.status();
    assert_eq!(status.reason(), Some("context is not 5"));
    assert_eq!(status.path().unwrap().to_string(), "a");

    node.reset(None, ResetOptions::default());
    assert_eq!(node.child(&key("a")).unwrap().context(), Value::Int(5));
}

/// Record-level checks run as soon as any child is active.
#[test]
fn own_check_runs_under_mixed_activity() {
    let spec = CollSpec::record()
        .field("a", Predicate::always_valid())
        .field("b", Predicate::always_valid())
        .check(Predicate::from_fn(|_| Err("record-level failure".to_string())));
    let node = checkable(spec, value(json!({"a": 1, "b": 2})), Options::new()).unwrap();
    assert!(node.status().is_inactive());

    assert!(node.status().activate(Some(&key("a"))));
    let status = node.status();
    assert_eq!(status.active, Activity::Mixed);
    assert_eq!(status.reason(), Some("record-level failure"));
    assert!(status.path().unwrap().is_root());

    let status = node.activate(false).now_or_never().unwrap();
    assert_eq!(status.active, Activity::Inactive);
    assert_eq!(status.valid(), Some(true));
}

/// Records built from JSON keep the written key order, and the first
/// failure follows it.
#[test]
fn json_records_keep_key_order() {
    let spec = CollSpec::record().spread(positive());
    let node = checkable(
        spec,
        value(json!({"zeta": 0, "alpha": 0})),
        Options::new().active(true),
    )
    .unwrap();

    assert_eq!(node.order(), vec![key("zeta"), key("alpha")]);
    assert_eq!(node.status().path().unwrap().to_string(), "zeta");
}

/// An entry whose derived key is already taken fails instead of being
/// silently ignored.
#[test]
fn duplicate_derived_keys_are_invalid() {
    let spec = CollSpec::sequence().spread(CollSpec::record().field("age", positive()));
    let node = checkable(
        spec,
        value(json!([{"id": "ann", "age": 3}, {"id": "ann", "age": 0}])),
        Options::new().index_by(IndexBy::field("id")),
    )
    .unwrap();
    assert_eq!(node.children().len(), 1);
    assert_eq!(node.status().valid(), Some(true));

    let status = node.activate(true).now_or_never().unwrap();
    assert_eq!(status.reason(), Some("duplicate key 'ann'"));
    assert_eq!(status.path().unwrap().to_string(), "1");

    node.set(value(json!([{"id": "ann", "age": 3}, {"id": "bob", "age": 4}])));
    assert_eq!(node.children().len(), 2);
    assert_eq!(node.status().valid(), Some(true));
}
