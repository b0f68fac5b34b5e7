//! Composite Nodes
//!
//! A composite mirrors a collection. It owns one leaf for the collection's
//! own checks (shape, required guard, declared own predicate) and one child
//! node per key, and publishes the aggregate of all of them.
//!
//! # How Synchronization Works
//!
//! On every new value:
//!
//! 1. The key set is the value's keys plus the spec's declared keys. With
//!    key derivation, each entry's identity comes from its value instead;
//!    an entry whose identity is already taken gets no child and fails the
//!    collection while its own check is active.
//! 2. A child whose identity survives is fed its new sub-value in place
//!    (relocated first if its position moved). A new identity gets a new
//!    child, with spec, requirement and context resolved for its key.
//! 3. Children whose identity disappeared are detached and dropped.
//! 4. The own leaf is fed the whole value, then everything is recombined
//!    and published once.
//!
//! Child statuses that arrive while a batch is in progress are recorded but
//! do not republish; the batch publishes once at the end.

use std::iter;
use std::sync::{Arc, Weak};

use indexmap::{IndexMap, IndexSet};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use super::{build, Baseline, ChildEvent, LeafNode, Node, NodeId, NodeInit, ParentPort};
use crate::aggregate::{self, RaceCache};
use crate::config::{Config, ResetOptions};
use crate::reactive::{Cell, Subscription};
use crate::resolve::{self, IndexBy, Requirement};
use crate::result::{Activator, Activity, Failure, Status, Verdict};
use crate::spec::CollSpec;
use crate::value::{Key, Path, Value};

/// A node mirroring a record, sequence or keyed map.
#[derive(Clone)]
pub struct CompositeNode {
    inner: Arc<CompositeInner>,
}

struct CompositeInner {
    id: NodeId,
    spec: Arc<CollSpec>,
    config: Arc<Config>,
    port: ParentPort,
    own: LeafNode,
    state: Mutex<CompositeState>,
    value: Cell<Value>,
    status: Cell<Status>,
    order: Cell<Vec<Key>>,
}

struct Child {
    node: Node,
    port: ParentPort,
    /// Natural key of the entry in the current value.
    slot: Key,
    status: Status,
}

struct CompositeState {
    key: Option<Key>,
    path: Path,
    active: bool,
    is_required: bool,
    requirement: Option<Requirement>,
    index_by: Option<IndexBy>,
    context: Value,
    root: Arc<Value>,
    /// Keyed by identity.
    children: IndexMap<Key, Child>,
    /// Entries skipped because an earlier one holds the same derived key,
    /// as (slot, identity).
    duplicates: Vec<(Key, Key)>,
    own_status: Status,
    custom_order: bool,
    batching: usize,
    dirty: bool,
    race: RaceCache,
    baseline: Baseline,
}

enum Step {
    Keep {
        identity: Key,
        slot: Key,
        sub: Value,
        child: Child,
    },
    Create {
        identity: Key,
        slot: Key,
        sub: Value,
    },
}

/// The outcome of diffing a new value against the current children.
struct Plan {
    steps: Vec<Step>,
    removed: Vec<(Key, Child)>,
    path: Path,
    active: bool,
    context: Value,
    requirement: Option<Requirement>,
    index_by: Option<IndexBy>,
}

/// Undefined becomes an empty collection of the expected shape.
fn shaped(spec: &CollSpec, value: Value) -> Value {
    if value.is_undefined() {
        Value::empty(spec.kind())
    } else {
        value
    }
}

impl CompositeNode {
    pub(crate) fn new(spec: Arc<CollSpec>, value: Value, init: NodeInit) -> Self {
        let value = shaped(&spec, value);
        let root = init.root.clone();

        let inner = Arc::new_cyclic(|weak: &Weak<CompositeInner>| {
            let weak = weak.clone();
            let own_port = ParentPort::new(move |event| {
                if let (Some(inner), ChildEvent::Status(status)) = (weak.upgrade(), event) {
                    inner.on_own(status);
                }
            });
            let wrong_type = init.config.messages.wrong_type(spec.kind());
            let own = LeafNode::new(
                spec.own_predicate(wrong_type),
                value.clone(),
                NodeInit {
                    key: None,
                    path: init.path.clone(),
                    active: init.active,
                    requirement: None,
                    is_required: false,
                    context: init.context.clone(),
                    root: init.root.clone(),
                    index_by: None,
                    config: init.config.clone(),
                    port: own_port,
                },
            );

            CompositeInner {
                id: NodeId::new(),
                spec: spec.clone(),
                config: init.config,
                port: init.port,
                state: Mutex::new(CompositeState {
                    key: init.key,
                    path: init.path,
                    active: init.active,
                    is_required: init.is_required,
                    requirement: init.requirement,
                    index_by: init.index_by,
                    context: init.context.clone(),
                    root: init.root,
                    children: IndexMap::new(),
                    duplicates: Vec::new(),
                    own_status: own.status(),
                    custom_order: false,
                    batching: 0,
                    dirty: init.active,
                    race: RaceCache::default(),
                    baseline: Baseline {
                        value: value.clone(),
                        active: init.active,
                        context: init.context,
                    },
                }),
                own,
                value: Cell::new(value.clone()),
                status: Cell::new(Status::inactive()),
                order: Cell::new(Vec::new()),
            }
        });

        inner.sync(value, root, false);
        Self { inner }
    }

    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    pub fn key(&self) -> Option<Key> {
        self.inner.state.lock().key.clone()
    }

    pub fn path(&self) -> Path {
        self.inner.state.lock().path.clone()
    }

    pub fn get(&self) -> Value {
        self.inner.value.get()
    }

    pub fn status(&self) -> Status {
        self.inner.status.get()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        self.inner.status.subscribe(callback)
    }

    pub fn watch<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.inner.value.subscribe(callback)
    }

    /// Receive the display order of the children now and on every change.
    pub fn watch_order<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Vec<Key>) + Send + Sync + 'static,
    {
        self.inner.order.subscribe(callback)
    }

    pub fn set(&self, value: Value) {
        let value = shaped(&self.inner.spec, value);
        if self.inner.value.with(|current| *current == value) {
            return;
        }
        let root = if self.inner.port.is_root() {
            Arc::new(value.clone())
        } else {
            self.inner.state.lock().root.clone()
        };
        self.inner.sync(value.clone(), root, false);
        self.inner.port.send(ChildEvent::Changed(value));
    }

    pub fn is_active(&self) -> bool {
        self.inner.state.lock().active
    }

    pub fn is_required(&self) -> bool {
        self.inner.state.lock().is_required
    }

    pub fn context(&self) -> Value {
        self.inner.state.lock().context.clone()
    }

    pub fn set_context(&self, context: Value) {
        let children = {
            let mut state = self.inner.state.lock();
            if state.context == context {
                return;
            }
            state.context = context.clone();
            state
                .children
                .values()
                .map(|c| (c.slot.clone(), c.node.clone()))
                .collect::<Vec<_>>()
        };

        self.inner.batched(|| {
            self.inner.own.set_context(context.clone());
            for (slot, child) in children {
                child.set_context(resolve::child_context(&context, &slot));
            }
        });
        self.inner.republish();
    }

    pub fn reset(&self, value: Option<Value>, options: ResetOptions) {
        let inner = &self.inner;
        let (value, root, active, context) = {
            let mut guard = inner.state.lock();
            let state = &mut *guard;
            if let Some(value) = value {
                state.baseline.value = shaped(&inner.spec, value);
            }
            state.active = options.active.unwrap_or(state.baseline.active);
            state.context = options
                .context
                .unwrap_or_else(|| state.baseline.context.clone());
            state.dirty = state.active;
            state.custom_order = false;
            state.race.clear();
            let root = if inner.port.is_root() {
                Arc::new(state.baseline.value.clone())
            } else {
                state.root.clone()
            };
            (
                state.baseline.value.clone(),
                root,
                state.active,
                state.context.clone(),
            )
        };
        debug!(path = %self.path(), active, "resetting subtree");

        let previous = inner.value.get();
        inner.batched(|| {
            inner.own.reset(
                Some(value.clone()),
                ResetOptions {
                    active: Some(active),
                    context: Some(context),
                },
            );
            inner.sync(value.clone(), root, true);
        });
        inner.republish();

        if previous != value {
            inner.port.send(ChildEvent::Changed(value));
        }
    }

    /// Immediate children in display order.
    pub fn children(&self) -> Vec<(Key, Node)> {
        let order = self.inner.order.get();
        let state = self.inner.state.lock();
        order
            .into_iter()
            .filter_map(|key| {
                let node = state.children.get(&key)?.node.clone();
                Some((key, node))
            })
            .collect()
    }

    pub fn child(&self, key: &Key) -> Option<Node> {
        self.inner
            .state
            .lock()
            .children
            .get(key)
            .map(|c| c.node.clone())
    }

    pub fn order(&self) -> Vec<Key> {
        self.inner.order.get()
    }

    /// Permute the display order. Validation is untouched.
    pub fn reorder(&self, order: Vec<Key>) -> bool {
        {
            let mut state = self.inner.state.lock();
            let distinct: IndexSet<&Key> = order.iter().collect();
            let is_permutation = order.len() == state.children.len()
                && distinct.len() == order.len()
                && order.iter().all(|key| state.children.contains_key(key));
            if !is_permutation {
                return false;
            }
            state.custom_order = true;
            debug!(path = %state.path, "reordering children");
        }
        self.inner.order.set(order);
        true
    }

    pub(crate) fn set_active(&self, active: bool) {
        self.inner.set_active(active);
    }

    pub(crate) fn feed(&self, value: Value, root: Arc<Value>) {
        self.inner.sync(value, root, false);
    }

    pub(crate) fn relocate(&self, key: Key, path: Path) {
        let children = {
            let mut state = self.inner.state.lock();
            state.key = Some(key);
            if state.path == path {
                return;
            }
            state.path = path.clone();
            state
                .children
                .iter()
                .map(|(identity, c)| (identity.clone(), c.slot.clone(), c.node.clone()))
                .collect::<Vec<_>>()
        };

        self.inner.batched(|| {
            self.inner.own.move_to(path.clone());
            for (identity, slot, child) in children {
                child.relocate(identity, path.child(slot));
            }
        });
        self.inner.republish();
    }

    pub(crate) fn status_cell(&self) -> &Cell<Status> {
        &self.inner.status
    }
}

impl CompositeInner {
    /// Run `f` with republishing suppressed.
    fn batched<R>(&self, f: impl FnOnce() -> R) -> R {
        self.state.lock().batching += 1;
        let result = f();
        self.state.lock().batching -= 1;
        result
    }

    fn set_active(self: &Arc<Self>, active: bool) {
        let children = {
            let mut state = self.state.lock();
            state.active = active;
            state.dirty |= active;
            state.children.values().map(|c| c.node.clone()).collect::<Vec<_>>()
        };

        self.batched(|| {
            self.own.set_active(active);
            for child in children {
                child.set_active(active);
            }
        });
        self.republish();
    }

    fn sync(self: &Arc<Self>, value: Value, root: Arc<Value>, rebuild: bool) {
        let value = shaped(&self.spec, value);
        let mut plan = self.plan(&value, root.clone(), rebuild);
        let steps = std::mem::take(&mut plan.steps);

        for (identity, child) in &plan.removed {
            child.port.detach();
            debug!(path = %plan.path, key = %identity, "removing child");
        }

        let mut installed = Vec::with_capacity(steps.len());
        for step in steps {
            match step {
                Step::Keep {
                    identity,
                    slot,
                    sub,
                    mut child,
                } => {
                    if child.slot != slot {
                        child.node.relocate(identity.clone(), plan.path.child(slot.clone()));
                        child.node.set_context(resolve::child_context(&plan.context, &slot));
                        child.slot = slot;
                    }
                    child.node.feed(sub, root.clone());
                    installed.push((identity, child));
                }
                Step::Create {
                    identity,
                    slot,
                    sub,
                } => {
                    let child = self.spawn(identity.clone(), slot, sub, &plan, &root);
                    installed.push((identity, child));
                }
            }
        }

        self.own.feed(value.clone(), root);

        {
            let mut state = self.state.lock();
            state.children = installed
                .into_iter()
                .map(|(identity, mut child)| {
                    child.status = child.node.status();
                    (identity, child)
                })
                .collect();
            state.batching -= 1;
        }

        self.value.set(value);
        self.refresh_order();
        self.republish();
    }

    /// Diff `value` against the current children. Leaves the children
    /// map empty and a batch open until the plan is installed.
    fn plan(&self, value: &Value, root: Arc<Value>, rebuild: bool) -> Plan {
        let mut keys: IndexSet<Key> = value.keys().into_iter().collect();
        keys.extend(self.spec.declared_keys().cloned());

        let mut state = self.state.lock();
        state.batching += 1;
        state.root = root;

        let mut previous = std::mem::take(&mut state.children);
        let mut removed = Vec::new();
        if rebuild {
            removed.extend(previous.drain(..));
        }

        state.duplicates.clear();
        let mut seen = IndexSet::with_capacity(keys.len());
        let mut steps = Vec::with_capacity(keys.len());
        for slot in keys {
            let sub = value.item(&slot);
            let identity = match &state.index_by {
                Some(index_by) => index_by.derive(&sub, &slot),
                None => slot.clone(),
            };
            if !seen.insert(identity.clone()) {
                warn!(path = %state.path, slot = %slot, key = %identity, "duplicate derived key, entry skipped");
                state.duplicates.push((slot, identity));
                continue;
            }
            steps.push(match previous.shift_remove(&identity) {
                Some(child) => Step::Keep {
                    identity,
                    slot,
                    sub,
                    child,
                },
                None => Step::Create {
                    identity,
                    slot,
                    sub,
                },
            });
        }
        removed.extend(previous);

        Plan {
            steps,
            removed,
            path: state.path.clone(),
            active: state.active,
            context: state.context.clone(),
            requirement: state.requirement.clone(),
            index_by: state.index_by.clone(),
        }
    }

    fn spawn(self: &Arc<Self>, identity: Key, slot: Key, sub: Value, plan: &Plan, root: &Arc<Value>) -> Child {
        let requirement = resolve::resolve_requirement(&slot, plan.requirement.as_ref());
        let is_required = resolve::is_effectively_required(requirement.as_ref());
        let spec = resolve::effective_child_spec(
            &slot,
            &self.spec,
            is_required,
            &self.config.messages.is_required,
        );

        let weak = Arc::downgrade(self);
        let listen_as = identity.clone();
        let port = ParentPort::new(move |event| {
            if let Some(inner) = weak.upgrade() {
                inner.on_child(&listen_as, event);
            }
        });

        let path = plan.path.child(slot.clone());
        debug!(path = %path, key = %identity, required = is_required, "creating child");

        let node = build(
            spec,
            sub,
            NodeInit {
                key: Some(identity),
                path,
                active: plan.active,
                requirement,
                is_required,
                context: resolve::child_context(&plan.context, &slot),
                root: root.clone(),
                index_by: plan.index_by.as_ref().and_then(|ib| ib.child(&slot)),
                config: self.config.clone(),
                port: port.clone(),
            },
        );
        let status = node.status();
        Child {
            node,
            port,
            slot,
            status,
        }
    }

    fn on_own(self: &Arc<Self>, status: Status) {
        self.state.lock().own_status = status;
        self.republish();
    }

    fn on_child(self: &Arc<Self>, identity: &Key, event: ChildEvent) {
        match event {
            ChildEvent::Status(status) => {
                {
                    let mut guard = self.state.lock();
                    let state = &mut *guard;
                    let Some(child) = state.children.get_mut(identity) else {
                        return;
                    };
                    state.dirty |= status.dirty;
                    child.status = status;
                }
                self.republish();
            }
            ChildEvent::Changed(sub) => self.absorb(identity, sub),
        }
    }

    /// A child edited its own value: write it into ours and pass it up.
    fn absorb(self: &Arc<Self>, identity: &Key, sub: Value) {
        let (slot, root) = {
            let state = self.state.lock();
            let Some(child) = state.children.get(identity) else {
                return;
            };
            (child.slot.clone(), state.root.clone())
        };

        let mut value = self.value.get();
        if !value.set_item(&slot, sub) {
            return;
        }

        if self.port.is_root() {
            // Every scoped predicate in the tree sees the new root.
            let root = Arc::new(value.clone());
            self.sync(value, root, false);
        } else {
            self.value.set(value.clone());
            self.own.feed(value.clone(), root);
            self.port.send(ChildEvent::Changed(value));
        }
    }

    fn refresh_order(&self) {
        let order = {
            let state = self.state.lock();
            if state.custom_order {
                let mut order: Vec<Key> = self
                    .order
                    .get()
                    .into_iter()
                    .filter(|key| state.children.contains_key(key))
                    .collect();
                let known: IndexSet<Key> = order.iter().cloned().collect();
                order.extend(
                    state
                        .children
                        .keys()
                        .filter(|key| !known.contains(*key))
                        .cloned(),
                );
                order
            } else {
                state.children.keys().cloned().collect()
            }
        };
        self.order.set(order);
    }

    fn republish(self: &Arc<Self>) {
        // The own leaf is on unless every child is off.
        let target = {
            let state = self.state.lock();
            if state.batching > 0 {
                return;
            }
            if state.children.is_empty() {
                Some(state.active)
            } else {
                Activity::combine(state.children.values().map(|c| c.status.active))
                    .map(Activity::engaged)
            }
        };
        if let Some(active) = target {
            if self.own.is_active() != active {
                self.batched(|| self.own.set_active(active));
            }
        }

        let (status, path) = {
            let mut guard = self.state.lock();
            if guard.batching > 0 {
                return;
            }
            let state = &mut *guard;

            let duplicate = state
                .duplicates
                .first()
                .filter(|_| state.own_status.active.engaged())
                .map(|(slot, identity)| {
                    Verdict::Invalid(Failure::new(
                        self.config.messages.duplicate_key(identity),
                        state.path.child(slot.clone()),
                    ))
                });
            let verdict = aggregate::combine(
                iter::once(&state.own_status.verdict)
                    .chain(duplicate.iter())
                    .chain(state.children.values().map(|c| &c.status.verdict)),
                &mut state.race,
            );
            let active = Activity::combine(
                iter::once(state.own_status.active)
                    .chain(state.children.values().map(|c| c.status.active)),
            )
            .unwrap_or(Activity::Inactive);
            state.dirty |= state.own_status.dirty || state.children.values().any(|c| c.status.dirty);
            let pendings = state
                .children
                .iter()
                .map(|(key, c)| (key.clone(), c.status.is_pending()))
                .collect();

            let status = Status::new(verdict, active, state.dirty)
                .with_pendings(pendings)
                .with_activator(self.activator());
            (status, state.path.clone())
        };

        if self.status.set(status.clone()) {
            trace!(path = %path, valid = ?status.valid(), active = ?status.active, "composite published");
            self.port.send(ChildEvent::Status(status));
        }
    }

    fn activator(self: &Arc<Self>) -> Activator {
        let weak = Arc::downgrade(self);
        Activator::new(move |key| match weak.upgrade() {
            Some(inner) => inner.activate_key(key),
            None => false,
        })
    }

    fn activate_key(self: &Arc<Self>, key: Option<&Key>) -> bool {
        let Some(key) = key else {
            self.set_active(true);
            return true;
        };
        let child = self.state.lock().children.get(key).map(|c| c.node.clone());
        match child {
            Some(child) => {
                child.set_active(true);
                true
            }
            None => false,
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
