//! Leaf Nodes
//!
//! A leaf validates one value against one predicate.
//!
//! # How Evaluation Works
//!
//! Every change of activity, value or context re-evaluates:
//!
//! 1. Inactive: publish the inactive status, call nothing.
//! 2. Not required and undefined: valid.
//! 3. Otherwise run the predicate. For required leaves the predicate starts
//!    with the blank check, so a blank value fails with the configured
//!    "is required" message.
//! 4. A pending verdict is published at once. When it settles, the result
//!    is published only if no newer evaluation has started and the leaf is
//!    still active.
//!
//! Each evaluation takes a fresh token; a continuation carrying an older
//! token is stale and does nothing.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::{Baseline, ChildEvent, NodeId, NodeInit, ParentPort};
use crate::config::ResetOptions;
use crate::reactive::{Cell, Pending, Subscription};
use crate::result::{Activity, Status, Verdict};
use crate::spec::{Predicate, Scope};
use crate::value::{Key, Path, Value};

/// A node wrapping a single predicate.
#[derive(Clone)]
pub struct LeafNode {
    inner: Arc<LeafInner>,
}

struct LeafInner {
    id: NodeId,
    predicate: Predicate,
    port: ParentPort,
    state: Mutex<LeafState>,
    value: Cell<Value>,
    status: Cell<Status>,
}

struct LeafState {
    key: Option<Key>,
    path: Path,
    active: bool,
    is_required: bool,
    context: Value,
    root: Arc<Value>,
    token: u64,
    dirty: bool,
    baseline: Baseline,
}

/// What an evaluation needs, copied out from under the lock.
struct Snapshot {
    token: u64,
    active: bool,
    is_required: bool,
    dirty: bool,
    path: Path,
    context: Value,
    root: Arc<Value>,
}

impl LeafNode {
    pub(crate) fn new(predicate: Predicate, value: Value, init: NodeInit) -> Self {
        let inner = Arc::new(LeafInner {
            id: NodeId::new(),
            predicate,
            port: init.port,
            state: Mutex::new(LeafState {
                key: init.key,
                path: init.path,
                active: init.active,
                is_required: init.is_required,
                context: init.context.clone(),
                root: init.root,
                token: 0,
                dirty: init.active,
                baseline: Baseline {
                    value: value.clone(),
                    active: init.active,
                    context: init.context,
                },
            }),
            value: Cell::new(value),
            status: Cell::new(Status::inactive()),
        });

        if init.active {
            inner.evaluate();
        }
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

    /// Replace the value and tell the parent about it.
    pub fn set(&self, value: Value) {
        if !self.inner.value.set(value.clone()) {
            return;
        }
        if self.inner.port.is_root() {
            self.inner.state.lock().root = Arc::new(value.clone());
        }
        self.inner.evaluate();
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
        {
            let mut state = self.inner.state.lock();
            if state.context == context {
                return;
            }
            state.context = context;
        }
        self.inner.evaluate();
    }

    pub fn reset(&self, value: Option<Value>, options: ResetOptions) {
        let value = {
            let mut state = self.inner.state.lock();
            if let Some(value) = value {
                state.baseline.value = value;
            }
            state.active = options.active.unwrap_or(state.baseline.active);
            state.context = options.context.unwrap_or_else(|| state.baseline.context.clone());
            state.dirty = state.active;
            if self.inner.port.is_root() {
                state.root = Arc::new(state.baseline.value.clone());
            }
            state.baseline.value.clone()
        };
        debug!(id = self.inner.id.raw(), "resetting leaf");

        let changed = self.inner.value.set(value.clone());
        self.inner.evaluate();
        if changed {
            self.inner.port.send(ChildEvent::Changed(value));
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.active == active {
                return;
            }
            state.active = active;
            state.dirty |= active;
        }
        self.inner.evaluate();
    }

    /// Take a value from the parent. Nothing is announced back.
    pub(crate) fn feed(&self, value: Value, root: Arc<Value>) {
        self.inner.state.lock().root = root;
        if self.inner.value.set(value) || self.inner.predicate.uses_scope() {
            self.inner.evaluate();
        }
    }

    pub(crate) fn relocate(&self, key: Key, path: Path) {
        {
            let mut state = self.inner.state.lock();
            if state.path == path && state.key.as_ref() == Some(&key) {
                return;
            }
            state.key = Some(key);
            state.path = path;
        }
        self.inner.evaluate();
    }

    /// Point the leaf at a new path without a key, as the own-shape leaf of
    /// a collection.
    pub(crate) fn move_to(&self, path: Path) {
        {
            let mut state = self.inner.state.lock();
            if state.path == path {
                return;
            }
            state.path = path;
        }
        self.inner.evaluate();
    }

    pub(crate) fn status_cell(&self) -> &Cell<Status> {
        &self.inner.status
    }
}

impl LeafInner {
    fn snapshot(&self) -> Snapshot {
        let mut state = self.state.lock();
        state.token += 1;
        Snapshot {
            token: state.token,
            active: state.active,
            is_required: state.is_required,
            dirty: state.dirty,
            path: state.path.clone(),
            context: state.context.clone(),
            root: state.root.clone(),
        }
    }

    fn evaluate(self: &Arc<Self>) {
        let snapshot = self.snapshot();
        if !snapshot.active {
            self.publish(Status::new(Verdict::Valid, Activity::Inactive, snapshot.dirty));
            return;
        }

        let value = self.value.get();
        let verdict = if !snapshot.is_required && value.is_undefined() {
            Verdict::Valid
        } else {
            let scope = Scope::new(&snapshot.context, &snapshot.root, &snapshot.path);
            self.predicate.evaluate(&value, &scope)
        };

        let pending = match verdict {
            Verdict::Pending(pending) => pending,
            other => {
                let verdict = other.within(&snapshot.path);
                self.publish(Status::new(verdict, Activity::Active, snapshot.dirty));
                return;
            }
        };

        let anchored = anchor(pending, &snapshot.path);
        if let Some(verdict) = anchored.peek() {
            self.publish(Status::new(verdict, Activity::Active, snapshot.dirty));
            return;
        }
        self.publish(Status::new(
            Verdict::Pending(anchored.clone()),
            Activity::Active,
            snapshot.dirty,
        ));

        let weak: Weak<LeafInner> = Arc::downgrade(self);
        let token = snapshot.token;
        anchored.on_settle(move |verdict| {
            if let Some(inner) = weak.upgrade() {
                inner.land(token, verdict.clone());
            }
        });
    }

    fn land(&self, token: u64, verdict: Verdict) {
        let dirty = {
            let state = self.state.lock();
            if state.token != token || !state.active {
                trace!(
                    path = %state.path,
                    token,
                    current = state.token,
                    "discarding stale verdict"
                );
                return;
            }
            state.dirty
        };
        self.publish(Status::new(verdict, Activity::Active, dirty));
    }

    fn publish(&self, status: Status) {
        let valid = status.valid();
        if self.status.set(status.clone()) {
            trace!(id = self.id.raw(), ?valid, "leaf published");
            self.port.send(ChildEvent::Status(status));
        }
    }
}

/// A handle that settles like `pending`, with the failure path anchored
/// under `path`.
fn anchor(pending: Pending, path: &Path) -> Pending {
    let (anchored, settler) = Pending::new();
    let path = path.clone();
    pending.on_settle(move |verdict| settler.settle(verdict.clone().within(&path)));
    anchored
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
