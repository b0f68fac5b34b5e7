//! Validator Nodes
//!
//! A checkable tree mirrors a value with one node per position. Leaves wrap a
//! single predicate; composites own one child per key plus a leaf for the
//! collection's own shape check, and fold everything into one status.
//!
//! # Data Flow
//!
//! Downward, a parent calls into its children: `feed` (new sub-value, no
//! announcement), activation, context and relocation. Upward, a child only
//! ever talks to a [`ParentPort`]: it reports value edits that started at
//! the child, and every status it publishes. A child holds no reference to
//! its parent's state. Detaching a port (when the child's key disappears)
//! silences the child for good.
//!
//! # Rules
//!
//! - `set` diffs: surviving children are reused and fed in place.
//! - `reset` rebuilds: every child is recreated and revalidates fresh.
//! - A node does nothing until activated, directly or through an ancestor.
//! - Publishing an equal status is a no-op.

mod composite;
mod leaf;

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::debug;

use crate::config::{Config, Options, ResetOptions};
use crate::error::Result;
use crate::reactive::{Cell, Subscription};
use crate::resolve::{self, IndexBy, Requirement};
use crate::result::{Activity, Status};
use crate::spec::Spec;
use crate::value::{Key, Path, Value};

pub use composite::CompositeNode;
pub use leaf::LeafNode;

/// Unique identifier for a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// What a child reports to its parent.
#[derive(Debug, Clone)]
pub(crate) enum ChildEvent {
    /// The child's value was edited through the child itself.
    Changed(Value),
    /// The child published a new status.
    Status(Status),
}

type Sink = Arc<dyn Fn(ChildEvent) + Send + Sync>;

/// The only channel from a child to its parent.
#[derive(Clone)]
pub(crate) struct ParentPort {
    attached: Arc<AtomicBool>,
    sink: Option<Sink>,
}

impl ParentPort {
    pub(crate) fn new<F>(sink: F) -> Self
    where
        F: Fn(ChildEvent) + Send + Sync + 'static,
    {
        Self {
            attached: Arc::new(AtomicBool::new(true)),
            sink: Some(Arc::new(sink)),
        }
    }

    /// The port of a tree root: nothing listens.
    pub(crate) fn root() -> Self {
        Self {
            attached: Arc::new(AtomicBool::new(false)),
            sink: None,
        }
    }

    pub(crate) fn is_root(&self) -> bool {
        self.sink.is_none()
    }

    pub(crate) fn send(&self, event: ChildEvent) {
        if !self.attached.load(Ordering::Acquire) {
            return;
        }
        if let Some(sink) = &self.sink {
            sink(event);
        }
    }

    pub(crate) fn detach(&self) {
        self.attached.store(false, Ordering::Release);
    }
}

/// Everything a node needs besides its spec and value.
pub(crate) struct NodeInit {
    pub key: Option<Key>,
    pub path: Path,
    pub active: bool,
    pub requirement: Option<Requirement>,
    pub is_required: bool,
    pub context: Value,
    pub root: Arc<Value>,
    pub index_by: Option<IndexBy>,
    pub config: Arc<Config>,
    pub port: ParentPort,
}

/// State a node returns to on `reset()`.
#[derive(Debug, Clone)]
pub(crate) struct Baseline {
    pub value: Value,
    pub active: bool,
    pub context: Value,
}

/// A node of a checkable tree.
#[derive(Clone)]
pub enum Node {
    Leaf(LeafNode),
    Composite(CompositeNode),
}

macro_rules! delegate {
    ($self:ident, $node:ident => $body:expr) => {
        match $self {
            Node::Leaf($node) => $body,
            Node::Composite($node) => $body,
        }
    };
}

impl Node {
    pub fn id(&self) -> NodeId {
        delegate!(self, n => n.id())
    }

    /// The node's identity in its parent's key space. `None` for a root
    /// built without a key.
    pub fn key(&self) -> Option<Key> {
        delegate!(self, n => n.key())
    }

    pub fn path(&self) -> Path {
        delegate!(self, n => n.path())
    }

    /// Current value.
    pub fn get(&self) -> Value {
        delegate!(self, n => n.get())
    }

    /// Last published status.
    pub fn status(&self) -> Status {
        delegate!(self, n => n.status())
    }

    /// Receive the current status now and every later change.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Status) + Send + Sync + 'static,
    {
        delegate!(self, n => n.subscribe(callback))
    }

    /// Receive the current value now and every later change.
    pub fn watch<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        delegate!(self, n => n.watch(callback))
    }

    /// Replace the value. Equal values are ignored.
    pub fn set(&self, value: impl Into<Value>) {
        let value = value.into();
        delegate!(self, n => n.set(value))
    }

    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&Value) -> Value,
    {
        let next = f(&self.get());
        self.set(next);
    }

    /// Turn evaluation on or off for this node and every descendant.
    ///
    /// The work happens before this returns. The future resolves with the
    /// first status that is not pending.
    pub fn activate(&self, active: bool) -> impl Future<Output = Status> + Send + 'static {
        delegate!(self, n => n.set_active(active));
        settled(self.status_cell())
    }

    /// Activate and resolve to whether the subtree is valid.
    pub fn validate(&self) -> impl Future<Output = bool> + Send + 'static {
        let settled = self.activate(true);
        async move { settled.await.valid() == Some(true) }
    }

    /// Flip activation, using the node's own intent (not a mixed subtree).
    pub fn toggle(&self) -> impl Future<Output = Status> + Send + 'static {
        let active = self.is_active();
        self.activate(!active)
    }

    /// Whether this node was asked to evaluate.
    pub fn is_active(&self) -> bool {
        delegate!(self, n => n.is_active())
    }

    /// Activity of the whole subtree.
    pub fn activity(&self) -> Activity {
        self.status().active
    }

    pub fn is_dirty(&self) -> bool {
        self.status().dirty
    }

    pub fn is_required(&self) -> bool {
        delegate!(self, n => n.is_required())
    }

    pub fn context(&self) -> Value {
        delegate!(self, n => n.context())
    }

    /// Replace the context of this node and its descendants.
    pub fn set_context(&self, context: impl Into<Value>) {
        let context = context.into();
        delegate!(self, n => n.set_context(context))
    }

    /// Restore the baseline and rebuild the subtree from scratch.
    ///
    /// `Some(value)` becomes the new baseline value. Options not given fall
    /// back to the baseline.
    pub fn reset(&self, value: Option<Value>, options: ResetOptions) {
        delegate!(self, n => n.reset(value, options))
    }

    /// Immediate children in display order. Empty for leaves.
    pub fn children(&self) -> Vec<(Key, Node)> {
        match self {
            Node::Leaf(_) => Vec::new(),
            Node::Composite(n) => n.children(),
        }
    }

    pub fn child(&self, key: &Key) -> Option<Node> {
        match self {
            Node::Leaf(_) => None,
            Node::Composite(n) => n.child(key),
        }
    }

    /// Follow `path` through the tree.
    pub fn descendant(&self, path: &Path) -> Option<Node> {
        path.keys()
            .iter()
            .try_fold(self.clone(), |node, key| node.child(key))
    }

    /// Display order of the children.
    pub fn order(&self) -> Vec<Key> {
        match self {
            Node::Leaf(_) => Vec::new(),
            Node::Composite(n) => n.order(),
        }
    }

    /// Permute the display order of the children. Returns false, changing
    /// nothing, unless `order` is a permutation of the current keys.
    pub fn reorder(&self, order: Vec<Key>) -> bool {
        match self {
            Node::Leaf(_) => false,
            Node::Composite(n) => n.reorder(order),
        }
    }

    pub fn as_leaf(&self) -> Option<&LeafNode> {
        match self {
            Node::Leaf(n) => Some(n),
            Node::Composite(_) => None,
        }
    }

    pub fn as_composite(&self) -> Option<&CompositeNode> {
        match self {
            Node::Composite(n) => Some(n),
            Node::Leaf(_) => None,
        }
    }

    pub(crate) fn set_active(&self, active: bool) {
        delegate!(self, n => n.set_active(active))
    }

    pub(crate) fn feed(&self, value: Value, root: Arc<Value>) {
        delegate!(self, n => n.feed(value, root))
    }

    pub(crate) fn relocate(&self, key: Key, path: Path) {
        delegate!(self, n => n.relocate(key, path))
    }

    fn status_cell(&self) -> &Cell<Status> {
        delegate!(self, n => n.status_cell())
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match self {
            Node::Leaf(_) => "Leaf",
            Node::Composite(_) => "Composite",
        };
        f.debug_struct(kind)
            .field("id", &self.id())
            .field("path", &self.path())
            .field("value", &self.get())
            .field("status", &self.status())
            .finish()
    }
}

/// Build a checkable tree for `value`.
///
/// Fails only on a malformed spec: a declared key the collection kind cannot
/// hold, or key derivation requested for a record.
pub fn checkable(spec: impl Into<Spec>, value: impl Into<Value>, options: Options) -> Result<Node> {
    let spec = spec.into();
    resolve::check_spec(&spec, options.index_by.as_ref(), &Path::root())?;

    let is_required = resolve::is_effectively_required(options.required.as_ref());
    let spec = resolve::require(spec, is_required, &options.config.messages.is_required);
    let value = value.into();

    debug!(
        key = ?options.key,
        active = options.active,
        required = is_required,
        "building checkable tree"
    );

    let root = Arc::new(value.clone());
    Ok(build(
        spec,
        value,
        NodeInit {
            key: options.key,
            path: Path::root(),
            active: options.active,
            requirement: options.required,
            is_required,
            context: options.context,
            root,
            index_by: options.index_by,
            config: options.config,
            port: ParentPort::root(),
        },
    ))
}

/// Leaf for a predicate, composite for a collection spec.
pub(crate) fn build(spec: Spec, value: Value, init: NodeInit) -> Node {
    match spec {
        Spec::Pred(predicate) => Node::Leaf(LeafNode::new(predicate, value, init)),
        Spec::Coll(coll) => Node::Composite(CompositeNode::new(coll, value, init)),
    }
}

/// A future resolving with the first non-pending status published by `cell`.
pub(crate) fn settled(cell: &Cell<Status>) -> impl Future<Output = Status> + Send + 'static {
    let (tx, rx) = oneshot::channel();
    let tx = Mutex::new(Some(tx));
    let subscription = cell.subscribe(move |status: &Status| {
        if status.is_pending() {
            return;
        }
        if let Some(tx) = tx.lock().take() {
            let _ = tx.send(status.clone());
        }
    });

    async move {
        let result = rx.await;
        drop(subscription);
        match result {
            Ok(status) => status,
            Err(_) => std::future::pending().await,
        }
    }
}
