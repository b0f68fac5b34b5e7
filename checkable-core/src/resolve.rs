//! Key and Requirement Resolution
//!
//! Stateless helpers a collection node uses when it creates a child: which
//! spec applies to a key, whether the key is required, and what identity a
//! child gets when keys are derived from values.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::{CheckableError, Result};
use crate::spec::{CollSpec, Predicate, Spec};
use crate::value::{CollKind, Key, Path, Value};

/// Describes which parts of a value must be present.
///
/// A flag applies to a node and everything under it. A tree mirrors the
/// value's shape, with a spread entry for undeclared keys. A dynamic
/// requirement computes the descriptor for a child from its key.
#[derive(Clone)]
pub enum Requirement {
    Flag(bool),
    Tree(RequirementTree),
    Dynamic(Arc<dyn Fn(&Key) -> Requirement + Send + Sync>),
}

impl Requirement {
    pub fn tree() -> RequirementTree {
        RequirementTree::default()
    }

    pub fn dynamic<F>(f: F) -> Self
    where
        F: Fn(&Key) -> Requirement + Send + Sync + 'static,
    {
        Requirement::Dynamic(Arc::new(f))
    }
}

impl From<bool> for Requirement {
    fn from(flag: bool) -> Self {
        Requirement::Flag(flag)
    }
}

impl From<RequirementTree> for Requirement {
    fn from(tree: RequirementTree) -> Self {
        Requirement::Tree(tree)
    }
}

impl fmt::Debug for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Requirement::Flag(flag) => f.debug_tuple("Flag").field(flag).finish(),
            Requirement::Tree(tree) => f.debug_tuple("Tree").field(tree).finish(),
            Requirement::Dynamic(_) => f.write_str("Dynamic"),
        }
    }
}

/// Per-key requirements. The node holding the tree is itself required
/// unless the tree is marked optional.
#[derive(Debug, Clone, Default)]
pub struct RequirementTree {
    entries: IndexMap<Key, Requirement>,
    spread: Option<Box<Requirement>>,
    optional: bool,
}

impl RequirementTree {
    pub fn entry(mut self, key: impl Into<Key>, requirement: impl Into<Requirement>) -> Self {
        self.entries.insert(key.into(), requirement.into());
        self
    }

    pub fn spread(mut self, requirement: impl Into<Requirement>) -> Self {
        self.spread = Some(Box::new(requirement.into()));
        self
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }
}

/// The requirement descriptor that applies to the child at `key`.
pub fn resolve_requirement(key: &Key, requirement: Option<&Requirement>) -> Option<Requirement> {
    match requirement? {
        Requirement::Flag(flag) => Some(Requirement::Flag(*flag)),
        Requirement::Tree(tree) => tree
            .entries
            .get(key)
            .or(tree.spread.as_deref())
            .cloned(),
        Requirement::Dynamic(f) => Some(f(key)),
    }
}

/// Whether a resolved descriptor makes its node required.
pub fn is_effectively_required(requirement: Option<&Requirement>) -> bool {
    match requirement {
        None => false,
        Some(Requirement::Flag(flag)) => *flag,
        Some(Requirement::Tree(tree)) => !tree.optional,
        Some(Requirement::Dynamic(_)) => true,
    }
}

/// The declared spec for `key`, else the spread spec, else always valid.
pub fn resolve_child_spec(key: &Key, parent: &CollSpec) -> Spec {
    parent
        .field_spec(key)
        .or_else(|| parent.spread_spec())
        .cloned()
        .unwrap_or_else(|| Spec::Pred(Predicate::always_valid()))
}

/// Add the "not blank" check to `spec` when the node is required.
pub fn require(spec: Spec, required: bool, message: &str) -> Spec {
    if !required {
        return spec;
    }
    let guard = Predicate::not_blank(message);
    match spec {
        Spec::Pred(predicate) => Spec::Pred(Predicate::all([guard, predicate])),
        Spec::Coll(coll) => Spec::from(coll.guarded(guard)),
    }
}

/// Spec for the child at `key`, required-ness included.
pub fn effective_child_spec(key: &Key, parent: &CollSpec, required: bool, message: &str) -> Spec {
    require(resolve_child_spec(key, parent), required, message)
}

/// Context for the child at `key`: the entry under that key when the
/// context is a collection holding it, the whole context otherwise.
pub fn child_context(context: &Value, key: &Key) -> Value {
    context.get(key).cloned().unwrap_or_else(|| context.clone())
}

type DeriveFn = dyn Fn(&Value, &Key) -> Key + Send + Sync;

/// Key derivation for sequences and keyed maps.
///
/// When a collection's entries are identified by something inside them (an
/// id field, say) rather than by position, children keep their identity
/// when the value is reordered. Nested descriptors mirror the spec shape.
#[derive(Clone, Default)]
pub struct IndexBy {
    derive: Option<Arc<DeriveFn>>,
    entries: IndexMap<Key, IndexBy>,
    spread: Option<Box<IndexBy>>,
}

impl IndexBy {
    /// Derive each entry's identity from its value and natural key.
    pub fn new<F>(derive: F) -> Self
    where
        F: Fn(&Value, &Key) -> Key + Send + Sync + 'static,
    {
        Self {
            derive: Some(Arc::new(derive)),
            ..Self::default()
        }
    }

    /// Identity by a named field of each entry, falling back to the natural
    /// key when the field is missing or not a scalar.
    pub fn field(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(move |value, key| match value.get(&Key::Name(name.clone())) {
            Some(Value::String(s)) => Key::Name(s.clone()),
            Some(Value::Int(i)) if *i >= 0 => Key::Name(i.to_string()),
            _ => key.clone(),
        })
    }

    /// Natural keys here, with derivation for descendants only.
    pub fn nested() -> Self {
        Self::default()
    }

    pub fn key(mut self, key: impl Into<Key>, index_by: IndexBy) -> Self {
        self.entries.insert(key.into(), index_by);
        self
    }

    pub fn spread(mut self, index_by: IndexBy) -> Self {
        self.spread = Some(Box::new(index_by));
        self
    }

    pub fn derives(&self) -> bool {
        self.derive.is_some()
    }

    /// The identity of the entry `value` found at `key`.
    pub fn derive(&self, value: &Value, key: &Key) -> Key {
        match &self.derive {
            Some(derive) => derive(value, key),
            None => key.clone(),
        }
    }

    /// The descriptor for the child at `key`.
    pub fn child(&self, key: &Key) -> Option<IndexBy> {
        self.entries
            .get(key)
            .or(self.spread.as_deref())
            .cloned()
    }
}

impl fmt::Debug for IndexBy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexBy")
            .field("derives", &self.derives())
            .field("entries", &self.entries)
            .field("spread", &self.spread)
            .finish()
    }
}

/// Reject spec trees that cannot be built: declared keys a collection kind
/// cannot hold, and key derivation on records.
pub fn check_spec(spec: &Spec, index_by: Option<&IndexBy>, path: &Path) -> Result<()> {
    let Spec::Coll(coll) = spec else {
        return Ok(());
    };

    if coll.kind() == CollKind::Record && index_by.is_some_and(IndexBy::derives) {
        return Err(CheckableError::IndexByUnsupported { path: path.clone() });
    }

    for (key, child) in coll.fields() {
        if !coll.kind().accepts(key) {
            return Err(CheckableError::KeyKindMismatch {
                path: path.clone(),
                key: key.clone(),
                kind: coll.kind(),
            });
        }
        let child_index = index_by.and_then(|ib| ib.child(key));
        check_spec(child, child_index.as_ref(), &path.child(key.clone()))?;
    }

    if let Some(spread) = coll.spread_spec() {
        let spread_index = index_by.and_then(|ib| ib.spread.as_deref());
        check_spec(spread, spread_index, &path.child(Key::from("*")))?;
    }

    Ok(())
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
