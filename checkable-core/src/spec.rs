//! Predicates and Spec Trees
//!
//! A [`Spec`] describes what a value should look like. It is either a single
//! [`Predicate`] (a leaf) or a [`CollSpec`]: a collection shape with
//! per-key child specs, an optional spread spec for undeclared keys, and an
//! optional predicate on the collection as a whole.
//!
//! # Predicate Contract
//!
//! A predicate receives the value and a [`Scope`] (context, root value,
//! path) and returns a [`Verdict`]. The failure path it reports is relative
//! to the checked node; the node anchors it. Asynchronous predicates return
//! `Verdict::Pending` with a handle they settle later.
//!
//! Predicates that read the scope must be built with
//! [`Predicate::with_scope`]. Only those are re-run when some other part of
//! the root value changes.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::aggregate::{self, RaceCache};
use crate::reactive::Pending;
use crate::result::Verdict;
use crate::value::{CollKind, Key, Path, Value};

/// What a predicate can see besides the value itself.
#[derive(Debug, Clone, Copy)]
pub struct Scope<'a> {
    context: &'a Value,
    root: &'a Value,
    path: &'a Path,
}

impl<'a> Scope<'a> {
    pub fn new(context: &'a Value, root: &'a Value, path: &'a Path) -> Self {
        Self {
            context,
            root,
            path,
        }
    }

    /// Context attached to the checked node.
    pub fn context(&self) -> &'a Value {
        self.context
    }

    /// The whole value of the tree.
    pub fn root(&self) -> &'a Value {
        self.root
    }

    /// Where the checked node sits in the tree.
    pub fn path(&self) -> &'a Path {
        self.path
    }

    /// Read another part of the tree through a relative path such as
    /// `"../password"`. Missing entries read as `Undefined`.
    pub fn lookup(&self, relative: &str) -> Value {
        let target = self.path.resolve(relative);
        self.root.lookup(&target).cloned().unwrap_or_default()
    }
}

type CheckFn = dyn Fn(&Value, &Scope<'_>) -> Verdict + Send + Sync;

/// A check on a single value.
#[derive(Clone)]
pub struct Predicate {
    name: Cow<'static, str>,
    check: Arc<CheckFn>,
    uses_scope: bool,
}

impl Predicate {
    /// A predicate over the value alone.
    pub fn new<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Verdict + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed("predicate"),
            check: Arc::new(move |value: &Value, _: &Scope<'_>| check(value)),
            uses_scope: false,
        }
    }

    /// A predicate that also reads its [`Scope`]. It is re-evaluated
    /// whenever the root value changes.
    pub fn with_scope<F>(check: F) -> Self
    where
        F: Fn(&Value, &Scope<'_>) -> Verdict + Send + Sync + 'static,
    {
        Self {
            name: Cow::Borrowed("scoped"),
            check: Arc::new(check),
            uses_scope: true,
        }
    }

    /// A synchronous predicate written as `Ok(())` / `Err(reason)`.
    pub fn from_fn<F>(check: F) -> Self
    where
        F: Fn(&Value) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(move |value| check(value).into())
    }

    /// An asynchronous predicate. Each evaluation spawns `check(value)` on
    /// the ambient tokio runtime and reports it as pending until it
    /// completes.
    pub fn from_future<F, Fut>(check: F) -> Self
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Verdict> + Send + 'static,
    {
        Self::new(move |value| Verdict::Pending(Pending::spawn(check(value.clone()))))
            .named("async")
    }

    pub fn always_valid() -> Self {
        Self::new(|_| Verdict::Valid).named("always_valid")
    }

    /// Fails blank values (undefined, null, empty string) with `message`.
    pub fn not_blank(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |value| {
            if value.is_blank() {
                Verdict::invalid(message.clone())
            } else {
                Verdict::Valid
            }
        })
        .named("not_blank")
    }

    /// Fails any defined value that is not a collection of `kind`.
    pub fn coll_kind(kind: CollKind, message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(move |value| match value {
            Value::Undefined => Verdict::Valid,
            v if v.kind() == Some(kind) => Verdict::Valid,
            _ => Verdict::invalid(message.clone()),
        })
        .named("coll_kind")
    }

    /// Conjunction. Predicates run in order and the first invalid verdict
    /// stops the chain; pending verdicts are raced.
    pub fn all<I>(predicates: I) -> Self
    where
        I: IntoIterator<Item = Predicate>,
    {
        let predicates: Vec<Predicate> = predicates.into_iter().collect();
        let uses_scope = predicates.iter().any(|p| p.uses_scope);
        Self {
            name: Cow::Borrowed("all"),
            check: Arc::new(move |value: &Value, scope: &Scope<'_>| {
                let mut verdicts = Vec::with_capacity(predicates.len());
                for predicate in &predicates {
                    let verdict = predicate.evaluate(value, scope);
                    if verdict.is_invalid() {
                        return verdict;
                    }
                    verdicts.push(verdict);
                }
                aggregate::combine(verdicts.iter(), &mut RaceCache::default())
            }),
            uses_scope,
        }
    }

    /// Label shown in `Debug` output.
    pub fn named(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uses_scope(&self) -> bool {
        self.uses_scope
    }

    pub fn evaluate(&self, value: &Value, scope: &Scope<'_>) -> Verdict {
        (self.check)(value, scope)
    }
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Predicate")
            .field("name", &self.name)
            .field("uses_scope", &self.uses_scope)
            .finish()
    }
}

/// Spec of a collection node.
#[derive(Debug, Clone)]
pub struct CollSpec {
    kind: CollKind,
    guard: Option<Predicate>,
    own: Option<Predicate>,
    fields: IndexMap<Key, Spec>,
    spread: Option<Spec>,
}

impl CollSpec {
    pub fn new(kind: CollKind) -> Self {
        Self {
            kind,
            guard: None,
            own: None,
            fields: IndexMap::new(),
            spread: None,
        }
    }

    pub fn record() -> Self {
        Self::new(CollKind::Record)
    }

    pub fn sequence() -> Self {
        Self::new(CollKind::Sequence)
    }

    pub fn map() -> Self {
        Self::new(CollKind::KeyedMap)
    }

    /// Declare the spec of the entry at `key`. Declared keys always get a
    /// child node, even when the value lacks them.
    pub fn field(mut self, key: impl Into<Key>, spec: impl Into<Spec>) -> Self {
        self.fields.insert(key.into(), spec.into());
        self
    }

    /// Spec for every entry without a declared one.
    pub fn spread(mut self, spec: impl Into<Spec>) -> Self {
        self.spread = Some(spec.into());
        self
    }

    /// Predicate on the collection as a whole. Repeated calls conjoin.
    pub fn check(mut self, predicate: Predicate) -> Self {
        self.own = Some(match self.own.take() {
            Some(existing) => Predicate::all([existing, predicate]),
            None => predicate,
        });
        self
    }

    pub fn kind(&self) -> CollKind {
        self.kind
    }

    pub fn own(&self) -> Option<&Predicate> {
        self.own.as_ref()
    }

    pub fn field_spec(&self, key: &Key) -> Option<&Spec> {
        self.fields.get(key)
    }

    pub fn spread_spec(&self) -> Option<&Spec> {
        self.spread.as_ref()
    }

    pub fn declared_keys(&self) -> impl Iterator<Item = &Key> {
        self.fields.keys()
    }

    pub(crate) fn fields(&self) -> impl Iterator<Item = (&Key, &Spec)> {
        self.fields.iter()
    }

    /// The same collection spec with `guard` checked before anything else
    /// about the collection itself.
    pub(crate) fn guarded(&self, guard: Predicate) -> CollSpec {
        let mut spec = self.clone();
        spec.guard = Some(match spec.guard.take() {
            Some(existing) => Predicate::all([guard, existing]),
            None => guard,
        });
        spec
    }

    /// Guard, shape check and own predicate, in that order, as run by the
    /// node that represents the collection itself.
    pub(crate) fn own_predicate(&self, wrong_type: String) -> Predicate {
        let mut chain = Vec::with_capacity(3);
        chain.extend(self.guard.clone());
        chain.push(Predicate::coll_kind(self.kind, wrong_type));
        chain.extend(self.own.clone());
        Predicate::all(chain)
    }
}

/// A spec tree.
#[derive(Debug, Clone)]
pub enum Spec {
    Pred(Predicate),
    Coll(Arc<CollSpec>),
}

impl Spec {
    pub fn as_coll(&self) -> Option<&Arc<CollSpec>> {
        match self {
            Spec::Coll(coll) => Some(coll),
            Spec::Pred(_) => None,
        }
    }

    pub fn as_pred(&self) -> Option<&Predicate> {
        match self {
            Spec::Pred(pred) => Some(pred),
            Spec::Coll(_) => None,
        }
    }
}

impl From<Predicate> for Spec {
    fn from(predicate: Predicate) -> Self {
        Spec::Pred(predicate)
    }
}

impl From<CollSpec> for Spec {
    fn from(coll: CollSpec) -> Self {
        Spec::Coll(Arc::new(coll))
    }
}

impl From<Arc<CollSpec>> for Spec {
    fn from(coll: Arc<CollSpec>) -> Self {
        Spec::Coll(coll)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
