//! Verdicts and Published Status
//!
//! A [`Verdict`] is what a predicate (or a whole subtree) concludes about a
//! value: valid, invalid with a reason, or pending. A [`Status`] is what a
//! node publishes to its subscribers: the verdict plus the node's activity,
//! which children are still pending, and whether the node has ever been
//! activated.
//!
//! The serialized form of a status is the boundary shape consumed by UI
//! bindings: `{ valid: true|false|null, reason?, path?, active?, pendings? }`.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};

use crate::reactive::Pending;
use crate::value::{Key, Path};

/// A failed check: the human-readable reason and where it happened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Failure {
    pub reason: String,
    pub path: Path,
}

impl Failure {
    pub fn new(reason: impl Into<String>, path: Path) -> Self {
        Self {
            reason: reason.into(),
            path,
        }
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Outcome of checking a value.
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Valid,
    Invalid(Failure),
    Pending(Pending),
}

impl Verdict {
    /// An invalid verdict with a path relative to the checked node.
    pub fn invalid(reason: impl Into<String>) -> Self {
        Verdict::Invalid(Failure::new(reason, Path::root()))
    }

    /// `Some(true)` if valid, `Some(false)` if invalid, `None` while pending.
    pub fn valid(&self) -> Option<bool> {
        match self {
            Verdict::Valid => Some(true),
            Verdict::Invalid(_) => Some(false),
            Verdict::Pending(_) => None,
        }
    }

    pub fn is_valid(&self) -> bool {
        matches!(self, Verdict::Valid)
    }

    pub fn is_invalid(&self) -> bool {
        matches!(self, Verdict::Invalid(_))
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Verdict::Pending(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Verdict::Invalid(failure) => Some(failure),
            _ => None,
        }
    }

    pub fn reason(&self) -> Option<&str> {
        self.failure().map(|f| f.reason.as_str())
    }

    pub fn path(&self) -> Option<&Path> {
        self.failure().map(|f| &f.path)
    }

    pub fn pending(&self) -> Option<&Pending> {
        match self {
            Verdict::Pending(pending) => Some(pending),
            _ => None,
        }
    }

    /// Anchor a failure's relative path under `base`.
    pub(crate) fn within(self, base: &Path) -> Self {
        match self {
            Verdict::Invalid(failure) => Verdict::Invalid(Failure {
                path: base.join(&failure.path),
                reason: failure.reason,
            }),
            other => other,
        }
    }
}

impl From<Result<(), String>> for Verdict {
    fn from(result: Result<(), String>) -> Self {
        match result {
            Ok(()) => Verdict::Valid,
            Err(reason) => Verdict::invalid(reason),
        }
    }
}

/// Whether a node (or every node of a subtree) is evaluating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Activity {
    Active,
    Inactive,
    /// Some descendants are active and some are not.
    Mixed,
}

impl Activity {
    pub fn from_flag(active: bool) -> Self {
        if active {
            Activity::Active
        } else {
            Activity::Inactive
        }
    }

    /// `Some(bool)` for a uniform activity, `None` when mixed.
    pub fn as_flag(self) -> Option<bool> {
        match self {
            Activity::Active => Some(true),
            Activity::Inactive => Some(false),
            Activity::Mixed => None,
        }
    }

    /// Whether at least part of the subtree is evaluating.
    pub fn engaged(self) -> bool {
        self != Activity::Inactive
    }

    /// Fold activities: uniform inputs keep their value, disagreement is
    /// `Mixed`. Returns `None` for an empty input.
    pub fn combine<I>(activities: I) -> Option<Activity>
    where
        I: IntoIterator<Item = Activity>,
    {
        activities.into_iter().fold(None, |acc, next| match acc {
            None => Some(next),
            Some(prev) if prev == next => Some(prev),
            Some(_) => Some(Activity::Mixed),
        })
    }
}

/// Callback carried by a composite status to activate one child (by key) or
/// the whole subtree (`None`).
#[derive(Clone)]
pub struct Activator(Arc<dyn Fn(Option<&Key>) -> bool + Send + Sync>);

impl Activator {
    pub(crate) fn new<F>(activate: F) -> Self
    where
        F: Fn(Option<&Key>) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(activate))
    }

    /// Returns false when the key is unknown or the tree is gone.
    pub fn activate(&self, key: Option<&Key>) -> bool {
        (self.0)(key)
    }
}

impl fmt::Debug for Activator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Activator")
    }
}

/// What a node publishes to its subscribers.
#[derive(Debug, Clone)]
pub struct Status {
    pub verdict: Verdict,
    pub active: Activity,
    /// Per child: whether its verdict is still pending. Empty for leaves.
    pub pendings: IndexMap<Key, bool>,
    /// True once this node or a descendant has been activated.
    pub dirty: bool,
    activator: Option<Activator>,
}

impl Status {
    /// The status of a node that has never been activated.
    pub fn inactive() -> Self {
        Self {
            verdict: Verdict::Valid,
            active: Activity::Inactive,
            pendings: IndexMap::new(),
            dirty: false,
            activator: None,
        }
    }

    pub(crate) fn new(verdict: Verdict, active: Activity, dirty: bool) -> Self {
        Self {
            verdict,
            active,
            pendings: IndexMap::new(),
            dirty,
            activator: None,
        }
    }

    pub(crate) fn with_pendings(mut self, pendings: IndexMap<Key, bool>) -> Self {
        self.pendings = pendings;
        self
    }

    pub(crate) fn with_activator(mut self, activator: Activator) -> Self {
        self.activator = Some(activator);
        self
    }

    pub fn valid(&self) -> Option<bool> {
        self.verdict.valid()
    }

    pub fn is_pending(&self) -> bool {
        self.verdict.is_pending()
    }

    pub fn is_inactive(&self) -> bool {
        self.active == Activity::Inactive
    }

    pub fn reason(&self) -> Option<&str> {
        self.verdict.reason()
    }

    pub fn path(&self) -> Option<&Path> {
        self.verdict.path()
    }

    /// Activate one child of the publishing node, or the whole node.
    ///
    /// Leaf statuses carry no activator and return false.
    pub fn activate(&self, key: Option<&Key>) -> bool {
        self.activator
            .as_ref()
            .map(|activator| activator.activate(key))
            .unwrap_or(false)
    }
}

impl PartialEq for Status {
    fn eq(&self, other: &Self) -> bool {
        self.verdict == other.verdict
            && self.active == other.active
            && self.pendings == other.pendings
            && self.dirty == other.dirty
    }
}

impl Serialize for Status {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("valid", &self.valid())?;
        if let Some(failure) = self.verdict.failure() {
            map.serialize_entry("reason", &failure.reason)?;
            map.serialize_entry("path", &failure.path)?;
        }
        map.serialize_entry("active", &self.active.as_flag())?;
        if !self.pendings.is_empty() {
            map.serialize_entry("pendings", &self.pendings)?;
        }
        map.serialize_entry("dirty", &self.dirty)?;
        map.end()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
