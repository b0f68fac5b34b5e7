//! Pending Verdicts
//!
//! An asynchronous predicate does not hand back a bare future. It returns a
//! [`Pending`] handle: a one-shot slot that is settled exactly once with a
//! final [`Verdict`], plus continuation registration via
//! [`Pending::on_settle`].
//!
//! Continuations run synchronously on whichever thread settles the handle.
//! Registering on an already-settled handle runs the continuation at once.
//! Nodes capture a validation token in their continuation and compare it
//! against the current one when it fires; that comparison is the only
//! cancellation mechanism. A stale continuation simply does nothing.
//!
//! Settling with another `Pending` chains: the handle settles when the inner
//! one does, so continuations only ever observe `Valid` or `Invalid`.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::result::Verdict;

static PENDING_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

type Continuation = Box<dyn FnOnce(&Verdict) + Send>;

enum State {
    Waiting(Vec<Continuation>),
    Settled(Verdict),
}

struct Inner {
    id: u64,
    state: Mutex<State>,
}

/// Handle to a verdict that is not known yet.
///
/// Clones share the same slot; equality is identity.
#[derive(Clone)]
pub struct Pending {
    inner: Arc<Inner>,
}

/// The write side of a [`Pending`] handle.
///
/// Dropping a `Settler` without settling leaves the handle pending forever.
pub struct Settler {
    inner: Arc<Inner>,
}

impl Pending {
    /// Create an unsettled handle and the means to settle it.
    pub fn new() -> (Pending, Settler) {
        let inner = Arc::new(Inner {
            id: PENDING_ID_COUNTER.fetch_add(1, Ordering::Relaxed),
            state: Mutex::new(State::Waiting(Vec::new())),
        });
        (
            Pending {
                inner: inner.clone(),
            },
            Settler { inner },
        )
    }

    /// A handle that is already settled with `verdict`.
    pub fn ready(verdict: Verdict) -> Pending {
        let (pending, settler) = Pending::new();
        settler.settle(verdict);
        pending
    }

    /// Drive `future` on the ambient tokio runtime and settle with its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<F>(future: F) -> Pending
    where
        F: Future<Output = Verdict> + Send + 'static,
    {
        let (pending, settler) = Pending::new();
        tokio::spawn(async move {
            settler.settle(future.await);
        });
        pending
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether two handles share the same slot.
    pub fn ptr_eq(&self, other: &Pending) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_settled(&self) -> bool {
        matches!(*self.inner.state.lock(), State::Settled(_))
    }

    /// The settled verdict, if any.
    pub fn peek(&self) -> Option<Verdict> {
        match &*self.inner.state.lock() {
            State::Settled(verdict) => Some(verdict.clone()),
            State::Waiting(_) => None,
        }
    }

    /// Run `continuation` once this handle settles.
    pub fn on_settle<F>(&self, continuation: F)
    where
        F: FnOnce(&Verdict) + Send + 'static,
    {
        let settled = {
            let mut state = self.inner.state.lock();
            match &mut *state {
                State::Waiting(continuations) => {
                    continuations.push(Box::new(continuation));
                    return;
                }
                State::Settled(verdict) => verdict.clone(),
            }
        };
        continuation(&settled);
    }

    /// A future resolving to the settled verdict.
    pub fn settled(&self) -> impl Future<Output = Verdict> + Send + 'static {
        let (tx, rx) = oneshot::channel();
        self.on_settle(move |verdict| {
            let _ = tx.send(verdict.clone());
        });
        async move {
            match rx.await {
                Ok(verdict) => verdict,
                // The settler went away without settling.
                Err(_) => std::future::pending().await,
            }
        }
    }
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl Eq for Pending {}

impl fmt::Debug for Pending {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pending")
            .field("id", &self.inner.id)
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Settler {
    /// Settle the handle. Later calls on a settled slot are ignored.
    pub fn settle(self, verdict: Verdict) {
        settle_inner(&self.inner, verdict);
    }
}

impl fmt::Debug for Settler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settler").field("id", &self.inner.id).finish()
    }
}

fn settle_inner(inner: &Arc<Inner>, verdict: Verdict) {
    if let Verdict::Pending(next) = verdict {
        if Arc::ptr_eq(&next.inner, inner) {
            debug_assert!(false, "pending handle settled with itself");
            return;
        }
        let inner = inner.clone();
        next.on_settle(move |v| settle_inner(&inner, v.clone()));
        return;
    }

    let continuations = {
        let mut state = inner.state.lock();
        if matches!(*state, State::Settled(_)) {
            return;
        }
        match std::mem::replace(&mut *state, State::Settled(verdict.clone())) {
            State::Waiting(continuations) => continuations,
            State::Settled(_) => Vec::new(),
        }
    };

    for continuation in continuations {
        continuation(&verdict);
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::Failure;
    use crate::value::Path;

    #[test]
    fn continuations_run_on_settle() {
        let (pending, settler) = Pending::new();
        let seen = Arc::new(Mutex::new(None));
        let seen_clone = seen.clone();

        pending.on_settle(move |v| *seen_clone.lock() = Some(v.clone()));
        assert!(seen.lock().is_none());
        assert!(!pending.is_settled());

        settler.settle(Verdict::Valid);
        assert_eq!(*seen.lock(), Some(Verdict::Valid));
        assert!(pending.is_settled());
    }

    #[test]
    fn late_registration_runs_immediately() {
        let pending = Pending::ready(Verdict::Valid);
        let hit = Arc::new(Mutex::new(false));
        let hit_clone = hit.clone();

        pending.on_settle(move |_| *hit_clone.lock() = true);
        assert!(*hit.lock());
    }

    #[test]
    fn settling_with_pending_chains() {
        let (outer, outer_settler) = Pending::new();
        let (inner, inner_settler) = Pending::new();

        outer_settler.settle(Verdict::Pending(inner));
        assert!(!outer.is_settled());

        let failure = Verdict::Invalid(Failure::new("taken", Path::root()));
        inner_settler.settle(failure.clone());
        assert_eq!(outer.peek(), Some(failure));
    }

    #[test]
    fn equality_is_identity() {
        let (a, _sa) = Pending::new();
        let (b, _sb) = Pending::new();
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn settled_future_resolves() {
        let (pending, settler) = Pending::new();
        let waiter = pending.settled();
        settler.settle(Verdict::Valid);
        assert_eq!(waiter.await, Verdict::Valid);
    }

    #[tokio::test]
    async fn spawn_settles_from_task() {
        let pending = Pending::spawn(async { Verdict::invalid("nope") });
        let verdict = pending.settled().await;
        assert_eq!(verdict.reason(), Some("nope"));
    }
}
