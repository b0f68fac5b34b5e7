//! Cell Implementation
//!
//! A Cell is the unit of observable state every checkable node is built
//! from. It holds a value and a list of subscriber callbacks.
//!
//! # How Cells Work
//!
//! 1. `subscribe` registers a callback and immediately delivers the current
//!    value to it, synchronously.
//!
//! 2. `set` stores a new value and, if it differs from the previous one,
//!    delivers it to every subscriber before returning. Equal values are
//!    swallowed, so subscribers never see the same state twice in a row.
//!
//! 3. Callbacks may subscribe, unsubscribe or `set` the same cell while
//!    being notified. A nested `set` restarts delivery with the newest value
//!    instead of recursing, so no subscriber observes a stale value after a
//!    fresher one.
//!
//! # Thread Safety
//!
//! The value and the subscriber list live behind `parking_lot` locks. No lock
//! is held while a callback runs.

use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::subscriber::{SubscriberId, Subscription};

/// Counter for generating unique cell IDs.
static CELL_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

fn next_cell_id() -> u64 {
    CELL_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

struct Shared<T> {
    value: RwLock<T>,
    subscribers: RwLock<Vec<(SubscriberId, Callback<T>)>>,
    /// Set while a delivery loop is running.
    notifying: AtomicBool,
    /// Set when the value changed during a delivery loop.
    rerun: AtomicBool,
}

/// An observable value with synchronous, deduplicated delivery.
///
/// # Example
///
/// ```rust,ignore
/// let count = Cell::new(0);
/// let _sub = count.subscribe(|v| println!("count = {v}")); // prints 0
/// count.set(5);                                           // prints 5
/// count.set(5);                                           // silent
/// ```
pub struct Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    id: u64,
    shared: Arc<Shared<T>>,
}

impl<T> Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    /// Create a new cell with the given initial value.
    pub fn new(value: T) -> Self {
        Self {
            id: next_cell_id(),
            shared: Arc::new(Shared {
                value: RwLock::new(value),
                subscribers: RwLock::new(Vec::new()),
                notifying: AtomicBool::new(false),
                rerun: AtomicBool::new(false),
            }),
        }
    }

    /// Get the cell's unique ID.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.shared.value.read().clone()
    }

    /// Borrow the current value for the duration of `f`.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        f(&self.shared.value.read())
    }

    /// Store `value` and notify subscribers.
    ///
    /// Returns false, without notifying, when `value` equals the current one.
    pub fn set(&self, value: T) -> bool {
        {
            let mut guard = self.shared.value.write();
            if *guard == value {
                return false;
            }
            *guard = value;
        }
        self.notify();
        true
    }

    /// Replace the value with `f(current)`.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&T) -> T,
    {
        let next = {
            let guard = self.shared.value.read();
            f(&guard)
        };
        self.set(next)
    }

    /// Register `callback` and deliver the current value to it right away.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = SubscriberId::new();
        let callback: Callback<T> = Arc::new(callback);
        self.shared.subscribers.write().push((id, callback.clone()));

        let current = self.get();
        callback(&current);

        let weak: Weak<Shared<T>> = Arc::downgrade(&self.shared);
        Subscription::new(id, move || {
            if let Some(shared) = weak.upgrade() {
                shared.subscribers.write().retain(|(sid, _)| *sid != id);
            }
        })
    }

    /// Get the number of subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.shared.subscribers.read().len()
    }

    fn is_subscribed(&self, id: SubscriberId) -> bool {
        self.shared.subscribers.read().iter().any(|(sid, _)| *sid == id)
    }

    /// Deliver the current value to all subscribers.
    fn notify(&self) {
        let shared = &self.shared;
        if shared.notifying.swap(true, Ordering::AcqRel) {
            // Someone is already delivering; make them start over.
            shared.rerun.store(true, Ordering::Release);
            return;
        }

        loop {
            let callbacks: Vec<(SubscriberId, Callback<T>)> = shared
                .subscribers
                .read()
                .iter()
                .map(|(id, cb)| (*id, cb.clone()))
                .collect();

            for (id, callback) in callbacks {
                if shared.rerun.load(Ordering::Acquire) {
                    break;
                }
                if !self.is_subscribed(id) {
                    continue;
                }
                let value = self.get();
                callback(&value);
            }

            if shared.rerun.swap(false, Ordering::AcqRel) {
                continue;
            }
            shared.notifying.store(false, Ordering::Release);
            // A setter on another thread may have slipped in between.
            if shared.rerun.swap(false, Ordering::AcqRel)
                && !shared.notifying.swap(true, Ordering::AcqRel)
            {
                continue;
            }
            break;
        }
    }
}

impl<T> Clone for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Debug for Cell<T>
where
    T: Clone + PartialEq + Send + Sync + Debug + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cell")
            .field("id", &self.id)
            .field("value", &self.get())
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
