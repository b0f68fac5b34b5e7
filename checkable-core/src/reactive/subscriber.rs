//! Subscriber types for the reactive system.
//!
//! Every callback registered on a [`Cell`](super::Cell) gets a unique
//! [`SubscriberId`]. The [`Subscription`] guard returned by `subscribe`
//! removes that callback again when it is dropped or explicitly released.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Unique identifier for a subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl SubscriberId {
    /// Generate a new unique subscriber ID.
    ///
    /// Uses an atomic counter to ensure uniqueness across threads.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

/// RAII guard for a registered callback.
///
/// Dropping the guard unsubscribes. Use [`Subscription::forget`] to keep the
/// callback registered for the lifetime of the source.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: SubscriberId,
    release: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    pub(crate) fn new<F>(id: SubscriberId, release: F) -> Self
    where
        F: FnOnce() + Send + Sync + 'static,
    {
        Self {
            id,
            release: Some(Box::new(release)),
        }
    }

    /// The ID of the registered callback.
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove the callback now.
    pub fn unsubscribe(mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }

    /// Keep the callback registered; the guard no longer owns it.
    pub fn forget(mut self) {
        self.release = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("live", &self.release.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::sync::Arc;

    #[test]
    fn subscriber_ids_are_unique() {
        let id1 = SubscriberId::new();
        let id2 = SubscriberId::new();
        let id3 = SubscriberId::new();

        assert_ne!(id1, id2);
        assert_ne!(id2, id3);
        assert_ne!(id1, id3);
    }

    #[test]
    fn drop_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let sub = Subscription::new(SubscriberId::new(), move || {
            released_clone.store(true, Ordering::SeqCst);
        });
        assert!(!released.load(Ordering::SeqCst));

        drop(sub);
        assert!(released.load(Ordering::SeqCst));
    }

    #[test]
    fn forget_keeps_registration() {
        let released = Arc::new(AtomicBool::new(false));
        let released_clone = released.clone();

        let sub = Subscription::new(SubscriberId::new(), move || {
            released_clone.store(true, Ordering::SeqCst);
        });
        sub.forget();
        assert!(!released.load(Ordering::SeqCst));
    }
}
