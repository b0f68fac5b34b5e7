//! Reactive Primitives
//!
//! The state substrate every node is built from.
//!
//! # Concepts
//!
//! ## Cells
//!
//! A [`Cell`] holds a value and a list of subscribers. Subscribing delivers
//! the current value at once; every `set` that changes the value delivers
//! it again before returning. There is no scheduler and no buffering.
//!
//! ## Pending Verdicts
//!
//! A [`Pending`] is the handle an asynchronous check hands back instead of
//! a bare future. It settles once, runs registered continuations on the
//! settling thread, and can also be awaited.
//!
//! ## Subscriptions
//!
//! Every `subscribe` returns a [`Subscription`] guard. Dropping it removes
//! the callback, including from inside the callback itself.

mod cell;
mod pending;
mod subscriber;

pub use cell::Cell;
pub use pending::{Pending, Settler};
pub use subscriber::{SubscriberId, Subscription};
