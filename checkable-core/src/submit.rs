//! Submission
//!
//! Drives a root checkable through a form-style submit: activate, wait for
//! a settled verdict, and only then hand the value to the caller's submit
//! function. Tracks whether the value differs from its baseline, whether a
//! submit is running, and the interpreted reply.

use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Options, ResetOptions};
use crate::error::Result;
use crate::node::{checkable, Node};
use crate::reactive::{Cell, Subscription};
use crate::result::{Activity, Status};
use crate::spec::Spec;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseKind {
    Success,
    Info,
    Error,
    Warning,
}

/// A message to show after a submit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "type")]
    pub kind: Option<ResponseKind>,
    pub message: String,
}

/// What a submit function returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// Nothing to show.
    Accepted,
    /// A bare message.
    Message(String),
    Response(Response),
}

impl Reply {
    fn interpret(&self) -> Option<Response> {
        match self {
            Reply::Accepted => None,
            Reply::Message(message) => Some(Response {
                kind: None,
                message: message.clone(),
            }),
            Reply::Response(response) => Some(response.clone()),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SubmissionStatus {
    /// The value differs from the baseline.
    pub changed: bool,
    /// The tree is entirely inactive.
    pub inactive: bool,
    pub response: Option<Response>,
    pub submitting: bool,
    /// Changed, activated or answered.
    pub touched: bool,
}

impl SubmissionStatus {
    fn touch(mut self) -> Self {
        self.touched = self.changed || !self.inactive || self.response.is_some();
        self
    }
}

/// A checkable tree wrapped for submission.
pub struct Submission {
    node: Node,
    baseline: Arc<Mutex<Value>>,
    initial_active: bool,
    status: Cell<SubmissionStatus>,
    _subscriptions: [Subscription; 2],
}

impl Submission {
    pub fn new(spec: impl Into<Spec>, value: impl Into<Value>, options: Options) -> Result<Self> {
        let initial_active = options.active;
        let node = checkable(spec, value, options)?;
        let baseline = Arc::new(Mutex::new(node.get()));
        let status = Cell::new(SubmissionStatus::default().touch());

        let inactive = {
            let status = status.clone();
            node.subscribe(move |s: &Status| {
                let inactive = s.active == Activity::Inactive;
                status.update(|current| {
                    SubmissionStatus {
                        inactive,
                        ..current.clone()
                    }
                    .touch()
                });
            })
        };
        let changed = {
            let status = status.clone();
            let baseline = baseline.clone();
            node.watch(move |value: &Value| {
                let changed = *baseline.lock() != *value;
                status.update(|current| {
                    SubmissionStatus {
                        changed,
                        ..current.clone()
                    }
                    .touch()
                });
            })
        };

        Ok(Self {
            node,
            baseline,
            initial_active,
            status,
            _subscriptions: [inactive, changed],
        })
    }

    /// The wrapped tree.
    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn get(&self) -> Value {
        self.node.get()
    }

    pub fn set(&self, value: impl Into<Value>) {
        self.node.set(value);
    }

    pub fn status(&self) -> SubmissionStatus {
        self.status.get()
    }

    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SubmissionStatus) + Send + Sync + 'static,
    {
        self.status.subscribe(callback)
    }

    /// Deactivating also clears the last response.
    pub fn activate(&self, active: bool) -> impl Future<Output = Status> + Send + 'static {
        if !active {
            self.clear_response();
        }
        self.node.activate(active)
    }

    pub fn clear_response(&self) {
        self.modify(|s| s.response = None);
    }

    /// Return to the baseline (or make `value` the new one), with the
    /// initial activity and no response.
    pub fn reset(&self, value: Option<Value>) {
        let value = {
            let mut baseline = self.baseline.lock();
            if let Some(value) = value {
                *baseline = value;
            }
            baseline.clone()
        };
        debug!("resetting submission");
        self.modify(|s| s.response = None);
        self.node
            .reset(Some(value), ResetOptions::new().active(self.initial_active));

        // The tree may have reshaped the value (an undefined collection
        // becomes empty); that shape is the baseline.
        *self.baseline.lock() = self.node.get();
        self.modify(|s| s.changed = false);
    }

    /// Validate and, when valid, call `submit` with the current value.
    ///
    /// Returns `None` without calling `submit` when the tree is invalid.
    pub async fn submit<F, Fut>(&self, submit: F) -> Option<Reply>
    where
        F: FnOnce(Value) -> Fut,
        Fut: Future<Output = Reply>,
    {
        self.modify(|s| {
            s.submitting = true;
            s.response = None;
        });
        debug!("submission started");

        let status = self.node.activate(true).await;
        let reply = if status.valid() == Some(true) {
            let reply = submit(self.node.get()).await;
            let response = reply.interpret();
            self.modify(|s| s.response = response);
            Some(reply)
        } else {
            debug!(reason = ?status.reason(), path = ?status.path().map(|p| p.to_string()), "submission blocked");
            None
        };

        self.modify(|s| s.submitting = false);
        debug!(submitted = reply.is_some(), "submission finished");
        reply
    }

    fn modify(&self, f: impl FnOnce(&mut SubmissionStatus)) {
        self.status.update(|current| {
            let mut next = current.clone();
            f(&mut next);
            next.touch()
        });
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
