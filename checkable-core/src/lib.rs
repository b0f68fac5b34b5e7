//! Checkable Core
//!
//! A reactive validation engine. A value of any shape (scalars, records,
//! sequences, keyed maps) is mirrored by a tree of validator nodes. Each node
//! knows whether it is active, what its value is, and whether its subtree is
//! valid, invalid or pending; consumers subscribe to any node and receive
//! every status change synchronously.
//!
//! It implements:
//!
//! - Observable cells and pending verdicts (`reactive`)
//! - Predicates and spec trees (`spec`)
//! - Requirement and key resolution (`resolve`)
//! - Verdict aggregation with first-invalid-wins and pending races
//!   (`aggregate`)
//! - Leaf and composite nodes kept in sync with a changing value (`node`)
//! - A submission wrapper (`submit`)
//!
//! # Architecture
//!
//! Nodes are lazy: nothing is validated until a node, or one of its
//! ancestors, is activated. Edits flow up through each child's parent port;
//! activation, context and new sub-values flow down through method calls.
//! Asynchronous predicates return `Verdict::Pending`; a node publishes the
//! pending status at once and the settled one later, unless a newer
//! evaluation has started in the meantime.
//!
//! # Example
//!
//! ```rust,ignore
//! use checkable_core::{checkable, CollSpec, Options, Predicate};
//!
//! let spec = CollSpec::record()
//!     .field("name", Predicate::from_fn(|v| match v.as_str() {
//!         Some(s) if s.len() > 2 => Ok(()),
//!         _ => Err("too short".into()),
//!     }))
//!     .field("email", Predicate::always_valid());
//!
//! let form = checkable(spec, serde_json::json!({"name": "al"}), Options::new().required(true))?;
//! let _sub = form.subscribe(|status| println!("{}", serde_json::to_string(status).unwrap()));
//!
//! let status = form.activate(true).await;
//! assert_eq!(status.reason(), Some("too short"));
//! ```

pub mod aggregate;
pub mod config;
pub mod error;
pub mod node;
pub mod reactive;
pub mod resolve;
pub mod result;
pub mod spec;
pub mod submit;
pub mod value;

pub use config::{Config, Messages, Options, ResetOptions};
pub use error::{CheckableError, Result};
pub use node::{checkable, CompositeNode, LeafNode, Node, NodeId};
pub use reactive::{Cell, Pending, Settler, Subscription};
pub use resolve::{IndexBy, Requirement, RequirementTree};
pub use result::{Activity, Failure, Status, Verdict};
pub use spec::{CollSpec, Predicate, Scope, Spec};
pub use submit::{Reply, Response, ResponseKind, Submission, SubmissionStatus};
pub use value::{CollKind, Key, Path, Value};
