//! Configuration
//!
//! Messages and per-tree construction options. A [`Config`] is built once
//! and shared (`Arc`) by every node of a tree; there is no process-wide
//! message registry.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::resolve::{IndexBy, Requirement};
use crate::value::{CollKind, Key, Value};

/// Messages synthesized by the tree itself (as opposed to predicates).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Messages {
    /// Reason for a required field left blank.
    pub is_required: String,
    /// Reason for a collection of the wrong shape. `{kind}` is replaced by
    /// the expected shape.
    pub wrong_type: String,
    /// Reason for an entry whose derived key another entry already holds.
    /// `{key}` is replaced by the derived key.
    pub duplicate_key: String,
}

impl Default for Messages {
    fn default() -> Self {
        Self {
            is_required: "is required".to_string(),
            wrong_type: "must be of type '{kind}'".to_string(),
            duplicate_key: "duplicate key '{key}'".to_string(),
        }
    }
}

impl Messages {
    pub fn wrong_type(&self, kind: CollKind) -> String {
        self.wrong_type.replace("{kind}", &kind.to_string())
    }

    pub fn duplicate_key(&self, key: &Key) -> String {
        self.duplicate_key.replace("{key}", &key.to_string())
    }
}

/// Tree-wide configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub messages: Messages,
}

impl Config {
    /// Parse a configuration from JSON. Missing fields keep their defaults,
    /// so `{"messages": {"is_required": "required"}}` overrides one message.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Options for building a tree with [`checkable`](crate::checkable).
///
/// Nodes are inactive by default: nothing is validated until
/// [`activate`](crate::Node::activate) is called.
#[derive(Clone, Default)]
pub struct Options {
    pub(crate) key: Option<Key>,
    pub(crate) active: bool,
    pub(crate) required: Option<Requirement>,
    pub(crate) context: Value,
    pub(crate) index_by: Option<IndexBy>,
    pub(crate) config: Arc<Config>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Key reported by the root node.
    pub fn key(mut self, key: impl Into<Key>) -> Self {
        self.key = Some(key.into());
        self
    }

    /// Start active instead of lazy.
    pub fn active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    /// Requirement descriptor for the root and, through it, its descendants.
    pub fn required(mut self, required: impl Into<Requirement>) -> Self {
        self.required = Some(required.into());
        self
    }

    /// Auxiliary data handed to predicates.
    pub fn context(mut self, context: impl Into<Value>) -> Self {
        self.context = context.into();
        self
    }

    /// Key derivation for sequences and keyed maps.
    pub fn index_by(mut self, index_by: IndexBy) -> Self {
        self.index_by = Some(index_by);
        self
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = Arc::new(config);
        self
    }

    pub fn shared_config(mut self, config: Arc<Config>) -> Self {
        self.config = config;
        self
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("key", &self.key)
            .field("active", &self.active)
            .field("required", &self.required.is_some())
            .field("context", &self.context)
            .field("index_by", &self.index_by.is_some())
            .field("config", &self.config)
            .finish()
    }
}

/// Options for [`Node::reset`](crate::Node::reset). Unset fields fall back to
/// the node's baseline.
#[derive(Debug, Clone, Default)]
pub struct ResetOptions {
    pub active: Option<bool>,
    pub context: Option<Value>,
}

impl ResetOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(mut self, active: bool) -> Self {
        self.active = Some(active);
        self
    }

    pub fn context(mut self, context: impl Into<Value>) -> Self {
        self.context = Some(context.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_messages() {
        let messages = Messages::default();
        assert_eq!(messages.is_required, "is required");
        assert_eq!(messages.wrong_type(CollKind::Sequence), "must be of type 'sequence'");
        assert_eq!(messages.duplicate_key(&Key::from("ann")), "duplicate key 'ann'");
    }

    #[test]
    fn partial_json_overrides() {
        let config = Config::from_json(r#"{"messages": {"is_required": "obligatoire"}}"#).unwrap();
        assert_eq!(config.messages.is_required, "obligatoire");
        assert_eq!(config.messages.wrong_type, Messages::default().wrong_type);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(Config::from_json("{messages: 3").is_err());
    }
}
