//! Values Mirrored by the Validation Tree
//!
//! A checkable tree validates an owned, possibly nested [`Value`]. Scalars are
//! opaque to the tree; the three collection shapes (records, sequences and
//! keyed maps) expose a uniform key space that composite nodes mirror with
//! one child per key.
//!
//! `Undefined` and `Null` are distinct: `Undefined` marks an absent value (a
//! declared key the data does not carry), while `Null` is an explicit empty
//! value. Only `Undefined` short-circuits validation of optional fields.

use std::fmt;

use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Serialize, Serializer};
use smallvec::SmallVec;

/// Identity of a node within its parent's key space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Key {
    /// Position in a sequence.
    Index(usize),
    /// Field name in a record, or an arbitrary map key.
    Name(String),
}

impl Key {
    /// Return the index if this is a positional key.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            Key::Index(i) => Some(*i),
            Key::Name(_) => None,
        }
    }

    /// Return the name if this is a named key.
    pub fn as_name(&self) -> Option<&str> {
        match self {
            Key::Name(name) => Some(name),
            Key::Index(_) => None,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Index(i) => write!(f, "{}", i),
            Key::Name(name) => f.write_str(name),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Key::Name(name.to_string())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Key::Name(name)
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Key::Index(index)
    }
}

/// Ordered sequence of keys from the tree root to a node.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Path(SmallVec<[Key; 4]>);

impl Path {
    /// The root path (no keys).
    pub fn root() -> Self {
        Self(SmallVec::new())
    }

    /// Return a new path extended by `key`.
    pub fn child(&self, key: Key) -> Self {
        let mut keys = self.0.clone();
        keys.push(key);
        Self(keys)
    }

    /// Return a new path made of this path followed by `other`.
    pub fn join(&self, other: &Path) -> Self {
        let mut keys = self.0.clone();
        keys.extend(other.0.iter().cloned());
        Self(keys)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a slash-separated path relative to this one.
    ///
    /// `..` moves to the parent, `.` and empty segments are ignored, numeric
    /// segments become positional keys and anything else a named key.
    pub fn resolve(&self, relative: &str) -> Path {
        let mut keys = self.0.clone();
        for segment in relative.split('/') {
            match segment {
                "" | "." => {}
                s if s.starts_with("..") => {
                    keys.pop();
                }
                s => match s.parse::<usize>() {
                    Ok(index) => keys.push(Key::Index(index)),
                    Err(_) => keys.push(Key::Name(s.to_string())),
                },
            }
        }
        Path(keys)
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        for (i, key) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl<K: Into<Key>> FromIterator<K> for Path {
    fn from_iter<I: IntoIterator<Item = K>>(iter: I) -> Self {
        Path(iter.into_iter().map(Into::into).collect())
    }
}

/// The three collection shapes a composite node can mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CollKind {
    Record,
    Sequence,
    KeyedMap,
}

impl CollKind {
    /// Whether a key of this form can address an entry of this collection.
    pub fn accepts(&self, key: &Key) -> bool {
        match (self, key) {
            (CollKind::Record, Key::Name(_)) => true,
            (CollKind::Sequence, Key::Index(_)) => true,
            (CollKind::KeyedMap, _) => true,
            _ => false,
        }
    }
}

impl fmt::Display for CollKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CollKind::Record => "record",
            CollKind::Sequence => "sequence",
            CollKind::KeyedMap => "map",
        })
    }
}

/// An owned, possibly nested value.
///
/// Equality is structural, so `==` is the deep comparison used to decide
/// whether a `set` actually changed anything, and `clone` is a deep copy.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Record(IndexMap<String, Value>),
    Sequence(Vec<Value>),
    KeyedMap(IndexMap<Key, Value>),
}

impl Value {
    /// An empty collection of the given shape.
    pub fn empty(kind: CollKind) -> Self {
        match kind {
            CollKind::Record => Value::Record(IndexMap::new()),
            CollKind::Sequence => Value::Sequence(Vec::new()),
            CollKind::KeyedMap => Value::KeyedMap(IndexMap::new()),
        }
    }

    /// The collection shape of this value, if it is a collection.
    pub fn kind(&self) -> Option<CollKind> {
        match self {
            Value::Record(_) => Some(CollKind::Record),
            Value::Sequence(_) => Some(CollKind::Sequence),
            Value::KeyedMap(_) => Some(CollKind::KeyedMap),
            _ => None,
        }
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Whether this value counts as missing for a required field:
    /// undefined, null or the empty string.
    pub fn is_blank(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => true,
            Value::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Keys of this collection in their natural order. Scalars have none.
    pub fn keys(&self) -> Vec<Key> {
        match self {
            Value::Record(fields) => fields.keys().map(|k| Key::Name(k.clone())).collect(),
            Value::Sequence(items) => (0..items.len()).map(Key::Index).collect(),
            Value::KeyedMap(entries) => entries.keys().cloned().collect(),
            _ => Vec::new(),
        }
    }

    /// Borrow the entry at `key`, if present.
    pub fn get(&self, key: &Key) -> Option<&Value> {
        match (self, key) {
            (Value::Record(fields), Key::Name(name)) => fields.get(name),
            (Value::Sequence(items), Key::Index(i)) => items.get(*i),
            (Value::KeyedMap(entries), key) => entries.get(key),
            _ => None,
        }
    }

    /// Clone the entry at `key`, or `Undefined` when absent.
    pub fn item(&self, key: &Key) -> Value {
        self.get(key).cloned().unwrap_or_default()
    }

    /// Write `item` at `key`.
    ///
    /// Sequences are padded with `Undefined` when `key` lies past the end.
    /// Returns false when this value cannot hold `key`.
    pub fn set_item(&mut self, key: &Key, item: Value) -> bool {
        match (self, key) {
            (Value::Record(fields), Key::Name(name)) => {
                fields.insert(name.clone(), item);
                true
            }
            (Value::Sequence(items), Key::Index(i)) => {
                if *i >= items.len() {
                    items.resize(*i + 1, Value::Undefined);
                }
                items[*i] = item;
                true
            }
            (Value::KeyedMap(entries), key) => {
                entries.insert(key.clone(), item);
                true
            }
            _ => false,
        }
    }

    /// Follow `path` from this value.
    pub fn lookup(&self, path: &Path) -> Option<&Value> {
        path.keys()
            .iter()
            .try_fold(self, |current, key| current.get(key))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Int(i as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Sequence(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map(Into::into).unwrap_or(Value::Undefined)
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
            },
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(items) => {
                Value::Sequence(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(fields) => Value::Record(
                fields
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect(),
            ),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Undefined | Value::Null => serializer.serialize_none(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Int(i) => serializer.serialize_i64(*i),
            Value::Float(f) => serializer.serialize_f64(*f),
            Value::String(s) => serializer.serialize_str(s),
            Value::Record(fields) => {
                let mut map = serializer.serialize_map(Some(fields.len()))?;
                for (k, v) in fields {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Value::Sequence(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::KeyedMap(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
