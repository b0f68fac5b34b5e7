//! Errors
//!
//! Only malformed configuration is an error. Validation outcomes, including
//! structural mismatches between a value and its spec, travel through the
//! published status instead.

use crate::value::{CollKind, Key, Path};

/// Rejection of a tree that cannot be built.
#[derive(Debug, thiserror::Error)]
pub enum CheckableError {
    #[error("spec at {path} declares key '{key}', which a {kind} cannot hold")]
    KeyKindMismatch { path: Path, key: Key, kind: CollKind },

    #[error("key derivation at {path} is not supported for records")]
    IndexByUnsupported { path: Path },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CheckableError>;
