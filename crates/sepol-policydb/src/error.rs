//! Error types for the binary policy database.

use thiserror::Error;

/// Errors produced while building, encoding or decoding a policy database.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PolicyDbError {
    /// A table already holds an entry for the key.
    #[error("key already exists")]
    AlreadyExists,

    /// The key is not present in the table.
    #[error("key not found")]
    NotFound,

    /// The input ended before a complete field could be read.
    #[error("unexpected end of policy data (needed {needed} bytes, {remaining} left)")]
    UnexpectedEof { needed: usize, remaining: usize },

    /// A serialized bitmap failed validation.
    #[error("invalid ebitmap: {0}")]
    InvalidEbitmap(String),

    /// A serialized access vector table entry failed validation.
    #[error("invalid avtab: {0}")]
    InvalidAvtab(String),

    /// The policy header is malformed.
    #[error("invalid policy header: {0}")]
    InvalidHeader(String),

    /// The requested version cannot express the policy.
    #[error("policy version {version} is not supported: {reason}")]
    UnsupportedVersion { version: u32, reason: String },

    /// Two rules disagree on the result for the same key.
    #[error("conflicting {kind} rule: {detail}")]
    Conflict { kind: &'static str, detail: String },
}

/// Result type for policy database operations.
pub type Result<T> = std::result::Result<T, PolicyDbError>;
