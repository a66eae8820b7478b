//! Error types for the CIL front end.

use std::fmt;
use std::path::PathBuf;

use sepol_policydb::PolicyDbError;
use thiserror::Error;

use crate::log::Logger;

/// Where a diagnostic points: the CIL file and line, plus every enclosing
/// high-level-language origin, innermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Location {
    pub file: String,
    pub line: u32,
    pub hll: Vec<(String, u32)>,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, " at {}:{}", self.file, self.line)?;
        for (path, line) in &self.hll {
            write!(f, " from {path}:{line}")?;
        }
        Ok(())
    }
}

fn located(location: &Option<Location>) -> String {
    location.as_ref().map(ToString::to_string).unwrap_or_default()
}

/// Errors produced while parsing, checking or compiling CIL.
#[derive(Debug, Error)]
pub enum CilError {
    /// Malformed token stream: unbalanced parentheses, bad line marks.
    #[error("{message} at line {line} of {path}")]
    Parse {
        message: String,
        line: u32,
        path: String,
    },

    /// A statement does not have the shape its keyword requires.
    #[error("{message}{}", located(.location))]
    Syntax {
        message: String,
        location: Option<Location>,
    },

    /// A declared name breaks the naming rules.
    #[error("{message}{}", located(.location))]
    InvalidName {
        message: String,
        location: Option<Location>,
    },

    /// A declaration reuses a name already taken in its namespace.
    #[error("Re-declaration of {kind} {name}{}", located(.location))]
    Redeclared {
        kind: &'static str,
        name: String,
        location: Option<Location>,
    },

    /// A reference names nothing of the expected kind.
    #[error("Failed to resolve {kind} {name} in {statement} statement{}", located(.location))]
    Unresolved {
        kind: &'static str,
        name: String,
        statement: &'static str,
        location: Option<Location>,
    },

    /// The policy is well formed but violates a semantic rule.
    #[error("{message}{}", located(.location))]
    Semantic {
        message: String,
        location: Option<Location>,
    },

    /// The kernel policy database rejected the expanded policy.
    #[error("failed to build binary policy: {0}")]
    Encode(#[from] PolicyDbError),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl CilError {
    pub fn syntax(message: impl Into<String>, location: Location) -> Self {
        CilError::Syntax {
            message: message.into(),
            location: Some(location),
        }
    }

    pub fn semantic(message: impl Into<String>, location: Location) -> Self {
        CilError::Semantic {
            message: message.into(),
            location: Some(location),
        }
    }

    /// A semantic error that belongs to the policy as a whole.
    pub fn policy(message: impl Into<String>) -> Self {
        CilError::Semantic {
            message: message.into(),
            location: None,
        }
    }

    /// The source location attached to this error, if any.
    pub fn location(&self) -> Option<&Location> {
        match self {
            CilError::Syntax { location, .. }
            | CilError::InvalidName { location, .. }
            | CilError::Redeclared { location, .. }
            | CilError::Unresolved { location, .. }
            | CilError::Semantic { location, .. } => location.as_ref(),
            CilError::Parse { .. } | CilError::Encode(_) | CilError::Io { .. } => None,
        }
    }
}

/// Result type for CIL compilation.
pub type Result<T> = std::result::Result<T, CilError>;

/// Fails with the first of `errors`, logging the others.
pub(crate) fn report_all(logger: &Logger, errors: Vec<CilError>) -> Result<()> {
    let mut errors = errors.into_iter();
    let Some(first) = errors.next() else {
        return Ok(());
    };
    for error in errors {
        logger.error(error.to_string());
    }
    Err(first)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn location_renders_hll_chain() {
        let loc = Location {
            file: "policy.cil".into(),
            line: 12,
            hll: vec![("module.te".into(), 40), ("base.te".into(), 3)],
        };
        assert_eq!(loc.to_string(), " at policy.cil:12 from module.te:40 from base.te:3");
    }

    #[test]
    fn semantic_error_includes_location() {
        let err = CilError::semantic(
            "Type t is invalid for role r",
            Location {
                file: "a.cil".into(),
                line: 7,
                hll: Vec::new(),
            },
        );
        assert_eq!(err.to_string(), "Type t is invalid for role r at a.cil:7");
        assert_eq!(err.location().map(|l| l.line), Some(7));
    }

    #[test]
    fn policy_error_has_no_location() {
        let err = CilError::policy("Policy must include at least one avrule");
        assert_eq!(err.to_string(), "Policy must include at least one avrule");
        assert!(err.location().is_none());
    }
}
