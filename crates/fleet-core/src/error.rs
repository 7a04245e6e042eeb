//! Crate-level error type.

use serde::{Deserialize, Serialize};
use std::fmt;

/// What went wrong, coarsely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CoreErrorKind {
    CommandFailed,
    IoError,
    Unsupported,
}

/// Error raised by the host collaborators.
#[derive(Debug, Clone, Serialize, Deserialize, thiserror::Error)]
pub struct CoreError {
    pub kind: CoreErrorKind,
    pub message: String,
    pub detail: Option<String>,
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.message)?;
        if let Some(d) = &self.detail {
            write!(f, " ({})", d)?;
        }
        Ok(())
    }
}

impl CoreError {
    pub fn new(kind: CoreErrorKind, msg: impl Into<String>) -> Self {
        Self {
            kind,
            message: msg.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

impl From<CoreError> for String {
    fn from(e: CoreError) -> String {
        e.to_string()
    }
}
