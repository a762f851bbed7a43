use serde::Serialize;
use thiserror::Error;

use super::CollectedItem;

/// Where in the run a program failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FailureKind {
    /// Rejected by the static analyzer before execution.
    Safety,
    /// Compile-only pre-check failed.
    Syntax,
    /// Thrown exception, timeout, or resource ceiling breach.
    Runtime,
    /// Output did not match the item contract.
    Contract,
    /// The program succeeded but produced nothing.
    Empty,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Safety => "Safety",
            FailureKind::Syntax => "Syntax",
            FailureKind::Runtime => "Runtime",
            FailureKind::Contract => "Contract",
            FailureKind::Empty => "Empty",
        }
    }
}

impl std::fmt::Display for FailureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("[{kind}] {message}")]
pub struct RunFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl RunFailure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn safety(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Safety, message)
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Syntax, message)
    }

    pub fn runtime(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Runtime, message)
    }

    pub fn contract(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Contract, message)
    }

    pub fn empty() -> Self {
        Self::new(FailureKind::Empty, "program returned no items")
    }
}

/// The sandbox verdict for one execution.
pub type RunResult = Result<Vec<CollectedItem>, RunFailure>;

/// What one `collect` call did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectResult {
    pub new_items: usize,
    pub skipped: usize,
    pub error: Option<String>,
}

impl CollectResult {
    pub fn collected(new_items: usize, skipped: usize) -> Self {
        Self {
            new_items,
            skipped,
            error: None,
        }
    }

    pub fn failed(error: String) -> Self {
        Self {
            new_items: 0,
            skipped: 0,
            error: Some(error),
        }
    }

    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
