//! Content-checker contracts.
//!
//! The engine never performs text-level content checks itself; it invokes the
//! open-source compliance checker and the nested-submodule checker through
//! these traits and acts on their verdicts. The projector runs them while
//! assembling a snapshot, so the rule pipeline stays a pure function of the
//! snapshot.

pub mod relevance;
pub mod tools;

pub use relevance::{lookup_relevance_checker, RelevanceChecker};
pub use tools::{ToolComplianceChecker, ToolSubmoduleChecker};

use std::future::Future;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A checker tool failed to run or produced unreadable output.
#[derive(Debug, Error)]
pub enum CheckerError {
    #[error("checker {tool} failed to start: {source}")]
    Spawn {
        tool: String,
        source: std::io::Error,
    },

    #[error("checker {tool} exited with {status}: {stderr}")]
    Failed {
        tool: String,
        status: String,
        stderr: String,
    },

    #[error("checker {tool} produced unreadable output: {source}")]
    BadOutput {
        tool: String,
        source: serde_json::Error,
    },
}

/// One compliance violation in a checked file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub file: String,
    #[serde(default)]
    pub line: Option<u32>,
    pub rule_id: String,
    pub message: String,
}

/// Verdict of the nested-submodule consistency check for one directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SubmoduleVerdict {
    Consistent,
    Inconsistent { details: String },
}

impl SubmoduleVerdict {
    pub fn is_consistent(&self) -> bool {
        matches!(self, SubmoduleVerdict::Consistent)
    }
}

/// Open-source compliance checker contract.
pub trait ComplianceChecker: Send + Sync {
    /// Checks the listed files in the given working tree.
    fn check_files(
        &self,
        repo_dir: &Path,
        files: &[String],
    ) -> impl Future<Output = Result<Vec<Violation>, CheckerError>> + Send;
}

/// Nested-submodule consistency checker contract.
pub trait SubmoduleChecker: Send + Sync {
    fn check_submodule(
        &self,
        repo_dir: &Path,
        submodule_dir: &str,
    ) -> impl Future<Output = Result<SubmoduleVerdict, CheckerError>> + Send;
}
