//! Rule findings and their stable fingerprints.
//!
//! A finding is the unit of communication between the rule pipeline and the
//! action planner. Its fingerprint (category + affected object) is the
//! idempotence key for any discussion or comment it materializes as: the
//! executor never opens a second discussion for a fingerprint that already
//! has an open one.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Finding severity, ordered from least to most severe.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Pass,
    Info,
    Warn,
    Block,
}

impl Severity {
    /// Severities that materialize as discussions on the MR.
    pub fn is_reportable(&self) -> bool {
        *self >= Severity::Warn
    }
}

/// The rule family a finding belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Workflow,
    CommitConvention,
    OpenSourceCompliance,
    SubmoduleConsistency,
    FixVersionSanity,
    Pipeline,
    Approval,
    MergeReadiness,
}

impl Category {
    /// Categories whose findings the bot may auto-resolve once the underlying
    /// condition clears. Compliance findings always wait for a human.
    pub fn is_self_healing(&self) -> bool {
        matches!(
            self,
            Category::Pipeline | Category::Approval | Category::MergeReadiness
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Workflow => "workflow",
            Category::CommitConvention => "commit-convention",
            Category::OpenSourceCompliance => "open-source-compliance",
            Category::SubmoduleConsistency => "submodule-consistency",
            Category::FixVersionSanity => "fix-version-sanity",
            Category::Pipeline => "pipeline",
            Category::Approval => "approval",
            Category::MergeReadiness => "merge-readiness",
        }
    }

    /// Inverse of [`Category::as_str`], for fingerprints parsed back out of
    /// forge state.
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "workflow" => Some(Category::Workflow),
            "commit-convention" => Some(Category::CommitConvention),
            "open-source-compliance" => Some(Category::OpenSourceCompliance),
            "submodule-consistency" => Some(Category::SubmoduleConsistency),
            "fix-version-sanity" => Some(Category::FixVersionSanity),
            "pipeline" => Some(Category::Pipeline),
            "approval" => Some(Category::Approval),
            "merge-readiness" => Some(Category::MergeReadiness),
            _ => None,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable identity of a finding: category plus the object it is about.
///
/// Two findings with equal fingerprints describe the same problem, even when
/// their message text differs between cycles.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Builds a fingerprint from a category and the affected object id
    /// (file path, issue key, submodule dir, or a rule-chosen scope tag).
    pub fn new(category: Category, object: &str) -> Self {
        Fingerprint(format!("{}:{}", category.as_str(), object))
    }

    /// Rebuilds a fingerprint parsed back out of a discussion marker.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Fingerprint(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An evaluation result produced by one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub severity: Severity,
    pub category: Category,
    pub fingerprint: Fingerprint,
    pub message: String,
    /// For compliance findings: usernames whose sign-off clears the finding.
    pub required_approvers: BTreeSet<String>,
}

impl Finding {
    /// A finding with no required approvers.
    pub fn new(
        severity: Severity,
        category: Category,
        object: &str,
        message: impl Into<String>,
    ) -> Self {
        Finding {
            severity,
            category,
            fingerprint: Fingerprint::new(category, object),
            message: message.into(),
            required_approvers: BTreeSet::new(),
        }
    }

    /// Attaches the approver set whose sign-off clears this finding.
    pub fn with_required_approvers(
        mut self,
        approvers: impl IntoIterator<Item = String>,
    ) -> Self {
        self.required_approvers = approvers.into_iter().collect();
        self
    }

    pub fn is_blocking(&self) -> bool {
        self.severity == Severity::Block
    }
}

/// Convenience queries over a cycle's finding set.
pub trait FindingSet {
    fn has_blocking(&self) -> bool;
    fn blocking(&self) -> Vec<&Finding>;
}

impl FindingSet for [Finding] {
    fn has_blocking(&self) -> bool {
        self.iter().any(Finding::is_blocking)
    }

    fn blocking(&self) -> Vec<&Finding> {
        self.iter().filter(|f| f.is_blocking()).collect()
    }
}
