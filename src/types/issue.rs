//! Issue-tracker snapshot types.

use serde::{Deserialize, Serialize};

use super::ids::IssueKey;

/// Workflow status of a tracker issue.
///
/// Statuses outside the set the engine acts on are preserved verbatim in
/// `Other`; they still matter for the warning comments the planner emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueStatus {
    InProgress,
    InReview,
    WaitingForQa,
    Closed,
    Other(String),
}

impl IssueStatus {
    /// Parses the raw workflow status string coming from the tracker.
    pub fn from_raw(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "in progress" => IssueStatus::InProgress,
            "in review" => IssueStatus::InReview,
            "waiting for qa" => IssueStatus::WaitingForQa,
            "closed" => IssueStatus::Closed,
            _ => IssueStatus::Other(raw.trim().to_string()),
        }
    }

    /// Human-readable status name as the tracker displays it.
    pub fn as_display(&self) -> &str {
        match self {
            IssueStatus::InProgress => "In Progress",
            IssueStatus::InReview => "In Review",
            IssueStatus::WaitingForQa => "Waiting for QA",
            IssueStatus::Closed => "Closed",
            IssueStatus::Other(raw) => raw,
        }
    }
}

/// One entry of an issue's `fixVersions` field.
///
/// The tracker maps version labels to release branches through the release
/// description; a version without a recognizable branch keeps `branch = None`
/// and fails the fix-version sanity rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FixVersion {
    pub name: String,
    pub branch: Option<String>,
}

/// Immutable snapshot of a tracker issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueSnapshot {
    pub key: IssueKey,
    pub summary: String,
    pub status: IssueStatus,
    /// Ordered as the tracker returns them.
    pub fix_versions: Vec<FixVersion>,
    pub assignee: Option<String>,
}

impl IssueSnapshot {
    /// The project prefix of the issue key.
    pub fn project(&self) -> &str {
        self.key.project()
    }

    /// Branches named by the issue's fix versions, in fix-version order,
    /// skipping versions with no known branch.
    pub fn fix_version_branches(&self) -> Vec<&str> {
        self.fix_versions
            .iter()
            .filter_map(|v| v.branch.as_deref())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_from_raw_is_case_insensitive() {
        assert_eq!(IssueStatus::from_raw("In Review"), IssueStatus::InReview);
        assert_eq!(IssueStatus::from_raw("in review"), IssueStatus::InReview);
        assert_eq!(
            IssueStatus::from_raw("Waiting for QA"),
            IssueStatus::WaitingForQa
        );
        assert_eq!(
            IssueStatus::from_raw("Blocked"),
            IssueStatus::Other("Blocked".into())
        );
    }

    #[test]
    fn display_roundtrips_known_statuses() {
        for raw in ["In Progress", "In Review", "Waiting for QA", "Closed"] {
            assert_eq!(IssueStatus::from_raw(raw).as_display(), raw);
        }
    }

    #[test]
    fn fix_version_branches_skip_unmapped() {
        let issue = IssueSnapshot {
            key: IssueKey::parse("PROJ-1").unwrap(),
            summary: "Crash".into(),
            status: IssueStatus::InReview,
            fix_versions: vec![
                FixVersion {
                    name: "5.0".into(),
                    branch: Some("vms_5.0".into()),
                },
                FixVersion {
                    name: "Future".into(),
                    branch: None,
                },
            ],
            assignee: None,
        };
        assert_eq!(issue.fix_version_branches(), ["vms_5.0"]);
    }
}
