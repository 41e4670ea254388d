//! Workflow rules: issue mentions and title/commit-message conventions.

use std::collections::BTreeSet;

use crate::projector::CycleState;
use crate::types::{extract_issue_keys, Category, Finding, IssueKey, Severity};

use super::Rule;

/// The MR must reference at least one issue in a supported project.
pub struct IssueMentionRule {
    supported_projects: Vec<String>,
}

impl IssueMentionRule {
    pub fn new(supported_projects: Vec<String>) -> Self {
        IssueMentionRule { supported_projects }
    }
}

impl Rule for IssueMentionRule {
    fn name(&self) -> &'static str {
        "issue-mention"
    }

    fn applies_to(&self, _cycle: &CycleState) -> bool {
        true
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        if !cycle.supported_issue_keys().is_empty() {
            return Vec::new();
        }
        let projects = self.supported_projects.join(", ");
        let message = if cycle.unsupported_issues.is_empty() {
            format!(
                "The MR does not reference any issue. Mention an issue from one of the \
                 supported projects ({projects}) in the title, description, or a commit message."
            )
        } else {
            format!(
                "The MR only references issues from unsupported projects. At least one issue \
                 from a supported project ({projects}) is required."
            )
        };
        vec![Finding::new(
            Severity::Block,
            Category::Workflow,
            "issue-mention",
            message,
        )]
    }
}

/// Title and description conventions for squash MRs.
///
/// The title must be `<ISSUE-KEYS>: <description>` with no parenthesized
/// clause immediately after the colon, and a single-commit MR's commit
/// message must equal `title\n\ndescription`.
pub struct TitleFormatRule;

impl Rule for TitleFormatRule {
    fn name(&self) -> &'static str {
        "title-format"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        cycle.mr.squash
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mut findings = Vec::new();
        let mr = &cycle.mr;

        if let Some(problem) = title_problem(&mr.title) {
            findings.push(Finding::new(
                Severity::Block,
                Category::Workflow,
                "title-format",
                problem,
            ));
        }

        // Follow-ups keep the commit message of the picked commit, which by
        // construction differs from the follow-up MR description.
        if mr.commits.len() == 1 && !mr.is_follow_up() {
            let expected = mr.squash_commit_message();
            let actual = mr.commits[0].message.trim();
            if actual != expected {
                findings.push(Finding::new(
                    Severity::Block,
                    Category::Workflow,
                    "commit-message",
                    format!(
                        "The commit message of a single-commit squash MR must equal the MR \
                         title and description.\n\nExpected:\n```\n{expected}\n```\nactual:\n\
                         ```\n{actual}\n```"
                    ),
                ));
            }
        }

        findings
    }
}

/// Checks the `<ISSUE-KEYS>: <description>` shape of a squash MR title.
fn title_problem(title: &str) -> Option<String> {
    let Some((keys_part, description)) = title.split_once(':') else {
        return Some(
            "The title of a squash MR must have the form `<ISSUE-KEYS>: <description>`."
                .to_string(),
        );
    };

    let keys_are_valid = !keys_part.trim().is_empty()
        && keys_part
            .split([',', ' '])
            .filter(|s| !s.is_empty())
            .all(|token| IssueKey::parse(token.trim()).is_ok());
    if !keys_are_valid {
        return Some(format!(
            "The part before the colon must be a list of issue keys, got {:?}.",
            keys_part.trim()
        ));
    }

    if description.trim_start().starts_with('(') {
        return Some(
            "A parenthesized clause immediately after the colon is not allowed in the title."
                .to_string(),
        );
    }

    if description.trim().is_empty() {
        return Some("The title has no description after the issue keys.".to_string());
    }

    None
}

/// Commit-level issue conventions for non-squash MRs.
///
/// Every commit message must mention at least one issue key (of any
/// project), and the issues referenced in the title/description must all be
/// covered by commit messages.
pub struct CommitIssueRule;

impl Rule for CommitIssueRule {
    fn name(&self) -> &'static str {
        "commit-issue-mention"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        !cycle.mr.squash && !cycle.mr.commits.is_empty()
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mr = &cycle.mr;
        let mut findings = Vec::new();

        let unmentioned: Vec<&str> = mr
            .commits
            .iter()
            .filter(|c| extract_issue_keys(&c.message).is_empty())
            .map(|c| c.sha.short())
            .collect();
        if !unmentioned.is_empty() {
            findings.push(Finding::new(
                Severity::Block,
                Category::CommitConvention,
                "commit-issue-mention",
                format!(
                    "Every commit message must mention an issue key; missing in: {}.",
                    unmentioned.join(", ")
                ),
            ));
        }

        let commit_keys: BTreeSet<IssueKey> = mr
            .commits
            .iter()
            .flat_map(|c| extract_issue_keys(&c.message))
            .collect();
        let headline_keys = mr.headline_issue_keys();
        let uncovered: Vec<String> = headline_keys
            .difference(&commit_keys)
            .map(|k| k.to_string())
            .collect();
        if !uncovered.is_empty() {
            findings.push(Finding::new(
                Severity::Block,
                Category::CommitConvention,
                "issue-set-mismatch",
                format!(
                    "Issues mentioned in the title or description are absent from every commit \
                     message: {}.",
                    uncovered.join(", ")
                ),
            ));
        }

        findings
    }
}
