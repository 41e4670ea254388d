//! Fix-version sanity checks for referenced supported-project issues.

use std::collections::BTreeMap;

use crate::projector::CycleState;
use crate::types::{Category, Finding, Severity};

use super::Rule;

/// Every referenced supported-project issue must carry a sane `fixVersions`
/// field: non-empty, every version mapped to a known branch, and no two
/// versions naming the same branch.
pub struct FixVersionRule;

impl Rule for FixVersionRule {
    fn name(&self) -> &'static str {
        "fix-version-sanity"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        !cycle.issues.is_empty() || !cycle.missing_issues.is_empty()
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mut findings = Vec::new();

        for key in &cycle.missing_issues {
            findings.push(Finding::new(
                Severity::Block,
                Category::FixVersionSanity,
                key.as_str(),
                format!("The MR references {key}, but the tracker has no such issue."),
            ));
        }

        for (key, issue) in &cycle.issues {
            if issue.fix_versions.is_empty() {
                findings.push(Finding::new(
                    Severity::Block,
                    Category::FixVersionSanity,
                    key.as_str(),
                    format!(
                        "{key} has an empty fixVersions field; set the versions this change \
                         lands in before merging."
                    ),
                ));
                continue;
            }

            let unmapped: Vec<&str> = issue
                .fix_versions
                .iter()
                .filter(|v| v.branch.is_none())
                .map(|v| v.name.as_str())
                .collect();
            if !unmapped.is_empty() {
                findings.push(Finding::new(
                    Severity::Block,
                    Category::FixVersionSanity,
                    key.as_str(),
                    format!(
                        "{key} has fixVersions with no known release branch: {}.",
                        unmapped.join(", ")
                    ),
                ));
            }

            // Two versions resolving to the same branch contradict each
            // other: the change cannot land in one branch twice.
            let mut by_branch: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
            for version in &issue.fix_versions {
                if let Some(branch) = version.branch.as_deref() {
                    by_branch.entry(branch).or_default().push(&version.name);
                }
            }
            for (branch, versions) in by_branch {
                if versions.len() > 1 {
                    findings.push(Finding::new(
                        Severity::Block,
                        Category::FixVersionSanity,
                        key.as_str(),
                        format!(
                            "{key} has contradictory fixVersions: {} all map to branch \
                             {branch}.",
                            versions.join(", ")
                        ),
                    ));
                }
            }
        }

        findings
    }
}
