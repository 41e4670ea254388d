//! Nested-submodule consistency findings.

use crate::checkers::SubmoduleVerdict;
use crate::projector::CycleState;
use crate::types::{Category, Finding, Severity};

use super::Rule;

/// Turns the delegated submodule checker's verdicts into findings: one block
/// per inconsistent directory, a single pass when everything checked out.
pub struct SubmoduleRule;

impl Rule for SubmoduleRule {
    fn name(&self) -> &'static str {
        "submodule-consistency"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        !cycle.submodules.is_empty()
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mut findings = Vec::new();
        for report in &cycle.submodules {
            if let SubmoduleVerdict::Inconsistent { details } = &report.verdict {
                findings.push(Finding::new(
                    Severity::Block,
                    Category::SubmoduleConsistency,
                    &report.dir,
                    format!(
                        "Changes under `{}` are inconsistent with its source repository: \
                         {details}",
                        report.dir
                    ),
                ));
            }
        }
        if findings.is_empty() {
            findings.push(Finding::new(
                Severity::Pass,
                Category::SubmoduleConsistency,
                "consistent",
                "Nested-submodule consistency checks passed.",
            ));
        }
        findings
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::projector::SubmoduleReport;
    use crate::test_utils::{cycle_state, mr_snapshot};
    use crate::types::FindingSet;

    #[test]
    fn inconsistent_dirs_block_individually() {
        let mut cycle = cycle_state(mr_snapshot(1));
        cycle.submodules = vec![
            SubmoduleReport {
                dir: "artifacts/nx_kit".into(),
                verdict: SubmoduleVerdict::Inconsistent {
                    details: "file nx_kit/a.cpp differs from its counterpart".into(),
                },
            },
            SubmoduleReport {
                dir: "open/libs/nx_codec".into(),
                verdict: SubmoduleVerdict::Consistent,
            },
        ];
        let findings = SubmoduleRule.evaluate(&cycle, &[]);
        assert_eq!(findings.len(), 1);
        assert!(findings.has_blocking());
        assert!(findings[0].message.contains("artifacts/nx_kit"));
    }

    #[test]
    fn all_consistent_passes() {
        let mut cycle = cycle_state(mr_snapshot(1));
        cycle.submodules = vec![SubmoduleReport {
            dir: "artifacts/nx_kit".into(),
            verdict: SubmoduleVerdict::Consistent,
        }];
        let findings = SubmoduleRule.evaluate(&cycle, &[]);
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].severity, Severity::Pass);
    }

    #[test]
    fn does_not_apply_without_touched_submodules() {
        let cycle = cycle_state(mr_snapshot(1));
        assert!(!SubmoduleRule.applies_to(&cycle));
    }
}
