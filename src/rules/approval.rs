//! Approval sufficiency.
//!
//! For each applicable approval ruleset, the required approver set is
//! resolved by the first `(patterns, approvers)` rule matching the MR's
//! relevant changed files. The MR is approved when every applicable ruleset
//! has at least one approval from its set. An author who is in the set is
//! their own sign-off; follow-up MRs are exempt entirely.

use crate::projector::CycleState;
use crate::types::{Category, Finding, Severity};

use super::rulesets::CompiledRuleset;
use super::Rule;

/// Ruleset gated behind the repo's code-owner-approval toggle.
const CODE_OWNER_RULESET: &str = "code_owner_approval";

pub struct ApprovalRule {
    rulesets: Vec<CompiledRuleset>,
    need_code_owner_approval: bool,
}

impl ApprovalRule {
    pub fn new(rulesets: Vec<CompiledRuleset>, need_code_owner_approval: bool) -> Self {
        ApprovalRule {
            rulesets,
            need_code_owner_approval,
        }
    }

    fn enforced_rulesets(&self) -> impl Iterator<Item = &CompiledRuleset> {
        self.rulesets
            .iter()
            .filter(|r| r.name != CODE_OWNER_RULESET || self.need_code_owner_approval)
    }
}

impl Rule for ApprovalRule {
    fn name(&self) -> &'static str {
        "approval-sufficiency"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        !cycle.mr.is_follow_up()
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mr = &cycle.mr;
        let mut findings = Vec::new();

        for ruleset in self.enforced_rulesets() {
            if !ruleset.applies_to_changes(&mr.changes) {
                continue;
            }
            // Deleted files still count for code ownership: removing a
            // code-owned file needs the owner's eyes too.
            let include_deleted = ruleset.name == CODE_OWNER_RULESET;
            let relevant = ruleset.relevant_files(&mr.changes, include_deleted);
            let required = ruleset.required_approvers(&relevant);

            let satisfied = required.contains(&mr.author.username)
                || required.iter().any(|a| mr.approved_by.contains(a));
            if satisfied {
                continue;
            }

            let mentions: Vec<String> = required.iter().map(|a| format!("@{a}")).collect();
            findings.push(Finding::new(
                Severity::Block,
                Category::Approval,
                &ruleset.name,
                format!(
                    "The `{}` check needs an approval from one of: {}.",
                    ruleset.name,
                    mentions.join(", ")
                ),
            ));
        }

        findings
    }
}
