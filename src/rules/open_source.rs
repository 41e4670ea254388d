//! Open-source compliance findings.
//!
//! The text-level checks themselves are delegated (see `checkers`); this
//! rule turns the checker's verdicts into findings and resolves the human
//! sign-off requirements from the `open_source` approval ruleset.

use crate::projector::CycleState;
use crate::types::{Category, Finding, Severity};

use super::rulesets::CompiledRuleset;
use super::Rule;

/// Name of the ruleset that governs open-source sign-off.
const OPEN_SOURCE_RULESET: &str = "open_source";

pub struct OpenSourceRule {
    rulesets: Vec<CompiledRuleset>,
}

impl OpenSourceRule {
    pub fn new(rulesets: Vec<CompiledRuleset>) -> Self {
        OpenSourceRule { rulesets }
    }

    fn open_source_ruleset(&self) -> Option<&CompiledRuleset> {
        self.rulesets.iter().find(|r| r.name == OPEN_SOURCE_RULESET)
    }

    /// Approvers responsible for the given file, per the ruleset's
    /// first-match-wins resolution.
    fn approvers_for(&self, path: &str, cycle: &CycleState) -> Vec<String> {
        let Some(ruleset) = self.open_source_ruleset() else {
            return Vec::new();
        };
        let changed: Vec<_> = cycle
            .mr
            .changes
            .iter()
            .filter(|c| c.path == path)
            .collect();
        if changed.is_empty() {
            return ruleset.all_approvers().into_iter().collect();
        }
        ruleset.required_approvers(&changed).into_iter().collect()
    }
}

impl Rule for OpenSourceRule {
    fn name(&self) -> &'static str {
        "open-source-compliance"
    }

    fn applies_to(&self, cycle: &CycleState) -> bool {
        cycle.compliance.checked
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let report = &cycle.compliance;
        let mut findings = Vec::new();

        for violation in &report.violations {
            let location = match violation.line {
                Some(line) => format!("{}:{line}", violation.file),
                None => violation.file.clone(),
            };
            findings.push(
                Finding::new(
                    Severity::Block,
                    Category::OpenSourceCompliance,
                    &violation.file,
                    format!(
                        "Open-source compliance violation in `{location}` ({}): {}",
                        violation.rule_id, violation.message
                    ),
                )
                .with_required_approvers(self.approvers_for(&violation.file, cycle)),
            );
        }
        if !findings.is_empty() {
            return findings;
        }

        // Follow-ups re-land content that already went through sign-off on
        // the original MR.
        if !report.new_open_source_files.is_empty() && !cycle.mr.is_follow_up() {
            let approvers: Vec<String> = report
                .new_open_source_files
                .iter()
                .flat_map(|f| self.approvers_for(f, cycle))
                .collect();
            findings.push(
                Finding::new(
                    Severity::Warn,
                    Category::OpenSourceCompliance,
                    "new-open-source-files",
                    format!(
                        "This MR adds new open-source files ({}); an open-source approver must \
                         review and resolve this discussion before merge.",
                        report.new_open_source_files.join(", ")
                    ),
                )
                .with_required_approvers(approvers),
            );
            return findings;
        }

        findings.push(Finding::new(
            Severity::Pass,
            Category::OpenSourceCompliance,
            "clean",
            "Open-source compliance checks passed.",
        ));
        findings
    }
}
