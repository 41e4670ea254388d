//! The rule pipeline.
//!
//! An ordered battery of rule modules, each a value implementing [`Rule`].
//! Rules consume the cycle state and produce findings; later rules see the
//! findings of earlier ones and may short-circuit on overlapping blocking
//! findings. The pipeline ends with the merge-readiness composite, computed
//! by the runner over the full finding set.

mod approval;
mod fix_versions;
mod open_source;
mod pipeline_status;
mod rulesets;
mod submodule;
mod workflow;

pub use approval::ApprovalRule;
pub use fix_versions::FixVersionRule;
pub use open_source::OpenSourceRule;
pub use pipeline_status::PipelineRule;
pub use rulesets::{CompiledRule, CompiledRuleset};
pub use submodule::SubmoduleRule;
pub use workflow::{CommitIssueRule, IssueMentionRule, TitleFormatRule};

use crate::config::Config;
use crate::projector::CycleState;
use crate::types::{Category, Finding, FindingSet, Mergeability, PipelineStatus, Severity};

/// A rule module in the pipeline.
pub trait Rule: Send + Sync {
    /// Stable rule name for logging.
    fn name(&self) -> &'static str;

    /// Whether the rule has anything to say about this MR.
    fn applies_to(&self, cycle: &CycleState) -> bool;

    /// Evaluates the rule. `prior` carries the findings of earlier rules so
    /// a rule can short-circuit when an earlier blocking finding already
    /// covers its scope.
    fn evaluate(&self, cycle: &CycleState, prior: &[Finding]) -> Vec<Finding>;
}

/// Builds the rule battery in evaluation order from configuration.
pub fn build_rules(config: &Config) -> Vec<Box<dyn Rule>> {
    let rulesets: Vec<CompiledRuleset> = config
        .job_status_check_rule
        .iter()
        .map(|(name, entry)| CompiledRuleset::compile(name, &entry.approve_ruleset))
        .collect();

    vec![
        Box::new(IssueMentionRule::new(config.jira.project_keys.clone())),
        Box::new(TitleFormatRule),
        Box::new(CommitIssueRule),
        Box::new(FixVersionRule),
        Box::new(OpenSourceRule::new(rulesets.clone())),
        Box::new(SubmoduleRule),
        Box::new(ApprovalRule::new(
            rulesets,
            config.repo.need_code_owner_approval,
        )),
        Box::new(PipelineRule),
    ]
}

/// Runs the battery and appends the merge-readiness composite.
///
/// Merged MRs skip the battery entirely; only post-merge planning applies to
/// them.
pub fn evaluate_rules(rules: &[Box<dyn Rule>], cycle: &CycleState) -> Vec<Finding> {
    if cycle.mr.merged {
        return Vec::new();
    }

    let mut findings = Vec::new();
    for rule in rules {
        if !rule.applies_to(cycle) {
            continue;
        }
        let produced = rule.evaluate(cycle, &findings);
        tracing::debug!(
            rule = rule.name(),
            mr = %cycle.mr.id,
            produced = produced.len(),
            "Rule evaluated"
        );
        findings.extend(produced);
    }
    let readiness = merge_readiness(cycle, &findings);
    findings.push(readiness);
    findings
}

/// The merge-readiness composite.
///
/// `pass` iff no blocking finding was produced, the MR is not a draft, the
/// forge reports no conflicts, the head pipeline succeeded for the current
/// head, and no bot-owned discussion is still open. Anything else yields an
/// `info` finding naming the first unmet condition; it never materializes as
/// a discussion.
fn merge_readiness(cycle: &CycleState, findings: &[Finding]) -> Finding {
    let mr = &cycle.mr;
    // A manual-pending pipeline whose remaining jobs the bot may not start
    // counts as green: those jobs are outside the bot's merge gate.
    let pipeline_green = mr.pipeline.as_ref().is_some_and(|p| {
        p.sha == mr.head_sha
            && match p.status {
                PipelineStatus::Success => true,
                PipelineStatus::ManualPending => p
                    .startable_manual_jobs(cycle.autorun_stage.as_deref())
                    .next()
                    .is_none(),
                _ => false,
            }
    });

    let holdup = if findings.has_blocking() {
        Some("blocking findings are present")
    } else if mr.draft {
        Some("the MR is a draft")
    } else if mr.mergeability == Mergeability::Conflicts {
        Some("the MR has merge conflicts")
    } else if !pipeline_green {
        Some("the head pipeline has not succeeded for the current head")
    } else if cycle.ledger.has_any_open() {
        Some("bot discussions are still unresolved")
    } else {
        None
    };

    match holdup {
        None => Finding::new(
            Severity::Pass,
            Category::MergeReadiness,
            "mr",
            "ready to merge",
        ),
        Some(reason) => Finding::new(
            Severity::Info,
            Category::MergeReadiness,
            "mr",
            format!("not ready to merge: {reason}"),
        ),
    }
}

/// True when the cycle's findings declare the MR ready to merge.
pub fn is_merge_ready(findings: &[Finding]) -> bool {
    findings.iter().any(|f| {
        f.category == Category::MergeReadiness && f.severity == Severity::Pass
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cycle_state, green_pipeline, mr_snapshot};

    #[test]
    fn merged_mrs_skip_the_battery() {
        let mut mr = mr_snapshot(1);
        mr.merged = true;
        let cycle = cycle_state(mr);
        let findings = evaluate_rules(&[], &cycle);
        assert!(findings.is_empty());
    }

    #[test]
    fn readiness_requires_green_pipeline() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = None;
        let cycle = cycle_state(mr);
        let findings = evaluate_rules(&[], &cycle);
        assert!(!is_merge_ready(&findings));
    }

    #[test]
    fn readiness_pass_on_clean_mr() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(green_pipeline(&mr));
        let cycle = cycle_state(mr);
        let findings = evaluate_rules(&[], &cycle);
        assert!(is_merge_ready(&findings));
    }

    #[test]
    fn readiness_blocked_by_draft() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(green_pipeline(&mr));
        mr.draft = true;
        let cycle = cycle_state(mr);
        assert!(!is_merge_ready(&evaluate_rules(&[], &cycle)));
    }

    #[test]
    fn readiness_blocked_by_conflicts() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(green_pipeline(&mr));
        mr.mergeability = Mergeability::Conflicts;
        let cycle = cycle_state(mr);
        assert!(!is_merge_ready(&evaluate_rules(&[], &cycle)));
    }

    #[test]
    fn readiness_accepts_manual_pending_with_no_startable_jobs() {
        use crate::types::PipelineJob;
        let mut mr = mr_snapshot(1);
        let mut pipeline = green_pipeline(&mr);
        pipeline.status = PipelineStatus::ManualPending;
        pipeline.jobs = vec![PipelineJob {
            name: "deploy:no-bot-start".into(),
            stage: "deploy".into(),
            manual: true,
        }];
        mr.pipeline = Some(pipeline);
        let cycle = cycle_state(mr);
        assert!(is_merge_ready(&evaluate_rules(&[], &cycle)));
    }

    #[test]
    fn readiness_blocked_by_stale_pipeline() {
        let mut mr = mr_snapshot(1);
        let mut pipeline = green_pipeline(&mr);
        pipeline.sha = crate::test_utils::sha(0xdd);
        mr.pipeline = Some(pipeline);
        let cycle = cycle_state(mr);
        assert!(!is_merge_ready(&evaluate_rules(&[], &cycle)));
    }
}
