//! Pipeline status findings.

use crate::projector::CycleState;
use crate::types::{Category, Finding, PipelineStatus, Severity};

use super::Rule;

/// Reads the MR's head pipeline: `block` on failure, `info` while running,
/// `pass` on success aligned with the current head. A manual-pending
/// pipeline with nothing the bot may start counts as a pass.
pub struct PipelineRule;

impl Rule for PipelineRule {
    fn name(&self) -> &'static str {
        "pipeline-status"
    }

    fn applies_to(&self, _cycle: &CycleState) -> bool {
        true
    }

    fn evaluate(&self, cycle: &CycleState, _prior: &[Finding]) -> Vec<Finding> {
        let mr = &cycle.mr;
        let autorun_stage = cycle_autorun_stage(cycle);

        let finding = match &mr.pipeline {
            None => Finding::new(
                Severity::Info,
                Category::Pipeline,
                "status",
                "No pipeline has run for this MR yet.",
            ),
            Some(p) => match p.status {
                PipelineStatus::Failed => Finding::new(
                    Severity::Block,
                    Category::Pipeline,
                    "status",
                    format!("Pipeline {} failed for {}.", p.id, p.sha.short()),
                ),
                PipelineStatus::Canceled => Finding::new(
                    Severity::Info,
                    Category::Pipeline,
                    "status",
                    format!("Pipeline {} was canceled.", p.id),
                ),
                PipelineStatus::Running => Finding::new(
                    Severity::Info,
                    Category::Pipeline,
                    "status",
                    format!("Pipeline {} is running.", p.id),
                ),
                PipelineStatus::ManualPending => {
                    if p.startable_manual_jobs(autorun_stage).next().is_none() {
                        Finding::new(
                            Severity::Pass,
                            Category::Pipeline,
                            "status",
                            "Pipeline is waiting only on jobs the bot does not start.",
                        )
                    } else {
                        Finding::new(
                            Severity::Info,
                            Category::Pipeline,
                            "status",
                            format!("Pipeline {} has manual jobs waiting to be started.", p.id),
                        )
                    }
                }
                PipelineStatus::Success => {
                    if p.sha == mr.head_sha {
                        Finding::new(
                            Severity::Pass,
                            Category::Pipeline,
                            "status",
                            format!("Pipeline {} succeeded for the current head.", p.id),
                        )
                    } else {
                        Finding::new(
                            Severity::Info,
                            Category::Pipeline,
                            "status",
                            format!(
                                "Pipeline {} succeeded for {}, but the head is now {}.",
                                p.id,
                                p.sha.short(),
                                mr.head_sha.short()
                            ),
                        )
                    }
                }
            },
        };
        vec![finding]
    }
}

/// The autorun stage is carried on the cycle via configuration; stored here
/// to keep the rule constructible without a config handle in tests.
fn cycle_autorun_stage(cycle: &CycleState) -> Option<&str> {
    cycle.autorun_stage.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{cycle_state, mr_snapshot, sha};
    use crate::types::{FindingSet, PipelineId, PipelineJob, PipelineState};

    fn pipeline(status: PipelineStatus, jobs: Vec<PipelineJob>, head: &crate::types::Sha) -> PipelineState {
        PipelineState {
            id: PipelineId(9),
            status,
            sha: head.clone(),
            jobs,
        }
    }

    fn manual_job(name: &str, stage: &str) -> PipelineJob {
        PipelineJob {
            name: name.into(),
            stage: stage.into(),
            manual: true,
        }
    }

    #[test]
    fn failed_pipeline_blocks() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(PipelineStatus::Failed, vec![], &mr.head_sha));
        let cycle = cycle_state(mr);
        assert!(PipelineRule.evaluate(&cycle, &[]).has_blocking());
    }

    #[test]
    fn running_pipeline_is_informational() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(PipelineStatus::Running, vec![], &mr.head_sha));
        let cycle = cycle_state(mr);
        let findings = PipelineRule.evaluate(&cycle, &[]);
        assert_eq!(findings[0].severity, Severity::Info);
    }

    #[test]
    fn aligned_success_passes() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(PipelineStatus::Success, vec![], &mr.head_sha));
        let cycle = cycle_state(mr);
        assert_eq!(PipelineRule.evaluate(&cycle, &[])[0].severity, Severity::Pass);
    }

    #[test]
    fn stale_success_is_informational() {
        let mut mr = mr_snapshot(1);
        let stale = sha(0xdd);
        mr.pipeline = Some(pipeline(PipelineStatus::Success, vec![], &stale));
        let cycle = cycle_state(mr);
        assert_eq!(PipelineRule.evaluate(&cycle, &[])[0].severity, Severity::Info);
    }

    #[test]
    fn manual_pending_with_no_startable_jobs_passes() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(
            PipelineStatus::ManualPending,
            vec![manual_job("deploy:no-bot-start", "deploy")],
            &mr.head_sha,
        ));
        let cycle = cycle_state(mr);
        assert_eq!(PipelineRule.evaluate(&cycle, &[])[0].severity, Severity::Pass);
    }

    #[test]
    fn manual_pending_with_startable_jobs_is_informational() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(
            PipelineStatus::ManualPending,
            vec![manual_job("build", "build")],
            &mr.head_sha,
        ));
        let cycle = cycle_state(mr);
        assert_eq!(PipelineRule.evaluate(&cycle, &[])[0].severity, Severity::Info);
    }

    #[test]
    fn autorun_stage_jobs_are_not_startable() {
        let mut mr = mr_snapshot(1);
        mr.pipeline = Some(pipeline(
            PipelineStatus::ManualPending,
            vec![manual_job("lint", "checks")],
            &mr.head_sha,
        ));
        let mut cycle = cycle_state(mr);
        cycle.autorun_stage = Some("checks".into());
        assert_eq!(PipelineRule.evaluate(&cycle, &[])[0].severity, Severity::Pass);
    }
}
