//! The action planner.
//!
//! Translates the cycle's findings and observed MR state into the minimal
//! set of external actions, by diffing desired state against what the forge
//! and tracker already show. Planning is pure: it never talks to a service,
//! so it is exhaustively testable.

mod actions;
mod markers;

pub use actions::{Action, ActionKind, Plan};
pub use markers::{
    follow_up_not_needed_marker, follow_ups_done_marker, in_progress_marker, merged_marker,
    suspicious_status_marker,
};

use tracing::debug;

use crate::ledger::format_discussion_body;
use crate::projector::{CycleState, FollowUpMode};
use crate::rules::is_merge_ready;
use crate::types::{
    Category, Finding, IssueStatus, Mergeability, Severity,
};

/// Cycle-local overrides carried by the triggering events.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlanTrigger {
    /// A `run-pipeline` command: trigger even on a draft MR.
    pub forced_pipeline: bool,
    /// A `follow-up` / `draft-follow-up` command on a merged MR: regenerate
    /// follow-ups even when they were generated before. The flag carries the
    /// draft mode override.
    pub forced_follow_up: Option<bool>,
}

/// Computes the action plan for one cycle.
pub fn plan(cycle: &CycleState, findings: &[Finding], trigger: PlanTrigger) -> Plan {
    let mut plan = Plan::default();

    if cycle.mr.merged {
        plan_post_merge(cycle, trigger, &mut plan);
    } else {
        plan_discussions(cycle, findings, &mut plan);
        plan_assignees(cycle, findings, &mut plan);
        plan_pipeline(cycle, findings, trigger, &mut plan);
        plan_merge(cycle, findings, trigger, &mut plan);
    }

    debug!(mr = %cycle.mr.id, actions = plan.actions.len(), "Planned cycle actions");
    plan
}

/// Desired-vs-observed reconciliation of finding discussions.
///
/// A reportable finding without an open discussion gets one; an open
/// bot-owned discussion whose finding disappeared is resolved only when its
/// category is self-healing. Compliance findings are never auto-resolved.
fn plan_discussions(cycle: &CycleState, findings: &[Finding], plan: &mut Plan) {
    for finding in findings {
        if !finding.severity.is_reportable() {
            continue;
        }
        if cycle.ledger.has_open(&finding.fingerprint) {
            continue;
        }
        plan.push(Action::CreateDiscussion {
            fingerprint: finding.fingerprint.clone(),
            body: format_discussion_body(finding),
        });
    }

    for open in cycle.ledger.open_discussions() {
        let still_current = findings
            .iter()
            .any(|f| f.severity.is_reportable() && f.fingerprint == open.fingerprint);
        if still_current {
            continue;
        }
        let self_healing = fingerprint_category(&open.fingerprint)
            .map(|c| c.is_self_healing())
            .unwrap_or(false);
        if self_healing {
            plan.push(Action::ResolveDiscussion {
                discussion: open.id.clone(),
                fingerprint: open.fingerprint.clone(),
            });
        }
    }
}

/// Required compliance approvers become assignees; humans are never removed.
fn plan_assignees(cycle: &CycleState, findings: &[Finding], plan: &mut Plan) {
    let wanted: std::collections::BTreeSet<&String> = findings
        .iter()
        .filter(|f| {
            f.category == Category::OpenSourceCompliance && f.severity.is_reportable()
        })
        .flat_map(|f| f.required_approvers.iter())
        .collect();
    for approver in wanted {
        if !cycle.mr.assignees.contains(approver) {
            plan.push(Action::AddAssignee {
                username: approver.clone(),
            });
        }
    }
}

/// Pipeline trigger policy: first run, explicit command, or a head that
/// moved past the last pipeline on an approved, mergeable, non-draft MR.
/// Every trigger is preceded by a rebase onto the target head.
fn plan_pipeline(cycle: &CycleState, findings: &[Finding], trigger: PlanTrigger, plan: &mut Plan) {
    let mr = &cycle.mr;

    let first_run = mr.pipeline.is_none();
    let head_moved = mr
        .pipeline
        .as_ref()
        .is_some_and(|p| p.sha != mr.head_sha);
    let approvals_ok = !findings
        .iter()
        .any(|f| f.category == Category::Approval && f.severity == Severity::Block);

    let decision = if trigger.forced_pipeline || first_run {
        Some(false)
    } else if head_moved
        && !mr.draft
        && approvals_ok
        && mr.mergeability == Mergeability::Mergeable
    {
        // The pipeline only reruns when the rebase actually changed what
        // the MR introduces.
        Some(true)
    } else {
        None
    };

    if let Some(only_if_diff_changed) = decision {
        plan.push(Action::Rebase);
        plan.push(Action::TriggerPipeline {
            only_if_diff_changed,
        });
    }
}

fn plan_merge(cycle: &CycleState, findings: &[Finding], trigger: PlanTrigger, plan: &mut Plan) {
    if !is_merge_ready(findings) {
        return;
    }
    let mr = &cycle.mr;
    let message = if mr.squash {
        mr.squash_commit_message()
    } else {
        format!("Merge branch '{}' into '{}'", mr.source_branch, mr.target_branch)
    };
    plan.push(Action::Merge {
        message,
        squash: mr.squash,
    });
    // The merge succeeded iff the executor reaches the post-merge actions;
    // a "not mergeable" refusal abandons them and the next cycle re-plans.
    plan_post_merge(cycle, trigger, plan);
}

/// Post-merge duties: tracker synchronization and follow-up generation.
///
/// Every tracker-visible action is guarded by a marker lookup against the
/// comments fetched this cycle, so redelivered events cannot duplicate them.
fn plan_post_merge(cycle: &CycleState, trigger: PlanTrigger, plan: &mut Plan) {
    let mr = &cycle.mr;

    for (key, issue) in &cycle.issues {
        let marker = merged_marker(mr.id, &mr.target_branch);
        let already_commented = cycle
            .issue_comments
            .get(key)
            .is_some_and(|comments| comments.iter().any(|c| c.body.contains(&marker)));
        if !already_commented {
            plan.push(Action::PostIssueComment {
                key: key.clone(),
                body: format!(
                    "{marker}\nMR [{title}]({url}) was merged into `{branch}`.",
                    title = mr.title,
                    url = mr.web_url,
                    branch = mr.target_branch,
                ),
            });
        }

        match &issue.status {
            IssueStatus::InReview => {
                plan.push(Action::TransitionIssue { key: key.clone() });
            }
            IssueStatus::InProgress => {
                let marker = in_progress_marker(key);
                if !has_marked_note(cycle, &marker) {
                    plan.push(Action::PostMrNote {
                        body: format!(
                            "{marker}\n{key} is still `In Progress`; it was left untouched. \
                             Move it along manually once the remaining work lands."
                        ),
                    });
                }
            }
            IssueStatus::WaitingForQa | IssueStatus::Closed => {}
            IssueStatus::Other(raw) => {
                let marker = suspicious_status_marker(mr.id);
                let already = cycle
                    .issue_comments
                    .get(key)
                    .is_some_and(|comments| comments.iter().any(|c| c.body.contains(&marker)));
                if !already {
                    plan.push(Action::PostIssueComment {
                        key: key.clone(),
                        body: format!(
                            "{marker}\nMR [{title}]({url}) was merged while this issue is in \
                             status `{raw}`; please check the workflow state.",
                            title = mr.title,
                            url = mr.web_url,
                        ),
                    });
                }
            }
        }
    }

    plan_follow_ups(cycle, trigger, plan);
}

fn plan_follow_ups(cycle: &CycleState, trigger: PlanTrigger, plan: &mut Plan) {
    let mr = &cycle.mr;

    if mr.is_follow_up() {
        // A follow-up never fans out further; answer an explicit command
        // with a note (once).
        if trigger.forced_follow_up.is_some() {
            let marker = follow_up_not_needed_marker();
            if !has_marked_note(cycle, &marker) {
                plan.push(Action::PostMrNote {
                    body: format!(
                        "{marker}\nThis MR is itself a follow-up; no further follow-ups are \
                         created for it."
                    ),
                });
            }
        }
        return;
    }

    let draft = match trigger.forced_follow_up {
        Some(draft) => draft,
        None => {
            if has_marked_note(cycle, &follow_ups_done_marker()) {
                return;
            }
            cycle.follow_up_mode == FollowUpMode::Draft
        }
    };
    plan.push(Action::GenerateFollowUps { draft });
}

fn has_marked_note(cycle: &CycleState, marker: &str) -> bool {
    cycle.notes.iter().any(|n| n.body.contains(marker))
}

/// Recovers the category from a fingerprint's `category:` prefix.
fn fingerprint_category(fingerprint: &crate::types::Fingerprint) -> Option<Category> {
    let tag = fingerprint.as_str().split_once(':')?.0;
    Category::from_tag(tag)
}
