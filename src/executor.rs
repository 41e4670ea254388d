//! The action executor.
//!
//! Applies a cycle's plan in the fixed order discussions → assignees →
//! rebase → pipeline → merge → issue transitions → follow-ups. Transient
//! API errors are retried with bounded backoff; exhaustion defers the whole
//! cycle (remaining actions are idempotent and re-planned next cycle).
//! Permanent rejections are collected and surface as findings on the next
//! cycle. A merge refused as "not mergeable" abandons the remainder of the
//! plan without error.

use tracing::{debug, info, instrument, warn};

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::context::Context;
use crate::followup;
use crate::forge::{retry_with_backoff, ApiError, ForgeApi, MergeOutcome, RetryConfig};
use crate::gitops::RebaseOutcome;
use crate::planner::{follow_ups_done_marker, Action, ActionKind, Plan};
use crate::projector::CycleState;
use crate::tracker::TrackerApi;
use crate::types::{Category, Finding, Severity};

/// Workflow status an issue moves to after its MR merged.
const STATUS_WAITING_FOR_QA: &str = "Waiting for QA";
/// Fallback when the tracker workflow lacks the QA status.
const STATUS_CLOSED: &str = "Closed";

/// How the execution of a plan ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecOutcome {
    /// Every action ran (some may have failed permanently; see failures).
    Completed,
    /// A transient failure exhausted its retries; re-run later.
    Deferred { reason: String },
    /// The forge refused the merge as not mergeable; the remainder of the
    /// plan was abandoned and the next cycle reconciles.
    AbortedNotMergeable,
}

/// A permanently failed action, reported as a finding on the next cycle.
#[derive(Debug, Clone)]
pub struct ExecutionFailure {
    pub kind: ActionKind,
    pub detail: String,
}

impl ExecutionFailure {
    /// The block finding describing this failure.
    pub fn into_finding(self) -> Finding {
        let category = match self.kind {
            ActionKind::Rebase | ActionKind::TriggerPipeline => Category::Pipeline,
            ActionKind::Merge => Category::MergeReadiness,
            _ => Category::Workflow,
        };
        Finding::new(
            Severity::Block,
            category,
            &format!("exec:{}", self.kind),
            format!(
                "The bot could not complete a `{}` action: {}. It will not retry until a new \
                 event arrives for this MR.",
                self.kind, self.detail
            ),
        )
    }
}

/// Result of executing a plan.
#[derive(Debug)]
pub struct ExecutionReport {
    pub outcome: ExecOutcome,
    pub failures: Vec<ExecutionFailure>,
    /// True when the merge succeeded during this execution.
    pub merged: bool,
}

/// Executes the plan against the forge, tracker, and git workspace.
#[instrument(skip_all, fields(mr = %cycle.mr.id))]
pub async fn execute<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
    plan: Plan,
) -> ExecutionReport
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let mr = cycle.mr.id;
    let mut failures = Vec::new();
    let mut merged = false;
    let mut merged_sha: Option<crate::types::Sha> = None;
    let mut rebase_outcome: Option<RebaseOutcome> = None;

    for action in plan.into_ordered() {
        let key = action.key(mr);
        debug!(action = %key, "Executing action");

        let result: Result<(), ApiError> = match &action {
            Action::CreateDiscussion { body, .. } => {
                forge_retry(|| ctx.forge.create_discussion(mr, body))
                    .await
                    .map(|_| ())
            }
            Action::ResolveDiscussion { discussion, .. } => {
                forge_retry(|| ctx.forge.resolve_discussion(mr, discussion)).await
            }
            Action::AddAssignee { username } => {
                forge_retry(|| ctx.forge.add_assignee(mr, username)).await
            }
            Action::Rebase => {
                match run_rebase(ctx, cycle).await {
                    Ok(outcome) => {
                        rebase_outcome = Some(outcome);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            Action::TriggerPipeline {
                only_if_diff_changed,
            } => {
                let skip = *only_if_diff_changed
                    && !rebase_outcome
                        .as_ref()
                        .map(RebaseOutcome::affects_diff)
                        .unwrap_or(false);
                if skip {
                    debug!("Rebase left the MR diff unchanged, not re-triggering the pipeline");
                    Ok(())
                } else {
                    trigger_pipeline(ctx, cycle).await
                }
            }
            Action::Merge { message, squash } => {
                match forge_retry(|| ctx.forge.merge_mr(mr, message, *squash)).await {
                    Ok(MergeOutcome::Merged { sha }) => {
                        info!(mr = %mr, sha = %sha, "Merged");
                        merged = true;
                        merged_sha = Some(sha);
                        Ok(())
                    }
                    Ok(MergeOutcome::NotMergeable) => {
                        info!(mr = %mr, "Forge refused the merge as not mergeable");
                        return ExecutionReport {
                            outcome: ExecOutcome::AbortedNotMergeable,
                            failures,
                            merged,
                        };
                    }
                    Err(e) if e.is_transient() => {
                        return deferred(e.to_string(), failures, merged);
                    }
                    Err(e) => {
                        // A failed merge makes the rest of the plan
                        // meaningless; stop here and let the finding tell
                        // the user.
                        failures.push(ExecutionFailure {
                            kind: ActionKind::Merge,
                            detail: e.to_string(),
                        });
                        return ExecutionReport {
                            outcome: ExecOutcome::Completed,
                            failures,
                            merged,
                        };
                    }
                }
            }
            Action::TransitionIssue { key } => transition_issue(ctx, key).await,
            Action::PostIssueComment { key, body } => {
                forge_retry(|| ctx.tracker.post_comment(key, body)).await
            }
            Action::PostMrNote { body } => {
                forge_retry(|| ctx.forge.post_note(mr, body)).await.map(|_| ())
            }
            Action::GenerateFollowUps { draft } => {
                run_follow_ups(ctx, cycle, *draft, merged_sha.as_ref()).await
            }
        };

        match result {
            Ok(()) => {}
            Err(e) if e.is_transient() => {
                return deferred(e.to_string(), failures, merged);
            }
            Err(e) => {
                warn!(action = %key, error = %e, "Action failed permanently");
                failures.push(ExecutionFailure {
                    kind: action.kind(),
                    detail: e.to_string(),
                });
            }
        }
    }

    ExecutionReport {
        outcome: ExecOutcome::Completed,
        failures,
        merged,
    }
}

fn deferred(reason: String, failures: Vec<ExecutionFailure>, merged: bool) -> ExecutionReport {
    ExecutionReport {
        outcome: ExecOutcome::Deferred { reason },
        failures,
        merged,
    }
}

async fn forge_retry<T, F, Fut>(operation: F) -> Result<T, ApiError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, ApiError>>,
{
    retry_with_backoff(RetryConfig::DEFAULT, operation).await
}

/// Rebases the source branch onto the target head; force-pushes when the
/// rebase rewrote commits. A conflicted rebase is not an error: the forge
/// will report conflicts and the mergeability rule takes over.
async fn run_rebase<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
) -> Result<RebaseOutcome, ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let mr = &cycle.mr;
    let outcome = ctx
        .git
        .rebase_onto(&mr.source_branch, &mr.target_branch)
        .await
        .map_err(|e| ApiError::transient(format!("git rebase: {e}")))?;

    match &outcome {
        RebaseOutcome::Clean { .. } if outcome.needs_push() => {
            ctx.git
                .push(&mr.source_branch, true)
                .await
                .map_err(|e| ApiError::transient(format!("git push: {e}")))?;
        }
        RebaseOutcome::Conflict { .. } => {
            info!(mr = %mr.id, "Rebase conflicted; leaving the branch untouched");
        }
        _ => {}
    }
    Ok(outcome)
}

/// Starts all startable manual jobs of the current head pipeline.
async fn trigger_pipeline<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
) -> Result<(), ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let mr = cycle.mr.id;
    // Re-fetch: the rebase that just ran may have produced a new pipeline.
    let Some(pipeline) = forge_retry(|| ctx.forge.get_pipeline(mr)).await? else {
        debug!(mr = %mr, "No pipeline to trigger yet");
        return Ok(());
    };
    let names: Vec<String> = pipeline
        .startable_manual_jobs(cycle.autorun_stage.as_deref())
        .map(|j| j.name.clone())
        .collect();
    if names.is_empty() {
        debug!(mr = %mr, pipeline = %pipeline.id, "No startable manual jobs");
        return Ok(());
    }
    info!(mr = %mr, pipeline = %pipeline.id, jobs = ?names, "Starting manual jobs");
    forge_retry(|| ctx.forge.play_jobs(mr, &names)).await
}

/// Moves an issue to `Waiting for QA`, falling back to `Closed` when the
/// workflow has no such transition.
async fn transition_issue<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    key: &crate::types::IssueKey,
) -> Result<(), ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    match forge_retry(|| ctx.tracker.transition_issue(key, STATUS_WAITING_FOR_QA)).await {
        Ok(()) => {
            info!(issue = %key, to = STATUS_WAITING_FOR_QA, "Issue transitioned");
            Ok(())
        }
        Err(e) if !e.is_transient() => {
            debug!(issue = %key, error = %e, "Falling back to Closed");
            forge_retry(|| ctx.tracker.transition_issue(key, STATUS_CLOSED)).await?;
            info!(issue = %key, to = STATUS_CLOSED, "Issue transitioned (fallback)");
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// Runs the follow-up generator and stamps the MR with the done marker.
async fn run_follow_ups<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
    draft: bool,
    fresh_merge_sha: Option<&crate::types::Sha>,
) -> Result<(), ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let created = followup::generate(ctx, cycle, draft, fresh_merge_sha).await?;
    let summary = if created.is_empty() {
        "No follow-up MRs were needed (no other fix-version branches).".to_string()
    } else {
        let refs: Vec<String> = created.iter().map(|mr| mr.to_string()).collect();
        format!("Created follow-up MRs: {}.", refs.join(", "))
    };
    let body = format!("{}\n{}", follow_ups_done_marker(), summary);
    forge_retry(|| ctx.forge.post_note(cycle.mr.id, &body))
        .await
        .map(|_| ())
}
