//! MR state projector.
//!
//! Builds the authoritative per-cycle view of an MR from live forge, tracker,
//! and git state. Nothing is cached across cycles: freshness wins over call
//! volume. Within one cycle every sub-query runs at most once (issues are
//! keyed by issue key, checker runs share a single checkout lease), which is
//! all the memoization the cycle needs.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, instrument};

use crate::checkers::{
    CheckerError, ComplianceChecker, SubmoduleChecker, SubmoduleVerdict, Violation,
};
use crate::commands::{parse_command, Command};
use crate::context::Context;
use crate::forge::{ApiError, ForgeApi, Note};
use crate::gitops::GitError;
use crate::ledger::DiscussionLedger;
use crate::tracker::{TrackerApi, TrackerComment};
use crate::types::{
    Category, Finding, IssueKey, IssueSnapshot, MrId, MrSnapshot, Severity,
};

/// How follow-up MRs should be created for this MR.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FollowUpMode {
    #[default]
    Normal,
    Draft,
}

/// Result of the open-source compliance check for this cycle.
#[derive(Debug, Clone, Default)]
pub struct ComplianceReport {
    /// False when the MR touches no open-source files (nothing was checked).
    pub checked: bool,
    pub violations: Vec<Violation>,
    /// Changed open-source files (paths), excluding deletions.
    pub open_source_files: Vec<String>,
    /// Newly added open-source files (paths).
    pub new_open_source_files: Vec<String>,
}

/// Result of the nested-submodule check for one configured directory.
#[derive(Debug, Clone)]
pub struct SubmoduleReport {
    pub dir: String,
    pub verdict: SubmoduleVerdict,
}

/// Everything one evaluation cycle knows about an MR.
#[derive(Debug)]
pub struct CycleState {
    pub mr: MrSnapshot,
    /// Supported-project issues that resolved, keyed by issue key.
    pub issues: BTreeMap<IssueKey, IssueSnapshot>,
    /// Supported-project issue keys the tracker does not know.
    pub missing_issues: BTreeSet<IssueKey>,
    /// Referenced keys whose project is not in the supported set.
    pub unsupported_issues: BTreeSet<IssueKey>,
    pub ledger: DiscussionLedger,
    pub notes: Vec<Note>,
    /// Comments on supported issues; fetched for merged MRs only (the
    /// planner needs them to keep tracker comments idempotent).
    pub issue_comments: BTreeMap<IssueKey, Vec<TrackerComment>>,
    pub compliance: ComplianceReport,
    pub submodules: Vec<SubmoduleReport>,
    pub follow_up_mode: FollowUpMode,
    /// The configured autorun pipeline stage, copied here so rules and the
    /// planner can stay pure functions of the cycle state.
    pub autorun_stage: Option<String>,
}

impl CycleState {
    /// Supported-project issue keys referenced by the MR (resolved or not).
    pub fn supported_issue_keys(&self) -> BTreeSet<IssueKey> {
        self.issues
            .keys()
            .cloned()
            .chain(self.missing_issues.iter().cloned())
            .collect()
    }
}

/// Why a cycle could not produce a state.
#[derive(Debug, Error)]
pub enum ProjectError {
    /// The MR no longer exists; nothing to do.
    #[error("MR not found")]
    Gone,

    /// A transient failure; the cycle should reschedule.
    #[error("temporary failure talking to {service}: {detail}")]
    Deferred { service: String, detail: String },

    /// A permanent API rejection; surfaced as a block finding addressed to
    /// the escalation channel.
    #[error("permanent API failure: {0}")]
    Escalate(String),
}

impl ProjectError {
    fn from_api(service: &str, error: ApiError) -> Self {
        if error.is_not_found() {
            ProjectError::Gone
        } else if error.is_transient() {
            ProjectError::Deferred {
                service: service.to_string(),
                detail: error.to_string(),
            }
        } else {
            ProjectError::Escalate(error.to_string())
        }
    }

    fn from_git(error: GitError) -> Self {
        ProjectError::Deferred {
            service: "git".to_string(),
            detail: error.to_string(),
        }
    }

    fn from_checker(error: CheckerError) -> Self {
        ProjectError::Deferred {
            service: "checker".to_string(),
            detail: error.to_string(),
        }
    }

    /// The block finding for an escalated failure.
    pub fn into_finding(self, escalation_mention: Option<&str>) -> Option<Finding> {
        match self {
            ProjectError::Escalate(detail) => {
                let mention = escalation_mention
                    .map(|m| format!("{m} "))
                    .unwrap_or_default();
                Some(Finding::new(
                    Severity::Block,
                    Category::Workflow,
                    "projector-failure",
                    format!("{mention}the bot hit a permanent API failure and needs help: {detail}"),
                ))
            }
            _ => None,
        }
    }
}

/// Builds the cycle state for one MR.
#[instrument(skip(ctx), fields(mr = %mr_id))]
pub async fn project<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    mr_id: MrId,
) -> Result<CycleState, ProjectError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let attrs = ctx
        .forge
        .get_mr(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;

    let commits = ctx
        .forge
        .list_commits(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let changes = ctx
        .forge
        .list_changes(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let approved_by = ctx
        .forge
        .list_approvals(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let pipeline = ctx
        .forge
        .get_pipeline(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let notes = ctx
        .forge
        .list_notes(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let discussions = ctx
        .forge
        .list_discussions(mr_id)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;
    let target_head = ctx
        .forge
        .branch_head(&attrs.target_branch)
        .await
        .map_err(|e| ProjectError::from_api("forge", e))?;

    let mr = MrSnapshot {
        id: attrs.id,
        title: attrs.title,
        description: attrs.description,
        web_url: attrs.web_url,
        author: attrs.author,
        source_branch: attrs.source_branch,
        target_branch: attrs.target_branch,
        target_head,
        head_sha: attrs.head_sha,
        squash: attrs.squash,
        draft: attrs.draft,
        merged: attrs.merged,
        merged_commit_sha: attrs.merged_commit_sha,
        mergeability: attrs.mergeability,
        approved_by,
        assignees: attrs.assignees,
        pipeline,
        commits,
        changes,
        has_follow_up_award: attrs.has_follow_up_award,
    };

    // Resolve referenced issues: supported projects are fetched once per
    // key, others are recorded as informational.
    let mut issues = BTreeMap::new();
    let mut missing_issues = BTreeSet::new();
    let mut unsupported_issues = BTreeSet::new();
    for key in mr.issue_keys() {
        if !ctx.config.is_supported_project(key.project()) {
            unsupported_issues.insert(key);
            continue;
        }
        match ctx.tracker.get_issue(&key).await {
            Ok(issue) => {
                issues.insert(key, issue);
            }
            Err(e) if e.is_not_found() => {
                missing_issues.insert(key);
            }
            Err(e) => return Err(ProjectError::from_api("tracker", e)),
        }
    }

    // Tracker comments are only needed for post-merge idempotence checks.
    let mut issue_comments = BTreeMap::new();
    if mr.merged {
        for key in issues.keys() {
            let comments = ctx
                .tracker
                .list_comments(key)
                .await
                .map_err(|e| ProjectError::from_api("tracker", e))?;
            issue_comments.insert(key.clone(), comments);
        }
    }

    let ledger = DiscussionLedger::from_discussions(ctx.bot_handle(), &discussions);
    let follow_up_mode = derive_follow_up_mode(&notes, ctx.bot_handle());
    let (compliance, submodules) = run_content_checks(ctx, &mr).await?;

    debug!(
        issues = issues.len(),
        unsupported = unsupported_issues.len(),
        open_discussions = ledger.open_discussions().count(),
        "Projected MR state"
    );

    Ok(CycleState {
        mr,
        issues,
        missing_issues,
        unsupported_issues,
        ledger,
        notes,
        issue_comments,
        compliance,
        submodules,
        follow_up_mode,
        autorun_stage: ctx.config.pipeline.autorun_stage.clone(),
    })
}

/// Draft mode is requested by a `draft-follow-up` command note from any
/// non-bot user; the signal survives actor restarts because it is derived
/// from forge state.
fn derive_follow_up_mode(notes: &[Note], bot_handle: &str) -> FollowUpMode {
    let requested = notes.iter().any(|note| {
        note.author != bot_handle
            && parse_command(&note.body, bot_handle) == Some(Command::DraftFollowUp)
    });
    if requested {
        FollowUpMode::Draft
    } else {
        FollowUpMode::Normal
    }
}

/// Runs the delegated content checkers against the MR head.
///
/// Both checkers need the working tree at the MR's head commit, so they share
/// one checkout lease; the lease holds the git lock for the duration, which
/// keeps a concurrent rebase from swapping the tree under the checkers.
async fn run_content_checks<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    mr: &MrSnapshot,
) -> Result<(ComplianceReport, Vec<SubmoduleReport>), ProjectError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let open_source_files: Vec<String> = mr
        .changes
        .iter()
        .filter(|c| !c.deleted_file && is_open_sourced(&c.path))
        .map(|c| c.path.clone())
        .collect();
    let new_open_source_files: Vec<String> = mr
        .changes
        .iter()
        .filter(|c| c.new_file && is_open_sourced(&c.path))
        .map(|c| c.path.clone())
        .collect();

    let submodule_dirs: Vec<&String> = ctx
        .config
        .nx_submodule_check_rule
        .nx_submodule_dirs
        .iter()
        .filter(|dir| {
            mr.changes
                .iter()
                .any(|c| c.path.starts_with(&format!("{dir}/")))
        })
        .collect();

    if open_source_files.is_empty() && submodule_dirs.is_empty() {
        return Ok((ComplianceReport::default(), Vec::new()));
    }

    let lease = ctx
        .git
        .checkout_lease(&mr.head_sha)
        .await
        .map_err(ProjectError::from_git)?;

    let mut compliance = ComplianceReport {
        checked: false,
        violations: Vec::new(),
        open_source_files: open_source_files.clone(),
        new_open_source_files,
    };
    if !open_source_files.is_empty() {
        compliance.violations = ctx
            .compliance
            .check_files(lease.dir(), &open_source_files)
            .await
            .map_err(ProjectError::from_checker)?;
        compliance.checked = true;
    }

    let mut submodules = Vec::new();
    for dir in submodule_dirs {
        let verdict = ctx
            .submodules
            .check_submodule(lease.dir(), dir)
            .await
            .map_err(ProjectError::from_checker)?;
        submodules.push(SubmoduleReport {
            dir: dir.clone(),
            verdict,
        });
    }

    Ok((compliance, submodules))
}

fn is_open_sourced(path: &str) -> bool {
    path == "open" || path.starts_with("open/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use crate::types::NoteId;

    fn note(author: &str, body: &str) -> Note {
        Note {
            id: NoteId(1),
            author: author.into(),
            body: body.into(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn draft_mode_from_user_command_note() {
        let notes = vec![
            note("alice", "looks fine"),
            note("bob", "@workflow-robocat draft-follow-up"),
        ];
        assert_eq!(
            derive_follow_up_mode(&notes, "workflow-robocat"),
            FollowUpMode::Draft
        );
    }

    #[test]
    fn bot_notes_do_not_set_draft_mode() {
        let notes = vec![note("workflow-robocat", "@workflow-robocat draft-follow-up")];
        assert_eq!(
            derive_follow_up_mode(&notes, "workflow-robocat"),
            FollowUpMode::Normal
        );
    }

    #[test]
    fn no_command_means_normal_mode() {
        let notes = vec![note("alice", "please merge")];
        assert_eq!(
            derive_follow_up_mode(&notes, "workflow-robocat"),
            FollowUpMode::Normal
        );
    }

    #[test]
    fn escalate_error_becomes_block_finding() {
        let err = ProjectError::Escalate("HTTP 403: forbidden".into());
        let finding = err.into_finding(Some("@infra-team")).unwrap();
        assert_eq!(finding.severity, Severity::Block);
        assert!(finding.message.contains("@infra-team"));
        assert!(finding.message.contains("403"));
    }

    #[test]
    fn deferred_error_produces_no_finding() {
        let err = ProjectError::Deferred {
            service: "forge".into(),
            detail: "timeout".into(),
        };
        assert!(err.into_finding(None).is_none());
    }
}
