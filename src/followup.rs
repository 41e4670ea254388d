//! Post-merge follow-up generation.
//!
//! A merged MR fans out to every release branch named by its issues' fix
//! versions (except the branch it just landed in): each branch gets a fresh
//! topic branch with the merged change cherry-picked onto it and a new MR
//! assigned to the bot and the original author. Cherry-pick conflicts are
//! non-fatal: the MR is still created from the pre-conflict head, with a
//! note listing the commits a human has to pick by hand.

use std::collections::BTreeSet;

use tracing::{info, instrument, warn};

use crate::checkers::{ComplianceChecker, SubmoduleChecker};
use crate::context::Context;
use crate::forge::{retry_with_backoff, ApiError, ForgeApi, NewMr, RetryConfig};
use crate::projector::CycleState;
use crate::tracker::TrackerApi;
use crate::types::{MrId, Sha, FOLLOW_UP_MARKER};

/// Generates follow-up MRs for a merged MR; returns the created MR ids.
///
/// `fresh_merge_sha` carries the merge commit when the merge happened in
/// this very cycle (the snapshot predates it and does not know the SHA yet).
#[instrument(skip_all, fields(mr = %cycle.mr.id))]
pub async fn generate<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
    draft: bool,
    fresh_merge_sha: Option<&Sha>,
) -> Result<Vec<MrId>, ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let mr = &cycle.mr;
    let commits = commits_to_pick(cycle, fresh_merge_sha)?;
    let branches = target_branches(cycle);
    if branches.is_empty() {
        info!("No follow-up branches named by the fix versions");
        return Ok(Vec::new());
    }

    let mut created = Vec::new();
    let mut created_branches = Vec::new();
    for branch in &branches {
        match create_follow_up(ctx, cycle, branch, &commits, draft).await {
            Ok(new_mr) => {
                created.push(new_mr);
                created_branches.push(branch.clone());
            }
            Err(e) if e.is_transient() => return Err(e),
            Err(e) => {
                // A branch that refuses its follow-up (already created, MR
                // exists, branch protection) must not stop the others.
                warn!(branch = %branch, error = %e, "Skipping follow-up for branch");
            }
        }
    }

    if !created_branches.is_empty() {
        notify_issues(ctx, cycle, &created_branches).await?;
    }

    info!(created = created.len(), "Follow-up generation finished");
    Ok(created)
}

/// The commits to cherry-pick: the squash commit for squashed MRs, the MR's
/// own commits (oldest first) otherwise.
fn commits_to_pick(
    cycle: &CycleState,
    fresh_merge_sha: Option<&Sha>,
) -> Result<Vec<Sha>, ApiError> {
    let mr = &cycle.mr;
    if mr.squash {
        let sha = fresh_merge_sha
            .or(mr.merged_commit_sha.as_ref())
            .cloned()
            .ok_or_else(|| ApiError::permanent("merged squash MR has no merged commit SHA"))?;
        Ok(vec![sha])
    } else {
        Ok(mr.commits.iter().map(|c| c.sha.clone()).collect())
    }
}

/// Union of the issues' fix-version branches, minus the branch the MR was
/// just merged into.
fn target_branches(cycle: &CycleState) -> BTreeSet<String> {
    cycle
        .issues
        .values()
        .flat_map(|issue| issue.fix_version_branches())
        .filter(|branch| *branch != cycle.mr.target_branch)
        .map(String::from)
        .collect()
}

async fn create_follow_up<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
    branch: &str,
    commits: &[Sha],
    draft: bool,
) -> Result<MrId, ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let mr = &cycle.mr;
    let topic = format!("{}-followup-{}", mr.source_branch, branch);

    let picks = ctx
        .git
        .cherry_pick_branch(&topic, branch, commits)
        .await
        .map_err(|e| ApiError::transient(format!("git cherry-pick: {e}")))?;
    ctx.git
        .push(&topic, true)
        .await
        .map_err(|e| ApiError::transient(format!("git push: {e}")))?;

    let markers: Vec<String> = commits
        .iter()
        .map(|sha| format!("{FOLLOW_UP_MARKER}{sha})"))
        .collect();
    let description = format!("{}\n\n{}", mr.description, markers.join("\n\n"))
        .trim()
        .to_string();

    let assignees: BTreeSet<String> = [
        ctx.bot_handle().to_string(),
        mr.author.username.clone(),
    ]
    .into_iter()
    .collect();

    let new_mr = retry_with_backoff(RetryConfig::DEFAULT, || {
        ctx.forge.create_mr(NewMr {
            source_branch: topic.clone(),
            target_branch: branch.to_string(),
            title: mr.title.clone(),
            description: description.clone(),
            assignees: assignees.clone(),
            draft,
        })
    })
    .await?;

    retry_with_backoff(RetryConfig::DEFAULT, || {
        ctx.forge.add_follow_up_award(new_mr)
    })
    .await?;

    if !picks.is_clean() {
        let unpicked: Vec<String> = picks.unpicked.iter().map(|s| s.to_string()).collect();
        let body = format!(
            "Cherry-picking onto `{branch}` hit conflicts. The following commits were NOT \
             applied and must be picked manually:\n\n{}",
            unpicked
                .iter()
                .map(|s| format!("- `{s}`"))
                .collect::<Vec<_>>()
                .join("\n")
        );
        retry_with_backoff(RetryConfig::DEFAULT, || ctx.forge.post_note(new_mr, &body))
            .await?;
        info!(mr = %new_mr, branch = %branch, unpicked = unpicked.len(), "Follow-up created with conflicts");
    } else {
        info!(mr = %new_mr, branch = %branch, "Follow-up created");
    }

    Ok(new_mr)
}

/// Tells each referenced issue which branches received follow-ups.
async fn notify_issues<F, T, C, S>(
    ctx: &Context<F, T, C, S>,
    cycle: &CycleState,
    branches: &[String],
) -> Result<(), ApiError>
where
    F: ForgeApi,
    T: TrackerApi,
    C: ComplianceChecker,
    S: SubmoduleChecker,
{
    let list = branches
        .iter()
        .map(|b| format!("`{b}`"))
        .collect::<Vec<_>>()
        .join(", ");
    for key in cycle.issues.keys() {
        let body = format!(
            "Follow-up MRs were created for branch(es) {list} from \
             [{title}]({url}).",
            title = cycle.mr.title,
            url = cycle.mr.web_url,
        );
        retry_with_backoff(RetryConfig::DEFAULT, || ctx.tracker.post_comment(key, &body))
            .await?;
    }
    Ok(())
}
