//! Merge request snapshot types.
//!
//! A snapshot is an immutable value describing everything the engine needs to
//! know about one MR at the start of an evaluation cycle. It is rebuilt from
//! live forge/tracker/git state on every cycle; nothing here is cached across
//! cycles.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::ids::{IssueKey, MrId, PipelineId, Sha};

/// Marker phrase embedded in follow-up MR descriptions.
///
/// The rule pipeline classifies any MR whose description contains this phrase
/// (followed by the picked SHA) as a follow-up, which exempts it from
/// first-line workflow checks and from generating further follow-ups.
pub const FOLLOW_UP_MARKER: &str = "(cherry-picked from commit ";

/// Whether the forge considers the MR mergeable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mergeability {
    /// No conflicts against the current target head.
    Mergeable,
    /// Merge conflicts exist; a human has to resolve them.
    Conflicts,
    /// The forge has not computed mergeability yet.
    Unknown,
}

impl Mergeability {
    pub fn is_mergeable(&self) -> bool {
        matches!(self, Mergeability::Mergeable)
    }
}

/// Status of the MR's current head pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStatus {
    Running,
    Success,
    Failed,
    Canceled,
    /// The pipeline is waiting on manual jobs.
    ManualPending,
}

/// A job in the head pipeline that the bot may start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineJob {
    pub name: String,
    pub stage: String,
    /// True for jobs in `manual` state that have not been started.
    pub manual: bool,
}

/// The MR's current head pipeline, if any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineState {
    pub id: PipelineId,
    pub status: PipelineStatus,
    /// The commit the pipeline ran against.
    pub sha: Sha,
    pub jobs: Vec<PipelineJob>,
}

impl PipelineState {
    /// Manual jobs the bot is allowed to start: unstarted manual jobs outside
    /// the autorun stage whose name does not end in `:no-bot-start`.
    ///
    /// The suffix match is case-sensitive.
    pub fn startable_manual_jobs<'a>(
        &'a self,
        autorun_stage: Option<&'a str>,
    ) -> impl Iterator<Item = &'a PipelineJob> {
        self.jobs.iter().filter(move |job| {
            job.manual
                && !job.name.ends_with(":no-bot-start")
                && autorun_stage.is_none_or(|stage| job.stage != stage)
        })
    }
}

/// A commit on the MR's source branch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub sha: Sha,
    pub message: String,
    pub parent_shas: Vec<Sha>,
}

/// One changed file in the MR diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileChange {
    /// Path after the change (equal to the old path unless renamed).
    pub path: String,
    /// Unified diff hunk for this file.
    pub diff: String,
    pub new_file: bool,
    pub deleted_file: bool,
}

/// The author of an MR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    pub username: String,
    pub name: String,
}

/// Immutable snapshot of a merge request, rebuilt per evaluation cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrSnapshot {
    pub id: MrId,
    pub title: String,
    pub description: String,
    pub web_url: String,
    pub author: UserRef,
    pub source_branch: String,
    pub target_branch: String,
    /// Current head of the target branch, used to decide rebase currency.
    pub target_head: Option<Sha>,
    /// Head of the source branch.
    pub head_sha: Sha,
    pub squash: bool,
    pub draft: bool,
    pub merged: bool,
    /// For merged MRs: the commit that landed on the target branch.
    pub merged_commit_sha: Option<Sha>,
    pub mergeability: Mergeability,
    /// Usernames that currently approve the MR.
    pub approved_by: BTreeSet<String>,
    /// Usernames currently assigned.
    pub assignees: BTreeSet<String>,
    pub pipeline: Option<PipelineState>,
    pub commits: Vec<Commit>,
    pub changes: Vec<FileChange>,
    /// True when the bot stamped this MR with the follow-up marker award at
    /// creation time.
    pub has_follow_up_award: bool,
}

impl MrSnapshot {
    /// Issue keys referenced anywhere in the title, description, or commit
    /// messages, deduplicated and ordered.
    pub fn issue_keys(&self) -> BTreeSet<IssueKey> {
        let mut keys = extract_issue_keys(&self.title);
        keys.extend(extract_issue_keys(&self.description));
        for commit in &self.commits {
            keys.extend(extract_issue_keys(&commit.message));
        }
        keys
    }

    /// Issue keys referenced in the title or description only.
    pub fn headline_issue_keys(&self) -> BTreeSet<IssueKey> {
        let mut keys = extract_issue_keys(&self.title);
        keys.extend(extract_issue_keys(&self.description));
        keys
    }

    /// True iff this MR is a cherry-pick follow-up of an already-merged MR.
    pub fn is_follow_up(&self) -> bool {
        self.has_follow_up_award || self.description.contains(FOLLOW_UP_MARKER)
    }

    /// The commit message used when squash-merging: `title\n\ndescription`.
    pub fn squash_commit_message(&self) -> String {
        format!("{}\n\n{}", self.title, self.description)
            .trim()
            .to_string()
    }
}

/// Extracts all issue keys (`PROJ-123` tokens at word boundaries) from text.
pub fn extract_issue_keys(text: &str) -> BTreeSet<IssueKey> {
    let mut keys = BTreeSet::new();
    for token in text.split(|c: char| !(c.is_ascii_alphanumeric() || c == '-')) {
        // A token like "PROJ-123:" has already been stripped of the colon by
        // the split; tokens may still carry leading/trailing dashes.
        let token = token.trim_matches('-');
        if let Ok(key) = IssueKey::parse(token) {
            keys.insert(key);
        }
    }
    keys
}
