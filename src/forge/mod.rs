//! Forge API contract.
//!
//! The engine talks to the forge exclusively through the [`ForgeApi`] trait;
//! the `reqwest`-backed client lives in [`client`], and tests substitute an
//! in-memory fake. All operations are scoped to the single configured
//! project.

pub mod client;
mod error;
mod retry;

pub use client::ForgeClient;
pub use error::{ApiError, ApiErrorKind};
pub use retry::{retry_with_backoff, RetryConfig};

use std::collections::BTreeSet;
use std::future::Future;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{
    Commit, DiscussionId, FileChange, Mergeability, MrId, NoteId, PipelineState, Sha, UserRef,
};

/// Raw MR attributes as returned by the forge, before snapshot assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MrAttributes {
    pub id: MrId,
    pub title: String,
    pub description: String,
    pub web_url: String,
    pub author: UserRef,
    pub source_branch: String,
    pub target_branch: String,
    pub head_sha: Sha,
    pub squash: bool,
    pub draft: bool,
    pub merged: bool,
    pub mergeability: Mergeability,
    pub assignees: BTreeSet<String>,
    /// For merged MRs: the commit that landed on the target branch (the
    /// squash commit when the MR was squashed).
    pub merged_commit_sha: Option<Sha>,
    /// True when the bot stamped the follow-up marker award on this MR.
    pub has_follow_up_award: bool,
}

/// A plain comment on an MR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: NoteId,
    pub author: String,
    pub body: String,
    pub created_at: DateTime<Utc>,
}

/// A resolvable comment thread on an MR.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discussion {
    pub id: DiscussionId,
    /// Author of the opening note; the bot owns discussions it opened.
    pub author: String,
    /// Body of the opening note.
    pub body: String,
    pub resolved: bool,
}

/// Outcome of a merge attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    Merged { sha: Sha },
    /// The forge refused because the MR is not currently mergeable. This is
    /// not an error: the remainder of the plan is abandoned and the next
    /// cycle reconciles.
    NotMergeable,
}

/// Parameters for creating a follow-up MR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMr {
    pub source_branch: String,
    pub target_branch: String,
    pub title: String,
    pub description: String,
    pub assignees: BTreeSet<String>,
    pub draft: bool,
}

/// Operations the engine needs from the forge.
///
/// Implementations must be internally synchronized; the engine shares one
/// instance across all MR actors.
pub trait ForgeApi: Send + Sync {
    fn get_mr(&self, mr: MrId) -> impl Future<Output = Result<MrAttributes, ApiError>> + Send;

    /// IDs of all open MRs, for periodic reconciliation ticks.
    fn list_open_mrs(&self) -> impl Future<Output = Result<Vec<MrId>, ApiError>> + Send;

    fn list_commits(&self, mr: MrId)
        -> impl Future<Output = Result<Vec<Commit>, ApiError>> + Send;

    fn list_changes(
        &self,
        mr: MrId,
    ) -> impl Future<Output = Result<Vec<FileChange>, ApiError>> + Send;

    fn list_notes(&self, mr: MrId) -> impl Future<Output = Result<Vec<Note>, ApiError>> + Send;

    fn post_note(
        &self,
        mr: MrId,
        body: &str,
    ) -> impl Future<Output = Result<NoteId, ApiError>> + Send;

    fn list_discussions(
        &self,
        mr: MrId,
    ) -> impl Future<Output = Result<Vec<Discussion>, ApiError>> + Send;

    fn create_discussion(
        &self,
        mr: MrId,
        body: &str,
    ) -> impl Future<Output = Result<DiscussionId, ApiError>> + Send;

    fn resolve_discussion(
        &self,
        mr: MrId,
        discussion: &DiscussionId,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Usernames that currently approve the MR.
    fn list_approvals(
        &self,
        mr: MrId,
    ) -> impl Future<Output = Result<BTreeSet<String>, ApiError>> + Send;

    fn add_assignee(
        &self,
        mr: MrId,
        username: &str,
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// The MR's current head pipeline, if one exists.
    fn get_pipeline(
        &self,
        mr: MrId,
    ) -> impl Future<Output = Result<Option<PipelineState>, ApiError>> + Send;

    /// Starts the named manual jobs of the given pipeline.
    fn play_jobs(
        &self,
        mr: MrId,
        job_names: &[String],
    ) -> impl Future<Output = Result<(), ApiError>> + Send;

    /// Head SHA of a branch, or `None` when the branch does not exist.
    fn branch_head(
        &self,
        branch: &str,
    ) -> impl Future<Output = Result<Option<Sha>, ApiError>> + Send;

    /// Merges the MR with the given commit message.
    fn merge_mr(
        &self,
        mr: MrId,
        message: &str,
        squash: bool,
    ) -> impl Future<Output = Result<MergeOutcome, ApiError>> + Send;

    fn create_mr(&self, new_mr: NewMr) -> impl Future<Output = Result<MrId, ApiError>> + Send;

    /// Stamps the follow-up marker award on a newly created follow-up MR.
    fn add_follow_up_award(&self, mr: MrId)
        -> impl Future<Output = Result<(), ApiError>> + Send;
}
