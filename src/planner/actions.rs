//! Planned actions: external side effects described as data.
//!
//! The planner emits actions; the executor interprets them against the
//! forge, tracker, and git workspace. Every action carries an idempotence
//! key derived from the MR, the action kind, and a content fingerprint, so
//! a re-delivered event can never double-apply a side effect that the forge
//! already reflects.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{DiscussionId, Fingerprint, IssueKey, MrId};

/// The fixed execution-order classes, least to greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    CreateDiscussion,
    ResolveDiscussion,
    AddAssignee,
    Rebase,
    TriggerPipeline,
    Merge,
    TransitionIssue,
    PostIssueComment,
    PostMrNote,
    GenerateFollowUps,
}

impl ActionKind {
    /// Rank in the executor's fixed order: discussions, assignees, rebase,
    /// pipeline, merge, issue transitions, follow-ups.
    pub fn order(&self) -> u8 {
        match self {
            ActionKind::CreateDiscussion | ActionKind::ResolveDiscussion => 0,
            ActionKind::AddAssignee => 1,
            ActionKind::Rebase => 2,
            ActionKind::TriggerPipeline => 3,
            ActionKind::Merge => 4,
            ActionKind::TransitionIssue
            | ActionKind::PostIssueComment
            | ActionKind::PostMrNote => 5,
            ActionKind::GenerateFollowUps => 6,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::CreateDiscussion => "create-discussion",
            ActionKind::ResolveDiscussion => "resolve-discussion",
            ActionKind::AddAssignee => "add-assignee",
            ActionKind::Rebase => "rebase",
            ActionKind::TriggerPipeline => "trigger-pipeline",
            ActionKind::Merge => "merge",
            ActionKind::TransitionIssue => "transition-issue",
            ActionKind::PostIssueComment => "post-issue-comment",
            ActionKind::PostMrNote => "post-mr-note",
            ActionKind::GenerateFollowUps => "generate-follow-ups",
        };
        f.write_str(name)
    }
}

/// One planned external side effect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Action {
    /// Open a discussion carrying a finding (no-op if the fingerprint is
    /// already open; the planner checks the ledger before planning this).
    CreateDiscussion {
        fingerprint: Fingerprint,
        body: String,
    },

    /// Resolve a bot-owned discussion whose finding has healed.
    ResolveDiscussion {
        discussion: DiscussionId,
        fingerprint: Fingerprint,
    },

    /// Add a required approver as an assignee. Assignees are never removed.
    AddAssignee { username: String },

    /// Rebase the source branch onto the current target head and force-push
    /// when the rebase rewrote commits.
    Rebase,

    /// Start the startable manual jobs of the current head pipeline.
    TriggerPipeline {
        /// Skip the trigger when the preceding rebase did not change what
        /// the MR introduces.
        only_if_diff_changed: bool,
    },

    /// Merge the MR. At most one merge per cycle; a "not mergeable" refusal
    /// abandons the remainder of the plan without error.
    Merge { message: String, squash: bool },

    /// Move an issue from `In Review` to `Waiting for QA` (falling back to
    /// `Closed` where the workflow lacks the former).
    TransitionIssue { key: IssueKey },

    /// Comment on a tracker issue. Bodies carry an idempotence marker; the
    /// planner only plans the comment when no existing comment has it.
    PostIssueComment { key: IssueKey, body: String },

    /// Post a note on the MR.
    PostMrNote { body: String },

    /// Run the follow-up generator for this merged MR.
    GenerateFollowUps { draft: bool },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::CreateDiscussion { .. } => ActionKind::CreateDiscussion,
            Action::ResolveDiscussion { .. } => ActionKind::ResolveDiscussion,
            Action::AddAssignee { .. } => ActionKind::AddAssignee,
            Action::Rebase => ActionKind::Rebase,
            Action::TriggerPipeline { .. } => ActionKind::TriggerPipeline,
            Action::Merge { .. } => ActionKind::Merge,
            Action::TransitionIssue { .. } => ActionKind::TransitionIssue,
            Action::PostIssueComment { .. } => ActionKind::PostIssueComment,
            Action::PostMrNote { .. } => ActionKind::PostMrNote,
            Action::GenerateFollowUps { .. } => ActionKind::GenerateFollowUps,
        }
    }

    /// The idempotence key: `(mr, kind, content fingerprint)`.
    pub fn key(&self, mr: MrId) -> String {
        let content = match self {
            Action::CreateDiscussion { fingerprint, .. }
            | Action::ResolveDiscussion { fingerprint, .. } => fingerprint.as_str().to_string(),
            Action::AddAssignee { username } => username.clone(),
            Action::Rebase => String::new(),
            Action::TriggerPipeline { .. } => String::new(),
            Action::Merge { message, .. } => short_hash(message),
            Action::TransitionIssue { key } => key.to_string(),
            Action::PostIssueComment { key, body } => format!("{key}:{}", short_hash(body)),
            Action::PostMrNote { body } => short_hash(body),
            Action::GenerateFollowUps { draft } => format!("draft={draft}"),
        };
        format!("{mr}:{}:{content}", self.kind())
    }
}

fn short_hash(text: &str) -> String {
    use sha2::{Digest, Sha256};
    let digest = Sha256::digest(text.as_bytes());
    hex::encode(&digest[..8])
}

/// An ordered action plan for one cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub actions: Vec<Action>,
}

impl Plan {
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    pub fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Sorts into the fixed execution order, keeping in-class insertion
    /// order stable.
    pub fn into_ordered(mut self) -> Vec<Action> {
        self.actions.sort_by_key(|a| a.kind().order());
        self.actions
    }

    pub fn contains_kind(&self, kind: ActionKind) -> bool {
        self.actions.iter().any(|a| a.kind() == kind)
    }
}
