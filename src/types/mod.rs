//! Core domain types shared across the engine.

mod finding;
mod ids;
mod issue;
mod mr;

pub use finding::{Category, Finding, FindingSet, Fingerprint, Severity};
pub use ids::{
    DiscussionId, InvalidIssueKey, InvalidSha, IssueKey, MrId, NoteId, PipelineId, Sha,
};
pub use issue::{FixVersion, IssueSnapshot, IssueStatus};
pub use mr::{
    extract_issue_keys, Commit, FileChange, Mergeability, MrSnapshot, PipelineJob,
    PipelineState, PipelineStatus, UserRef, FOLLOW_UP_MARKER,
};
