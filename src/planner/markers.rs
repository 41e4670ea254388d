//! Idempotence markers embedded in bot comments.
//!
//! MR notes carry the marker inside an HTML comment (hidden by the forge
//! renderer); tracker comments carry it as visible bracketed text since the
//! tracker renders plain wiki markup. The planner looks these markers up in
//! the comments fetched for the cycle before planning the action again.

use crate::types::{IssueKey, MrId};

/// Tracker comment marker: this MR was merged into this branch.
pub fn merged_marker(mr: MrId, branch: &str) -> String {
    format!("[robocat:mr-merged:{mr}:{branch}]")
}

/// MR note marker: follow-ups were generated for this MR.
pub fn follow_ups_done_marker() -> String {
    "<!-- robocat:follow-ups-created -->".to_string()
}

/// MR note marker: this MR is a follow-up, no further fan-out.
pub fn follow_up_not_needed_marker() -> String {
    "<!-- robocat:follow-up-not-needed -->".to_string()
}

/// MR note marker: the named issue was still in progress at merge time.
pub fn in_progress_marker(key: &IssueKey) -> String {
    format!("<!-- robocat:issue-in-progress:{key} -->")
}

/// Tracker comment marker: issue was in an unexpected status at merge time.
pub fn suspicious_status_marker(mr: MrId) -> String {
    format!("[robocat:suspicious-status:{mr}]")
}
