//! Command types for `@<bot-handle>` comment commands.

use serde::{Deserialize, Serialize};

/// A parsed bot command from an MR comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Command {
    /// `process`: force immediate re-evaluation of the MR.
    Process,

    /// `run-pipeline`: force a pipeline trigger on the next plan, draft or
    /// not.
    RunPipeline,

    /// `follow-up` (post-merge only): regenerate follow-up MRs.
    FollowUp,

    /// `draft-follow-up`: pre-merge, switch follow-up mode to draft;
    /// post-merge, regenerate follow-ups as drafts.
    DraftFollowUp,
}

impl Command {
    /// True when the command forces a full re-evaluation cycle.
    pub fn triggers_reevaluation(&self) -> bool {
        matches!(self, Command::Process | Command::RunPipeline)
    }
}
