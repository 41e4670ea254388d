//! Parser for bot commands in comment text.
//!
//! A comment is a command iff its *first line* is `@<bot-handle> <verb>`
//! (optionally followed by arguments, which no current verb takes). Comments
//! mentioning the bot anywhere else are ordinary notes.

use super::types::Command;

/// Parses a bot command from comment text.
///
/// # Parsing rules
///
/// - Only the first line of the comment is considered.
/// - The `@<bot_handle>` mention is case-insensitive, like forge mentions.
/// - Verbs are case-insensitive; each dashed verb has an underscore alias
///   (`run-pipeline` / `run_pipeline`).
/// - Unknown verbs are ignored silently (returns `None`).
///
/// # Examples
///
/// ```
/// use robocat::commands::{parse_command, Command};
///
/// assert_eq!(
///     parse_command("@workflow-robocat process", "workflow-robocat"),
///     Some(Command::Process)
/// );
/// assert_eq!(
///     parse_command("@Workflow-Robocat run-pipeline", "workflow-robocat"),
///     Some(Command::RunPipeline)
/// );
/// // Not on the first line:
/// assert_eq!(
///     parse_command("please\n@workflow-robocat process", "workflow-robocat"),
///     None
/// );
/// ```
pub fn parse_command(text: &str, bot_handle: &str) -> Option<Command> {
    let first_line = text.lines().next()?.trim_start();

    let trigger = format!("@{}", bot_handle);
    let candidate = first_line.get(..trigger.len())?;
    if !candidate.eq_ignore_ascii_case(&trigger) {
        return None;
    }

    let rest = &first_line[trigger.len()..];
    // The mention must be followed by whitespace, not more word characters
    // (`@workflow-robocat-2` is a different handle).
    let rest = rest.strip_prefix(|c: char| c.is_ascii_whitespace())?;
    let verb = rest.trim().split_ascii_whitespace().next()?;

    match verb.to_ascii_lowercase().as_str() {
        "process" => Some(Command::Process),
        "run-pipeline" | "run_pipeline" => Some(Command::RunPipeline),
        "follow-up" | "follow_up" => Some(Command::FollowUp),
        "draft-follow-up" | "draft_follow_up" => Some(Command::DraftFollowUp),
        _ => None,
    }
}
