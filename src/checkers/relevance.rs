//! Built-in relevance-checker registry.
//!
//! An approval ruleset names one of these checkers in its
//! `relevance_checker` key; the checker decides whether a changed file is
//! relevant to the ruleset at all. Configuration validation guarantees that
//! only registered names reach this module.

use regex::Regex;

use crate::types::FileChange;

/// A predicate over a changed file, parameterized by the rule's patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelevanceChecker {
    /// The file lives in the open-source part of the tree.
    IsFileOpenSourced,
    /// The diff adds a line carrying an `%apidoc` marker.
    DoesFileDiffContainApidocChanges,
    /// The file path matches one of the rule's own patterns.
    MatchNamePattern,
}

/// Resolves a configured checker name. Returns `None` for unknown names;
/// config validation rejects those at startup, so a `None` here means the
/// registry and `config::RELEVANCE_CHECKERS` went out of sync.
pub fn lookup_relevance_checker(name: &str) -> Option<RelevanceChecker> {
    match name {
        "is_file_open_sourced" => Some(RelevanceChecker::IsFileOpenSourced),
        "does_file_diff_contain_apidoc_changes" => {
            Some(RelevanceChecker::DoesFileDiffContainApidocChanges)
        }
        "match_name_pattern" => Some(RelevanceChecker::MatchNamePattern),
        _ => None,
    }
}

impl RelevanceChecker {
    /// Applies the predicate to one changed file.
    ///
    /// `patterns` are the owning rule's compiled path patterns; only
    /// `MatchNamePattern` consults them.
    pub fn is_relevant(&self, change: &FileChange, patterns: &[Regex]) -> bool {
        match self {
            RelevanceChecker::IsFileOpenSourced => is_file_open_sourced(&change.path),
            RelevanceChecker::DoesFileDiffContainApidocChanges => {
                diff_adds_apidoc_line(&change.diff)
            }
            RelevanceChecker::MatchNamePattern => patterns
                .iter()
                .any(|p| p.find(&change.path).is_some_and(|m| m.start() == 0)),
        }
    }
}

/// The open-source part of the tree lives under `open/`.
fn is_file_open_sourced(path: &str) -> bool {
    path == "open" || path.starts_with("open/")
}

fn diff_adds_apidoc_line(diff: &str) -> bool {
    diff.lines()
        .any(|line| line.starts_with('+') && line.contains("%apidoc"))
}
