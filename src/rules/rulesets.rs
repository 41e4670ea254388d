//! Compiled approval rulesets.
//!
//! Configuration declares ordered `(patterns, approvers)` rules keyed by a
//! relevance checker; this module compiles them once at startup. Pattern
//! semantics are anchored regular expressions: a pattern matches a path only
//! from its beginning. The first rule with a matching pattern wins; when no
//! rule matches a relevant file, the union of all approvers is required.

use std::collections::BTreeSet;

use regex::Regex;

use crate::checkers::relevance::{lookup_relevance_checker, RelevanceChecker};
use crate::config::ApproveRuleset;
use crate::types::FileChange;

/// One compiled `(patterns, approvers)` rule.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub patterns: Vec<Regex>,
    pub approvers: BTreeSet<String>,
}

impl CompiledRule {
    fn matches(&self, path: &str) -> bool {
        self.patterns.iter().any(|p| matches_anchored(p, path))
    }
}

/// A named, ordered approval ruleset with its relevance checker.
#[derive(Debug, Clone)]
pub struct CompiledRuleset {
    pub name: String,
    pub relevance: RelevanceChecker,
    pub rules: Vec<CompiledRule>,
}

impl CompiledRuleset {
    /// Compiles a validated config ruleset. Config validation has already
    /// rejected unknown checkers and malformed patterns.
    pub fn compile(name: &str, ruleset: &ApproveRuleset) -> Self {
        let relevance = lookup_relevance_checker(&ruleset.relevance_checker)
            .expect("relevance checker validated at config load");
        let rules = ruleset
            .rules
            .iter()
            .map(|rule| CompiledRule {
                patterns: rule
                    .patterns
                    .iter()
                    .map(|p| Regex::new(p).expect("pattern validated at config load"))
                    .collect(),
                approvers: rule.approvers.iter().cloned().collect(),
            })
            .collect();
        CompiledRuleset {
            name: name.to_string(),
            relevance,
            rules,
        }
    }

    /// Changed files this ruleset cares about.
    pub fn relevant_files<'a>(
        &self,
        changes: &'a [FileChange],
        include_deleted: bool,
    ) -> Vec<&'a FileChange> {
        let all_patterns: Vec<Regex> = self
            .rules
            .iter()
            .flat_map(|r| r.patterns.iter().cloned())
            .collect();
        changes
            .iter()
            .filter(|c| include_deleted || !c.deleted_file)
            .filter(|c| self.relevance.is_relevant(c, &all_patterns))
            .collect()
    }

    /// True when the MR touches anything this ruleset covers.
    pub fn applies_to_changes(&self, changes: &[FileChange]) -> bool {
        !self.relevant_files(changes, false).is_empty()
    }

    /// Resolves the required approver set for the given relevant files.
    ///
    /// Rules are scanned in order; the first rule with a pattern matching any
    /// of the files decides. Files that no rule claims fall back to the union
    /// of all approvers.
    pub fn required_approvers(&self, files: &[&FileChange]) -> BTreeSet<String> {
        for rule in &self.rules {
            if files.iter().any(|f| rule.matches(&f.path)) {
                return rule.approvers.clone();
            }
        }
        self.all_approvers()
    }

    /// Union of every rule's approvers.
    pub fn all_approvers(&self) -> BTreeSet<String> {
        self.rules
            .iter()
            .flat_map(|r| r.approvers.iter().cloned())
            .collect()
    }
}

fn matches_anchored(pattern: &Regex, path: &str) -> bool {
    pattern.find(path).is_some_and(|m| m.start() == 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ApprovalRule, ApproveRuleset};

    fn change(path: &str, new_file: bool, deleted: bool) -> FileChange {
        FileChange {
            path: path.into(),
            diff: String::new(),
            new_file,
            deleted_file: deleted,
        }
    }

    fn ruleset() -> CompiledRuleset {
        CompiledRuleset::compile(
            "open_source",
            &ApproveRuleset {
                relevance_checker: "is_file_open_sourced".into(),
                rules: vec![
                    ApprovalRule {
                        patterns: vec!["open/client/".into()],
                        approvers: vec!["client_approver_1".into(), "client_approver_2".into()],
                    },
                    ApprovalRule {
                        patterns: vec!["open/".into()],
                        approvers: vec!["apidoc_approver_1".into(), "apidoc_approver_2".into()],
                    },
                ],
            },
        )
    }

    #[test]
    fn relevance_filters_changes() {
        let ruleset = ruleset();
        let changes = vec![
            change("open/server/foo.cpp", true, false),
            change("closed/bar.cpp", false, false),
            change("open/gone.cpp", false, true),
        ];
        let relevant = ruleset.relevant_files(&changes, false);
        assert_eq!(relevant.len(), 1);
        assert_eq!(relevant[0].path, "open/server/foo.cpp");

        let with_deleted = ruleset.relevant_files(&changes, true);
        assert_eq!(with_deleted.len(), 2);
    }

    #[test]
    fn first_matching_rule_wins() {
        let ruleset = ruleset();
        let client = change("open/client/bar.h", false, false);
        let approvers = ruleset.required_approvers(&[&client]);
        assert!(approvers.contains("client_approver_1"));
        assert!(!approvers.contains("apidoc_approver_1"));

        let server = change("open/server/foo.cpp", false, false);
        let approvers = ruleset.required_approvers(&[&server]);
        assert!(approvers.contains("apidoc_approver_1"));
    }

    #[test]
    fn unmatched_files_fall_back_to_all_approvers() {
        let ruleset = ruleset();
        let stray = change("elsewhere/baz.h", false, false);
        let approvers = ruleset.required_approvers(&[&stray]);
        assert_eq!(approvers, ruleset.all_approvers());
        assert_eq!(approvers.len(), 4);
    }

    #[test]
    fn applies_only_when_relevant_files_exist() {
        let ruleset = ruleset();
        assert!(ruleset.applies_to_changes(&[change("open/a.h", false, false)]));
        assert!(!ruleset.applies_to_changes(&[change("closed/a.h", false, false)]));
        assert!(!ruleset.applies_to_changes(&[]));
    }
}
