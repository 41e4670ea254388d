//! The discussion ledger: which findings are already materialized on the MR.
//!
//! The ledger is derived from forge state on every cycle, never persisted.
//! The bot owns exactly the discussions it opened, recognized by a machine
//! marker in the opening note; it never resolves discussions it did not
//! create, and an already-open fingerprint makes re-creation a no-op.

use std::collections::BTreeMap;

use crate::forge::Discussion;
use crate::types::{DiscussionId, Finding, Fingerprint};

/// Marker prefix embedded as an HTML comment in bot discussion bodies.
///
/// Forge renderers hide HTML comments, so users only see the message text.
const FINGERPRINT_MARKER: &str = "<!-- robocat:fingerprint:";
const MARKER_CLOSE: &str = " -->";

/// A bot-owned discussion found on the MR.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedDiscussion {
    pub id: DiscussionId,
    pub fingerprint: Fingerprint,
    pub resolved: bool,
}

/// Mapping from finding fingerprints to the discussions that carry them.
#[derive(Debug, Default)]
pub struct DiscussionLedger {
    owned: BTreeMap<Fingerprint, OwnedDiscussion>,
}

impl DiscussionLedger {
    /// Builds the ledger from the MR's discussions.
    ///
    /// Only discussions authored by the bot and carrying a fingerprint
    /// marker enter the ledger; human threads are invisible to it. When the
    /// same fingerprint appears in several discussions (a historical bug or
    /// manual copy), the unresolved one wins.
    pub fn from_discussions(bot_handle: &str, discussions: &[Discussion]) -> Self {
        let mut owned: BTreeMap<Fingerprint, OwnedDiscussion> = BTreeMap::new();
        for discussion in discussions {
            if discussion.author != bot_handle {
                continue;
            }
            let Some(fingerprint) = parse_fingerprint(&discussion.body) else {
                continue;
            };
            let entry = OwnedDiscussion {
                id: discussion.id.clone(),
                fingerprint: fingerprint.clone(),
                resolved: discussion.resolved,
            };
            match owned.get(&fingerprint) {
                Some(existing) if !existing.resolved => {}
                _ => {
                    owned.insert(fingerprint, entry);
                }
            }
        }
        DiscussionLedger { owned }
    }

    /// The open (unresolved) discussion for a fingerprint, if any.
    pub fn open_discussion(&self, fingerprint: &Fingerprint) -> Option<&OwnedDiscussion> {
        self.owned.get(fingerprint).filter(|d| !d.resolved)
    }

    /// True when an open discussion with this fingerprint exists.
    pub fn has_open(&self, fingerprint: &Fingerprint) -> bool {
        self.open_discussion(fingerprint).is_some()
    }

    /// All open bot-owned discussions.
    pub fn open_discussions(&self) -> impl Iterator<Item = &OwnedDiscussion> {
        self.owned.values().filter(|d| !d.resolved)
    }

    /// True when any bot-owned discussion is still unresolved.
    pub fn has_any_open(&self) -> bool {
        self.open_discussions().next().is_some()
    }
}

/// Renders the opening note body for a finding's discussion.
///
/// The fingerprint marker comes first (hidden in rendering), then the
/// message, then the sign-off instruction when the finding names required
/// approvers.
pub fn format_discussion_body(finding: &Finding) -> String {
    let mut body = format!(
        "{}{}{}\n{}",
        FINGERPRINT_MARKER,
        finding.fingerprint.as_str(),
        MARKER_CLOSE,
        finding.message
    );
    if !finding.required_approvers.is_empty() {
        let mentions: Vec<String> = finding
            .required_approvers
            .iter()
            .map(|a| format!("@{a}"))
            .collect();
        body.push_str(&format!(
            "\n\nSign-off required from one of: {}.",
            mentions.join(", ")
        ));
    }
    body
}

/// Extracts the fingerprint marker from a discussion body.
pub fn parse_fingerprint(body: &str) -> Option<Fingerprint> {
    let start = body.find(FINGERPRINT_MARKER)? + FINGERPRINT_MARKER.len();
    let rest = &body[start..];
    let end = rest.find(MARKER_CLOSE)?;
    let raw = rest[..end].trim();
    if raw.is_empty() {
        return None;
    }
    Some(Fingerprint::from_raw(raw))
}
