//! Newtype wrappers for domain identifiers.
//!
//! These types prevent accidental mixing of different ID types (e.g., using a
//! NoteId where an MrId is expected) and make the code more self-documenting.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error returned when parsing an invalid SHA.
#[derive(Debug, Clone, Error)]
#[error("invalid SHA: expected 40 hex characters, got {len} bytes: {preview}")]
pub struct InvalidSha {
    len: usize,
    preview: String,
}

/// Error returned when parsing an invalid issue key.
#[derive(Debug, Clone, Error)]
#[error("invalid issue key: {input}")]
pub struct InvalidIssueKey {
    input: String,
}

/// A merge request identifier within the configured project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MrId(pub u64);

impl fmt::Display for MrId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "!{}", self.0)
    }
}

impl From<u64> for MrId {
    fn from(n: u64) -> Self {
        MrId(n)
    }
}

/// A git commit SHA (40 hex characters).
///
/// Construction is only possible via `Sha::parse`, which validates the input
/// and normalizes it to lowercase.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Sha(String);

impl Sha {
    /// Parses a string as a SHA, validating that it is exactly 40 hex characters.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidSha> {
        let s = s.into();
        if s.len() == 40 && s.chars().all(|c| c.is_ascii_hexdigit()) {
            Ok(Sha(s.to_ascii_lowercase()))
        } else {
            Err(InvalidSha {
                len: s.len(),
                preview: s.chars().take(20).collect(),
            })
        }
    }

    /// Returns the SHA as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a short (8-character) version of the SHA for display.
    pub fn short(&self) -> &str {
        &self.0[..8]
    }
}

impl fmt::Display for Sha {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for Sha {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Sha::parse(s).map_err(serde::de::Error::custom)
    }
}

/// An issue-tracker key of the form `PROJ-123`.
///
/// The project prefix is at least two characters, starting with an uppercase
/// letter; the numeric part is non-empty. Construction is only possible via
/// `IssueKey::parse`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct IssueKey(String);

impl IssueKey {
    /// Parses and validates an issue key.
    pub fn parse(s: impl Into<String>) -> Result<Self, InvalidIssueKey> {
        let s = s.into();
        if Self::is_valid(&s) {
            Ok(IssueKey(s))
        } else {
            Err(InvalidIssueKey { input: s })
        }
    }

    fn is_valid(s: &str) -> bool {
        let Some((project, number)) = s.split_once('-') else {
            return false;
        };
        project.len() >= 2
            && project.starts_with(|c: char| c.is_ascii_uppercase())
            && project
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
            && !number.is_empty()
            && number.chars().all(|c| c.is_ascii_digit())
    }

    /// Returns the project prefix (the part before the dash).
    pub fn project(&self) -> &str {
        self.0.split_once('-').map(|(p, _)| p).unwrap_or(&self.0)
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssueKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl<'de> Deserialize<'de> for IssueKey {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        IssueKey::parse(s).map_err(serde::de::Error::custom)
    }
}

/// A forge pipeline identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PipelineId(pub u64);

impl fmt::Display for PipelineId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A forge discussion (resolvable comment thread) identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DiscussionId(pub String);

impl DiscussionId {
    pub fn new(s: impl Into<String>) -> Self {
        DiscussionId(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DiscussionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A forge note (plain comment) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NoteId(pub u64);

impl fmt::Display for NoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod mr_id {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(n: u64) {
                let mr = MrId(n);
                let json = serde_json::to_string(&mr).unwrap();
                let parsed: MrId = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(mr, parsed);
            }

            #[test]
            fn display_format(n: u64) {
                prop_assert_eq!(format!("{}", MrId(n)), format!("!{}", n));
            }
        }
    }

    mod sha {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn serde_roundtrip(s in "[0-9a-f]{40}") {
                let sha = Sha::parse(&s).unwrap();
                let json = serde_json::to_string(&sha).unwrap();
                let parsed: Sha = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(sha, parsed);
            }

            #[test]
            fn short_returns_8_chars(s in "[0-9a-f]{40}") {
                let sha = Sha::parse(&s).unwrap();
                prop_assert_eq!(sha.short(), &s[..8]);
            }

            #[test]
            fn parse_rejects_invalid_length(s in "[0-9a-f]{0,39}|[0-9a-f]{41,80}") {
                prop_assert!(Sha::parse(&s).is_err());
            }

            #[test]
            fn parse_normalizes_to_lowercase(s in "[0-9A-Fa-f]{40}") {
                let sha = Sha::parse(&s).unwrap();
                prop_assert_eq!(sha.as_str(), s.to_ascii_lowercase());
            }
        }

        #[test]
        fn deserialize_rejects_invalid_sha() {
            let json = r#""not-a-valid-sha""#;
            let result: Result<Sha, _> = serde_json::from_str(json);
            assert!(result.is_err());
        }
    }

    mod issue_key {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_accepts_valid(key in "[A-Z][A-Z0-9]{1,9}-[0-9]{1,6}") {
                let parsed = IssueKey::parse(&key).unwrap();
                prop_assert_eq!(parsed.as_str(), key.as_str());
            }

            #[test]
            fn project_is_prefix(project in "[A-Z][A-Z0-9]{1,9}", n in 1u32..100_000) {
                let key = IssueKey::parse(format!("{}-{}", project, n)).unwrap();
                prop_assert_eq!(key.project(), project.as_str());
            }

            #[test]
            fn serde_roundtrip(key in "[A-Z][A-Z0-9]{1,9}-[0-9]{1,6}") {
                let key = IssueKey::parse(&key).unwrap();
                let json = serde_json::to_string(&key).unwrap();
                let parsed: IssueKey = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(key, parsed);
            }
        }

        #[test]
        fn parse_rejects_invalid() {
            for bad in [
                "", "PROJ", "PROJ-", "-123", "proj-123", "P-1x", "PROJ_123", "P-",
            ] {
                assert!(IssueKey::parse(bad).is_err(), "{bad:?} should be rejected");
            }
        }

        #[test]
        fn single_letter_project_is_rejected() {
            // Single-letter prefixes produce too many false positives in prose
            // ("A-1", "B-2"), so the minimum project length is two.
            assert!(IssueKey::parse("A-1").is_err());
            assert!(IssueKey::parse("AB-1").is_ok());
        }
    }
}
