//! Process-wide configuration.
//!
//! Loaded once at startup from a YAML file and treated as immutable for the
//! process lifetime. The schema is closed: unknown keys anywhere in the file
//! are a startup error, so typos surface before the bot touches the forge.
//!
//! Secrets (forge token, tracker password, ingress feed secret) are read from
//! mounted files referenced by `*_file` keys; they are never accepted as CLI
//! flags.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use regex::Regex;
use serde::Deserialize;
use thiserror::Error;

/// Relevance checkers that may be named by an approval ruleset.
///
/// These are keys into a built-in registry of predicates over
/// `(file path, diff)`; see `checkers::relevance`.
pub const RELEVANCE_CHECKERS: &[&str] = &[
    "is_file_open_sourced",
    "does_file_diff_contain_apidoc_changes",
    "match_name_pattern",
];

/// Errors detected while loading or validating configuration.
///
/// All of these are fatal at startup.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("cannot parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("cannot read secret file {path}: {source}")]
    Secret {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("ruleset {ruleset}: unknown relevance checker {name:?}")]
    UnknownRelevanceChecker { ruleset: String, name: String },

    #[error("ruleset {ruleset}: invalid pattern {pattern:?}: {source}")]
    BadPattern {
        ruleset: String,
        pattern: String,
        source: regex::Error,
    },

    #[error(
        "ruleset {ruleset}: pattern {general:?} (rule {general_index}) is more general than \
         {specific:?} (rule {specific_index}) but precedes it; more-specific patterns must \
         come first"
    )]
    PatternOrder {
        ruleset: String,
        general: String,
        general_index: usize,
        specific: String,
        specific_index: usize,
    },

    #[error("ruleset {ruleset}: rule {index} has an empty approver list")]
    EmptyApprovers { ruleset: String, index: usize },

    #[error("jira.project_keys must not be empty")]
    NoSupportedProjects,
}

/// Identity and escalation settings for the bot itself.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BotConfig {
    /// Forge handle the bot posts and parses commands as, without the `@`.
    pub handle: String,
    /// Mention inserted into findings that need operator attention
    /// (permanent API rejections and the like).
    #[serde(default)]
    pub escalation_mention: Option<String>,
}

/// Connection settings for the issue tracker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct JiraConfig {
    pub url: String,
    pub login: String,
    /// Path of the mounted file holding the API password or token.
    pub password_file: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
    #[serde(default = "default_retries")]
    pub retries: u32,
    /// Supported projects: only their issues participate in workflow
    /// transitions; issues of other projects are informational.
    pub project_keys: Vec<String>,
}

/// Connection settings for the forge REST API.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ForgeConfig {
    pub url: String,
    /// Project path, e.g. `dev/vms`.
    pub project: String,
    /// Path of the mounted file holding the API token.
    pub token_file: PathBuf,
    #[serde(default = "default_timeout_secs")]
    pub timeout: u64,
}

/// Local git checkout settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepoConfig {
    /// Path of the on-disk working tree.
    pub path: PathBuf,
    /// Git URL used for the initial clone.
    pub url: String,
    #[serde(default)]
    pub need_code_owner_approval: bool,
}

/// Pipeline handling settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PipelineConfig {
    /// Stage whose jobs the forge starts automatically; the bot never
    /// triggers jobs in this stage.
    #[serde(default)]
    pub autorun_stage: Option<String>,
}

/// One `(patterns, approvers)` entry of an approval ruleset.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApprovalRule {
    /// Anchored path patterns; the first rule with a matching pattern wins.
    pub patterns: Vec<String>,
    /// Forge usernames allowed to approve for this rule.
    pub approvers: Vec<String>,
}

/// An ordered approval ruleset keyed by a relevance checker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveRuleset {
    pub relevance_checker: String,
    pub rules: Vec<ApprovalRule>,
}

/// Wrapper matching the config file's nesting.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApproveRulesetEntry {
    pub approve_ruleset: ApproveRuleset,
}

/// Nested-submodule consistency settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NxSubmoduleCheckConfig {
    #[serde(default)]
    pub nx_submodule_dirs: Vec<String>,
}

/// Engine tuning knobs. All have defaults; the CLI can override parallelism.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    /// Maximum number of MR cycles running concurrently.
    pub parallelism: usize,
    /// Event dedupe window, seconds.
    pub dedupe_ttl: u64,
    /// Idle period after which an MR actor is evicted, seconds.
    pub actor_idle_eviction: u64,
    /// Period of the reconciliation timer tick, seconds.
    pub poll_interval: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            parallelism: 2,
            dedupe_ttl: 30,
            actor_idle_eviction: 1800,
            poll_interval: 60,
        }
    }
}

/// HTTP ingress settings for the normalized event feed.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngressConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Path of the mounted file holding the feed HMAC secret.
    pub secret_file: PathBuf,
}

/// The full configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub bot: BotConfig,
    pub jira: JiraConfig,
    pub forge: ForgeConfig,
    pub repo: RepoConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    /// Approval rulesets keyed by ruleset name (e.g. `open_source`, `apidoc`).
    #[serde(default)]
    pub job_status_check_rule: BTreeMap<String, ApproveRulesetEntry>,
    #[serde(default)]
    pub nx_submodule_check_rule: NxSubmoduleCheckConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    pub ingress: IngressConfig,
}

impl Config {
    /// Loads and validates configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_yaml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validates cross-field invariants that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.jira.project_keys.is_empty() {
            return Err(ConfigError::NoSupportedProjects);
        }
        for (name, entry) in &self.job_status_check_rule {
            validate_ruleset(name, &entry.approve_ruleset)?;
        }
        Ok(())
    }

    /// Reads a secret from a mounted file, trimming trailing whitespace.
    pub fn read_secret(path: &Path) -> Result<String, ConfigError> {
        std::fs::read_to_string(path)
            .map(|s| s.trim_end().to_string())
            .map_err(|source| ConfigError::Secret {
                path: path.to_path_buf(),
                source,
            })
    }

    /// True when the issue project is in the supported set.
    pub fn is_supported_project(&self, project: &str) -> bool {
        self.jira.project_keys.iter().any(|k| k == project)
    }
}

fn validate_ruleset(name: &str, ruleset: &ApproveRuleset) -> Result<(), ConfigError> {
    if !RELEVANCE_CHECKERS.contains(&ruleset.relevance_checker.as_str()) {
        return Err(ConfigError::UnknownRelevanceChecker {
            ruleset: name.to_string(),
            name: ruleset.relevance_checker.clone(),
        });
    }

    for (index, rule) in ruleset.rules.iter().enumerate() {
        if rule.approvers.is_empty() {
            return Err(ConfigError::EmptyApprovers {
                ruleset: name.to_string(),
                index,
            });
        }
        for pattern in &rule.patterns {
            Regex::new(pattern).map_err(|source| ConfigError::BadPattern {
                ruleset: name.to_string(),
                pattern: pattern.clone(),
                source,
            })?;
        }
    }

    // Earlier rules win, so a pattern that is a proper prefix of a later
    // rule's pattern would shadow the more specific rule entirely.
    for (i, earlier) in ruleset.rules.iter().enumerate() {
        for general in &earlier.patterns {
            for (j, later) in ruleset.rules.iter().enumerate().skip(i + 1) {
                for specific in &later.patterns {
                    if specific != general && specific.starts_with(general.as_str()) {
                        return Err(ConfigError::PatternOrder {
                            ruleset: name.to_string(),
                            general: general.clone(),
                            general_index: i,
                            specific: specific.clone(),
                            specific_index: j,
                        });
                    }
                }
            }
        }
    }

    Ok(())
}

fn default_timeout_secs() -> u64 {
    10
}

fn default_retries() -> u32 {
    3
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}
