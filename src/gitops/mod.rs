//! Git workspace management.
//!
//! One on-disk working tree per configured repository, with a single async
//! lock around every git operation: at most one git subprocess runs at a
//! time, and the lock is never held across forge or tracker API calls.
//!
//! Rebase and cherry-pick never force-resolve conflicts. A conflicted rebase
//! is aborted and reported; a conflicted cherry-pick stops at the last clean
//! commit so the follow-up generator can still create an MR from the
//! pre-conflict head.

use std::path::{Path, PathBuf};
use std::process::Output;

use thiserror::Error;
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::types::Sha;

/// Errors from git subprocess invocations.
#[derive(Debug, Error)]
pub enum GitError {
    #[error("failed to run git: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("git {command} exited with {status}: {stderr}")]
    Command {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("git produced an unexpected SHA: {0}")]
    BadSha(String),
}

/// Result of rebasing an MR's source branch onto the target head.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RebaseOutcome {
    /// The rebase applied cleanly (possibly as a no-op fast-forward).
    Clean {
        old_head: Sha,
        new_head: Sha,
        /// The merge base against the target moved.
        base_changed: bool,
        /// The rebased tree differs from the pre-rebase tree.
        tree_changed: bool,
    },
    /// The rebase hit conflicts and was aborted; the branch is untouched.
    Conflict { old_head: Sha },
}

impl RebaseOutcome {
    /// True when the rebase produced a head that must be force-pushed.
    pub fn needs_push(&self) -> bool {
        matches!(self, RebaseOutcome::Clean { old_head, new_head, .. } if old_head != new_head)
    }

    /// True when the rebase changed what the MR actually introduces, which is
    /// what gates a pipeline re-trigger.
    pub fn affects_diff(&self) -> bool {
        matches!(
            self,
            RebaseOutcome::Clean {
                base_changed: true,
                tree_changed: true,
                ..
            }
        )
    }
}

/// Result of cherry-picking commits onto a fresh topic branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CherryPickOutcome {
    /// Head of the topic branch after picking (pre-conflict head when some
    /// commits did not apply).
    pub head: Sha,
    pub picked: Vec<Sha>,
    /// Commits that did not apply, in order; empty on full success.
    pub unpicked: Vec<Sha>,
}

impl CherryPickOutcome {
    pub fn is_clean(&self) -> bool {
        self.unpicked.is_empty()
    }
}

/// A single on-disk git checkout with mutual exclusion.
pub struct GitWorkspace {
    repo_dir: PathBuf,
    remote_url: String,
    lock: Mutex<()>,
}

/// Exclusive access to the working tree at a specific checked-out commit.
///
/// Returned by [`GitWorkspace::checkout_lease`]; holds the workspace lock
/// for its lifetime.
pub struct CheckoutLease<'a> {
    _guard: tokio::sync::MutexGuard<'a, ()>,
    dir: &'a Path,
}

impl CheckoutLease<'_> {
    pub fn dir(&self) -> &Path {
        self.dir
    }
}

impl GitWorkspace {
    pub fn new(repo_dir: impl Into<PathBuf>, remote_url: impl Into<String>) -> Self {
        GitWorkspace {
            repo_dir: repo_dir.into(),
            remote_url: remote_url.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn repo_dir(&self) -> &Path {
        &self.repo_dir
    }

    /// Clones the repository if the working tree does not exist yet.
    pub async fn ensure_ready(&self) -> Result<(), GitError> {
        let _guard = self.lock.lock().await;
        if self.repo_dir.join(".git").exists() {
            return Ok(());
        }
        info!(repo = %self.repo_dir.display(), "Cloning repository");
        if let Some(parent) = self.repo_dir.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let output = Command::new("git")
            .arg("clone")
            .arg(&self.remote_url)
            .arg(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await?;
        check_output("clone", &output)?;
        Ok(())
    }

    /// Fetches all refs from origin.
    pub async fn fetch(&self) -> Result<(), GitError> {
        let _guard = self.lock.lock().await;
        self.git(&["fetch", "origin", "--prune"]).await?;
        Ok(())
    }

    /// Rebases `source` onto the current `origin/<target>` head.
    ///
    /// On conflict the rebase is aborted, the local branch is reset back to
    /// the remote head, and `RebaseOutcome::Conflict` is returned. Pushing
    /// the result is a separate, explicitly planned step.
    pub async fn rebase_onto(
        &self,
        source: &str,
        target: &str,
    ) -> Result<RebaseOutcome, GitError> {
        let _guard = self.lock.lock().await;

        self.git(&["fetch", "origin", "--prune"]).await?;
        let origin_source = format!("origin/{source}");
        let origin_target = format!("origin/{target}");
        self.git(&["checkout", "-B", source, &origin_source]).await?;

        let old_head = self.rev_parse("HEAD").await?;
        let old_tree = self.git(&["rev-parse", "HEAD^{tree}"]).await?;
        let old_base = self.git(&["merge-base", "HEAD", &origin_target]).await?;

        let rebase = self.try_git(&["rebase", &origin_target]).await?;
        if !rebase.status.success() {
            debug!(source, target, "Rebase conflicted, aborting");
            self.git(&["rebase", "--abort"]).await?;
            self.git(&["checkout", "-B", source, &origin_source]).await?;
            return Ok(RebaseOutcome::Conflict { old_head });
        }

        let new_head = self.rev_parse("HEAD").await?;
        let new_tree = self.git(&["rev-parse", "HEAD^{tree}"]).await?;
        let new_base = self.git(&["merge-base", "HEAD", &origin_target]).await?;

        Ok(RebaseOutcome::Clean {
            old_head,
            new_head,
            base_changed: old_base != new_base,
            tree_changed: old_tree != new_tree,
        })
    }

    /// Pushes a local branch to origin.
    pub async fn push(&self, branch: &str, force: bool) -> Result<(), GitError> {
        let _guard = self.lock.lock().await;
        let refspec = format!("{branch}:refs/heads/{branch}");
        if force {
            self.git(&["push", "--force-with-lease", "origin", &refspec])
                .await?;
        } else {
            self.git(&["push", "origin", &refspec]).await?;
        }
        Ok(())
    }

    /// Creates `topic` from `origin/<target>` and cherry-picks `commits` onto
    /// it in order.
    ///
    /// The first conflicting commit aborts its pick and stops the sequence;
    /// the branch is left at the last clean head and the conflicting commit
    /// plus the rest are reported as unpicked.
    pub async fn cherry_pick_branch(
        &self,
        topic: &str,
        target: &str,
        commits: &[Sha],
    ) -> Result<CherryPickOutcome, GitError> {
        let _guard = self.lock.lock().await;

        self.git(&["fetch", "origin", "--prune"]).await?;
        let origin_target = format!("origin/{target}");
        self.git(&["checkout", "-B", topic, &origin_target]).await?;

        let mut picked = Vec::new();
        let mut unpicked = Vec::new();
        for (index, commit) in commits.iter().enumerate() {
            let pick = self
                .try_git(&["cherry-pick", "-x", commit.as_str()])
                .await?;
            if pick.status.success() {
                picked.push(commit.clone());
                continue;
            }
            debug!(topic, commit = %commit, "Cherry-pick conflicted, stopping");
            // --abort would also unwind prior successful picks.
            let _ = self.try_git(&["cherry-pick", "--quit"]).await?;
            self.git(&["reset", "--hard", "HEAD"]).await?;
            self.git(&["clean", "-fd"]).await?;
            unpicked.extend(commits[index..].iter().cloned());
            break;
        }

        let head = self.rev_parse("HEAD").await?;
        Ok(CherryPickOutcome {
            head,
            picked,
            unpicked,
        })
    }

    /// Checks out a commit in detached mode and leases the working tree to
    /// the caller.
    ///
    /// The lease holds the workspace lock, so content checkers can read the
    /// tree without racing a concurrent rebase. Dropping the lease releases
    /// the lock; nothing is cleaned up eagerly since every operation starts
    /// with its own checkout.
    pub async fn checkout_lease(&self, sha: &Sha) -> Result<CheckoutLease<'_>, GitError> {
        let guard = self.lock.lock().await;
        self.git(&["fetch", "origin", "--prune"]).await?;
        if self
            .try_git(&["checkout", "--detach", sha.as_str()])
            .await?
            .status
            .success()
        {
            return Ok(CheckoutLease {
                _guard: guard,
                dir: &self.repo_dir,
            });
        }
        // The commit may be on an unfetched ref (e.g. a just-pushed MR head);
        // fetching it directly is allowed by most servers.
        self.git(&["fetch", "origin", sha.as_str()]).await?;
        self.git(&["checkout", "--detach", sha.as_str()]).await?;
        Ok(CheckoutLease {
            _guard: guard,
            dir: &self.repo_dir,
        })
    }

    async fn rev_parse(&self, rev: &str) -> Result<Sha, GitError> {
        let raw = self.git(&["rev-parse", rev]).await?;
        Sha::parse(raw.trim()).map_err(|_| GitError::BadSha(raw))
    }

    /// Runs git, returning trimmed stdout; non-zero exit is an error.
    async fn git(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.try_git(args).await?;
        check_output(&args.join(" "), &output)?;
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Runs git, returning the raw output without failing on non-zero exit.
    async fn try_git(&self, args: &[&str]) -> Result<Output, GitError> {
        debug!(args = %args.join(" "), "git");
        let output = Command::new("git")
            .args(args)
            .current_dir(&self.repo_dir)
            .kill_on_drop(true)
            .output()
            .await?;
        Ok(output)
    }
}

fn check_output(command: &str, output: &Output) -> Result<(), GitError> {
    if output.status.success() {
        Ok(())
    } else {
        Err(GitError::Command {
            command: command.to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}
