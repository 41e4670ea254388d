//! Subprocess adapters for the external checker tools.
//!
//! Both checkers ship with the deployment as standalone executables speaking
//! JSON on stdout. The adapters spawn them with the working tree path and
//! parse the verdicts; tool failures surface as `CheckerError`, which the
//! projector converts into a deferred cycle rather than a user-visible
//! finding.

use std::path::{Path, PathBuf};

use tokio::process::Command;

use super::{CheckerError, ComplianceChecker, SubmoduleChecker, SubmoduleVerdict, Violation};

/// Runs the open-source compliance checker executable.
///
/// Invocation: `<program> --repo <dir> <file>...`; stdout is a JSON array of
/// violations.
#[derive(Debug, Clone)]
pub struct ToolComplianceChecker {
    program: PathBuf,
}

impl ToolComplianceChecker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ToolComplianceChecker {
            program: program.into(),
        }
    }
}

impl ComplianceChecker for ToolComplianceChecker {
    async fn check_files(
        &self,
        repo_dir: &Path,
        files: &[String],
    ) -> Result<Vec<Violation>, CheckerError> {
        if files.is_empty() {
            return Ok(Vec::new());
        }
        let mut command = Command::new(&self.program);
        command.arg("--repo").arg(repo_dir).args(files);
        let output = run_tool(&self.program, &mut command).await?;
        serde_json::from_slice(&output).map_err(|source| CheckerError::BadOutput {
            tool: self.program.display().to_string(),
            source,
        })
    }
}

/// Runs the nested-submodule consistency checker executable.
///
/// Invocation: `<program> --repo <dir> <submodule_dir>`; stdout is a JSON
/// object with a `verdict` tag.
#[derive(Debug, Clone)]
pub struct ToolSubmoduleChecker {
    program: PathBuf,
}

impl ToolSubmoduleChecker {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        ToolSubmoduleChecker {
            program: program.into(),
        }
    }
}

impl SubmoduleChecker for ToolSubmoduleChecker {
    async fn check_submodule(
        &self,
        repo_dir: &Path,
        submodule_dir: &str,
    ) -> Result<SubmoduleVerdict, CheckerError> {
        let mut command = Command::new(&self.program);
        command.arg("--repo").arg(repo_dir).arg(submodule_dir);
        let output = run_tool(&self.program, &mut command).await?;
        serde_json::from_slice(&output).map_err(|source| CheckerError::BadOutput {
            tool: self.program.display().to_string(),
            source,
        })
    }
}

async fn run_tool(program: &Path, command: &mut Command) -> Result<Vec<u8>, CheckerError> {
    let output = command
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|source| CheckerError::Spawn {
            tool: program.display().to_string(),
            source,
        })?;
    if !output.status.success() {
        return Err(CheckerError::Failed {
            tool: program.display().to_string(),
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }
    Ok(output.stdout)
}
