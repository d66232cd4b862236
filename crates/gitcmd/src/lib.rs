//! Git CLI wrapper for the refinery merge queue
//!
//! A typed interface to the handful of read-only git operations the
//! refinery needs: repository checks, remote lookup, and listing remote
//! work branches with their tip timestamps. Merge execution is explicitly
//! not provided here.
//!
//! # Example
//!
//! ```no_run
//! use gitcmd::Git;
//!
//! let git = Git::with_workdir("/path/to/rig");
//!
//! if git.is_repo() && git.has_remote("origin")? {
//!     for branch in git.remote_branches("origin", "polecat")? {
//!         println!("{}", branch.name);
//!     }
//! }
//! # Ok::<(), gitcmd::Error>(())
//! ```

use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Command;
use thiserror::Error;

/// Errors that can occur when interacting with git
#[derive(Error, Debug)]
pub enum Error {
    #[error("git is not installed or not in PATH")]
    NotInstalled,

    #[error("Not inside a git repository")]
    NotARepository,

    #[error("Failed to execute git command: {0}")]
    CommandFailed(String),

    #[error("Failed to parse git output: {0}")]
    Parse(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations
pub type Result<T> = std::result::Result<T, Error>;

/// A remote-tracking branch, with the remote prefix stripped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteBranch {
    /// Branch name as workers pushed it (e.g. `polecat/nux/gt-123`)
    pub name: String,
    /// Commit time of the branch tip, when git reports one
    pub created_at: Option<DateTime<Utc>>,
}

/// Git CLI wrapper
#[derive(Debug, Clone, Default)]
pub struct Git {
    /// Working directory
    workdir: Option<PathBuf>,
}

impl Git {
    /// Create a new Git instance, verifying the binary is reachable
    pub fn new() -> Result<Self> {
        let git = Self::default();
        if !git.is_available() {
            return Err(Error::NotInstalled);
        }
        Ok(git)
    }

    /// Create with a specific working directory
    pub fn with_workdir(path: impl Into<PathBuf>) -> Self {
        Self {
            workdir: Some(path.into()),
        }
    }

    /// Check if git is available
    pub fn is_available(&self) -> bool {
        self.run_command(&["--version"]).is_ok()
    }

    /// Check if the working directory is inside a git repository
    pub fn is_repo(&self) -> bool {
        self.run_command(&["rev-parse", "--git-dir"]).is_ok()
    }

    /// Check whether a remote with the given name is configured
    pub fn has_remote(&self, name: &str) -> Result<bool> {
        let stdout = self.run_command(&["remote"])?;
        Ok(stdout.lines().any(|line| line.trim() == name))
    }

    /// List remote-tracking branches under `<remote>/<prefix>/`
    ///
    /// Names come back with the remote prefix stripped, in git's refname
    /// order. The timestamp is the tip's creator date and may be absent.
    pub fn remote_branches(&self, remote: &str, prefix: &str) -> Result<Vec<RemoteBranch>> {
        let pattern = format!("refs/remotes/{}/{}/", remote, prefix);
        let stdout = self.run_command(&[
            "for-each-ref",
            "--format=%(refname:short) %(creatordate:unix)",
            &pattern,
        ])?;

        let mut branches = Vec::new();
        for line in stdout.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            branches.push(Self::parse_branch_line(remote, line)?);
        }
        Ok(branches)
    }

    // --- Private helpers ---

    /// Parse one `for-each-ref` line of the form `<remote>/<name> <unix-ts>`
    fn parse_branch_line(remote: &str, line: &str) -> Result<RemoteBranch> {
        // Refnames cannot contain spaces, so the last field is the timestamp.
        let (name, timestamp) = match line.rsplit_once(' ') {
            Some((name, ts)) => (name, ts),
            None => (line, ""),
        };

        let name = name
            .strip_prefix(remote)
            .and_then(|rest| rest.strip_prefix('/'))
            .ok_or_else(|| Error::Parse(format!("unexpected ref name: {}", line)))?;

        let created_at = timestamp
            .parse::<i64>()
            .ok()
            .and_then(|secs| DateTime::from_timestamp(secs, 0));

        Ok(RemoteBranch {
            name: name.to_string(),
            created_at,
        })
    }

    /// Run git, returning stdout on success
    fn run_command(&self, args: &[&str]) -> Result<String> {
        let mut cmd = Command::new("git");
        cmd.args(args);

        if let Some(ref dir) = self.workdir {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotInstalled
            } else {
                Error::Io(e)
            }
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            if stderr.contains("not a git repository") {
                return Err(Error::NotARepository);
            }
            let detail = if stderr.trim().is_empty() {
                format!("git {} exited with {}", args.join(" "), output.status)
            } else {
                stderr.trim().to_string()
            };
            return Err(Error::CommandFailed(detail));
        }

        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }
}
