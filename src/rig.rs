//! Rig configuration
//!
//! Represents the workspace a refinery owns: where it lives, which remote
//! its workers push to, and which branch their work lands on. Uses Builder
//! pattern for flexible construction.

use crate::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Directory under the rig root holding refinery control files
const CONTROL_DIR: &str = ".refinery";

/// Workspace a refinery processes merge requests for
///
/// Workers push branches named `<worker_prefix>/<worker>[/<issue>]` to the
/// rig's remote; the refinery serializes their integration into
/// `integration_branch`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rig {
    /// Rig name (typically the repository directory name)
    pub name: String,

    /// Local path to the rig checkout
    pub path: PathBuf,

    /// Git remote workers push to
    #[serde(default = "default_remote")]
    pub remote: String,

    /// Branch namespace workers push under
    #[serde(default = "default_worker_prefix")]
    pub worker_prefix: String,

    /// Branch merge requests are integrated into
    #[serde(default = "default_integration_branch")]
    pub integration_branch: String,
}

fn default_remote() -> String {
    "origin".to_string()
}

fn default_worker_prefix() -> String {
    "polecat".to_string()
}

fn default_integration_branch() -> String {
    "main".to_string()
}

impl Rig {
    /// Create a new Rig builder
    pub fn builder() -> RigBuilder {
        RigBuilder::default()
    }

    /// Directory holding the refinery's control files
    pub fn control_dir(&self) -> PathBuf {
        self.path.join(CONTROL_DIR)
    }

    /// Path of the persisted state file
    pub fn state_path(&self) -> PathBuf {
        self.control_dir().join("state.json")
    }

    /// Path of the advisory state lock
    pub fn lock_path(&self) -> PathBuf {
        self.control_dir().join("state.lock")
    }

    /// Full branch pattern workers push under (for display)
    pub fn work_branch_pattern(&self) -> String {
        format!("{}/{}/*", self.remote, self.worker_prefix)
    }
}

/// Builder for Rig configuration
#[derive(Debug, Default)]
pub struct RigBuilder {
    name: Option<String>,
    path: Option<PathBuf>,
    remote: Option<String>,
    worker_prefix: Option<String>,
    integration_branch: Option<String>,
}

impl RigBuilder {
    /// Set the rig name (defaults to the path's directory name)
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the local path
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Set the remote (defaults to "origin")
    pub fn remote(mut self, remote: impl Into<String>) -> Self {
        self.remote = Some(remote.into());
        self
    }

    /// Set the worker branch prefix (defaults to "polecat")
    pub fn worker_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.worker_prefix = Some(prefix.into());
        self
    }

    /// Set the integration branch (defaults to "main")
    pub fn integration_branch(mut self, branch: impl Into<String>) -> Self {
        self.integration_branch = Some(branch.into());
        self
    }

    /// Build the Rig, returning an error if required fields are missing
    pub fn build(self) -> Result<Rig> {
        let path = self
            .path
            .ok_or_else(|| crate::RefineryError::Config("Rig path is required".to_string()))?;

        let name = match self.name {
            Some(name) => name,
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .ok_or_else(|| {
                    crate::RefineryError::Config(format!(
                        "Cannot derive rig name from path {}",
                        path.display()
                    ))
                })?,
        };

        Ok(Rig {
            name,
            path,
            remote: self.remote.unwrap_or_else(default_remote),
            worker_prefix: self.worker_prefix.unwrap_or_else(default_worker_prefix),
            integration_branch: self.integration_branch.unwrap_or_else(default_integration_branch),
        })
    }
}
