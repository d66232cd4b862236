//! Work branch discovery
//!
//! Finds worker branches on the rig's remote and turns them into pending
//! merge requests. Branch names follow `<prefix>/<worker>[/<issue>]`; the
//! worker segment cannot contain `/`, the issue part may.

use crate::{MergeRequest, MrStatus, Result, Rig};
use chrono::Utc;
use gitcmd::{Git, RemoteBranch};
use tracing::{debug, trace};

/// Discovers candidate work branches for a rig
#[derive(Debug, Clone)]
pub struct Discoverer {
    rig: Rig,
    git: Git,
}

impl Discoverer {
    /// Create a discoverer working inside the rig checkout
    pub fn new(rig: &Rig) -> Self {
        Self {
            rig: rig.clone(),
            git: Git::with_workdir(&rig.path),
        }
    }

    /// List the merge requests currently advertised on the remote
    ///
    /// A rig without the configured remote has no work, which is not an
    /// error. Git command failures propagate to the caller.
    pub fn discover(&self) -> Result<Vec<MergeRequest>> {
        if !self.git.has_remote(&self.rig.remote)? {
            debug!(
                rig = %self.rig.name,
                remote = %self.rig.remote,
                "Remote not configured, nothing to discover"
            );
            return Ok(Vec::new());
        }

        let branches = self
            .git
            .remote_branches(&self.rig.remote, &self.rig.worker_prefix)?;

        let mut requests = Vec::new();
        for branch in branches {
            match self.to_merge_request(&branch) {
                Some(mr) => requests.push(mr),
                None => trace!(branch = %branch.name, "Ignoring non-work branch"),
            }
        }

        debug!(rig = %self.rig.name, count = requests.len(), "Discovered work branches");
        Ok(requests)
    }

    /// Synthesize a pending merge request from a discovered branch
    ///
    /// Returns None for names outside the work convention. Creation time is
    /// the branch tip's commit time when git reported one, else now.
    fn to_merge_request(&self, branch: &RemoteBranch) -> Option<MergeRequest> {
        let (worker, issue_id) = parse_work_branch(&self.rig.worker_prefix, &branch.name)?;
        let created_at = branch.created_at.unwrap_or_else(Utc::now);

        Some(MergeRequest {
            id: format!("mr-{}-{}", worker, created_at.timestamp()),
            branch: branch.name.clone(),
            worker,
            issue_id: issue_id.unwrap_or_default(),
            swarm_id: None,
            target_branch: self.rig.integration_branch.clone(),
            created_at,
            status: MrStatus::Pending,
            error: None,
        })
    }
}

/// Split `<prefix>/<worker>[/<issue>]` into worker and issue
///
/// The worker segment is mandatory and must not contain `/`; the issue
/// segment is optional and may. Empty segments disqualify the name.
pub(crate) fn parse_work_branch(prefix: &str, branch: &str) -> Option<(String, Option<String>)> {
    let rest = branch.strip_prefix(prefix)?.strip_prefix('/')?;

    let (worker, issue) = match rest.split_once('/') {
        Some((worker, issue)) => (worker, Some(issue)),
        None => (rest, None),
    };

    if worker.is_empty() {
        return None;
    }
    if matches!(issue, Some("")) {
        return None;
    }

    Some((worker.to_string(), issue.map(str::to_string)))
}
