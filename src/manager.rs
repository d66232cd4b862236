//! Refinery lifecycle and processing loop
//!
//! The manager is the only writer of the refinery record. It owns the
//! start/stop/pause/resume state machine and, in foreground mode, the
//! poll-process-persist loop that works the merge queue one request at a
//! time.

use crate::discovery::Discoverer;
use crate::process::{ProcessProbe, SystemProbe};
use crate::queue::build_queue;
use crate::store::StateStore;
use crate::{MergeRequest, MrStatus, QueueItem, Refinery, RefineryError, RefineryState, Result, Rig};
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Default poll interval (30 seconds)
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default bound on one discovery pass (30 seconds)
pub const DEFAULT_DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Outcome of one merge attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The branch landed on the target
    Merged,
    /// The merge was attempted and did not land
    Failed(String),
    /// The request was not attempted
    Skipped(String),
}

/// Strategy seam for the actual merge operation
///
/// The refinery never runs merge porcelain itself; whatever lands branches
/// lives behind this trait.
pub trait MergeDriver: Send + Sync {
    /// Attempt to integrate the request's branch into its target
    fn attempt(&self, mr: &MergeRequest) -> Result<MergeOutcome>;
}

/// Driver that skips every request
///
/// The out-of-the-box behavior until an operator configures a merge
/// command. Keeps the queue observable without touching any branch.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDriver;

impl MergeDriver for NoopDriver {
    fn attempt(&self, _mr: &MergeRequest) -> Result<MergeOutcome> {
        Ok(MergeOutcome::Skipped("no merge driver configured".to_string()))
    }
}

/// Driver that delegates to an external command
///
/// Runs `<program> [args..] <branch> <target>` in the rig checkout. Exit 0
/// counts as merged; anything else is a failure carrying trimmed stderr.
pub struct CommandDriver {
    program: String,
    args: Vec<String>,
    workdir: PathBuf,
}

impl CommandDriver {
    /// Build a driver from a whitespace-split command line
    pub fn new(command: &str, workdir: impl Into<PathBuf>) -> Result<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| RefineryError::Config("Merge command is empty".to_string()))?;

        Ok(Self {
            program,
            args: parts.collect(),
            workdir: workdir.into(),
        })
    }
}

impl MergeDriver for CommandDriver {
    fn attempt(&self, mr: &MergeRequest) -> Result<MergeOutcome> {
        let output = std::process::Command::new(&self.program)
            .args(&self.args)
            .arg(&mr.branch)
            .arg(&mr.target_branch)
            .current_dir(&self.workdir)
            .output()?;

        if output.status.success() {
            return Ok(MergeOutcome::Merged);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = if stderr.trim().is_empty() {
            format!("merge command exited with {}", output.status)
        } else {
            stderr.trim().to_string()
        };
        Ok(MergeOutcome::Failed(detail))
    }
}

/// What one poll cycle found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CycleOutcome {
    /// Nothing to do this cycle
    Idle,
    /// Processed one merge request
    Worked,
    /// The record was stopped externally; the loop must exit
    Stopped,
}

/// Merge queue processor for one rig
pub struct Manager {
    rig: Rig,
    store: StateStore,
    discoverer: Discoverer,
    probe: Arc<dyn ProcessProbe + Send + Sync>,
    driver: Arc<dyn MergeDriver>,
    poll_interval: Duration,
    discovery_timeout: Duration,
}

impl Manager {
    /// Create a manager for a rig with the system probe and no-op driver
    pub fn new(rig: Rig) -> Self {
        let store = StateStore::new(&rig);
        let discoverer = Discoverer::new(&rig);
        Self {
            rig,
            store,
            discoverer,
            probe: Arc::new(SystemProbe),
            driver: Arc::new(NoopDriver),
            poll_interval: DEFAULT_POLL_INTERVAL,
            discovery_timeout: DEFAULT_DISCOVERY_TIMEOUT,
        }
    }

    /// Set the poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Set the bound on one discovery pass
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Replace the process probe, for liveness checks and lock stealing alike
    pub fn with_probe(mut self, probe: impl ProcessProbe + Send + Sync + 'static) -> Self {
        let probe: Arc<dyn ProcessProbe + Send + Sync> = Arc::new(probe);
        self.store = self.store.clone().with_probe(Arc::clone(&probe));
        self.probe = probe;
        self
    }

    /// Replace the merge driver
    pub fn with_driver(mut self, driver: impl MergeDriver + 'static) -> Self {
        self.driver = Arc::new(driver);
        self
    }

    /// The rig this manager processes
    pub fn rig(&self) -> &Rig {
        &self.rig
    }

    /// Current agent record, with stale `running` records healed in place
    ///
    /// A running record whose recorded process no longer exists is left
    /// over from a crash; it is corrected to stopped and the correction is
    /// persisted before returning.
    pub fn status(&self) -> Result<Refinery> {
        let record = self.store.load()?;

        let stale_pid = match (record.state, record.pid) {
            (RefineryState::Running, Some(pid)) if !self.probe.is_alive(pid) => pid,
            _ => return Ok(record),
        };

        // The load above ran outside the lock, so the heal decision is
        // re-made under it: a start() racing this query may have already
        // reclaimed the rig with a live process.
        self.store.update(|record| {
            let still_stale = record.state == RefineryState::Running
                && record.pid == Some(stale_pid)
                && !self.probe.is_alive(stale_pid);
            if still_stale {
                warn!(
                    rig = %self.rig.name,
                    pid = stale_pid,
                    "Refinery process is gone, healing record to stopped"
                );
                record.mark_stopped();
            }
            Ok(record.clone())
        })
    }

    /// Mark the refinery running and, in foreground mode, work the queue
    ///
    /// Background mode only persists the record; spawning a detached
    /// process is the caller's business.
    pub async fn start(&self, foreground: bool) -> Result<()> {
        // Checked before anything is persisted; a zero period would abort
        // the interval timer after the running record already landed.
        if foreground && self.poll_interval.is_zero() {
            return Err(RefineryError::Config(
                "Poll interval must be at least one second".to_string(),
            ));
        }

        self.store.update(|record| {
            if record.state == RefineryState::Running {
                if let Some(pid) = record.pid {
                    if self.probe.is_alive(pid) {
                        return Err(RefineryError::AlreadyRunning(pid));
                    }
                }
            }
            record.state = RefineryState::Running;
            record.pid = Some(std::process::id());
            record.started_at = Some(Utc::now());
            Ok(())
        })?;

        info!(rig = %self.rig.name, foreground, "Refinery started");

        if foreground {
            self.run_loop().await
        } else {
            Ok(())
        }
    }

    /// Stop the refinery, signalling the owning process if it is not us
    pub fn stop(&self) -> Result<()> {
        self.store.update(|record| {
            if record.state == RefineryState::Stopped {
                return Err(RefineryError::NotRunning);
            }
            if let Some(pid) = record.pid {
                if pid != std::process::id() {
                    // Best effort; the record below stops the loop anyway
                    if let Err(e) = self.probe.interrupt(pid) {
                        debug!(pid, error = %e, "Could not signal refinery process");
                    }
                }
            }
            record.mark_stopped();
            Ok(())
        })?;

        info!(rig = %self.rig.name, "Refinery stopped");
        Ok(())
    }

    /// Pause queue processing without stopping the process
    pub fn pause(&self) -> Result<()> {
        self.store.update(|record| {
            if record.state != RefineryState::Running {
                return Err(RefineryError::NotRunning);
            }
            record.state = RefineryState::Paused;
            Ok(())
        })?;

        info!(rig = %self.rig.name, "Refinery paused");
        Ok(())
    }

    /// Resume a paused refinery
    pub fn resume(&self) -> Result<()> {
        self.store.update(|record| {
            if record.state != RefineryState::Paused {
                return Err(RefineryError::NotPaused);
            }
            record.state = RefineryState::Running;
            Ok(())
        })?;

        info!(rig = %self.rig.name, "Refinery resumed");
        Ok(())
    }

    /// Compose the displayable merge queue from a fresh discovery pass
    pub fn queue(&self) -> Result<Vec<QueueItem>> {
        let discovered = self.discoverer.discover()?;
        let record = self.store.load()?;
        Ok(build_queue(&record, discovered))
    }

    /// The foreground processing loop
    ///
    /// Polls on an interval, processing at most one merge request per
    /// cycle. Cancellation is checked between cycles, never mid-merge; on
    /// shutdown the stopped record is persisted before returning.
    async fn run_loop(&self) -> Result<()> {
        info!(
            rig = %self.rig.name,
            interval_secs = self.poll_interval.as_secs(),
            "Refinery processing loop started"
        );

        let mut interval = tokio::time::interval(self.poll_interval);

        #[cfg(unix)]
        let externally_stopped = self.loop_with_signals(&mut interval).await?;

        #[cfg(not(unix))]
        let externally_stopped = self.loop_with_ctrl_c(&mut interval).await?;

        if externally_stopped {
            // Whoever stopped us already persisted the record
            info!(rig = %self.rig.name, "Refinery stopped externally");
            return Ok(());
        }

        self.persist_shutdown()
    }

    /// Event loop with Unix signal handling (SIGTERM/SIGINT)
    ///
    /// Returns whether the loop exited because the record was stopped by
    /// another process rather than by a signal.
    #[cfg(unix)]
    async fn loop_with_signals(&self, interval: &mut tokio::time::Interval) -> Result<bool> {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate()).map_err(|e| {
            RefineryError::Other(format!("Failed to set up SIGTERM handler: {}", e))
        })?;
        let mut sigint = signal(SignalKind::interrupt()).map_err(|e| {
            RefineryError::Other(format!("Failed to set up SIGINT handler: {}", e))
        })?;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_cycle().await {
                        Ok(CycleOutcome::Stopped) => return Ok(true),
                        Ok(_) => {}
                        // The next tick naturally retries
                        Err(e) => warn!(rig = %self.rig.name, error = %e, "Poll cycle failed"),
                    }
                }
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, initiating graceful shutdown");
                    return Ok(false);
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, initiating graceful shutdown");
                    return Ok(false);
                }
            }
        }
    }

    /// Event loop for platforms without Unix signals
    #[cfg(not(unix))]
    async fn loop_with_ctrl_c(&self, interval: &mut tokio::time::Interval) -> Result<bool> {
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.poll_cycle().await {
                        Ok(CycleOutcome::Stopped) => return Ok(true),
                        Ok(_) => {}
                        Err(e) => warn!(rig = %self.rig.name, error = %e, "Poll cycle failed"),
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received interrupt, initiating graceful shutdown");
                    return Ok(false);
                }
            }
        }
    }

    /// Persist the stopped record on the way out of the loop
    fn persist_shutdown(&self) -> Result<()> {
        match self.store.update(|record| {
            record.mark_stopped();
            Ok(())
        }) {
            Ok(()) => {}
            Err(RefineryError::LockHeld { pid, .. }) => {
                // The only other writer is a stop/pause command, which
                // persists its own transition
                debug!(pid, "State lock busy during shutdown");
            }
            Err(e) => return Err(e),
        }

        info!(rig = %self.rig.name, "Refinery loop stopped");
        Ok(())
    }

    /// One poll-process-persist cycle
    ///
    /// Reloads the record so external stop/pause transitions are honored,
    /// then works at most one merge request to completion.
    async fn poll_cycle(&self) -> Result<CycleOutcome> {
        let record = self.store.load()?;
        match record.state {
            RefineryState::Stopped => return Ok(CycleOutcome::Stopped),
            RefineryState::Paused => {
                debug!(rig = %self.rig.name, "Paused, skipping cycle");
                return Ok(CycleOutcome::Idle);
            }
            RefineryState::Running => {}
        }

        // A current request left by a crash is resumed before anything new
        // is pulled from the remote.
        let next = match record.current_mr {
            Some(mr) => Some(mr),
            None => self.discover_bounded().await?.into_iter().next(),
        };
        let Some(mut mr) = next else {
            debug!(rig = %self.rig.name, "Queue is empty");
            return Ok(CycleOutcome::Idle);
        };

        mr.status = MrStatus::Processing;
        match self.park_current(&mr)? {
            RefineryState::Stopped => return Ok(CycleOutcome::Stopped),
            RefineryState::Paused => return Ok(CycleOutcome::Idle),
            RefineryState::Running => {}
        }
        info!(branch = %mr.branch, worker = %mr.worker, "Processing merge request");

        let outcome = self.attempt_merge(&mr).await;
        self.record_outcome(&mr, outcome)?;

        Ok(CycleOutcome::Worked)
    }

    /// Park the request as current, re-checking the state under the lock
    ///
    /// An external stop or pause can land between the cycle's initial load
    /// and this write; the locked record decides, not the earlier snapshot.
    /// A non-running record is left untouched.
    fn park_current(&self, mr: &MergeRequest) -> Result<RefineryState> {
        self.store.update(|record| {
            if record.state == RefineryState::Running {
                record.current_mr = Some(mr.clone());
            }
            Ok(record.state)
        })
    }

    /// Run one discovery pass on the blocking pool, bounded in time
    ///
    /// A hung git invocation keeps its thread until it exits, but the loop
    /// moves on.
    async fn discover_bounded(&self) -> Result<Vec<MergeRequest>> {
        let discoverer = self.discoverer.clone();
        let task = tokio::task::spawn_blocking(move || discoverer.discover());

        match tokio::time::timeout(self.discovery_timeout, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => Err(RefineryError::Discovery(format!(
                "discovery task failed: {}",
                e
            ))),
            Err(_) => Err(RefineryError::Discovery(format!(
                "discovery timed out after {}s",
                self.discovery_timeout.as_secs()
            ))),
        }
    }

    /// Attempt the merge on the blocking pool
    ///
    /// Driver errors count as failed attempts, not loop faults.
    async fn attempt_merge(&self, mr: &MergeRequest) -> MergeOutcome {
        let driver = Arc::clone(&self.driver);
        let mr = mr.clone();

        match tokio::task::spawn_blocking(move || driver.attempt(&mr)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => MergeOutcome::Failed(e.to_string()),
            Err(e) => MergeOutcome::Failed(format!("merge task failed: {}", e)),
        }
    }

    /// Classify the attempt into the stats and release the current slot
    fn record_outcome(&self, mr: &MergeRequest, outcome: MergeOutcome) -> Result<()> {
        let now = Utc::now();
        let today = now.date_naive();

        self.store.update(|record| {
            match &outcome {
                MergeOutcome::Merged => {
                    record.stats.record_merged(today);
                    record.last_merge_at = Some(now);
                }
                MergeOutcome::Failed(_) => record.stats.record_failed(today),
                MergeOutcome::Skipped(_) => record.stats.record_skipped(today),
            }
            record.current_mr = None;
            Ok(())
        })?;

        match &outcome {
            MergeOutcome::Merged => info!(branch = %mr.branch, "Merge request merged"),
            MergeOutcome::Failed(reason) => {
                warn!(branch = %mr.branch, reason = %reason, "Merge request failed")
            }
            MergeOutcome::Skipped(reason) => {
                info!(branch = %mr.branch, reason = %reason, "Merge request skipped")
            }
        }
        Ok(())
    }
}
