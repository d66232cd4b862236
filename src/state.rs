//! Refinery state model
//!
//! The persisted agent record, the merge requests it tracks, and the
//! ephemeral queue view. Field names here are the on-disk JSON contract;
//! external tooling reads the state file directly.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Running state of a refinery
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefineryState {
    /// Not running
    Stopped,
    /// Actively processing the queue
    Running,
    /// Running but not picking up new items
    Paused,
}

impl Default for RefineryState {
    fn default() -> Self {
        Self::Stopped
    }
}

impl fmt::Display for RefineryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefineryState::Stopped => write!(f, "stopped"),
            RefineryState::Running => write!(f, "running"),
            RefineryState::Paused => write!(f, "paused"),
        }
    }
}

/// Status of a merge request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MrStatus {
    /// Waiting to be processed
    Pending,
    /// Currently being merged
    Processing,
    /// Successfully merged
    Merged,
    /// Merge failed (conflict or error)
    Failed,
    /// Skipped (duplicate, outdated, no driver)
    Skipped,
}

impl Default for MrStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl fmt::Display for MrStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MrStatus::Pending => write!(f, "pending"),
            MrStatus::Processing => write!(f, "processing"),
            MrStatus::Merged => write!(f, "merged"),
            MrStatus::Failed => write!(f, "failed"),
            MrStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// A branch waiting to be merged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    /// Unique identifier for this merge request
    pub id: String,

    /// Source branch name (e.g. "polecat/Toast/gt-abc")
    pub branch: String,

    /// Worker that produced the branch
    pub worker: String,

    /// Issue being worked on; empty when the branch carries none
    #[serde(default)]
    pub issue_id: String,

    /// Swarm this work belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swarm_id: Option<String>,

    /// Branch this should merge into
    pub target_branch: String,

    /// When the branch was created (best known time)
    pub created_at: DateTime<Utc>,

    /// Current status
    pub status: MrStatus,

    /// Error details when status is `failed`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Cumulative refinery statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RefineryStats {
    /// Lifetime successful merges
    #[serde(default)]
    pub total_merged: u64,

    /// Lifetime failed merges
    #[serde(default)]
    pub total_failed: u64,

    /// Lifetime skipped merge requests
    #[serde(default)]
    pub total_skipped: u64,

    /// Merges recorded on `counted_on`
    #[serde(default)]
    pub today_merged: u64,

    /// Failures recorded on `counted_on`
    #[serde(default)]
    pub today_failed: u64,

    /// UTC day the today counters belong to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub counted_on: Option<NaiveDate>,
}

impl RefineryStats {
    /// Record a successful merge on the given day
    pub fn record_merged(&mut self, day: NaiveDate) {
        self.roll_to(day);
        self.total_merged += 1;
        self.today_merged += 1;
    }

    /// Record a failed merge on the given day
    pub fn record_failed(&mut self, day: NaiveDate) {
        self.roll_to(day);
        self.total_failed += 1;
        self.today_failed += 1;
    }

    /// Record a skipped merge request on the given day
    pub fn record_skipped(&mut self, day: NaiveDate) {
        self.roll_to(day);
        self.total_skipped += 1;
    }

    /// Reset the today counters when the day has changed
    fn roll_to(&mut self, day: NaiveDate) {
        if self.counted_on != Some(day) {
            self.today_merged = 0;
            self.today_failed = 0;
            self.counted_on = Some(day);
        }
    }
}

/// A rig's merge queue processor record
///
/// Created implicitly on first load, mutated only through the manager,
/// never deleted. A `stopped` record carries no pid and no current merge
/// request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Refinery {
    /// Rig this refinery processes
    pub rig_name: String,

    /// Current running state
    pub state: RefineryState,

    /// Owning process, when one is recorded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,

    /// When the refinery was started
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,

    /// Merge request currently being processed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_mr: Option<MergeRequest>,

    /// When the last successful merge happened
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_merge_at: Option<DateTime<Utc>>,

    /// Cumulative statistics
    #[serde(default)]
    pub stats: RefineryStats,
}

impl Refinery {
    /// Create a default stopped record for a rig
    pub fn new(rig_name: impl Into<String>) -> Self {
        Self {
            rig_name: rig_name.into(),
            state: RefineryState::Stopped,
            pid: None,
            started_at: None,
            current_mr: None,
            last_merge_at: None,
            stats: RefineryStats::default(),
        }
    }

    /// Transition to stopped, clearing the pid and current merge request
    pub fn mark_stopped(&mut self) {
        self.state = RefineryState::Stopped;
        self.pid = None;
        self.current_mr = None;
    }
}

/// An item in the merge queue, for display
///
/// Position 0 is the actively processing request; pending requests follow
/// at 1..N in discovery order. Never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub position: usize,
    pub mr: MergeRequest,
    pub age: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_mr() -> MergeRequest {
        MergeRequest {
            id: "mr-nux-1755700000".to_string(),
            branch: "polecat/nux/gt-abc".to_string(),
            worker: "nux".to_string(),
            issue_id: "gt-abc".to_string(),
            swarm_id: Some("swarm-7".to_string()),
            target_branch: "main".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 8, 20, 9, 30, 0).unwrap(),
            status: MrStatus::Pending,
            error: None,
        }
    }

    #[test]
    fn test_new_record_is_stopped() {
        let record = Refinery::new("gastown");
        assert_eq!(record.rig_name, "gastown");
        assert_eq!(record.state, RefineryState::Stopped);
        assert!(record.pid.is_none());
        assert!(record.current_mr.is_none());
        assert_eq!(record.stats.total_merged, 0);
    }

    #[test]
    fn test_mark_stopped_clears_ownership() {
        let mut record = Refinery::new("gastown");
        record.state = RefineryState::Running;
        record.pid = Some(1234);
        record.current_mr = Some(sample_mr());

        record.mark_stopped();

        assert_eq!(record.state, RefineryState::Stopped);
        assert!(record.pid.is_none());
        assert!(record.current_mr.is_none());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(RefineryState::Stopped.to_string(), "stopped");
        assert_eq!(RefineryState::Running.to_string(), "running");
        assert_eq!(RefineryState::Paused.to_string(), "paused");
    }

    #[test]
    fn test_mr_status_display() {
        assert_eq!(MrStatus::Pending.to_string(), "pending");
        assert_eq!(MrStatus::Processing.to_string(), "processing");
        assert_eq!(MrStatus::Merged.to_string(), "merged");
        assert_eq!(MrStatus::Failed.to_string(), "failed");
        assert_eq!(MrStatus::Skipped.to_string(), "skipped");
    }

    #[test]
    fn test_optional_fields_omitted_when_absent() {
        let record = Refinery::new("gastown");
        let json = serde_json::to_string(&record).unwrap();

        assert!(json.contains("\"rig_name\""));
        assert!(json.contains("\"state\":\"stopped\""));
        assert!(json.contains("\"stats\""));
        assert!(!json.contains("\"pid\""));
        assert!(!json.contains("\"started_at\""));
        assert!(!json.contains("\"current_mr\""));
        assert!(!json.contains("\"last_merge_at\""));
    }

    #[test]
    fn test_full_record_round_trip() {
        let mut record = Refinery::new("gastown");
        record.state = RefineryState::Running;
        record.pid = Some(4242);
        record.started_at = Some(Utc.with_ymd_and_hms(2026, 8, 21, 8, 0, 0).unwrap());
        record.current_mr = Some(MergeRequest {
            status: MrStatus::Processing,
            error: Some("merge conflict in src/lib.rs".to_string()),
            ..sample_mr()
        });
        record.last_merge_at = Some(Utc.with_ymd_and_hms(2026, 8, 21, 7, 45, 0).unwrap());
        record.stats.record_merged(record.started_at.unwrap().date_naive());

        let json = serde_json::to_string_pretty(&record).unwrap();
        let parsed: Refinery = serde_json::from_str(&json).unwrap();

        // Value comparison catches any field the typed asserts miss
        assert_eq!(
            serde_json::to_value(&parsed).unwrap(),
            serde_json::to_value(&record).unwrap()
        );
        assert_eq!(parsed.pid, Some(4242));
        assert_eq!(parsed.started_at, record.started_at);
        let mr = parsed.current_mr.unwrap();
        assert_eq!(mr.status, MrStatus::Processing);
        assert_eq!(mr.swarm_id.as_deref(), Some("swarm-7"));
        assert_eq!(mr.error.as_deref(), Some("merge conflict in src/lib.rs"));
        assert_eq!(parsed.stats.total_merged, 1);
        assert_eq!(parsed.stats.today_merged, 1);
    }

    #[test]
    fn test_deserialize_external_layout() {
        // Layout other gastown tooling writes: issue_id present but empty,
        // omitempty fields absent.
        let json = r#"{
            "rig_name": "gastown",
            "state": "running",
            "pid": 1234,
            "started_at": "2026-08-21T08:00:00Z",
            "current_mr": {
                "id": "mr-nux-1755700000",
                "branch": "polecat/nux",
                "worker": "nux",
                "issue_id": "",
                "target_branch": "main",
                "created_at": "2026-08-20T09:30:00Z",
                "status": "processing"
            },
            "stats": {
                "total_merged": 12,
                "total_failed": 3,
                "total_skipped": 1,
                "today_merged": 2,
                "today_failed": 0
            }
        }"#;

        let record: Refinery = serde_json::from_str(json).unwrap();
        assert_eq!(record.state, RefineryState::Running);
        assert_eq!(record.pid, Some(1234));
        let mr = record.current_mr.unwrap();
        assert_eq!(mr.issue_id, "");
        assert!(mr.swarm_id.is_none());
        assert_eq!(record.stats.total_merged, 12);
        assert!(record.stats.counted_on.is_none());
    }

    #[test]
    fn test_stats_day_rollover() {
        let day1 = NaiveDate::from_ymd_opt(2026, 8, 20).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        let mut stats = RefineryStats::default();
        stats.record_merged(day1);
        stats.record_merged(day1);
        stats.record_failed(day1);
        assert_eq!(stats.today_merged, 2);
        assert_eq!(stats.today_failed, 1);

        stats.record_merged(day2);
        assert_eq!(stats.today_merged, 1);
        assert_eq!(stats.today_failed, 0);
        assert_eq!(stats.total_merged, 3);
        assert_eq!(stats.total_failed, 1);
        assert_eq!(stats.counted_on, Some(day2));
    }

    #[test]
    fn test_skipped_does_not_touch_today_counters() {
        let day = NaiveDate::from_ymd_opt(2026, 8, 21).unwrap();

        let mut stats = RefineryStats::default();
        stats.record_skipped(day);
        assert_eq!(stats.total_skipped, 1);
        assert_eq!(stats.today_merged, 0);
        assert_eq!(stats.today_failed, 0);
    }
}
