//! Merge queue composition
//!
//! Folds the persisted record and a discovery pass into the ordered view
//! callers display.

use crate::style::format_age;
use crate::{MergeRequest, QueueItem, Refinery};

/// Build the displayable merge queue
///
/// The in-flight request (if any) sits at position 0; discovered requests
/// follow at 1..N in discovery order. A discovered branch that matches the
/// current request is listed as well: the queue reports both what is being
/// worked and what the remote advertises. Ages are computed here, at
/// emission time.
pub fn build_queue(record: &Refinery, discovered: Vec<MergeRequest>) -> Vec<QueueItem> {
    let mut items = Vec::with_capacity(discovered.len() + 1);

    if let Some(current) = &record.current_mr {
        items.push(QueueItem {
            position: 0,
            age: format_age(current.created_at),
            mr: current.clone(),
        });
    }

    for (i, mr) in discovered.into_iter().enumerate() {
        items.push(QueueItem {
            position: i + 1,
            age: format_age(mr.created_at),
            mr,
        });
    }

    items
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MrStatus;
    use chrono::{Duration, Utc};

    fn mr(branch: &str, status: MrStatus) -> MergeRequest {
        let (_, rest) = branch.split_once('/').unwrap();
        let worker = rest.split('/').next().unwrap();
        MergeRequest {
            id: format!("mr-{}-1755700000", worker),
            branch: branch.to_string(),
            worker: worker.to_string(),
            issue_id: String::new(),
            swarm_id: None,
            target_branch: "main".to_string(),
            created_at: Utc::now() - Duration::minutes(5),
            status,
            error: None,
        }
    }

    #[test]
    fn test_current_request_leads_the_queue() {
        let mut record = Refinery::new("gastown");
        record.current_mr = Some(mr("polecat/active", MrStatus::Processing));

        let discovered = vec![
            mr("polecat/w1/iss1", MrStatus::Pending),
            mr("polecat/w2", MrStatus::Pending),
        ];

        let queue = build_queue(&record, discovered);

        assert_eq!(queue.len(), 3);
        assert_eq!(queue[0].position, 0);
        assert_eq!(queue[0].mr.branch, "polecat/active");
        assert_eq!(queue[1].position, 1);
        assert_eq!(queue[1].mr.branch, "polecat/w1/iss1");
        assert_eq!(queue[2].position, 2);
        assert_eq!(queue[2].mr.branch, "polecat/w2");
    }

    #[test]
    fn test_positions_start_at_one_without_current() {
        let record = Refinery::new("gastown");
        let discovered = vec![
            mr("polecat/w1", MrStatus::Pending),
            mr("polecat/w2", MrStatus::Pending),
        ];

        let queue = build_queue(&record, discovered);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].position, 1);
        assert_eq!(queue[1].position, 2);
    }

    #[test]
    fn test_empty_queue_is_empty() {
        let record = Refinery::new("gastown");
        assert!(build_queue(&record, Vec::new()).is_empty());
    }

    #[test]
    fn test_rediscovered_current_branch_is_not_deduplicated() {
        let mut record = Refinery::new("gastown");
        record.current_mr = Some(mr("polecat/w1/iss1", MrStatus::Processing));

        let queue = build_queue(&record, vec![mr("polecat/w1/iss1", MrStatus::Pending)]);

        assert_eq!(queue.len(), 2);
        assert_eq!(queue[0].mr.branch, queue[1].mr.branch);
        assert_eq!(queue[0].mr.status, MrStatus::Processing);
        assert_eq!(queue[1].mr.status, MrStatus::Pending);
    }

    #[test]
    fn test_ages_are_rendered() {
        let record = Refinery::new("gastown");
        let queue = build_queue(&record, vec![mr("polecat/w1", MrStatus::Pending)]);
        assert_eq!(queue[0].age, "5m ago");
    }
}
