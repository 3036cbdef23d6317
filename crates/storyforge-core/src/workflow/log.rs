//! Rolling execution history for triggered workflow runs.
//!
//! An append-only ring capped at 200 entries. Every trigger firing --
//! scheduled, event, or manual -- records exactly one entry, begun when
//! the launch starts and finished when it settles.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value;
use tokio::sync::RwLock;

use storyforge_types::scheduler::{
    ExecutionLogEntry, ExecutionStats, ExecutionStatus, TriggerType,
};

/// Maximum number of retained entries; older ones roll off.
pub const MAX_HISTORY: usize = 200;

/// In-memory rolling log of trigger executions.
pub struct ExecutionLog {
    entries: RwLock<VecDeque<ExecutionLogEntry>>,
    // Monotonic per-process sequence, disambiguates same-millisecond ids.
    seq: AtomicU64,
}

impl Default for ExecutionLog {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionLog {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(VecDeque::with_capacity(MAX_HISTORY)),
            seq: AtomicU64::new(0),
        }
    }

    /// Record the start of an execution. Returns the entry id.
    pub async fn begin(
        &self,
        workflow_name: &str,
        trigger_type: TriggerType,
        parameters: Option<Value>,
    ) -> String {
        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("exec-{}-{seq}", Utc::now().timestamp_millis());

        let entry = ExecutionLogEntry {
            id: id.clone(),
            workflow_name: workflow_name.to_string(),
            trigger_type,
            status: ExecutionStatus::Running,
            started_at: Utc::now(),
            finished_at: None,
            error: None,
            parameters,
        };

        let mut entries = self.entries.write().await;
        if entries.len() >= MAX_HISTORY {
            entries.pop_front();
        }
        entries.push_back(entry);
        id
    }

    /// Settle an execution. Unknown ids are ignored (the entry may have
    /// rolled off the ring).
    pub async fn finish(&self, id: &str, status: ExecutionStatus, error: Option<String>) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.iter_mut().find(|e| e.id == id) {
            entry.status = status;
            entry.finished_at = Some(Utc::now());
            entry.error = error;
        }
    }

    /// The `n` most recent entries, newest first.
    pub async fn get_recent(&self, n: usize) -> Vec<ExecutionLogEntry> {
        let entries = self.entries.read().await;
        entries.iter().rev().take(n).cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<ExecutionLogEntry> {
        let entries = self.entries.read().await;
        entries.iter().find(|e| e.id == id).cloned()
    }

    /// The most recent entry for a workflow, if any remains in the ring.
    pub async fn last_for(&self, workflow_name: &str) -> Option<ExecutionLogEntry> {
        let entries = self.entries.read().await;
        entries
            .iter()
            .rev()
            .find(|e| e.workflow_name == workflow_name)
            .cloned()
    }

    /// Status counts over the retained window.
    pub async fn stats(&self) -> ExecutionStats {
        let entries = self.entries.read().await;
        let mut stats = ExecutionStats::default();
        for entry in entries.iter() {
            match entry.status {
                ExecutionStatus::Running => stats.running += 1,
                ExecutionStatus::Success => stats.success += 1,
                ExecutionStatus::Failed => stats.failed += 1,
                ExecutionStatus::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn clear(&self) {
        self.entries.write().await.clear();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_begin_and_finish_lifecycle() {
        let log = ExecutionLog::new();
        let id = log
            .begin("story-development", TriggerType::Manual, None)
            .await;
        assert!(id.starts_with("exec-"));

        let entry = log.get(&id).await.expect("entry exists");
        assert_eq!(entry.status, ExecutionStatus::Running);
        assert!(entry.finished_at.is_none());

        log.finish(&id, ExecutionStatus::Success, None).await;
        let entry = log.get(&id).await.unwrap();
        assert_eq!(entry.status, ExecutionStatus::Success);
        assert!(entry.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_ids_are_unique_within_a_millisecond() {
        let log = ExecutionLog::new();
        let a = log.begin("wf", TriggerType::Manual, None).await;
        let b = log.begin("wf", TriggerType::Manual, None).await;
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_ring_caps_at_max_history() {
        let log = ExecutionLog::new();
        let first = log.begin("wf-0", TriggerType::Scheduled, None).await;
        for i in 1..=MAX_HISTORY {
            log.begin(&format!("wf-{i}"), TriggerType::Scheduled, None)
                .await;
        }
        assert_eq!(log.len().await, MAX_HISTORY);
        // The oldest entry rolled off.
        assert!(log.get(&first).await.is_none());
    }

    #[tokio::test]
    async fn test_get_recent_newest_first() {
        let log = ExecutionLog::new();
        log.begin("first", TriggerType::Manual, None).await;
        log.begin("second", TriggerType::Manual, None).await;
        log.begin("third", TriggerType::Manual, None).await;

        let recent = log.get_recent(2).await;
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].workflow_name, "third");
        assert_eq!(recent[1].workflow_name, "second");
    }

    #[tokio::test]
    async fn test_last_for_workflow() {
        let log = ExecutionLog::new();
        let a = log.begin("alpha", TriggerType::Event, None).await;
        log.begin("beta", TriggerType::Event, None).await;
        let b = log.begin("alpha", TriggerType::Event, None).await;

        let last = log.last_for("alpha").await.unwrap();
        assert_eq!(last.id, b);
        assert_ne!(last.id, a);
        assert!(log.last_for("gamma").await.is_none());
    }

    #[tokio::test]
    async fn test_stats_counts_by_status() {
        let log = ExecutionLog::new();
        let a = log.begin("wf", TriggerType::Manual, None).await;
        let b = log.begin("wf", TriggerType::Manual, None).await;
        log.begin("wf", TriggerType::Manual, None).await;
        log.finish(&a, ExecutionStatus::Success, None).await;
        log.finish(&b, ExecutionStatus::Failed, Some("boom".to_string()))
            .await;

        let stats = log.stats().await;
        assert_eq!(stats.success, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
        assert_eq!(stats.cancelled, 0);
    }

    #[tokio::test]
    async fn test_finish_unknown_id_is_ignored() {
        let log = ExecutionLog::new();
        log.finish("exec-0-999", ExecutionStatus::Success, None).await;
        assert!(log.is_empty().await);
    }

    #[tokio::test]
    async fn test_clear() {
        let log = ExecutionLog::new();
        log.begin("wf", TriggerType::Manual, None).await;
        log.clear().await;
        assert!(log.is_empty().await);
    }
}
