//! 実行履歴
//!
//! コーディネーターは実行ごとに [`HistoryEntry`] を 1 件追加します。
//! 保持件数を超えた分は古いものから捨てられます。

use std::collections::{BTreeMap, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::engine::result::{RunResult, RunStatus};

/// `recent` の既定件数
pub const DEFAULT_RECENT: usize = 50;

/// 実行 1 回分の履歴
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HistoryEntry {
    pub session_id: String,
    pub workflow: String,
    pub status: RunStatus,
    pub elapsed: Duration,
    pub executed: usize,
    pub skipped: usize,
    pub error_count: usize,
    pub warning_count: usize,
    pub timestamp: DateTime<Utc>,
}

impl From<&RunResult> for HistoryEntry {
    fn from(result: &RunResult) -> Self {
        Self {
            session_id: result.session_id.clone(),
            workflow: result.workflow.clone(),
            status: result.status,
            elapsed: result.elapsed,
            executed: result.step_counts.executed,
            skipped: result.step_counts.skipped,
            error_count: result.errors.len(),
            warning_count: result.warnings.len(),
            timestamp: result.started_at,
        }
    }
}

/// 件数上限付きの実行履歴
#[derive(Debug, Clone)]
pub struct ExecutionHistory {
    entries: VecDeque<HistoryEntry>,
    limit: usize,
}

impl ExecutionHistory {
    pub fn new(limit: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            limit,
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        if self.limit == 0 {
            return;
        }
        while self.entries.len() >= self.limit {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    /// 直近 `limit` 件（古い順）
    pub fn recent(&self, limit: usize) -> Vec<HistoryEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }

    /// 履歴全体の集計
    pub fn statistics(&self) -> WorkflowStatistics {
        let total = self.entries.len();
        let mut by_workflow = BTreeMap::new();
        let mut by_status = BTreeMap::new();
        let mut elapsed = Duration::ZERO;

        for entry in &self.entries {
            *by_workflow.entry(entry.workflow.clone()).or_insert(0) += 1;
            *by_status.entry(entry.status).or_insert(0) += 1;
            elapsed += entry.elapsed;
        }

        let succeeded = self
            .entries
            .iter()
            .filter(|e| matches!(e.status, RunStatus::Approved | RunStatus::Completed))
            .count();

        WorkflowStatistics {
            total,
            by_workflow,
            by_status,
            average_elapsed: if total == 0 {
                Duration::ZERO
            } else {
                elapsed.div_f64(total as f64)
            },
            success_rate: if total == 0 {
                0.0
            } else {
                succeeded as f64 / total as f64
            },
        }
    }
}

/// 履歴の集計結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowStatistics {
    pub total: usize,
    pub by_workflow: BTreeMap<String, usize>,
    pub by_status: BTreeMap<RunStatus, usize>,
    pub average_elapsed: Duration,
    /// approved または completed の割合
    pub success_rate: f64,
}
