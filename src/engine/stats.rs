//! 実行統計とヘルス状態
//!
//! # 主要な型
//!
//! - [`StageStats`][]: ステージ単位の統計（実行回数、成功、失敗、平均時間）
//! - [`RunStatistics`][]: コーディネーター全体の実行統計
//! - [`StageHealth`][] / [`SystemHealth`][]: ヘルスチェック結果

use std::time::Duration;

use serde::Serialize;

use crate::engine::result::RunStatus;
use crate::stage::StageKind;

/// 成功率がこの値を下回るとステージは degraded になる
pub const DEGRADED_SUCCESS_RATIO: f64 = 0.5;

/// ステージ単位の統計
///
/// リトライエグゼキューターの呼び出し 1 回につき 1 回だけ更新されます
/// （試行ごとではありません）。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct StageStats {
    pub executions: u64,
    pub successes: u64,
    pub failures: u64,
    pub total_time: Duration,
}

impl StageStats {
    /// 平均実行時間（未実行なら 0）
    pub fn average_time(&self) -> Duration {
        if self.executions == 0 {
            return Duration::ZERO;
        }
        self.total_time.div_f64(self.executions as f64)
    }

    /// 成功率（未実行なら `None`）
    pub fn success_ratio(&self) -> Option<f64> {
        (self.executions > 0).then(|| self.successes as f64 / self.executions as f64)
    }

    pub(crate) fn record(&mut self, success: bool, elapsed: Duration) {
        self.executions += 1;
        if success {
            self.successes += 1;
        } else {
            self.failures += 1;
        }
        self.total_time += elapsed;
    }
}

/// ヘルス状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// ステージのヘルスチェック結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageHealth {
    pub stage: StageKind,
    pub status: HealthStatus,
    pub issues: Vec<String>,
    pub stats: StageStats,
}

/// システム全体のヘルスチェック結果
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub healthy_stages: usize,
    pub total_stages: usize,
    pub stages: Vec<StageHealth>,
}

impl SystemHealth {
    /// ステージごとの結果から全体の状態を集約
    ///
    /// - 全ステージが healthy → healthy
    /// - healthy なステージが半数未満 → unhealthy
    /// - それ以外 → degraded
    pub fn aggregate(stages: Vec<StageHealth>) -> Self {
        let total = stages.len();
        let healthy = stages
            .iter()
            .filter(|s| s.status == HealthStatus::Healthy)
            .count();

        let status = if healthy == total {
            HealthStatus::Healthy
        } else if healthy * 2 < total {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Degraded
        };

        Self {
            status,
            healthy_stages: healthy,
            total_stages: total,
            stages,
        }
    }
}

/// コーディネーター全体の実行統計
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RunStatistics {
    pub total_runs: u64,
    /// approved または completed で終わった実行
    pub successes: u64,
    pub failures: u64,
    pub rejected: u64,
    pub pending_review: u64,
    pub total_time: Duration,
}

impl RunStatistics {
    pub fn average_time(&self) -> Duration {
        if self.total_runs == 0 {
            return Duration::ZERO;
        }
        self.total_time.div_f64(self.total_runs as f64)
    }

    pub(crate) fn record(&mut self, status: RunStatus, elapsed: Duration) {
        self.total_runs += 1;
        self.total_time += elapsed;
        match status {
            RunStatus::Approved | RunStatus::Completed => self.successes += 1,
            RunStatus::Failed => self.failures += 1,
            RunStatus::Rejected => self.rejected += 1,
            RunStatus::PendingReview => self.pending_review += 1,
        }
    }
}
