//! 重要度重み付きスコア
//!
//! # 責務
//!
//! チェック結果のリストを [0.0, 1.0] の単一スコアに集約します。
//! validate / comply / decide / audit の各ステージが共通で使用します。
//!
//! # アルゴリズム
//!
//! - 重み: low=1, medium=2, high=3
//! - 寄与: pass → 重み×1.0, warning → 重み×0.7, error → 重み×0.0
//! - `info` は分子・分母の両方から除外
//! - スコア = Σ寄与 / Σ重み
//! - 計算対象のチェックがない場合は [`EmptyScore`] で指定した既定値
//!
//! 純粋関数であり、チェックの順序には依存しません。
//!
//! # 使用例
//!
//! ```rust
//! use invoice_pipeline::model::{CheckOutcome, Severity};
//! use invoice_pipeline::scoring::{severity_weighted_score, EmptyScore};
//!
//! let checks = vec![
//!     CheckOutcome::pass("a", Severity::Low, "ok"),
//!     CheckOutcome::warning("b", Severity::Medium, "hmm"),
//!     CheckOutcome::error("c", Severity::High, "bad"),
//! ];
//!
//! let score = severity_weighted_score(&checks, EmptyScore::NothingVerified);
//! assert!((score - 0.4).abs() < 1e-9);
//! ```

use serde::Serialize;

use crate::model::{CheckOutcome, CheckStatus, Severity};

/// チェックが 1 件もないときの既定スコア
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyScore {
    /// 「何も検証されていない」= 0.0（validate ステージ）
    NothingVerified,
    /// 「失敗し得るチェックがない」= 1.0（comply / decide / audit）
    NothingToFail,
}

impl EmptyScore {
    fn value(self) -> f64 {
        match self {
            EmptyScore::NothingVerified => 0.0,
            EmptyScore::NothingToFail => 1.0,
        }
    }
}

/// 重要度重み付きスコアを計算
///
/// # 引数
///
/// - `checks`: チェック結果
/// - `empty`: 計算対象（`info` 以外）のチェックがない場合の既定値
///
/// # 戻り値
///
/// [0.0, 1.0] のスコア
pub fn severity_weighted_score(checks: &[CheckOutcome], empty: EmptyScore) -> f64 {
    let (earned, possible) = checks
        .iter()
        .filter_map(|c| c.status.factor().map(|factor| (c.severity.weight(), factor)))
        .fold((0.0, 0.0), |(earned, possible), (weight, factor)| {
            (earned + weight * factor, possible + weight)
        });

    if possible == 0.0 {
        return empty.value();
    }

    (earned / possible).clamp(0.0, 1.0)
}

/// チェック結果の件数集計
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckTally {
    pub total: usize,
    pub passed: usize,
    pub warnings: usize,
    pub errors: usize,
    pub info: usize,
    /// status=error かつ severity=high
    pub critical: usize,
}

impl CheckTally {
    pub fn of(checks: &[CheckOutcome]) -> Self {
        checks.iter().fold(Self::default(), |mut tally, check| {
            tally.total += 1;
            match check.status {
                CheckStatus::Pass => tally.passed += 1,
                CheckStatus::Warning => tally.warnings += 1,
                CheckStatus::Error => {
                    tally.errors += 1;
                    if check.severity == Severity::High {
                        tally.critical += 1;
                    }
                }
                CheckStatus::Info => tally.info += 1,
            }
            tally
        })
    }

    /// エラー率（info を除くチェック数に対するエラー数）
    pub fn error_rate(&self) -> f64 {
        let scored = self.total - self.info;
        if scored == 0 {
            0.0
        } else {
            self.errors as f64 / scored as f64
        }
    }
}
