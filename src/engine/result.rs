//! 実行結果の型定義
//!
//! # 責務
//!
//! - ステージ実行結果 [`StageResult`] と処理ステップ [`ProcessingStep`] の型定義
//! - 1 回の実行結果 [`RunResult`] とバッチ結果 [`BatchResult`] の型定義
//! - 実行ステータス [`RunStatus`] と [`StepStatus`] の型定義
//! - 実行エラー [`ExecutionError`] の型定義
//!
//! # 主要な型
//!
//! - [`StageResult`][]: ステージ 1 回分の結果（信頼度、処理ステップ、エラー、警告、実行時間）
//! - [`RunResult`][]: ワークフロー 1 回分の結果（最終ステータス、請求書、ステージ別結果等）
//! - [`BatchResult`][]: 複数入力をまとめて処理した結果
//! - [`ExecutionError`][]: 実行前に同期的に拒否されるエラー
//!
//! # 使用例
//!
//! ```rust,no_run
//! use invoice_pipeline::engine::result::{RunResult, RunStatus};
//!
//! fn handle_result(result: RunResult) {
//!     match result.status {
//!         RunStatus::Approved => println!("承認: {}", result.session_id),
//!         RunStatus::Failed => println!("失敗: {:?}", result.errors),
//!         other => println!("{}: {}", other, result.session_id),
//!     }
//!
//!     if let Ok(json) = result.to_json() {
//!         println!("JSON: {}", json);
//!     }
//! }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::decision::Decision;
use crate::error::ConfigError;
use crate::model::Invoice;
use crate::stage::StageKind;

/// 処理ステップ
///
/// ステージ内で行った処理を時系列で記録します。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingStep {
    pub stage: StageKind,
    pub action: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

/// ステージ実行結果
///
/// ステージの実行ごとに新しく生成されます。
/// 信頼度は常に [0.0, 1.0] に丸められます。
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StageResult {
    stage: StageKind,
    confidence: f64,
    steps: Vec<ProcessingStep>,
    errors: Vec<String>,
    warnings: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    elapsed: Option<Duration>,
}

impl StageResult {
    /// 空の結果を生成（信頼度 0.0）
    pub fn new(stage: StageKind) -> Self {
        Self {
            stage,
            confidence: 0.0,
            steps: Vec::new(),
            errors: Vec::new(),
            warnings: Vec::new(),
            elapsed: None,
        }
    }

    /// 信頼度を設定した結果を返す
    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.set_confidence(confidence);
        self
    }

    pub fn set_confidence(&mut self, confidence: f64) {
        self.confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
    }

    /// 処理ステップを追加
    pub fn add_step(&mut self, action: impl Into<String>, message: impl Into<String>) {
        self.push_step(action.into(), message.into(), None);
    }

    /// 信頼度付きの処理ステップを追加
    pub fn add_scored_step(
        &mut self,
        action: impl Into<String>,
        message: impl Into<String>,
        confidence: f64,
    ) {
        self.push_step(action.into(), message.into(), Some(confidence));
    }

    fn push_step(&mut self, action: String, message: String, confidence: Option<f64>) {
        self.steps.push(ProcessingStep {
            stage: self.stage,
            action,
            message,
            timestamp: Utc::now(),
            confidence,
        });
    }

    pub fn add_error(&mut self, error: impl Into<String>) {
        self.errors.push(error.into());
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    pub(crate) fn set_elapsed(&mut self, elapsed: Duration) {
        self.elapsed = Some(elapsed);
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn steps(&self) -> &[ProcessingStep] {
        &self.steps
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn elapsed(&self) -> Option<Duration> {
        self.elapsed
    }

    /// エラーを含むかどうか（コーディネーターはこれを失敗ステップとして扱う）
    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }
}

/// ステップ実行ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// 成功（リトライなし）
    Success,

    /// 失敗
    Failed,

    /// リトライ後に成功
    Retried {
        /// リトライ回数
        attempts: u32,
    },

    /// スキップ条件により未実行
    Skipped,

    /// 必須ステップの失敗により未実行
    NotRun,
}

/// ワークフロー内の 1 ステップの実行記録
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepReport {
    pub stage: StageKind,
    pub required: bool,
    pub status: StepStatus,
    /// 試行回数（未実行なら 0）
    pub attempts: u32,
}

/// ステップ件数
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StepCounts {
    pub total: usize,
    pub executed: usize,
    pub skipped: usize,
    pub failed: usize,
}

/// 実行全体のステータス
///
/// 優先順位: failed > 請求書の終端ステータス > pending_review > completed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    Approved,
    Rejected,
    PendingReview,
    Failed,
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Completed => "completed",
            RunStatus::Approved => "approved",
            RunStatus::Rejected => "rejected",
            RunStatus::PendingReview => "pending_review",
            RunStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// ワークフロー 1 回分の実行結果
#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    pub session_id: String,
    pub workflow: String,
    pub status: RunStatus,
    pub invoice: Option<Invoice>,
    pub decision: Option<Decision>,
    /// ステージ別の結果（パイプライン順）
    pub stage_results: BTreeMap<StageKind, StageResult>,
    pub steps: Vec<StepReport>,
    /// ステージ名を接頭辞にしたエラー
    pub errors: Vec<String>,
    /// ステージ名を接頭辞にした警告
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
    pub confidence: f64,
    pub step_counts: StepCounts,
}

impl RunResult {
    /// 結果をJSON形式でシリアライズ
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn is_failed(&self) -> bool {
        self.status == RunStatus::Failed
    }
}

/// バッチ内の 1 件分の結果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BatchItem {
    /// 実行まで到達した入力
    Run(Box<RunResult>),
    /// 実行前に拒否された入力
    Rejected { source: String, error: String },
}

impl BatchItem {
    pub fn status(&self) -> RunStatus {
        match self {
            BatchItem::Run(result) => result.status,
            BatchItem::Rejected { .. } => RunStatus::Failed,
        }
    }
}

/// バッチ実行結果
#[derive(Debug, Clone, Serialize)]
pub struct BatchResult {
    pub batch_id: String,
    pub workflow: String,
    pub total: usize,
    pub processed: usize,
    /// 承認された件数
    pub successful: usize,
    pub failed: usize,
    pub pending_review: usize,
    pub items: Vec<BatchItem>,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

impl BatchResult {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// 実行エラー
///
/// ステージを 1 つも実行する前に同期的に拒否されるエラーです。
/// ステージの失敗はこのエラーにはならず、[`RunResult`] の `errors` と
/// `failed` ステータスとして返されます。
///
/// # エラー種別
///
/// - [`ExecutionError::ConfigError`] - 設定エラー（ワークフロー定義の不備等）
/// - [`ExecutionError::UnknownWorkflowError`] - 未登録のワークフロー名
/// - [`ExecutionError::UnknownStageError`] - コーディネーターに登録されていないステージ
/// - [`ExecutionError::ValidationError`] - 入力値の不備
#[derive(Debug, Error)]
#[allow(clippy::enum_variant_names)]
pub enum ExecutionError {
    /// 設定エラー
    #[error("設定エラー: {0}")]
    ConfigError(#[from] ConfigError),

    /// 未登録のワークフロー
    #[error("未登録のワークフローです: '{0}'")]
    UnknownWorkflowError(String),

    /// 未登録のステージ
    #[error("ワークフロー '{workflow}' のステージ '{stage}' は登録されていません")]
    UnknownStageError {
        workflow: String,
        stage: StageKind,
    },

    /// バリデーションエラー
    #[error("バリデーションエラー: {0}")]
    ValidationError(String),
}
