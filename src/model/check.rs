//! チェック結果の型定義
//!
//! 検証ステージとコンプライアンスステージが出力する個々のチェック結果です。
//! 各チェックは `status`（pass/warning/error/info）と `severity`（low/medium/high）を持ち、
//! [`crate::scoring`] の重み付きスコアと [`crate::decision`] のルールチェーンの入力になります。

use std::fmt;

use serde::{Deserialize, Serialize};

/// チェックのステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    /// 合格
    Pass,
    /// 警告
    Warning,
    /// エラー
    Error,
    /// 情報（スコア計算から除外）
    Info,
}

impl CheckStatus {
    /// スコア計算時の係数
    ///
    /// `Info` はスコア計算に含めないため `None` を返します。
    pub fn factor(self) -> Option<f64> {
        match self {
            CheckStatus::Pass => Some(1.0),
            CheckStatus::Warning => Some(0.7),
            CheckStatus::Error => Some(0.0),
            CheckStatus::Info => None,
        }
    }
}

/// チェックの重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl Severity {
    /// スコア計算時の重み（low=1, medium=2, high=3）
    pub fn weight(self) -> f64 {
        match self {
            Severity::Low => 1.0,
            Severity::Medium => 2.0,
            Severity::High => 3.0,
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        };
        f.write_str(s)
    }
}

/// 単一のチェック結果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckOutcome {
    /// チェック名（例: `required_fields`, `currency_code`）
    pub check: String,

    /// 対象フィールド（任意）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,

    pub status: CheckStatus,
    pub severity: Severity,

    /// 人間が読めるメッセージ
    pub message: String,
}

impl CheckOutcome {
    pub fn new(
        check: impl Into<String>,
        status: CheckStatus,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            check: check.into(),
            field: None,
            status,
            severity,
            message: message.into(),
        }
    }

    pub fn pass(check: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Pass, severity, message)
    }

    pub fn warning(check: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Warning, severity, message)
    }

    pub fn error(check: impl Into<String>, severity: Severity, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Error, severity, message)
    }

    pub fn info(check: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(check, CheckStatus::Info, Severity::Low, message)
    }

    /// 対象フィールドを設定
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    /// status=error かつ severity=high のチェックかどうか
    pub fn is_critical(&self) -> bool {
        self.status == CheckStatus::Error && self.severity == Severity::High
    }
}
