//! 承認権限の型定義

use std::fmt;

use serde::{Deserialize, Serialize};

/// 承認レベル
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalLevel {
    /// 自動承認可能
    Auto,
    Manager,
    Executive,
    Board,
    /// 地域ルールに承認上限がなく手動承認が必要
    Manual,
}

impl ApprovalLevel {
    /// 人の承認が必要かどうか
    pub fn requires_human(self) -> bool {
        !matches!(self, ApprovalLevel::Auto)
    }
}

impl fmt::Display for ApprovalLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApprovalLevel::Auto => "auto",
            ApprovalLevel::Manager => "manager",
            ApprovalLevel::Executive => "executive",
            ApprovalLevel::Board => "board",
            ApprovalLevel::Manual => "manual",
        };
        f.write_str(s)
    }
}

/// 金額と地域の承認上限から導かれる承認要件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRequirement {
    pub level: ApprovalLevel,
    /// 承認者（`system`, `manager`, `executive`, `board`）
    pub approver: String,
    /// 適用された上限額
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<f64>,
    pub reason: String,
}

impl ApprovalRequirement {
    pub fn requires_escalation(&self) -> bool {
        self.level.requires_human()
    }
}
