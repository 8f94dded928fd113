//! 請求書ドメインモデル
//!
//! # 責務
//!
//! - 抽出ステージが生成し、後続ステージへ引き継がれる [`Invoice`] の定義
//! - 処理ステータス [`ProcessingStatus`] の DAG と遷移権限の強制
//!
//! # ステータス遷移
//!
//! ```text
//! pending ─→ processing ─→ validated ─→ approved
//!                 │              └─────→ rejected
//!                 └─→ approved / rejected（検証スキップ時）
//!
//! error: 終端以外のどの状態からも遷移可能、かつ終端
//! ```
//!
//! - `validated` を設定できるのは validate ステージのみ
//! - `approved` / `rejected` を設定できるのは decide ステージのみ
//! - `error` はどのステージからも設定可能

use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::TransitionError;
use crate::stage::StageKind;

/// 処理ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Validated,
    Approved,
    Rejected,
    Error,
}

impl ProcessingStatus {
    /// 終端ステータスかどうか（approved / rejected / error）
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessingStatus::Approved | ProcessingStatus::Rejected | ProcessingStatus::Error
        )
    }

    /// DAG 上で `self -> to` の辺が存在するか
    pub fn can_transition_to(self, to: ProcessingStatus) -> bool {
        use ProcessingStatus::*;

        if self.is_terminal() {
            return false;
        }

        matches!(
            (self, to),
            (Pending, Processing)
                | (Processing, Validated)
                | (Processing, Approved)
                | (Processing, Rejected)
                | (Validated, Approved)
                | (Validated, Rejected)
                | (_, Error)
        )
    }

    fn permitted_for(self, stage: StageKind) -> bool {
        match self {
            ProcessingStatus::Validated => stage == StageKind::Validate,
            ProcessingStatus::Approved | ProcessingStatus::Rejected => stage == StageKind::Decide,
            _ => true,
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Validated => "validated",
            ProcessingStatus::Approved => "approved",
            ProcessingStatus::Rejected => "rejected",
            ProcessingStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// 取引先（販売者 / 購入者）
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Party {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tax_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

impl Party {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// 請求明細
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub description: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
}

impl LineItem {
    pub fn new(description: impl Into<String>, quantity: f64, unit_price: f64, total: f64) -> Self {
        Self {
            description: description.into(),
            quantity,
            unit_price,
            total,
        }
    }
}

/// 請求書（ドメインレコード）
///
/// 抽出ステージで生成され、[`RunContext`](crate::engine::RunContext) を通じて
/// 後続ステージへ引き継がれます。ステータスは [`Invoice::transition`] でのみ変更できます。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub invoice_number: String,
    pub date: Option<NaiveDate>,
    pub due_date: Option<NaiveDate>,
    pub vendor: Party,
    pub buyer: Party,
    pub line_items: Vec<LineItem>,
    pub currency: String,
    pub subtotal: f64,
    pub total_tax: f64,
    pub discount_amount: f64,
    pub total_amount: f64,
    pub region: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    status: ProcessingStatus,
}

impl Invoice {
    /// ステータス `pending` の請求書を生成
    pub fn new(
        invoice_number: impl Into<String>,
        vendor: Party,
        buyer: Party,
        currency: impl Into<String>,
        total_amount: f64,
        region: impl Into<String>,
    ) -> Self {
        Self {
            invoice_number: invoice_number.into(),
            date: None,
            due_date: None,
            vendor,
            buyer,
            line_items: Vec::new(),
            currency: currency.into(),
            subtotal: 0.0,
            total_tax: 0.0,
            discount_amount: 0.0,
            total_amount,
            region: region.into(),
            source_file: None,
            confidence: None,
            status: ProcessingStatus::Pending,
        }
    }

    pub fn status(&self) -> ProcessingStatus {
        self.status
    }

    /// ステータスを遷移させる
    ///
    /// # 引数
    ///
    /// - `to`: 遷移先
    /// - `by`: 遷移を要求するステージ
    ///
    /// # エラー
    ///
    /// - [`TransitionError::NotPermitted`] - ステージにその遷移の権限がない
    /// - [`TransitionError::Illegal`] - DAG 上にない遷移（終端からの遷移を含む）
    pub fn transition(&mut self, to: ProcessingStatus, by: StageKind) -> Result<(), TransitionError> {
        if !to.permitted_for(by) {
            return Err(TransitionError::NotPermitted {
                stage: by.to_string(),
                to,
            });
        }
        if !self.status.can_transition_to(to) {
            return Err(TransitionError::Illegal {
                from: self.status,
                to,
            });
        }

        tracing::debug!(
            invoice = %self.invoice_number,
            from = %self.status,
            to = %to,
            stage = %by,
            "請求書のステータスを遷移"
        );
        self.status = to;
        Ok(())
    }

    /// 明細合計
    pub fn line_items_total(&self) -> f64 {
        self.line_items.iter().map(|item| item.total).sum()
    }

    /// 小計 + 税 − 値引き
    pub fn expected_total(&self) -> f64 {
        self.subtotal + self.total_tax - self.discount_amount
    }

    /// 実効税率（小計が 0 以下なら `None`）
    pub fn effective_tax_rate(&self) -> Option<f64> {
        (self.subtotal > 0.0).then(|| self.total_tax / self.subtotal)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_invoice() -> Invoice {
        Invoice::new(
            "INV-001",
            Party::named("Acme Corp"),
            Party::named("Globex"),
            "USD",
            108.0,
            "US",
        )
    }

    #[test]
    fn test_new_invoice_is_pending() {
        assert_eq!(sample_invoice().status(), ProcessingStatus::Pending);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut invoice = sample_invoice();

        invoice.transition(ProcessingStatus::Processing, StageKind::Extract).unwrap();
        invoice.transition(ProcessingStatus::Validated, StageKind::Validate).unwrap();
        invoice.transition(ProcessingStatus::Approved, StageKind::Decide).unwrap();

        assert_eq!(invoice.status(), ProcessingStatus::Approved);
    }

    #[test]
    fn test_only_validate_may_set_validated() {
        let mut invoice = sample_invoice();
        invoice.transition(ProcessingStatus::Processing, StageKind::Extract).unwrap();

        let err = invoice
            .transition(ProcessingStatus::Validated, StageKind::Comply)
            .unwrap_err();

        assert!(matches!(err, TransitionError::NotPermitted { .. }));
        assert_eq!(invoice.status(), ProcessingStatus::Processing);
    }

    #[test]
    fn test_only_decide_may_approve_or_reject() {
        let mut invoice = sample_invoice();
        invoice.transition(ProcessingStatus::Processing, StageKind::Extract).unwrap();

        assert!(invoice.transition(ProcessingStatus::Approved, StageKind::Validate).is_err());
        assert!(invoice.transition(ProcessingStatus::Rejected, StageKind::Audit).is_err());
        assert!(invoice.transition(ProcessingStatus::Rejected, StageKind::Decide).is_ok());
    }

    #[test]
    fn test_error_reachable_from_any_non_terminal_state() {
        for stage in [StageKind::Parse, StageKind::Comply, StageKind::Audit] {
            let mut invoice = sample_invoice();
            invoice.transition(ProcessingStatus::Error, stage).unwrap();
            assert_eq!(invoice.status(), ProcessingStatus::Error);
        }
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut invoice = sample_invoice();
        invoice.transition(ProcessingStatus::Error, StageKind::Extract).unwrap();

        let err = invoice
            .transition(ProcessingStatus::Processing, StageKind::Extract)
            .unwrap_err();
        assert_eq!(
            err,
            TransitionError::Illegal {
                from: ProcessingStatus::Error,
                to: ProcessingStatus::Processing,
            }
        );
        assert!(invoice.transition(ProcessingStatus::Error, StageKind::Extract).is_err());
    }

    #[test]
    fn test_pending_cannot_skip_to_validated() {
        let mut invoice = sample_invoice();
        let err = invoice
            .transition(ProcessingStatus::Validated, StageKind::Validate)
            .unwrap_err();

        assert!(matches!(err, TransitionError::Illegal { .. }));
    }

    #[test]
    fn test_totals() {
        let mut invoice = sample_invoice();
        invoice.line_items = vec![
            LineItem::new("Widget", 2.0, 25.0, 50.0),
            LineItem::new("Gadget", 1.0, 50.0, 50.0),
        ];
        invoice.subtotal = 100.0;
        invoice.total_tax = 8.0;

        assert_eq!(invoice.line_items_total(), 100.0);
        assert_eq!(invoice.expected_total(), 108.0);
        assert_eq!(invoice.effective_tax_rate(), Some(0.08));
    }
}
