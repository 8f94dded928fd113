//! audit ステージ: 監査レコードの記録
//!
//! # 責務
//!
//! - 実行全体の要約 [`AuditRecord`] を組み立てる
//!   - 請求書の要約（既定では取引先名をマスクし、金額を 100 単位に丸める）
//!   - 実行されたステージと各ステージの信頼度、エラー・警告件数
//!   - 検証スコア、コンプライアンススコア、エラー率
//!   - 最終ステータス
//! - 監査ログコラボレーターに追記する
//!
//! 書き込みの失敗はインフラ障害としてリトライ対象になります。

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::StageError;
use crate::model::{ApprovalLevel, CheckStatus, Invoice, ProcessingStatus, Severity};
use crate::provider::AuditSink;
use crate::scoring::CheckTally;
use super::{Stage, StageInput, StageKind};

/// マスクせずに残す先頭文字数
const VISIBLE_CHARS: usize = 3;

/// 監査レコード上の最終ステータス
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditStatus {
    CompletedSuccess,
    CompletedFailure,
    CompletedPending,
    CompletedUnknown,
}

/// 請求書の要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvoiceSummary {
    pub invoice_number: String,
    pub vendor: String,
    pub buyer: String,
    pub total_amount: f64,
    pub currency: String,
    pub region: String,
    pub status: ProcessingStatus,
    pub line_item_count: usize,
}

/// ワークフロー実行の要約
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInfo {
    pub workflow: String,
    pub executed_stages: Vec<StageKind>,
    pub stage_confidences: BTreeMap<StageKind, f64>,
    pub error_count: usize,
    pub warning_count: usize,
}

/// 品質指標
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub validation_score: Option<f64>,
    pub compliance_score: Option<f64>,
    pub error_rate: f64,
}

/// コンプライアンス情報
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceInfo {
    pub region: Option<String>,
    /// high のコンプライアンスエラーがない
    pub regulatory_requirements_met: bool,
    pub approval_level: Option<ApprovalLevel>,
}

/// 監査レコード
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// `audit_<uuid>`
    pub audit_id: String,
    pub session_id: String,
    pub timestamp: DateTime<Utc>,
    pub invoice: Option<InvoiceSummary>,
    pub workflow: WorkflowInfo,
    pub quality: QualityMetrics,
    pub compliance: ComplianceInfo,
    pub final_status: AuditStatus,
}

impl AuditRecord {
    /// コンテキストから監査レコードを組み立てる
    pub fn from_context(ctx: &RunContext, retain_sensitive: bool) -> Self {
        let invoice = ctx.invoice().map(|invoice| summarize(invoice, retain_sensitive));

        let results = ctx.stage_results();
        let workflow = WorkflowInfo {
            workflow: ctx.workflow_name().to_string(),
            executed_stages: ctx.executed_stages(),
            stage_confidences: results
                .iter()
                .map(|(stage, result)| (*stage, result.confidence()))
                .collect(),
            error_count: results.values().map(|r| r.errors().len()).sum(),
            warning_count: results.values().map(|r| r.warnings().len()).sum(),
        };

        let all_checks: Vec<_> = ctx
            .validation_checks()
            .iter()
            .chain(ctx.compliance_checks())
            .cloned()
            .collect();
        let quality = QualityMetrics {
            validation_score: ctx.validation_score(),
            compliance_score: ctx.compliance_score(),
            error_rate: CheckTally::of(&all_checks).error_rate(),
        };

        let compliance = ComplianceInfo {
            region: ctx.invoice().map(|invoice| invoice.region.clone()),
            regulatory_requirements_met: !ctx
                .compliance_checks()
                .iter()
                .any(|c| c.status == CheckStatus::Error && c.severity == Severity::High),
            approval_level: ctx.approval_requirement().map(|r| r.level),
        };

        let final_status = match ctx.invoice().map(Invoice::status) {
            Some(ProcessingStatus::Approved) => AuditStatus::CompletedSuccess,
            Some(ProcessingStatus::Rejected | ProcessingStatus::Error) => AuditStatus::CompletedFailure,
            _ if ctx.review_required() => AuditStatus::CompletedPending,
            _ => AuditStatus::CompletedUnknown,
        };

        Self {
            audit_id: format!("audit_{}", uuid::Uuid::new_v4()),
            session_id: ctx.session_id().to_string(),
            timestamp: Utc::now(),
            invoice,
            workflow,
            quality,
            compliance,
            final_status,
        }
    }
}

fn summarize(invoice: &Invoice, retain_sensitive: bool) -> InvoiceSummary {
    let (vendor, buyer, total_amount) = if retain_sensitive {
        (
            invoice.vendor.name.clone(),
            invoice.buyer.name.clone(),
            invoice.total_amount,
        )
    } else {
        (
            mask(&invoice.vendor.name),
            mask(&invoice.buyer.name),
            round_to_hundred(invoice.total_amount),
        )
    };

    InvoiceSummary {
        invoice_number: invoice.invoice_number.clone(),
        vendor,
        buyer,
        total_amount,
        currency: invoice.currency.clone(),
        region: invoice.region.clone(),
        status: invoice.status(),
        line_item_count: invoice.line_items.len(),
    }
}

/// 先頭 3 文字以降を `***` に置き換える
fn mask(name: &str) -> String {
    if name.chars().count() <= VISIBLE_CHARS {
        return name.to_string();
    }
    let visible: String = name.chars().take(VISIBLE_CHARS).collect();
    format!("{}***", visible)
}

fn round_to_hundred(amount: f64) -> f64 {
    (amount / 100.0).round() * 100.0
}

/// audit ステージ
pub struct AuditStage {
    sink: Arc<dyn AuditSink>,
    retain_sensitive: bool,
}

impl AuditStage {
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        Self {
            sink,
            retain_sensitive: false,
        }
    }

    /// 取引先名と金額をそのまま記録する
    pub fn retain_sensitive(mut self, retain: bool) -> Self {
        self.retain_sensitive = retain;
        self
    }
}

#[async_trait]
impl Stage for AuditStage {
    fn kind(&self) -> StageKind {
        StageKind::Audit
    }

    fn validate_input(&self, _input: &StageInput) -> bool {
        true
    }

    async fn execute(
        &self,
        _input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        let record = AuditRecord::from_context(ctx, self.retain_sensitive);
        self.sink.append(&record).await?;

        let mut result = StageResult::new(StageKind::Audit);
        result.add_step(
            "audit_logged",
            format!("Recorded {} ({:?})", record.audit_id, record.final_status),
        );

        tracing::info!(
            session_id = %ctx.session_id(),
            audit_id = %record.audit_id,
            "監査レコードを記録"
        );
        ctx.set_audit_record(record);
        Ok(result.with_confidence(1.0))
    }
}
