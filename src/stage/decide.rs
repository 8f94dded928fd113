//! decide ステージ: 最終判定
//!
//! [`crate::decision::decide`] のルールチェーンをコンテキスト上の
//! 検証・コンプライアンス結果に適用し、請求書を `approved` / `rejected` に進めます。
//! エスカレーションの場合はステータスを変えず、手動レビューのシグナルを立てます。

use async_trait::async_trait;

use crate::decision::{decide, DecisionFactors, DecisionOutcome, DecisionThresholds};
use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::StageError;
use crate::model::ProcessingStatus;
use super::{Stage, StageInput, StageKind};

/// decide ステージ
#[derive(Debug, Clone, Default)]
pub struct DecideStage {
    thresholds: DecisionThresholds,
}

impl DecideStage {
    pub fn new(thresholds: DecisionThresholds) -> Self {
        Self { thresholds }
    }
}

#[async_trait]
impl Stage for DecideStage {
    fn kind(&self) -> StageKind {
        StageKind::Decide
    }

    fn validate_input(&self, input: &StageInput) -> bool {
        input.as_record().is_some()
    }

    async fn execute(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        if input.as_record().is_none() {
            return Err(StageError::Context("decide stage requires an invoice".to_string()));
        }
        let invoice = ctx
            .invoice()
            .ok_or_else(|| StageError::Context("no invoice in run context".to_string()))?;

        let factors = DecisionFactors {
            confidence: invoice.confidence.unwrap_or(0.0),
            validation: ctx.validation_checks(),
            compliance: ctx.compliance_checks(),
            approval: ctx.approval_requirement(),
            record_in_error: invoice.status() == ProcessingStatus::Error,
        };
        let decision = decide(&factors, &self.thresholds);

        let mut result = StageResult::new(StageKind::Decide);
        result.add_scored_step(
            "decision",
            format!("{} ({:?}): {}", decision.outcome, decision.rule, decision.reason),
            decision.confidence,
        );
        for warning in &decision.warnings {
            result.add_warning(warning.clone());
        }

        let target = match decision.outcome {
            DecisionOutcome::Approve => Some(ProcessingStatus::Approved),
            DecisionOutcome::Reject => Some(ProcessingStatus::Rejected),
            DecisionOutcome::Escalate => None,
        };
        if let Some(target) = target {
            let invoice = ctx
                .invoice_mut()
                .ok_or_else(|| StageError::Context("no invoice in run context".to_string()))?;
            if let Err(e) = invoice.transition(target, StageKind::Decide) {
                result.add_warning(format!("Status not updated: {}", e));
            }
        } else {
            result.add_step(
                "manual_review",
                format!(
                    "Escalated to {}",
                    decision.approver.as_deref().unwrap_or("reviewer")
                ),
            );
        }

        tracing::info!(
            session_id = %ctx.session_id(),
            outcome = %decision.outcome,
            confidence = decision.confidence,
            "判定が確定"
        );
        let confidence = decision.confidence;
        ctx.set_decision(decision);
        Ok(result.with_confidence(confidence))
    }
}
