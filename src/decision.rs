//! 最終判定エンジン（承認 / 却下 / エスカレーション）
//!
//! # 責務
//!
//! 請求書の信頼度・検証結果・コンプライアンス結果・承認要件から、
//! 決定的な順序付きルールチェーンで最終判定を導きます。
//! 最初に発火したルールが判定を決め、それ以降のルールは評価しません。
//!
//! # ルール（評価順）
//!
//! 1. **重大エラー**: status=error かつ severity=high のチェックがある → 却下
//! 2. **信頼度**: `review` 未満 → 却下、`auto_approve` 未満 → エスカレーション
//! 3. **コンプライアンス**: high のコンプライアンスエラー → 却下、それ以外の指摘は警告
//! 4. **承認権限**: 自動承認上限を超える → 指定レベル（manager/executive/board）へエスカレーション
//! 5. **検証の深刻度**: エラー > 5、警告 > 10、または high の検証エラー → 却下
//! 6. **既定**: 承認
//!
//! 判定自体の信頼度は請求書の信頼度を基準に、承認 +0.1、却下 +0.05、
//! エスカレーション −0.1 で補正し [0, 1] に丸めます。

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::{ApprovalRequirement, CheckOutcome, CheckStatus, Severity};
use crate::scoring::CheckTally;

/// 検証エラー件数の上限（これを超えると却下）
pub const MAX_VALIDATION_ERRORS: usize = 5;

/// 検証警告件数の上限（これを超えると却下）
pub const MAX_VALIDATION_WARNINGS: usize = 10;

/// 判定の閾値
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DecisionThresholds {
    /// これ以上の信頼度なら自動判定を継続
    pub auto_approve: f64,
    /// これ未満の信頼度なら却下
    pub review: f64,
}

impl Default for DecisionThresholds {
    fn default() -> Self {
        Self {
            auto_approve: 0.95,
            review: 0.75,
        }
    }
}

/// 判定の入力
#[derive(Debug, Clone, Copy)]
pub struct DecisionFactors<'a> {
    /// 請求書の信頼度
    pub confidence: f64,
    pub validation: &'a [CheckOutcome],
    pub compliance: &'a [CheckOutcome],
    pub approval: Option<&'a ApprovalRequirement>,
    /// 請求書のステータスが error になっている
    pub record_in_error: bool,
}

/// 判定結果の種別
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecisionOutcome {
    Approve,
    Reject,
    Escalate,
}

impl DecisionOutcome {
    fn confidence_nudge(self) -> f64 {
        match self {
            DecisionOutcome::Approve => 0.1,
            DecisionOutcome::Reject => 0.05,
            DecisionOutcome::Escalate => -0.1,
        }
    }
}

impl fmt::Display for DecisionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionOutcome::Approve => "approve",
            DecisionOutcome::Reject => "reject",
            DecisionOutcome::Escalate => "escalate",
        };
        f.write_str(s)
    }
}

/// 判定を決めたルール
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionRule {
    CriticalError,
    Confidence,
    Compliance,
    Authority,
    ValidationSeverity,
    Default,
}

/// 最終判定
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Decision {
    pub outcome: DecisionOutcome,
    pub rule: DecisionRule,
    pub reason: String,
    /// 判定自体の信頼度
    pub confidence: f64,
    pub requires_manual_review: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approver: Option<String>,
    #[serde(default)]
    pub warnings: Vec<String>,
}

/// ルールチェーンを評価して判定を返す
///
/// 同じ入力に対しては常に同じ判定（理由文字列を含む）を返します。
pub fn decide(factors: &DecisionFactors<'_>, thresholds: &DecisionThresholds) -> Decision {
    let mut warnings = Vec::new();

    let verdict = critical_error_rule(factors)
        .or_else(|| confidence_rule(factors, thresholds))
        .or_else(|| compliance_rule(factors, &mut warnings))
        .or_else(|| authority_rule(factors))
        .or_else(|| validation_severity_rule(factors, &mut warnings))
        .unwrap_or_else(|| Verdict {
            outcome: DecisionOutcome::Approve,
            rule: DecisionRule::Default,
            reason: "All checks passed".to_string(),
            approver: Some("system".to_string()),
        });

    let confidence = (factors.confidence + verdict.outcome.confidence_nudge()).clamp(0.0, 1.0);

    Decision {
        outcome: verdict.outcome,
        rule: verdict.rule,
        reason: verdict.reason,
        confidence,
        requires_manual_review: verdict.outcome == DecisionOutcome::Escalate,
        approver: verdict.approver,
        warnings,
    }
}

struct Verdict {
    outcome: DecisionOutcome,
    rule: DecisionRule,
    reason: String,
    approver: Option<String>,
}

impl Verdict {
    fn reject(rule: DecisionRule, reason: String) -> Self {
        Self {
            outcome: DecisionOutcome::Reject,
            rule,
            reason,
            approver: None,
        }
    }

    fn escalate(rule: DecisionRule, reason: String, approver: &str) -> Self {
        Self {
            outcome: DecisionOutcome::Escalate,
            rule,
            reason,
            approver: Some(approver.to_string()),
        }
    }
}

fn describe(check: &CheckOutcome) -> String {
    format!("{}: {}", check.check, check.message)
}

fn critical_error_rule(factors: &DecisionFactors<'_>) -> Option<Verdict> {
    let mut offending: Vec<String> = factors
        .validation
        .iter()
        .chain(factors.compliance)
        .filter(|c| c.is_critical())
        .map(describe)
        .collect();

    if factors.record_in_error {
        offending.push("processing_status: invoice is in error state".to_string());
    }

    if offending.is_empty() {
        return None;
    }

    Some(Verdict::reject(
        DecisionRule::CriticalError,
        format!("Critical errors found: {}", offending.join("; ")),
    ))
}

fn confidence_rule(factors: &DecisionFactors<'_>, thresholds: &DecisionThresholds) -> Option<Verdict> {
    let confidence = factors.confidence;

    if confidence < thresholds.review {
        Some(Verdict::reject(
            DecisionRule::Confidence,
            format!(
                "Confidence {:.2} is below the review threshold {:.2}",
                confidence, thresholds.review
            ),
        ))
    } else if confidence < thresholds.auto_approve {
        Some(Verdict::escalate(
            DecisionRule::Confidence,
            format!(
                "Confidence {:.2} is below the auto-approval threshold {:.2}; manual review required",
                confidence, thresholds.auto_approve
            ),
            "reviewer",
        ))
    } else {
        None
    }
}

fn compliance_rule(factors: &DecisionFactors<'_>, warnings: &mut Vec<String>) -> Option<Verdict> {
    let high_errors: Vec<String> = factors
        .compliance
        .iter()
        .filter(|c| c.status == CheckStatus::Error && c.severity == Severity::High)
        .map(describe)
        .collect();

    if !high_errors.is_empty() {
        return Some(Verdict::reject(
            DecisionRule::Compliance,
            format!("Compliance violations: {}", high_errors.join("; ")),
        ));
    }

    warnings.extend(
        factors
            .compliance
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Error | CheckStatus::Warning))
            .map(|c| format!("Compliance issue: {}", describe(c))),
    );
    None
}

fn authority_rule(factors: &DecisionFactors<'_>) -> Option<Verdict> {
    let requirement = factors.approval.filter(|r| r.requires_escalation())?;

    Some(Verdict::escalate(
        DecisionRule::Authority,
        format!(
            "Amount requires {} approval: {}",
            requirement.level, requirement.reason
        ),
        &requirement.approver,
    ))
}

fn validation_severity_rule(
    factors: &DecisionFactors<'_>,
    warnings: &mut Vec<String>,
) -> Option<Verdict> {
    let tally = CheckTally::of(factors.validation);

    if tally.errors > MAX_VALIDATION_ERRORS {
        return Some(Verdict::reject(
            DecisionRule::ValidationSeverity,
            format!("Too many validation errors: {}", tally.errors),
        ));
    }
    if tally.warnings > MAX_VALIDATION_WARNINGS {
        return Some(Verdict::reject(
            DecisionRule::ValidationSeverity,
            format!("Too many validation warnings: {}", tally.warnings),
        ));
    }
    if tally.critical > 0 {
        return Some(Verdict::reject(
            DecisionRule::ValidationSeverity,
            format!("High-severity validation errors: {}", tally.critical),
        ));
    }

    warnings.extend(
        factors
            .validation
            .iter()
            .filter(|c| matches!(c.status, CheckStatus::Error | CheckStatus::Warning))
            .map(|c| format!("Validation issue: {}", describe(c))),
    );
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ApprovalLevel;

    fn factors<'a>(
        confidence: f64,
        validation: &'a [CheckOutcome],
        compliance: &'a [CheckOutcome],
        approval: Option<&'a ApprovalRequirement>,
    ) -> DecisionFactors<'a> {
        DecisionFactors {
            confidence,
            validation,
            compliance,
            approval,
            record_in_error: false,
        }
    }

    fn requirement(level: ApprovalLevel, approver: &str) -> ApprovalRequirement {
        ApprovalRequirement {
            level,
            approver: approver.to_string(),
            limit: Some(10_000.0),
            reason: "Amount 5000.00 exceeds auto-approval limit 1000.00".to_string(),
        }
    }

    #[test]
    fn test_default_rule_approves() {
        let decision = decide(&factors(0.97, &[], &[], None), &DecisionThresholds::default());

        assert_eq!(decision.outcome, DecisionOutcome::Approve);
        assert_eq!(decision.rule, DecisionRule::Default);
        assert!(!decision.requires_manual_review);
        assert!((decision.confidence - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_critical_error_wins_over_everything() {
        let validation = vec![CheckOutcome::error("total_amount", Severity::High, "must be positive")];
        let approval = requirement(ApprovalLevel::Board, "board");
        let decision = decide(
            &factors(0.2, &validation, &[], Some(&approval)),
            &DecisionThresholds::default(),
        );

        assert_eq!(decision.outcome, DecisionOutcome::Reject);
        assert_eq!(decision.rule, DecisionRule::CriticalError);
        assert_eq!(decision.reason, "Critical errors found: total_amount: must be positive");
    }

    #[test]
    fn test_record_error_status_is_critical() {
        let mut f = factors(0.99, &[], &[], None);
        f.record_in_error = true;
        let decision = decide(&f, &DecisionThresholds::default());

        assert_eq!(decision.rule, DecisionRule::CriticalError);
        assert_eq!(decision.outcome, DecisionOutcome::Reject);
    }

    #[test]
    fn test_confidence_bands() {
        let thresholds = DecisionThresholds::default();

        let low = decide(&factors(0.5, &[], &[], None), &thresholds);
        assert_eq!(low.outcome, DecisionOutcome::Reject);
        assert_eq!(low.rule, DecisionRule::Confidence);
        assert!((low.confidence - 0.55).abs() < 1e-9);

        let middle = decide(&factors(0.8, &[], &[], None), &thresholds);
        assert_eq!(middle.outcome, DecisionOutcome::Escalate);
        assert_eq!(middle.rule, DecisionRule::Confidence);
        assert!(middle.requires_manual_review);
        assert!((middle.confidence - 0.7).abs() < 1e-9);

        let boundary = decide(&factors(0.95, &[], &[], None), &thresholds);
        assert_eq!(boundary.outcome, DecisionOutcome::Approve);

        let at_review = decide(&factors(0.75, &[], &[], None), &thresholds);
        assert_eq!(at_review.outcome, DecisionOutcome::Escalate);
    }

    #[test]
    fn test_lower_severity_compliance_issues_become_warnings() {
        let compliance = vec![
            CheckOutcome::warning("tax_rate", Severity::Medium, "rate unusually high"),
            CheckOutcome::info("date_format", "expected MM/DD/YYYY"),
        ];
        let decision = decide(&factors(0.99, &[], &compliance, None), &DecisionThresholds::default());

        assert_eq!(decision.outcome, DecisionOutcome::Approve);
        assert_eq!(
            decision.warnings,
            vec!["Compliance issue: tax_rate: rate unusually high".to_string()]
        );
    }

    #[test]
    fn test_authority_rule_escalates_to_named_approver() {
        let approval = requirement(ApprovalLevel::Executive, "executive");
        let decision = decide(
            &factors(0.99, &[], &[], Some(&approval)),
            &DecisionThresholds::default(),
        );

        assert_eq!(decision.outcome, DecisionOutcome::Escalate);
        assert_eq!(decision.rule, DecisionRule::Authority);
        assert_eq!(decision.approver.as_deref(), Some("executive"));
        assert!(decision.reason.starts_with("Amount requires executive approval"));
    }

    #[test]
    fn test_auto_approval_requirement_does_not_escalate() {
        let approval = requirement(ApprovalLevel::Auto, "system");
        let decision = decide(
            &factors(0.99, &[], &[], Some(&approval)),
            &DecisionThresholds::default(),
        );

        assert_eq!(decision.outcome, DecisionOutcome::Approve);
    }

    #[test]
    fn test_too_many_validation_errors_rejects() {
        let validation = vec![CheckOutcome::error("line_item", Severity::Medium, "bad"); 6];
        let decision = decide(&factors(0.99, &validation, &[], None), &DecisionThresholds::default());

        assert_eq!(decision.outcome, DecisionOutcome::Reject);
        assert_eq!(decision.reason, "Too many validation errors: 6");
    }

    #[test]
    fn test_too_many_validation_warnings_rejects() {
        let validation = vec![CheckOutcome::warning("description", Severity::Low, "short"); 11];
        let decision = decide(&factors(0.99, &validation, &[], None), &DecisionThresholds::default());

        assert_eq!(decision.rule, DecisionRule::ValidationSeverity);
        assert_eq!(decision.reason, "Too many validation warnings: 11");
    }

    #[test]
    fn test_tolerable_validation_warnings_are_accumulated() {
        let validation = vec![
            CheckOutcome::pass("required_fields", Severity::Low, "present"),
            CheckOutcome::warning("currency", Severity::Medium, "uncommon currency"),
        ];
        let decision = decide(&factors(0.99, &validation, &[], None), &DecisionThresholds::default());

        assert_eq!(decision.outcome, DecisionOutcome::Approve);
        assert_eq!(
            decision.warnings,
            vec!["Validation issue: currency: uncommon currency".to_string()]
        );
    }

    #[test]
    fn test_decision_is_deterministic() {
        let validation = vec![CheckOutcome::warning("email", Severity::Medium, "bad email")];
        let compliance = vec![CheckOutcome::error("tax_rate", Severity::Medium, "odd")];
        let approval = requirement(ApprovalLevel::Manager, "manager");
        let f = factors(0.96, &validation, &compliance, Some(&approval));
        let thresholds = DecisionThresholds::default();

        let first = decide(&f, &thresholds);
        let second = decide(&f, &thresholds);
        assert_eq!(first, second);
    }
}
