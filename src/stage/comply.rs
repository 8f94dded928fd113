//! comply ステージ: 地域ルールへの準拠チェック
//!
//! 地域ルールコラボレーターから請求書の地域のルールを取得し、
//! 通貨・税率・地域の必須フィールド・税番号形式・金額上下限を検証します。
//! あわせて金額と承認上限から承認要件を導きます。
//!
//! スコアはチェックがなければ 1.0（失敗し得るチェックがない）です。

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::StageError;
use crate::model::{
    ApprovalLevel, ApprovalRequirement, CheckOutcome, CheckStatus, Invoice, Severity,
};
use crate::provider::{ApprovalLimits, RegionRules, RegionalRuleSource};
use crate::scoring::{severity_weighted_score, EmptyScore};
use super::{Stage, StageInput, StageKind};

/// 標準税率に対して許容する倍率
const TAX_RATE_TOLERANCE: f64 = 1.5;

/// comply ステージ
pub struct ComplyStage {
    rules: Arc<dyn RegionalRuleSource>,
    default_region: String,
    pass_threshold: f64,
}

impl ComplyStage {
    pub fn new(rules: Arc<dyn RegionalRuleSource>, default_region: impl Into<String>) -> Self {
        Self {
            rules,
            default_region: default_region.into(),
            pass_threshold: 0.7,
        }
    }

    /// 合格スコアを設定（下回ると警告）
    pub fn with_pass_threshold(mut self, threshold: f64) -> Self {
        self.pass_threshold = threshold;
        self
    }
}

/// 地域ルールが求めるフィールドを請求書が持つか
///
/// VAT 番号・GSTIN は税番号に、VAT 額は税額に対応します。
/// 税額は 0 でも「記載あり」とみなします。
fn has_regional_field(invoice: &Invoice, field: &str) -> bool {
    fn text(value: &str) -> bool {
        !value.trim().is_empty()
    }
    fn optional(value: &Option<String>) -> bool {
        value.as_deref().is_some_and(text)
    }

    match field {
        "invoice_number" => text(&invoice.invoice_number),
        "date" => invoice.date.is_some(),
        "due_date" => invoice.due_date.is_some(),
        "vendor_name" => text(&invoice.vendor.name),
        "vendor_address" => optional(&invoice.vendor.address),
        "vendor_tax_id" | "vendor_vat_number" | "vendor_gstin" => optional(&invoice.vendor.tax_id),
        "buyer_name" => text(&invoice.buyer.name),
        "buyer_address" => optional(&invoice.buyer.address),
        "buyer_tax_id" | "buyer_vat_number" | "buyer_gstin" => optional(&invoice.buyer.tax_id),
        "line_items" => !invoice.line_items.is_empty(),
        "currency" => text(&invoice.currency),
        "subtotal" | "tax_amount" | "vat_amount" | "total_amount" => true,
        _ => false,
    }
}

/// 地域ルールに対する全チェックを実行
pub fn run_checks(invoice: &Invoice, rules: &RegionRules) -> Vec<CheckOutcome> {
    let mut checks = Vec::new();

    if rules.supports_currency(&invoice.currency) {
        checks.push(CheckOutcome::pass(
            "regional_currency",
            Severity::Low,
            format!("{} is accepted in {}", invoice.currency, rules.region),
        ));
    } else {
        checks.push(
            CheckOutcome::error(
                "regional_currency",
                Severity::High,
                format!(
                    "Currency {} is not accepted in {} (expected one of {})",
                    invoice.currency,
                    rules.region,
                    rules.currencies.join(", ")
                ),
            )
            .with_field("currency"),
        );
    }

    match invoice.effective_tax_rate() {
        Some(rate) if rate < 0.0 => checks.push(
            CheckOutcome::error("tax_rate", Severity::High, format!("Negative tax rate: {:.3}", rate))
                .with_field("total_tax"),
        ),
        Some(rate) if rate > rules.standard_tax_rate * TAX_RATE_TOLERANCE => checks.push(
            CheckOutcome::warning(
                "tax_rate",
                Severity::Medium,
                format!(
                    "Tax rate {:.1}% is well above the {} standard rate {:.1}%",
                    rate * 100.0,
                    rules.region,
                    rules.standard_tax_rate * 100.0
                ),
            )
            .with_field("total_tax"),
        ),
        Some(_) => checks.push(CheckOutcome::pass("tax_rate", Severity::Low, "Tax rate is plausible")),
        None => checks.push(CheckOutcome::info("tax_rate", "No subtotal to derive a tax rate from")),
    }

    for field in &rules.required_fields {
        if has_regional_field(invoice, field) {
            checks.push(
                CheckOutcome::pass("regional_required_field", Severity::Low, format!("{} is present", field))
                    .with_field(field.as_str()),
            );
        } else {
            checks.push(
                CheckOutcome::error(
                    "regional_required_field",
                    Severity::High,
                    format!("{} requires {}", rules.region, field),
                )
                .with_field(field.as_str()),
            );
        }
    }

    if let (Some(rule), Some(tax_id)) = (&rules.tax_id, invoice.vendor.tax_id.as_deref()) {
        let outcome = match Regex::new(&rule.pattern) {
            Ok(pattern) if pattern.is_match(tax_id.trim()) => CheckOutcome::pass(
                "tax_id_format",
                Severity::Low,
                format!("Vendor {} format is valid", rule.label),
            ),
            Ok(_) => CheckOutcome::error(
                "tax_id_format",
                Severity::High,
                format!("Invalid vendor {}: {}", rule.label, tax_id),
            ),
            Err(e) => CheckOutcome::warning(
                "tax_id_format",
                Severity::Low,
                format!("Cannot check {} format: {}", rule.label, e),
            ),
        };
        checks.push(outcome.with_field("vendor_tax_id"));
    }

    let total = invoice.total_amount;
    if rules.max_amount.is_some_and(|max| total > max) {
        checks.push(
            CheckOutcome::error(
                "amount_limit",
                Severity::High,
                format!("Total {:.2} exceeds the {} maximum", total, rules.region),
            )
            .with_field("total_amount"),
        );
    } else if total < rules.min_amount {
        checks.push(
            CheckOutcome::error(
                "amount_limit",
                Severity::High,
                format!("Total {:.2} is below the {} minimum {:.2}", total, rules.region, rules.min_amount),
            )
            .with_field("total_amount"),
        );
    } else {
        checks.push(CheckOutcome::pass("amount_limit", Severity::Low, "Total is within regional limits"));
    }

    checks.push(CheckOutcome::info(
        "date_format",
        format!("{} invoices use {} dates", rules.region, rules.date_format),
    ));

    checks
}

/// 金額と地域の承認上限から承認要件を導く
pub fn approval_requirement(total: f64, limits: Option<&ApprovalLimits>) -> ApprovalRequirement {
    let Some(limits) = limits else {
        return ApprovalRequirement {
            level: ApprovalLevel::Manual,
            approver: "manager".to_string(),
            limit: None,
            reason: "No approval limits configured for region".to_string(),
        };
    };

    let (level, approver, limit) = if total <= limits.auto_approve {
        (ApprovalLevel::Auto, "system", Some(limits.auto_approve))
    } else if total <= limits.manager {
        (ApprovalLevel::Manager, "manager", Some(limits.manager))
    } else if total <= limits.executive {
        (ApprovalLevel::Executive, "executive", Some(limits.executive))
    } else {
        (ApprovalLevel::Board, "board", None)
    };

    let reason = match limit {
        Some(limit) => format!("Amount {:.2} is within the {} limit {:.2}", total, level, limit),
        None => format!(
            "Amount {:.2} exceeds the executive limit {:.2}",
            total, limits.executive
        ),
    };

    ApprovalRequirement {
        level,
        approver: approver.to_string(),
        limit,
        reason,
    }
}

#[async_trait]
impl Stage for ComplyStage {
    fn kind(&self) -> StageKind {
        StageKind::Comply
    }

    fn validate_input(&self, input: &StageInput) -> bool {
        input.as_record().is_some()
    }

    async fn execute(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        let record = input
            .as_record()
            .ok_or_else(|| StageError::Context("comply stage requires an invoice".to_string()))?;

        let mut result = StageResult::new(StageKind::Comply);

        let rules = match self.rules.rules_for(&record.region) {
            Some(rules) => rules,
            None => {
                result.add_warning(format!(
                    "Unknown region '{}', applying {} rules",
                    record.region, self.default_region
                ));
                match self.rules.rules_for(&self.default_region) {
                    Some(rules) => rules,
                    None => {
                        result.add_error(format!("No regional rules for '{}'", self.default_region));
                        return Ok(result);
                    }
                }
            }
        };
        result.add_step("rules_loaded", format!("Applying {} rules", rules.region));

        let checks = run_checks(record, &rules);
        let score = severity_weighted_score(&checks, EmptyScore::NothingToFail);
        let requirement = approval_requirement(record.total_amount, rules.approval_limits.as_ref());

        for check in &checks {
            match check.status {
                CheckStatus::Error => {
                    result.add_warning(format!("Compliance error: {}: {}", check.check, check.message))
                }
                CheckStatus::Warning => {
                    result.add_warning(format!("Compliance warning: {}: {}", check.check, check.message))
                }
                CheckStatus::Pass | CheckStatus::Info => {}
            }
        }
        if score < self.pass_threshold {
            result.add_warning(format!(
                "Compliance score {:.2} is below the pass threshold {:.2}",
                score, self.pass_threshold
            ));
        }
        result.add_scored_step(
            "checks_completed",
            format!("Ran {} compliance checks", checks.len()),
            score,
        );
        result.add_step(
            "approval_requirement",
            format!("{} approval ({})", requirement.level, requirement.reason),
        );

        tracing::debug!(
            session_id = %ctx.session_id(),
            region = %rules.region,
            score,
            approval = %requirement.level,
            "コンプライアンスチェックが完了"
        );
        ctx.set_compliance(checks, score, Some(requirement));
        Ok(result.with_confidence(score))
    }
}
