//! validate ステージ: 請求書の整合性チェック
//!
//! 必須フィールド、書式、日付、金額、明細の計算を検証し、
//! 重要度重み付きスコアを計算します（チェックがなければ 0.0）。
//!
//! - スコアが `validation_pass` 以上ならステータスを `validated` に進める
//! - チェックの失敗は [`StageResult`] の警告として記録する（エラーにはしない）
//! - 請求書の信頼度を抽出信頼度とスコアの平均で更新する

use std::sync::LazyLock;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use regex::Regex;

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::StageError;
use crate::model::{CheckOutcome, CheckStatus, Invoice, ProcessingStatus, Severity};
use crate::scoring::{severity_weighted_score, EmptyScore};
use super::{Stage, StageInput, StageKind};

/// 既定の合格スコア
pub const DEFAULT_VALIDATION_PASS: f64 = 0.7;

const KNOWN_CURRENCIES: [&str; 6] = ["USD", "EUR", "GBP", "CAD", "AUD", "JPY"];

/// 金額比較の許容誤差
const TOLERANCE: f64 = 0.01;

/// 請求日として許容する今日からの日数
const MAX_DATE_DRIFT_DAYS: i64 = 365;

const LARGE_AMOUNT: f64 = 1_000_000.0;

static INVOICE_NUMBER_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Z0-9\-_#]+$").expect("regex for invoice number format")
});

static EMAIL_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9.\-]+\.[A-Za-z]{2,}$").expect("regex for email format")
});

/// validate ステージ
#[derive(Debug, Clone)]
pub struct ValidateStage {
    pass_threshold: f64,
    /// 日付チェックの基準日（`None` なら実行時の日付）
    reference_date: Option<NaiveDate>,
}

impl ValidateStage {
    pub fn new(pass_threshold: f64) -> Self {
        Self {
            pass_threshold,
            reference_date: None,
        }
    }

    /// 日付チェックの基準日を固定
    pub fn with_reference_date(mut self, date: NaiveDate) -> Self {
        self.reference_date = Some(date);
        self
    }

    fn today(&self) -> NaiveDate {
        self.reference_date
            .unwrap_or_else(|| Utc::now().date_naive())
    }
}

impl Default for ValidateStage {
    fn default() -> Self {
        Self::new(DEFAULT_VALIDATION_PASS)
    }
}

/// 請求書に対する全チェックを実行
pub fn run_checks(invoice: &Invoice, today: NaiveDate) -> Vec<CheckOutcome> {
    let mut checks = Vec::new();
    check_required_fields(invoice, &mut checks);
    check_formats(invoice, &mut checks);
    check_dates(invoice, today, &mut checks);
    check_amounts(invoice, &mut checks);
    check_line_items(invoice, &mut checks);
    checks
}

fn check_required_fields(invoice: &Invoice, checks: &mut Vec<CheckOutcome>) {
    let present = [
        ("invoice_number", !invoice.invoice_number.trim().is_empty()),
        ("vendor_name", !invoice.vendor.name.trim().is_empty()),
        ("buyer_name", !invoice.buyer.name.trim().is_empty()),
        ("total_amount", invoice.total_amount.is_finite()),
        ("currency", !invoice.currency.trim().is_empty()),
    ];

    for (field, ok) in present {
        let outcome = if ok {
            CheckOutcome::pass("required_field", Severity::Low, format!("{} is present", field))
        } else {
            CheckOutcome::error("required_field", Severity::High, format!("{} is missing", field))
        };
        checks.push(outcome.with_field(field));
    }
}

fn check_formats(invoice: &Invoice, checks: &mut Vec<CheckOutcome>) {
    if !invoice.invoice_number.is_empty() && !INVOICE_NUMBER_FORMAT.is_match(&invoice.invoice_number) {
        checks.push(
            CheckOutcome::warning(
                "invoice_number_format",
                Severity::Low,
                format!("Unusual invoice number format: {}", invoice.invoice_number),
            )
            .with_field("invoice_number"),
        );
    }

    if KNOWN_CURRENCIES.contains(&invoice.currency.as_str()) {
        checks.push(
            CheckOutcome::pass("currency_code", Severity::Low, "Currency code recognised")
                .with_field("currency"),
        );
    } else {
        checks.push(
            CheckOutcome::warning(
                "currency_code",
                Severity::Medium,
                format!("Unusual currency code: {}", invoice.currency),
            )
            .with_field("currency"),
        );
    }

    for (field, email) in [
        ("vendor_email", invoice.vendor.email.as_deref()),
        ("buyer_email", invoice.buyer.email.as_deref()),
    ] {
        let Some(email) = email else { continue };
        if !EMAIL_FORMAT.is_match(email.trim()) {
            checks.push(
                CheckOutcome::warning("email_format", Severity::Medium, format!("Invalid email: {}", email))
                    .with_field(field),
            );
        }
    }

    let vendor = invoice.vendor.name.trim();
    if !vendor.is_empty() && vendor.eq_ignore_ascii_case(invoice.buyer.name.trim()) {
        checks.push(CheckOutcome::warning(
            "distinct_parties",
            Severity::Medium,
            "Vendor and buyer are the same party",
        ));
    }
}

fn check_dates(invoice: &Invoice, today: NaiveDate, checks: &mut Vec<CheckOutcome>) {
    let Some(date) = invoice.date else {
        checks.push(CheckOutcome::info("invoice_date", "No invoice date to check"));
        return;
    };

    let drift = (date - today).num_days().abs();
    if drift > MAX_DATE_DRIFT_DAYS {
        checks.push(
            CheckOutcome::error(
                "invoice_date",
                Severity::High,
                format!("Invoice date {} is more than {} days from today", date, MAX_DATE_DRIFT_DAYS),
            )
            .with_field("date"),
        );
    } else {
        checks.push(
            CheckOutcome::pass("invoice_date", Severity::Low, "Invoice date is plausible").with_field("date"),
        );
    }

    if let Some(due) = invoice.due_date {
        if due < date {
            checks.push(
                CheckOutcome::error(
                    "due_date",
                    Severity::High,
                    format!("Due date {} is before invoice date {}", due, date),
                )
                .with_field("due_date"),
            );
        } else {
            checks.push(
                CheckOutcome::pass("due_date", Severity::Low, "Due date follows invoice date")
                    .with_field("due_date"),
            );
        }
    }
}

fn check_amounts(invoice: &Invoice, checks: &mut Vec<CheckOutcome>) {
    let total = invoice.total_amount;
    if total <= 0.0 {
        checks.push(
            CheckOutcome::error("total_amount", Severity::High, format!("Total amount must be positive: {:.2}", total))
                .with_field("total_amount"),
        );
    } else if total > LARGE_AMOUNT {
        checks.push(
            CheckOutcome::warning("total_amount", Severity::Medium, format!("Unusually large total: {:.2}", total))
                .with_field("total_amount"),
        );
    } else {
        checks.push(
            CheckOutcome::pass("total_amount", Severity::Low, "Total amount in range").with_field("total_amount"),
        );
    }

    if !invoice.line_items.is_empty() {
        let items = invoice.line_items_total();
        if (items - invoice.subtotal).abs() > TOLERANCE {
            checks.push(
                CheckOutcome::error(
                    "subtotal_matches_items",
                    Severity::High,
                    format!("Line items sum to {:.2} but subtotal is {:.2}", items, invoice.subtotal),
                )
                .with_field("subtotal"),
            );
        } else {
            checks.push(CheckOutcome::pass(
                "subtotal_matches_items",
                Severity::Low,
                "Subtotal matches line items",
            ));
        }
    }

    let expected = invoice.expected_total();
    if (expected - total).abs() > TOLERANCE {
        checks.push(
            CheckOutcome::error(
                "total_calculation",
                Severity::High,
                format!("Subtotal + tax - discount is {:.2} but total is {:.2}", expected, total),
            )
            .with_field("total_amount"),
        );
    } else {
        checks.push(CheckOutcome::pass("total_calculation", Severity::Low, "Total is consistent"));
    }
}

fn check_line_items(invoice: &Invoice, checks: &mut Vec<CheckOutcome>) {
    if invoice.line_items.is_empty() {
        checks.push(
            CheckOutcome::warning("line_items", Severity::Medium, "Invoice has no line items")
                .with_field("line_items"),
        );
        return;
    }

    for (index, item) in invoice.line_items.iter().enumerate() {
        let field = format!("line_items[{}]", index);
        let mut item_ok = true;
        let mut flag = |outcome: CheckOutcome| {
            item_ok = false;
            checks.push(outcome.with_field(field.clone()));
        };

        if (item.quantity * item.unit_price - item.total).abs() > TOLERANCE {
            flag(CheckOutcome::error(
                "line_item_total",
                Severity::High,
                format!(
                    "{} x {:.2} = {:.2} but line total is {:.2}",
                    item.quantity,
                    item.unit_price,
                    item.quantity * item.unit_price,
                    item.total
                ),
            ));
        }
        if item.quantity <= 0.0 {
            flag(CheckOutcome::error("line_item_quantity", Severity::High, "Quantity must be positive"));
        }
        if item.unit_price < 0.0 {
            flag(CheckOutcome::error("line_item_price", Severity::High, "Unit price must not be negative"));
        }
        if item.description.trim().chars().count() < 3 {
            flag(CheckOutcome::warning(
                "line_item_description",
                Severity::Medium,
                "Line item description is too short",
            ));
        }

        if item_ok {
            checks.push(
                CheckOutcome::pass("line_item", Severity::Low, "Line item is consistent").with_field(field),
            );
        }
    }
}

#[async_trait]
impl Stage for ValidateStage {
    fn kind(&self) -> StageKind {
        StageKind::Validate
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
            .ok_or_else(|| StageError::Context("validate stage requires an invoice".to_string()))?;

        let mut result = StageResult::new(StageKind::Validate);
        let checks = run_checks(record, self.today());
        let score = severity_weighted_score(&checks, EmptyScore::NothingVerified);

        for check in &checks {
            match check.status {
                CheckStatus::Error => {
                    result.add_warning(format!("Validation error: {}: {}", check.check, check.message))
                }
                CheckStatus::Warning => {
                    result.add_warning(format!("Validation warning: {}: {}", check.check, check.message))
                }
                CheckStatus::Pass | CheckStatus::Info => {}
            }
        }
        result.add_scored_step(
            "checks_completed",
            format!("Ran {} validation checks", checks.len()),
            score,
        );

        let prior = ctx
            .extraction_confidence()
            .or(record.confidence)
            .unwrap_or(score);
        let confidence = (prior + score) / 2.0;

        let invoice = ctx
            .invoice_mut()
            .ok_or_else(|| StageError::Context("no invoice in run context".to_string()))?;
        invoice.confidence = Some(confidence);

        if score >= self.pass_threshold {
            match invoice.transition(ProcessingStatus::Validated, StageKind::Validate) {
                Ok(()) => result.add_step("status_updated", "Invoice marked as validated"),
                Err(e) => result.add_warning(format!("Status not updated: {}", e)),
            }
        } else {
            result.add_warning(format!(
                "Validation score {:.2} is below the pass threshold {:.2}",
                score, self.pass_threshold
            ));
        }

        tracing::debug!(session_id = %ctx.session_id(), score, checks = checks.len(), "検証が完了");
        ctx.set_validation(checks, score);
        Ok(result.with_confidence(score))
    }
}
