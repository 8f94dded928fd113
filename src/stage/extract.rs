//! extract ステージ: テキスト → 請求書
//!
//! # 処理の流れ
//!
//! 1. parse ステージのテキスト（またはインラインテキスト）を取得
//! 2. 空白の正規化と通貨記号の置換を行い、構造化抽出器に渡す
//! 3. 抽出器が失敗した場合は正規表現抽出にフォールバックし、警告を記録
//! 4. レビュー担当が設定されていれば補正を適用し、指摘を警告として記録
//! 5. [`Invoice`] を組み立て、ステータスを `processing` に進める
//!
//! 正規表現抽出は行単位のラベルを手掛かりにするため、正規化前の生テキストを渡します。
//!
//! # 信頼度
//!
//! 0.3（フィールドあり）+ 0.4 × 重要フィールド充足率 + 0.2 × 任意フィールド充足率
//! + 0.1（請求書を生成できた）

use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::{ProviderError, StageError};
use crate::model::{Invoice, LineItem, Party, ProcessingStatus};
use crate::provider::pattern::region_for_currency;
use crate::provider::{
    DocumentSource, ExtractedFields, ExtractedLineItem, ExtractionSchema, FieldExtractor,
    FieldReviewer, PatternExtractor,
};
use super::{Stage, StageInput, StageKind};

/// 欠けていると請求書を生成できないフィールド
const CRITICAL_FIELDS: [&str; 3] = ["invoice_number", "total_amount", "vendor_name"];

const OPTIONAL_FIELDS: [&str; 4] = ["date", "due_date", "buyer_name", "line_items"];

/// 通貨が読み取れなかったときの既定値
const DEFAULT_CURRENCY: &str = "USD";

/// インラインテキストとして受け付ける最小文字数
const MIN_TEXT_LEN: usize = 10;

const DATE_FORMATS: [&str; 8] = [
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%d.%m.%Y",
    "%B %d, %Y",
    "%b %d, %Y",
];

/// extract ステージ
pub struct ExtractStage {
    extractor: Option<Arc<dyn FieldExtractor>>,
    reviewer: Option<Arc<dyn FieldReviewer>>,
    pattern: PatternExtractor,
    default_region: String,
}

impl ExtractStage {
    /// 正規表現抽出のみで動作するステージを生成
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            extractor: None,
            reviewer: None,
            pattern: PatternExtractor::new(),
            default_region: default_region.into(),
        }
    }

    /// 構造化抽出器を設定
    pub fn with_extractor(mut self, extractor: Arc<dyn FieldExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// レビュー担当を設定
    pub fn with_reviewer(mut self, reviewer: Arc<dyn FieldReviewer>) -> Self {
        self.reviewer = Some(reviewer);
        self
    }

    async fn extract_fields(&self, raw: &str, prepared: &str, result: &mut StageResult) -> ExtractedFields {
        let Some(extractor) = &self.extractor else {
            result.add_step("pattern_extraction", "Extracting fields with label patterns");
            return self.pattern.extract(raw);
        };

        match extractor.extract_fields(prepared, &ExtractionSchema::invoice()).await {
            Ok(fields) => {
                result.add_step(
                    "structured_extraction",
                    format!("Extracted {} fields", fields.populated_count()),
                );
                fields
            }
            Err(e) => {
                tracing::warn!(error = %e, "構造化抽出に失敗したため正規表現抽出にフォールバックします");
                result.add_warning(format!("Structured extraction failed, used pattern fallback: {}", e));
                result.add_step("pattern_extraction", "Extracting fields with label patterns");
                self.pattern.extract(raw)
            }
        }
    }

    async fn review(&self, prepared: &str, fields: &mut ExtractedFields, result: &mut StageResult) {
        let Some(reviewer) = &self.reviewer else {
            return;
        };

        match reviewer.review_fields(prepared, fields).await {
            Ok(review) => {
                match fields.apply_corrections(&review.corrections) {
                    Ok(applied) if !applied.is_empty() => result.add_scored_step(
                        "review_corrections",
                        format!("Applied corrections: {}", applied.join(", ")),
                        review.confidence,
                    ),
                    Ok(_) => result.add_scored_step("review", "No corrections suggested", review.confidence),
                    Err(e) => result.add_warning(format!("Could not apply review corrections: {}", e)),
                }
                for issue in review.issues {
                    result.add_warning(format!("Review: {}", issue));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "抽出結果のレビューに失敗しました");
                result.add_warning(format!("Field review unavailable: {}", e));
            }
        }
    }

    /// 抽出フィールドから請求書を組み立てる（重要フィールドが欠けていれば `None`）
    fn build_invoice(&self, fields: &ExtractedFields, result: &mut StageResult) -> Option<Invoice> {
        let missing: Vec<&str> = CRITICAL_FIELDS
            .iter()
            .copied()
            .filter(|field| !fields.has(field))
            .collect();
        if !missing.is_empty() {
            for field in &missing {
                result.add_error(format!("Missing critical field: {}", field));
            }
            return None;
        }

        let (Some(number), Some(vendor_name), Some(total)) = (
            fields.invoice_number.as_deref(),
            fields.vendor_name.as_deref(),
            fields.total_amount,
        ) else {
            return None;
        };

        let currency = fields
            .currency
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| DEFAULT_CURRENCY.to_string());
        let region = fields
            .region
            .as_deref()
            .map(|r| r.trim().to_ascii_uppercase())
            .filter(|r| !r.is_empty())
            .or_else(|| region_for_currency(&currency).map(str::to_string))
            .unwrap_or_else(|| self.default_region.clone());

        let vendor = Party {
            name: vendor_name.trim().to_string(),
            address: fields.vendor_address.clone(),
            tax_id: fields.vendor_tax_id.clone(),
            email: fields.vendor_email.clone(),
            phone: fields.vendor_phone.clone(),
        };
        let buyer = Party {
            name: fields.buyer_name.as_deref().unwrap_or_default().trim().to_string(),
            address: fields.buyer_address.clone(),
            tax_id: fields.buyer_tax_id.clone(),
            email: fields.buyer_email.clone(),
            phone: fields.buyer_phone.clone(),
        };

        let mut invoice = Invoice::new(number.trim(), vendor, buyer, currency, total, region);
        invoice.date = parse_field_date("date", fields.date.as_deref(), result);
        invoice.due_date = parse_field_date("due_date", fields.due_date.as_deref(), result);
        invoice.line_items = fields.line_items.iter().filter_map(to_line_item).collect();
        invoice.total_tax = fields.tax_amount.unwrap_or(0.0);
        invoice.discount_amount = fields.discount_amount.unwrap_or(0.0);
        invoice.subtotal = fields.subtotal.unwrap_or_else(|| {
            if invoice.line_items.is_empty() {
                total - invoice.total_tax + invoice.discount_amount
            } else {
                invoice.line_items_total()
            }
        });

        Some(invoice)
    }
}

/// 空白の正規化と通貨記号の置換
fn preprocess(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('$', "USD ")
        .replace('€', "EUR ")
        .replace('£', "GBP ")
}

/// 既知の書式で日付を解釈
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    DATE_FORMATS
        .iter()
        .find_map(|format| NaiveDate::parse_from_str(raw, format).ok())
}

fn parse_field_date(field: &str, raw: Option<&str>, result: &mut StageResult) -> Option<NaiveDate> {
    let raw = raw.map(str::trim).filter(|s| !s.is_empty())?;
    let parsed = parse_date(raw);
    if parsed.is_none() {
        result.add_warning(format!("Unrecognised {} format: {}", field, raw));
    }
    parsed
}

/// 明細の欠けた値を数量・単価・合計から補う（単価も合計もなければ捨てる）
fn to_line_item(item: &ExtractedLineItem) -> Option<LineItem> {
    let quantity = item.quantity.unwrap_or(1.0);
    let (unit_price, total) = match (item.unit_price, item.total) {
        (Some(price), Some(total)) => (price, total),
        (Some(price), None) => (price, price * quantity),
        (None, Some(total)) if quantity != 0.0 => (total / quantity, total),
        _ => return None,
    };

    Some(LineItem::new(
        item.description.as_deref().unwrap_or_default().trim(),
        quantity,
        unit_price,
        total,
    ))
}

fn fraction(fields: &ExtractedFields, names: &[&str]) -> f64 {
    let present = names.iter().filter(|name| fields.has(name)).count();
    present as f64 / names.len() as f64
}

fn extraction_confidence(fields: &ExtractedFields, built: bool) -> f64 {
    if fields.populated_count() == 0 {
        return 0.0;
    }

    let mut confidence = 0.3
        + 0.4 * fraction(fields, &CRITICAL_FIELDS)
        + 0.2 * fraction(fields, &OPTIONAL_FIELDS);
    if built {
        confidence += 0.1;
    }
    confidence.min(1.0)
}

#[async_trait]
impl Stage for ExtractStage {
    fn kind(&self) -> StageKind {
        StageKind::Extract
    }

    fn validate_input(&self, input: &StageInput) -> bool {
        match input.as_document() {
            Some(DocumentSource::Text(text)) => text.trim().chars().count() > MIN_TEXT_LEN,
            Some(_) => true,
            None => false,
        }
    }

    async fn execute(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        let mut result = StageResult::new(StageKind::Extract);

        let raw = match (ctx.raw_text(), input.as_document()) {
            (Some(text), _) => text.to_string(),
            (None, Some(DocumentSource::Text(text))) => text.clone(),
            _ => {
                result.add_error("No document text available for extraction");
                return Ok(result);
            }
        };
        let prepared = preprocess(&raw);

        let mut fields = self.extract_fields(&raw, &prepared, &mut result).await;
        self.review(&prepared, &mut fields, &mut result).await;

        let mut invoice = self.build_invoice(&fields, &mut result);
        let confidence = extraction_confidence(&fields, invoice.is_some());

        if let Some(invoice) = invoice.as_mut() {
            invoice
                .transition(ProcessingStatus::Processing, StageKind::Extract)
                .map_err(|e| StageError::Internal(e.to_string()))?;
            invoice.confidence = Some(confidence);
            invoice.source_file = ctx
                .document_metadata()
                .and_then(|metadata| metadata.file_name.clone())
                .or_else(|| match input.as_document() {
                    Some(DocumentSource::Text(_)) | None => None,
                    Some(source) => Some(source.label()),
                });

            result.add_scored_step(
                "invoice_created",
                format!("Built invoice {} ({} line items)", invoice.invoice_number, invoice.line_items.len()),
                confidence,
            );
        }

        tracing::debug!(
            session_id = %ctx.session_id(),
            fields = fields.populated_count(),
            confidence,
            "フィールド抽出が完了"
        );
        ctx.set_extraction(fields, confidence);
        if let Some(invoice) = invoice {
            ctx.set_invoice(invoice);
        }

        Ok(result.with_confidence(confidence))
    }

    async fn check_dependencies(&self) -> Result<(), ProviderError> {
        match &self.extractor {
            Some(extractor) => extractor.check_available().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use serde_json::{Map, Value};

    use crate::provider::FieldReview;

    const TEXT: &str = "INVOICE
Invoice #: INV-2024-001
Date: 2024-03-15
From: Acme Corp
Bill To: Globex Inc

Widget A    2   50.00   100.00

Subtotal: $100.00
Tax: $8.00
Total: $108.00
";

    /// 呼び出し時のテキストを記録し、固定のフィールドを返す抽出器
    struct RecordingExtractor {
        calls: Arc<Mutex<Vec<String>>>,
        outcome: Result<ExtractedFields, String>,
    }

    #[async_trait]
    impl FieldExtractor for RecordingExtractor {
        async fn extract_fields(
            &self,
            text: &str,
            _schema: &ExtractionSchema,
        ) -> Result<ExtractedFields, ProviderError> {
            self.calls.lock().unwrap().push(text.to_string());
            self.outcome
                .clone()
                .map_err(ProviderError::CliExecution)
        }
    }

    struct FixedReviewer(FieldReview);

    #[async_trait]
    impl FieldReviewer for FixedReviewer {
        async fn review_fields(
            &self,
            _text: &str,
            _fields: &ExtractedFields,
        ) -> Result<FieldReview, ProviderError> {
            Ok(self.0.clone())
        }
    }

    fn text_input(text: &str) -> StageInput {
        StageInput::Document(DocumentSource::Text(text.to_string()))
    }

    #[test]
    fn test_preprocess() {
        assert_eq!(preprocess("Total:\n  $10.00 \t€5"), "Total: USD 10.00 EUR 5");
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 15);
        assert_eq!(parse_date("2024-03-15"), expected);
        assert_eq!(parse_date("03/15/2024"), expected);
        assert_eq!(parse_date("15.03.2024"), expected);
        assert_eq!(parse_date("March 15, 2024"), expected);
        assert_eq!(parse_date("someday"), None);
    }

    #[test]
    fn test_validate_input() {
        let stage = ExtractStage::new("US");
        assert!(stage.validate_input(&text_input("Invoice #1 total 10")));
        assert!(!stage.validate_input(&text_input("  short  ")));
        assert!(stage.validate_input(&StageInput::Document(DocumentSource::Path("a.pdf".into()))));
    }

    #[tokio::test]
    async fn test_pattern_extraction_builds_invoice() {
        let stage = ExtractStage::new("US");
        let mut ctx = RunContext::new("s", "standard", "inline");

        let result = stage.execute(&text_input(TEXT), &mut ctx).await.unwrap();

        assert!(!result.has_errors(), "{:?}", result.errors());
        assert!(result.warnings().is_empty());

        let invoice = ctx.invoice().unwrap();
        assert_eq!(invoice.invoice_number, "INV-2024-001");
        assert_eq!(invoice.vendor.name, "Acme Corp");
        assert_eq!(invoice.status(), ProcessingStatus::Processing);
        assert_eq!(invoice.date, NaiveDate::from_ymd_opt(2024, 3, 15));
        assert_eq!(invoice.line_items.len(), 1);
        assert_eq!(invoice.subtotal, 100.0);
        assert_eq!(invoice.total_tax, 8.0);
        assert_eq!(invoice.region, "US");

        // 重要 3/3、任意 3/4（due_date なし）
        let expected = 0.3 + 0.4 + 0.2 * 0.75 + 0.1;
        assert!((result.confidence() - expected).abs() < 1e-9);
        assert_eq!(ctx.extraction_confidence(), Some(result.confidence()));
    }

    #[tokio::test]
    async fn test_structured_extractor_receives_preprocessed_text() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let fields = ExtractedFields {
            invoice_number: Some("INV-9".to_string()),
            vendor_name: Some("Initech".to_string()),
            total_amount: Some(50.0),
            currency: Some("eur".to_string()),
            ..Default::default()
        };
        let stage = ExtractStage::new("US").with_extractor(Arc::new(RecordingExtractor {
            calls: Arc::clone(&calls),
            outcome: Ok(fields),
        }));
        let mut ctx = RunContext::new("s", "standard", "inline");

        stage.execute(&text_input(TEXT), &mut ctx).await.unwrap();

        let calls = calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        assert!(calls[0].contains("Total: USD 108.00"));
        assert!(!calls[0].contains('\n'));

        let invoice = ctx.invoice().unwrap();
        assert_eq!(invoice.currency, "EUR");
        assert_eq!(invoice.region, "EU");
    }

    #[tokio::test]
    async fn test_failed_extractor_falls_back_to_patterns() {
        let stage = ExtractStage::new("US").with_extractor(Arc::new(RecordingExtractor {
            calls: Arc::new(Mutex::new(Vec::new())),
            outcome: Err("model not loaded".to_string()),
        }));
        let mut ctx = RunContext::new("s", "standard", "inline");

        let result = stage.execute(&text_input(TEXT), &mut ctx).await.unwrap();

        assert!(!result.has_errors());
        assert_eq!(result.warnings().len(), 1);
        assert!(result.warnings()[0].contains("pattern fallback"));
        assert_eq!(ctx.invoice().unwrap().invoice_number, "INV-2024-001");
    }

    #[tokio::test]
    async fn test_review_corrections_and_issues() {
        let mut corrections = Map::new();
        corrections.insert("vendor_name".to_string(), Value::from("Acme Corporation"));
        let stage = ExtractStage::new("US").with_reviewer(Arc::new(FixedReviewer(FieldReview {
            corrections,
            confidence: 0.9,
            issues: vec!["due date missing".to_string()],
        })));
        let mut ctx = RunContext::new("s", "standard", "inline");

        let result = stage.execute(&text_input(TEXT), &mut ctx).await.unwrap();

        assert_eq!(ctx.invoice().unwrap().vendor.name, "Acme Corporation");
        assert_eq!(result.warnings(), ["Review: due date missing".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_critical_fields_are_errors() {
        let stage = ExtractStage::new("US");
        let mut ctx = RunContext::new("s", "standard", "inline");

        let result = stage
            .execute(&text_input("Date: 2024-03-15\nsome unrelated text"), &mut ctx)
            .await
            .unwrap();

        assert_eq!(result.errors().len(), 3);
        assert!(ctx.invoice().is_none());
        assert!(ctx.extracted_fields().is_some());
    }

    #[test]
    fn test_line_item_fills_missing_values() {
        let item = ExtractedLineItem {
            description: Some("Support".to_string()),
            quantity: Some(4.0),
            unit_price: None,
            total: Some(100.0),
        };
        assert_eq!(to_line_item(&item), Some(LineItem::new("Support", 4.0, 25.0, 100.0)));

        let empty = ExtractedLineItem::default();
        assert_eq!(to_line_item(&empty), None);
    }
}
