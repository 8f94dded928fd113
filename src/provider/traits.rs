//! 外部コラボレーターの共通インターフェース定義
//!
//! # 責務
//!
//! - パイプラインの外側にある依存先を細いトレイトで抽象化
//!   - [`ContentExtractor`]: ファイル → テキスト + メタデータ
//!   - [`FieldExtractor`]: テキスト + スキーマ → 抽出フィールド
//!   - [`FieldReviewer`]: テキスト + 抽出フィールド → 補正・信頼度・指摘
//!   - [`RegionalRuleSource`]: 地域名 → 地域ルール
//!   - [`AuditSink`]: 監査レコードの書き込み
//! - 入力ドキュメント [`DocumentSource`] と抽出結果 [`ExtractedFields`] の型を定義
//!
//! 各トレイトの中身（CLI の呼び出し方、プロンプト、ルール表の保存形式）は
//! パイプラインのコアからは見えません。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use invoice_pipeline::provider::{ContentExtractor, DocumentSource};
//!
//! async fn example(extractor: &dyn ContentExtractor) {
//!     let source = DocumentSource::Path("invoices/inv-001.pdf".into());
//!     let (text, metadata) = extractor.extract_content(&source).await.unwrap();
//!
//!     println!("{} 文字 ({:?})", text.len(), metadata.extraction_method);
//! }
//! ```

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::ProviderError;
use crate::stage::AuditRecord;
use super::regional::RegionRules;

/// 入力ドキュメント
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentSource {
    /// ファイルパス
    Path(PathBuf),
    /// アップロードされたバイト列（拡張子判定用のファイル名付き）
    Bytes { name: String, data: Vec<u8> },
    /// すでにテキスト化された内容
    Text(String),
}

impl DocumentSource {
    /// ログ・結果表示用の名前
    pub fn label(&self) -> String {
        match self {
            DocumentSource::Path(path) => path.display().to_string(),
            DocumentSource::Bytes { name, .. } => name.clone(),
            DocumentSource::Text(_) => "inline".to_string(),
        }
    }

    /// 小文字の拡張子（テキスト入力なら `None`）
    pub fn extension(&self) -> Option<String> {
        let name = match self {
            DocumentSource::Path(path) => path.to_string_lossy().into_owned(),
            DocumentSource::Bytes { name, .. } => name.clone(),
            DocumentSource::Text(_) => return None,
        };
        std::path::Path::new(&name)
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
    }
}

/// テキストの取り出し方
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionMethod {
    /// PDF・テキストファイルから直接抽出
    Direct,
    /// 画像から OCR で抽出
    Ocr,
    /// テキスト入力をそのまま使用
    Inline,
}

/// ドキュメントのメタデータ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub file_name: Option<String>,
    /// 拡張子ベースの形式名（`pdf`, `png`, `text` など）
    pub format: String,
    pub size_bytes: u64,
    pub extraction_method: ExtractionMethod,
}

/// 構造化抽出のスキーマ
///
/// LLM に渡す JSON Schema と、必須フィールドの一覧を保持します。
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionSchema {
    pub required: Vec<String>,
    pub schema: Value,
}

impl ExtractionSchema {
    /// 請求書用のスキーマ
    pub fn invoice() -> Self {
        let required = ["invoice_number", "date", "vendor_name", "total_amount"];
        let schema = serde_json::json!({
            "type": "object",
            "required": required,
            "properties": {
                "invoice_number": {"type": "string", "description": "Invoice number or reference ID"},
                "date": {"type": "string", "format": "date", "description": "Invoice date in YYYY-MM-DD format"},
                "due_date": {"type": "string", "format": "date", "description": "Payment due date in YYYY-MM-DD format"},
                "vendor_name": {"type": "string", "description": "Supplier/vendor company name"},
                "vendor_address": {"type": "string"},
                "vendor_tax_id": {"type": "string", "description": "Vendor tax ID, VAT number, or GSTIN"},
                "vendor_email": {"type": "string"},
                "buyer_name": {"type": "string", "description": "Customer/buyer company name"},
                "buyer_address": {"type": "string"},
                "buyer_tax_id": {"type": "string"},
                "buyer_email": {"type": "string"},
                "line_items": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "required": ["description", "quantity", "unit_price", "total"],
                        "properties": {
                            "description": {"type": "string"},
                            "quantity": {"type": "number"},
                            "unit_price": {"type": "number"},
                            "total": {"type": "number"}
                        }
                    }
                },
                "currency": {"type": "string"},
                "subtotal": {"type": "number"},
                "tax_amount": {"type": "number"},
                "discount_amount": {"type": "number"},
                "total_amount": {"type": "number"},
                "region": {"type": "string", "enum": ["US", "EU", "APAC", "LATAM"]}
            }
        });

        Self {
            required: required.iter().map(|s| s.to_string()).collect(),
            schema,
        }
    }
}

/// 抽出された明細行
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractedLineItem {
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub quantity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub unit_price: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub total: Option<f64>,
}

/// 抽出フィールド
///
/// 外部モデルの出力をそのまま受け止めるため、全フィールドが省略可能です。
/// 金額は数値・文字列（`"1,250.00"` など）のどちらでも受け付けます。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractedFields {
    pub invoice_number: Option<String>,
    pub date: Option<String>,
    pub due_date: Option<String>,
    pub vendor_name: Option<String>,
    pub vendor_address: Option<String>,
    pub vendor_tax_id: Option<String>,
    pub vendor_email: Option<String>,
    pub vendor_phone: Option<String>,
    pub buyer_name: Option<String>,
    pub buyer_address: Option<String>,
    pub buyer_tax_id: Option<String>,
    pub buyer_email: Option<String>,
    pub buyer_phone: Option<String>,
    pub line_items: Vec<ExtractedLineItem>,
    pub currency: Option<String>,
    #[serde(deserialize_with = "lenient_number")]
    pub subtotal: Option<f64>,
    #[serde(alias = "total_tax", deserialize_with = "lenient_number")]
    pub tax_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub discount_amount: Option<f64>,
    #[serde(deserialize_with = "lenient_number")]
    pub total_amount: Option<f64>,
    pub region: Option<String>,
}

impl ExtractedFields {
    /// フィールドが空でない値を持つか
    ///
    /// 未知のフィールド名には `false` を返します。
    pub fn has(&self, field: &str) -> bool {
        fn text(value: &Option<String>) -> bool {
            value.as_deref().is_some_and(|s| !s.trim().is_empty())
        }

        match field {
            "invoice_number" => text(&self.invoice_number),
            "date" => text(&self.date),
            "due_date" => text(&self.due_date),
            "vendor_name" => text(&self.vendor_name),
            "vendor_address" => text(&self.vendor_address),
            "vendor_tax_id" => text(&self.vendor_tax_id),
            "buyer_name" => text(&self.buyer_name),
            "buyer_address" => text(&self.buyer_address),
            "buyer_tax_id" => text(&self.buyer_tax_id),
            "currency" => text(&self.currency),
            "region" => text(&self.region),
            "line_items" => !self.line_items.is_empty(),
            "subtotal" => self.subtotal.is_some(),
            "tax_amount" => self.tax_amount.is_some(),
            "discount_amount" => self.discount_amount.is_some(),
            "total_amount" => self.total_amount.is_some(),
            _ => false,
        }
    }

    /// 値を持つフィールドの数
    pub fn populated_count(&self) -> usize {
        const FIELDS: [&str; 16] = [
            "invoice_number",
            "date",
            "due_date",
            "vendor_name",
            "vendor_address",
            "vendor_tax_id",
            "buyer_name",
            "buyer_address",
            "buyer_tax_id",
            "currency",
            "region",
            "line_items",
            "subtotal",
            "tax_amount",
            "discount_amount",
            "total_amount",
        ];
        FIELDS.iter().filter(|field| self.has(field)).count()
    }

    /// レビュー結果の補正を適用
    ///
    /// 既知のフィールドに対する補正のみ適用し、適用したフィールド名を返します。
    ///
    /// # エラー
    ///
    /// 補正値の型がフィールドと合わない場合は [`ProviderError::Json`]
    pub fn apply_corrections(
        &mut self,
        corrections: &Map<String, Value>,
    ) -> Result<Vec<String>, ProviderError> {
        let mut current = match serde_json::to_value(&*self)? {
            Value::Object(map) => map,
            _ => return Ok(Vec::new()),
        };

        let mut applied = Vec::new();
        for (field, value) in corrections {
            if let Some(slot) = current.get_mut(field) {
                *slot = value.clone();
                applied.push(field.clone());
            }
        }

        *self = serde_json::from_value(Value::Object(current))?;
        Ok(applied)
    }
}

/// 数値または数値文字列を `Option<f64>` として読む
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => parse_amount(&s),
        _ => None,
    }))
}

/// `"USD 1,250.00"` のような金額表記を数値に変換
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

/// 抽出結果のレビュー
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FieldReview {
    /// フィールド名 → 補正後の値
    pub corrections: Map<String, Value>,
    pub confidence: f64,
    pub issues: Vec<String>,
}

/// テキスト抽出（ファイル → テキスト）
#[async_trait]
pub trait ContentExtractor: Send + Sync {
    /// ドキュメントからテキストとメタデータを取り出す
    ///
    /// # エラー
    ///
    /// - [`ProviderError::UnsupportedFormat`] - 未対応の拡張子
    /// - [`ProviderError::CliNotFound`] - 抽出ツールが未インストール
    /// - [`ProviderError::CliExecution`] - 抽出ツールの実行失敗
    async fn extract_content(
        &self,
        source: &DocumentSource,
    ) -> Result<(String, DocumentMetadata), ProviderError>;

    /// 依存ツールの疎通確認
    async fn check_available(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// 構造化抽出（テキスト → フィールド）
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    async fn extract_fields(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<ExtractedFields, ProviderError>;

    /// 依存先の疎通確認
    async fn check_available(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

/// 抽出結果のレビュー（テキスト + フィールド → 補正）
#[async_trait]
pub trait FieldReviewer: Send + Sync {
    async fn review_fields(
        &self,
        text: &str,
        fields: &ExtractedFields,
    ) -> Result<FieldReview, ProviderError>;
}

/// 地域ルールの参照
///
/// 未知の地域には `None` を返します。
pub trait RegionalRuleSource: Send + Sync {
    fn rules_for(&self, region: &str) -> Option<RegionRules>;
}

/// 監査レコードの書き込み先
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, record: &AuditRecord) -> Result<(), ProviderError>;
}
