//! LLM CLI クライアント
//!
//! # 責務
//!
//! - ローカル LLM の CLI（既定は `ollama`）を呼び出し、請求書テキストから
//!   構造化フィールドを抽出する（[`FieldExtractor`]）
//! - 抽出結果を原文と突き合わせ、補正値と指摘を返す（[`FieldReviewer`]）
//!
//! # CLIツール
//!
//! - **コマンド**: `ollama run <model> --format json <prompt>`
//! - **インストール**: <https://ollama.com>
//!
//! # CLI出力形式
//!
//! 抽出時は [`ExtractedFields`] と同じ形の JSON、レビュー時は次の形式:
//!
//! ```json
//! {
//!   "corrections": {"invoice_number": "INV-2024-001"},
//!   "confidence_score": 0.9,
//!   "errors": [],
//!   "warnings": ["due date looks unusual"]
//! }
//! ```

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::process::Command;

use crate::error::ProviderError;
use super::check_cli_available;
use super::traits::{ExtractedFields, ExtractionSchema, FieldExtractor, FieldReview, FieldReviewer};

/// デフォルトのCLIコマンド名
const DEFAULT_COMMAND: &str = "ollama";

/// デフォルトのモデル名
const DEFAULT_MODEL: &str = "qwen2.5:14b";

/// インストール案内（エラーメッセージ用）
const INSTALL_HINT: &str = "ollama (https://ollama.com)";

/// 抽出プロンプトに含める本文の最大文字数
const EXTRACTION_TEXT_LIMIT: usize = 3000;

/// レビュープロンプトに含める本文の最大文字数
const REVIEW_TEXT_LIMIT: usize = 2000;

/// LLM CLI クライアント
#[derive(Debug, Clone)]
pub struct LlmCliClient {
    command: String,
    model: String,
}

impl LlmCliClient {
    pub fn new() -> Self {
        Self::with_command(DEFAULT_COMMAND, DEFAULT_MODEL)
    }

    /// コマンド名とモデル名を指定して生成
    pub fn with_command(command: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            model: model.into(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// CLIコマンドを実行し、出力中の JSON オブジェクトを返す
    ///
    /// # エラー
    ///
    /// - [`ProviderError::CliExecution`] - CLI実行エラー
    /// - [`ProviderError::InvalidResponse`] - JSON を含まない出力
    async fn execute_cli(&self, prompt: &str) -> Result<Value, ProviderError> {
        let output = Command::new(&self.command)
            .arg("run")
            .arg(&self.model)
            .arg("--format")
            .arg("json")
            .arg(prompt)
            .kill_on_drop(true)
            .output()
            .await?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProviderError::CliExecution(format!(
                "Command failed with exit code {}: {}",
                output.status.code().unwrap_or(-1),
                stderr
            )));
        }

        let stdout = String::from_utf8(output.stdout)?;
        parse_json_object(&stdout)
    }
}

impl Default for LlmCliClient {
    fn default() -> Self {
        Self::new()
    }
}

/// 出力から最初の `{` と最後の `}` の間を JSON として読む
///
/// モデルがコードフェンスや前置きを付けても読めるようにするためです。
fn parse_json_object(output: &str) -> Result<Value, ProviderError> {
    let start = output.find('{');
    let end = output.rfind('}');
    let body = match (start, end) {
        (Some(s), Some(e)) if s < e => &output[s..=e],
        _ => {
            return Err(ProviderError::InvalidResponse(format!(
                "JSON object not found in CLI output: {}",
                output
            )));
        }
    };

    serde_json::from_str(body).map_err(|e| {
        ProviderError::InvalidResponse(format!(
            "Failed to parse CLI JSON output: {}. Output was: {}",
            e, output
        ))
    })
}

/// 文字境界を壊さずに先頭 `limit` 文字を取り出す
fn truncate_chars(text: &str, limit: usize) -> &str {
    match text.char_indices().nth(limit) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

fn extraction_prompt(text: &str, schema: &ExtractionSchema) -> String {
    format!(
        "You are an invoice data extraction engine. Extract the fields described by the \
         JSON schema below from the invoice text. Respond with a single JSON object only. \
         Use null for fields that are not present. Dates must be YYYY-MM-DD.\n\n\
         Schema:\n{}\n\nInvoice text:\n{}",
        schema.schema,
        truncate_chars(text, EXTRACTION_TEXT_LIMIT)
    )
}

fn review_prompt(text: &str, fields: &ExtractedFields) -> Result<String, ProviderError> {
    Ok(format!(
        "You are an invoice auditor. Compare the extracted data with the invoice text. \
         Respond with a JSON object containing \"corrections\" (field -> corrected value), \
         \"confidence_score\" (0.0-1.0), \"errors\" and \"warnings\" (lists of strings).\n\n\
         Extracted data:\n{}\n\nInvoice text:\n{}",
        serde_json::to_string(fields)?,
        truncate_chars(text, REVIEW_TEXT_LIMIT)
    ))
}

/// レビュー CLI の出力形式
#[derive(Debug, Deserialize)]
struct ReviewCliResponse {
    #[serde(default)]
    corrections: Map<String, Value>,
    #[serde(default = "default_review_confidence")]
    confidence_score: f64,
    #[serde(default)]
    errors: Vec<String>,
    #[serde(default)]
    warnings: Vec<String>,
}

fn default_review_confidence() -> f64 {
    0.5
}

impl From<ReviewCliResponse> for FieldReview {
    fn from(response: ReviewCliResponse) -> Self {
        let issues = response
            .errors
            .into_iter()
            .chain(response.warnings)
            .collect();
        Self {
            corrections: response.corrections,
            confidence: response.confidence_score.clamp(0.0, 1.0),
            issues,
        }
    }
}

#[async_trait]
impl FieldExtractor for LlmCliClient {
    async fn extract_fields(
        &self,
        text: &str,
        schema: &ExtractionSchema,
    ) -> Result<ExtractedFields, ProviderError> {
        check_cli_available(&self.command, INSTALL_HINT).await?;

        let value = self.execute_cli(&extraction_prompt(text, schema)).await?;
        let fields: ExtractedFields = serde_json::from_value(value)?;

        let missing: Vec<&str> = schema
            .required
            .iter()
            .map(String::as_str)
            .filter(|field| !fields.has(field))
            .collect();
        if !missing.is_empty() {
            tracing::debug!(model = %self.model, ?missing, "LLM 出力に必須フィールドがありません");
        }

        Ok(fields)
    }

    async fn check_available(&self) -> Result<(), ProviderError> {
        check_cli_available(&self.command, INSTALL_HINT).await
    }
}

#[async_trait]
impl FieldReviewer for LlmCliClient {
    async fn review_fields(
        &self,
        text: &str,
        fields: &ExtractedFields,
    ) -> Result<FieldReview, ProviderError> {
        check_cli_available(&self.command, INSTALL_HINT).await?;

        let value = self.execute_cli(&review_prompt(text, fields)?).await?;
        let response: ReviewCliResponse = serde_json::from_value(value)?;
        Ok(response.into())
    }
}
