//! parse ステージ: ドキュメント → テキスト
//!
//! テキスト抽出コラボレーターを呼び出し、取り出したテキストとメタデータを
//! コンテキストに保存します。
//!
//! # 信頼度
//!
//! - テキストが空なら 0.0（エラー）
//! - 基本 0.5、100 文字超で +0.2、500 文字超で +0.1
//! - OCR でなく直接抽出できた場合 +0.2
//! - 請求書らしいキーワード 1 つにつき +0.05（最大 +0.2）

use std::sync::Arc;

use async_trait::async_trait;

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::{ProviderError, StageError};
use crate::provider::document::is_supported_extension;
use crate::provider::{ContentExtractor, DocumentSource, ExtractionMethod};
use super::{Stage, StageInput, StageKind};

const KEYWORDS: [&str; 7] = ["invoice", "bill", "receipt", "total", "amount", "date", "due"];

/// parse ステージ
pub struct ParseStage {
    content: Arc<dyn ContentExtractor>,
}

impl ParseStage {
    pub fn new(content: Arc<dyn ContentExtractor>) -> Self {
        Self { content }
    }
}

/// 抽出テキストの信頼度
fn text_confidence(text: &str, method: ExtractionMethod) -> f64 {
    let length = text.trim().chars().count();
    if length == 0 {
        return 0.0;
    }

    let mut confidence = 0.5;
    if length > 100 {
        confidence += 0.2;
    }
    if length > 500 {
        confidence += 0.1;
    }
    if method != ExtractionMethod::Ocr {
        confidence += 0.2;
    }

    let lower = text.to_lowercase();
    let keywords = KEYWORDS.iter().filter(|kw| lower.contains(*kw)).count();
    confidence += (keywords as f64 * 0.05).min(0.2);

    confidence.min(1.0)
}

#[async_trait]
impl Stage for ParseStage {
    fn kind(&self) -> StageKind {
        StageKind::Parse
    }

    fn validate_input(&self, input: &StageInput) -> bool {
        match input.as_document() {
            Some(DocumentSource::Path(path)) => {
                path.is_file()
                    && path
                        .extension()
                        .is_some_and(|ext| is_supported_extension(&ext.to_string_lossy()))
            }
            Some(DocumentSource::Bytes { data, .. }) => !data.is_empty(),
            Some(DocumentSource::Text(text)) => !text.trim().is_empty(),
            None => false,
        }
    }

    async fn execute(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        let source = input
            .as_document()
            .ok_or_else(|| StageError::Context("parse stage requires a document".to_string()))?;

        let mut result = StageResult::new(StageKind::Parse);
        result.add_step("extract_text", format!("Extracting text from {}", source.label()));

        let (text, metadata) = self.content.extract_content(source).await?;
        let confidence = text_confidence(&text, metadata.extraction_method);

        if text.trim().is_empty() {
            result.add_error("No text extracted from document");
        } else {
            result.add_scored_step(
                "text_extracted",
                format!(
                    "Extracted {} characters ({:?})",
                    text.chars().count(),
                    metadata.extraction_method
                ),
                confidence,
            );
        }

        tracing::debug!(
            session_id = %ctx.session_id(),
            format = %metadata.format,
            confidence,
            "テキスト抽出が完了"
        );
        ctx.set_raw_text(text, Some(metadata));
        Ok(result.with_confidence(confidence))
    }

    async fn check_dependencies(&self) -> Result<(), ProviderError> {
        self.content.check_available().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::DocumentMetadata;

    struct FixedContent {
        text: String,
        method: ExtractionMethod,
    }

    #[async_trait]
    impl ContentExtractor for FixedContent {
        async fn extract_content(
            &self,
            _source: &DocumentSource,
        ) -> Result<(String, DocumentMetadata), ProviderError> {
            Ok((
                self.text.clone(),
                DocumentMetadata {
                    file_name: Some("scan.png".to_string()),
                    format: "png".to_string(),
                    size_bytes: 42,
                    extraction_method: self.method,
                },
            ))
        }
    }

    struct BrokenContent;

    #[async_trait]
    impl ContentExtractor for BrokenContent {
        async fn extract_content(
            &self,
            _source: &DocumentSource,
        ) -> Result<(String, DocumentMetadata), ProviderError> {
            Err(ProviderError::CliExecution("tesseract crashed".to_string()))
        }
    }

    fn stage(text: &str, method: ExtractionMethod) -> ParseStage {
        ParseStage::new(Arc::new(FixedContent {
            text: text.to_string(),
            method,
        }))
    }

    fn document() -> StageInput {
        StageInput::Document(DocumentSource::Bytes {
            name: "scan.png".to_string(),
            data: vec![0u8; 42],
        })
    }

    #[test]
    fn test_text_confidence() {
        assert_eq!(text_confidence("   ", ExtractionMethod::Direct), 0.0);

        // 0.5 + direct 0.2 + invoice/total 0.1
        let short = "Invoice total";
        assert!((text_confidence(short, ExtractionMethod::Direct) - 0.8).abs() < 1e-9);

        // 0.5 + 100 文字超 0.2（OCR、キーワードなし）
        let long = "x".repeat(150);
        assert!((text_confidence(&long, ExtractionMethod::Ocr) - 0.7).abs() < 1e-9);

        let rich = format!("invoice bill receipt total amount date due {}", "y".repeat(600));
        assert_eq!(text_confidence(&rich, ExtractionMethod::Direct), 1.0);
    }

    #[test]
    fn test_validate_input() {
        let stage = stage("x", ExtractionMethod::Direct);

        assert!(stage.validate_input(&document()));
        assert!(stage.validate_input(&StageInput::Document(DocumentSource::Text("INVOICE".into()))));
        assert!(!stage.validate_input(&StageInput::Document(DocumentSource::Text("  ".into()))));
        assert!(!stage.validate_input(&StageInput::Document(DocumentSource::Path(
            "does/not/exist.pdf".into()
        ))));
    }

    #[tokio::test]
    async fn test_execute_stores_text_and_metadata() {
        let stage = stage("Invoice #: INV-1\nTotal: 10.00", ExtractionMethod::Ocr);
        let mut ctx = RunContext::new("s", "standard", "scan.png");

        let result = stage.execute(&document(), &mut ctx).await.unwrap();

        assert!(!result.has_errors());
        assert_eq!(ctx.raw_text(), Some("Invoice #: INV-1\nTotal: 10.00"));
        assert_eq!(ctx.document_metadata().unwrap().format, "png");
        assert!(result.confidence() > 0.5);
    }

    #[tokio::test]
    async fn test_empty_text_is_an_error() {
        let stage = stage("", ExtractionMethod::Ocr);
        let mut ctx = RunContext::new("s", "standard", "scan.png");

        let result = stage.execute(&document(), &mut ctx).await.unwrap();

        assert!(result.has_errors());
        assert_eq!(result.confidence(), 0.0);
    }

    #[tokio::test]
    async fn test_collaborator_failure_is_a_fault() {
        let stage = ParseStage::new(Arc::new(BrokenContent));
        let mut ctx = RunContext::new("s", "standard", "scan.png");

        let err = stage.execute(&document(), &mut ctx).await.unwrap_err();
        assert!(matches!(err, StageError::Provider(_)));
    }
}
