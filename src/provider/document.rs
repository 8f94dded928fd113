//! CLI ベースのテキスト抽出
//!
//! # 責務
//!
//! - PDF は `pdftotext`（poppler-utils）、画像は `tesseract` を呼び出してテキストを取り出す
//! - テキストファイル・テキスト入力はそのまま読み込む
//! - [`ContentExtractor`] トレイトを実装
//!
//! # CLIツール
//!
//! - **PDF**: `pdftotext -layout <file> -`
//! - **画像**: `tesseract <file> stdout`
//!
//! バイト列で渡された PDF・画像は一時ファイルに書き出してから CLI に渡します。
//! 一時ファイルは抽出が中断された場合も含め、処理を抜けた時点で削除されます。
//! 呼び出し側のタイムアウトで future が破棄されると、起動中の CLI も終了させます。

use std::path::Path;

use async_trait::async_trait;
use tokio::process::Command;

use crate::error::ProviderError;
use super::check_cli_available;
use super::traits::{ContentExtractor, DocumentMetadata, DocumentSource, ExtractionMethod};

/// 対応する拡張子
pub const SUPPORTED_EXTENSIONS: [&str; 7] = ["pdf", "png", "jpg", "jpeg", "tiff", "tif", "txt"];

const IMAGE_EXTENSIONS: [&str; 5] = ["png", "jpg", "jpeg", "tiff", "tif"];

/// 拡張子が対応形式かどうか
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str())
}

/// CLI テキスト抽出器
#[derive(Debug, Clone)]
pub struct CliContentExtractor {
    pdftotext: String,
    tesseract: String,
}

impl CliContentExtractor {
    pub fn new() -> Self {
        Self::with_commands("pdftotext", "tesseract")
    }

    /// コマンド名を指定して生成
    pub fn with_commands(pdftotext: impl Into<String>, tesseract: impl Into<String>) -> Self {
        Self {
            pdftotext: pdftotext.into(),
            tesseract: tesseract.into(),
        }
    }

    async fn extract_file(
        &self,
        path: &Path,
        ext: &str,
    ) -> Result<(String, ExtractionMethod), ProviderError> {
        match ext {
            "txt" => Ok((tokio::fs::read_to_string(path).await?, ExtractionMethod::Direct)),
            "pdf" => {
                check_cli_available(&self.pdftotext, "poppler-utils").await?;
                let text = run_cli(
                    Command::new(&self.pdftotext)
                        .arg("-layout")
                        .arg(path)
                        .arg("-"),
                )
                .await?;
                Ok((text, ExtractionMethod::Direct))
            }
            ext if IMAGE_EXTENSIONS.contains(&ext) => {
                check_cli_available(&self.tesseract, "tesseract-ocr").await?;
                let text = run_cli(Command::new(&self.tesseract).arg(path).arg("stdout")).await?;
                Ok((text, ExtractionMethod::Ocr))
            }
            other => Err(ProviderError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl Default for CliContentExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// CLI を実行して標準出力を返す
async fn run_cli(command: &mut Command) -> Result<String, ProviderError> {
    let output = command.kill_on_drop(true).output().await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProviderError::CliExecution(format!(
            "Command failed with exit code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr
        )));
    }

    Ok(String::from_utf8(output.stdout)?)
}

#[async_trait]
impl ContentExtractor for CliContentExtractor {
    async fn extract_content(
        &self,
        source: &DocumentSource,
    ) -> Result<(String, DocumentMetadata), ProviderError> {
        match source {
            DocumentSource::Text(text) => Ok((
                text.clone(),
                DocumentMetadata {
                    file_name: None,
                    format: "text".to_string(),
                    size_bytes: text.len() as u64,
                    extraction_method: ExtractionMethod::Inline,
                },
            )),
            DocumentSource::Path(path) => {
                let ext = source
                    .extension()
                    .ok_or_else(|| ProviderError::UnsupportedFormat(path.display().to_string()))?;
                let size_bytes = tokio::fs::metadata(path).await?.len();
                let (text, method) = self.extract_file(path, &ext).await?;

                tracing::debug!(file = %path.display(), chars = text.len(), "テキストを抽出");
                Ok((
                    text,
                    DocumentMetadata {
                        file_name: path.file_name().map(|n| n.to_string_lossy().into_owned()),
                        format: ext,
                        size_bytes,
                        extraction_method: method,
                    },
                ))
            }
            DocumentSource::Bytes { name, data } => {
                let ext = source
                    .extension()
                    .ok_or_else(|| ProviderError::UnsupportedFormat(name.clone()))?;
                let metadata = |method: ExtractionMethod| DocumentMetadata {
                    file_name: Some(name.clone()),
                    format: ext.clone(),
                    size_bytes: data.len() as u64,
                    extraction_method: method,
                };

                if ext == "txt" {
                    let text = String::from_utf8(data.clone())?;
                    return Ok((text, metadata(ExtractionMethod::Direct)));
                }
                if !is_supported_extension(&ext) {
                    return Err(ProviderError::UnsupportedFormat(ext.clone()));
                }

                // drop 時に削除されるため、CLI の終了まで保持する
                let temp = tempfile::Builder::new()
                    .prefix("invoice-pipeline-")
                    .suffix(&format!(".{}", ext))
                    .tempfile()?;
                tokio::fs::write(temp.path(), data).await?;

                let (text, method) = self.extract_file(temp.path(), &ext).await?;
                Ok((text, metadata(method)))
            }
        }
    }

    async fn check_available(&self) -> Result<(), ProviderError> {
        check_cli_available(&self.pdftotext, "poppler-utils").await?;
        check_cli_available(&self.tesseract, "tesseract-ocr").await
    }
}
