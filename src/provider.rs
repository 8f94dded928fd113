//! 外部コラボレーター（CLI版）
//!
//! # 責務
//!
//! - パイプラインが利用する外部依存先を細いトレイトで抽象化
//! - 各トレイトの既定実装（CLI ツール呼び出し、正規表現抽出、組み込みルール表、JSON Lines 監査ログ）
//! - 設定から既定のコラボレーター一式を組み立てる [`Collaborators`]
//!
//! # アーキテクチャ
//!
//! このモジュールは **CLIツール呼び出しベース** で設計されています。
//! テキスト抽出と LLM 呼び出しはどちらもローカルの CLI に委譲し、
//! コード内では HTTP クライアントや API キーを扱いません。
//!
//! ## 使用するCLIツール
//!
//! - **PDF**: `pdftotext`（poppler-utils）
//! - **画像 OCR**: `tesseract`（tesseract-ocr）
//! - **LLM**: `ollama`（設定で `llm.enabled = true` の場合のみ）
//!
//! # モジュール構成
//!
//! - `traits` - 共通インターフェース（[`ContentExtractor`] トレイト等）
//! - `document` - CLI ベースのテキスト抽出
//! - `llm` - LLM CLI による構造化抽出とレビュー
//! - `pattern` - 正規表現によるフォールバック抽出
//! - `regional` - 組み込みの地域ルール
//! - `audit_log` - 監査レコードの書き込み先
//!
//! # 使用例
//!
//! ```rust,no_run
//! use invoice_pipeline::config::Settings;
//! use invoice_pipeline::provider::{Collaborators, DocumentSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let collaborators = Collaborators::from_settings(&Settings::default());
//!
//!     let (text, metadata) = collaborators
//!         .content
//!         .extract_content(&DocumentSource::Path("invoices/inv-001.pdf".into()))
//!         .await?;
//!
//!     println!("{} ({} 文字)", metadata.format, text.len());
//!     Ok(())
//! }
//! ```

pub mod traits;
pub mod document;
pub mod llm;
pub mod pattern;
pub mod regional;
pub mod audit_log;

use std::sync::Arc;

use tokio::process::Command;

// 公開APIの再エクスポート
pub use traits::{
    AuditSink, ContentExtractor, DocumentMetadata, DocumentSource, ExtractedFields,
    ExtractedLineItem, ExtractionMethod, ExtractionSchema, FieldExtractor, FieldReview,
    FieldReviewer, RegionalRuleSource,
};
pub use audit_log::{JsonlAuditSink, MemoryAuditSink};
pub use document::CliContentExtractor;
pub use llm::LlmCliClient;
pub use pattern::PatternExtractor;
pub use regional::{ApprovalLimits, BuiltinRegionalRules, RegionRules, TaxIdRule};

use crate::config::Settings;
use crate::error::ProviderError;

/// CLIツールが利用可能か確認
///
/// `which` コマンド（Unix系）または `where` コマンド（Windows）を使用して、
/// CLIツールがインストールされているか確認します。
///
/// # 引数
///
/// - `command`: 確認するコマンド名
/// - `hint`: 見つからなかった場合に案内するパッケージ名
///
/// # エラー
///
/// - [`ProviderError::CliNotFound`] - CLIツールが見つからない
pub(crate) async fn check_cli_available(command: &str, hint: &str) -> Result<(), ProviderError> {
    // Unix系では `which`、Windowsでは `where` を使用
    let check_command = if cfg!(target_os = "windows") {
        "where"
    } else {
        "which"
    };

    let found = Command::new(check_command)
        .arg(command)
        .kill_on_drop(true)
        .output()
        .await
        .is_ok_and(|output| output.status.success());

    if found {
        Ok(())
    } else {
        Err(ProviderError::CliNotFound(
            command.to_string(),
            hint.to_string(),
        ))
    }
}

/// ステージが利用するコラボレーター一式
///
/// テストではフィールドを差し替えてモックを注入します。
#[derive(Clone)]
pub struct Collaborators {
    pub content: Arc<dyn ContentExtractor>,
    /// 構造化抽出器（`None` なら正規表現抽出のみ）
    pub extractor: Option<Arc<dyn FieldExtractor>>,
    pub reviewer: Option<Arc<dyn FieldReviewer>>,
    pub rules: Arc<dyn RegionalRuleSource>,
    pub audit: Arc<dyn AuditSink>,
}

impl Collaborators {
    /// 設定から既定のコラボレーターを組み立てる
    ///
    /// - `llm.enabled` なら LLM CLI を構造化抽出器に、`llm.review` ならレビューにも使用
    /// - 監査ログは `audit.log_path` の JSON Lines ファイル
    pub fn from_settings(settings: &Settings) -> Self {
        let llm = settings
            .llm
            .enabled
            .then(|| Arc::new(LlmCliClient::with_command(&settings.llm.command, &settings.llm.model)));

        let extractor = llm
            .clone()
            .map(|client| client as Arc<dyn FieldExtractor>);
        let reviewer = llm
            .filter(|_| settings.llm.review)
            .map(|client| client as Arc<dyn FieldReviewer>);

        Self {
            content: Arc::new(CliContentExtractor::with_commands(
                &settings.document.pdftotext,
                &settings.document.tesseract,
            )),
            extractor,
            reviewer,
            rules: Arc::new(BuiltinRegionalRules::new()),
            audit: Arc::new(JsonlAuditSink::new(&settings.audit.log_path)),
        }
    }

    /// 外部 CLI を使わないコラボレーター一式
    ///
    /// インラインテキストのみ扱え、監査レコードはメモリに保持されます。
    pub fn offline(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            content: Arc::new(CliContentExtractor::new()),
            extractor: None,
            reviewer: None,
            rules: Arc::new(BuiltinRegionalRules::new()),
            audit,
        }
    }
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("extractor", &self.extractor.is_some())
            .field("reviewer", &self.reviewer.is_some())
            .finish_non_exhaustive()
    }
}
