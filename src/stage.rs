//! ステージ（パイプラインの処理単位）
//!
//! # 責務
//!
//! - 全ステージ共通の契約 [`Stage`] トレイトを定義
//! - ステージ名 [`StageKind`] とステージ入力 [`StageInput`] の定義
//! - 6 つの具象ステージ（parse / extract / validate / comply / decide / audit）
//!
//! # 契約
//!
//! - `validate_input`: 副作用のない事前チェック。処理できない入力には `false` を返す
//! - `execute`: ドメイン上の問題（フィールド欠落など）は [`StageResult`] の
//!   エラー・警告として通常の戻り値で返す。`Err` を返すのは外部依存の障害など
//!   インフラ起因の失敗のみで、この場合だけリトライ対象になる
//!
//! # 使用例
//!
//! ```rust,ignore
//! use async_trait::async_trait;
//! use invoice_pipeline::stage::{Stage, StageInput, StageKind};
//!
//! struct NoopStage;
//!
//! #[async_trait]
//! impl Stage for NoopStage {
//!     fn kind(&self) -> StageKind { StageKind::Audit }
//!     fn validate_input(&self, _input: &StageInput) -> bool { true }
//!     async fn execute(&self, _input: &StageInput, _ctx: &mut RunContext)
//!         -> Result<StageResult, StageError>
//!     {
//!         Ok(StageResult::new(StageKind::Audit).with_confidence(1.0))
//!     }
//! }
//! ```

pub mod parse;
pub mod extract;
pub mod validate;
pub mod comply;
pub mod decide;
pub mod audit;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::engine::context::RunContext;
use crate::engine::result::StageResult;
use crate::error::{ProviderError, StageError};
use crate::model::Invoice;
use crate::provider::DocumentSource;

pub use parse::ParseStage;
pub use extract::ExtractStage;
pub use validate::ValidateStage;
pub use comply::ComplyStage;
pub use decide::DecideStage;
pub use audit::{AuditRecord, AuditStage};

/// ステージ名
///
/// ワークフロー定義ファイルでは小文字名（`parse` など）で記述します。
/// 旧名（`document_parser`, `data_extraction`, `validation`,
/// `regional_compliance`, `approval`）も読み込み時に受け付けます。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    #[serde(alias = "document_parser")]
    Parse,
    #[serde(alias = "data_extraction")]
    Extract,
    #[serde(alias = "validation")]
    Validate,
    #[serde(alias = "regional_compliance")]
    Comply,
    #[serde(alias = "approval")]
    Decide,
    Audit,
}

impl StageKind {
    /// パイプライン順の全ステージ
    pub const ALL: [StageKind; 6] = [
        StageKind::Parse,
        StageKind::Extract,
        StageKind::Validate,
        StageKind::Comply,
        StageKind::Decide,
        StageKind::Audit,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StageKind::Parse => "parse",
            StageKind::Extract => "extract",
            StageKind::Validate => "validate",
            StageKind::Comply => "comply",
            StageKind::Decide => "decide",
            StageKind::Audit => "audit",
        }
    }

    /// 元のドキュメントを入力に取るステージかどうか
    ///
    /// parse と extract は元の入力を受け取り、それ以降のステージは
    /// コンテキスト上の請求書を受け取ります。
    pub fn consumes_document(self) -> bool {
        matches!(self, StageKind::Parse | StageKind::Extract)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "parse" | "document_parser" => Ok(StageKind::Parse),
            "extract" | "data_extraction" => Ok(StageKind::Extract),
            "validate" | "validation" => Ok(StageKind::Validate),
            "comply" | "regional_compliance" => Ok(StageKind::Comply),
            "decide" | "approval" => Ok(StageKind::Decide),
            "audit" => Ok(StageKind::Audit),
            other => Err(format!("未知のステージ名です: {}", other)),
        }
    }
}

/// ステージへの入力
#[derive(Debug, Clone)]
pub enum StageInput {
    /// 元のドキュメント（parse / extract）
    Document(DocumentSource),
    /// コンテキスト上の請求書のスナップショット（validate 以降）
    ///
    /// ステータスの変更は [`RunContext::invoice_mut`] を通じて行います。
    Record(Box<Invoice>),
}

impl StageInput {
    pub fn as_document(&self) -> Option<&DocumentSource> {
        match self {
            StageInput::Document(source) => Some(source),
            StageInput::Record(_) => None,
        }
    }

    pub fn as_record(&self) -> Option<&Invoice> {
        match self {
            StageInput::Record(invoice) => Some(invoice),
            StageInput::Document(_) => None,
        }
    }
}

/// パイプラインステージの共通インターフェース
///
/// # 実装要件
///
/// - `Send + Sync`: コーディネーターを複数タスクで共有可能にするため
/// - 非同期実行対応（`async_trait`を使用）
#[async_trait]
pub trait Stage: Send + Sync {
    /// ステージ名
    fn kind(&self) -> StageKind;

    /// 入力の事前チェック（副作用なし）
    fn validate_input(&self, input: &StageInput) -> bool;

    /// ステージ本体
    ///
    /// # エラー
    ///
    /// インフラ起因の失敗のみ [`StageError`] で返します。
    /// ドメインチェックの結果は `Ok(StageResult)` のエラー・警告に含めます。
    async fn execute(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError>;

    /// 依存先の疎通確認（ヘルスチェック用）
    ///
    /// 既定では何も確認しません。
    async fn check_dependencies(&self) -> Result<(), ProviderError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_kind_from_str_accepts_aliases() {
        assert_eq!("parse".parse::<StageKind>(), Ok(StageKind::Parse));
        assert_eq!("data_extraction".parse::<StageKind>(), Ok(StageKind::Extract));
        assert_eq!("Regional_Compliance".parse::<StageKind>(), Ok(StageKind::Comply));
        assert_eq!("approval".parse::<StageKind>(), Ok(StageKind::Decide));
        assert!("ocr".parse::<StageKind>().is_err());
    }

    #[test]
    fn test_stage_kind_display_round_trip() {
        for kind in StageKind::ALL {
            assert_eq!(kind.to_string().parse::<StageKind>(), Ok(kind));
        }
    }

    #[test]
    fn test_consumes_document() {
        assert!(StageKind::Parse.consumes_document());
        assert!(StageKind::Extract.consumes_document());
        assert!(!StageKind::Validate.consumes_document());
        assert!(!StageKind::Audit.consumes_document());
    }

    #[test]
    fn test_stage_kind_serde_alias() {
        #[derive(Deserialize)]
        struct Wrapper {
            stage: StageKind,
        }

        let parsed: Wrapper = toml::from_str("stage = \"document_parser\"").unwrap();
        assert_eq!(parsed.stage, StageKind::Parse);
    }
}
