//! TOML デシリアライズ用の DTO (Data Transfer Object)
//!
//! # 責務
//!
//! このモジュールは、TOML ファイルからのデータ読み込み専用の構造体を提供します。
//! DTO はバリデーション前の「生データ」を表現し、ドメインモデルとは分離されています。
//!
//! ## 設計思想
//!
//! - **単一責務**: TOML のデシリアライズのみを担当
//! - **バリデーション前の状態**: 不正なデータも一旦受け入れる
//! - **カプセル化**: config モジュール内部のみで使用（外部非公開）
//!
//! ## 変換フロー
//!
//! ```text
//! TOML ファイル
//!   ↓ (デシリアライズ)
//! WorkflowDto / SettingsDto
//!   ↓ (TryFrom でバリデーション)
//! Workflow / Settings (ドメインモデル)
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// ワークフロー DTO
///
/// TOML の `[workflow]` セクションと `[[steps]]` 配列をデシリアライズ/シリアライズします。
///
/// **注**: この構造体は config モジュール内部の実装詳細です。
/// 外部からは [`Workflow`](super::workflow::Workflow) を使用してください。
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowDto {
    /// ワークフローのメタデータ
    pub(super) workflow: WorkflowMetadataDto,
    /// ステップの配列
    #[serde(default)]
    pub(super) steps: Vec<WorkflowStepDto>,
}

/// ワークフローメタデータ DTO
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowMetadataDto {
    pub(super) name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) version: Option<String>,
}

/// ワークフローステップ DTO
#[derive(Debug, Serialize, Deserialize)]
pub(super) struct WorkflowStepDto {
    /// ステージ名（`parse`, `extract`, ...）
    pub(super) stage: String,
    /// 省略時は必須
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) required: Option<bool>,
    /// スキップ条件名（`high_confidence`, `missing_record`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) skip_if: Option<String>,
    /// スキップ条件の閾値
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub(super) threshold: Option<f64>,
}

/// 設定ファイル DTO
///
/// 全セクション・全フィールドが省略可能で、省略時は既定値を使用します。
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct SettingsDto {
    #[serde(default)]
    pub(super) thresholds: ThresholdsDto,
    #[serde(default)]
    pub(super) runtime: RuntimeDto,
    /// ステージ名 → ステージ設定
    #[serde(default)]
    pub(super) stages: BTreeMap<String, StageSettingsDto>,
    #[serde(default)]
    pub(super) llm: LlmDto,
    #[serde(default)]
    pub(super) document: DocumentDto,
    #[serde(default)]
    pub(super) audit: AuditDto,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct ThresholdsDto {
    pub(super) auto_approve: Option<f64>,
    pub(super) review: Option<f64>,
    pub(super) validation_pass: Option<f64>,
    pub(super) compliance_pass: Option<f64>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct RuntimeDto {
    pub(super) retry_delay_ms: Option<u64>,
    pub(super) history_limit: Option<usize>,
    pub(super) default_region: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct StageSettingsDto {
    pub(super) timeout_secs: Option<u64>,
    pub(super) max_retries: Option<u32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct LlmDto {
    pub(super) enabled: Option<bool>,
    pub(super) command: Option<String>,
    pub(super) model: Option<String>,
    pub(super) review: Option<bool>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct DocumentDto {
    pub(super) pdftotext: Option<String>,
    pub(super) tesseract: Option<String>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct AuditDto {
    pub(super) log_path: Option<PathBuf>,
    pub(super) retain_sensitive: Option<bool>,
}
