//! パイプライン設定
//!
//! # 責務
//!
//! - 設定ファイル（TOML）を読み込み、[`Settings`] に変換
//! - 省略された項目を既定値で補完
//! - 閾値の範囲チェックなどのバリデーション
//!
//! ## 設定ファイル例
//!
//! ```toml
//! [thresholds]
//! auto_approve = 0.95
//! review = 0.75
//!
//! [runtime]
//! retry_delay_ms = 500
//! default_region = "EU"
//!
//! [stages.extract]
//! timeout_secs = 60
//! max_retries = 2
//!
//! [llm]
//! enabled = true
//! model = "qwen2.5:14b"
//!
//! [audit]
//! log_path = "logs/audit.jsonl"
//! ```
//!
//! 全セクションは省略可能です。`Settings::default()` は組み込みの既定値を返します。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::decision::DecisionThresholds;
use crate::engine::executor::RetryPolicy;
use crate::error::ConfigError;
use crate::stage::StageKind;
use super::dto::{
    AuditDto, DocumentDto, LlmDto, RuntimeDto, SettingsDto, StageSettingsDto, ThresholdsDto,
};

/// 判定・検証の閾値
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// これ以上の信頼度なら自動承認に進む
    pub auto_approve: f64,
    /// これ未満の信頼度なら却下
    pub review: f64,
    /// validate ステージで validated にするスコア
    pub validation_pass: f64,
    /// comply ステージで準拠とみなすスコア
    pub compliance_pass: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            auto_approve: 0.95,
            review: 0.75,
            validation_pass: 0.7,
            compliance_pass: 0.7,
        }
    }
}

/// ステージごとの実行設定
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    pub timeout_secs: u64,
    pub max_retries: u32,
}

impl StageSettings {
    /// ステージ別の既定値
    pub fn default_for(kind: StageKind) -> Self {
        let (timeout_secs, max_retries) = match kind {
            StageKind::Parse => (30, 3),
            StageKind::Extract => (45, 3),
            StageKind::Validate => (30, 2),
            StageKind::Comply => (60, 2),
            StageKind::Decide => (30, 1),
            StageKind::Audit => (15, 1),
        };
        Self {
            timeout_secs,
            max_retries,
        }
    }
}

/// LLM CLI の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmSettings {
    /// 構造化抽出に LLM を使うか（無効なら正規表現抽出のみ）
    pub enabled: bool,
    pub command: String,
    pub model: String,
    /// 抽出結果の補正（レビュー）も LLM で行うか
    pub review: bool,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            command: "ollama".to_string(),
            model: "qwen2.5:14b".to_string(),
            review: false,
        }
    }
}

/// テキスト抽出 CLI の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSettings {
    pub pdftotext: String,
    pub tesseract: String,
}

impl Default for DocumentSettings {
    fn default() -> Self {
        Self {
            pdftotext: "pdftotext".to_string(),
            tesseract: "tesseract".to_string(),
        }
    }
}

/// 監査ログの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditSettings {
    pub log_path: PathBuf,
    /// 取引先名・金額をマスクせずに残すか
    pub retain_sensitive: bool,
}

impl Default for AuditSettings {
    fn default() -> Self {
        Self {
            log_path: PathBuf::from("logs/audit.jsonl"),
            retain_sensitive: false,
        }
    }
}

/// パイプライン設定（ドメインモデル）
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub thresholds: Thresholds,
    pub retry_delay: Duration,
    /// 実行履歴の保持件数
    pub history_limit: usize,
    pub default_region: String,
    pub stages: BTreeMap<StageKind, StageSettings>,
    pub llm: LlmSettings,
    pub document: DocumentSettings,
    pub audit: AuditSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            thresholds: Thresholds::default(),
            retry_delay: Duration::from_millis(1000),
            history_limit: 1000,
            default_region: "US".to_string(),
            stages: StageKind::ALL
                .into_iter()
                .map(|kind| (kind, StageSettings::default_for(kind)))
                .collect(),
            llm: LlmSettings::default(),
            document: DocumentSettings::default(),
            audit: AuditSettings::default(),
        }
    }
}

impl Settings {
    /// TOML ファイルから設定を読み込む
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列から設定を読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: SettingsDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// 設定を TOML 文字列に変換（省略なしの完全な形）
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(&SettingsDto::from(self.clone()))?)
    }

    /// ステージの実行設定（未設定なら既定値）
    pub fn stage(&self, kind: StageKind) -> StageSettings {
        self.stages
            .get(&kind)
            .copied()
            .unwrap_or_else(|| StageSettings::default_for(kind))
    }

    /// ステージのリトライポリシー
    pub fn retry_policy(&self, kind: StageKind) -> RetryPolicy {
        let stage = self.stage(kind);
        RetryPolicy::new(stage.max_retries, Some(Duration::from_secs(stage.timeout_secs)))
            .with_retry_delay(self.retry_delay)
    }

    /// 判定エンジンの閾値
    pub fn decision_thresholds(&self) -> DecisionThresholds {
        DecisionThresholds {
            auto_approve: self.thresholds.auto_approve,
            review: self.thresholds.review,
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let t = &self.thresholds;
        for (name, value) in [
            ("auto_approve", t.auto_approve),
            ("review", t.review),
            ("validation_pass", t.validation_pass),
            ("compliance_pass", t.compliance_pass),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Validation(format!(
                    "閾値 '{}' は 0.0〜1.0 で指定してください: {}",
                    name, value
                )));
            }
        }
        if t.review > t.auto_approve {
            return Err(ConfigError::Validation(format!(
                "review ({}) は auto_approve ({}) 以下である必要があります",
                t.review, t.auto_approve
            )));
        }
        if self.default_region.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_region が空です".to_string(),
            ));
        }
        Ok(())
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// 省略された項目は [`Settings::default`] の値で補完します。
impl TryFrom<SettingsDto> for Settings {
    type Error = ConfigError;

    fn try_from(dto: SettingsDto) -> Result<Self, Self::Error> {
        let defaults = Settings::default();

        let thresholds = Thresholds {
            auto_approve: dto
                .thresholds
                .auto_approve
                .unwrap_or(defaults.thresholds.auto_approve),
            review: dto.thresholds.review.unwrap_or(defaults.thresholds.review),
            validation_pass: dto
                .thresholds
                .validation_pass
                .unwrap_or(defaults.thresholds.validation_pass),
            compliance_pass: dto
                .thresholds
                .compliance_pass
                .unwrap_or(defaults.thresholds.compliance_pass),
        };

        let mut stages = defaults.stages;
        for (name, stage_dto) in dto.stages {
            let kind = name.parse::<StageKind>().map_err(ConfigError::Validation)?;
            let base = StageSettings::default_for(kind);
            stages.insert(
                kind,
                StageSettings {
                    timeout_secs: stage_dto.timeout_secs.unwrap_or(base.timeout_secs),
                    max_retries: stage_dto.max_retries.unwrap_or(base.max_retries),
                },
            );
        }

        let settings = Self {
            thresholds,
            retry_delay: dto
                .runtime
                .retry_delay_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_delay),
            history_limit: dto.runtime.history_limit.unwrap_or(defaults.history_limit),
            default_region: dto
                .runtime
                .default_region
                .map(|r| r.to_ascii_uppercase())
                .unwrap_or(defaults.default_region),
            stages,
            llm: LlmSettings {
                enabled: dto.llm.enabled.unwrap_or(defaults.llm.enabled),
                command: dto.llm.command.unwrap_or(defaults.llm.command),
                model: dto.llm.model.unwrap_or(defaults.llm.model),
                review: dto.llm.review.unwrap_or(defaults.llm.review),
            },
            document: DocumentSettings {
                pdftotext: dto.document.pdftotext.unwrap_or(defaults.document.pdftotext),
                tesseract: dto.document.tesseract.unwrap_or(defaults.document.tesseract),
            },
            audit: AuditSettings {
                log_path: dto.audit.log_path.unwrap_or(defaults.audit.log_path),
                retain_sensitive: dto
                    .audit
                    .retain_sensitive
                    .unwrap_or(defaults.audit.retain_sensitive),
            },
        };
        settings.validate()?;
        Ok(settings)
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
impl From<Settings> for SettingsDto {
    fn from(settings: Settings) -> Self {
        Self {
            thresholds: ThresholdsDto {
                auto_approve: Some(settings.thresholds.auto_approve),
                review: Some(settings.thresholds.review),
                validation_pass: Some(settings.thresholds.validation_pass),
                compliance_pass: Some(settings.thresholds.compliance_pass),
            },
            runtime: RuntimeDto {
                retry_delay_ms: Some(settings.retry_delay.as_millis() as u64),
                history_limit: Some(settings.history_limit),
                default_region: Some(settings.default_region),
            },
            stages: settings
                .stages
                .into_iter()
                .map(|(kind, stage)| {
                    (
                        kind.to_string(),
                        StageSettingsDto {
                            timeout_secs: Some(stage.timeout_secs),
                            max_retries: Some(stage.max_retries),
                        },
                    )
                })
                .collect(),
            llm: LlmDto {
                enabled: Some(settings.llm.enabled),
                command: Some(settings.llm.command),
                model: Some(settings.llm.model),
                review: Some(settings.llm.review),
            },
            document: DocumentDto {
                pdftotext: Some(settings.document.pdftotext),
                tesseract: Some(settings.document.tesseract),
            },
            audit: AuditDto {
                log_path: Some(settings.audit.log_path),
                retain_sensitive: Some(settings.audit.retain_sensitive),
            },
        }
    }
}
