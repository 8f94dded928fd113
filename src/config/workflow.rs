//! Workflow 定義の読み込みと管理を行うモジュール
//!
//! # 責務
//!
//! このモジュールは、請求書処理のワークフローを TOML 形式で定義し、
//! それを Rust の型として扱うための機能を提供します。
//!
//! ## 主な機能
//!
//! - **TOML パース**: `workflows/` ディレクトリ内の TOML ファイルを読み込み、
//!   [`Workflow`] 構造体にデシリアライズ
//! - **ワークフロー定義**: parse → extract → validate → ... のような処理フローを
//!   ステップの連鎖として表現
//! - **組み込み定義**: `standard`, `fast_track`, `detailed_review`, `compliance_only`
//!
//! ## 使用例
//!
//! ```toml
//! [workflow]
//! name = "fast_track"
//! description = "高信頼度の請求書は検証をスキップ"
//!
//! [[steps]]
//! stage = "parse"
//!
//! [[steps]]
//! stage = "extract"
//!
//! [[steps]]
//! stage = "validate"
//! required = false
//! skip_if = "high_confidence"
//! threshold = 0.95
//! ```
//!
//! ## 関連モジュール
//!
//! - [`crate::config::step`]: 各ステップの定義
//! - [`crate::engine::registry`]: 名前付きワークフローの登録
//! - [`crate::engine::coordinator`]: ワークフローの実行

use std::collections::HashSet;
use std::path::Path;

use crate::error::ConfigError;
use crate::stage::StageKind;
use super::dto::{WorkflowDto, WorkflowMetadataDto};
use super::step::{SkipCondition, WorkflowStep};

/// ワークフロー定義（ドメインモデル）
///
/// バリデーション済みの状態を保証します。
///
/// - 名前が空でない
/// - ステップが 1 つ以上
/// - 同じステージが 2 回以上現れない
///
/// ## DTO との違い
///
/// - [`WorkflowDto`]: TOML デシリアライズ専用、バリデーション前の生データ
/// - [`Workflow`]: バリデーション済み、ドメインロジックを持つ
#[derive(Debug, Clone, PartialEq)]
pub struct Workflow {
    name: String,
    description: Option<String>,
    version: Option<String>,
    steps: Vec<WorkflowStep>,
}

impl Workflow {
    /// ステップ列からワークフローを生成
    ///
    /// # エラー
    ///
    /// バリデーションに失敗した場合は [`ConfigError::Validation`]
    pub fn new(name: impl Into<String>, steps: Vec<WorkflowStep>) -> Result<Self, ConfigError> {
        let workflow = Self {
            name: name.into(),
            description: None,
            version: None,
            steps,
        };
        workflow.validate()?;
        Ok(workflow)
    }

    /// 説明を設定
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ワークフロー名が空です".to_string(),
            ));
        }
        if self.steps.is_empty() {
            return Err(ConfigError::Validation(format!(
                "ワークフロー '{}' にステップがありません",
                self.name
            )));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.stage()) {
                return Err(ConfigError::Validation(format!(
                    "ワークフロー '{}' でステージ '{}' が重複しています",
                    self.name,
                    step.stage()
                )));
            }
        }
        Ok(())
    }

    /// TOML ファイルからワークフローを読み込む
    ///
    /// # 処理フロー
    ///
    /// 1. ファイル読み込み
    /// 2. TOML デシリアライズ → [`WorkflowDto`]
    /// 3. バリデーション & 変換 → [`Workflow`]
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// TOML 文字列からワークフローを読み込む
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let dto: WorkflowDto = toml::from_str(toml)?;
        Self::try_from(dto)
    }

    /// ワークフローを TOML 文字列に変換
    pub fn to_string(&self) -> Result<String, ConfigError> {
        let dto = WorkflowDto::from(self.clone());
        Ok(toml::to_string(&dto)?)
    }

    /// ワークフローを TOML ファイルに保存
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_string()?)?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    pub fn steps(&self) -> &[WorkflowStep] {
        &self.steps
    }

    /// 指定ステージを含むかどうか
    pub fn contains(&self, stage: StageKind) -> bool {
        self.steps.iter().any(|step| step.stage() == stage)
    }

    // ---- 組み込みワークフロー ----

    /// standard: 全ステージ必須、audit のみ任意
    pub fn standard() -> Self {
        Self::builtin(
            "standard",
            "全ステージを順に実行する標準ワークフロー",
            vec![
                WorkflowStep::required(StageKind::Parse),
                WorkflowStep::required(StageKind::Extract),
                WorkflowStep::required(StageKind::Validate),
                WorkflowStep::required(StageKind::Comply),
                WorkflowStep::required(StageKind::Decide),
                WorkflowStep::optional(StageKind::Audit),
            ],
        )
    }

    /// fast_track: 抽出信頼度が 0.95 以上なら検証をスキップ
    pub fn fast_track() -> Self {
        Self::builtin(
            "fast_track",
            "高信頼度の請求書は検証をスキップする高速ワークフロー",
            vec![
                WorkflowStep::required(StageKind::Parse),
                WorkflowStep::required(StageKind::Extract),
                WorkflowStep::optional(StageKind::Validate).skip_when(SkipCondition::HighConfidence {
                    threshold: SkipCondition::DEFAULT_HIGH_CONFIDENCE,
                }),
                WorkflowStep::required(StageKind::Comply),
                WorkflowStep::required(StageKind::Decide),
                WorkflowStep::optional(StageKind::Audit),
            ],
        )
    }

    /// detailed_review: 監査を含む全ステージ必須
    pub fn detailed_review() -> Self {
        Self::builtin(
            "detailed_review",
            "監査を含む全ステージを必須とする詳細レビュー",
            StageKind::ALL.into_iter().map(WorkflowStep::required).collect(),
        )
    }

    /// compliance_only: 判定を行わず、コンプライアンス確認と監査のみ
    pub fn compliance_only() -> Self {
        Self::builtin(
            "compliance_only",
            "判定を行わないコンプライアンス確認",
            vec![
                WorkflowStep::required(StageKind::Parse),
                WorkflowStep::required(StageKind::Extract),
                WorkflowStep::required(StageKind::Validate),
                WorkflowStep::required(StageKind::Comply),
                WorkflowStep::required(StageKind::Audit),
            ],
        )
    }

    /// 組み込みワークフローの一覧
    pub fn builtins() -> Vec<Self> {
        vec![
            Self::standard(),
            Self::fast_track(),
            Self::detailed_review(),
            Self::compliance_only(),
        ]
    }

    fn builtin(name: &str, description: &str, steps: Vec<WorkflowStep>) -> Self {
        Self {
            name: name.to_string(),
            description: Some(description.to_string()),
            version: None,
            steps,
        }
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// # 処理フロー
///
/// 1. ステップの変換（`WorkflowStepDto` → `WorkflowStep`）
/// 2. `Workflow` の構築とバリデーション
impl TryFrom<WorkflowDto> for Workflow {
    type Error = ConfigError;

    fn try_from(dto: WorkflowDto) -> Result<Self, Self::Error> {
        let steps = dto
            .steps
            .into_iter()
            .map(WorkflowStep::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        let workflow = Self {
            name: dto.workflow.name,
            description: dto.workflow.description,
            version: dto.workflow.version,
            steps,
        };
        workflow.validate()?;
        Ok(workflow)
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
impl From<Workflow> for WorkflowDto {
    fn from(workflow: Workflow) -> Self {
        Self {
            workflow: WorkflowMetadataDto {
                name: workflow.name,
                description: workflow.description,
                version: workflow.version,
            },
            steps: workflow.steps.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FAST_TRACK_TOML: &str = r#"
[workflow]
name = "express"
description = "Express lane"
version = "1.0.0"

[[steps]]
stage = "parse"

[[steps]]
stage = "extract"

[[steps]]
stage = "validate"
required = false
skip_if = "high_confidence"
threshold = 0.9

[[steps]]
stage = "decide"
"#;

    #[test]
    fn test_from_toml() {
        let workflow = Workflow::from_toml(FAST_TRACK_TOML).unwrap();

        assert_eq!(workflow.name(), "express");
        assert_eq!(workflow.description(), Some("Express lane"));
        assert_eq!(workflow.version(), Some("1.0.0"));
        assert_eq!(workflow.steps().len(), 4);
        assert!(!workflow.steps()[2].is_required());
        assert_eq!(
            workflow.steps()[2].skip_condition(),
            Some(&SkipCondition::HighConfidence { threshold: 0.9 })
        );
    }

    #[test]
    fn test_roundtrip() {
        let original = Workflow::from_toml(FAST_TRACK_TOML).unwrap();
        let restored = Workflow::from_toml(&original.to_string().unwrap()).unwrap();

        assert_eq!(restored, original);
    }

    #[test]
    fn test_rejects_empty_steps() {
        let err = Workflow::from_toml("[workflow]\nname = \"empty\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_rejects_duplicate_stage() {
        let err = Workflow::new(
            "dup",
            vec![
                WorkflowStep::required(StageKind::Parse),
                WorkflowStep::optional(StageKind::Parse),
            ],
        )
        .unwrap_err();

        assert!(err.to_string().contains("重複"));
    }

    #[test]
    fn test_rejects_unknown_stage_name() {
        let toml = "[workflow]\nname = \"x\"\n\n[[steps]]\nstage = \"translate\"\n";
        assert!(Workflow::from_toml(toml).is_err());
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = Workflow::from_toml("[workflow\nname=").unwrap_err();
        assert!(matches!(err, ConfigError::TomlDeserialize(_)));
    }

    #[test]
    fn test_builtins() {
        let standard = Workflow::standard();
        assert_eq!(standard.steps().len(), 6);
        assert!(standard.steps()[..5].iter().all(|s| s.is_required()));
        assert!(!standard.steps()[5].is_required());

        let fast = Workflow::fast_track();
        let validate = &fast.steps()[2];
        assert_eq!(validate.stage(), StageKind::Validate);
        assert!(!validate.is_required());
        assert!(validate.skip_condition().is_some());

        let detailed = Workflow::detailed_review();
        assert!(detailed.steps().iter().all(|s| s.is_required()));
        assert!(detailed.contains(StageKind::Audit));

        let compliance = Workflow::compliance_only();
        assert!(!compliance.contains(StageKind::Decide));
        assert!(compliance.steps().last().is_some_and(|s| s.is_required()));
    }

    #[test]
    fn test_builtins_pass_validation() {
        for workflow in Workflow::builtins() {
            assert!(workflow.validate().is_ok(), "{}", workflow.name());
        }
    }

    #[test]
    fn test_to_file_and_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("standard.toml");

        Workflow::standard().to_file(&path).unwrap();
        let loaded = Workflow::from_file(&path).unwrap();

        assert_eq!(loaded, Workflow::standard());
    }
}
