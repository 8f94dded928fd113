//! ワークフローステップの定義
//!
//! # 責務
//!
//! Workflowを構成するStepの定義体を提供するモジュール
//! アプリケーションに対して、[WorkflowStep] と [SkipCondition] を提供する。
//!
//! スキップ条件はクロージャではなく名前付きの列挙型で表現するため、
//! ワークフロー定義はコードではなくデータとして TOML に保存できます。

use serde::{Deserialize, Serialize};

use crate::engine::context::RunContext;
use crate::error::ConfigError;
use crate::stage::StageKind;
use super::dto::WorkflowStepDto;

/// ワークフローステップ（ドメインモデル）
///
/// ## DTO との違い
///
/// - [`WorkflowStepDto`](super::dto::WorkflowStepDto): TOML デシリアライズ専用
/// - [`WorkflowStep`]: バリデーション済み、ドメインロジックを持つ
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowStep {
    stage: StageKind,
    required: bool,
    skip_if: Option<SkipCondition>,
}

impl WorkflowStep {
    /// 必須ステップを生成
    pub fn required(stage: StageKind) -> Self {
        Self {
            stage,
            required: true,
            skip_if: None,
        }
    }

    /// 任意ステップを生成
    pub fn optional(stage: StageKind) -> Self {
        Self {
            stage,
            required: false,
            skip_if: None,
        }
    }

    /// スキップ条件を設定
    pub fn skip_when(mut self, condition: SkipCondition) -> Self {
        self.skip_if = Some(condition);
        self
    }

    pub fn stage(&self) -> StageKind {
        self.stage
    }

    pub fn is_required(&self) -> bool {
        self.required
    }

    pub fn skip_condition(&self) -> Option<&SkipCondition> {
        self.skip_if.as_ref()
    }

    /// 現在のコンテキストでこのステップをスキップすべきか
    pub fn should_skip(&self, ctx: &RunContext) -> bool {
        self.skip_if
            .as_ref()
            .is_some_and(|condition| condition.evaluate(ctx))
    }
}

/// スキップ条件
///
/// 条件が真になるとステップはスキップされます。
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "condition", rename_all = "snake_case")]
pub enum SkipCondition {
    /// 抽出信頼度が閾値以上
    HighConfidence {
        threshold: f64,
    },
    /// コンテキストに請求書がない
    MissingRecord,
}

impl SkipCondition {
    /// fast_track の既定閾値
    pub const DEFAULT_HIGH_CONFIDENCE: f64 = 0.95;

    /// 条件名と閾値から生成
    ///
    /// # エラー
    ///
    /// 未知の条件名、または [0, 1] 外の閾値の場合は [`ConfigError::Validation`]
    pub fn from_name(name: &str, threshold: Option<f64>) -> Result<Self, ConfigError> {
        match name {
            "high_confidence" => {
                let threshold = threshold.unwrap_or(Self::DEFAULT_HIGH_CONFIDENCE);
                if !(0.0..=1.0).contains(&threshold) {
                    return Err(ConfigError::Validation(format!(
                        "スキップ条件の閾値は 0.0〜1.0 で指定してください: {}",
                        threshold
                    )));
                }
                Ok(SkipCondition::HighConfidence { threshold })
            }
            "missing_record" => Ok(SkipCondition::MissingRecord),
            other => Err(ConfigError::Validation(format!(
                "未知のスキップ条件です: {}",
                other
            ))),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SkipCondition::HighConfidence { .. } => "high_confidence",
            SkipCondition::MissingRecord => "missing_record",
        }
    }

    pub fn threshold(&self) -> Option<f64> {
        match self {
            SkipCondition::HighConfidence { threshold } => Some(*threshold),
            SkipCondition::MissingRecord => None,
        }
    }

    /// コンテキストに対して条件を評価
    pub fn evaluate(&self, ctx: &RunContext) -> bool {
        match self {
            SkipCondition::HighConfidence { threshold } => ctx
                .extraction_confidence()
                .is_some_and(|confidence| confidence >= *threshold),
            SkipCondition::MissingRecord => ctx.invoice().is_none(),
        }
    }
}

/// DTO からドメインモデルへの変換（読み込み方向）
///
/// バリデーションを実施し、不正なデータの場合は [`ConfigError::Validation`] を返します。
impl TryFrom<WorkflowStepDto> for WorkflowStep {
    type Error = ConfigError;

    fn try_from(dto: WorkflowStepDto) -> Result<Self, Self::Error> {
        let stage = dto
            .stage
            .parse::<StageKind>()
            .map_err(ConfigError::Validation)?;

        let skip_if = match dto.skip_if.as_deref() {
            Some(name) => Some(SkipCondition::from_name(name, dto.threshold)?),
            None if dto.threshold.is_some() => {
                return Err(ConfigError::Validation(format!(
                    "ステップ '{}' に skip_if のない threshold が指定されています",
                    stage
                )));
            }
            None => None,
        };

        Ok(Self {
            stage,
            required: dto.required.unwrap_or(true),
            skip_if,
        })
    }
}

/// ドメインモデルから DTO への変換（書き込み方向）
///
/// バリデーション済みのドメインモデルから DTO を生成するため、
/// この変換は失敗しません（`From` トレイトを使用）。
impl From<WorkflowStep> for WorkflowStepDto {
    fn from(step: WorkflowStep) -> Self {
        Self {
            stage: step.stage.to_string(),
            required: Some(step.required),
            skip_if: step.skip_if.map(|c| c.name().to_string()),
            threshold: step.skip_if.and_then(|c| c.threshold()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dto(stage: &str, skip_if: Option<&str>, threshold: Option<f64>) -> WorkflowStepDto {
        WorkflowStepDto {
            stage: stage.to_string(),
            required: None,
            skip_if: skip_if.map(str::to_string),
            threshold,
        }
    }

    #[test]
    fn test_step_from_dto_defaults_to_required() {
        let step = WorkflowStep::try_from(dto("validate", None, None)).unwrap();

        assert_eq!(step.stage(), StageKind::Validate);
        assert!(step.is_required());
        assert!(step.skip_condition().is_none());
    }

    #[test]
    fn test_step_from_dto_with_condition() {
        let step = WorkflowStep::try_from(dto("validation", Some("high_confidence"), Some(0.9))).unwrap();

        assert_eq!(
            step.skip_condition(),
            Some(&SkipCondition::HighConfidence { threshold: 0.9 })
        );
    }

    #[test]
    fn test_step_from_dto_rejects_unknown_stage() {
        let err = WorkflowStep::try_from(dto("ocr", None, None)).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));
    }

    #[test]
    fn test_step_from_dto_rejects_unknown_condition() {
        assert!(WorkflowStep::try_from(dto("validate", Some("friday"), None)).is_err());
    }

    #[test]
    fn test_step_from_dto_rejects_orphan_threshold() {
        assert!(WorkflowStep::try_from(dto("validate", None, Some(0.5))).is_err());
    }

    #[test]
    fn test_condition_threshold_bounds() {
        assert!(SkipCondition::from_name("high_confidence", Some(1.5)).is_err());
        assert_eq!(
            SkipCondition::from_name("high_confidence", None).unwrap(),
            SkipCondition::HighConfidence { threshold: 0.95 }
        );
    }

    #[test]
    fn test_high_confidence_condition() {
        let condition = SkipCondition::HighConfidence { threshold: 0.95 };
        let mut ctx = RunContext::new("s", "fast_track", "inline");
        assert!(!condition.evaluate(&ctx));

        ctx.set_extraction(Default::default(), 0.94);
        assert!(!condition.evaluate(&ctx));

        ctx.set_extraction(Default::default(), 0.95);
        assert!(condition.evaluate(&ctx));
    }

    #[test]
    fn test_missing_record_condition() {
        let ctx = RunContext::new("s", "w", "inline");
        let step = WorkflowStep::optional(StageKind::Audit).skip_when(SkipCondition::MissingRecord);

        assert!(step.should_skip(&ctx));
    }

    #[test]
    fn test_step_round_trip_through_dto() {
        let step = WorkflowStep::optional(StageKind::Validate)
            .skip_when(SkipCondition::HighConfidence { threshold: 0.9 });
        let restored = WorkflowStep::try_from(WorkflowStepDto::from(step.clone())).unwrap();

        assert_eq!(restored, step);
    }
}
