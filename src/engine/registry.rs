//! 名前付きワークフローの登録
//!
//! # 責務
//!
//! - 組み込みワークフロー（`standard`, `fast_track`, `detailed_review`, `compliance_only`）の保持
//! - 実行時のカスタムワークフロー登録（組み込みの上書きは不可）
//! - 実行オプションの検証（[`OptionReport`]）
//!
//! # 使用例
//!
//! ```rust
//! use invoice_pipeline::config::{Workflow, WorkflowStep};
//! use invoice_pipeline::engine::registry::WorkflowRegistry;
//! use invoice_pipeline::stage::StageKind;
//!
//! let mut registry = WorkflowRegistry::new();
//! assert!(registry.get("standard").is_ok());
//!
//! let quick = Workflow::new(
//!     "quick_check",
//!     vec![WorkflowStep::required(StageKind::Parse), WorkflowStep::required(StageKind::Extract)],
//! )
//! .unwrap();
//! registry.register(quick).unwrap();
//! assert!(registry.names().contains(&"quick_check".to_string()));
//! ```

use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;

use crate::config::Workflow;
use crate::engine::result::ExecutionError;

/// 受け付ける実行オプション
pub const KNOWN_OPTIONS: [&str; 6] = [
    "skip_validation",
    "force_manual_review",
    "confidence_threshold",
    "auto_approve",
    "detailed_logging",
    "priority",
];

const BOOLEAN_OPTIONS: [&str; 4] = [
    "skip_validation",
    "force_manual_review",
    "auto_approve",
    "detailed_logging",
];

const PRIORITIES: [&str; 4] = ["low", "normal", "high", "urgent"];

/// 実行オプションの検証結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OptionReport {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub recommendations: Vec<String>,
}

/// ワークフローレジストリ
#[derive(Debug, Clone)]
pub struct WorkflowRegistry {
    workflows: BTreeMap<String, Workflow>,
    builtin: BTreeSet<String>,
}

impl WorkflowRegistry {
    /// 組み込みワークフローを登録済みのレジストリを生成
    pub fn new() -> Self {
        let builtins = Workflow::builtins();
        let builtin = builtins.iter().map(|w| w.name().to_string()).collect();
        let workflows = builtins
            .into_iter()
            .map(|w| (w.name().to_string(), w))
            .collect();

        Self { workflows, builtin }
    }

    /// 名前でワークフローを取得
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::UnknownWorkflowError`] - 未登録の名前
    pub fn get(&self, name: &str) -> Result<&Workflow, ExecutionError> {
        self.workflows
            .get(name)
            .ok_or_else(|| ExecutionError::UnknownWorkflowError(name.to_string()))
    }

    /// 登録済みのワークフロー名（名前順）
    pub fn names(&self) -> Vec<String> {
        self.workflows.keys().cloned().collect()
    }

    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.workflows.values()
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtin.contains(name)
    }

    /// カスタムワークフローを登録
    ///
    /// 同名のカスタムワークフローは置き換えます。
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::ValidationError`] - 組み込みワークフローと同じ名前
    pub fn register(&mut self, workflow: Workflow) -> Result<(), ExecutionError> {
        if self.is_builtin(workflow.name()) {
            return Err(ExecutionError::ValidationError(format!(
                "組み込みワークフロー '{}' は上書きできません",
                workflow.name()
            )));
        }

        tracing::info!(workflow = %workflow.name(), steps = workflow.steps().len(), "ワークフローを登録");
        self.workflows.insert(workflow.name().to_string(), workflow);
        Ok(())
    }

    /// 実行オプションを検証
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::UnknownWorkflowError`] - 未登録のワークフロー名
    pub fn validate_options(
        &self,
        workflow: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<OptionReport, ExecutionError> {
        self.get(workflow)?;

        let mut report = OptionReport::default();

        for (key, value) in options {
            let key = key.as_str();
            if !KNOWN_OPTIONS.contains(&key) {
                report.warnings.push(format!("Unknown option: {}", key));
                continue;
            }

            if BOOLEAN_OPTIONS.contains(&key) && value.parse::<bool>().is_err() {
                report
                    .errors
                    .push(format!("Option '{}' must be true or false: {}", key, value));
            }
            if key == "confidence_threshold" {
                match value.parse::<f64>() {
                    Ok(v) if (0.0..=1.0).contains(&v) => {}
                    _ => report.errors.push(format!(
                        "confidence_threshold must be between 0.0 and 1.0: {}",
                        value
                    )),
                }
            }
            if key == "priority" && !PRIORITIES.contains(&value.to_ascii_lowercase().as_str()) {
                report.warnings.push(format!("Unknown priority: {}", value));
            }
        }

        let enabled = |key: &str| options.get(key).is_some_and(|v| v == "true");
        if enabled("skip_validation") && enabled("force_manual_review") {
            report.errors.push(
                "skip_validation and force_manual_review cannot be used together".to_string(),
            );
        }
        if workflow == "fast_track" && !options.contains_key("confidence_threshold") {
            report
                .recommendations
                .push("Set confidence_threshold to tune when fast_track skips validation".to_string());
        }

        report.valid = report.errors.is_empty();
        Ok(report)
    }
}

impl Default for WorkflowRegistry {
    fn default() -> Self {
        Self::new()
    }
}
