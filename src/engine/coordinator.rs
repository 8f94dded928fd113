//! ワークフローコーディネーター
//!
//! # 責務
//!
//! - 名前付きワークフローを 1 件の入力に対して最初から最後まで実行
//! - ステップごとにスキップ条件を評価し、リトライエグゼキューター経由でステージを実行
//! - 必須ステップの失敗で実行を中断し、任意ステップの失敗は警告に格下げ
//! - 最終ステータスの決定、エラー・警告の集約、統計と履歴の更新
//! - バッチ実行、ヘルスチェック、統計の参照・リセット
//!
//! # 入力の振り分け
//!
//! parse と extract は元のドキュメントを、それ以降のステージはコンテキスト上の
//! 請求書のスナップショットを受け取ります。請求書がまだ無い場合は元のドキュメントを
//! 渡すため、請求書を必要とするステージは入力チェックで失敗します。
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use invoice_pipeline::config::Settings;
//! use invoice_pipeline::engine::Coordinator;
//! use invoice_pipeline::provider::{Collaborators, DocumentSource, MemoryAuditSink};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::default();
//! let coordinator = Coordinator::from_settings(
//!     &settings,
//!     Collaborators::offline(Arc::new(MemoryAuditSink::new())),
//! );
//!
//! let result = coordinator
//!     .run("standard", DocumentSource::Text("INVOICE #INV-001 ...".to_string()), None)
//!     .await?;
//! println!("{}: {}", result.session_id, result.status);
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use chrono::Utc;

use crate::config::{Settings, Workflow, WorkflowStep};
use crate::engine::context::RunContext;
use crate::engine::executor::{RetryPolicy, StageExecutor};
use crate::engine::history::{ExecutionHistory, HistoryEntry, WorkflowStatistics};
use crate::engine::registry::{OptionReport, WorkflowRegistry};
use crate::engine::result::{
    BatchItem, BatchResult, ExecutionError, RunResult, RunStatus, StepCounts, StepReport,
    StepStatus,
};
use crate::engine::stats::{RunStatistics, StageHealth, StageStats, SystemHealth};
use crate::model::{Invoice, ProcessingStatus};
use crate::provider::{Collaborators, DocumentSource};
use crate::stage::{
    AuditStage, ComplyStage, DecideStage, ExtractStage, ParseStage, Stage, StageInput, StageKind,
    ValidateStage,
};

/// 実行履歴の既定の保持件数
pub const DEFAULT_HISTORY_LIMIT: usize = 1000;

/// ワークフローコーディネーター
///
/// 統計と履歴は `Mutex` で保護されるため、`Arc` で包んで複数タスクから
/// 独立した実行を並行に呼び出せます。1 回の実行のコンテキストは、その実行を
/// 行うタスクだけが所有します。
pub struct Coordinator {
    registry: WorkflowRegistry,
    executors: BTreeMap<StageKind, StageExecutor>,
    statistics: Mutex<RunStatistics>,
    history: Mutex<ExecutionHistory>,
}

impl Coordinator {
    /// ステージ未登録のコーディネーターを生成
    pub fn new() -> Self {
        Self {
            registry: WorkflowRegistry::new(),
            executors: BTreeMap::new(),
            statistics: Mutex::new(RunStatistics::default()),
            history: Mutex::new(ExecutionHistory::new(DEFAULT_HISTORY_LIMIT)),
        }
    }

    /// ステージを登録（同じ種類のステージは置き換え）
    pub fn with_stage(mut self, stage: Arc<dyn Stage>, policy: RetryPolicy) -> Self {
        self.executors
            .insert(stage.kind(), StageExecutor::new(stage, policy));
        self
    }

    /// 実行履歴の保持件数を設定
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history = Mutex::new(ExecutionHistory::new(limit));
        self
    }

    /// 設定とコラボレーターから 6 ステージすべてを登録したコーディネーターを生成
    pub fn from_settings(settings: &Settings, collaborators: Collaborators) -> Self {
        let thresholds = &settings.thresholds;

        let mut extract = ExtractStage::new(settings.default_region.clone());
        if let Some(extractor) = collaborators.extractor {
            extract = extract.with_extractor(extractor);
        }
        if let Some(reviewer) = collaborators.reviewer {
            extract = extract.with_reviewer(reviewer);
        }

        let stages: Vec<Arc<dyn Stage>> = vec![
            Arc::new(ParseStage::new(collaborators.content)),
            Arc::new(extract),
            Arc::new(ValidateStage::new(thresholds.validation_pass)),
            Arc::new(
                ComplyStage::new(collaborators.rules, settings.default_region.clone())
                    .with_pass_threshold(thresholds.compliance_pass),
            ),
            Arc::new(DecideStage::new(settings.decision_thresholds())),
            Arc::new(
                AuditStage::new(collaborators.audit)
                    .retain_sensitive(settings.audit.retain_sensitive),
            ),
        ];

        stages.into_iter().fold(
            Self::new().with_history_limit(settings.history_limit),
            |coordinator, stage| {
                let policy = settings.retry_policy(stage.kind());
                coordinator.with_stage(stage, policy)
            },
        )
    }

    // ---- ワークフロー ----

    /// 名前でワークフロー定義を取得
    pub fn definition(&self, name: &str) -> Result<&Workflow, ExecutionError> {
        self.registry.get(name)
    }

    /// 利用可能なワークフロー名
    pub fn available_workflows(&self) -> Vec<String> {
        self.registry.names()
    }

    /// 登録済みワークフロー定義（名前順）
    pub fn workflows(&self) -> impl Iterator<Item = &Workflow> {
        self.registry.workflows()
    }

    /// カスタムワークフローを登録
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::UnknownStageError`] - 登録されていないステージを含む
    /// - [`ExecutionError::ValidationError`] - 組み込みワークフローと同じ名前
    pub fn register_workflow(&mut self, workflow: Workflow) -> Result<(), ExecutionError> {
        self.ensure_stages(&workflow)?;
        self.registry.register(workflow)
    }

    /// 名前とステップ列からカスタムワークフローを登録
    pub fn register_steps(
        &mut self,
        name: &str,
        steps: Vec<WorkflowStep>,
    ) -> Result<(), ExecutionError> {
        let workflow = Workflow::new(name, steps)?;
        self.register_workflow(workflow)
    }

    /// 実行オプションを検証
    pub fn validate_options(
        &self,
        workflow: &str,
        options: &BTreeMap<String, String>,
    ) -> Result<OptionReport, ExecutionError> {
        self.registry.validate_options(workflow, options)
    }

    fn ensure_stages(&self, workflow: &Workflow) -> Result<(), ExecutionError> {
        let missing = workflow
            .steps()
            .iter()
            .map(WorkflowStep::stage)
            .find(|stage| !self.executors.contains_key(stage));

        match missing {
            Some(stage) => Err(ExecutionError::UnknownStageError {
                workflow: workflow.name().to_string(),
                stage,
            }),
            None => Ok(()),
        }
    }

    // ---- 実行 ----

    /// 名前付きワークフローを実行
    ///
    /// # エラー
    ///
    /// ステージを実行する前に検出される問題のみ返します。
    /// ステージの失敗は `failed` ステータスの [`RunResult`] になります。
    pub async fn run(
        &self,
        workflow: &str,
        source: DocumentSource,
        session_id: Option<String>,
    ) -> Result<RunResult, ExecutionError> {
        let workflow = self.registry.get(workflow)?;
        self.run_workflow(workflow, source, session_id).await
    }

    /// ワークフロー定義を直接実行（レジストリへの登録は不要）
    pub async fn run_workflow(
        &self,
        workflow: &Workflow,
        source: DocumentSource,
        session_id: Option<String>,
    ) -> Result<RunResult, ExecutionError> {
        self.ensure_stages(workflow)?;

        let session_id = session_id.unwrap_or_else(|| new_session_id(workflow.name()));
        let started = Instant::now();
        let mut ctx = RunContext::new(session_id.clone(), workflow.name(), source.label());

        tracing::info!(
            session_id = %session_id,
            workflow = %workflow.name(),
            source = %ctx.source(),
            "ワークフローを開始"
        );

        let mut steps = Vec::with_capacity(workflow.steps().len());
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut aborted = false;

        for step in workflow.steps() {
            let kind = step.stage();
            let required = step.is_required();

            if aborted {
                steps.push(StepReport {
                    stage: kind,
                    required,
                    status: StepStatus::NotRun,
                    attempts: 0,
                });
                continue;
            }

            if step.should_skip(&ctx) {
                tracing::info!(session_id = %session_id, stage = %kind, "ステップをスキップ");
                steps.push(StepReport {
                    stage: kind,
                    required,
                    status: StepStatus::Skipped,
                    attempts: 0,
                });
                continue;
            }

            let Some(executor) = self.executors.get(&kind) else {
                return Err(ExecutionError::UnknownStageError {
                    workflow: workflow.name().to_string(),
                    stage: kind,
                });
            };

            let input = route_input(kind, &source, &ctx);
            let execution = executor.execute(&input, &mut ctx).await;

            warnings.extend(
                execution
                    .result
                    .warnings()
                    .iter()
                    .map(|w| format!("{}: {}", kind, w)),
            );

            if execution.status == StepStatus::Failed {
                let messages = execution
                    .result
                    .errors()
                    .iter()
                    .map(|e| format!("{}: {}", kind, e));
                if required {
                    errors.extend(messages);
                    aborted = true;
                    tracing::error!(
                        session_id = %session_id,
                        stage = %kind,
                        "必須ステップが失敗したため実行を中断します"
                    );
                } else {
                    warnings.extend(messages);
                    tracing::warn!(
                        session_id = %session_id,
                        stage = %kind,
                        "任意ステップが失敗しました"
                    );
                }
            }

            steps.push(StepReport {
                stage: kind,
                required,
                status: execution.status,
                attempts: execution.attempts,
            });
            ctx.record_stage_result(execution.result);
        }

        let started_at = ctx.started_at();
        let review_required = ctx.review_required();
        let (invoice, decision, stage_results) = ctx.into_outputs();

        let status = if aborted {
            RunStatus::Failed
        } else {
            match invoice.as_ref().map(Invoice::status) {
                Some(ProcessingStatus::Approved) => RunStatus::Approved,
                Some(ProcessingStatus::Rejected) => RunStatus::Rejected,
                Some(ProcessingStatus::Error) => RunStatus::Failed,
                _ if review_required => RunStatus::PendingReview,
                _ => RunStatus::Completed,
            }
        };

        let step_counts = StepCounts {
            total: steps.len(),
            executed: steps
                .iter()
                .filter(|s| !matches!(s.status, StepStatus::Skipped | StepStatus::NotRun))
                .count(),
            skipped: steps
                .iter()
                .filter(|s| s.status == StepStatus::Skipped)
                .count(),
            failed: steps
                .iter()
                .filter(|s| s.status == StepStatus::Failed)
                .count(),
        };

        let result = RunResult {
            session_id,
            workflow: workflow.name().to_string(),
            status,
            confidence: invoice.as_ref().and_then(|i| i.confidence).unwrap_or(0.0),
            invoice,
            decision,
            stage_results,
            steps,
            errors,
            warnings,
            started_at,
            elapsed: started.elapsed(),
            step_counts,
        };

        lock(&self.statistics).record(result.status, result.elapsed);
        lock(&self.history).push(HistoryEntry::from(&result));

        tracing::info!(
            session_id = %result.session_id,
            workflow = %result.workflow,
            status = %result.status,
            executed = result.step_counts.executed,
            elapsed = ?result.elapsed,
            "ワークフローが終了"
        );

        Ok(result)
    }

    /// 複数の入力を順に実行
    ///
    /// 1 件の失敗でバッチは中断されません。
    ///
    /// # エラー
    ///
    /// - [`ExecutionError::UnknownWorkflowError`] - 未登録のワークフロー名
    /// - [`ExecutionError::UnknownStageError`] - 登録されていないステージを含む
    pub async fn run_batch(
        &self,
        workflow: &str,
        sources: Vec<DocumentSource>,
    ) -> Result<BatchResult, ExecutionError> {
        let definition = self.registry.get(workflow)?;
        self.ensure_stages(definition)?;

        let started_at = Utc::now();
        let started = Instant::now();
        let batch_id = format!("batch_{}", started_at.format("%Y%m%d_%H%M%S"));
        let total = sources.len();

        tracing::info!(batch_id = %batch_id, workflow, total, "バッチ処理を開始");

        let mut items = Vec::with_capacity(total);
        for (index, source) in sources.into_iter().enumerate() {
            let session_id = format!("{}_item_{}", batch_id, index + 1);
            let label = source.label();

            let item = match self.run_workflow(definition, source, Some(session_id)).await {
                Ok(result) => BatchItem::Run(Box::new(result)),
                Err(e) => {
                    tracing::warn!(batch_id = %batch_id, source = %label, error = %e, "バッチ項目を処理できませんでした");
                    BatchItem::Rejected {
                        source: label,
                        error: e.to_string(),
                    }
                }
            };
            items.push(item);
        }

        let count = |status: RunStatus| items.iter().filter(|i| i.status() == status).count();
        let successful = count(RunStatus::Approved);
        let failed = count(RunStatus::Failed);
        let pending_review = count(RunStatus::PendingReview);

        tracing::info!(
            batch_id = %batch_id,
            processed = items.len(),
            successful,
            failed,
            pending_review,
            "バッチ処理が終了"
        );

        Ok(BatchResult {
            batch_id,
            workflow: workflow.to_string(),
            total,
            processed: items.len(),
            successful,
            failed,
            pending_review,
            items,
            started_at,
            elapsed: started.elapsed(),
        })
    }

    // ---- 統計・履歴・ヘルス ----

    /// 実行統計のスナップショット
    pub fn statistics(&self) -> RunStatistics {
        *lock(&self.statistics)
    }

    /// 実行統計とステージ統計をすべてリセット
    pub fn reset_statistics(&self) {
        *lock(&self.statistics) = RunStatistics::default();
        for executor in self.executors.values() {
            executor.reset_stats();
        }
        tracing::info!("統計をリセットしました");
    }

    /// ステージ別の統計
    pub fn stage_statistics(&self) -> BTreeMap<StageKind, StageStats> {
        self.executors
            .iter()
            .map(|(kind, executor)| (*kind, executor.stats()))
            .collect()
    }

    /// 1 ステージの統計だけをリセット
    ///
    /// # エラー
    ///
    /// 登録されていないステージの場合は [`ExecutionError::ValidationError`]
    pub fn restart_stage(&self, kind: StageKind) -> Result<(), ExecutionError> {
        let executor = self.executors.get(&kind).ok_or_else(|| {
            ExecutionError::ValidationError(format!("ステージ '{}' は登録されていません", kind))
        })?;
        executor.reset_stats();
        tracing::info!(stage = %kind, "ステージを再起動しました");
        Ok(())
    }

    /// 直近 `limit` 件の実行履歴（古い順）
    pub fn history(&self, limit: usize) -> Vec<HistoryEntry> {
        lock(&self.history).recent(limit)
    }

    /// 実行履歴から集計したワークフロー別の統計
    pub fn workflow_statistics(&self) -> WorkflowStatistics {
        lock(&self.history).statistics()
    }

    /// ステージごとのヘルスチェック
    pub async fn stage_status(&self) -> Vec<StageHealth> {
        let mut health = Vec::with_capacity(self.executors.len());
        for executor in self.executors.values() {
            health.push(executor.health().await);
        }
        health
    }

    pub async fn system_health(&self) -> SystemHealth {
        SystemHealth::aggregate(self.stage_status().await)
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Coordinator")
            .field("workflows", &self.registry.names())
            .field("stages", &self.executors.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// ステージに渡す入力を決める
fn route_input(kind: StageKind, source: &DocumentSource, ctx: &RunContext) -> StageInput {
    if kind.consumes_document() {
        return StageInput::Document(source.clone());
    }
    match ctx.invoice() {
        Some(invoice) => StageInput::Record(Box::new(invoice.clone())),
        None => StageInput::Document(source.clone()),
    }
}

/// `workflow_<name>_<YYYYmmdd_HHMMSS>_<8 hex>`
fn new_session_id(workflow: &str) -> String {
    let suffix: String = uuid::Uuid::new_v4()
        .simple()
        .to_string()
        .chars()
        .take(8)
        .collect();
    format!(
        "workflow_{}_{}_{}",
        workflow,
        Utc::now().format("%Y%m%d_%H%M%S"),
        suffix
    )
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // 統計と履歴は追記のみのため、ポイズンされても値はそのまま使える
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::decision::{Decision, DecisionOutcome, DecisionRule};
    use crate::engine::result::StageResult;
    use crate::error::{ProviderError, StageError};
    use crate::model::Party;
    use crate::provider::ExtractedFields;

    #[derive(Clone, Copy)]
    enum Behavior {
        Succeed,
        DomainError,
        Fault,
        /// 請求書を作成し、抽出信頼度を設定する
        CreateInvoice { confidence: f64 },
        Approve,
        Escalate,
        /// テキスト入力が "bad" なら失敗
        RejectBadText,
    }

    struct MockStage {
        kind: StageKind,
        behavior: Behavior,
        calls: Arc<Mutex<u32>>,
    }

    #[async_trait]
    impl Stage for MockStage {
        fn kind(&self) -> StageKind {
            self.kind
        }

        fn validate_input(&self, _input: &StageInput) -> bool {
            true
        }

        async fn execute(
            &self,
            input: &StageInput,
            ctx: &mut RunContext,
        ) -> Result<StageResult, StageError> {
            *self.calls.lock().unwrap() += 1;
            let mut result = StageResult::new(self.kind).with_confidence(0.9);

            match self.behavior {
                Behavior::Succeed => {}
                Behavior::DomainError => result.add_error("required field missing"),
                Behavior::Fault => {
                    return Err(StageError::Provider(ProviderError::Unavailable(
                        "collaborator".to_string(),
                    )));
                }
                Behavior::CreateInvoice { confidence } => {
                    let mut invoice = Invoice::new(
                        "INV-1",
                        Party::named("Acme"),
                        Party::named("Globex"),
                        "USD",
                        100.0,
                        "US",
                    );
                    invoice
                        .transition(ProcessingStatus::Processing, StageKind::Extract)
                        .unwrap();
                    invoice.confidence = Some(confidence);
                    ctx.set_extraction(ExtractedFields::default(), confidence);
                    ctx.set_invoice(invoice);
                }
                Behavior::Approve => {
                    ctx.invoice_mut()
                        .unwrap()
                        .transition(ProcessingStatus::Approved, StageKind::Decide)
                        .unwrap();
                }
                Behavior::Escalate => ctx.set_decision(Decision {
                    outcome: DecisionOutcome::Escalate,
                    rule: DecisionRule::Confidence,
                    reason: "review".to_string(),
                    confidence: 0.7,
                    requires_manual_review: true,
                    approver: Some("reviewer".to_string()),
                    warnings: vec![],
                }),
                Behavior::RejectBadText => {
                    if matches!(input.as_document(), Some(DocumentSource::Text(t)) if t == "bad") {
                        result.add_error("No text extracted from document");
                    }
                }
            }
            Ok(result)
        }
    }

    struct Harness {
        coordinator: Coordinator,
        calls: BTreeMap<StageKind, Arc<Mutex<u32>>>,
    }

    impl Harness {
        fn new(behaviors: &[(StageKind, Behavior)]) -> Self {
            let mut coordinator = Coordinator::new();
            let mut calls = BTreeMap::new();

            for kind in StageKind::ALL {
                let behavior = behaviors
                    .iter()
                    .find(|(k, _)| *k == kind)
                    .map(|(_, b)| *b)
                    .unwrap_or(Behavior::Succeed);
                let counter = Arc::new(Mutex::new(0));
                calls.insert(kind, counter.clone());
                coordinator = coordinator.with_stage(
                    Arc::new(MockStage {
                        kind,
                        behavior,
                        calls: counter,
                    }),
                    RetryPolicy::new(1, Some(Duration::from_secs(5)))
                        .with_retry_delay(Duration::ZERO),
                );
            }

            Self { coordinator, calls }
        }

        fn calls(&self, kind: StageKind) -> u32 {
            *self.calls[&kind].lock().unwrap()
        }
    }

    fn text(content: &str) -> DocumentSource {
        DocumentSource::Text(content.to_string())
    }

    #[tokio::test]
    async fn test_successful_run_completes() {
        let harness = Harness::new(&[]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.session_id.starts_with("workflow_standard_"));
        assert_eq!(
            result.step_counts,
            StepCounts {
                total: 6,
                executed: 6,
                skipped: 0,
                failed: 0
            }
        );
        assert_eq!(result.stage_results.len(), 6);
        assert!(result.errors.is_empty());
    }

    #[tokio::test]
    async fn test_required_failure_aborts_run() {
        let harness = Harness::new(&[(StageKind::Extract, Behavior::DomainError)]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), Some("s-1".to_string()))
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(result.session_id, "s-1");
        assert_eq!(result.errors, vec!["extract: required field missing".to_string()]);
        assert_eq!(result.step_counts.executed, 2);
        assert!(result.step_counts.executed < result.step_counts.total);
        assert_eq!(result.steps[2].status, StepStatus::NotRun);
        assert_eq!(harness.calls(StageKind::Validate), 0);
        // ドメインエラーはリトライされない
        assert_eq!(harness.calls(StageKind::Extract), 1);
    }

    #[tokio::test]
    async fn test_faults_are_retried_before_failing() {
        let harness = Harness::new(&[(StageKind::Parse, Behavior::Fault)]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Failed);
        assert_eq!(harness.calls(StageKind::Parse), 2);
        assert_eq!(result.steps[0].attempts, 2);
        assert!(result.errors.iter().all(|e| e.starts_with("parse: ")));
    }

    #[tokio::test]
    async fn test_optional_failure_becomes_warning() {
        let harness = Harness::new(&[(StageKind::Audit, Behavior::DomainError)]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Completed);
        assert!(result.errors.is_empty());
        assert!(result.warnings.contains(&"audit: required field missing".to_string()));
        assert_eq!(result.step_counts.failed, 1);
    }

    #[tokio::test]
    async fn test_high_confidence_skips_validation_on_fast_track() {
        let harness = Harness::new(&[(
            StageKind::Extract,
            Behavior::CreateInvoice { confidence: 0.99 },
        )]);

        let result = harness
            .coordinator
            .run("fast_track", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.step_counts.skipped, 1);
        assert_eq!(result.step_counts.executed, 5);
        assert_eq!(harness.calls(StageKind::Validate), 0);
        assert!(!result.stage_results.contains_key(&StageKind::Validate));
        assert_eq!(result.confidence, 0.99);
    }

    #[tokio::test]
    async fn test_low_confidence_runs_validation_on_fast_track() {
        let harness = Harness::new(&[(
            StageKind::Extract,
            Behavior::CreateInvoice { confidence: 0.6 },
        )]);

        let result = harness
            .coordinator
            .run("fast_track", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.step_counts.skipped, 0);
        assert_eq!(harness.calls(StageKind::Validate), 1);
    }

    #[tokio::test]
    async fn test_terminal_invoice_status_sets_run_status() {
        let harness = Harness::new(&[
            (StageKind::Extract, Behavior::CreateInvoice { confidence: 0.9 }),
            (StageKind::Decide, Behavior::Approve),
        ]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::Approved);
        assert_eq!(
            result.invoice.as_ref().map(Invoice::status),
            Some(ProcessingStatus::Approved)
        );
    }

    #[tokio::test]
    async fn test_review_signal_sets_pending_review() {
        let harness = Harness::new(&[
            (StageKind::Extract, Behavior::CreateInvoice { confidence: 0.8 }),
            (StageKind::Decide, Behavior::Escalate),
        ]);

        let result = harness
            .coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap();

        assert_eq!(result.status, RunStatus::PendingReview);
        assert!(result.decision.unwrap().requires_manual_review);
    }

    #[tokio::test]
    async fn test_unknown_workflow_is_rejected_before_execution() {
        let harness = Harness::new(&[]);

        let err = harness
            .coordinator
            .run("express", text("invoice"), None)
            .await
            .unwrap_err();

        assert!(matches!(err, ExecutionError::UnknownWorkflowError(_)));
        assert_eq!(harness.calls(StageKind::Parse), 0);
        assert_eq!(harness.coordinator.statistics().total_runs, 0);
    }

    #[tokio::test]
    async fn test_unregistered_stage_is_rejected() {
        let coordinator = Coordinator::new().with_stage(
            Arc::new(MockStage {
                kind: StageKind::Parse,
                behavior: Behavior::Succeed,
                calls: Arc::new(Mutex::new(0)),
            }),
            RetryPolicy::default(),
        );

        let err = coordinator
            .run("standard", text("invoice"), None)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            ExecutionError::UnknownStageError { stage: StageKind::Extract, .. }
        ));
    }

    #[tokio::test]
    async fn test_custom_workflow_registration() {
        let mut harness = Harness::new(&[]);

        harness
            .coordinator
            .register_steps(
                "parse_only",
                vec![WorkflowStep::required(StageKind::Parse)],
            )
            .unwrap();
        assert!(harness.coordinator.available_workflows().contains(&"parse_only".to_string()));

        let names: Vec<&str> = harness.coordinator.workflows().map(|w| w.name()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
        assert_eq!(names.len(), harness.coordinator.available_workflows().len());

        let result = harness
            .coordinator
            .run("parse_only", text("invoice"), None)
            .await
            .unwrap();
        assert_eq!(result.step_counts.total, 1);

        let err = harness
            .coordinator
            .register_steps("empty", vec![])
            .unwrap_err();
        assert!(matches!(err, ExecutionError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_batch_continues_after_failed_item() {
        let harness = Harness::new(&[(StageKind::Parse, Behavior::RejectBadText)]);

        let batch = harness
            .coordinator
            .run_batch("standard", vec![text("invoice"), text("bad"), text("invoice")])
            .await
            .unwrap();

        assert!(batch.batch_id.starts_with("batch_"));
        assert_eq!(batch.total, 3);
        assert_eq!(batch.processed, 3);
        assert_eq!(batch.failed, 1);
        assert_eq!(batch.successful, 0);

        let BatchItem::Run(second) = &batch.items[1] else {
            panic!("expected a run result");
        };
        assert_eq!(second.session_id, format!("{}_item_2", batch.batch_id));
        assert_eq!(second.status, RunStatus::Failed);
    }

    #[tokio::test]
    async fn test_batch_with_unknown_workflow_is_rejected() {
        let harness = Harness::new(&[]);
        let err = harness
            .coordinator
            .run_batch("express", vec![text("invoice")])
            .await
            .unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownWorkflowError(_)));
    }

    #[tokio::test]
    async fn test_statistics_and_history() {
        let harness = Harness::new(&[(StageKind::Parse, Behavior::RejectBadText)]);
        let coordinator = &harness.coordinator;

        coordinator.run("standard", text("invoice"), None).await.unwrap();
        coordinator.run("standard", text("bad"), None).await.unwrap();

        let stats = coordinator.statistics();
        assert_eq!(stats.total_runs, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);

        let history = coordinator.history(50);
        assert_eq!(history.len(), 2);
        assert_eq!(history[1].status, RunStatus::Failed);

        let workflow_stats = coordinator.workflow_statistics();
        assert_eq!(workflow_stats.by_workflow["standard"], 2);
        assert_eq!(workflow_stats.success_rate, 0.5);

        assert_eq!(coordinator.stage_statistics()[&StageKind::Parse].executions, 2);

        coordinator.restart_stage(StageKind::Parse).unwrap();
        assert_eq!(coordinator.stage_statistics()[&StageKind::Parse].executions, 0);
        assert_eq!(coordinator.stage_statistics()[&StageKind::Extract].executions, 1);

        coordinator.reset_statistics();
        assert_eq!(coordinator.statistics(), RunStatistics::default());
        assert_eq!(coordinator.stage_statistics()[&StageKind::Extract].executions, 0);
    }

    #[tokio::test]
    async fn test_system_health_of_fresh_coordinator() {
        let harness = Harness::new(&[]);
        let health = harness.coordinator.system_health().await;

        assert_eq!(health.total_stages, 6);
        assert_eq!(health.healthy_stages, 6);
    }

    #[test]
    fn test_from_settings_registers_all_stages() {
        let coordinator = Coordinator::from_settings(
            &Settings::default(),
            Collaborators::offline(Arc::new(crate::provider::MemoryAuditSink::new())),
        );

        assert_eq!(
            coordinator.stage_statistics().keys().copied().collect::<Vec<_>>(),
            StageKind::ALL.to_vec()
        );
        assert!(coordinator.definition("detailed_review").is_ok());
    }
}
