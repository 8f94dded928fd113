//! リトライ付きステージ実行
//!
//! # 責務
//!
//! このモジュールは、ステージ 1 つ分の実行を制御する [`StageExecutor`] を提供します。
//! ステージの `execute` を包み、試行回数の上限・タイムアウト・試行間の待機・
//! 統計の収集を担当します。
//!
//! # 主要な型
//!
//! - [`StageExecutor`][]: ステージ本体 + リトライポリシー + 統計
//! - [`RetryPolicy`][]: 最大リトライ回数、タイムアウト、待機時間
//! - [`StageExecution`][]: 1 回の呼び出し結果（結果、試行回数、ステップステータス）
//!
//! # 実行フロー
//!
//! 1. `validate_input` で入力を確認（拒否された場合はリトライせず失敗）
//! 2. 最大 `max_retries + 1` 回まで `execute` を試行
//!    - 各試行は `tokio::time::timeout` で時間制限される
//!    - `Err`（インフラ障害）またはタイムアウトのときのみ再試行
//!    - ドメインチェックのエラーを含む `Ok(StageResult)` は再試行しない
//! 3. 全試行が失敗した場合、エラーを含む [`StageResult`] を返す
//! 4. 統計を呼び出し 1 回につき 1 回だけ更新
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use invoice_pipeline::engine::context::RunContext;
//! use invoice_pipeline::engine::executor::{RetryPolicy, StageExecutor};
//! use invoice_pipeline::stage::{StageInput, ValidateStage};
//! # use invoice_pipeline::model::{Invoice, Party};
//!
//! # async fn example() {
//! let executor = StageExecutor::new(
//!     Arc::new(ValidateStage::default()),
//!     RetryPolicy::new(2, Some(Duration::from_secs(30))),
//! );
//!
//! # let invoice = Invoice::new("INV-1", Party::named("A"), Party::named("B"), "USD", 1.0, "US");
//! let mut ctx = RunContext::new("session", "standard", "inline");
//! let execution = executor.execute(&StageInput::Record(Box::new(invoice)), &mut ctx).await;
//! println!("attempts: {}", execution.attempts);
//! # }
//! ```

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::engine::context::RunContext;
use crate::engine::result::{StageResult, StepStatus};
use crate::engine::stats::{HealthStatus, StageHealth, StageStats, DEGRADED_SUCCESS_RATIO};
use crate::error::StageError;
use crate::stage::{Stage, StageInput, StageKind};

/// 試行間の既定の待機時間
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// リトライポリシー
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// 最大リトライ回数（試行回数は `max_retries + 1`）
    pub max_retries: u32,
    /// 1 試行あたりのタイムアウト（`None` なら無制限）
    pub timeout: Option<Duration>,
    /// 試行間の待機時間
    pub retry_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, timeout: Option<Duration>) -> Self {
        Self {
            max_retries,
            timeout,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// 試行間の待機時間を設定
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(0, None)
    }
}

/// エグゼキューター呼び出し 1 回分の結果
#[derive(Debug, Clone)]
pub struct StageExecution {
    pub result: StageResult,
    /// 実際の試行回数（入力が拒否された場合は 0）
    pub attempts: u32,
    pub status: StepStatus,
}

/// リトライ付きステージ実行エンジン
///
/// 統計は内部で `Mutex` により保護されるため、`&self` で実行できます。
pub struct StageExecutor {
    stage: Arc<dyn Stage>,
    policy: RetryPolicy,
    stats: Mutex<StageStats>,
}

impl StageExecutor {
    /// 新しいエグゼキューターを生成
    pub fn new(stage: Arc<dyn Stage>, policy: RetryPolicy) -> Self {
        Self {
            stage,
            policy,
            stats: Mutex::new(StageStats::default()),
        }
    }

    pub fn kind(&self) -> StageKind {
        self.stage.kind()
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// ステージを実行
    ///
    /// この関数は失敗しません。全試行が失敗した場合も、エラーを含む
    /// [`StageResult`] と [`StepStatus::Failed`] を返します。
    pub async fn execute(&self, input: &StageInput, ctx: &mut RunContext) -> StageExecution {
        let kind = self.kind();
        let started = Instant::now();

        if !self.stage.validate_input(input) {
            tracing::warn!(
                session_id = %ctx.session_id(),
                stage = %kind,
                "ステージが入力を拒否しました"
            );
            let mut result = StageResult::new(kind);
            result.add_step("input_rejected", "Input failed stage pre-check");
            result.add_error(format!("Invalid input for stage '{}'", kind));
            return self.finish(result, 0, StepStatus::Failed, started);
        }

        let max_attempts = self.policy.max_retries + 1;
        let mut failures: Vec<String> = Vec::new();

        for attempt in 1..=max_attempts {
            tracing::debug!(session_id = %ctx.session_id(), stage = %kind, attempt, "ステージを実行");

            match self.execute_with_timeout(input, ctx).await {
                Ok(mut result) => {
                    for failure in &failures {
                        result.add_warning(failure.clone());
                    }
                    let status = if attempt > 1 {
                        StepStatus::Retried {
                            attempts: attempt - 1,
                        }
                    } else {
                        StepStatus::Success
                    };
                    return self.finish(result, attempt, status, started);
                }
                Err(e) => {
                    tracing::warn!(
                        session_id = %ctx.session_id(),
                        stage = %kind,
                        attempt,
                        error = %e,
                        "ステージの試行に失敗しました"
                    );
                    failures.push(format!("Attempt {} failed: {}", attempt, e));

                    // リトライ前に少し待機
                    if attempt < max_attempts {
                        tokio::time::sleep(self.policy.retry_delay).await;
                    }
                }
            }
        }

        tracing::error!(
            session_id = %ctx.session_id(),
            stage = %kind,
            attempts = max_attempts,
            "全ての試行が失敗しました"
        );

        let mut result = StageResult::new(kind);
        result.add_step(
            "execution_failed",
            format!("Failed after {} attempts", max_attempts),
        );
        for failure in failures {
            result.add_error(failure);
        }
        self.finish(result, max_attempts, StepStatus::Failed, started)
    }

    /// タイムアウト付きでステージ本体を実行
    async fn execute_with_timeout(
        &self,
        input: &StageInput,
        ctx: &mut RunContext,
    ) -> Result<StageResult, StageError> {
        match self.policy.timeout {
            Some(limit) => match tokio::time::timeout(limit, self.stage.execute(input, ctx)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(StageError::Timeout {
                    stage: self.kind().to_string(),
                    timeout_secs: limit.as_secs(),
                }),
            },
            None => self.stage.execute(input, ctx).await,
        }
    }

    fn finish(
        &self,
        mut result: StageResult,
        attempts: u32,
        status: StepStatus,
        started: Instant,
    ) -> StageExecution {
        let elapsed = started.elapsed();
        result.set_elapsed(elapsed);

        let status = if result.has_errors() {
            StepStatus::Failed
        } else {
            status
        };
        self.lock_stats()
            .record(status != StepStatus::Failed, elapsed);

        StageExecution {
            result,
            attempts,
            status,
        }
    }

    fn lock_stats(&self) -> MutexGuard<'_, StageStats> {
        // 統計はカウンタのみのため、ポイズンされても値はそのまま使える
        self.stats.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// 現在の統計
    pub fn stats(&self) -> StageStats {
        *self.lock_stats()
    }

    /// 統計をリセット
    pub fn reset_stats(&self) {
        *self.lock_stats() = StageStats::default();
    }

    /// ヘルスチェック
    ///
    /// - 依存先の疎通確認に失敗 → unhealthy
    /// - 成功率が 50% 未満 → degraded
    pub async fn health(&self) -> StageHealth {
        let stats = self.stats();
        let mut issues = Vec::new();
        let mut status = HealthStatus::Healthy;

        if let Some(ratio) = stats.success_ratio().filter(|r| *r < DEGRADED_SUCCESS_RATIO) {
            status = HealthStatus::Degraded;
            issues.push(format!("Low success rate: {:.1}%", ratio * 100.0));
        }

        if let Err(e) = self.stage.check_dependencies().await {
            status = HealthStatus::Unhealthy;
            issues.push(format!("Dependency unavailable: {}", e));
        }

        StageHealth {
            stage: self.kind(),
            status,
            issues,
            stats,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;

    /// モックステージ
    ///
    /// 事前に与えた応答を順に返します。応答が尽きたら成功を返します。
    struct MockStage {
        responses: Mutex<Vec<MockResponse>>,
        calls: Arc<Mutex<u32>>,
        accept_input: bool,
        dependency_down: bool,
    }

    enum MockResponse {
        Ok,
        DomainError,
        Fault,
        Hang,
    }

    impl MockStage {
        fn new(responses: Vec<MockResponse>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Arc::new(Mutex::new(0)),
                accept_input: true,
                dependency_down: false,
            }
        }

        fn rejecting() -> Self {
            Self {
                accept_input: false,
                ..Self::new(vec![])
            }
        }

        fn without_dependency() -> Self {
            Self {
                dependency_down: true,
                ..Self::new(vec![])
            }
        }
    }

    #[async_trait]
    impl Stage for MockStage {
        fn kind(&self) -> StageKind {
            StageKind::Extract
        }

        fn validate_input(&self, _input: &StageInput) -> bool {
            self.accept_input
        }

        async fn execute(
            &self,
            _input: &StageInput,
            _ctx: &mut RunContext,
        ) -> Result<StageResult, StageError> {
            *self.calls.lock().unwrap() += 1;
            let next = {
                let mut responses = self.responses.lock().unwrap();
                if responses.is_empty() {
                    MockResponse::Ok
                } else {
                    responses.remove(0)
                }
            };

            match next {
                MockResponse::Ok => Ok(StageResult::new(StageKind::Extract).with_confidence(0.9)),
                MockResponse::DomainError => {
                    let mut result = StageResult::new(StageKind::Extract).with_confidence(0.1);
                    result.add_error("required field missing");
                    Ok(result)
                }
                MockResponse::Fault => Err(StageError::Provider(ProviderError::Unavailable(
                    "llm".to_string(),
                ))),
                MockResponse::Hang => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(StageResult::new(StageKind::Extract))
                }
            }
        }

        async fn check_dependencies(&self) -> Result<(), ProviderError> {
            if self.dependency_down {
                Err(ProviderError::Unavailable("ollama".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn input() -> StageInput {
        StageInput::Document(crate::provider::DocumentSource::Text("text".to_string()))
    }

    fn executor(stage: MockStage, max_retries: u32) -> (StageExecutor, Arc<Mutex<u32>>) {
        let calls = stage.calls.clone();
        let policy = RetryPolicy::new(max_retries, Some(Duration::from_millis(200)))
            .with_retry_delay(Duration::ZERO);
        (StageExecutor::new(Arc::new(stage), policy), calls)
    }

    #[tokio::test]
    async fn test_success_on_first_attempt() {
        let (executor, calls) = executor(MockStage::new(vec![MockResponse::Ok]), 2);
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(execution.status, StepStatus::Success);
        assert_eq!(execution.attempts, 1);
        assert_eq!(*calls.lock().unwrap(), 1);
        assert!(execution.result.elapsed().is_some());
    }

    #[tokio::test]
    async fn test_retry_succeeds_after_failures() {
        let (executor, calls) = executor(
            MockStage::new(vec![MockResponse::Fault, MockResponse::Fault, MockResponse::Ok]),
            2,
        );
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(execution.status, StepStatus::Retried { attempts: 2 });
        assert_eq!(execution.attempts, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert!(!execution.result.has_errors());
        assert_eq!(execution.result.warnings().len(), 2);
        assert!(execution.result.warnings()[0].starts_with("Attempt 1 failed"));
    }

    #[tokio::test]
    async fn test_retry_exhaustion_returns_failed_result() {
        let (executor, calls) = executor(
            MockStage::new(vec![MockResponse::Fault, MockResponse::Fault, MockResponse::Fault]),
            2,
        );
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(execution.status, StepStatus::Failed);
        assert_eq!(execution.attempts, 3);
        assert_eq!(*calls.lock().unwrap(), 3);
        assert_eq!(execution.result.errors().len(), 3);
        assert_eq!(execution.result.steps()[0].action, "execution_failed");
        assert_eq!(execution.result.steps()[0].message, "Failed after 3 attempts");
    }

    #[tokio::test]
    async fn test_domain_errors_are_not_retried() {
        let (executor, calls) = executor(MockStage::new(vec![MockResponse::DomainError]), 3);
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(*calls.lock().unwrap(), 1);
        assert_eq!(execution.status, StepStatus::Failed);
        assert_eq!(execution.result.errors(), &["required field missing".to_string()]);
    }

    #[tokio::test]
    async fn test_timeout_is_enforced_and_retried() {
        let (executor, calls) = executor(MockStage::new(vec![MockResponse::Hang, MockResponse::Ok]), 1);
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(*calls.lock().unwrap(), 2);
        assert_eq!(execution.status, StepStatus::Retried { attempts: 1 });
        assert!(execution.result.warnings()[0].contains("タイムアウト"));
    }

    #[tokio::test]
    async fn test_rejected_input_is_not_executed() {
        let (executor, calls) = executor(MockStage::rejecting(), 3);
        let mut ctx = RunContext::new("s", "w", "inline");

        let execution = executor.execute(&input(), &mut ctx).await;

        assert_eq!(*calls.lock().unwrap(), 0);
        assert_eq!(execution.attempts, 0);
        assert_eq!(execution.status, StepStatus::Failed);
        assert!(execution.result.has_errors());
    }

    #[tokio::test]
    async fn test_stats_updated_once_per_call() {
        let (executor, _calls) = executor(
            MockStage::new(vec![
                MockResponse::Fault,
                MockResponse::Ok,
                MockResponse::Fault,
                MockResponse::Fault,
            ]),
            1,
        );
        let mut ctx = RunContext::new("s", "w", "inline");

        executor.execute(&input(), &mut ctx).await;
        executor.execute(&input(), &mut ctx).await;

        let stats = executor.stats();
        assert_eq!(stats.executions, 2);
        assert_eq!(stats.successes, 1);
        assert_eq!(stats.failures, 1);

        executor.reset_stats();
        assert_eq!(executor.stats(), StageStats::default());
    }

    #[tokio::test]
    async fn test_health_degrades_below_half_success() {
        let (executor, _calls) = executor(
            MockStage::new(vec![MockResponse::DomainError, MockResponse::DomainError, MockResponse::Ok]),
            0,
        );
        let mut ctx = RunContext::new("s", "w", "inline");

        for _ in 0..3 {
            executor.execute(&input(), &mut ctx).await;
        }

        let health = executor.health().await;
        assert_eq!(health.status, HealthStatus::Degraded);
        assert_eq!(health.issues, vec!["Low success rate: 33.3%".to_string()]);
    }

    #[tokio::test]
    async fn test_health_of_unused_stage_is_healthy() {
        let (executor, _calls) = executor(MockStage::new(vec![]), 0);
        let health = executor.health().await;

        assert_eq!(health.status, HealthStatus::Healthy);
        assert!(health.issues.is_empty());
    }

    #[tokio::test]
    async fn test_health_unhealthy_when_dependency_unavailable() {
        let (executor, _calls) = executor(MockStage::without_dependency(), 0);
        let health = executor.health().await;

        assert_eq!(health.stage, StageKind::Extract);
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(
            health.issues,
            vec!["Dependency unavailable: コラボレーターが利用できません: ollama".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unavailable_dependency_outranks_low_success_rate() {
        let stage = MockStage {
            dependency_down: true,
            ..MockStage::new(vec![MockResponse::DomainError])
        };
        let (executor, _calls) = executor(stage, 0);
        let mut ctx = RunContext::new("s", "w", "inline");
        executor.execute(&input(), &mut ctx).await;

        let health = executor.health().await;
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.issues.len(), 2);
        assert!(health.issues[0].starts_with("Low success rate"));
        assert!(health.issues[1].starts_with("Dependency unavailable: "));
    }
}
