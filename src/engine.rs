//! ワークフロー実行エンジン
//!
//! # 責務
//!
//! - ワークフロー定義を受け取り、各ステップを順序立てて実行
//! - 型付きの実行コンテキストによるステージ間のデータ受け渡し
//! - ステージ単位のタイムアウトとリトライの制御
//! - 実行統計、実行履歴、ヘルスチェック
//!
//! # モジュール構成
//!
//! - [`coordinator`][]: ワークフローの実行本体
//! - [`executor`][]: リトライ付きステージ実行
//! - [`context`][]: 実行コンテキスト（ステージ間データ受け渡し）
//! - [`result`][]: 実行結果型（ステージ・実行・バッチ）
//! - [`registry`][]: 名前付きワークフローの登録
//! - [`stats`][] / [`history`][]: 統計と履歴
//!
//! # 使用例
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use invoice_pipeline::config::{Settings, Workflow};
//! use invoice_pipeline::engine::Coordinator;
//! use invoice_pipeline::provider::{Collaborators, DocumentSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // 1. 設定とワークフローを読み込む
//!     let settings = Settings::from_file("pipeline.toml")?;
//!     let workflow = Workflow::from_file("workflows/standard.toml")?;
//!
//!     // 2. コーディネーターを生成
//!     let coordinator =
//!         Coordinator::from_settings(&settings, Collaborators::from_settings(&settings));
//!
//!     // 3. ワークフローを実行
//!     let result = coordinator
//!         .run_workflow(&workflow, DocumentSource::Path("invoice.pdf".into()), None)
//!         .await?;
//!
//!     // 4. 結果を出力
//!     println!("Session: {}", result.session_id);
//!     println!("Status: {}", result.status);
//!     println!("Duration: {:?}", result.elapsed);
//!
//!     for step in &result.steps {
//!         println!("  {}: {:?}", step.stage, step.status);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod context;
pub mod coordinator;
pub mod executor;
pub mod history;
pub mod registry;
pub mod result;
pub mod stats;

// 公開APIの再エクスポート
pub use context::RunContext;
pub use coordinator::Coordinator;
pub use executor::{RetryPolicy, StageExecutor};
pub use history::{ExecutionHistory, HistoryEntry, WorkflowStatistics};
pub use registry::{OptionReport, WorkflowRegistry};
pub use result::{
    BatchItem, BatchResult, ExecutionError, RunResult, RunStatus, StageResult, StepStatus,
};
pub use stats::{HealthStatus, RunStatistics, StageHealth, StageStats, SystemHealth};
