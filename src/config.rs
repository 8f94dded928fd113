//! 設定ファイルとワークフロー定義
//!
//! # モジュール構成
//!
//! - [`settings`][]: パイプライン全体の設定（閾値、ステージ別リトライ、コラボレーター）
//! - [`workflow`][]: ワークフロー定義（TOML ⇔ ドメインモデル）
//! - [`step`][]: ワークフローを構成するステップとスキップ条件
//! - `dto`: TOML デシリアライズ専用の内部構造体

mod dto;
pub mod settings;
pub mod step;
pub mod workflow;

pub use settings::Settings;
pub use step::{SkipCondition, WorkflowStep};
pub use workflow::Workflow;
