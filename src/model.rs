//! ドメインモデル
//!
//! # 責務
//!
//! - 請求書（ドメインレコード）と処理ステータスの DAG
//! - 検証・コンプライアンスチェックの結果型
//! - 承認権限の要件
//!
//! # モジュール構成
//!
//! - [`invoice`][]: 請求書、明細、取引先、処理ステータス
//! - [`check`][]: チェック結果（ステータス × 重要度）
//! - [`approval`][]: 承認レベルと承認要件

pub mod invoice;
pub mod check;
pub mod approval;

pub use invoice::{Invoice, LineItem, Party, ProcessingStatus};
pub use check::{CheckOutcome, CheckStatus, Severity};
pub use approval::{ApprovalLevel, ApprovalRequirement};
