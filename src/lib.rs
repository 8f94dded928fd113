//! 請求書処理パイプライン
//!
//! 請求書ドキュメントを parse → extract → validate → comply → decide → audit の
//! 6 ステージで処理し、承認・却下・手動レビューを判定します。
//!
//! # モジュール構成
//!
//! - [`config`][]: 設定ファイルとワークフロー定義
//! - [`engine`][]: コーディネーター、リトライ実行、実行結果
//! - [`stage`][]: ステージの共通契約と 6 つの具象ステージ
//! - [`provider`][]: 外部コラボレーター（テキスト抽出、LLM、地域ルール、監査ログ）
//! - [`model`][]: 請求書とチェック結果のドメインモデル
//! - [`scoring`][] / [`decision`][]: スコア計算と判定ルール
//! - [`error`][]: エラー型

pub mod config;
pub mod decision;
pub mod engine;
pub mod error;
pub mod model;
pub mod provider;
pub mod scoring;
pub mod stage;
