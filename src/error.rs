//! エラー型の定義
//!
//! このモジュールは、請求書処理パイプライン全体で使用されるエラー型を定義します。
//!
//! - [`ConfigError`]: 設定ファイル・ワークフロー定義の読み書きとバリデーション
//! - [`ProviderError`]: 外部コラボレーター（テキスト抽出、LLM CLI、監査ログ）の失敗
//! - [`StageError`]: ステージ実行時のインフラ障害（リトライ対象）
//! - [`TransitionError`]: 処理ステータスの不正な遷移
//!
//! ドメインチェックの失敗（必須フィールド欠落など）はエラーではなく
//! [`CheckOutcome`](crate::model::CheckOutcome) として通常の戻り値で表現します。

use thiserror::Error;

use crate::model::ProcessingStatus;

/// 設定関連のエラー
#[derive(Debug, Error)]
pub enum ConfigError {
    /// ファイルの読み込みに失敗
    #[error("設定ファイルの読み込みに失敗しました: {0}")]
    FileRead(#[from] std::io::Error),

    /// TOML のデシリアライズに失敗
    #[error("TOML のデシリアライズに失敗しました: {0}")]
    TomlDeserialize(#[from] toml::de::Error),

    /// TOML のシリアライズに失敗
    #[error("TOML のシリアライズに失敗しました: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// バリデーションエラー
    #[error("設定のバリデーションに失敗しました: {0}")]
    Validation(String),
}

/// 外部コラボレーターのエラー
///
/// テキスト抽出 CLI、LLM CLI、監査ログ書き込みなど、
/// パイプラインの外側にある依存先の失敗を表します。
#[derive(Debug, Error)]
pub enum ProviderError {
    /// CLI ツールが見つからない
    #[error("CLIツール '{0}' が見つかりません。{1} をインストールしてください")]
    CliNotFound(String, String),

    /// CLI の実行に失敗
    #[error("CLIの実行に失敗しました: {0}")]
    CliExecution(String),

    /// 不正なレスポンス
    #[error("不正なレスポンスです: {0}")]
    InvalidResponse(String),

    /// 未対応のドキュメント形式
    #[error("未対応のドキュメント形式です: {0}")]
    UnsupportedFormat(String),

    /// 依存先が利用不可
    #[error("コラボレーターが利用できません: {0}")]
    Unavailable(String),

    /// 入出力エラー
    #[error("入出力エラー: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 デコードエラー
    #[error("UTF-8 デコードエラー: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    /// JSON 変換エラー
    #[error("JSON 変換エラー: {0}")]
    Json(#[from] serde_json::Error),
}

/// ステージ実行時のインフラ障害
///
/// [`Stage::execute`](crate::stage::Stage::execute) が `Err` で返すのはこの型のみです。
/// リトライエグゼキューターはこのエラーの場合にだけ再試行します。
#[derive(Debug, Error)]
pub enum StageError {
    /// 外部コラボレーターの失敗
    #[error("コラボレーターエラー: {0}")]
    Provider(#[from] ProviderError),

    /// タイムアウト
    #[error("タイムアウト: ステージ '{stage}' が {timeout_secs}秒以内に完了しませんでした")]
    Timeout {
        /// タイムアウトしたステージ名
        stage: String,
        /// タイムアウト時間（秒）
        timeout_secs: u64,
    },

    /// コンテキストに前提データがない
    #[error("コンテキストエラー: {0}")]
    Context(String),

    /// ステージ内部の予期しない失敗
    #[error("内部エラー: {0}")]
    Internal(String),
}

/// 処理ステータス遷移のエラー
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    /// DAG 上に存在しない遷移
    #[error("不正なステータス遷移です: {from} -> {to}")]
    Illegal {
        /// 遷移元
        from: ProcessingStatus,
        /// 遷移先
        to: ProcessingStatus,
    },

    /// 権限のないステージによる遷移
    #[error("ステージ '{stage}' はステータス '{to}' を設定できません")]
    NotPermitted {
        /// 遷移を試みたステージ
        stage: String,
        /// 遷移先
        to: ProcessingStatus,
    },
}
