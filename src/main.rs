//! invoice-pipeline CLI
//!
//! - `run`: 請求書 1 件を処理し、実行結果を JSON で出力
//! - `batch`: 複数の請求書を順に処理し、バッチ結果を JSON で出力
//! - `workflows`: 利用可能なワークフローを一覧表示
//! - `check-options`: 実行オプションを検証
//!
//! ログは標準エラー出力に書き出し、標準出力は結果の JSON のみとします。

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use invoice_pipeline::config::{Settings, Workflow};
use invoice_pipeline::engine::{Coordinator, ExecutionError};
use invoice_pipeline::error::ConfigError;
use invoice_pipeline::provider::{Collaborators, DocumentSource};

/// 請求書処理パイプライン
#[derive(Parser)]
#[command(name = "invoice-pipeline")]
#[command(about = "Invoice processing pipeline", long_about = None)]
#[command(version)]
struct Cli {
    /// 設定ファイル（TOML）
    #[arg(short, long, global = true, env = "INVOICE_PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// ログレベル（RUST_LOG が優先）
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// JSON 形式でログを出力
    #[arg(long, global = true)]
    json: bool,

    /// 日次ローテーションのログファイルを書き出すディレクトリ
    #[arg(long, global = true)]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 請求書 1 件を処理
    Run {
        file: PathBuf,

        /// ワークフロー名
        #[arg(short, long, default_value = "standard")]
        workflow: String,

        /// ワークフロー定義ファイル（指定時は --workflow より優先）
        #[arg(long)]
        workflow_file: Option<PathBuf>,
    },

    /// 複数の請求書を順に処理
    Batch {
        #[arg(required = true)]
        files: Vec<PathBuf>,

        #[arg(short, long, default_value = "standard")]
        workflow: String,
    },

    /// 利用可能なワークフローを一覧表示
    Workflows,

    /// 実行オプション（KEY=VALUE）を検証
    CheckOptions {
        #[arg(required = true, value_parser = parse_key_val)]
        options: Vec<(String, String)>,

        #[arg(short, long, default_value = "standard")]
        workflow: String,
    },
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("JSON の出力に失敗しました: {0}")]
    Json(#[from] serde_json::Error),
}

fn parse_key_val(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("KEY=VALUE 形式で指定してください: {}", s))?;
    Ok((key.trim().to_string(), value.trim().to_string()))
}

/// tracing を初期化
///
/// 戻り値のガードはプログラム終了まで保持する必要があります。
fn init_tracing(cli: &Cli) -> Option<WorkerGuard> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let (file_layer, guard) = match &cli.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "invoice-pipeline.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(writer);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    if cli.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(file_layer)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }

    guard
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings, ConfigError> {
    match path {
        Some(path) => {
            tracing::info!(path = %path.display(), "設定ファイルを読み込み");
            Settings::from_file(path)
        }
        None => Ok(Settings::default()),
    }
}

async fn execute(cli: Cli) -> Result<(), CliError> {
    let settings = load_settings(cli.config.as_ref())?;
    let coordinator =
        Coordinator::from_settings(&settings, Collaborators::from_settings(&settings));

    match cli.command {
        Command::Run {
            file,
            workflow,
            workflow_file,
        } => {
            let source = DocumentSource::Path(file);
            let result = match workflow_file {
                Some(path) => {
                    let definition = Workflow::from_file(&path)?;
                    coordinator.run_workflow(&definition, source, None).await?
                }
                None => coordinator.run(&workflow, source, None).await?,
            };
            println!("{}", result.to_json()?);
        }
        Command::Batch { files, workflow } => {
            let sources = files.into_iter().map(DocumentSource::Path).collect();
            let batch = coordinator.run_batch(&workflow, sources).await?;
            println!("{}", batch.to_json()?);
        }
        Command::Workflows => {
            for definition in coordinator.workflows() {
                println!(
                    "{} - {}",
                    definition.name(),
                    definition.description().unwrap_or("")
                );
                for step in definition.steps() {
                    let mode = if step.is_required() { "required" } else { "optional" };
                    match step.skip_condition() {
                        Some(condition) => {
                            println!("  {} ({}, skip if {})", step.stage(), mode, condition.name())
                        }
                        None => println!("  {} ({})", step.stage(), mode),
                    }
                }
            }
        }
        Command::CheckOptions { options, workflow } => {
            let options: BTreeMap<String, String> = options.into_iter().collect();
            let report = coordinator.validate_options(&workflow, &options)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let _guard = init_tracing(&cli);

    match execute(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "実行に失敗しました");
            eprintln!("エラー: {}", e);
            ExitCode::FAILURE
        }
    }
}
