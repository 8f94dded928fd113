//! 監査レコードの書き込み先
//!
//! - [`JsonlAuditSink`]: 1 レコード 1 行の JSON Lines ファイルに追記
//! - [`MemoryAuditSink`]: メモリ上に保持（テスト・オフライン実行用）

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::ProviderError;
use crate::stage::AuditRecord;
use super::traits::AuditSink;

/// JSON Lines ファイルへの追記
#[derive(Debug, Clone)]
pub struct JsonlAuditSink {
    path: PathBuf,
}

impl JsonlAuditSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), ProviderError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut line = serde_json::to_string(record)?;
        line.push('\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(line.as_bytes()).await?;
        file.flush().await?;

        tracing::debug!(audit_id = %record.audit_id, path = %self.path.display(), "監査レコードを書き込み");
        Ok(())
    }
}

/// メモリ上の監査ログ
///
/// クローンは同じ記録を共有します。
#[derive(Debug, Clone, Default)]
pub struct MemoryAuditSink {
    records: Arc<Mutex<Vec<AuditRecord>>>,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// これまでに書き込まれたレコード
    pub fn records(&self) -> Vec<AuditRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn append(&self, record: &AuditRecord) -> Result<(), ProviderError> {
        self.records
            .lock()
            .map_err(|_| ProviderError::Unavailable("memory audit sink".to_string()))?
            .push(record.clone());
        Ok(())
    }
}
