//! 実行コンテキストの管理
//!
//! # 責務
//!
//! - 1 回の実行（run）の中でステージ間のデータ受け渡しを担う
//! - 各フィールドに型付きのアクセサを提供し、ステージ同士の暗黙の結合を避ける
//! - 各ステージの生の実行結果をステージ名をキーに保持
//!
//! # 主要な型
//!
//! - [`RunContext`][]: 実行ごとに生成され、実行終了後に破棄されるコンテキスト
//!
//! # 所有権
//!
//! コンテキストは常に 1 つのステージだけが `&mut` で保持します。
//! 実行間で共有されることはないため、ロックは不要です。
//!
//! # 使用例
//!
//! ```rust
//! use invoice_pipeline::engine::context::RunContext;
//!
//! let mut ctx = RunContext::new("session-1", "standard", "invoice.pdf");
//!
//! // parse ステージが抽出したテキストを保存
//! ctx.set_raw_text("INVOICE #INV-001 ...".to_string(), None);
//!
//! // 後続ステージが参照
//! assert_eq!(ctx.raw_text(), Some("INVOICE #INV-001 ..."));
//! assert!(ctx.invoice().is_none());
//! ```

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::decision::Decision;
use crate::engine::result::StageResult;
use crate::model::{ApprovalRequirement, CheckOutcome, Invoice};
use crate::provider::{DocumentMetadata, ExtractedFields};
use crate::stage::{AuditRecord, StageKind};

/// 実行コンテキスト
///
/// # フィールド
///
/// - `session_id` / `workflow_name` / `started_at`: 実行メタデータ
/// - `raw_text` / `document_metadata`: parse ステージの出力
/// - `extracted_fields` / `extraction_confidence` / `invoice`: extract ステージの出力
/// - `validation_*`: validate ステージの出力
/// - `compliance_*` / `approval_requirement`: comply ステージの出力
/// - `decision`: decide ステージの出力
/// - `audit_record`: audit ステージの出力
/// - `stage_results`: 各ステージの生の実行結果
#[derive(Debug)]
pub struct RunContext {
    session_id: String,
    workflow_name: String,
    source: String,
    started_at: DateTime<Utc>,

    // parse
    raw_text: Option<String>,
    document_metadata: Option<DocumentMetadata>,

    // extract
    extracted_fields: Option<ExtractedFields>,
    extraction_confidence: Option<f64>,
    invoice: Option<Invoice>,

    // validate
    validation_checks: Vec<CheckOutcome>,
    validation_score: Option<f64>,

    // comply
    compliance_checks: Vec<CheckOutcome>,
    compliance_score: Option<f64>,
    approval_requirement: Option<ApprovalRequirement>,

    // decide / audit
    decision: Option<Decision>,
    audit_record: Option<AuditRecord>,

    stage_results: BTreeMap<StageKind, StageResult>,
}

impl RunContext {
    /// 新しい実行コンテキストを生成
    ///
    /// # 引数
    ///
    /// - `session_id`: セッションID
    /// - `workflow_name`: 実行するワークフローの名前
    /// - `source`: 入力ドキュメントの表示名
    pub fn new(
        session_id: impl Into<String>,
        workflow_name: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            workflow_name: workflow_name.into(),
            source: source.into(),
            started_at: Utc::now(),
            raw_text: None,
            document_metadata: None,
            extracted_fields: None,
            extraction_confidence: None,
            invoice: None,
            validation_checks: Vec::new(),
            validation_score: None,
            compliance_checks: Vec::new(),
            compliance_score: None,
            approval_requirement: None,
            decision: None,
            audit_record: None,
            stage_results: BTreeMap::new(),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn workflow_name(&self) -> &str {
        &self.workflow_name
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    // ---- parse ----

    pub fn set_raw_text(&mut self, text: String, metadata: Option<DocumentMetadata>) {
        self.raw_text = Some(text);
        self.document_metadata = metadata;
    }

    pub fn raw_text(&self) -> Option<&str> {
        self.raw_text.as_deref()
    }

    pub fn document_metadata(&self) -> Option<&DocumentMetadata> {
        self.document_metadata.as_ref()
    }

    // ---- extract ----

    pub fn set_extraction(&mut self, fields: ExtractedFields, confidence: f64) {
        self.extracted_fields = Some(fields);
        self.extraction_confidence = Some(confidence);
    }

    pub fn extracted_fields(&self) -> Option<&ExtractedFields> {
        self.extracted_fields.as_ref()
    }

    /// extract ステージの信頼度（未実行なら `None`）
    pub fn extraction_confidence(&self) -> Option<f64> {
        self.extraction_confidence
    }

    pub fn set_invoice(&mut self, invoice: Invoice) {
        self.invoice = Some(invoice);
    }

    pub fn invoice(&self) -> Option<&Invoice> {
        self.invoice.as_ref()
    }

    /// 請求書への可変参照（ステータス遷移・信頼度更新用）
    pub fn invoice_mut(&mut self) -> Option<&mut Invoice> {
        self.invoice.as_mut()
    }

    // ---- validate ----

    pub fn set_validation(&mut self, checks: Vec<CheckOutcome>, score: f64) {
        self.validation_checks = checks;
        self.validation_score = Some(score);
    }

    pub fn validation_checks(&self) -> &[CheckOutcome] {
        &self.validation_checks
    }

    pub fn validation_score(&self) -> Option<f64> {
        self.validation_score
    }

    // ---- comply ----

    pub fn set_compliance(
        &mut self,
        checks: Vec<CheckOutcome>,
        score: f64,
        requirement: Option<ApprovalRequirement>,
    ) {
        self.compliance_checks = checks;
        self.compliance_score = Some(score);
        self.approval_requirement = requirement;
    }

    pub fn compliance_checks(&self) -> &[CheckOutcome] {
        &self.compliance_checks
    }

    pub fn compliance_score(&self) -> Option<f64> {
        self.compliance_score
    }

    pub fn approval_requirement(&self) -> Option<&ApprovalRequirement> {
        self.approval_requirement.as_ref()
    }

    // ---- decide ----

    pub fn set_decision(&mut self, decision: Decision) {
        self.decision = Some(decision);
    }

    pub fn decision(&self) -> Option<&Decision> {
        self.decision.as_ref()
    }

    /// 手動レビューが必要という判定が出ているか
    pub fn review_required(&self) -> bool {
        self.decision
            .as_ref()
            .is_some_and(|decision| decision.requires_manual_review)
    }

    // ---- audit ----

    pub fn set_audit_record(&mut self, record: AuditRecord) {
        self.audit_record = Some(record);
    }

    pub fn audit_record(&self) -> Option<&AuditRecord> {
        self.audit_record.as_ref()
    }

    // ---- stage results ----

    /// ステージの実行結果を記録（同じステージの結果は上書き）
    pub fn record_stage_result(&mut self, result: StageResult) {
        self.stage_results.insert(result.stage(), result);
    }

    pub fn stage_result(&self, stage: StageKind) -> Option<&StageResult> {
        self.stage_results.get(&stage)
    }

    pub fn stage_results(&self) -> &BTreeMap<StageKind, StageResult> {
        &self.stage_results
    }

    /// これまでに実行されたステージ（パイプライン順）
    pub fn executed_stages(&self) -> Vec<StageKind> {
        self.stage_results.keys().copied().collect()
    }

    /// 実行終了時に結果へ移す部分を取り出す
    pub(crate) fn into_outputs(
        self,
    ) -> (Option<Invoice>, Option<Decision>, BTreeMap<StageKind, StageResult>) {
        (self.invoice, self.decision, self.stage_results)
    }
}
