use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{FailureKind, StageError};
use crate::region::{Classification, DetectedRegion, OcrText};
use crate::schema::StructuredRecord;

/// Stable identifier for one source document.
///
/// Derived from the file content (SHA-256 prefix), so re-processing the same
/// scan always targets the same identifier — which is what makes persistence
/// idempotent across runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentId(String);

impl DocumentId {
    const HEX_LEN: usize = 16;

    /// Identifier from the source file bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Self(to_hex_prefix(&hasher.finalize()))
    }

    /// Fallback identifier for a file that could not be read: hash the path
    /// instead, so the unreadable document still gets a recorded outcome.
    pub fn from_path(path: &Path) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(path.to_string_lossy().as_bytes());
        Self(to_hex_prefix(&hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn to_hex_prefix(hash: &[u8]) -> String {
    hash.iter()
        .map(|b| format!("{b:02x}"))
        .collect::<String>()[..DocumentId::HEX_LEN]
        .to_string()
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Classification label determining which structuring schema applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentType {
    Passport,
    EmiratesId,
    Certificate,
    Attestation,
    EmployeeInfo,
    Photo,
    Unknown,
}

impl DocumentType {
    /// Directory name used by the result store.
    pub fn dir_name(&self) -> &'static str {
        match self {
            DocumentType::Passport => "passport",
            DocumentType::EmiratesId => "emirates_id",
            DocumentType::Certificate => "certificate",
            DocumentType::Attestation => "attestation",
            DocumentType::EmployeeInfo => "employee_info",
            DocumentType::Photo => "photo",
            DocumentType::Unknown => "unknown",
        }
    }

    pub const ALL: [DocumentType; 7] = [
        DocumentType::Passport,
        DocumentType::EmiratesId,
        DocumentType::Certificate,
        DocumentType::Attestation,
        DocumentType::EmployeeInfo,
        DocumentType::Photo,
        DocumentType::Unknown,
    ];
}

impl std::fmt::Display for DocumentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl std::str::FromStr for DocumentType {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "passport" => Ok(DocumentType::Passport),
            "emirates_id" => Ok(DocumentType::EmiratesId),
            "certificate" => Ok(DocumentType::Certificate),
            "attestation" => Ok(DocumentType::Attestation),
            "employee_info" => Ok(DocumentType::EmployeeInfo),
            "photo" => Ok(DocumentType::Photo),
            "unknown" => Ok(DocumentType::Unknown),
            other => Err(format!("Unknown document type: '{other}'")),
        }
    }
}

/// One input image handed to the pipeline by the shell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceDocument {
    pub path: PathBuf,
    /// Declared type, when the caller already knows what the scan is.
    /// Skips the classifier stage.
    pub type_hint: Option<DocumentType>,
}

impl SourceDocument {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into(), type_hint: None }
    }

    pub fn with_hint(path: impl Into<PathBuf>, hint: DocumentType) -> Self {
        Self { path: path.into(), type_hint: Some(hint) }
    }
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Detecting,
    Classifying,
    Extracting,
    Structuring,
    Persisting,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::Detecting => "detecting",
            Stage::Classifying => "classifying",
            Stage::Extracting => "extracting",
            Stage::Structuring => "structuring",
            Stage::Persisting => "persisting",
        };
        write!(f, "{s}")
    }
}

/// Where a document ended up after the last stage resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    Pending,
    InProgress,
    Succeeded,
    PartiallyFailed,
    Failed,
    Cancelled,
}

impl DocumentStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, DocumentStatus::Pending | DocumentStatus::InProgress)
    }
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DocumentStatus::Pending => "pending",
            DocumentStatus::InProgress => "in_progress",
            DocumentStatus::Succeeded => "succeeded",
            DocumentStatus::PartiallyFailed => "partially_failed",
            DocumentStatus::Failed => "failed",
            DocumentStatus::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for DocumentStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(DocumentStatus::Pending),
            "in_progress" => Ok(DocumentStatus::InProgress),
            "succeeded" => Ok(DocumentStatus::Succeeded),
            "partially_failed" => Ok(DocumentStatus::PartiallyFailed),
            "failed" => Ok(DocumentStatus::Failed),
            "cancelled" => Ok(DocumentStatus::Cancelled),
            other => Err(format!("Unknown document status: '{other}'")),
        }
    }
}

/// A stage-level error recorded in the outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageFailure {
    pub stage: Stage,
    pub kind: FailureKind,
    pub message: String,
}

impl StageFailure {
    pub fn from_error(stage: Stage, error: &StageError) -> Self {
        Self { stage, kind: error.kind(), message: error.to_string() }
    }

    pub fn nothing_detected(threshold: f32) -> Self {
        Self {
            stage: Stage::Detecting,
            kind: FailureKind::NothingDetected,
            message: format!("no region detected above threshold {threshold}"),
        }
    }
}

/// Everything the pipeline produced for one document. Created at pipeline
/// start, mutated as stages complete, finalized when the last stage resolves
/// or errors out. This is the unit the result store persists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingOutcome {
    pub document_id: DocumentId,
    pub source_path: PathBuf,
    pub status: DocumentStatus,
    pub classification: Option<Classification>,
    pub regions: Vec<DetectedRegion>,
    pub ocr: Option<OcrText>,
    pub record: Option<StructuredRecord>,
    pub failures: Vec<StageFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingOutcome {
    pub fn new(document_id: DocumentId, source_path: impl Into<PathBuf>) -> Self {
        Self {
            document_id,
            source_path: source_path.into(),
            status: DocumentStatus::Pending,
            classification: None,
            regions: Vec::new(),
            ocr: None,
            record: None,
            failures: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn record_failure(&mut self, stage: Stage, error: &StageError) {
        self.failures.push(StageFailure::from_error(stage, error));
    }

    /// Whether any stage produced output worth keeping.
    pub fn has_partial_results(&self) -> bool {
        self.classification.is_some()
            || !self.regions.is_empty()
            || self.ocr.is_some()
            || self.record.is_some()
    }

    /// The document type to file this outcome under.
    pub fn document_type(&self) -> DocumentType {
        self.classification
            .map(|c| c.document_type)
            .unwrap_or(DocumentType::Unknown)
    }

    /// Settle the terminal status from the recorded failures. A cancelled
    /// outcome stays cancelled.
    pub fn resolve(&mut self) {
        if self.status == DocumentStatus::Cancelled {
            self.finished_at = Some(Utc::now());
            return;
        }
        self.status = if self.failures.is_empty() {
            DocumentStatus::Succeeded
        } else if self.has_partial_results() {
            DocumentStatus::PartiallyFailed
        } else {
            DocumentStatus::Failed
        };
        self.finished_at = Some(Utc::now());
    }
}

/// Per-document line in the batch summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentEntry {
    pub document_id: DocumentId,
    pub source_path: PathBuf,
    pub document_type: DocumentType,
    pub status: DocumentStatus,
}

/// Aggregate record for a full batch run, persisted at the output root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub total: usize,
    pub succeeded: usize,
    pub partially_failed: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub documents: Vec<DocumentEntry>,
}

impl BatchSummary {
    pub fn tally(
        batch_id: Uuid,
        started_at: DateTime<Utc>,
        outcomes: &[ProcessingOutcome],
    ) -> Self {
        let mut summary = Self {
            batch_id,
            started_at,
            finished_at: Utc::now(),
            total: outcomes.len(),
            succeeded: 0,
            partially_failed: 0,
            failed: 0,
            cancelled: 0,
            documents: Vec::with_capacity(outcomes.len()),
        };
        for outcome in outcomes {
            match outcome.status {
                DocumentStatus::Succeeded => summary.succeeded += 1,
                DocumentStatus::PartiallyFailed => summary.partially_failed += 1,
                DocumentStatus::Failed => summary.failed += 1,
                DocumentStatus::Cancelled => summary.cancelled += 1,
                DocumentStatus::Pending | DocumentStatus::InProgress => {}
            }
            summary.documents.push(DocumentEntry {
                document_id: outcome.document_id.clone(),
                source_path: outcome.source_path.clone(),
                document_type: outcome.document_type(),
                status: outcome.status,
            });
        }
        summary
    }
}

impl std::fmt::Display for BatchSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} documents: {} succeeded, {} partially failed, {} failed, {} cancelled",
            self.total, self.succeeded, self.partially_failed, self.failed, self.cancelled
        )
    }
}
