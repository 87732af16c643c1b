use std::path::{Path, PathBuf};

use docuflow_core::{BatchSummary, DocumentId, DocumentType, ProcessingOutcome};
use thiserror::Error;

/// Structured outcome serialization, one per document.
pub const OUTCOME_FILE: &str = "record.json";
/// The cropped region image the OCR stage ran on.
pub const REGION_IMAGE_FILE: &str = "region.png";
/// Raw OCR text artifact.
pub const OCR_TEXT_FILE: &str = "ocr.txt";
/// Top-level aggregate record for a batch run.
pub const SUMMARY_FILE: &str = "summary.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to write results: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Writes processing outcomes to a predictable on-disk layout:
///
/// ```text
/// <root>/
///   summary.json
///   <document_type>/
///     <document_id>/
///       record.json
///       region.png
///       ocr.txt
/// ```
///
/// Persisting is idempotent per document id: re-running the same source file
/// overwrites its prior output instead of duplicating it, even when the
/// classified type changed between runs.
#[derive(Debug, Clone)]
pub struct ResultStore {
    root: PathBuf,
}

impl ResultStore {
    /// Open the store, creating the root directory. Fails up front when the
    /// destination is not writable — results must never be silently dropped
    /// mid-run.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory an outcome of the given type/id is persisted to.
    pub fn document_dir(&self, document_type: DocumentType, id: &DocumentId) -> PathBuf {
        self.root.join(document_type.dir_name()).join(id.as_str())
    }

    /// Persist one outcome and its artifacts. Returns the document directory.
    pub async fn persist(
        &self,
        outcome: &ProcessingOutcome,
        region_png: Option<&[u8]>,
    ) -> Result<PathBuf, StoreError> {
        let document_type = outcome.document_type();
        let dir = self.document_dir(document_type, &outcome.document_id);

        self.remove_prior(&outcome.document_id, document_type).await?;

        // create_dir_all is safe under concurrent workers targeting the same
        // type subdirectory.
        tokio::fs::create_dir_all(&dir).await?;

        let record = serde_json::to_vec_pretty(outcome)?;
        tokio::fs::write(dir.join(OUTCOME_FILE), record).await?;

        if let Some(png) = region_png {
            tokio::fs::write(dir.join(REGION_IMAGE_FILE), png).await?;
        }
        if let Some(ocr) = &outcome.ocr {
            if !ocr.is_empty() {
                tokio::fs::write(dir.join(OCR_TEXT_FILE), ocr.text.as_bytes()).await?;
            }
        }

        tracing::debug!(
            document_id = %outcome.document_id,
            status = %outcome.status,
            path = %dir.display(),
            "outcome persisted"
        );
        Ok(dir)
    }

    /// Remove earlier output for this id filed under a different type. The
    /// type subdirectory set is small and fixed, so a linear scan is fine.
    async fn remove_prior(
        &self,
        id: &DocumentId,
        keep_type: DocumentType,
    ) -> Result<(), StoreError> {
        for document_type in DocumentType::ALL {
            if document_type == keep_type {
                continue;
            }
            let stale = self.document_dir(document_type, id);
            if tokio::fs::try_exists(&stale).await? {
                tokio::fs::remove_dir_all(&stale).await?;
                tracing::debug!(
                    document_id = %id,
                    path = %stale.display(),
                    "removed stale output from earlier run"
                );
            }
        }
        Ok(())
    }

    /// Write the aggregate record for a batch run at the output root.
    pub async fn write_summary(&self, summary: &BatchSummary) -> Result<PathBuf, StoreError> {
        let path = self.root.join(SUMMARY_FILE);
        let bytes = serde_json::to_vec_pretty(summary)?;
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use docuflow_core::{Classification, OcrText, StructuredRecord};
    use uuid::Uuid;

    fn outcome(id_bytes: &[u8], document_type: Option<DocumentType>) -> ProcessingOutcome {
        let mut o = ProcessingOutcome::new(DocumentId::from_bytes(id_bytes), "/in/scan.jpg");
        if let Some(t) = document_type {
            o.classification = Some(Classification::new(t, 0.9));
        }
        o.resolve();
        o
    }

    #[tokio::test]
    async fn persist_writes_record_and_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("out")).unwrap();

        let mut o = outcome(b"a", Some(DocumentType::Passport));
        o.ocr = Some(OcrText::plain("PASSPORT\nZ5547821"));
        o.record = Some(StructuredRecord::new(DocumentType::Passport));

        let doc_dir = store.persist(&o, Some(b"\x89PNG fake")).await.unwrap();
        assert!(doc_dir.ends_with(format!("passport/{}", o.document_id)));
        assert!(doc_dir.join(OUTCOME_FILE).exists());
        assert!(doc_dir.join(REGION_IMAGE_FILE).exists());
        assert_eq!(
            std::fs::read_to_string(doc_dir.join(OCR_TEXT_FILE)).unwrap(),
            "PASSPORT\nZ5547821"
        );
    }

    #[tokio::test]
    async fn persist_skips_missing_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("out")).unwrap();

        let o = outcome(b"b", None);
        let doc_dir = store.persist(&o, None).await.unwrap();
        assert!(doc_dir.join(OUTCOME_FILE).exists());
        assert!(!doc_dir.join(REGION_IMAGE_FILE).exists());
        assert!(!doc_dir.join(OCR_TEXT_FILE).exists());
    }

    #[tokio::test]
    async fn persist_twice_overwrites_not_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("out")).unwrap();

        let o = outcome(b"c", Some(DocumentType::EmiratesId));
        let first = store.persist(&o, Some(b"one")).await.unwrap();
        let second = store.persist(&o, Some(b"two")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(std::fs::read(second.join(REGION_IMAGE_FILE)).unwrap(), b"two");

        // Exactly one directory under the type subdir.
        let entries: Vec<_> = std::fs::read_dir(store.root().join("emirates_id"))
            .unwrap()
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn reclassified_document_moves_instead_of_duplicating() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("out")).unwrap();

        // First run classified nothing; second run recognized a passport.
        let unknown = outcome(b"d", None);
        store.persist(&unknown, None).await.unwrap();

        let mut passport = outcome(b"d", Some(DocumentType::Passport));
        passport.document_id = unknown.document_id.clone();
        let new_dir = store.persist(&passport, None).await.unwrap();

        assert!(new_dir.exists());
        assert!(!store
            .document_dir(DocumentType::Unknown, &unknown.document_id)
            .exists());
    }

    #[tokio::test]
    async fn summary_lands_at_root() {
        let dir = tempfile::tempdir().unwrap();
        let store = ResultStore::open(dir.path().join("out")).unwrap();

        let o = outcome(b"e", Some(DocumentType::Certificate));
        let summary = BatchSummary::tally(Uuid::new_v4(), Utc::now(), &[o]);
        let path = store.write_summary(&summary).await.unwrap();
        assert_eq!(path, store.root().join(SUMMARY_FILE));

        let raw = std::fs::read_to_string(path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["total"], 1);
        assert_eq!(parsed["succeeded"], 1);
    }

    #[test]
    fn open_fails_on_unwritable_destination() {
        // A regular file where the directory should go.
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("out");
        std::fs::write(&blocker, b"in the way").unwrap();
        assert!(matches!(ResultStore::open(&blocker), Err(StoreError::Io(_))));
    }
}
