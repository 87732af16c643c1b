//! Sequential per-document pipeline and the concurrent batch runner around it.
//!
//! Stages run strictly in order for one document: detect, crop, classify,
//! extract text, structure, persist. A stage failure is recorded on the
//! outcome and later stages that depend on its output are skipped; the
//! outcome is persisted regardless, so every input file leaves a trace in
//! the result store.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use docuflow_core::{
    BatchSummary, Classification, DocumentId, DocumentStatus, DocumentType, PipelineConfig,
    ProcessingOutcome, SourceDocument, Stage, StageError, StageFailure,
};
use docuflow_store::{ResultStore, StoreError};
use thiserror::Error;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::classifier::DocumentClassifier;
use crate::detector::RegionDetector;
use crate::extract::TextExtractor;
use crate::preprocess;
use crate::retry::RetryPolicy;
use crate::structure::{salvage, Structurer};

/// Errors that abort a run. Per-document failures never surface here; they
/// are recorded on the document's outcome instead.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Cooperative cancellation flag shared between the shell and the workers.
/// Documents already in flight finish their current stage, get marked
/// cancelled and are persisted; documents not yet started are skipped.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Progress notifications for a batch run, consumed by the shell for
/// user-facing output. Delivery is best effort.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started { source_path: PathBuf },
    Finished { document_id: DocumentId, status: DocumentStatus },
}

/// The pipeline with its four stage adapters and the result store.
pub struct DocumentPipeline<D, C, X, S> {
    detector: D,
    classifier: C,
    extractor: X,
    structurer: S,
    store: ResultStore,
    retry: RetryPolicy,
    threshold: f32,
    concurrency: usize,
}

impl<D, C, X, S> DocumentPipeline<D, C, X, S>
where
    D: RegionDetector + 'static,
    C: DocumentClassifier + 'static,
    X: TextExtractor + 'static,
    S: Structurer + 'static,
{
    pub fn new(
        detector: D,
        classifier: C,
        extractor: X,
        structurer: S,
        store: ResultStore,
        config: &PipelineConfig,
    ) -> Self {
        Self {
            detector,
            classifier,
            extractor,
            structurer,
            store,
            retry: RetryPolicy::new(&config.retry),
            threshold: config.detection.threshold,
            concurrency: config.batch.concurrency.max(1),
        }
    }

    /// Run the full stage sequence for one document. Always persists an
    /// outcome; only a result-store failure propagates as an error.
    pub async fn process_document(
        &self,
        source: &SourceDocument,
        cancel: &CancelToken,
    ) -> Result<ProcessingOutcome, PipelineError> {
        // An unreadable file still gets a recorded outcome, keyed by its
        // path since there are no bytes to hash.
        let bytes = match tokio::fs::read(&source.path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                let mut outcome =
                    ProcessingOutcome::new(DocumentId::from_path(&source.path), &source.path);
                outcome.record_failure(
                    Stage::Detecting,
                    &StageError::InvalidInput(format!("unreadable source file: {e}")),
                );
                return self.finish(outcome, None).await;
            }
        };

        let mut outcome = ProcessingOutcome::new(DocumentId::from_bytes(&bytes), &source.path);
        outcome.status = DocumentStatus::InProgress;
        tracing::info!(
            document_id = %outcome.document_id,
            path = %source.path.display(),
            "processing document"
        );

        let image = match preprocess::decode_image(&bytes) {
            Ok(image) => image,
            Err(e) => {
                outcome.record_failure(
                    Stage::Detecting,
                    &StageError::InvalidInput(e.to_string()),
                );
                return self.finish(outcome, None).await;
            }
        };

        if self.check_cancelled(&mut outcome, cancel) {
            return self.finish(outcome, None).await;
        }

        // Detect.
        let regions = match self.detector.detect(&image) {
            Ok(regions) => regions,
            Err(e) => {
                outcome.record_failure(Stage::Detecting, &e);
                return self.finish(outcome, None).await;
            }
        };
        outcome.regions = regions
            .into_iter()
            .filter(|r| r.confidence >= self.threshold)
            .collect();
        let Some(best) = outcome
            .regions
            .iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
            .cloned()
        else {
            outcome
                .failures
                .push(StageFailure::nothing_detected(self.threshold));
            return self.finish(outcome, None).await;
        };

        // Crop the winning region; a degenerate box falls back to the full
        // page so the downstream stages still get an image.
        let cropped = preprocess::crop_region(&image, &best.bounds).unwrap_or_else(|e| {
            tracing::warn!(document_id = %outcome.document_id, %e, "crop failed, using full page");
            image.clone()
        });

        if self.check_cancelled(&mut outcome, cancel) {
            return self.finish(outcome, None).await;
        }

        // Classify, unless the caller already told us what this is. A region
        // that made it past detection always gets a classification, even if
        // it is only a zero-confidence unknown.
        outcome.classification = match source.type_hint {
            Some(hint) => Some(Classification::new(hint, 1.0)),
            None => match self.classifier.classify(&cropped) {
                Ok(classification) => Some(classification),
                Err(e) => {
                    outcome.record_failure(Stage::Classifying, &e);
                    Some(Classification::new(DocumentType::Unknown, 0.0))
                }
            },
        };

        let region_png = match preprocess::encode_png(&preprocess::normalize_for_ocr(cropped)) {
            Ok(png) => png,
            Err(e) => {
                outcome.record_failure(
                    Stage::Extracting,
                    &StageError::InvalidInput(e.to_string()),
                );
                return self.finish(outcome, None).await;
            }
        };

        if self.check_cancelled(&mut outcome, cancel) {
            return self.finish(outcome, Some(&region_png)).await;
        }

        // Extract text, retrying transient cloud failures.
        let ocr = self
            .retry
            .run("ocr", || self.extractor.extract_text(&region_png))
            .await;
        let text = match ocr {
            Ok(text) => {
                outcome.ocr = Some(text.clone());
                text
            }
            Err(e) => {
                outcome.record_failure(Stage::Extracting, &e);
                return self.finish(outcome, Some(&region_png)).await;
            }
        };

        if self.check_cancelled(&mut outcome, cancel) {
            return self.finish(outcome, Some(&region_png)).await;
        }

        // Structure. When the language model fails after retries, regex
        // salvage still recovers whatever the patterns can find.
        let document_type = outcome.document_type();
        let record = self
            .retry
            .run("structuring", || {
                self.structurer.structure(&text.text, document_type)
            })
            .await;
        match record {
            Ok(record) => outcome.record = Some(record),
            Err(e) => {
                outcome.record_failure(Stage::Structuring, &e);
                let salvaged = salvage::extract(&text.text, document_type);
                if !salvaged.is_empty() {
                    tracing::info!(
                        document_id = %outcome.document_id,
                        fields = salvaged.fields.len(),
                        "salvaged fields after structuring failure"
                    );
                    outcome.record = Some(salvaged);
                }
            }
        }

        self.finish(outcome, Some(&region_png)).await
    }

    /// Process a set of documents with bounded concurrency and write the
    /// aggregate summary. A storage failure aborts the whole run.
    pub async fn run_batch(
        self: &Arc<Self>,
        documents: Vec<SourceDocument>,
        cancel: CancelToken,
        progress: Option<mpsc::UnboundedSender<ProgressEvent>>,
    ) -> Result<BatchSummary, PipelineError> {
        let started_at = Utc::now();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut workers = JoinSet::new();

        for document in documents {
            if cancel.is_cancelled() {
                break;
            }
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let pipeline = Arc::clone(self);
            let cancel = cancel.clone();
            let progress = progress.clone();
            workers.spawn(async move {
                let _permit = permit;
                if let Some(tx) = &progress {
                    let _ = tx.send(ProgressEvent::Started {
                        source_path: document.path.clone(),
                    });
                }
                let outcome = pipeline.process_document(&document, &cancel).await?;
                if let Some(tx) = &progress {
                    let _ = tx.send(ProgressEvent::Finished {
                        document_id: outcome.document_id.clone(),
                        status: outcome.status,
                    });
                }
                Ok::<_, PipelineError>(outcome)
            });
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = workers.join_next().await {
            outcomes.push(joined??);
        }

        let summary = BatchSummary::tally(Uuid::new_v4(), started_at, &outcomes);
        self.store.write_summary(&summary).await?;
        tracing::info!(batch_id = %summary.batch_id, %summary, "batch finished");
        Ok(summary)
    }

    fn check_cancelled(&self, outcome: &mut ProcessingOutcome, cancel: &CancelToken) -> bool {
        if cancel.is_cancelled() {
            outcome.status = DocumentStatus::Cancelled;
            tracing::info!(document_id = %outcome.document_id, "cancelled mid-flight");
            true
        } else {
            false
        }
    }

    async fn finish(
        &self,
        mut outcome: ProcessingOutcome,
        region_png: Option<&[u8]>,
    ) -> Result<ProcessingOutcome, PipelineError> {
        outcome.resolve();
        for failure in &outcome.failures {
            tracing::warn!(
                document_id = %outcome.document_id,
                stage = %failure.stage,
                kind = ?failure.kind,
                message = %failure.message,
                "stage failed"
            );
        }
        self.store.persist(&outcome, region_png).await?;
        tracing::info!(
            document_id = %outcome.document_id,
            status = %outcome.status,
            "document finished"
        );
        Ok(outcome)
    }
}
