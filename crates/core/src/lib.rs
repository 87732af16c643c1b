pub mod config;
pub mod document;
pub mod error;
pub mod region;
pub mod schema;

pub use config::{
    BatchConfig, ClassifierConfig, ConfigError, DetectionConfig, OcrConfig, PipelineConfig,
    RetrySettings, StructuringConfig,
};
pub use document::{
    BatchSummary, DocumentEntry, DocumentId, DocumentStatus, DocumentType, ProcessingOutcome,
    SourceDocument, Stage, StageFailure,
};
pub use error::{FailureKind, StageError};
pub use region::{BoundingBox, Classification, DetectedRegion, OcrText, TextBlock};
pub use schema::{RecordSchema, StructuredRecord};
