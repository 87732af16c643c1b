use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors a pipeline stage can surface.
///
/// The orchestrator decides disposition from the variant: retriable errors go
/// through the backoff policy, non-retriable errors degrade the document's
/// outcome, and fatal errors abort the whole run.
#[derive(Debug, Error)]
pub enum StageError {
    /// A model failed to load. Surfaced at startup, never per-call.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// A network call failed in a way that may succeed on retry.
    #[error("transient network error: {0}")]
    TransientNetwork(String),
    /// The remote service rejected the call for rate/quota reasons.
    #[error("quota exceeded: {0}")]
    QuotaExceeded(String),
    /// The input cannot be processed (corrupt image, unreadable file, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// The result destination is not writable. Aborts the run.
    #[error("storage write failed: {0}")]
    StorageWrite(String),
}

impl StageError {
    /// Whether the retry policy should attempt this call again.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            StageError::TransientNetwork(_) | StageError::QuotaExceeded(_)
        )
    }

    /// Fatal errors abort the run: no document can make progress past them.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StageError::ModelUnavailable(_) | StageError::StorageWrite(_)
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            StageError::ModelUnavailable(_) => FailureKind::ModelUnavailable,
            StageError::TransientNetwork(_) => FailureKind::TransientNetwork,
            StageError::QuotaExceeded(_) => FailureKind::QuotaExceeded,
            StageError::InvalidInput(_) => FailureKind::InvalidInput,
            StageError::StorageWrite(_) => FailureKind::StorageWrite,
        }
    }
}

/// Serializable error category recorded in a persisted outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    ModelUnavailable,
    TransientNetwork,
    QuotaExceeded,
    InvalidInput,
    StorageWrite,
    /// Detection found no region above the configured threshold. Not an
    /// adapter error, but the outcome still carries a marker rather than
    /// being silently dropped.
    NothingDetected,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_variants() {
        assert!(StageError::TransientNetwork("timeout".into()).is_retriable());
        assert!(StageError::QuotaExceeded("429".into()).is_retriable());
        assert!(!StageError::InvalidInput("bad png".into()).is_retriable());
        assert!(!StageError::ModelUnavailable("no file".into()).is_retriable());
        assert!(!StageError::StorageWrite("read-only".into()).is_retriable());
    }

    #[test]
    fn fatal_variants() {
        assert!(StageError::ModelUnavailable("no file".into()).is_fatal());
        assert!(StageError::StorageWrite("read-only".into()).is_fatal());
        assert!(!StageError::TransientNetwork("timeout".into()).is_fatal());
        assert!(!StageError::InvalidInput("bad png".into()).is_fatal());
    }

    #[test]
    fn kind_serializes_snake_case() {
        let json = serde_json::to_string(&FailureKind::TransientNetwork).unwrap();
        assert_eq!(json, "\"transient_network\"");
        let json = serde_json::to_string(&FailureKind::NothingDetected).unwrap();
        assert_eq!(json, "\"nothing_detected\"");
    }
}
