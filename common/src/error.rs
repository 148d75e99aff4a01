use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Unsupported file type: {0}")]
    UnsupportedFileType(String),
    #[error("Vector corpus unavailable: {0}")]
    CorpusUnavailable(String),
    #[error("Vectorization failed: {0}")]
    Vectorization(String),
    #[error("Structured profile failed: {0}")]
    Profile(String),
    #[error("Metadata extraction failed: {0}")]
    MetadataExtraction(String),
    #[error("Record persistence failed: {0}")]
    Persistence(String),
    #[error("Database error: {0}")]
    Database(#[from] surrealdb::Error),
    #[error("Object storage error: {0}")]
    Storage(#[from] object_store::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Internal service error: {0}")]
    InternalError(String),
}

impl AppError {
    /// Whether this error aborts an ingestion run instead of degrading it to
    /// a partial record. Everything upstream of persistence that is not a
    /// classification or corpus failure is recoverable by degradation.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            AppError::UnsupportedFileType(_)
                | AppError::CorpusUnavailable(_)
                | AppError::Persistence(_)
        )
    }

    /// Whether retrying the same request later could succeed. Unsupported
    /// file types never will; the task queue dead-letters them directly.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            AppError::UnsupportedFileType(_) | AppError::Validation(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_and_persistence_failures_are_fatal() {
        assert!(AppError::UnsupportedFileType(".zst".into()).is_fatal());
        assert!(AppError::CorpusUnavailable("timeout".into()).is_fatal());
        assert!(AppError::Persistence("store down".into()).is_fatal());
    }

    #[test]
    fn enrichment_failures_degrade_instead_of_aborting() {
        assert!(!AppError::Vectorization("all strategies failed".into()).is_fatal());
        assert!(!AppError::Profile("bad csv".into()).is_fatal());
        assert!(!AppError::MetadataExtraction("llm timeout".into()).is_fatal());
    }

    #[test]
    fn unsupported_file_type_is_not_retryable() {
        assert!(!AppError::UnsupportedFileType(".bin".into()).is_retryable());
        assert!(AppError::Vectorization("transient".into()).is_retryable());
    }
}
