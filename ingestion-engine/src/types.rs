use common::storage::types::ingestion_record::{FileKind, InlineChunk, PartialReason};

/// One ingestion request. Immutable; a fresh value is created per call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestionRequest {
    pub tenant_id: String,
    /// Opaque locator into the raw-file store.
    pub source_pointer: String,
    pub display_name: String,
}

/// Classification output; derived per request, never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifiedFile {
    pub kind: FileKind,
    pub extension: String,
}

/// Canonical per-tenant corpus identity as reported by the vector service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorpusHandle {
    pub tenant_id: String,
    pub corpus_id: String,
    pub location: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorDocumentRef {
    /// Absent when the managed corpus was bypassed by the local-extraction
    /// fallback.
    pub corpus_id: Option<String>,
    pub document_id: String,
}

/// What a successful upload strategy produced.
#[derive(Debug, Clone, PartialEq)]
pub enum VectorAttachment {
    /// Document lives in the managed vector corpus.
    Corpus(VectorDocumentRef),
    /// Chunks embedded locally and stored inline on the metadata record.
    Inline {
        document_id: String,
        chunks: Vec<InlineChunk>,
    },
}

impl VectorAttachment {
    pub fn document_ref(&self) -> VectorDocumentRef {
        match self {
            VectorAttachment::Corpus(doc_ref) => doc_ref.clone(),
            VectorAttachment::Inline { document_id, .. } => VectorDocumentRef {
                corpus_id: None,
                document_id: document_id.clone(),
            },
        }
    }
}

/// Schema metadata for tabular sources; never vectorized.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StructuredProfile {
    pub column_headers: Vec<String>,
    pub row_count: u64,
}

impl StructuredProfile {
    pub fn is_empty(&self) -> bool {
        self.column_headers.is_empty() && self.row_count == 0
    }
}

/// Summary and keyword enrichment. Always present on a record; degrades to
/// empty values when extraction fails.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DescriptiveMetadata {
    pub summary: String,
    pub keywords: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultStatus {
    Complete,
    Partial,
    Failed,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Complete => "complete",
            ResultStatus::Partial => "partial",
            ResultStatus::Failed => "failed",
        }
    }
}

/// Structured outcome returned to callers; failures are encoded here rather
/// than surfaced as bare errors.
#[derive(Debug, Clone)]
pub struct IngestionResult {
    pub status: ResultStatus,
    pub file_kind: Option<FileKind>,
    pub record_id: Option<String>,
    pub partial_reasons: Vec<PartialReason>,
    pub error: Option<String>,
}
