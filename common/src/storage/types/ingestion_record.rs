use sha2::{Digest, Sha256};

use crate::{error::AppError, storage::db::SurrealDbClient, stored_object};

/// How the classifier routed a file: tabular sources are profiled for schema
/// metadata, everything else is vectorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    Structured,
    Unstructured,
}

impl FileKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileKind::Structured => "structured",
            FileKind::Unstructured => "unstructured",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    Complete,
    Partial,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Complete => "complete",
            RecordStatus::Partial => "partial",
        }
    }
}

/// Reason codes for enrichments missing from a partial record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialReason {
    VectorizationFailed,
    ProfileFailed,
    MetadataExtractionFailed,
}

/// A locally extracted chunk stored inline on the record when the managed
/// vector corpus was bypassed. The embedding may be empty when the embedding
/// provider failed for that chunk.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InlineChunk {
    pub text: String,
    pub chunk_index: u32,
    #[serde(default)]
    pub embedding: Vec<f32>,
}

stored_object!(IngestionRecord, "ingestion_record", {
    tenant_id: String,
    source_pointer: String,
    display_name: String,
    file_kind: FileKind,
    #[serde(default)]
    corpus_id: Option<String>,
    #[serde(default)]
    vector_document_id: Option<String>,
    #[serde(default)]
    column_headers: Option<Vec<String>>,
    #[serde(default)]
    row_count: Option<u64>,
    summary: String,
    keywords: Vec<String>,
    #[serde(default)]
    contexts: Vec<InlineChunk>,
    status: RecordStatus,
    #[serde(default)]
    partial_reasons: Vec<PartialReason>
});

impl IngestionRecord {
    /// Deterministic record identity over the upsert key. Re-ingesting the
    /// same (tenant_id, source_pointer) maps to the same id, so the keyed
    /// upsert replaces the prior record.
    pub fn record_id(tenant_id: &str, source_pointer: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(tenant_id.as_bytes());
        hasher.update([0u8]);
        hasher.update(source_pointer.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Upsert the record under its deterministic id. A failure here is the
    /// one backend failure the pipeline treats as fatal.
    pub async fn upsert(self, db: &SurrealDbClient) -> Result<(), AppError> {
        db.upsert_item(self)
            .await
            .map_err(|err| AppError::Persistence(err.to_string()))?;
        Ok(())
    }

    pub async fn find_by_key(
        tenant_id: &str,
        source_pointer: &str,
        db: &SurrealDbClient,
    ) -> Result<Option<IngestionRecord>, AppError> {
        let id = Self::record_id(tenant_id, source_pointer);
        Ok(db.get_item(&id).await?)
    }
}
