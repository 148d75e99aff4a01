use common::{
    error::AppError,
    storage::types::ingestion_record::{IngestionRecord, PartialReason, RecordStatus},
};
use chrono::Utc;
use tracing::{error, warn};

use crate::types::{
    ClassifiedFile, DescriptiveMetadata, IngestionRequest, StructuredProfile, VectorAttachment,
};

use super::services::EngineServices;

/// Per-request working state. Intermediate artifacts live here for the
/// duration of the run; the record built at the end is the only durable
/// output.
pub struct PipelineContext<'a> {
    pub request: &'a IngestionRequest,
    pub attempt: u32,
    pub services: &'a dyn EngineServices,
    pub classified: Option<ClassifiedFile>,
    pub attachment: Option<VectorAttachment>,
    pub profile: Option<StructuredProfile>,
    pub metadata: Option<DescriptiveMetadata>,
    pub partial_reasons: Vec<PartialReason>,
}

impl<'a> PipelineContext<'a> {
    pub fn new(
        request: &'a IngestionRequest,
        attempt: u32,
        services: &'a dyn EngineServices,
    ) -> Self {
        Self {
            request,
            attempt,
            services,
            classified: None,
            attachment: None,
            profile: None,
            metadata: None,
            partial_reasons: Vec::new(),
        }
    }

    pub fn classified(&self) -> Result<&ClassifiedFile, AppError> {
        self.classified
            .as_ref()
            .ok_or_else(|| AppError::InternalError("classification expected to be available".into()))
    }

    /// Record a tolerated failure: the run continues and the final record is
    /// marked partial with this reason.
    pub fn degrade(&mut self, reason: PartialReason, err: &AppError) {
        warn!(
            tenant_id = %self.request.tenant_id,
            source_pointer = %self.request.source_pointer,
            attempt = self.attempt,
            reason = ?reason,
            error = %err,
            "ingestion step degraded"
        );
        if !self.partial_reasons.contains(&reason) {
            self.partial_reasons.push(reason);
        }
    }

    pub fn abort(&mut self, err: AppError) -> AppError {
        error!(
            tenant_id = %self.request.tenant_id,
            source_pointer = %self.request.source_pointer,
            attempt = self.attempt,
            error = %err,
            "ingestion pipeline aborted"
        );
        err
    }

    pub fn status(&self) -> RecordStatus {
        if self.partial_reasons.is_empty() {
            RecordStatus::Complete
        } else {
            RecordStatus::Partial
        }
    }

    /// Assemble the durable record from the accumulated artifacts.
    pub fn build_record(&mut self) -> Result<IngestionRecord, AppError> {
        let classified = self
            .classified
            .take()
            .ok_or_else(|| AppError::InternalError("classification expected for persistence".into()))?;
        let metadata = self.metadata.take().unwrap_or_default();
        let attachment = self.attachment.take();
        let profile = self.profile.take();

        let (corpus_id, vector_document_id, contexts) = match attachment {
            Some(VectorAttachment::Corpus(doc_ref)) => {
                (doc_ref.corpus_id, Some(doc_ref.document_id), Vec::new())
            }
            Some(VectorAttachment::Inline {
                document_id,
                chunks,
            }) => (None, Some(document_id), chunks),
            None => (None, None, Vec::new()),
        };

        let (column_headers, row_count) = match profile {
            Some(profile) if !profile.is_empty() => {
                (Some(profile.column_headers), Some(profile.row_count))
            }
            _ => (None, None),
        };

        let now = Utc::now();
        Ok(IngestionRecord {
            id: IngestionRecord::record_id(&self.request.tenant_id, &self.request.source_pointer),
            created_at: now,
            updated_at: now,
            tenant_id: self.request.tenant_id.clone(),
            source_pointer: self.request.source_pointer.clone(),
            display_name: self.request.display_name.clone(),
            file_kind: classified.kind,
            corpus_id,
            vector_document_id,
            column_headers,
            row_count,
            summary: metadata.summary,
            keywords: metadata.keywords,
            contexts,
            status: self.status(),
            partial_reasons: self.partial_reasons.clone(),
        })
    }
}
