use common::{
    error::AppError,
    storage::types::ingestion_record::{FileKind, PartialReason},
};
use state_machines::core::GuardError;
use tracing::{debug, info, instrument};

use super::{
    context::PipelineContext,
    state::{Classified, Enriched, IngestionMachine, Pending, Persisted, Profiled, Vectorized},
};
use crate::{classify, types::DescriptiveMetadata};

#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub fn classify_request(
    machine: IngestionMachine<(), Pending>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Classified>, AppError> {
    let classified = classify::classify(ctx.request)?;

    info!(
        tenant_id = %ctx.request.tenant_id,
        source_pointer = %ctx.request.source_pointer,
        display_name = %ctx.request.display_name,
        file_kind = classified.kind.as_str(),
        extension = %classified.extension,
        "ingestion request classified"
    );

    ctx.classified = Some(classified);

    machine
        .classify()
        .map_err(|(_, guard)| map_guard_error("classify", &guard))
}

/// Structured route: schema profiling, never the vector service. A parse
/// failure degrades the run and leaves an empty profile in place.
#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub async fn profile(
    machine: IngestionMachine<(), Classified>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Profiled>, AppError> {
    let classified = ctx.classified()?.clone();
    debug_assert_eq!(classified.kind, FileKind::Structured);

    match ctx
        .services
        .profile_structured(ctx.request, &classified)
        .await
    {
        Ok(profile) => {
            debug!(
                tenant_id = %ctx.request.tenant_id,
                columns = profile.column_headers.len(),
                rows = profile.row_count,
                "structured profile extracted"
            );
            ctx.profile = Some(profile);
        }
        Err(err) => {
            ctx.degrade(PartialReason::ProfileFailed, &err);
            ctx.profile = None;
        }
    }

    machine
        .profile()
        .map_err(|(_, guard)| map_guard_error("profile", &guard))
}

/// Unstructured route: resolve the tenant corpus (fatal when the service is
/// configured but unavailable), then walk the upload strategy ladder. Ladder
/// exhaustion degrades the run instead of aborting it so metadata search
/// stays available.
#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub async fn vectorize(
    machine: IngestionMachine<(), Classified>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Vectorized>, AppError> {
    let classified = ctx.classified()?.clone();
    debug_assert_eq!(classified.kind, FileKind::Unstructured);

    let corpus = if ctx.services.vector_index_enabled() {
        Some(ctx.services.resolve_corpus(&ctx.request.tenant_id).await?)
    } else {
        None
    };

    match ctx
        .services
        .vectorize(ctx.request, &classified, corpus.as_ref())
        .await
    {
        Ok(attachment) => {
            let doc_ref = attachment.document_ref();
            debug!(
                tenant_id = %ctx.request.tenant_id,
                corpus_id = doc_ref.corpus_id.as_deref().unwrap_or("inline"),
                vector_document_id = %doc_ref.document_id,
                "document vectorized"
            );
            ctx.attachment = Some(attachment);
        }
        Err(err) => {
            ctx.degrade(PartialReason::VectorizationFailed, &err);
        }
    }

    machine
        .vectorize()
        .map_err(|(_, guard)| map_guard_error("vectorize", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub async fn enrich_profiled(
    machine: IngestionMachine<(), Profiled>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Enriched>, AppError> {
    run_enrichment(ctx).await;
    machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub async fn enrich_vectorized(
    machine: IngestionMachine<(), Vectorized>,
    ctx: &mut PipelineContext<'_>,
) -> Result<IngestionMachine<(), Enriched>, AppError> {
    run_enrichment(ctx).await;
    machine
        .enrich()
        .map_err(|(_, guard)| map_guard_error("enrich", &guard))
}

/// Descriptive metadata is an enrichment, not a correctness requirement:
/// failures leave empty metadata and a partial status, never an abort.
async fn run_enrichment(ctx: &mut PipelineContext<'_>) {
    let Ok(classified) = ctx.classified().cloned() else {
        ctx.metadata = Some(DescriptiveMetadata::default());
        return;
    };

    match ctx
        .services
        .extract_metadata(ctx.request, &classified, ctx.profile.as_ref())
        .await
    {
        Ok(metadata) => {
            debug!(
                tenant_id = %ctx.request.tenant_id,
                keywords = metadata.keywords.len(),
                summary_chars = metadata.summary.chars().count(),
                "descriptive metadata extracted"
            );
            ctx.metadata = Some(metadata);
        }
        Err(err) => {
            ctx.degrade(PartialReason::MetadataExtractionFailed, &err);
            ctx.metadata = Some(DescriptiveMetadata::default());
        }
    }
}

/// The one fatal tail: a metadata-store failure aborts with no durable
/// record, regardless of upstream success.
#[instrument(
    level = "trace",
    skip_all,
    fields(tenant_id = %ctx.request.tenant_id, attempt = ctx.attempt)
)]
pub async fn persist(
    machine: IngestionMachine<(), Enriched>,
    ctx: &mut PipelineContext<'_>,
) -> Result<(IngestionMachine<(), Persisted>, String), AppError> {
    let record = ctx.build_record()?;
    let record_id = record.id.clone();
    let status = record.status;

    ctx.services.persist_record(record).await?;

    debug!(
        tenant_id = %ctx.request.tenant_id,
        record_id = %record_id,
        status = status.as_str(),
        "ingestion record persisted"
    );

    let machine = machine
        .persist()
        .map_err(|(_, guard)| map_guard_error("persist", &guard))?;
    Ok((machine, record_id))
}

fn map_guard_error(event: &str, guard: &GuardError) -> AppError {
    AppError::InternalError(format!(
        "invalid ingestion pipeline transition during {event}: {guard:?}"
    ))
}
