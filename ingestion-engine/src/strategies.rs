use async_trait::async_trait;
use bytes::Bytes;
use common::{
    error::AppError,
    storage::{
        store::{is_safe_location, StorageManager},
        types::ingestion_record::InlineChunk,
    },
    utils::embedding::EmbeddingProvider,
};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    extract::extract_text,
    pipeline::EngineTuning,
    types::{CorpusHandle, IngestionRequest, VectorAttachment, VectorDocumentRef},
    vector_index::VectorIndexClient,
};

/// The ordered fallback ladder. Each entry is a distinct way of getting the
/// document represented in the corpus, not a retry of the same call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StrategyKind {
    StagedImport,
    DirectUpload,
    LocalExtraction,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::StagedImport => "staged_import",
            StrategyKind::DirectUpload => "direct_upload",
            StrategyKind::LocalExtraction => "local_extraction",
        }
    }
}

/// Pure selection of the applicable ladder from the configured capabilities.
/// Staged import is preferred whenever a staging store exists; with the
/// vector service disabled only local extraction remains.
pub fn strategy_plan(vector_index_enabled: bool, staging_configured: bool) -> Vec<StrategyKind> {
    if !vector_index_enabled {
        return vec![StrategyKind::LocalExtraction];
    }

    let mut plan = Vec::new();
    if staging_configured {
        plan.push(StrategyKind::StagedImport);
    }
    plan.push(StrategyKind::DirectUpload);
    plan.push(StrategyKind::LocalExtraction);
    plan
}

/// Collaborators available to a strategy attempt.
pub struct StrategyContext<'a> {
    pub request: &'a IngestionRequest,
    pub extension: &'a str,
    pub corpus: Option<&'a CorpusHandle>,
    pub raw_store: &'a StorageManager,
    pub staging_store: Option<&'a StorageManager>,
    pub vector_client: Option<&'a dyn VectorIndexClient>,
    pub embedding_provider: &'a EmbeddingProvider,
    pub tuning: &'a EngineTuning,
}

#[async_trait]
pub trait UploadStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<VectorAttachment, AppError>;
}

fn strategy_for(kind: StrategyKind) -> &'static dyn UploadStrategy {
    match kind {
        StrategyKind::StagedImport => &StagedImport,
        StrategyKind::DirectUpload => &DirectUpload,
        StrategyKind::LocalExtraction => &LocalExtraction,
    }
}

/// Execute the ladder: first success wins, each failure is logged and the
/// next strategy attempted. Exhaustion is a non-fatal vectorization failure.
pub async fn run_strategies(
    plan: &[StrategyKind],
    ctx: &StrategyContext<'_>,
) -> Result<VectorAttachment, AppError> {
    for kind in plan {
        let strategy = strategy_for(*kind);
        match strategy.attempt(ctx).await {
            Ok(attachment) => {
                info!(
                    tenant_id = %ctx.request.tenant_id,
                    strategy = kind.as_str(),
                    "vectorization strategy succeeded"
                );
                return Ok(attachment);
            }
            Err(err) => {
                warn!(
                    tenant_id = %ctx.request.tenant_id,
                    strategy = kind.as_str(),
                    error = %err,
                    "vectorization strategy failed; falling back"
                );
            }
        }
    }

    Err(AppError::Vectorization(
        "all applicable upload strategies failed".into(),
    ))
}

/// Copy the raw bytes to the staging store at a deterministic path, then ask
/// the vector service to import server-to-server from there.
pub struct StagedImport;

/// Deterministic staging location for a request.
pub fn staged_pointer_for(request: &IngestionRequest) -> String {
    format!("staging/{}/{}", request.tenant_id, request.display_name)
}

#[async_trait]
impl UploadStrategy for StagedImport {
    fn kind(&self) -> StrategyKind {
        StrategyKind::StagedImport
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<VectorAttachment, AppError> {
        let staging_store = ctx.staging_store.ok_or_else(|| {
            AppError::InternalError("staged import selected without a staging store".into())
        })?;
        let client = ctx.vector_client.ok_or_else(|| {
            AppError::InternalError("staged import selected without a vector client".into())
        })?;
        let corpus = ctx.corpus.ok_or_else(|| {
            AppError::InternalError("staged import selected without a corpus handle".into())
        })?;

        let staged_pointer = staged_pointer_for(ctx.request);
        if !is_safe_location(&staged_pointer) {
            return Err(AppError::Validation(format!(
                "staging location escapes the store root: {staged_pointer}"
            )));
        }

        let content = ctx.raw_store.get(&ctx.request.source_pointer).await?;
        staging_store.put(&staged_pointer, content).await?;

        let document_id = client
            .import_staged(&corpus.corpus_id, &staged_pointer)
            .await?;

        Ok(VectorAttachment::Corpus(VectorDocumentRef {
            corpus_id: Some(corpus.corpus_id.clone()),
            document_id,
        }))
    }
}

/// Stream the raw bytes straight into the vector service's ingestion call.
pub struct DirectUpload;

#[async_trait]
impl UploadStrategy for DirectUpload {
    fn kind(&self) -> StrategyKind {
        StrategyKind::DirectUpload
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<VectorAttachment, AppError> {
        let client = ctx.vector_client.ok_or_else(|| {
            AppError::InternalError("direct upload selected without a vector client".into())
        })?;
        let corpus = ctx.corpus.ok_or_else(|| {
            AppError::InternalError("direct upload selected without a corpus handle".into())
        })?;

        let content = ctx.raw_store.get(&ctx.request.source_pointer).await?;
        let document_id = client
            .upload(&corpus.corpus_id, &ctx.request.display_name, content)
            .await?;

        Ok(VectorAttachment::Corpus(VectorDocumentRef {
            corpus_id: Some(corpus.corpus_id.clone()),
            document_id,
        }))
    }
}

/// Extract text locally, window it, embed each window, and keep the chunks
/// inline on the metadata record, bypassing the managed corpus entirely.
pub struct LocalExtraction;

#[async_trait]
impl UploadStrategy for LocalExtraction {
    fn kind(&self) -> StrategyKind {
        StrategyKind::LocalExtraction
    }

    async fn attempt(&self, ctx: &StrategyContext<'_>) -> Result<VectorAttachment, AppError> {
        let content = ctx.raw_store.get(&ctx.request.source_pointer).await?;
        let text = extract_text(content, ctx.extension).await?;

        let windows = chunk_windows(
            &text,
            ctx.tuning.chunk_min_chars,
            ctx.tuning.chunk_max_chars,
            ctx.tuning.chunk_overlap_chars,
        )?;

        // A failed embedding batch degrades the chunks, not the strategy:
        // metadata search over the text stays available.
        let embeddings = match ctx.embedding_provider.embed_batch(windows.clone()).await {
            Ok(vectors) => vectors,
            Err(err) => {
                warn!(
                    error = %err,
                    "embedding generation failed; storing chunks without vectors"
                );
                Vec::new()
            }
        };

        let mut chunks = Vec::with_capacity(windows.len());
        for (index, window) in windows.into_iter().enumerate() {
            chunks.push(InlineChunk {
                text: window,
                chunk_index: index as u32,
                embedding: embeddings.get(index).cloned().unwrap_or_default(),
            });
        }

        Ok(VectorAttachment::Inline {
            document_id: Uuid::new_v4().to_string(),
            chunks,
        })
    }
}

/// Fixed-size overlapping windows over extracted text.
fn chunk_windows(
    text: &str,
    min_chars: usize,
    max_chars: usize,
    overlap_chars: usize,
) -> Result<Vec<String>, AppError> {
    if min_chars == 0 || max_chars == 0 || min_chars > max_chars {
        return Err(AppError::Validation(
            "invalid chunk window bounds; ensure 0 < min <= max".into(),
        ));
    }

    if overlap_chars >= min_chars {
        return Err(AppError::Validation(format!(
            "chunk_min_chars must be greater than the configured overlap of {overlap_chars}"
        )));
    }

    let chunk_capacity = ChunkCapacity::new(min_chars)
        .with_max(max_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk window bounds: {e}")))?;
    let chunk_config = ChunkConfig::new(chunk_capacity)
        .with_overlap(overlap_chars)
        .map_err(|e| AppError::Validation(format!("invalid chunk overlap: {e}")))?;
    let splitter = TextSplitter::new(chunk_config);

    let mut windows: Vec<String> = splitter.chunks(text).map(str::to_owned).collect();

    if windows.is_empty() {
        windows.push(String::new());
    }

    Ok(windows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_ladder_when_everything_is_configured() {
        assert_eq!(
            strategy_plan(true, true),
            vec![
                StrategyKind::StagedImport,
                StrategyKind::DirectUpload,
                StrategyKind::LocalExtraction
            ]
        );
    }

    #[test]
    fn no_staging_store_skips_the_staged_import() {
        assert_eq!(
            strategy_plan(true, false),
            vec![StrategyKind::DirectUpload, StrategyKind::LocalExtraction]
        );
    }

    #[test]
    fn disabled_vector_service_leaves_only_local_extraction() {
        assert_eq!(strategy_plan(false, true), vec![StrategyKind::LocalExtraction]);
        assert_eq!(strategy_plan(false, false), vec![StrategyKind::LocalExtraction]);
    }

    #[test]
    fn staged_pointer_is_deterministic() {
        let request = IngestionRequest {
            tenant_id: "t1".to_string(),
            source_pointer: "raw/abc123".to_string(),
            display_name: "report.pdf".to_string(),
        };
        assert_eq!(staged_pointer_for(&request), "staging/t1/report.pdf");
    }

    #[test]
    fn windows_overlap_and_cover_the_text() {
        let text = "abcdefghij".repeat(30);
        let windows = chunk_windows(&text, 40, 80, 10).expect("windows");
        assert!(windows.len() > 1);
        for window in &windows {
            assert!(window.chars().count() <= 80);
        }
    }

    #[test]
    fn empty_text_yields_a_single_empty_window() {
        let windows = chunk_windows("", 40, 80, 10).expect("windows");
        assert_eq!(windows, vec![String::new()]);
    }

    #[test]
    fn overlap_must_stay_below_the_minimum_window() {
        assert!(chunk_windows("text", 10, 20, 10).is_err());
        assert!(chunk_windows("text", 0, 20, 0).is_err());
    }
}
