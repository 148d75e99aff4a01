use std::{sync::Arc, time::Duration};

use async_openai::{config::OpenAIConfig, Client};
use async_trait::async_trait;
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::ingestion_record::{FileKind, IngestionRecord},
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::warn;

use super::config::EngineTuning;
use crate::{
    corpus::CorpusResolver,
    extract::extract_text,
    metadata::{excerpt_of, extract_with_summarizer, structured_metadata},
    profile::profile_csv,
    strategies::{run_strategies, strategy_plan, StrategyContext},
    types::{
        ClassifiedFile, CorpusHandle, DescriptiveMetadata, IngestionRequest, StructuredProfile,
        VectorAttachment,
    },
    vector_index::{HttpVectorIndexClient, VectorIndexClient},
};

/// Collaborator seam for the orchestrator; tests substitute mocks here.
#[async_trait]
pub trait EngineServices: Send + Sync {
    fn vector_index_enabled(&self) -> bool;

    async fn resolve_corpus(&self, tenant_id: &str) -> Result<CorpusHandle, AppError>;

    async fn vectorize(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
        corpus: Option<&CorpusHandle>,
    ) -> Result<VectorAttachment, AppError>;

    async fn profile_structured(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
    ) -> Result<StructuredProfile, AppError>;

    async fn extract_metadata(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
        profile: Option<&StructuredProfile>,
    ) -> Result<DescriptiveMetadata, AppError>;

    async fn persist_record(&self, record: IngestionRecord) -> Result<(), AppError>;
}

pub struct DefaultEngineServices {
    db: Arc<SurrealDbClient>,
    openai_client: Arc<Client<OpenAIConfig>>,
    config: AppConfig,
    tuning: EngineTuning,
    raw_store: StorageManager,
    staging_store: Option<StorageManager>,
    vector_client: Option<Arc<dyn VectorIndexClient>>,
    corpus_resolver: Option<CorpusResolver>,
    embedding_provider: Arc<EmbeddingProvider>,
}

impl DefaultEngineServices {
    /// Wire the real collaborators from configuration. The vector client is
    /// only constructed when an endpoint is configured.
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: AppConfig,
        tuning: EngineTuning,
        raw_store: StorageManager,
        staging_store: Option<StorageManager>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        let vector_client = match &config.vector_index_url {
            Some(url) => {
                let client = HttpVectorIndexClient::new(
                    url,
                    config.vector_index_api_key.clone(),
                    Duration::from_secs(config.vector_index_timeout_secs),
                )?;
                Some(Arc::new(client) as Arc<dyn VectorIndexClient>)
            }
            None => None,
        };

        Ok(Self::with_vector_client(
            db,
            openai_client,
            config,
            tuning,
            raw_store,
            staging_store,
            vector_client,
            embedding_provider,
        ))
    }

    /// Construct with an explicit vector client (or none), used by tests to
    /// inject stubs.
    #[allow(clippy::too_many_arguments)]
    pub fn with_vector_client(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: AppConfig,
        tuning: EngineTuning,
        raw_store: StorageManager,
        staging_store: Option<StorageManager>,
        vector_client: Option<Arc<dyn VectorIndexClient>>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Self {
        let corpus_resolver = vector_client.as_ref().map(|client| {
            CorpusResolver::new(
                Arc::clone(client),
                tuning.corpus_retry_attempts,
                tuning.corpus_retry_base_delay_ms,
            )
        });

        Self {
            db,
            openai_client,
            config,
            tuning,
            raw_store,
            staging_store,
            vector_client,
            corpus_resolver,
            embedding_provider,
        }
    }

    /// Excerpt for the summarizer; extraction failures fall back to a bare
    /// type description so metadata extraction never blocks on content.
    async fn summarizer_excerpt(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
    ) -> String {
        let extracted = match self.raw_store.get(&request.source_pointer).await {
            Ok(content) => extract_text(content, &classified.extension).await,
            Err(err) => Err(AppError::from(err)),
        };

        match extracted {
            Ok(text) => excerpt_of(&text, self.tuning.metadata_excerpt_chars),
            Err(err) => {
                warn!(
                    source_pointer = %request.source_pointer,
                    error = %err,
                    "excerpt extraction failed; describing the document type instead"
                );
                format!("Document type: .{}", classified.extension)
            }
        }
    }
}

#[async_trait]
impl EngineServices for DefaultEngineServices {
    fn vector_index_enabled(&self) -> bool {
        self.vector_client.is_some()
    }

    async fn resolve_corpus(&self, tenant_id: &str) -> Result<CorpusHandle, AppError> {
        let resolver = self.corpus_resolver.as_ref().ok_or_else(|| {
            AppError::InternalError("corpus resolution requested without a vector client".into())
        })?;
        resolver.resolve(tenant_id).await
    }

    async fn vectorize(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
        corpus: Option<&CorpusHandle>,
    ) -> Result<VectorAttachment, AppError> {
        let plan = strategy_plan(self.vector_index_enabled(), self.staging_store.is_some());

        let ctx = StrategyContext {
            request,
            extension: &classified.extension,
            corpus,
            raw_store: &self.raw_store,
            staging_store: self.staging_store.as_ref(),
            vector_client: self.vector_client.as_deref(),
            embedding_provider: &self.embedding_provider,
            tuning: &self.tuning,
        };

        run_strategies(&plan, &ctx).await
    }

    async fn profile_structured(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
    ) -> Result<StructuredProfile, AppError> {
        if classified.extension != "csv" {
            // Only CSV carries a parsed schema; other tabular types are
            // recorded without one.
            return Ok(StructuredProfile::default());
        }

        let content = self.raw_store.get(&request.source_pointer).await?;
        profile_csv(&content)
    }

    async fn extract_metadata(
        &self,
        request: &IngestionRequest,
        classified: &ClassifiedFile,
        profile: Option<&StructuredProfile>,
    ) -> Result<DescriptiveMetadata, AppError> {
        match classified.kind {
            FileKind::Structured => {
                let empty = StructuredProfile::default();
                Ok(structured_metadata(
                    profile.unwrap_or(&empty),
                    &classified.extension,
                    &request.display_name,
                ))
            }
            FileKind::Unstructured => {
                let excerpt = self.summarizer_excerpt(request, classified).await;
                extract_with_summarizer(
                    &self.openai_client,
                    &self.config.summarizer_model,
                    &request.display_name,
                    &excerpt,
                    Duration::from_secs(self.tuning.summarizer_timeout_secs),
                )
                .await
            }
        }
    }

    async fn persist_record(&self, record: IngestionRecord) -> Result<(), AppError> {
        record.upsert(&self.db).await
    }
}
