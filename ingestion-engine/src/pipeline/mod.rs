mod config;
mod context;
mod services;
mod stages;
mod state;

pub use config::{EngineConfig, EngineTuning};
#[allow(clippy::module_name_repetitions)]
pub use services::{DefaultEngineServices, EngineServices};

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use async_openai::{config::OpenAIConfig, Client};
use common::{
    error::AppError,
    storage::{
        db::SurrealDbClient,
        store::StorageManager,
        types::{
            ingestion_record::{FileKind, PartialReason, RecordStatus},
            ingestion_task::{IngestionTask, TaskErrorInfo, TaskOutcome},
        },
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider},
};
use tracing::{debug, info, warn};

use self::{
    context::PipelineContext,
    stages::{classify_request, enrich_profiled, enrich_vectorized, persist, profile, vectorize},
    state::{pending, IngestionMachine, Profiled, Vectorized},
};
use crate::types::{IngestionRequest, IngestionResult, ResultStatus};

/// What a completed (non-aborted) pipeline run produced.
pub struct PipelineOutcome {
    pub record_id: String,
    pub file_kind: FileKind,
    pub status: RecordStatus,
    pub partial_reasons: Vec<PartialReason>,
}

enum RoutedMachine {
    Profiled(IngestionMachine<(), Profiled>),
    Vectorized(IngestionMachine<(), Vectorized>),
}

/// Sequences classification, routing, enrichment, and persistence for one
/// request, and owns the fatal-versus-degradation asymmetry: persistence
/// failures abort, everything upstream of it degrades to a partial record.
pub struct IngestionEngine {
    db: Arc<SurrealDbClient>,
    engine_config: EngineConfig,
    services: Arc<dyn EngineServices>,
}

impl IngestionEngine {
    pub fn new(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: AppConfig,
        raw_store: StorageManager,
        staging_store: Option<StorageManager>,
        embedding_provider: Arc<EmbeddingProvider>,
    ) -> Result<Self, AppError> {
        Self::new_with_config(
            db,
            openai_client,
            config,
            raw_store,
            staging_store,
            embedding_provider,
            EngineConfig::default(),
        )
    }

    pub fn new_with_config(
        db: Arc<SurrealDbClient>,
        openai_client: Arc<Client<OpenAIConfig>>,
        config: AppConfig,
        raw_store: StorageManager,
        staging_store: Option<StorageManager>,
        embedding_provider: Arc<EmbeddingProvider>,
        engine_config: EngineConfig,
    ) -> Result<Self, AppError> {
        let services = DefaultEngineServices::new(
            Arc::clone(&db),
            openai_client,
            config,
            engine_config.tuning.clone(),
            raw_store,
            staging_store,
            embedding_provider,
        )?;

        Self::with_services(db, engine_config, Arc::new(services))
    }

    pub fn with_services(
        db: Arc<SurrealDbClient>,
        engine_config: EngineConfig,
        services: Arc<dyn EngineServices>,
    ) -> Result<Self, AppError> {
        Ok(Self {
            db,
            engine_config,
            services,
        })
    }

    /// The single entry point: always returns a structured result, never a
    /// bare error.
    #[tracing::instrument(skip_all, fields(tenant_id = %tenant_id, source_pointer = %source_pointer))]
    pub async fn ingest(
        &self,
        tenant_id: &str,
        source_pointer: &str,
        display_name: &str,
    ) -> IngestionResult {
        let request = IngestionRequest {
            tenant_id: tenant_id.to_string(),
            source_pointer: source_pointer.to_string(),
            display_name: display_name.to_string(),
        };

        match self.drive_pipeline(&request, 1).await {
            Ok(outcome) => outcome_to_result(outcome),
            Err(err) => IngestionResult {
                status: ResultStatus::Failed,
                file_kind: None,
                record_id: None,
                partial_reasons: Vec::new(),
                error: Some(err.to_string()),
            },
        }
    }

    /// Queue entry point: drives the pipeline for a claimed task and settles
    /// the task's lifecycle afterwards.
    #[tracing::instrument(
        skip_all,
        fields(
            task_id = %task.id,
            attempt = task.attempts,
            worker_id = task.worker_id.as_deref().unwrap_or("unknown-worker"),
            tenant_id = %task.tenant_id
        )
    )]
    pub async fn process_task(&self, task: IngestionTask) -> Result<(), AppError> {
        let processing_task = task.mark_processing(&self.db).await?;
        let request = IngestionRequest {
            tenant_id: processing_task.tenant_id.clone(),
            source_pointer: processing_task.source_pointer.clone(),
            display_name: processing_task.display_name.clone(),
        };

        match self
            .drive_pipeline(&request, processing_task.attempts)
            .await
            .map_err(|err| {
                debug!(
                    task_id = %processing_task.id,
                    attempt = processing_task.attempts,
                    error = %err,
                    "ingestion pipeline failed"
                );
                err
            }) {
            Ok(outcome) => {
                processing_task
                    .settle(TaskOutcome::Succeeded, &self.db)
                    .await?;
                info!(
                    task_id = %processing_task.id,
                    attempt = processing_task.attempts,
                    record_id = %outcome.record_id,
                    status = outcome.status.as_str(),
                    "ingestion task succeeded"
                );
                Ok(())
            }
            Err(err) => {
                let reason = err.to_string();
                let error = TaskErrorInfo {
                    message: reason.clone(),
                };

                if err.is_retryable() && processing_task.can_retry() {
                    let delay = self.retry_delay(processing_task.attempts);
                    processing_task
                        .settle(TaskOutcome::Retry { error, delay }, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing_task.id,
                        attempt = processing_task.attempts,
                        retry_in_secs = delay.as_secs(),
                        "ingestion task failed; scheduled retry"
                    );
                } else {
                    processing_task
                        .settle(TaskOutcome::DeadLetter { error }, &self.db)
                        .await?;
                    warn!(
                        task_id = %processing_task.id,
                        attempt = processing_task.attempts,
                        "ingestion task failed; moved to dead letter queue"
                    );
                }

                Err(AppError::Processing(reason))
            }
        }
    }

    fn retry_delay(&self, attempt: u32) -> Duration {
        let tuning = &self.engine_config.tuning;
        let capped_attempt = attempt
            .saturating_sub(1)
            .min(tuning.retry_backoff_cap_exponent);
        let multiplier = 2_u64.pow(capped_attempt);
        let delay = tuning.retry_base_delay_secs.saturating_mul(multiplier);

        Duration::from_secs(delay.min(tuning.retry_max_delay_secs))
    }

    fn duration_millis(duration: Duration) -> u64 {
        u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
    }

    #[tracing::instrument(
        skip_all,
        fields(tenant_id = %request.tenant_id, source_pointer = %request.source_pointer, attempt = attempt)
    )]
    async fn drive_pipeline(
        &self,
        request: &IngestionRequest,
        attempt: u32,
    ) -> Result<PipelineOutcome, AppError> {
        let mut ctx = PipelineContext::new(request, attempt, self.services.as_ref());

        let machine = pending();

        let pipeline_started = Instant::now();

        let stage_start = Instant::now();
        let machine = classify_request(machine, &mut ctx).map_err(|err| ctx.abort(err))?;
        let classify_duration = stage_start.elapsed();
        let file_kind = ctx.classified()?.kind;

        let stage_start = Instant::now();
        let routed = match file_kind {
            FileKind::Structured => RoutedMachine::Profiled(
                profile(machine, &mut ctx)
                    .await
                    .map_err(|err| ctx.abort(err))?,
            ),
            FileKind::Unstructured => RoutedMachine::Vectorized(
                vectorize(machine, &mut ctx)
                    .await
                    .map_err(|err| ctx.abort(err))?,
            ),
        };
        let route_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let machine = match routed {
            RoutedMachine::Profiled(machine) => enrich_profiled(machine, &mut ctx).await,
            RoutedMachine::Vectorized(machine) => enrich_vectorized(machine, &mut ctx).await,
        }
        .map_err(|err| ctx.abort(err))?;
        let enrich_duration = stage_start.elapsed();

        let stage_start = Instant::now();
        let (_machine, record_id) = persist(machine, &mut ctx)
            .await
            .map_err(|err| ctx.abort(err))?;
        let persist_duration = stage_start.elapsed();

        let total_duration = pipeline_started.elapsed();
        let classify_ms = Self::duration_millis(classify_duration);
        let route_ms = Self::duration_millis(route_duration);
        let enrich_ms = Self::duration_millis(enrich_duration);
        let persist_ms = Self::duration_millis(persist_duration);
        info!(
            tenant_id = %request.tenant_id,
            attempt,
            total_ms = Self::duration_millis(total_duration),
            classify_ms,
            route_ms,
            enrich_ms,
            persist_ms,
            status = ctx.status().as_str(),
            "ingestion pipeline finished"
        );

        Ok(PipelineOutcome {
            record_id,
            file_kind,
            status: ctx.status(),
            partial_reasons: ctx.partial_reasons.clone(),
        })
    }
}

fn outcome_to_result(outcome: PipelineOutcome) -> IngestionResult {
    let status = match outcome.status {
        RecordStatus::Complete => ResultStatus::Complete,
        RecordStatus::Partial => ResultStatus::Partial,
    };

    IngestionResult {
        status,
        file_kind: Some(outcome.file_kind),
        record_id: Some(outcome.record_id),
        partial_reasons: outcome.partial_reasons,
        error: None,
    }
}
