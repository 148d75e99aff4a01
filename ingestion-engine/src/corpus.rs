use std::{collections::HashMap, sync::Arc};

use common::error::AppError;
use tokio::sync::Mutex;
use tokio_retry::{
    strategy::{jitter, ExponentialBackoff},
    RetryIf,
};
use tracing::{debug, info};

use crate::{
    types::CorpusHandle,
    vector_index::{VectorIndexClient, VectorIndexError},
};

/// Idempotently obtains the per-tenant corpus handle. Read-through cache in
/// front of create-or-fetch against the vector service; the service is the
/// source of truth for corpus existence, so concurrent first-ingest races
/// for the same tenant settle on one canonical corpus without locking.
pub struct CorpusResolver {
    client: Arc<dyn VectorIndexClient>,
    cache: Mutex<HashMap<String, CorpusHandle>>,
    retry_attempts: usize,
    retry_base_delay_ms: u64,
}

impl CorpusResolver {
    pub fn new(
        client: Arc<dyn VectorIndexClient>,
        retry_attempts: usize,
        retry_base_delay_ms: u64,
    ) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            retry_attempts,
            retry_base_delay_ms,
        }
    }

    pub async fn resolve(&self, tenant_id: &str) -> Result<CorpusHandle, AppError> {
        if let Some(handle) = self.cache.lock().await.get(tenant_id) {
            debug!(%tenant_id, corpus_id = %handle.corpus_id, "corpus handle served from cache");
            return Ok(handle.clone());
        }

        let retry_strategy = ExponentialBackoff::from_millis(self.retry_base_delay_ms)
            .map(jitter)
            .take(self.retry_attempts);

        let handle = RetryIf::spawn(
            retry_strategy,
            || self.resolve_once(tenant_id),
            |err: &VectorIndexError| err.is_transient(),
        )
        .await
        .map_err(|err| AppError::CorpusUnavailable(err.to_string()))?;

        info!(%tenant_id, corpus_id = %handle.corpus_id, "corpus handle resolved");
        self.cache
            .lock()
            .await
            .insert(tenant_id.to_string(), handle.clone());

        Ok(handle)
    }

    async fn resolve_once(&self, tenant_id: &str) -> Result<CorpusHandle, VectorIndexError> {
        if let Some(handle) = self.client.find_corpus(tenant_id).await? {
            return Ok(handle);
        }

        match self.client.create_corpus(tenant_id).await {
            Ok(handle) => Ok(handle),
            // Lost a first-ingest race; the service-side corpus is the
            // canonical one.
            Err(VectorIndexError::AlreadyExists(_)) => self
                .client
                .find_corpus(tenant_id)
                .await?
                .ok_or_else(|| {
                    VectorIndexError::Transient(format!(
                        "corpus for tenant {tenant_id} reported existing but was not found"
                    ))
                }),
            Err(err) => Err(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use bytes::Bytes;

    use super::*;

    /// Service stub that simulates the shared corpus registry, including the
    /// "already exists" race response.
    struct StubIndex {
        registry: Mutex<HashMap<String, CorpusHandle>>,
        create_calls: AtomicUsize,
        find_calls: AtomicUsize,
        transient_failures: AtomicUsize,
    }

    impl StubIndex {
        fn new() -> Self {
            Self {
                registry: Mutex::new(HashMap::new()),
                create_calls: AtomicUsize::new(0),
                find_calls: AtomicUsize::new(0),
                transient_failures: AtomicUsize::new(0),
            }
        }

        fn failing(transient_failures: usize) -> Self {
            let stub = Self::new();
            stub.transient_failures
                .store(transient_failures, Ordering::SeqCst);
            stub
        }
    }

    #[async_trait]
    impl VectorIndexClient for StubIndex {
        async fn find_corpus(
            &self,
            tenant_id: &str,
        ) -> Result<Option<CorpusHandle>, VectorIndexError> {
            self.find_calls.fetch_add(1, Ordering::SeqCst);
            if self.transient_failures.load(Ordering::SeqCst) > 0 {
                self.transient_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(VectorIndexError::Transient("503 service unavailable".into()));
            }
            Ok(self.registry.lock().await.get(tenant_id).cloned())
        }

        async fn create_corpus(
            &self,
            tenant_id: &str,
        ) -> Result<CorpusHandle, VectorIndexError> {
            let calls = self.create_calls.fetch_add(1, Ordering::SeqCst);
            let mut registry = self.registry.lock().await;
            if registry.contains_key(tenant_id) {
                return Err(VectorIndexError::AlreadyExists(tenant_id.to_string()));
            }
            let handle = CorpusHandle {
                tenant_id: tenant_id.to_string(),
                corpus_id: format!("corpus-{calls}"),
                location: format!("corpora/{tenant_id}"),
            };
            registry.insert(tenant_id.to_string(), handle.clone());
            Ok(handle)
        }

        async fn import_staged(
            &self,
            _corpus_id: &str,
            _staged_pointer: &str,
        ) -> Result<String, VectorIndexError> {
            unreachable!("resolver never imports")
        }

        async fn upload(
            &self,
            _corpus_id: &str,
            _display_name: &str,
            _content: Bytes,
        ) -> Result<String, VectorIndexError> {
            unreachable!("resolver never uploads")
        }
    }

    fn resolver(client: Arc<dyn VectorIndexClient>) -> CorpusResolver {
        CorpusResolver::new(client, 3, 1)
    }

    #[tokio::test]
    async fn first_resolve_creates_then_caches() {
        let stub = Arc::new(StubIndex::new());
        let resolver = resolver(Arc::clone(&stub) as Arc<dyn VectorIndexClient>);

        let first = resolver.resolve("t1").await.expect("resolve");
        let second = resolver.resolve("t1").await.expect("resolve");

        assert_eq!(first, second);
        assert_eq!(stub.create_calls.load(Ordering::SeqCst), 1);
        // Second resolve is a cache hit; only the first went to the service.
        assert_eq!(stub.find_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrent_first_ingests_settle_on_one_corpus() {
        let stub = Arc::new(StubIndex::new());
        let resolver = Arc::new(resolver(Arc::clone(&stub) as Arc<dyn VectorIndexClient>));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = Arc::clone(&resolver);
            handles.push(tokio::spawn(
                async move { resolver.resolve("t-new").await },
            ));
        }

        let mut corpus_ids = Vec::new();
        for join in handles {
            let handle = join.await.expect("join").expect("resolve");
            corpus_ids.push(handle.corpus_id);
        }

        corpus_ids.dedup();
        assert_eq!(corpus_ids.len(), 1, "exactly one canonical corpus id");
    }

    #[tokio::test]
    async fn already_exists_is_treated_as_success() {
        let stub = Arc::new(StubIndex::new());
        // Seed the registry so creation reports a conflict.
        stub.registry.lock().await.insert(
            "t1".to_string(),
            CorpusHandle {
                tenant_id: "t1".to_string(),
                corpus_id: "corpus-existing".to_string(),
                location: "corpora/t1".to_string(),
            },
        );

        let resolver = resolver(Arc::clone(&stub) as Arc<dyn VectorIndexClient>);
        let handle = resolver.resolve("t1").await.expect("resolve");
        assert_eq!(handle.corpus_id, "corpus-existing");
        assert_eq!(stub.create_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let stub = Arc::new(StubIndex::failing(2));
        let resolver = resolver(Arc::clone(&stub) as Arc<dyn VectorIndexClient>);

        let handle = resolver.resolve("t1").await.expect("resolve after retries");
        assert!(!handle.corpus_id.is_empty());
    }

    #[tokio::test]
    async fn exhausted_retries_report_corpus_unavailable() {
        let stub = Arc::new(StubIndex::failing(16));
        let resolver = resolver(Arc::clone(&stub) as Arc<dyn VectorIndexClient>);

        let err = resolver.resolve("t1").await.expect_err("must fail");
        assert!(matches!(err, AppError::CorpusUnavailable(_)));
    }
}
