use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use common::error::AppError;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::types::CorpusHandle;

/// Failures from the managed vector-retrieval service, classified for the
/// resolver's retry policy and the strategy ladder.
#[derive(Error, Debug)]
pub enum VectorIndexError {
    #[error("corpus already exists for tenant {0}")]
    AlreadyExists(String),
    #[error("transient vector service failure: {0}")]
    Transient(String),
    #[error("vector service rejected the call: {0}")]
    Rejected(String),
}

impl VectorIndexError {
    pub fn is_transient(&self) -> bool {
        matches!(self, VectorIndexError::Transient(_))
    }
}

impl From<VectorIndexError> for AppError {
    fn from(err: VectorIndexError) -> Self {
        AppError::Vectorization(err.to_string())
    }
}

/// The slice of the vector service the engine consumes. Corpus creation is
/// split from lookup so the resolver can treat "already exists" as success
/// and re-query for the canonical handle.
#[async_trait]
pub trait VectorIndexClient: Send + Sync {
    async fn find_corpus(&self, tenant_id: &str)
        -> Result<Option<CorpusHandle>, VectorIndexError>;

    async fn create_corpus(&self, tenant_id: &str) -> Result<CorpusHandle, VectorIndexError>;

    /// Server-to-server import from a staged location. Preferred: avoids
    /// client-side upload authorization.
    async fn import_staged(
        &self,
        corpus_id: &str,
        staged_pointer: &str,
    ) -> Result<String, VectorIndexError>;

    /// Stream document bytes directly into the corpus.
    async fn upload(
        &self,
        corpus_id: &str,
        display_name: &str,
        content: Bytes,
    ) -> Result<String, VectorIndexError>;
}

#[derive(Debug, Serialize)]
struct CreateCorpusBody {
    tenant_id: String,
}

#[derive(Debug, Deserialize)]
struct CorpusBody {
    corpus_id: String,
    location: String,
}

#[derive(Debug, Serialize)]
struct ImportBody {
    staged_pointer: String,
}

#[derive(Debug, Serialize)]
struct UploadBody {
    display_name: String,
    content_base64: String,
}

#[derive(Debug, Deserialize)]
struct DocumentBody {
    document_id: String,
}

/// JSON-over-HTTP client for the vector service with a per-request timeout.
pub struct HttpVectorIndexClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl HttpVectorIndexClient {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| AppError::Validation(format!("Invalid vector index url: {err}")))?;
        let http = reqwest::Client::builder().timeout(timeout).build()?;

        Ok(Self {
            http,
            base_url,
            api_key,
        })
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, VectorIndexError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| VectorIndexError::Rejected("vector index url cannot be a base".into()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> VectorIndexError {
    if err.is_timeout() || err.is_connect() {
        VectorIndexError::Transient(err.to_string())
    } else {
        VectorIndexError::Rejected(err.to_string())
    }
}

async fn classify_response(
    tenant_or_corpus: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, VectorIndexError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    if status == StatusCode::CONFLICT {
        return Err(VectorIndexError::AlreadyExists(tenant_or_corpus.to_string()));
    }
    if status.is_server_error() {
        return Err(VectorIndexError::Transient(format!("{status}: {body}")));
    }
    Err(VectorIndexError::Rejected(format!("{status}: {body}")))
}

#[async_trait]
impl VectorIndexClient for HttpVectorIndexClient {
    async fn find_corpus(
        &self,
        tenant_id: &str,
    ) -> Result<Option<CorpusHandle>, VectorIndexError> {
        let url = self.endpoint(&["corpora", tenant_id])?;
        let response = self
            .authorize(self.http.get(url))
            .send()
            .await
            .map_err(map_transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let body: CorpusBody = classify_response(tenant_id, response)
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        Ok(Some(CorpusHandle {
            tenant_id: tenant_id.to_string(),
            corpus_id: body.corpus_id,
            location: body.location,
        }))
    }

    async fn create_corpus(&self, tenant_id: &str) -> Result<CorpusHandle, VectorIndexError> {
        let url = self.endpoint(&["corpora"])?;
        let response = self
            .authorize(self.http.post(url))
            .json(&CreateCorpusBody {
                tenant_id: tenant_id.to_string(),
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: CorpusBody = classify_response(tenant_id, response)
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        Ok(CorpusHandle {
            tenant_id: tenant_id.to_string(),
            corpus_id: body.corpus_id,
            location: body.location,
        })
    }

    async fn import_staged(
        &self,
        corpus_id: &str,
        staged_pointer: &str,
    ) -> Result<String, VectorIndexError> {
        let url = self.endpoint(&["corpora", corpus_id, "documents", "import"])?;
        let response = self
            .authorize(self.http.post(url))
            .json(&ImportBody {
                staged_pointer: staged_pointer.to_string(),
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: DocumentBody = classify_response(corpus_id, response)
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        Ok(body.document_id)
    }

    async fn upload(
        &self,
        corpus_id: &str,
        display_name: &str,
        content: Bytes,
    ) -> Result<String, VectorIndexError> {
        let url = self.endpoint(&["corpora", corpus_id, "documents"])?;
        let encoded = base64::engine::general_purpose::STANDARD.encode(content);
        let response = self
            .authorize(self.http.post(url))
            .json(&UploadBody {
                display_name: display_name.to_string(),
                content_base64: encoded,
            })
            .send()
            .await
            .map_err(map_transport_error)?;

        let body: DocumentBody = classify_response(corpus_id, response)
            .await?
            .json()
            .await
            .map_err(map_transport_error)?;

        Ok(body.document_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification_only_covers_5xx_and_transport() {
        assert!(VectorIndexError::Transient("503".into()).is_transient());
        assert!(!VectorIndexError::Rejected("403 scope".into()).is_transient());
        assert!(!VectorIndexError::AlreadyExists("t1".into()).is_transient());
    }

    #[test]
    fn endpoints_are_joined_below_the_base() {
        let client = HttpVectorIndexClient::new(
            "http://localhost:6550/v1",
            None,
            Duration::from_secs(5),
        )
        .expect("client");

        let url = client
            .endpoint(&["corpora", "corpus-1", "documents"])
            .expect("endpoint");
        assert_eq!(
            url.as_str(),
            "http://localhost:6550/v1/corpora/corpus-1/documents"
        );
    }
}
