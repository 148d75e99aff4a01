use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::BoxStream;
use futures::TryStreamExt;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::{path::Path as ObjPath, ObjectStore};

use crate::utils::config::StorageKind;

pub type DynStore = Arc<dyn ObjectStore>;

/// Object storage handle used for both the immutable raw-file store and the
/// intermediate staging store. The backend is fixed at construction; data in
/// a memory backend lives as long as the manager.
#[derive(Clone)]
pub struct StorageManager {
    store: DynStore,
    backend_kind: StorageKind,
    local_base: Option<PathBuf>,
}

impl StorageManager {
    /// Create a manager from the configured backend kind, rooted at
    /// `base_dir` for the local backend.
    pub async fn from_kind(kind: StorageKind, base_dir: &str) -> object_store::Result<Self> {
        match kind {
            StorageKind::Local => Self::local(base_dir).await,
            StorageKind::Memory => Ok(Self::memory()),
        }
    }

    /// Filesystem-backed store rooted at `base_dir`; the directory is
    /// created when missing.
    pub async fn local(base_dir: &str) -> object_store::Result<Self> {
        let base = resolve_base_dir(base_dir);
        if !base.exists() {
            tokio::fs::create_dir_all(&base)
                .await
                .map_err(|e| object_store::Error::Generic {
                    store: "LocalFileSystem",
                    source: e.into(),
                })?;
            tracing::debug!(base = %base.display(), "Created local storage base directory");
        }
        let store = LocalFileSystem::new_with_prefix(base.clone())?;

        Ok(Self {
            store: Arc::new(store),
            backend_kind: StorageKind::Local,
            local_base: Some(base),
        })
    }

    /// Process-local store; data lives as long as the manager. Used in
    /// tests and for throwaway staging setups.
    pub fn memory() -> Self {
        Self {
            store: Arc::new(InMemory::new()),
            backend_kind: StorageKind::Memory,
            local_base: None,
        }
    }

    /// Create a manager over a custom backend, for injecting a specific
    /// store in tests.
    pub fn with_backend(store: DynStore, backend_kind: StorageKind) -> Self {
        Self {
            store,
            backend_kind,
            local_base: None,
        }
    }

    pub fn backend_kind(&self) -> &StorageKind {
        &self.backend_kind
    }

    /// Access the resolved local base directory when using the local backend.
    pub fn local_base_path(&self) -> Option<&Path> {
        self.local_base.as_deref()
    }

    /// Store bytes at the specified location.
    pub async fn put(&self, location: &str, data: Bytes) -> object_store::Result<()> {
        let path = ObjPath::from(location);
        let payload = object_store::PutPayload::from_bytes(data);
        self.store.put(&path, payload).await.map(|_| ())
    }

    /// Retrieve the full contents at the specified location, buffered in
    /// memory.
    pub async fn get(&self, location: &str) -> object_store::Result<Bytes> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        result.bytes().await
    }

    /// Get a streaming handle for large objects.
    pub async fn get_stream(
        &self,
        location: &str,
    ) -> object_store::Result<BoxStream<'static, object_store::Result<Bytes>>> {
        let path = ObjPath::from(location);
        let result = self.store.get(&path).await?;
        Ok(result.into_stream())
    }

    /// List all objects below the specified prefix.
    pub async fn list(
        &self,
        prefix: Option<&str>,
    ) -> object_store::Result<Vec<object_store::ObjectMeta>> {
        let prefix_path = prefix.map(ObjPath::from);
        self.store.list(prefix_path.as_ref()).try_collect().await
    }

    /// Check if an object exists at the specified location.
    pub async fn exists(&self, location: &str) -> object_store::Result<bool> {
        let path = ObjPath::from(location);
        self.store
            .head(&path)
            .await
            .map(|_| true)
            .or_else(|e| match e {
                object_store::Error::NotFound { .. } => Ok(false),
                _ => Err(e),
            })
    }
}

/// Resolve the absolute base directory for local storage. A relative
/// directory is resolved against the current working directory.
pub fn resolve_base_dir(base_dir: &str) -> PathBuf {
    let path = Path::new(base_dir);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(path)
    }
}

/// Reject object locations that escape the store root (absolute paths or
/// parent traversals).
pub fn is_safe_location(location: &str) -> bool {
    let relative = Path::new(location);
    !relative.is_absolute()
        && !relative
            .components()
            .any(|component| matches!(component, Component::ParentDir | Component::Prefix(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use uuid::Uuid;

    #[tokio::test]
    async fn memory_backend_basic_operations() {
        let storage = StorageManager::memory();
        assert!(storage.local_base_path().is_none());

        let location = "tenants/t1/report.pdf";
        let data = b"raw document bytes";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        assert!(storage.exists(location).await.expect("exists check"));
        assert!(!storage
            .exists("tenants/t1/missing.pdf")
            .await
            .expect("exists check for absent object"));
    }

    #[tokio::test]
    async fn local_backend_round_trip() {
        let base = format!("/tmp/ingest_storage_test_{}", Uuid::new_v4());
        let storage = StorageManager::local(&base)
            .await
            .expect("create storage manager");
        let resolved_base = storage
            .local_base_path()
            .expect("resolved base dir")
            .to_path_buf();
        assert_eq!(resolved_base, PathBuf::from(&base));

        let location = "staging/t1/report.pdf";
        let data = b"staged copy";

        storage
            .put(location, Bytes::from(data.to_vec()))
            .await
            .expect("put");
        let retrieved = storage.get(location).await.expect("get");
        assert_eq!(retrieved.as_ref(), data);

        let _ = tokio::fs::remove_dir_all(&base).await;
    }

    #[tokio::test]
    async fn list_respects_prefix() {
        let storage = StorageManager::memory();

        for (location, data) in [
            ("staging/t1/a.txt", b"one" as &[u8]),
            ("staging/t1/b.txt", b"two"),
            ("staging/t2/c.txt", b"three"),
        ] {
            storage
                .put(location, Bytes::from(data.to_vec()))
                .await
                .expect("put");
        }

        let t1 = storage.list(Some("staging/t1/")).await.expect("list t1");
        assert_eq!(t1.len(), 2);

        let all = storage.list(None).await.expect("list all");
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn stream_reads_full_object() {
        let storage = StorageManager::memory();

        let location = "stream/blob.bin";
        let content = vec![42u8; 1024 * 64];
        storage
            .put(location, Bytes::from(content.clone()))
            .await
            .expect("put large object");

        let mut stream = storage.get_stream(location).await.expect("get stream");
        let mut collected = Vec::new();
        while let Some(chunk) = stream.next().await {
            collected.extend_from_slice(&chunk.expect("stream chunk"));
        }

        assert_eq!(collected, content);
    }

    #[test]
    fn unsafe_locations_are_rejected() {
        assert!(is_safe_location("staging/t1/file.pdf"));
        assert!(!is_safe_location("/etc/passwd"));
        assert!(!is_safe_location("../outside.txt"));
    }
}
