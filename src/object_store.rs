use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::StatusCode;

use crate::error::{GraphError, Result};

/// Where published chunks and manifests land. The coordinator only needs
/// put/get; listing and lifecycle stay with the storage provider.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()>;
    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>>;
}

/// Local-filesystem backend, the default for development and tests.
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsObjectStore { root: root.into() }
    }

    fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.split('/').any(|seg| seg == "..") {
            return Err(GraphError::Validation(format!(
                "object path {path:?} escapes the store root"
            )));
        }
        Ok(self.root.join(path))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&full, bytes).await?;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

/// S3-compatible HTTP backend (MinIO, R2, or a signing proxy in front of
/// S3 proper). Bucket-relative keys are appended to `endpoint/bucket/`.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
}

impl HttpObjectStore {
    pub fn new(endpoint: impl Into<String>, bucket: impl Into<String>) -> Self {
        HttpObjectStore {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            bucket: bucket.into(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.endpoint.trim_end_matches('/'),
            self.bucket,
            path
        )
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, path: &str, bytes: &[u8]) -> Result<()> {
        let response = self
            .client
            .put(self.url(path))
            .body(bytes.to_vec())
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(GraphError::Transient(format!(
                "object put {path}: {}",
                response.status()
            )));
        }
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(self.url(path)).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(GraphError::Transient(format!(
                "object get {path}: {}",
                response.status()
            )));
        }
        Ok(Some(response.bytes().await?.to_vec()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fs_store_round_trip() {
        let dir = std::env::temp_dir().join(format!("trellis-objstore-{}", ulid::Ulid::new()));
        let store = FsObjectStore::new(&dir);
        store
            .put("datasets/ns/chunks/abc.chunk", b"hello")
            .await
            .unwrap();
        let got = store.get("datasets/ns/chunks/abc.chunk").await.unwrap();
        assert_eq!(got.as_deref(), Some(&b"hello"[..]));
        assert!(store.get("datasets/ns/missing").await.unwrap().is_none());
        tokio::fs::remove_dir_all(&dir).await.ok();
    }

    #[tokio::test]
    async fn test_fs_store_rejects_traversal() {
        let store = FsObjectStore::new("/tmp/trellis-objstore-na");
        assert!(store.put("../escape", b"x").await.is_err());
    }
}
