//! Storage module for S3-compatible archive and local file operations

pub mod archive;
pub mod encryption;
pub mod secure;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{Error, Result};

/// Metadata for a stored object, used to verify uploads before the source
/// audio is deleted.
#[derive(Debug, Clone)]
pub struct ObjectMetadata {
    pub key: String,
    pub size_bytes: u64,
}

/// Storage trait for different backends
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()>;
    async fn download(&self, key: &str) -> Result<Vec<u8>>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>>;
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
    async fn health_check(&self) -> Result<HealthStatus>;

    /// Generate a presigned URL for temporary public access to an object
    ///
    /// This is how the ASR provider fetches audio: the object stays private
    /// and the URL expires after the transcription window.
    async fn get_presigned_url(&self, key: &str, expires_in: Duration) -> Result<String>;
}

/// Main storage interface
#[derive(Clone)]
pub struct Storage {
    backend: Arc<dyn StorageBackend>,
}

impl Storage {
    /// Create S3-compatible storage from environment configuration
    pub async fn s3_from_env() -> Result<Self> {
        let config = S3Config::from_env()?;
        Ok(Self {
            backend: Arc::new(S3Storage::new(config).await?),
        })
    }

    /// Create local file storage (development and tests)
    pub fn local(path: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            backend: Arc::new(LocalStorage::new(path.into())),
        })
    }

    pub async fn initialize(&self) -> Result<()> {
        self.backend.initialize().await
    }

    pub async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.backend.upload(key, data).await
    }

    pub async fn download(&self, key: &str) -> Result<Vec<u8>> {
        self.backend.download(key).await
    }

    pub async fn delete(&self, key: &str) -> Result<()> {
        self.backend.delete(key).await
    }

    pub async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        self.backend.metadata(key).await
    }

    pub async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        self.backend.list(prefix).await
    }

    pub async fn health_check(&self) -> Result<HealthStatus> {
        self.backend.health_check().await
    }

    pub async fn get_presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        self.backend.get_presigned_url(key, expires_in).await
    }

    /// Upload JSON object
    pub async fn upload_json<T: Serialize>(&self, key: &str, data: &T) -> Result<()> {
        let json_bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| Error::Other(format!("Failed to serialize JSON: {}", e)))?;
        self.upload(key, json_bytes).await
    }
}

/// S3 storage configuration
#[derive(Debug, Clone)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub bucket: String,
    pub prefix: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: String,
}

impl S3Config {
    /// Load S3 configuration from environment variables
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            endpoint: std::env::var("S3_ENDPOINT").ok(),
            bucket: std::env::var("S3_BUCKET")
                .map_err(|_| Error::Configuration("S3_BUCKET not set".into()))?,
            prefix: std::env::var("S3_PREFIX").unwrap_or_default(),
            access_key: std::env::var("S3_ACCESS_KEY").ok(),
            secret_key: std::env::var("S3_SECRET_KEY").ok(),
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string()),
        })
    }
}

/// S3-compatible storage backend (AWS S3, MinIO, etc.)
pub struct S3Storage {
    client: aws_sdk_s3::Client,
    bucket: String,
    prefix: String,
}

impl S3Storage {
    pub async fn new(config: S3Config) -> Result<Self> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(config.region.clone()));

        if let Some(endpoint_url) = &config.endpoint {
            config_loader = config_loader.endpoint_url(endpoint_url);
        }

        if let (Some(access_key), Some(secret_key)) = (&config.access_key, &config.secret_key) {
            let creds = aws_sdk_s3::config::Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "manual",
            );
            config_loader = config_loader.credentials_provider(creds);
        }

        let aws_config = config_loader.load().await;

        // Path-style addressing for non-AWS endpoints
        let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
            .force_path_style(true)
            .build();

        let client = aws_sdk_s3::Client::from_conf(s3_config);

        Ok(Self {
            client,
            bucket: config.bucket,
            prefix: config.prefix,
        })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix.trim_end_matches('/'), key)
        }
    }
}

#[async_trait]
impl StorageBackend for S3Storage {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .body(data.into())
            .send()
            .await
            .map_err(|e| Error::S3(e.to_string()))?;

        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::S3(e.to_string()))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| Error::S3(e.to_string()))?
            .into_bytes();

        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
            .map_err(|e| Error::S3(e.to_string()))?;

        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .send()
            .await
        {
            Ok(head) => Ok(Some(ObjectMetadata {
                key: key.to_string(),
                size_bytes: head.content_length().unwrap_or(0).max(0) as u64,
            })),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(None)
                } else {
                    Err(Error::S3(service_error.to_string()))
                }
            }
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(self.full_key(prefix))
            .send()
            .await
            .map_err(|e| Error::S3(e.to_string()))?;

        let keys = response
            .contents()
            .iter()
            .filter_map(|obj| obj.key())
            .map(|k| k.to_string())
            .collect();

        Ok(keys)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match self
            .client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
        {
            Ok(_) => Ok(HealthStatus {
                is_healthy: true,
                message: format!("S3 bucket '{}' accessible", self.bucket),
            }),
            Err(e) => Ok(HealthStatus {
                is_healthy: false,
                message: format!("S3 error: {e}"),
            }),
        }
    }

    async fn get_presigned_url(&self, key: &str, expires_in: Duration) -> Result<String> {
        let presigning_config = aws_sdk_s3::presigning::PresigningConfig::expires_in(expires_in)
            .map_err(|e| Error::S3(format!("Failed to create presigning config: {}", e)))?;

        let presigned_request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(self.full_key(key))
            .presigned(presigning_config)
            .await
            .map_err(|e| Error::S3(format!("Failed to generate presigned URL: {}", e)))?;

        Ok(presigned_request.uri().to_string())
    }
}

/// Local file storage backend
struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn initialize(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.base_path).await?;
        Ok(())
    }

    async fn upload(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let path = self.base_path.join(key);

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        tokio::fs::write(path, data).await?;
        Ok(())
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.base_path.join(key);
        Ok(tokio::fs::read(path).await?)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let path = self.base_path.join(key);
        tokio::fs::remove_file(path).await?;
        Ok(())
    }

    async fn metadata(&self, key: &str) -> Result<Option<ObjectMetadata>> {
        let path = self.base_path.join(key);
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(ObjectMetadata {
                key: key.to_string(),
                size_bytes: meta.len(),
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let prefix_path = self.base_path.join(prefix);
        let mut files = Vec::new();

        let mut dir = match tokio::fs::read_dir(&prefix_path).await {
            Ok(dir) => dir,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(files),
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                if let Some(name) = entry.file_name().to_str() {
                    files.push(format!("{prefix}/{name}"));
                }
            }
        }

        Ok(files)
    }

    async fn health_check(&self) -> Result<HealthStatus> {
        match tokio::fs::metadata(&self.base_path).await {
            Ok(metadata) if metadata.is_dir() => Ok(HealthStatus {
                is_healthy: true,
                message: format!("Local storage at {:?} is accessible", self.base_path),
            }),
            _ => Ok(HealthStatus {
                is_healthy: false,
                message: format!("Local storage at {:?} not accessible", self.base_path),
            }),
        }
    }

    async fn get_presigned_url(&self, key: &str, _expires_in: Duration) -> Result<String> {
        // Local storage has no URL surface; hand back a file:// URL so dev
        // setups running the ASR stub on the same host still work.
        let path = self.base_path.join(key);
        Ok(format!("file://{}", path.display()))
    }
}

/// Health status for storage
#[derive(Debug)]
pub struct HealthStatus {
    pub is_healthy: bool,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_storage_round_trip() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::local(temp_dir.path()).unwrap();

        storage.initialize().await.unwrap();

        let data = b"test data".to_vec();
        storage.upload("audio/test.mp3", data.clone()).await.unwrap();

        let downloaded = storage.download("audio/test.mp3").await.unwrap();
        assert_eq!(downloaded, data);

        let meta = storage.metadata("audio/test.mp3").await.unwrap().unwrap();
        assert_eq!(meta.size_bytes, data.len() as u64);

        storage.delete("audio/test.mp3").await.unwrap();
        assert!(storage.metadata("audio/test.mp3").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_storage_list() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::local(temp_dir.path()).unwrap();
        storage.initialize().await.unwrap();

        storage.upload("t/a.json", vec![1]).await.unwrap();
        storage.upload("t/b.json", vec![2]).await.unwrap();

        let files = storage.list("t").await.unwrap();
        assert_eq!(files.len(), 2);
    }

    #[tokio::test]
    async fn test_local_storage_missing_list_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::local(temp_dir.path()).unwrap();
        let files = storage.list("nope").await.unwrap();
        assert!(files.is_empty());
    }
}
