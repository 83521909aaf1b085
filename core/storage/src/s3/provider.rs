//! Adapts [`S3Client`] to the generic [`StorageProvider`] interface so it
//! composes into the storage engine's cloud extension the same way the
//! local and in-memory providers do.

use async_trait::async_trait;
use chrono::Utc;

use vaulthalla_common::{Error, Result, VaultPath};

use crate::provider::{ByteStream, Metadata, StorageProvider};

use super::client::{S3Client, S3Credentials};

pub struct S3Provider {
    client: S3Client,
}

impl S3Provider {
    pub fn new(credentials: S3Credentials) -> Self {
        Self { client: S3Client::new(credentials) }
    }

    fn key_for(path: &VaultPath) -> String {
        path.to_string_path().trim_start_matches('/').to_string()
    }
}

#[async_trait]
impl StorageProvider for S3Provider {
    fn name(&self) -> &str {
        "s3"
    }

    async fn upload(&self, path: &VaultPath, data: Vec<u8>) -> Result<Metadata> {
        let key = Self::key_for(path);
        let size = data.len() as u64;
        self.client.put_object(&key, data).await?;
        Ok(Metadata {
            id: key.clone(),
            name: path.name().unwrap_or_default().to_string(),
            size: Some(size),
            is_directory: false,
            modified: Utc::now(),
            etag: None,
            provider_data: None,
        })
    }

    async fn upload_stream(&self, path: &VaultPath, stream: ByteStream) -> Result<Metadata> {
        use futures::StreamExt;
        let mut buf = Vec::new();
        let mut stream = stream;
        while let Some(chunk) = stream.next().await {
            buf.extend_from_slice(&chunk?);
        }
        self.upload(path, buf).await
    }

    async fn download(&self, path: &VaultPath) -> Result<Vec<u8>> {
        self.client.get_object(&Self::key_for(path)).await
    }

    async fn download_stream(&self, path: &VaultPath) -> Result<ByteStream> {
        let data = self.download(path).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(data) })))
    }

    async fn exists(&self, path: &VaultPath) -> Result<bool> {
        Ok(self.client.head_object(&Self::key_for(path)).await?.is_some())
    }

    async fn delete(&self, path: &VaultPath) -> Result<()> {
        self.client.delete_object(&Self::key_for(path)).await
    }

    async fn list(&self, path: &VaultPath) -> Result<Vec<Metadata>> {
        let prefix = Self::key_for(path);
        let objects = self.client.list_objects(&prefix).await?;
        Ok(objects
            .into_iter()
            .map(|obj| Metadata {
                name: obj.key.rsplit('/').next().unwrap_or(&obj.key).to_string(),
                id: obj.key,
                size: Some(obj.size),
                is_directory: false,
                modified: Utc::now(),
                etag: Some(obj.etag),
                provider_data: None,
            })
            .collect())
    }

    async fn metadata(&self, path: &VaultPath) -> Result<Metadata> {
        let key = Self::key_for(path);
        let headers = self
            .client
            .head_object(&key)
            .await?
            .ok_or_else(|| Error::NotFound(format!("S3 object not found: {key}")))?;
        let size = headers
            .get("content-length")
            .and_then(|v| v.parse::<u64>().ok());
        let etag = headers.get("etag").cloned();
        Ok(Metadata {
            id: key.clone(),
            name: path.name().unwrap_or_default().to_string(),
            size,
            is_directory: false,
            modified: Utc::now(),
            etag,
            provider_data: None,
        })
    }

    async fn create_dir(&self, path: &VaultPath) -> Result<Metadata> {
        // S3 has no directories; a zero-byte marker object stands in, as
        // the key-prefix convention below relies on at least one object
        // under the prefix to make the "directory" listable.
        let key = format!("{}/", Self::key_for(path));
        self.client.put_object(&key, Vec::new()).await?;
        Ok(Metadata {
            id: key,
            name: path.name().unwrap_or_default().to_string(),
            size: None,
            is_directory: true,
            modified: Utc::now(),
            etag: None,
            provider_data: None,
        })
    }

    async fn delete_dir(&self, path: &VaultPath) -> Result<()> {
        let prefix = Self::key_for(path);
        for obj in self.client.list_objects(&prefix).await? {
            self.client.delete_object(&obj.key).await?;
        }
        Ok(())
    }

    async fn rename(&self, from: &VaultPath, to: &VaultPath) -> Result<Metadata> {
        let data = self.download(from).await?;
        let metadata = self.upload(to, data).await?;
        self.delete(from).await?;
        Ok(metadata)
    }

    async fn copy(&self, from: &VaultPath, to: &VaultPath) -> Result<Metadata> {
        let data = self.download(from).await?;
        self.upload(to, data).await
    }
}
