//! HttpObjectStore - S3-compatible REST adapter
//!
//! Stores snapshot artifacts via plain PUT/GET/DELETE against a bucket URL.

use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;

use super::ObjectStore;

/// S3-compatible object store over HTTP
pub struct HttpObjectStore {
    client: reqwest::Client,
    /// Base URL including the bucket, e.g. `https://store.example.com/defendr-snapshots`
    bucket_url: String,
}

impl HttpObjectStore {
    /// Create a new store adapter for a bucket URL
    pub fn new(bucket_url: String) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, bucket_url }
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}", self.bucket_url.trim_end_matches('/'), key)
    }
}

#[async_trait]
impl ObjectStore for HttpObjectStore {
    async fn put(&self, key: &str, data: Vec<u8>) -> Result<()> {
        let url = self.object_url(key);
        let resp = self
            .client
            .put(&url)
            .header("Content-Type", "image/jpeg")
            .body(data)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("put {} failed: {}", key, e)))?;

        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "put {} returned {}",
                key,
                resp.status()
            )));
        }

        tracing::debug!(key = %key, "Object stored");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>> {
        let url = self.object_url(key);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("get {} failed: {}", key, e)))?;

        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(Error::NotFound(format!("object {}", key)));
        }
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "get {} returned {}",
                key,
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Storage(format!("get {} read failed: {}", key, e)))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let url = self.object_url(key);
        let resp = self
            .client
            .delete(&url)
            .send()
            .await
            .map_err(|e| Error::Storage(format!("delete {} failed: {}", key, e)))?;

        // Deleting an already-deleted object is idempotent
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!(key = %key, "Object already absent on delete");
            return Ok(());
        }
        if !resp.status().is_success() {
            return Err(Error::Storage(format!(
                "delete {} returned {}",
                key,
                resp.status()
            )));
        }

        tracing::debug!(key = %key, "Object deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_url_joins_key() {
        let store = HttpObjectStore::new("https://store.example.com/bucket/".to_string());
        assert_eq!(
            store.object_url("events/ev-1.jpg"),
            "https://store.example.com/bucket/events/ev-1.jpg"
        );
    }
}
