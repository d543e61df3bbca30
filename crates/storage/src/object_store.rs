//! Object storage access (S3 compatible).

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use eo_common::{AccessError, AccessResult};
use object_store::{aws::AmazonS3Builder, path::Path, ObjectStore};
use tracing::{debug, instrument};

use crate::context::S3Context;

/// Region used when none can be derived from the context.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Object storage client bound to one bucket.
#[derive(Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
    bucket: String,
}

impl std::fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ObjectStorage {
    /// Create a client for `bucket` from an access context.
    pub fn from_context(ctx: &S3Context, bucket: &str) -> AccessResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(bucket)
            .with_region(DEFAULT_REGION);

        if let Some(endpoint) = &ctx.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }

        match &ctx.credentials {
            Some(creds) => {
                builder = builder
                    .with_access_key_id(&creds.access_key_id)
                    .with_secret_access_key(&creds.secret_access_key);
                if let Some(token) = &creds.session_token {
                    builder = builder.with_token(token);
                }
            }
            None => builder = builder.with_skip_signature(true),
        }

        let store = builder.build().map_err(|e| {
            AccessError::Storage(format!("Failed to create S3 client for {}: {}", bucket, e))
        })?;

        Ok(Self {
            store: Arc::new(store),
            bucket: bucket.to_string(),
        })
    }

    /// Wrap an existing store.
    pub fn from_store(store: Arc<dyn ObjectStore>, bucket: impl Into<String>) -> Self {
        Self {
            store,
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Read the whole object at a key.
    #[instrument(skip(self), fields(bucket = %self.bucket, path = %path))]
    pub async fn get(&self, path: &str) -> AccessResult<Bytes> {
        let location = Path::from(path);

        let result = self.store.get(&location).await.map_err(|e| match e {
            object_store::Error::NotFound { .. } => AccessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("s3://{}/{} not found", self.bucket, path),
            )),
            e => AccessError::Storage(format!("Failed to read {}: {}", path, e)),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| AccessError::Storage(format!("Failed to read bytes: {}", e)))?;

        debug!(size = bytes.len(), "Read object");
        Ok(bytes)
    }

    /// List keys under a prefix.
    pub async fn list(&self, prefix: &str) -> AccessResult<Vec<String>> {
        use futures::TryStreamExt;

        let prefix_path = Path::from(prefix);
        let mut paths = Vec::new();

        let mut stream = self.store.list(Some(&prefix_path));
        while let Some(meta) = stream
            .try_next()
            .await
            .map_err(|e| AccessError::Storage(format!("List failed: {}", e)))?
        {
            paths.push(meta.location.to_string());
        }

        paths.sort();
        Ok(paths)
    }
}

/// Hands out object storage clients per bucket.
pub trait StoreProvider: Send + Sync {
    fn store(&self, ctx: &S3Context, bucket: &str) -> AccessResult<ObjectStorage>;
}

/// Builds S3 clients from the access context.
#[derive(Debug, Default, Clone, Copy)]
pub struct S3StoreProvider;

impl StoreProvider for S3StoreProvider {
    fn store(&self, ctx: &S3Context, bucket: &str) -> AccessResult<ObjectStorage> {
        ObjectStorage::from_context(ctx, bucket)
    }
}

/// Serves pre-registered stores, e.g. in-memory buckets or mirrors.
#[derive(Default, Clone)]
pub struct StaticStoreProvider {
    stores: HashMap<String, Arc<dyn ObjectStore>>,
}

impl StaticStoreProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(mut self, bucket: impl Into<String>, store: Arc<dyn ObjectStore>) -> Self {
        self.stores.insert(bucket.into(), store);
        self
    }
}

impl StoreProvider for StaticStoreProvider {
    fn store(&self, _ctx: &S3Context, bucket: &str) -> AccessResult<ObjectStorage> {
        self.stores
            .get(bucket)
            .map(|store| ObjectStorage::from_store(store.clone(), bucket))
            .ok_or_else(|| AccessError::Storage(format!("No store registered for bucket {}", bucket)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_in_memory_get_and_list() {
        let store = Arc::new(InMemory::new());
        for (key, data) in [
            ("tiles/31/B01.jp2", b"a"),
            ("tiles/31/B02.jp2", b"b"),
            ("other/B03.jp2", b"c"),
        ] {
            store
                .put(&Path::from(key), Bytes::from_static(data).into())
                .await
                .unwrap();
        }
        let storage = ObjectStorage::from_store(store, "bucket");

        assert_eq!(storage.get("tiles/31/B02.jp2").await.unwrap(), Bytes::from_static(b"b"));
        assert_eq!(
            storage.list("tiles").await.unwrap(),
            vec!["tiles/31/B01.jp2", "tiles/31/B02.jp2"]
        );
    }

    #[tokio::test]
    async fn test_missing_object_is_io_not_found() {
        let storage = ObjectStorage::from_store(Arc::new(InMemory::new()), "bucket");
        let err = storage.get("nope").await.unwrap_err();
        assert!(matches!(err, AccessError::Io(_)));
    }

    #[test]
    fn test_static_provider_unknown_bucket() {
        let provider = StaticStoreProvider::new();
        assert!(provider.store(&S3Context::default(), "x").is_err());
    }
}
