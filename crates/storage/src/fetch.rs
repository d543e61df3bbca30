//! Byte backends behind access handles.

use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eo_common::{AccessError, AccessResult, PhysicalAddress, Scheme};
use reqwest::Client;
use tracing::{debug, info, instrument};

use crate::context::{AccessContext, HttpContext, S3Context};
use crate::object_store::{S3StoreProvider, StoreProvider};

/// Response headers relevant to format guessing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteMetadata {
    pub content_disposition: Option<String>,
    pub content_type: Option<String>,
}

/// Reads the bytes of remote addresses.
#[derive(Clone)]
pub struct DataFetcher {
    stores: Arc<dyn StoreProvider>,
    http: Client,
}

impl std::fmt::Debug for DataFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataFetcher").finish_non_exhaustive()
    }
}

impl Default for DataFetcher {
    fn default() -> Self {
        Self::new(Arc::new(S3StoreProvider))
    }
}

impl DataFetcher {
    pub fn new(stores: Arc<dyn StoreProvider>) -> Self {
        Self {
            stores,
            http: Client::builder()
                .timeout(Duration::from_secs(300))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Read the full content of `address`.
    #[instrument(skip(self, context), fields(address = %address))]
    pub async fn fetch(&self, address: &PhysicalAddress, context: &AccessContext) -> AccessResult<Bytes> {
        let address = address.without_nested_prefix();
        match address.scheme() {
            Scheme::File => {
                let path = address.local_path().unwrap_or_default();
                Ok(Bytes::from(tokio::fs::read(&path).await?))
            }
            Scheme::S3 => {
                let ctx = s3_context(context, &address)?;
                self.stores.store(&ctx, &ctx.bucket)?.get(&ctx.prefix).await
            }
            Scheme::ZipS3 => {
                let ctx = s3_context(context, &address)?;
                let member = address.archive_member().map(str::to_string).ok_or_else(|| {
                    AccessError::Storage(format!("No archive member in {}", address))
                })?;
                let archive = self.stores.store(&ctx, &ctx.bucket)?.get(&ctx.prefix).await?;
                extract_member(archive, member).await
            }
            Scheme::Http | Scheme::Https => {
                let default = HttpContext::default();
                let ctx = context.as_http().unwrap_or(&default);
                self.fetch_http(address.as_str(), ctx).await
            }
            Scheme::Other(scheme) => Err(AccessError::UnsupportedAddressScheme {
                product: address.to_string(),
                scheme,
            }),
        }
    }

    /// List object keys under `prefix` in `bucket`.
    pub async fn list(&self, context: &S3Context, bucket: &str, prefix: &str) -> AccessResult<Vec<String>> {
        self.stores.store(context, bucket)?.list(prefix).await
    }

    /// Issue a HEAD request and return the headers used for format guessing.
    #[instrument(skip(self, context), fields(url = %url))]
    pub async fn head(&self, url: &str, context: &HttpContext) -> AccessResult<RemoteMetadata> {
        let response = self
            .request(self.http.head(url), context)
            .send()
            .await
            .map_err(|e| AccessError::Storage(format!("HEAD {} failed: {}", url, e)))?;

        let header = |name: reqwest::header::HeaderName| {
            response
                .headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        Ok(RemoteMetadata {
            content_disposition: header(reqwest::header::CONTENT_DISPOSITION),
            content_type: header(reqwest::header::CONTENT_TYPE),
        })
    }

    async fn fetch_http(&self, url: &str, context: &HttpContext) -> AccessResult<Bytes> {
        debug!(url = %url, "Downloading file");
        let response = self
            .request(self.http.get(url), context)
            .send()
            .await
            .map_err(|e| AccessError::Storage(format!("GET {} failed: {}", url, e)))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(AccessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{} not found", url),
            )));
        }
        if !status.is_success() {
            return Err(AccessError::Storage(format!("GET {} returned {}", url, status)));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| AccessError::Storage(format!("Reading {} failed: {}", url, e)))?;
        info!(size = bytes.len(), url = %url, "Downloaded file");
        Ok(bytes)
    }

    fn request(&self, builder: reqwest::RequestBuilder, context: &HttpContext) -> reqwest::RequestBuilder {
        let mut builder = builder;
        for (name, value) in &context.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !context.query.is_empty() {
            builder = builder.query(&context.query);
        }
        builder
    }
}

fn s3_context(context: &AccessContext, address: &PhysicalAddress) -> AccessResult<S3Context> {
    match context.as_s3() {
        Some(ctx) => Ok(ctx.clone()),
        None => {
            // Anonymous access derived from the address itself.
            let (bucket, prefix) = address.bucket_and_prefix().ok_or_else(|| {
                AccessError::Storage(format!("Cannot derive bucket from {}", address))
            })?;
            Ok(S3Context {
                bucket,
                prefix,
                ..S3Context::default()
            })
        }
    }
}

/// Extract one member of a zip archive on a blocking worker.
pub async fn extract_member(archive: Bytes, member: String) -> AccessResult<Bytes> {
    tokio::task::spawn_blocking(move || -> AccessResult<Bytes> {
        let mut zip = zip::ZipArchive::new(std::io::Cursor::new(archive))
            .map_err(|e| AccessError::Storage(format!("Invalid zip archive: {}", e)))?;
        let mut file = zip.by_name(&member).map_err(|e| {
            AccessError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("Archive member {}: {}", member, e),
            ))
        })?;
        let mut out = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut out)?;
        debug!(member = %member, size = out.len(), "Extracted archive member");
        Ok(Bytes::from(out))
    })
    .await
    .map_err(|e| AccessError::Storage(format!("Extraction task failed: {}", e)))?
}
