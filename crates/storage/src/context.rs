//! Per-address access contexts: credentials, endpoints and request options.

use std::collections::BTreeMap;
use std::sync::Arc;

use eo_common::{Authenticator, AwsCredentials, Credentials, PhysicalAddress, Scheme};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

/// Default user agent sent with every HTTP request.
pub const DEFAULT_USER_AGENT: &str = concat!("eo-cube/", env!("CARGO_PKG_VERSION"));

/// Options needed to reach an object-storage address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct S3Context {
    pub bucket: String,
    /// Object key (or key prefix) inside the bucket
    pub prefix: String,
    pub credentials: Option<AwsCredentials>,
    /// Non-default endpoint URL, scheme included
    pub endpoint: Option<String>,
    /// Environment variables for engines reading object storage directly
    pub env: BTreeMap<String, String>,
}

/// Options needed to reach an http(s) address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpContext {
    pub headers: BTreeMap<String, String>,
    /// Query-string parameters appended to the URL
    pub query: BTreeMap<String, String>,
}

/// Access options for one physical address.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccessContext {
    /// Local file or unknown scheme
    #[default]
    None,
    S3(S3Context),
    Http(HttpContext),
}

impl AccessContext {
    pub fn is_none(&self) -> bool {
        matches!(self, AccessContext::None)
    }

    pub fn as_s3(&self) -> Option<&S3Context> {
        match self {
            AccessContext::S3(ctx) => Some(ctx),
            _ => None,
        }
    }

    pub fn as_http(&self) -> Option<&HttpContext> {
        match self {
            AccessContext::Http(ctx) => Some(ctx),
            _ => None,
        }
    }
}

/// Builds the access context of an address from configuration and the
/// product's authenticator.
#[derive(Clone)]
pub struct StorageContextBuilder {
    authenticator: Option<Arc<dyn Authenticator>>,
    s3_endpoint: Option<String>,
    user_agent: String,
}

impl Default for StorageContextBuilder {
    fn default() -> Self {
        Self {
            authenticator: None,
            s3_endpoint: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl std::fmt::Debug for StorageContextBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageContextBuilder")
            .field("authenticator", &self.authenticator.is_some())
            .field("s3_endpoint", &self.s3_endpoint)
            .field("user_agent", &self.user_agent)
            .finish()
    }
}

impl StorageContextBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    /// Use a non-default object-storage endpoint (e.g. `https://s3.example.com`).
    pub fn with_s3_endpoint(mut self, endpoint: Option<String>) -> Self {
        self.s3_endpoint = endpoint.filter(|e| !e.is_empty());
        self
    }

    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn authenticator(&self) -> Option<&Arc<dyn Authenticator>> {
        self.authenticator.as_ref()
    }

    /// Obtain credentials; failures are logged and treated as anonymous access.
    pub async fn credentials(&self) -> Option<Credentials> {
        let authenticator = self.authenticator.as_ref()?;
        match authenticator.authenticate().await {
            Ok(credentials) => credentials,
            Err(e) => {
                warn!(error = %e, "Authentication failed, continuing without credentials");
                None
            }
        }
    }

    /// Build the access context of `address`. Never fails.
    #[instrument(skip(self), fields(address = %address))]
    pub async fn build_context(&self, address: &PhysicalAddress) -> AccessContext {
        let scheme = address.without_nested_prefix().scheme();
        match scheme {
            Scheme::S3 | Scheme::ZipS3 => AccessContext::S3(self.s3_context(address).await),
            Scheme::Http | Scheme::Https => AccessContext::Http(self.http_context().await),
            Scheme::File | Scheme::Other(_) => AccessContext::None,
        }
    }

    async fn s3_context(&self, address: &PhysicalAddress) -> S3Context {
        let (bucket, prefix) = address.bucket_and_prefix().unwrap_or_default();

        let credentials = match self.credentials().await {
            Some(Credentials::Aws(creds)) => Some(creds),
            Some(_) => {
                debug!("Ignoring non object-storage credentials for S3 address");
                None
            }
            None => None,
        };

        let mut env = BTreeMap::new();
        if let Some(endpoint) = &self.s3_endpoint {
            let host = endpoint
                .split_once("://")
                .map(|(_, rest)| rest)
                .unwrap_or(endpoint)
                .trim_end_matches('/');
            env.insert("AWS_S3_ENDPOINT".to_string(), host.to_string());
            env.insert("AWS_HTTPS".to_string(), "YES".to_string());
            env.insert("AWS_VIRTUAL_HOSTING".to_string(), "FALSE".to_string());
        }

        S3Context {
            bucket,
            prefix,
            credentials,
            endpoint: self.s3_endpoint.clone(),
            env,
        }
    }

    async fn http_context(&self) -> HttpContext {
        let mut context = HttpContext::default();
        context
            .headers
            .insert("User-Agent".to_string(), self.user_agent.clone());

        match self.credentials().await {
            Some(Credentials::Headers(headers)) => context.headers.extend(headers),
            Some(Credentials::QueryString(query)) => context.query.extend(query),
            Some(Credentials::Aws(_)) => {
                debug!("Ignoring object-storage credentials for HTTP address");
            }
            None => {}
        }
        context
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_file_context_is_empty() {
        let builder = StorageContextBuilder::new();
        let ctx = builder
            .build_context(&PhysicalAddress::new("/data/B01.jp2"))
            .await;
        assert!(ctx.is_none());
    }

    #[tokio::test]
    async fn test_unknown_scheme_context_is_empty() {
        let builder = StorageContextBuilder::new();
        let ctx = builder
            .build_context(&PhysicalAddress::new("ftp://host/x.tif"))
            .await;
        assert_eq!(ctx, AccessContext::None);
    }

    #[tokio::test]
    async fn test_http_context_has_user_agent() {
        let builder = StorageContextBuilder::new().with_user_agent("tester/1.0");
        let ctx = builder
            .build_context(&PhysicalAddress::new("https://host/x.tif"))
            .await;
        let http = ctx.as_http().unwrap();
        assert_eq!(http.headers.get("User-Agent").map(String::as_str), Some("tester/1.0"));
        assert!(http.query.is_empty());
    }

    #[tokio::test]
    async fn test_s3_endpoint_env() {
        let builder = StorageContextBuilder::new()
            .with_s3_endpoint(Some("https://s3.example.com/".to_string()));
        let ctx = builder
            .build_context(&PhysicalAddress::new("zip+s3://bucket/a/p.zip!B01.jp2"))
            .await;
        let s3 = ctx.as_s3().unwrap();
        assert_eq!(s3.bucket, "bucket");
        assert_eq!(s3.prefix, "a/p.zip");
        assert_eq!(s3.env.get("AWS_S3_ENDPOINT").map(String::as_str), Some("s3.example.com"));
        assert_eq!(s3.env.get("AWS_VIRTUAL_HOSTING").map(String::as_str), Some("FALSE"));
        assert!(s3.credentials.is_none());
    }
}
