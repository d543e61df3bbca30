//! Interfaces of the collaborators the access pipeline depends on.
//!
//! Authentication and download transport live outside this workspace;
//! callers plug their implementations in through these traits.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::AccessResult;
use crate::product::Product;

/// Temporary object-storage credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile_name: Option<String>,
}

impl std::fmt::Debug for AwsCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AwsCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"***")
            .field("session_token", &self.session_token.as_ref().map(|_| "***"))
            .field("profile_name", &self.profile_name)
            .finish()
    }
}

/// Credentials returned by an authenticator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Credentials {
    /// Object-storage key pair
    Aws(AwsCredentials),
    /// HTTP headers added to every request
    Headers(BTreeMap<String, String>),
    /// Query-string parameters appended to every URL
    QueryString(BTreeMap<String, String>),
}

/// Derives credentials and orders offline products.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Obtain credentials, or `None` for anonymous access.
    async fn authenticate(&self) -> AccessResult<Option<Credentials>>;

    /// Ask the provider to stage an offline product.
    ///
    /// `wait` is the delay between two status checks, `timeout` the maximum
    /// time spent waiting.
    async fn order(
        &self,
        _product: &Product,
        _credentials: Option<&Credentials>,
        _wait: Duration,
        _timeout: Duration,
    ) -> AccessResult<()> {
        Ok(())
    }
}

/// Parameters of one download.
#[derive(Debug, Clone, PartialEq)]
pub struct DownloadRequest {
    /// Restrict the download to one asset
    pub asset_key: Option<String>,
    /// Delay between two order status checks
    pub wait: Duration,
    /// Maximum time spent waiting for an order
    pub timeout: Duration,
    /// Extract archives after download
    pub extract: bool,
}

/// Materializes a product on the local filesystem.
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Download the product (or one of its assets) and return the local path.
    async fn download(&self, product: &Product, request: DownloadRequest) -> AccessResult<PathBuf>;
}
