//! In-process doubles for the authentication and download collaborators.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use eo_common::{
    AccessError, AccessResult, Authenticator, Credentials, DownloadRequest, Downloader, Product,
};

/// Authenticator returning fixed credentials and counting orders.
#[derive(Debug, Default)]
pub struct MockAuthenticator {
    credentials: Option<Credentials>,
    fail: bool,
    authentications: AtomicUsize,
    orders: AtomicUsize,
}

impl MockAuthenticator {
    /// Anonymous access.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_credentials(credentials: Credentials) -> Self {
        Self {
            credentials: Some(credentials),
            ..Self::default()
        }
    }

    /// Every authentication attempt fails.
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn authentications(&self) -> usize {
        self.authentications.load(Ordering::SeqCst)
    }

    pub fn orders(&self) -> usize {
        self.orders.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Authenticator for MockAuthenticator {
    async fn authenticate(&self) -> AccessResult<Option<Credentials>> {
        self.authentications.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(AccessError::Authentication("invalid credentials".to_string()));
        }
        Ok(self.credentials.clone())
    }

    async fn order(
        &self,
        _product: &Product,
        _credentials: Option<&Credentials>,
        _wait: Duration,
        _timeout: Duration,
    ) -> AccessResult<()> {
        self.orders.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// Downloader returning a pre-populated local path.
#[derive(Debug)]
pub struct MockDownloader {
    target: PathBuf,
    fail: Option<String>,
    requests: Mutex<Vec<DownloadRequest>>,
}

impl MockDownloader {
    /// Every download "materializes" the product at `target`.
    pub fn returning(target: impl Into<PathBuf>) -> Self {
        Self {
            target: target.into(),
            fail: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Every download fails with `reason`.
    pub fn failing(reason: impl Into<String>) -> Self {
        Self {
            target: PathBuf::new(),
            fail: Some(reason.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.requests.lock().map(|r| r.len()).unwrap_or(0)
    }

    pub fn requests(&self) -> Vec<DownloadRequest> {
        self.requests.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Downloader for MockDownloader {
    async fn download(&self, _product: &Product, request: DownloadRequest) -> AccessResult<PathBuf> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push(request);
        }
        match &self.fail {
            Some(reason) => Err(AccessError::Download(reason.clone())),
            None => Ok(self.target.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_downloader_records_requests() {
        let downloader = MockDownloader::returning("/tmp/product");
        let product = Product::new("p", "https://host/p");
        let request = DownloadRequest {
            asset_key: Some("B01".to_string()),
            wait: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            extract: true,
        };
        let path = downloader.download(&product, request).await.unwrap();
        assert_eq!(path, PathBuf::from("/tmp/product"));
        assert_eq!(downloader.calls(), 1);
        assert_eq!(downloader.requests()[0].asset_key.as_deref(), Some("B01"));
    }

    #[tokio::test]
    async fn test_failing_authenticator() {
        let auth = MockAuthenticator::failing();
        assert!(auth.authenticate().await.is_err());
        assert_eq!(auth.authentications(), 1);
    }
}
