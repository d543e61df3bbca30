//! Single-resource retrieval with a download-and-scan fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use eo_common::{AccessError, AccessResult, DownloadRequest, Downloader, PhysicalAddress, Product};
use storage::{AccessHandle, DataFetcher, StorageContextBuilder};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cascade::{EngineCascadeOpener, OpenOptions, OpenedDataset};
use crate::collection::DatasetCollection;
use crate::drivers::AddressResolver;
use crate::scanner::FilesystemScanner;

/// Key of the single dataset opened without an asset key.
pub const DEFAULT_DATA_KEY: &str = "data";

/// Download parameters passed to the downloader and to orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSettings {
    pub wait: Duration,
    pub timeout: Duration,
    pub extract: bool,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(2 * 60),
            timeout: Duration::from_secs(20 * 60),
            extract: true,
        }
    }
}

/// Opens one resource directly, then from a local copy when that fails.
#[derive(Clone)]
pub struct DownloadFallbackOrchestrator {
    resolver: Arc<AddressResolver>,
    contexts: Arc<StorageContextBuilder>,
    fetcher: Arc<DataFetcher>,
    opener: Arc<EngineCascadeOpener>,
    scanner: Arc<dyn FilesystemScanner>,
    downloader: Option<Arc<dyn Downloader>>,
    settings: DownloadSettings,
}

impl std::fmt::Debug for DownloadFallbackOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadFallbackOrchestrator")
            .field("downloader", &self.downloader.is_some())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl DownloadFallbackOrchestrator {
    pub fn new(
        resolver: Arc<AddressResolver>,
        contexts: Arc<StorageContextBuilder>,
        fetcher: Arc<DataFetcher>,
        opener: Arc<EngineCascadeOpener>,
        scanner: Arc<dyn FilesystemScanner>,
    ) -> Self {
        Self {
            resolver,
            contexts,
            fetcher,
            opener,
            scanner,
            downloader: None,
            settings: DownloadSettings::default(),
        }
    }

    pub fn with_downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    pub fn with_settings(mut self, settings: DownloadSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Open the product (or one of its assets) as a one-entry collection,
    /// falling back to a downloaded copy when direct access fails.
    #[instrument(skip(self, product, options, cancel), fields(product = %product.id))]
    pub async fn open_single(
        &self,
        product: &Product,
        asset_key: Option<&str>,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> AccessResult<DatasetCollection> {
        if let Some(key) = asset_key {
            if !product.assets.contains_key(key) {
                return Err(AccessError::dataset_creation(
                    product.to_string(),
                    format!("{} not found in {} assets", key, product),
                ));
            }
        }

        let direct_error = match self.open_direct(product, asset_key, options, cancel).await {
            Ok(opened) => {
                let mut collection = DatasetCollection::new();
                let key = asset_key.unwrap_or(DEFAULT_DATA_KEY);
                collection.insert(key, opened.dataset, opened.handle);
                collection.set_attrs(&product.properties);
                return Ok(collection);
            }
            Err(e) if e.triggers_download_fallback() => e,
            Err(e) => return Err(e),
        };
        debug!(
            asset = asset_key.unwrap_or_default(),
            error = %direct_error,
            "Direct access failed"
        );

        let Some(downloader) = &self.downloader else {
            return Err(AccessError::dataset_creation_from(
                product.to_string(),
                "direct access failed and no downloader is configured",
                direct_error,
            ));
        };

        warn!(asset = asset_key.unwrap_or_default(), "Falling back to download");
        let request = DownloadRequest {
            asset_key: asset_key.map(str::to_string),
            wait: self.settings.wait,
            timeout: self.settings.timeout,
            extract: self.settings.extract,
        };
        let downloaded = tokio::select! {
            _ = cancel.cancelled() => return Err(AccessError::Cancelled),
            downloaded = downloader.download(product, request) => downloaded,
        };
        let downloaded = downloaded.map_err(|e| {
            AccessError::dataset_creation_from(product.to_string(), "download failed", e)
        })?;

        let root = match asset_key {
            Some(key) => self.locate_asset_file(product, key, &downloaded).await,
            None => downloaded,
        };

        let mut collection = self.open_local_tree(product, &root, options, cancel).await?;
        if collection.is_empty() {
            let reason = match asset_key {
                Some(key) => format!("could not build a local dataset collection for {}", key),
                None => "could not build a local dataset collection".to_string(),
            };
            return Err(AccessError::dataset_creation(product.to_string(), reason));
        }
        collection.set_attrs(&product.properties);
        collection.sort();
        info!(datasets = collection.len(), root = %root.display(), "Opened local copy");
        Ok(collection)
    }

    async fn open_direct(
        &self,
        product: &Product,
        asset_key: Option<&str>,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> AccessResult<OpenedDataset> {
        if product.is_offline() {
            if let Some(authenticator) = self.contexts.authenticator() {
                let credentials = self.contexts.credentials().await;
                debug!("Ordering offline product");
                tokio::select! {
                    _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                    ordered = authenticator.order(
                        product,
                        credentials.as_ref(),
                        self.settings.wait,
                        self.settings.timeout,
                    ) => ordered?,
                }
            }
        }

        let address = match asset_key {
            Some(key) => self.resolver.resolve_asset(product, key)?,
            None => PhysicalAddress::new(product.location.clone()),
        };
        let context = self.contexts.build_context(&address).await;
        let handle = AccessHandle::open(address, context, self.fetcher.clone()).await?;
        self.opener.open(handle, options, cancel).await
    }

    /// File named like the asset href under `downloaded`, or `downloaded`
    /// itself when there is none.
    async fn locate_asset_file(&self, product: &Product, key: &str, downloaded: &Path) -> PathBuf {
        let Some(basename) = product.assets.get(key).and_then(|a| a.href_basename()) else {
            return downloaded.to_path_buf();
        };
        let found = self
            .scan(downloaded)
            .await
            .into_iter()
            .find(|path| path.file_name().and_then(|n| n.to_str()) == Some(basename));
        match found {
            Some(path) => path,
            None => {
                debug!(basename = %basename, root = %downloaded.display(), "Asset file not found in download");
                downloaded.to_path_buf()
            }
        }
    }

    /// Open every file under `root`, keyed by the driver's naming convention
    /// or by the path relative to `root`. Files no engine opens are skipped.
    async fn open_local_tree(
        &self,
        product: &Product,
        root: &Path,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> AccessResult<DatasetCollection> {
        let mut collection = DatasetCollection::new();
        for path in self.scan(root).await {
            if cancel.is_cancelled() {
                return Err(AccessError::Cancelled);
            }
            match self.opener.open(AccessHandle::local(&path), options, cancel).await {
                Ok(opened) => {
                    let key = self
                        .resolver
                        .guess_asset_key(&path, product)
                        .unwrap_or_else(|| relative_key(root, &path));
                    debug!(key = %key, path = %path.display(), engine = %opened.engine, "Opened local file");
                    collection.insert(key, opened.dataset, opened.handle);
                }
                Err(AccessError::Cancelled) => return Err(AccessError::Cancelled),
                Err(e) => debug!(path = %path.display(), error = %e, "Skipping local file"),
            }
        }
        Ok(collection)
    }

    async fn scan(&self, root: &Path) -> Vec<PathBuf> {
        let scanner = self.scanner.clone();
        let root = root.to_path_buf();
        tokio::task::spawn_blocking(move || scanner.scan(&root))
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "Filesystem scan failed");
                Vec::new()
            })
    }
}

fn relative_key(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    let key = relative.to_string_lossy();
    if key.is_empty() {
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    } else {
        key.into_owned()
    }
}
