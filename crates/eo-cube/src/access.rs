//! Entry point turning a product into a collection of opened datasets.

use std::sync::Arc;

use eo_common::{AccessError, AccessResult, Authenticator, Downloader, PhysicalAddress, Product};
use storage::{DataFetcher, StorageContextBuilder, StoreProvider};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cascade::{EngineCascadeOpener, OpenOptions};
use crate::collection::DatasetCollection;
use crate::config::CubeConfig;
use crate::drivers::AddressResolver;
use crate::engines::EngineRegistry;
use crate::fallback::{DownloadFallbackOrchestrator, DownloadSettings};
use crate::fetch::AssetFetchOrchestrator;
use crate::hints::{ExtensionHints, FormatHintProvider};
use crate::scanner::{FilesystemScanner, WalkdirScanner};

/// What to retrieve from a product.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetrievalRequest {
    /// Single asset to open; all eligible assets when unset
    pub asset_key: Option<String>,
    /// Role filter of the fan-out; the configured default roles when unset
    pub roles: Option<Vec<String>>,
    pub options: OpenOptions,
}

impl RetrievalRequest {
    pub fn asset(key: impl Into<String>) -> Self {
        Self {
            asset_key: Some(key.into()),
            ..Self::default()
        }
    }

    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.options.engine = Some(engine.into());
        self
    }
}

/// Resolves and opens product data.
///
/// Without an asset key, every eligible asset is opened concurrently. When
/// that yields nothing, or for a single asset, the resource is opened
/// directly and, failing that, from a downloaded copy.
#[derive(Debug, Clone)]
pub struct ProductAccess {
    config: CubeConfig,
    resolver: Arc<AddressResolver>,
    fan_out: AssetFetchOrchestrator,
    fallback: DownloadFallbackOrchestrator,
}

impl ProductAccess {
    pub fn builder(config: CubeConfig) -> ProductAccessBuilder {
        ProductAccessBuilder::new(config)
    }

    /// Access with default collaborators: anonymous, no downloader.
    pub fn new(config: CubeConfig) -> AccessResult<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &CubeConfig {
        &self.config
    }

    /// Physical address of `key` as computed by the product's driver.
    pub async fn resolve_address(&self, product: &Product, key: &str) -> AccessResult<PhysicalAddress> {
        self.resolver.resolve(product, key).await
    }

    /// Open the data of `product` as a collection sorted by key.
    ///
    /// With a retrieval deadline configured, expiry cancels the retrieval.
    /// Assets opened before expiry are returned; with none, the call fails
    /// with `DeadlineExceeded` and no download is attempted.
    #[instrument(skip(self, product, request), fields(product = %product.id, asset = ?request.asset_key))]
    pub async fn to_dataset_collection(
        &self,
        product: &Product,
        request: &RetrievalRequest,
    ) -> AccessResult<DatasetCollection> {
        let cancel = CancellationToken::new();
        let sink = Arc::new(Mutex::new(DatasetCollection::new()));
        let work = self.retrieve(product, request, sink.clone(), &cancel);

        let Some(deadline) = self.config.retrieval_deadline() else {
            return work.await;
        };
        match tokio::time::timeout(deadline, work).await {
            Ok(result) => result,
            Err(_) => {
                cancel.cancel();
                let mut partial = std::mem::take(&mut *sink.lock().await);
                if partial.is_empty() {
                    warn!(deadline_secs = deadline.as_secs(), "Retrieval deadline exceeded");
                    return Err(AccessError::DeadlineExceeded(deadline));
                }
                warn!(
                    deadline_secs = deadline.as_secs(),
                    datasets = partial.len(),
                    "Retrieval deadline exceeded, returning partial result"
                );
                partial.set_attrs(&product.properties);
                partial.sort();
                Ok(partial)
            }
        }
    }

    async fn retrieve(
        &self,
        product: &Product,
        request: &RetrievalRequest,
        sink: Arc<Mutex<DatasetCollection>>,
        cancel: &CancellationToken,
    ) -> AccessResult<DatasetCollection> {
        if request.asset_key.is_none() && !product.assets.is_empty() {
            let roles = request
                .roles
                .clone()
                .unwrap_or_else(|| self.config.default_roles.clone());
            self.fan_out
                .fetch_into(product, &roles, &request.options, sink.clone(), cancel)
                .await;

            let mut collection = std::mem::take(&mut *sink.lock().await);
            if !collection.is_empty() {
                collection.set_attrs(&product.properties);
                collection.sort();
                info!(datasets = collection.len(), "Opened product assets");
                return Ok(collection);
            }
            debug!("No asset could be opened, opening the product as a whole");
        }

        self.fallback
            .open_single(product, request.asset_key.as_deref(), &request.options, cancel)
            .await
    }
}

/// Assembles a [`ProductAccess`] with its collaborators.
pub struct ProductAccessBuilder {
    config: CubeConfig,
    authenticator: Option<Arc<dyn Authenticator>>,
    downloader: Option<Arc<dyn Downloader>>,
    stores: Option<Arc<dyn StoreProvider>>,
    registry: Option<EngineRegistry>,
    hints: Option<Arc<dyn FormatHintProvider>>,
    scanner: Option<Arc<dyn FilesystemScanner>>,
}

impl ProductAccessBuilder {
    pub fn new(config: CubeConfig) -> Self {
        Self {
            config,
            authenticator: None,
            downloader: None,
            stores: None,
            registry: None,
            hints: None,
            scanner: None,
        }
    }

    pub fn authenticator(mut self, authenticator: Arc<dyn Authenticator>) -> Self {
        self.authenticator = Some(authenticator);
        self
    }

    pub fn downloader(mut self, downloader: Arc<dyn Downloader>) -> Self {
        self.downloader = Some(downloader);
        self
    }

    /// Object storage clients; S3 built from the access context by default.
    pub fn store_provider(mut self, stores: Arc<dyn StoreProvider>) -> Self {
        self.stores = Some(stores);
        self
    }

    pub fn engines(mut self, registry: EngineRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn hints(mut self, hints: Arc<dyn FormatHintProvider>) -> Self {
        self.hints = Some(hints);
        self
    }

    pub fn scanner(mut self, scanner: Arc<dyn FilesystemScanner>) -> Self {
        self.scanner = Some(scanner);
        self
    }

    pub fn build(self) -> AccessResult<ProductAccess> {
        self.config.validate().map_err(AccessError::InvalidConfig)?;
        let config = self.config;

        let mut contexts = StorageContextBuilder::new()
            .with_s3_endpoint(config.s3_endpoint.clone())
            .with_user_agent(config.user_agent.clone());
        if let Some(authenticator) = self.authenticator {
            contexts = contexts.with_authenticator(authenticator);
        }
        let contexts = Arc::new(contexts);

        let fetcher = Arc::new(match self.stores {
            Some(stores) => DataFetcher::new(stores),
            None => DataFetcher::default(),
        });
        let registry = Arc::new(self.registry.unwrap_or_default());
        let hints = self.hints.unwrap_or_else(|| Arc::new(ExtensionHints));
        let opener = Arc::new(EngineCascadeOpener::new(registry.clone(), hints));
        let resolver = Arc::new(AddressResolver::new(
            contexts.clone(),
            fetcher.clone(),
            registry,
        ));

        let fan_out = AssetFetchOrchestrator::new(
            resolver.clone(),
            contexts.clone(),
            fetcher.clone(),
            opener.clone(),
            config.max_workers,
        );

        let scanner = self.scanner.unwrap_or_else(|| Arc::new(WalkdirScanner));
        let mut fallback =
            DownloadFallbackOrchestrator::new(resolver.clone(), contexts, fetcher, opener, scanner)
                .with_settings(DownloadSettings {
                    wait: config.download_wait(),
                    timeout: config.download_timeout(),
                    extract: config.extract_downloads,
                });
        if let Some(downloader) = self.downloader {
            fallback = fallback.with_downloader(downloader);
        }

        Ok(ProductAccess {
            config,
            resolver,
            fan_out,
            fallback,
        })
    }
}
