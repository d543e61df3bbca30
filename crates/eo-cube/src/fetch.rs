//! Concurrent retrieval of every eligible asset of a product.

use std::sync::Arc;

use eo_common::{AccessResult, Asset, Product};
use storage::{AccessHandle, DataFetcher, StorageContextBuilder};
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::cascade::{EngineCascadeOpener, OpenOptions, OpenedDataset};
use crate::collection::DatasetCollection;
use crate::drivers::AddressResolver;

/// Assets fetched for a role filter.
///
/// Every asset is eligible when the filter is empty or when no asset of
/// the product declares roles; otherwise its roles must intersect the filter.
pub fn eligible_assets<'a, S: AsRef<str>>(product: &'a Product, roles: &[S]) -> Vec<&'a Asset> {
    let roles_exist = product.assets.roles_exist();
    product
        .assets
        .iter()
        .filter(|asset| roles.is_empty() || !roles_exist || asset.has_any_role(roles))
        .collect()
}

/// Opens the eligible assets of a product on a bounded set of tasks.
#[derive(Debug, Clone)]
pub struct AssetFetchOrchestrator {
    resolver: Arc<AddressResolver>,
    contexts: Arc<StorageContextBuilder>,
    fetcher: Arc<DataFetcher>,
    opener: Arc<EngineCascadeOpener>,
    max_workers: usize,
}

impl AssetFetchOrchestrator {
    pub fn new(
        resolver: Arc<AddressResolver>,
        contexts: Arc<StorageContextBuilder>,
        fetcher: Arc<DataFetcher>,
        opener: Arc<EngineCascadeOpener>,
        max_workers: usize,
    ) -> Self {
        Self {
            resolver,
            contexts,
            fetcher,
            opener,
            max_workers: max_workers.max(1),
        }
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Open every eligible asset and return the successes sorted by key.
    pub async fn fetch_all(
        &self,
        product: &Product,
        roles: &[String],
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> DatasetCollection {
        let sink = Arc::new(Mutex::new(DatasetCollection::new()));
        self.fetch_into(product, roles, options, sink.clone(), cancel)
            .await;
        let mut collection = std::mem::take(&mut *sink.lock().await);
        collection.sort();
        collection
    }

    /// Open every eligible asset, committing successes into `sink` as they
    /// complete. Failures are logged and do not affect other assets.
    ///
    /// Cancelling `cancel` aborts the outstanding tasks; entries already
    /// committed stay in `sink`.
    #[instrument(skip_all, fields(product = %product.id))]
    pub async fn fetch_into(
        &self,
        product: &Product,
        roles: &[String],
        options: &OpenOptions,
        sink: Arc<Mutex<DatasetCollection>>,
        cancel: &CancellationToken,
    ) {
        let keys: Vec<String> = eligible_assets(product, roles)
            .into_iter()
            .map(|asset| asset.key.clone())
            .collect();
        if keys.is_empty() {
            debug!("No eligible assets");
            return;
        }
        let total = keys.len();

        let product = Arc::new(product.clone());
        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut tasks = JoinSet::new();

        for key in keys {
            let this = self.clone();
            let product = product.clone();
            let options = options.clone();
            let sink = sink.clone();
            let semaphore = semaphore.clone();
            let cancel = cancel.clone();

            tasks.spawn(async move {
                let Ok(_permit) = semaphore.acquire_owned().await else {
                    return;
                };
                match this.fetch_one(&product, &key, &options, &cancel).await {
                    Ok(opened) => {
                        debug!(asset = %key, engine = %opened.engine, "Asset opened");
                        sink.lock().await.insert(key, opened.dataset, opened.handle);
                    }
                    Err(e) => debug!(asset = %key, error = %e, "Asset could not be opened"),
                }
            });
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    warn!(pending = tasks.len(), "Asset retrieval cancelled");
                    tasks.abort_all();
                    break;
                }
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Err(e)) if e.is_panic() => warn!(error = %e, "Asset task panicked"),
                    Some(_) => {}
                },
            }
        }

        info!(
            eligible = total,
            opened = sink.lock().await.len(),
            "Asset retrieval complete"
        );
    }

    async fn fetch_one(
        &self,
        product: &Product,
        key: &str,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> AccessResult<OpenedDataset> {
        let address = self.resolver.resolve_asset(product, key)?;
        let context = self.contexts.build_context(&address).await;
        let handle = AccessHandle::open(address, context, self.fetcher.clone()).await?;
        self.opener.open(handle, options, cancel).await
    }
}
