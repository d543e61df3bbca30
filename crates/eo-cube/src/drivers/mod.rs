//! Physical address resolution through an ordered driver table.
//!
//! Each rule pairs a predicate over [`ProductCapabilities`] with a driver.
//! Rules are evaluated top to bottom on every call; the first match wins.

pub mod asset_href;
pub mod generic;
pub mod hierarchical;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use eo_common::{AccessError, AccessResult, PhysicalAddress, Product, ProductCapabilities, Scheme};
use storage::{DataFetcher, StorageContextBuilder};
use tracing::{debug, instrument};

use crate::engines::EngineRegistry;

/// Product type handled by the hierarchical metadata driver.
pub const S2_L1C_PRODUCT_TYPE: &str = "S2_MSI_L1C";

/// Address lookup strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverKind {
    /// Asset hrefs, matched by key
    AssetHref,
    /// Sentinel-2 L1C metadata tree or bucket listing
    HierarchicalMetadata,
    /// Recursive search of a local directory
    GenericFilesystem,
}

/// One row of the dispatch table.
#[derive(Clone, Copy)]
pub struct DriverRule {
    pub predicate: fn(&ProductCapabilities) -> bool,
    pub kind: DriverKind,
}

impl std::fmt::Debug for DriverRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DriverRule").field("kind", &self.kind).finish_non_exhaustive()
    }
}

/// Default dispatch table.
pub const DEFAULT_RULES: &[DriverRule] = &[
    DriverRule {
        predicate: |caps| caps.has_assets,
        kind: DriverKind::AssetHref,
    },
    DriverRule {
        predicate: |caps| caps.product_type.as_deref() == Some(S2_L1C_PRODUCT_TYPE),
        kind: DriverKind::HierarchicalMetadata,
    },
    DriverRule {
        predicate: |_| true,
        kind: DriverKind::GenericFilesystem,
    },
];

/// Computes the physical address of a named sub-resource of a product.
#[derive(Debug, Clone)]
pub struct AddressResolver {
    rules: Vec<DriverRule>,
    contexts: Arc<StorageContextBuilder>,
    fetcher: Arc<DataFetcher>,
    registry: Arc<EngineRegistry>,
}

impl AddressResolver {
    pub fn new(
        contexts: Arc<StorageContextBuilder>,
        fetcher: Arc<DataFetcher>,
        registry: Arc<EngineRegistry>,
    ) -> Self {
        Self {
            rules: DEFAULT_RULES.to_vec(),
            contexts,
            fetcher,
            registry,
        }
    }

    /// Replace the dispatch table.
    pub fn with_rules(mut self, rules: Vec<DriverRule>) -> Self {
        self.rules = rules;
        self
    }

    /// Driver for a product; generic when no rule matches.
    pub fn select(&self, capabilities: &ProductCapabilities) -> DriverKind {
        self.rules
            .iter()
            .find(|rule| (rule.predicate)(capabilities))
            .map(|rule| rule.kind)
            .unwrap_or(DriverKind::GenericFilesystem)
    }

    /// Physical address of `key` in `product`.
    #[instrument(skip(self, product), fields(product = %product.id))]
    pub async fn resolve(&self, product: &Product, key: &str) -> AccessResult<PhysicalAddress> {
        let capabilities = product.capabilities();
        let kind = self.select(&capabilities);
        debug!(driver = ?kind, "Selected address driver");

        let address = match kind {
            DriverKind::AssetHref => asset_href::resolve(product, key)?,
            DriverKind::HierarchicalMetadata => match capabilities.location_scheme {
                Scheme::File => {
                    let dir = product_dir(product);
                    let owned = product.clone();
                    let band = key.to_string();
                    blocking(move || hierarchical::resolve_local(&owned, &dir, &band)).await?
                }
                Scheme::S3 => {
                    hierarchical::resolve_s3(product, key, &self.contexts, &self.fetcher).await?
                }
                scheme => return Err(unsupported(product, scheme)),
            },
            DriverKind::GenericFilesystem => match capabilities.location_scheme {
                Scheme::File => {
                    let dir = product_dir(product);
                    let owned = product.clone();
                    let band = key.to_string();
                    let registry = self.registry.clone();
                    blocking(move || generic::resolve_local(&owned, &dir, &band, &registry)).await?
                }
                scheme => return Err(unsupported(product, scheme)),
            },
        };
        debug!(address = %address, "Resolved address");
        Ok(address)
    }

    /// Href of the asset stored under exactly `key`.
    pub fn resolve_asset(&self, product: &Product, key: &str) -> AccessResult<PhysicalAddress> {
        product
            .assets
            .get(key)
            .map(|asset| PhysicalAddress::new(asset.href.clone()))
            .ok_or_else(|| AccessError::AmbiguousOrMissingAsset {
                product: product.to_string(),
                key: key.to_string(),
                exact_matches: 0,
                pattern_matches: 0,
            })
    }

    /// Key naming a file found under a materialized product, following the
    /// naming convention of the product's driver.
    pub fn guess_asset_key(&self, path: &Path, product: &Product) -> Option<String> {
        match self.select(&product.capabilities()) {
            DriverKind::AssetHref => asset_href::guess_asset_key(path, product),
            DriverKind::HierarchicalMetadata => hierarchical::guess_asset_key(path),
            DriverKind::GenericFilesystem => generic::guess_asset_key(path, &self.registry),
        }
    }
}

fn product_dir(product: &Product) -> PathBuf {
    PathBuf::from(eo_common::address::uri_to_path(&product.location))
}

fn unsupported(product: &Product, scheme: Scheme) -> AccessError {
    AccessError::UnsupportedAddressScheme {
        product: product.to_string(),
        scheme: scheme.to_string(),
    }
}

async fn blocking<T, F>(f: F) -> AccessResult<T>
where
    F: FnOnce() -> AccessResult<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AccessError::Storage(format!("Resolution task failed: {}", e)))?
}
