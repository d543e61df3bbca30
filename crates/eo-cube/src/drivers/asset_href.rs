//! Address lookup through the product's asset hrefs.

use std::path::Path;

use eo_common::{AccessError, AccessResult, Asset, PhysicalAddress, Product};
use regex::RegexBuilder;
use tracing::debug;

/// Role an asset must carry to be addressable, unless it has no roles at all.
pub const DATA_ROLE: &str = "data";

fn addressable(asset: &Asset) -> bool {
    !asset.declares_roles() || asset.has_role(DATA_ROLE)
}

/// Resolve `key` against the product assets.
///
/// An exact case-insensitive key match wins. Otherwise `key` is searched
/// as a case-insensitive regular expression within asset keys. Both stages
/// must yield exactly one asset.
pub fn resolve(product: &Product, key: &str) -> AccessResult<PhysicalAddress> {
    let candidates: Vec<&Asset> = product.assets.iter().filter(|a| addressable(a)).collect();

    let exact: Vec<&Asset> = candidates
        .iter()
        .copied()
        .filter(|a| a.key.to_lowercase() == key.to_lowercase())
        .collect();
    if let [asset] = exact.as_slice() {
        return Ok(PhysicalAddress::new(asset.href.clone()));
    }

    let pattern = RegexBuilder::new(key)
        .case_insensitive(true)
        .build()
        .or_else(|_| {
            RegexBuilder::new(&regex::escape(key))
                .case_insensitive(true)
                .build()
        })
        .map_err(|e| AccessError::InvalidConfig(format!("Invalid asset pattern {}: {}", key, e)))?;
    let matched: Vec<&Asset> = candidates
        .iter()
        .copied()
        .filter(|a| pattern.is_match(&a.key))
        .collect();
    if let [asset] = matched.as_slice() {
        debug!(key = %key, asset = %asset.key, "Asset matched by pattern");
        return Ok(PhysicalAddress::new(asset.href.clone()));
    }

    Err(AccessError::AmbiguousOrMissingAsset {
        product: product.to_string(),
        key: key.to_string(),
        exact_matches: exact.len(),
        pattern_matches: matched.len(),
    })
}

/// Key of the asset whose href points at a file named like `path`.
pub fn guess_asset_key(path: &Path, product: &Product) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    product
        .assets
        .iter()
        .find(|a| a.href_basename() == Some(name))
        .map(|a| a.key.clone())
}
