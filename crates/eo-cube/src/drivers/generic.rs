//! Products already on the local filesystem, searched by band token.

use std::path::Path;

use eo_common::{AccessError, AccessResult, PhysicalAddress, Product};
use walkdir::WalkDir;

use crate::engines::EngineRegistry;

/// First file under `product_dir` whose name contains `band` and whose
/// extension is claimed by a registered engine. Files are visited in
/// name order.
pub fn resolve_local(
    product: &Product,
    product_dir: &Path,
    band: &str,
    registry: &EngineRegistry,
) -> AccessResult<PhysicalAddress> {
    WalkDir::new(product_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find(|entry| {
            let name = entry.file_name().to_string_lossy();
            name.contains(band) && !registry.engines_for(&name).is_empty()
        })
        .map(|entry| PhysicalAddress::from_local_path(entry.path()))
        .ok_or_else(|| AccessError::AddressNotFound {
            product: product.to_string(),
            key: band.to_string(),
        })
}

/// File stem of a file any engine can read.
pub fn guess_asset_key(path: &Path, registry: &EngineRegistry) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    if registry.engines_for(name).is_empty() {
        return None;
    }
    let lower = name.to_lowercase();
    let ext_len = registry
        .iter()
        .flat_map(|e| e.extensions.iter())
        .filter(|ext| lower.ends_with(*ext))
        .map(|ext| ext.len())
        .max()?;
    name.get(..name.len().checked_sub(ext_len)?)
        .filter(|stem| !stem.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_readable_file_in_name_order() {
        let dir = tempfile::tempdir().unwrap();
        test_utils::write_file(dir.path(), "a/notes_B04.txt", b"x");
        test_utils::write_file(dir.path(), "b/img_B04.tif", &test_utils::tiff(2, 2, 8, 1));
        test_utils::write_file(dir.path(), "c/img_B04.jp2", &test_utils::jp2(2, 2, 1, 8));

        let product = test_utils::local_product("p", dir.path());
        let address =
            resolve_local(&product, dir.path(), "B04", &EngineRegistry::builtin()).unwrap();
        assert!(address.as_str().ends_with("b/img_B04.tif"));
    }

    #[test]
    fn test_missing_band() {
        let dir = tempfile::tempdir().unwrap();
        test_utils::write_file(dir.path(), "img_B04.tif", b"x");
        let product = test_utils::local_product("p", dir.path());
        let err = resolve_local(&product, dir.path(), "B05", &EngineRegistry::builtin()).unwrap_err();
        assert!(matches!(err, AccessError::AddressNotFound { .. }));
    }

    #[test]
    fn test_guess_stem() {
        let registry = EngineRegistry::builtin();
        assert_eq!(
            guess_asset_key(Path::new("/x/gfs.t00z.grib2.gz"), &registry).as_deref(),
            Some("gfs.t00z")
        );
        assert_eq!(guess_asset_key(Path::new("/x/B01.TIF"), &registry).as_deref(), Some("B01"));
        assert!(guess_asset_key(Path::new("/x/B01.json"), &registry).is_none());
    }
}
