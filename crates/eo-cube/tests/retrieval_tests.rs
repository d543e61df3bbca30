//! End-to-end retrieval: fan-out, single resources and the download fallback.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eo_common::{AccessError, Asset, Product, OFFLINE_STATUS};
use eo_cube::engines::EngineDecoder;
use eo_cube::{
    CubeConfig, EngineDescriptor, EngineInput, EngineRegistry, ProductAccess, RetrievalRequest,
};
use object_store::memory::InMemory;
use raster_formats::{Dataset, FormatResult};
use serde_json::json;
use storage::StaticStoreProvider;
use test_utils::{assert_err_matches, put_object, MockAuthenticator, MockDownloader};

fn tif() -> Vec<u8> {
    test_utils::tiff(16, 16, 16, 1)
}

fn jp2() -> Vec<u8> {
    test_utils::jp2(64, 64, 1, 15)
}

fn config() -> CubeConfig {
    CubeConfig {
        max_workers: 4,
        ..CubeConfig::default()
    }
}

fn keys(collection: &eo_cube::DatasetCollection) -> Vec<&str> {
    collection.keys().collect()
}

fn href(path: &Path) -> String {
    path.display().to_string()
}

/// Directory standing in for a downloaded product.
fn downloaded_tree() -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("product");
    test_utils::write_file(&root, "B01.tif", &tif());
    test_utils::write_file(&root, "sub/B02.jp2", &jp2());
    test_utils::write_file(&root, "readme.txt", b"nothing to see");
    (dir, root)
}

#[tokio::test]
async fn test_s3_fan_out_opens_data_assets() {
    let store = Arc::new(InMemory::new());
    for key in ["items/x/B01.jp2", "items/x/B03.jp2"] {
        put_object(store.as_ref(), key, jp2()).await;
    }
    put_object(store.as_ref(), "items/x/B01.json", Bytes::from_static(b"{}")).await;

    let access = ProductAccess::builder(config())
        .store_provider(Arc::new(StaticStoreProvider::new().with_bucket("bucket", store)))
        .build()
        .unwrap();
    let product = test_utils::stac_product("s3://bucket/items/x")
        .with_property("platform", json!("sentinel-2a"));

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["B01.jp2", "B03.jp2"]);
    for (_, dataset) in collection.iter() {
        assert_eq!(dataset.engine, "raster");
        assert_eq!(dataset.attrs.get("platform"), Some(&json!("sentinel-2a")));
        assert_eq!(dataset.variable("band_data").unwrap().shape, vec![1, 64, 64]);
    }
}

#[tokio::test]
async fn test_role_filter_excludes_other_roles() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_utils::write_file(dir.path(), "data.tif", &tif());
    let mask = test_utils::write_file(dir.path(), "mask.tif", &tif());
    let product = Product::new("p", format!("file://{}", dir.path().display()))
        .with_asset(Asset::new("data", href(&data)).with_roles(["data"]))
        .with_asset(Asset::new("mask", href(&mask)).with_roles(["data-mask"]));
    let access = ProductAccess::new(config()).unwrap();

    let only_data = access
        .to_dataset_collection(&product, &RetrievalRequest::default().with_roles(["data"]))
        .await
        .unwrap();
    assert_eq!(keys(&only_data), vec!["data"]);

    let defaults = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();
    assert_eq!(keys(&defaults), vec!["data", "mask"]);
}

#[tokio::test]
async fn test_assets_without_roles_are_all_fetched_in_key_order() {
    let dir = tempfile::tempdir().unwrap();
    let z = test_utils::write_file(dir.path(), "z.tif", &tif());
    let a = test_utils::write_file(dir.path(), "a.jp2", &jp2());
    let product = Product::new("p", format!("file://{}", dir.path().display()))
        .with_asset(Asset::new("z", href(&z)))
        .with_asset(Asset::new("a", href(&a)));
    let access = ProductAccess::new(config()).unwrap();

    let mut collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default().with_roles(["data"]))
        .await
        .unwrap();
    assert_eq!(keys(&collection), vec!["a", "z"]);

    collection.sort();
    assert_eq!(keys(&collection), vec!["a", "z"]);
}

#[tokio::test]
async fn test_fan_out_failure_does_not_affect_siblings() {
    let dir = tempfile::tempdir().unwrap();
    let good = test_utils::write_file(dir.path(), "good.tif", &tif());
    let broken = test_utils::write_file(dir.path(), "broken.tif", b"not a raster at all");
    let product = Product::new("p", format!("file://{}", dir.path().display()))
        .with_asset(Asset::new("good", href(&good)).with_roles(["data"]))
        .with_asset(Asset::new("broken", href(&broken)).with_roles(["data"]));
    let access = ProductAccess::new(config()).unwrap();

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["good"]);
    assert_eq!(collection.get("good").unwrap().engine, "raster");
}

#[tokio::test]
async fn test_empty_fan_out_opens_product_location() {
    let dir = tempfile::tempdir().unwrap();
    let scene = test_utils::write_file(dir.path(), "scene.tif", &tif());
    let broken = test_utils::write_file(dir.path(), "broken.tif", b"garbage");
    let product = Product::new("p", format!("file://{}", scene.display()))
        .with_asset(Asset::new("broken", href(&broken)).with_roles(["data"]))
        .with_property("platform", json!("sentinel-2b"));
    let access = ProductAccess::new(config()).unwrap();

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["data"]);
    let dataset = collection.get("data").unwrap();
    assert_eq!(dataset.engine, "raster");
    assert_eq!(dataset.attrs.get("platform"), Some(&json!("sentinel-2b")));
}

#[tokio::test]
async fn test_zip_member_asset_opened_directly() {
    let store = Arc::new(InMemory::new());
    let archive = test_utils::zip_archive(&[("GRANULE/B01.tif", &tif()[..])]);
    put_object(store.as_ref(), "products/p.zip", archive).await;
    let access = ProductAccess::builder(config())
        .store_provider(Arc::new(StaticStoreProvider::new().with_bucket("bucket", store)))
        .build()
        .unwrap();
    let product = Product::new("p", "s3://bucket/products/p.zip").with_asset(Asset::new(
        "B01",
        "zip+s3://bucket/products/p.zip!GRANULE/B01.tif",
    ));

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::asset("B01"))
        .await
        .unwrap();
    assert_eq!(keys(&collection), vec!["B01"]);
    assert_eq!(collection.get("B01").unwrap().engine, "raster");
}

#[tokio::test]
async fn test_unknown_asset_key_fails_without_download() {
    let (_dir, root) = downloaded_tree();
    let downloader = Arc::new(MockDownloader::returning(&root));
    let access = ProductAccess::builder(config())
        .downloader(downloader.clone())
        .build()
        .unwrap();
    let product = test_utils::stac_product("s3://bucket/items/x");

    let err = access
        .to_dataset_collection(&product, &RetrievalRequest::asset("B99"))
        .await
        .unwrap_err();
    match err {
        AccessError::DatasetCreation { reason, .. } => {
            assert!(reason.contains("B99 not found"), "{reason}")
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(downloader.calls(), 0);
}

#[tokio::test]
async fn test_unsupported_location_falls_back_to_download() {
    let (_dir, root) = downloaded_tree();
    let downloader = Arc::new(MockDownloader::returning(&root));
    let access = ProductAccess::builder(config())
        .downloader(downloader.clone())
        .build()
        .unwrap();
    let product = Product::new("ftp_product", "ftp://host/products/p")
        .with_property("title", json!("ftp product"));

    let mut collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["B01", "B02"]);
    assert_eq!(
        collection.get("B02").unwrap().attrs.get("title"),
        Some(&json!("ftp product"))
    );
    let requests = downloader.requests();
    assert_eq!(requests.len(), 1);
    assert!(requests[0].extract);
    assert_eq!(requests[0].asset_key, None);
    assert_eq!(requests[0].wait, Duration::from_secs(120));

    collection.close();
    assert!(collection.is_closed());
    for key in ["B01", "B02"] {
        assert!(collection.get(key).unwrap().is_closed());
        assert!(collection.handle(key).unwrap().is_closed());
    }
}

#[tokio::test]
async fn test_download_locates_requested_asset_file() {
    let (_dir, root) = downloaded_tree();
    let downloader = Arc::new(MockDownloader::returning(&root));
    let access = ProductAccess::builder(config())
        .downloader(downloader.clone())
        .build()
        .unwrap();
    let product = Product::new("p", "ftp://host/products/p")
        .with_asset(Asset::new("B02", "ftp://host/products/p/sub/B02.jp2"));

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::asset("B02"))
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["B02"]);
    assert_eq!(downloader.requests()[0].asset_key.as_deref(), Some("B02"));
}

#[tokio::test]
async fn test_direct_failure_without_downloader() {
    let access = ProductAccess::new(config()).unwrap();
    let product = Product::new("p", "ftp://host/products/p");

    let err = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap_err();
    match err {
        AccessError::DatasetCreation { source, .. } => assert!(matches!(
            source.as_deref(),
            Some(AccessError::UnsupportedAddressScheme { .. })
        )),
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_download_failure_is_terminal() {
    let access = ProductAccess::builder(config())
        .downloader(Arc::new(MockDownloader::failing("quota exceeded")))
        .build()
        .unwrap();
    let product = Product::new("p", "ftp://host/products/p");

    let err = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap_err();
    assert_err_matches!(Err::<(), _>(err), AccessError::DatasetCreation { .. });
}

#[tokio::test]
async fn test_offline_product_ordered_once() {
    let dir = tempfile::tempdir().unwrap();
    let scene = test_utils::write_file(dir.path(), "scene.tif", &tif());
    let authenticator = Arc::new(MockAuthenticator::anonymous());
    let access = ProductAccess::builder(config())
        .authenticator(authenticator.clone())
        .build()
        .unwrap();
    let product = Product::new("p", format!("file://{}", scene.display()))
        .with_property("storageStatus", json!(OFFLINE_STATUS));

    let collection = access
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["data"]);
    assert_eq!(authenticator.orders(), 1);
}

fn sleepy_decode(input: EngineInput) -> FormatResult<Dataset> {
    let source = input.source();
    if source.ends_with("slow.tif") {
        std::thread::sleep(Duration::from_secs(3));
    }
    Ok(Dataset::new(source, "sleepy"))
}

fn never(_: &Path, _: &[u8]) -> bool {
    false
}

fn sleepy_access(downloader: Arc<MockDownloader>) -> ProductAccess {
    let sleepy = EngineDescriptor {
        name: "sleepy",
        local_only: false,
        extensions: &[".tif"],
        detect: never,
        decoder: EngineDecoder::Dataset(sleepy_decode),
    };
    let config = CubeConfig {
        retrieval_deadline_secs: Some(1),
        ..config()
    };
    ProductAccess::builder(config)
        .engines(EngineRegistry::new(vec![sleepy]))
        .downloader(downloader)
        .build()
        .unwrap()
}

#[tokio::test]
async fn test_deadline_returns_assets_opened_in_time() {
    let dir = tempfile::tempdir().unwrap();
    let fast = test_utils::write_file(dir.path(), "fast.tif", b"fast");
    let slow = test_utils::write_file(dir.path(), "slow.tif", b"slow");
    let product = Product::new("p", format!("file://{}", dir.path().display()))
        .with_asset(Asset::new("fast", href(&fast)).with_roles(["data"]))
        .with_asset(Asset::new("slow", href(&slow)).with_roles(["data"]));
    let downloader = Arc::new(MockDownloader::returning(dir.path()));

    let collection = sleepy_access(downloader.clone())
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap();

    assert_eq!(keys(&collection), vec!["fast"]);
    assert_eq!(downloader.calls(), 0);
}

#[tokio::test]
async fn test_deadline_without_result_does_not_download() {
    let dir = tempfile::tempdir().unwrap();
    let slow = test_utils::write_file(dir.path(), "slow.tif", b"slow");
    let product = Product::new("p", format!("file://{}", dir.path().display()))
        .with_asset(Asset::new("slow", href(&slow)).with_roles(["data"]));
    let downloader = Arc::new(MockDownloader::returning(dir.path()));

    let err = sleepy_access(downloader.clone())
        .to_dataset_collection(&product, &RetrievalRequest::default())
        .await
        .unwrap_err();

    assert_err_matches!(Err::<(), _>(err), AccessError::DeadlineExceeded(_));
    assert_eq!(downloader.calls(), 0);
}
