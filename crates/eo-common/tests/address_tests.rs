//! Tests for PhysicalAddress decomposition.

use eo_common::{PhysicalAddress, Scheme};

// ============================================================================
// Composite addresses
// ============================================================================

#[test]
fn test_composite_archive_member() {
    let addr = PhysicalAddress::new("zip+s3://bucket/path/product.zip!GRANULE/B01.jp2");
    assert_eq!(addr.scheme(), Scheme::ZipS3);
    assert_eq!(addr.archive_member(), Some("GRANULE/B01.jp2"));
    assert_eq!(addr.file_name(), Some("B01.jp2"));
    assert_eq!(addr.extension().as_deref(), Some(".jp2"));
}

#[test]
fn test_composite_outer_object() {
    let addr = PhysicalAddress::new("zip+s3://bucket/path/product.zip!B01.jp2");
    assert_eq!(addr.outer().as_str(), "s3://bucket/path/product.zip");
    assert_eq!(
        addr.bucket_and_prefix(),
        Some(("bucket".to_string(), "path/product.zip".to_string()))
    );
}

#[test]
fn test_nested_prefix_cleanup() {
    let addr = PhysicalAddress::new("s3://zip+s3://bucket/p.zip!a.tif");
    let cleaned = addr.without_nested_prefix();
    assert_eq!(cleaned.as_str(), "zip+s3://bucket/p.zip!a.tif");
    assert_eq!(cleaned.scheme(), Scheme::ZipS3);
    assert_eq!(addr.outer().as_str(), "s3://bucket/p.zip");
}

#[test]
fn test_member_without_name_is_ignored() {
    let addr = PhysicalAddress::new("zip+s3://bucket/p.zip!");
    assert_eq!(addr.archive_member(), None);
}

// ============================================================================
// Plain addresses
// ============================================================================

#[test]
fn test_bare_path_is_local() {
    let addr = PhysicalAddress::new("/data/S2A/B01.jp2");
    assert!(addr.is_local());
    assert_eq!(addr.local_path().unwrap().to_str(), Some("/data/S2A/B01.jp2"));
}

#[test]
fn test_file_uri_is_local() {
    let addr = PhysicalAddress::new("file:///data/x.nc");
    assert!(addr.is_local());
    assert_eq!(addr.local_path().unwrap().to_str(), Some("/data/x.nc"));
}

#[test]
fn test_remote_has_no_local_path() {
    assert!(PhysicalAddress::new("https://host/x.nc").local_path().is_none());
    assert!(PhysicalAddress::new("s3://b/x.nc").local_path().is_none());
}

#[test]
fn test_s3_bucket_only() {
    let addr = PhysicalAddress::new("s3://sentinel-s2-l1c");
    assert_eq!(
        addr.bucket_and_prefix(),
        Some(("sentinel-s2-l1c".to_string(), String::new()))
    );
}

#[test]
fn test_http_file_name_ignores_query() {
    let addr = PhysicalAddress::new("https://host/data/file.grib2.gz?sig=abc");
    assert_eq!(addr.file_name(), Some("file.grib2.gz"));
    assert_eq!(addr.extension().as_deref(), Some(".grib2.gz"));
    assert!(addr.scheme().is_http());
}

#[test]
fn test_http_has_no_bucket() {
    assert_eq!(PhysicalAddress::new("https://host/a.tif").bucket_and_prefix(), None);
}
