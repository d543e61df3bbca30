//! Decoder tests over synthetic files.

use std::path::Path;

use bytes::Bytes;
use raster_formats::{grib2, netcdf, raster, zarr, DataType, FormatError};
use serde_json::json;
use test_utils::{generators, require_test_file, NcVar};

// ============================================================================
// GRIB2
// ============================================================================

#[test]
fn test_grib2_multiple_messages() {
    let data = generators::grib2_file(&[(0, 0, 0), (0, 2, 2), (0, 2, 3)], 4, 3);
    let ds = grib2::decode_bytes(Bytes::from(data), "gfs.grib2").unwrap();

    assert_eq!(
        ds.variable_names().collect::<Vec<_>>(),
        vec!["TMP", "UGRD", "VGRD"]
    );
    let tmp = ds.variable("TMP").unwrap();
    assert_eq!(tmp.shape, vec![3, 4]);
    assert_eq!(tmp.dims, vec!["y", "x"]);
    assert_eq!(tmp.dtype, DataType::Float32);
    assert_eq!(ds.attrs.get("GRIB_centre"), Some(&json!(7)));
    assert_eq!(
        ds.attrs.get("reference_time"),
        Some(&json!("2024-01-15T06:00:00+00:00"))
    );
}

#[test]
fn test_grib2_duplicate_parameter_gets_level_suffix() {
    let data = generators::grib2_file(&[(0, 0, 0), (0, 0, 0)], 2, 2);
    let ds = grib2::decode_bytes(Bytes::from(data), "dup.grib2").unwrap();
    assert_eq!(ds.variables.len(), 2);
    assert!(ds.variable("TMP").is_some());
    assert!(ds.variable("TMP_1_0").is_some());
}

#[test]
fn test_grib2_truncated_message() {
    let mut data = generators::grib2_message((0, 0, 0), 2, 2);
    data.truncate(60);
    let err = grib2::decode_bytes(Bytes::from(data), "cut.grib2").unwrap_err();
    assert!(matches!(err, FormatError::Truncated { .. }));
}

#[test]
fn test_grib2_gzip_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gfs.t00z.grib2.gz");
    let raw = generators::grib2_message((0, 3, 1), 5, 5);
    std::fs::write(&path, generators::gzip(&raw)).unwrap();

    let header = std::fs::read(&path).unwrap();
    assert!(grib2::detect(&path, &header[..4]));

    let ds = grib2::decode_path(&path).unwrap();
    assert!(ds.variable("PRMSL").is_some());
    assert_eq!(ds.backing_len(), raw.len());
}

// ============================================================================
// NetCDF
// ============================================================================

#[test]
fn test_netcdf_classic_header() {
    let data = generators::netcdf_classic(
        &[("time", 0), ("y", 3), ("x", 4)],
        &[("title", "test cube"), ("Conventions", "CF-1.8")],
        &[
            NcVar {
                name: "t2m",
                dim_ids: &[0, 1, 2],
                nc_type: 5,
                units: Some("K"),
            },
            NcVar {
                name: "x",
                dim_ids: &[2],
                nc_type: 6,
                units: None,
            },
        ],
    );
    let ds = netcdf::decode_bytes(Bytes::from(data), "cube.nc").unwrap();

    assert_eq!(ds.attrs.get("title"), Some(&json!("test cube")));
    let t2m = ds.variable("t2m").unwrap();
    assert_eq!(t2m.dims, vec!["time", "y", "x"]);
    assert_eq!(t2m.shape, vec![0, 3, 4]);
    assert_eq!(t2m.dtype, DataType::Float32);
    assert_eq!(t2m.attrs.get("units"), Some(&json!("K")));
    assert_eq!(ds.variable("x").unwrap().dtype, DataType::Float64);
}

#[test]
fn test_netcdf_unknown_dimension() {
    let data = generators::netcdf_classic(
        &[("x", 2)],
        &[],
        &[NcVar {
            name: "bad",
            dim_ids: &[5],
            nc_type: 5,
            units: None,
        }],
    );
    let err = netcdf::decode_bytes(Bytes::from(data), "bad.nc").unwrap_err();
    assert!(matches!(err, FormatError::InvalidFormat { .. }));
}

#[test]
fn test_netcdf_dimension_count_larger_than_file() {
    let mut data = b"CDF\x01".to_vec();
    data.extend_from_slice(&0u32.to_be_bytes()); // numrecs
    data.extend_from_slice(&0x0Au32.to_be_bytes()); // NC_DIMENSION
    data.extend_from_slice(&u32::MAX.to_be_bytes());

    let err = netcdf::decode_bytes(Bytes::from(data), "huge.nc").unwrap_err();
    assert!(matches!(err, FormatError::Truncated { .. }));
}

// ============================================================================
// Rasters
// ============================================================================

#[test]
fn test_tiff_header() {
    let data = generators::tiff(256, 128, 16, 1);
    assert!(raster::detect(Path::new("a.tif"), &data[..8]));
    let array = raster::decode_bytes(Bytes::from(data), "a.tif").unwrap();
    assert_eq!((array.width, array.height, array.bands), (256, 128, 1));
    assert_eq!(array.dtype, DataType::UInt16);
    assert_eq!(array.attrs.get("driver"), Some(&json!("GTiff")));
}

#[test]
fn test_float_tiff_into_band_data() {
    let array = raster::decode_bytes(Bytes::from(generators::tiff(10, 20, 32, 3)), "f.tif").unwrap();
    let ds = array.into_dataset("band_data", "raster");
    let band = ds.variable("band_data").unwrap();
    assert_eq!(band.shape, vec![1, 20, 10]);
    assert_eq!(band.dtype, DataType::Float32);
    assert!(ds.backing_len() > 0);
}

#[test]
fn test_jp2_header() {
    let data = generators::jp2(1830, 1830, 1, 15);
    let array = raster::decode_bytes(Bytes::from(data), "B01.jp2").unwrap();
    assert_eq!((array.width, array.height), (1830, 1830));
    assert_eq!(array.dtype, DataType::UInt16);
}

#[test]
fn test_raster_rejects_netcdf() {
    let data = generators::netcdf_classic(&[], &[], &[]);
    assert!(raster::decode_bytes(Bytes::from(data), "x.nc").is_err());
}

#[test]
fn test_real_jp2_sample() {
    let path = require_test_file!("T31TDH_20180101T105441_B01.jp2");
    let array = raster::decode_path(&path).unwrap();
    assert!(array.width > 0);
}

// ============================================================================
// Zarr
// ============================================================================

#[test]
fn test_zarr_store_directory() {
    let dir = tempfile::tempdir().unwrap();
    let store = dir.path().join("cube.zarr");
    std::fs::create_dir_all(&store).unwrap();
    std::fs::write(
        store.join(".zmetadata"),
        generators::zmetadata(&[("t2m", 3, 4), ("tp", 3, 4)]),
    )
    .unwrap();

    assert!(zarr::detect(&store, &[]));
    let ds = zarr::decode_path(&store).unwrap();
    assert_eq!(ds.variables.len(), 2);
    assert_eq!(ds.variable("tp").unwrap().shape, vec![3, 4]);
}

#[test]
fn test_zarr_directory_without_metadata() {
    let dir = tempfile::tempdir().unwrap();
    assert!(!zarr::detect(dir.path(), &[]));
    assert!(zarr::decode_path(dir.path()).is_err());
}
