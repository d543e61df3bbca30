//! Product fixtures and on-disk product trees.

use std::path::{Path, PathBuf};

use bytes::Bytes;
use eo_common::{Asset, Product};
use object_store::{path::Path as ObjectPath, ObjectStore};

use crate::generators;

/// Identifier of the Sentinel-2 L1C sample product.
pub const S2_PRODUCT_ID: &str =
    "S2A_MSIL1C_20180101T105441_N0206_R051_T31TDH_20180101T124911";

/// Tile granule directory of the sample product.
pub const S2_GRANULE: &str = "L1C_T31TDH_A013204_20180101T105435";

/// Every band listed in the sample product metadata.
pub const S2_BANDS: [&str; 14] = [
    "B01", "B02", "B03", "B04", "B05", "B06", "B07", "B08", "B8A", "B09", "B10", "B11", "B12",
    "TCI",
];

/// Write `content` to `dir/relative`, creating parent directories.
pub fn write_file(dir: &Path, relative: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).ok();
    }
    std::fs::write(&path, content).ok();
    path
}

/// Seed an object store with `data` under `key`.
pub async fn put_object<S>(store: &S, key: &str, data: impl Into<Bytes>)
where
    S: ObjectStore + ?Sized,
{
    if let Err(e) = store.put(&ObjectPath::from(key), data.into().into()).await {
        panic!("Failed to seed {}: {}", key, e);
    }
}

/// Relative path (without extension) of a band image inside the SAFE tree.
pub fn s2_image_file(band: &str) -> String {
    format!(
        "GRANULE/{}/IMG_DATA/T31TDH_20180101T105441_{}",
        S2_GRANULE, band
    )
}

/// Create a Sentinel-2 L1C SAFE directory under `root`.
///
/// The product metadata lists all [`S2_BANDS`]; only the images of
/// `present_bands` are written to disk.
pub fn sentinel2_safe(root: &Path, present_bands: &[&str]) -> PathBuf {
    let safe = root.join(format!("{}.SAFE", S2_PRODUCT_ID));
    std::fs::create_dir_all(&safe).ok();

    let image_files: String = S2_BANDS
        .iter()
        .map(|band| format!("          <IMAGE_FILE>{}</IMAGE_FILE>\n", s2_image_file(band)))
        .collect();
    let mtd = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_User_Product xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/User_Product_Level-1C.xsd">
  <n1:General_Info>
    <Product_Info>
      <PRODUCT_TYPE>S2MSI1C</PRODUCT_TYPE>
      <Product_Organisation>
        <Granule_List>
          <Granule granuleIdentifier="{granule}" imageFormat="JPEG2000">
{image_files}          </Granule>
        </Granule_List>
      </Product_Organisation>
    </Product_Info>
  </n1:General_Info>
</n1:Level-1C_User_Product>
"#,
        granule = S2_GRANULE,
        image_files = image_files
    );
    write_file(&safe, "MTD_MSIL1C.xml", mtd.as_bytes());

    let tile_mtd = r#"<?xml version="1.0" encoding="UTF-8"?>
<n1:Level-1C_Tile_ID xmlns:n1="https://psd-14.sentinel2.eo.esa.int/PSD/S2_PDI_Level-1C_Tile_Metadata.xsd">
  <n1:Geometric_Info>
    <Tile_Geocoding>
      <HORIZONTAL_CS_NAME>WGS84 / UTM zone 31N</HORIZONTAL_CS_NAME>
      <HORIZONTAL_CS_CODE>EPSG:32631</HORIZONTAL_CS_CODE>
    </Tile_Geocoding>
  </n1:Geometric_Info>
</n1:Level-1C_Tile_ID>
"#;
    write_file(
        &safe,
        &format!("GRANULE/{}/MTD_TL.xml", S2_GRANULE),
        tile_mtd.as_bytes(),
    );

    for band in present_bands {
        write_file(
            &safe,
            &format!("{}.jp2", s2_image_file(band)),
            &generators::jp2(1830, 1830, 1, 15),
        );
    }
    safe
}

/// Sentinel-2 L1C product located at `location`.
pub fn s2_product(location: &str) -> Product {
    Product::new(S2_PRODUCT_ID, location)
        .with_provider("peps")
        .with_product_type("S2_MSI_L1C")
        .with_property("title", serde_json::json!(S2_PRODUCT_ID))
}

/// STAC-like product with two data assets and one metadata asset.
pub fn stac_product(base: &str) -> Product {
    Product::new("stac_item", base)
        .with_provider("earth_search")
        .with_asset(Asset::new("B01.jp2", format!("{}/B01.jp2", base)).with_roles(["data"]))
        .with_asset(Asset::new("B03.jp2", format!("{}/B03.jp2", base)).with_roles(["data"]))
        .with_asset(
            Asset::new("B01.json", format!("{}/B01.json", base)).with_roles(["metadata"]),
        )
}

/// Product stored under a local directory, without assets.
pub fn local_product(id: &str, dir: &Path) -> Product {
    Product::new(id, format!("file://{}", dir.display())).with_provider("local")
}
