//! Sentinel-2 L1C products: band files found through the product metadata.
//!
//! A local SAFE directory is described by `MTD_MSIL1C.xml`. Its image files
//! are grouped into subdatasets by spatial resolution, addressed as
//! `SENTINEL2_L1C:<metadata path>:<resolution>:EPSG_<code>`. Products on
//! object storage are resolved by listing the public L1C bucket.

use std::path::{Path, PathBuf};

use eo_common::{AccessError, AccessResult, PhysicalAddress, Product};
use quick_xml::events::Event;
use quick_xml::Reader;
use regex::Regex;
use storage::{DataFetcher, StorageContextBuilder};
use tracing::{debug, instrument};

/// Top-level metadata file of a SAFE directory.
pub const METADATA_FILE: &str = "MTD_MSIL1C.xml";

/// Bucket holding L1C tiles.
pub const S2_L1C_BUCKET: &str = "sentinel-s2-l1c";

/// Bands per spatial resolution class, in subdataset order.
pub const SPATIAL_RES_PER_BANDS: [(&str, &[&str]); 4] = [
    ("10m", &["B02", "B03", "B04", "B08"]),
    ("20m", &["B05", "B06", "B07", "B11", "B12", "B8A"]),
    ("60m", &["B01", "B09", "B10"]),
    ("TCI", &["TCI"]),
];

/// Resolution class containing `band`.
pub fn resolution_class(band: &str) -> Option<&'static str> {
    SPATIAL_RES_PER_BANDS
        .iter()
        .find(|(_, bands)| bands.contains(&band))
        .map(|(class, _)| *class)
}

/// One resolution group of a SAFE product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subdataset {
    pub address: String,
    /// Band image files present on disk
    pub files: Vec<PathBuf>,
}

impl Subdataset {
    /// Resolution class encoded in the address (`10m`, `20m`, `60m`, `TCI`).
    pub fn resolution(&self) -> &str {
        self.address.rsplit(':').nth(1).unwrap_or_default()
    }
}

/// Enumerate the subdatasets of a SAFE directory.
pub fn list_subdatasets(product_dir: &Path) -> AccessResult<Vec<Subdataset>> {
    let mtd = product_dir.join(METADATA_FILE);
    let xml = std::fs::read_to_string(&mtd)?;
    let images = element_texts(&xml, "IMAGE_FILE")?;
    let epsg = tile_epsg_code(product_dir).unwrap_or_else(|| "UNKNOWN".to_string());

    let mut subdatasets = Vec::new();
    for (class, bands) in SPATIAL_RES_PER_BANDS {
        let in_class: Vec<&String> = images
            .iter()
            .filter(|image| band_token(image).map(|b| bands.contains(&b)).unwrap_or(false))
            .collect();
        if in_class.is_empty() {
            continue;
        }
        let files = in_class
            .into_iter()
            .map(|image| product_dir.join(format!("{}.jp2", image)))
            .filter(|path| path.is_file())
            .collect();
        subdatasets.push(Subdataset {
            address: format!("SENTINEL2_L1C:{}:{}:EPSG_{}", mtd.display(), class, epsg),
            files,
        });
    }
    Ok(subdatasets)
}

/// Resolve `band` inside a local SAFE directory.
pub fn resolve_local(product: &Product, product_dir: &Path, band: &str) -> AccessResult<PhysicalAddress> {
    let pattern = Regex::new(&format!(r"^.+_{}\.jp2$", regex::escape(band)))
        .map_err(|e| AccessError::InvalidConfig(format!("Invalid band {}: {}", band, e)))?;

    for subdataset in list_subdatasets(product_dir)? {
        let bands = SPATIAL_RES_PER_BANDS
            .iter()
            .find(|(class, _)| *class == subdataset.resolution())
            .map(|(_, bands)| *bands)
            .unwrap_or_default();
        if !bands.contains(&band) {
            continue;
        }
        debug!(subdataset = %subdataset.address, band = %band, "Searching subdataset files");
        if let Some(file) = subdataset
            .files
            .iter()
            .find(|f| pattern.is_match(&f.to_string_lossy()))
        {
            return Ok(PhysicalAddress::from_local_path(file));
        }
    }

    Err(AccessError::AddressNotFound {
        product: product.to_string(),
        key: band.to_string(),
    })
}

/// Resolve `band` by listing the L1C bucket under the product location.
#[instrument(skip(product, contexts, fetcher), fields(product = %product.id))]
pub async fn resolve_s3(
    product: &Product,
    band: &str,
    contexts: &StorageContextBuilder,
    fetcher: &DataFetcher,
) -> AccessResult<PhysicalAddress> {
    let prefix = product
        .location
        .rsplit("s3://")
        .next()
        .unwrap_or_default()
        .trim_matches('/');
    let listing = PhysicalAddress::new(format!("s3://{}/{}", S2_L1C_BUCKET, prefix));
    let context = contexts.build_context(&listing).await;
    let s3 = context.as_s3().cloned().unwrap_or_default();

    let needle = format!("{}.jp2", band);
    let keys = fetcher.list(&s3, S2_L1C_BUCKET, prefix).await?;
    keys.into_iter()
        .find(|key| key.contains(&needle))
        .map(|key| PhysicalAddress::new(format!("s3://{}/{}", S2_L1C_BUCKET, key)))
        .ok_or_else(|| AccessError::AddressNotFound {
            product: product.to_string(),
            key: band.to_string(),
        })
}

/// Band token of a `*_<band>.jp2` file name.
pub fn guess_asset_key(path: &Path) -> Option<String> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(".jp2")?;
    band_token(stem).map(str::to_string)
}

fn band_token(image: &str) -> Option<&str> {
    image
        .rsplit('/')
        .next()
        .and_then(|name| name.rsplit_once('_'))
        .map(|(_, band)| band)
        .filter(|band| !band.is_empty())
}

/// EPSG code of the first tile found under `GRANULE/*/MTD_TL.xml`.
fn tile_epsg_code(product_dir: &Path) -> Option<String> {
    let mut granules: Vec<PathBuf> = std::fs::read_dir(product_dir.join("GRANULE"))
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .collect();
    granules.sort();
    granules.into_iter().find_map(|granule| {
        let xml = std::fs::read_to_string(granule.join("MTD_TL.xml")).ok()?;
        let code = element_texts(&xml, "HORIZONTAL_CS_CODE").ok()?.into_iter().next()?;
        let epsg = code.rsplit(':').next().map(str::to_string);
        epsg
    })
}

/// Text content of every element with local name `name`.
fn element_texts(xml: &str, name: &str) -> AccessResult<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut texts = Vec::new();
    let mut inside = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => inside = e.local_name().as_ref() == name.as_bytes(),
            Ok(Event::Text(t)) if inside => {
                let text = t
                    .unescape()
                    .map_err(|e| AccessError::Storage(format!("Invalid XML text: {}", e)))?;
                texts.push(text.into_owned());
            }
            Ok(Event::End(_)) => inside = false,
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => {
                return Err(AccessError::Storage(format!(
                    "Invalid XML at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
        }
    }
    Ok(texts)
}
