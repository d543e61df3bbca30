//! Decode engine registry.
//!
//! Engines are listed in a static table in cascade order. Each entry knows
//! the file extensions it claims, a magic-byte detector used for local
//! auto-detection, and whether it can only read local files.

use std::fmt;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use raster_formats::{grib2, netcdf, raster, zarr, Dataset, FormatError, FormatResult, RasterArray};

/// Variable name given to the array of single-band engines.
pub const BAND_DATA: &str = "band_data";

/// Input handed to a decoder.
#[derive(Debug, Clone)]
pub enum EngineInput {
    /// A file or directory on the local filesystem
    Path(PathBuf),
    /// Content of a remote resource; `source` is its address
    Buffer { bytes: Bytes, source: String },
}

impl EngineInput {
    pub fn source(&self) -> String {
        match self {
            EngineInput::Path(path) => path.to_string_lossy().into_owned(),
            EngineInput::Buffer { source, .. } => source.clone(),
        }
    }
}

pub type DatasetDecoder = fn(EngineInput) -> FormatResult<Dataset>;
pub type BandDecoder = fn(EngineInput) -> FormatResult<RasterArray>;

/// How an engine produces its output.
#[derive(Clone, Copy)]
pub enum EngineDecoder {
    /// Multi-variable dataset
    Dataset(DatasetDecoder),
    /// Single band array, wrapped into a [`BAND_DATA`] dataset by the cascade
    SingleBand(BandDecoder),
}

/// A named decode strategy.
#[derive(Clone, Copy)]
pub struct EngineDescriptor {
    pub name: &'static str,
    /// Cannot read from a remote stream
    pub local_only: bool,
    /// File name suffixes claimed by this engine, lower-case
    pub extensions: &'static [&'static str],
    pub detect: fn(&Path, &[u8]) -> bool,
    pub decoder: EngineDecoder,
}

impl fmt::Debug for EngineDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineDescriptor")
            .field("name", &self.name)
            .field("local_only", &self.local_only)
            .field("extensions", &self.extensions)
            .field("single_band", &self.is_single_band())
            .finish()
    }
}

impl EngineDescriptor {
    pub fn is_single_band(&self) -> bool {
        matches!(self.decoder, EngineDecoder::SingleBand(_))
    }

    /// True if `file_name` ends with one of the engine's extensions.
    pub fn claims(&self, file_name: &str) -> bool {
        let lower = file_name.to_lowercase();
        self.extensions.iter().any(|ext| lower.ends_with(ext))
    }

    /// Run the decoder. Single-band output is wrapped into a dataset.
    pub fn decode(&self, input: EngineInput) -> FormatResult<Dataset> {
        match self.decoder {
            EngineDecoder::Dataset(decode) => decode(input),
            EngineDecoder::SingleBand(decode) => {
                Ok(decode(input)?.into_dataset(BAND_DATA, self.name))
            }
        }
    }
}

/// Built-in engines in cascade order.
pub const BUILTIN_ENGINES: &[EngineDescriptor] = &[
    EngineDescriptor {
        name: "grib2",
        local_only: true,
        extensions: &[".grib", ".grib2", ".grb", ".grb2", ".grib2.gz"],
        detect: grib2::detect,
        decoder: EngineDecoder::Dataset(decode_grib2),
    },
    EngineDescriptor {
        name: "netcdf",
        local_only: false,
        extensions: &[".nc", ".nc4", ".cdf", ".netcdf"],
        detect: netcdf::detect,
        decoder: EngineDecoder::Dataset(decode_netcdf),
    },
    EngineDescriptor {
        name: "raster",
        local_only: false,
        extensions: &[".tif", ".tiff", ".jp2", ".j2k"],
        detect: raster::detect,
        decoder: EngineDecoder::SingleBand(decode_raster),
    },
    EngineDescriptor {
        name: "zarr",
        local_only: false,
        extensions: &[".zarr", ".zmetadata", "zarr.json"],
        detect: zarr::detect,
        decoder: EngineDecoder::Dataset(decode_zarr),
    },
];

fn decode_grib2(input: EngineInput) -> FormatResult<Dataset> {
    match input {
        EngineInput::Path(path) => grib2::decode_path(&path),
        EngineInput::Buffer { .. } => Err(FormatError::RequiresLocalFile { engine: "grib2" }),
    }
}

fn decode_netcdf(input: EngineInput) -> FormatResult<Dataset> {
    match input {
        EngineInput::Path(path) => netcdf::decode_path(&path),
        EngineInput::Buffer { bytes, source } => netcdf::decode_bytes(bytes, &source),
    }
}

fn decode_raster(input: EngineInput) -> FormatResult<RasterArray> {
    match input {
        EngineInput::Path(path) => raster::decode_path(&path),
        EngineInput::Buffer { bytes, source } => raster::decode_bytes(bytes, &source),
    }
}

fn decode_zarr(input: EngineInput) -> FormatResult<Dataset> {
    match input {
        EngineInput::Path(path) => zarr::decode_path(&path),
        EngineInput::Buffer { bytes, source } => {
            Ok(zarr::decode_bytes(&bytes, &source)?.with_backing(bytes))
        }
    }
}

/// Ordered set of engines available to the cascade.
#[derive(Debug, Clone)]
pub struct EngineRegistry {
    engines: Vec<EngineDescriptor>,
}

impl Default for EngineRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

impl EngineRegistry {
    /// Registry holding [`BUILTIN_ENGINES`].
    pub fn builtin() -> Self {
        Self::new(BUILTIN_ENGINES.to_vec())
    }

    pub fn new(engines: Vec<EngineDescriptor>) -> Self {
        Self { engines }
    }

    /// Append an engine, replacing one with the same name in place.
    pub fn with_engine(mut self, engine: EngineDescriptor) -> Self {
        match self.engines.iter_mut().find(|e| e.name == engine.name) {
            Some(existing) => *existing = engine,
            None => self.engines.push(engine),
        }
        self
    }

    pub fn get(&self, name: &str) -> Option<&EngineDescriptor> {
        self.engines.iter().find(|e| e.name == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.engines.iter().map(|e| e.name).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &EngineDescriptor> {
        self.engines.iter()
    }

    pub fn len(&self) -> usize {
        self.engines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.engines.is_empty()
    }

    /// Engines claiming `file_name` (or a bare extension such as `.nc`).
    pub fn engines_for(&self, file_name: &str) -> Vec<&'static str> {
        self.engines
            .iter()
            .filter(|e| e.claims(file_name))
            .map(|e| e.name)
            .collect()
    }

    /// First engine whose detector accepts the file.
    pub fn detect(&self, path: &Path, header: &[u8]) -> Option<&EngineDescriptor> {
        self.engines.iter().find(|e| (e.detect)(path, header))
    }

    /// True if `file_name` is claimed by a single-band raster engine.
    pub fn is_raster_file(&self, file_name: &str) -> bool {
        self.engines
            .iter()
            .any(|e| e.is_single_band() && e.claims(file_name))
    }
}
