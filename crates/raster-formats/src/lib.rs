//! Header-level decoders for gridded and raster formats.
//!
//! Each module exposes a `detect` function over the first bytes of a file
//! and `decode_path` / `decode_bytes` functions producing a [`Dataset`]
//! (or a [`RasterArray`] for band-oriented rasters). Pixel data is not
//! unpacked; datasets carry variable names, dimensions, shapes, element
//! types and attributes.

pub mod dataset;
pub mod error;
pub mod grib2;
pub mod netcdf;
pub mod raster;
pub mod zarr;

pub use dataset::{DataType, Dataset, RasterArray, Variable};
pub use error::{FormatError, FormatResult};

/// Number of leading bytes decoders inspect in `detect`.
pub const SNIFF_LEN: usize = 16;
