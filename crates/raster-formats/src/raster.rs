//! GeoTIFF and JPEG 2000 raster header decoding.
//!
//! Rasters are read as band arrays; callers wrap them into a dataset with
//! [`RasterArray::into_dataset`].

use std::path::Path;

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use bytes::Bytes;
use serde_json::{json, Map};

use crate::dataset::{DataType, RasterArray};
use crate::error::{FormatError, FormatResult};

const TIFF: &str = "TIFF";
const JP2: &str = "JPEG2000";

/// JP2 signature box.
const JP2_SIGNATURE: &[u8] = &[
    0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
];
/// Raw codestream: SOC marker followed by SIZ.
const J2K_CODESTREAM: &[u8] = &[0xFF, 0x4F, 0xFF, 0x51];

/// Well-known TIFF tag IDs.
pub mod tags {
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const GDAL_NODATA: u16 = 42113;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TiffByteOrder {
    LittleEndian,
    BigEndian,
}

impl TiffByteOrder {
    fn u16(self, b: &[u8]) -> u16 {
        match self {
            TiffByteOrder::LittleEndian => LittleEndian::read_u16(b),
            TiffByteOrder::BigEndian => BigEndian::read_u16(b),
        }
    }

    fn u32(self, b: &[u8]) -> u32 {
        match self {
            TiffByteOrder::LittleEndian => LittleEndian::read_u32(b),
            TiffByteOrder::BigEndian => BigEndian::read_u32(b),
        }
    }
}

/// True if `header` starts a TIFF or JPEG 2000 file.
pub fn detect(_path: &Path, header: &[u8]) -> bool {
    header.starts_with(b"II*\0")
        || header.starts_with(b"MM\0*")
        || header.starts_with(JP2_SIGNATURE)
        || header.starts_with(J2K_CODESTREAM)
}

/// Decode a raster file from the local filesystem.
pub fn decode_path(path: &Path) -> FormatResult<RasterArray> {
    let data = std::fs::read(path)?;
    decode_bytes(Bytes::from(data), &path.to_string_lossy())
}

/// Decode a raster held in memory, dispatching on its signature.
pub fn decode_bytes(data: Bytes, source: &str) -> FormatResult<RasterArray> {
    let mut raster = if data.starts_with(b"II") || data.starts_with(b"MM") {
        decode_tiff(&data, source)?
    } else if data.starts_with(JP2_SIGNATURE) {
        decode_jp2(&data, source)?
    } else if data.starts_with(J2K_CODESTREAM) {
        decode_codestream(&data, source)?
    } else {
        return Err(FormatError::invalid(TIFF, "neither TIFF nor JPEG 2000 signature"));
    };
    raster.backing = Some(data);
    Ok(raster)
}

fn decode_tiff(data: &[u8], source: &str) -> FormatResult<RasterArray> {
    if data.len() < 8 {
        return Err(FormatError::Truncated {
            format: TIFF,
            offset: 0,
        });
    }
    let order = match (data[0], data[1]) {
        (b'I', b'I') => TiffByteOrder::LittleEndian,
        (b'M', b'M') => TiffByteOrder::BigEndian,
        _ => return Err(FormatError::invalid(TIFF, "invalid byte order marker")),
    };
    match order.u16(&data[2..4]) {
        42 => {}
        43 => return Err(FormatError::unsupported(TIFF, "BigTIFF")),
        magic => {
            return Err(FormatError::invalid(
                TIFF,
                format!("expected magic 42, got {}", magic),
            ))
        }
    }

    let ifd_offset = order.u32(&data[4..8]) as usize;
    let count_end = ifd_offset + 2;
    if count_end > data.len() {
        return Err(FormatError::Truncated {
            format: TIFF,
            offset: ifd_offset,
        });
    }
    let entry_count = order.u16(&data[ifd_offset..count_end]) as usize;
    if count_end + entry_count * 12 > data.len() {
        return Err(FormatError::Truncated {
            format: TIFF,
            offset: count_end,
        });
    }

    let mut width = None;
    let mut height = None;
    let mut bits = 8u16;
    let mut sample_format = 1u16;
    let mut samples = 1u16;
    let mut attrs = Map::new();

    for i in 0..entry_count {
        let entry = &data[count_end + i * 12..count_end + (i + 1) * 12];
        let tag = order.u16(&entry[0..2]);
        let type_id = order.u16(&entry[2..4]);
        let count = order.u32(&entry[4..8]) as usize;
        // SHORT values are left-justified in the 4-byte field.
        let value = match type_id {
            3 => order.u16(&entry[8..10]) as u32,
            _ => order.u32(&entry[8..12]),
        };
        match tag {
            tags::IMAGE_WIDTH => width = Some(value as usize),
            tags::IMAGE_LENGTH => height = Some(value as usize),
            tags::BITS_PER_SAMPLE if count * 2 > 4 => {
                // One value per sample stored out of line; the first one is used.
                let at = order.u32(&entry[8..12]) as usize;
                bits = data.get(at..at + 2).map(|b| order.u16(b)).unwrap_or(8);
            }
            tags::BITS_PER_SAMPLE => bits = value as u16,
            tags::SAMPLE_FORMAT => sample_format = value as u16,
            tags::SAMPLES_PER_PIXEL => samples = value as u16,
            tags::COMPRESSION => {
                attrs.insert("compression".to_string(), json!(value));
            }
            tags::GDAL_NODATA if type_id == 2 => {
                let text = if count <= 4 {
                    &entry[8..8 + count]
                } else {
                    let start = value as usize;
                    data.get(start..start + count).unwrap_or(&[])
                };
                let text = String::from_utf8_lossy(text);
                let text = text.trim_end_matches('\0');
                if let Ok(nodata) = text.parse::<f64>() {
                    attrs.insert("nodata".to_string(), json!(nodata));
                }
            }
            _ => {}
        }
    }

    let width = width.ok_or_else(|| FormatError::invalid(TIFF, "missing ImageWidth"))?;
    let height = height.ok_or_else(|| FormatError::invalid(TIFF, "missing ImageLength"))?;
    attrs.insert("driver".to_string(), json!("GTiff"));

    Ok(RasterArray {
        source: source.to_string(),
        width,
        height,
        bands: samples as usize,
        dtype: tiff_dtype(bits, sample_format),
        attrs,
        backing: None,
    })
}

fn tiff_dtype(bits: u16, sample_format: u16) -> DataType {
    match (sample_format, bits) {
        (1, 8) => DataType::UInt8,
        (1, 16) => DataType::UInt16,
        (1, 32) => DataType::UInt32,
        (1, 64) => DataType::UInt64,
        (2, 8) => DataType::Int8,
        (2, 16) => DataType::Int16,
        (2, 32) => DataType::Int32,
        (2, 64) => DataType::Int64,
        (3, 32) => DataType::Float32,
        (3, 64) => DataType::Float64,
        _ => DataType::Unknown,
    }
}

fn j2k_dtype(bit_depth: u8, signed: bool) -> DataType {
    match (signed, bit_depth) {
        (false, 1..=8) => DataType::UInt8,
        (false, 9..=16) => DataType::UInt16,
        (false, _) => DataType::UInt32,
        (true, 1..=8) => DataType::Int8,
        (true, 9..=16) => DataType::Int16,
        (true, _) => DataType::Int32,
    }
}

/// Walk JP2 boxes looking for the image header inside `jp2h`.
fn decode_jp2(data: &[u8], source: &str) -> FormatResult<RasterArray> {
    let ihdr = find_box(data, JP2_SIGNATURE.len(), b"jp2h")
        .and_then(|(start, end)| find_box(&data[..end], start, b"ihdr"))
        .ok_or_else(|| FormatError::invalid(JP2, "missing jp2h/ihdr box"))?;
    let body = &data[ihdr.0..ihdr.1];
    if body.len() < 14 {
        return Err(FormatError::Truncated {
            format: JP2,
            offset: ihdr.0,
        });
    }
    let height = BigEndian::read_u32(&body[0..4]) as usize;
    let width = BigEndian::read_u32(&body[4..8]) as usize;
    let components = BigEndian::read_u16(&body[8..10]) as usize;
    let bpc = body[10];

    let mut attrs = Map::new();
    attrs.insert("driver".to_string(), json!("JP2OpenJPEG"));
    Ok(RasterArray {
        source: source.to_string(),
        width,
        height,
        bands: components,
        dtype: j2k_dtype((bpc & 0x7f) + 1, bpc & 0x80 != 0),
        attrs,
        backing: None,
    })
}

/// Decode the SIZ marker segment of a raw codestream.
fn decode_codestream(data: &[u8], source: &str) -> FormatResult<RasterArray> {
    // SOC(2) SIZ(2) Lsiz(2) Rsiz(2) Xsiz Ysiz XOsiz YOsiz XTsiz YTsiz XTOsiz YTOsiz Csiz(2) Ssiz..
    if data.len() < 43 {
        return Err(FormatError::Truncated {
            format: JP2,
            offset: 0,
        });
    }
    let xsiz = BigEndian::read_u32(&data[8..12]);
    let ysiz = BigEndian::read_u32(&data[12..16]);
    let xosiz = BigEndian::read_u32(&data[16..20]);
    let yosiz = BigEndian::read_u32(&data[20..24]);
    let components = BigEndian::read_u16(&data[40..42]) as usize;
    let ssiz = data[42];

    let mut attrs = Map::new();
    attrs.insert("driver".to_string(), json!("JP2OpenJPEG"));
    Ok(RasterArray {
        source: source.to_string(),
        width: xsiz.saturating_sub(xosiz) as usize,
        height: ysiz.saturating_sub(yosiz) as usize,
        bands: components,
        dtype: j2k_dtype((ssiz & 0x7f) + 1, ssiz & 0x80 != 0),
        attrs,
        backing: None,
    })
}

/// Find a box of type `kind` starting at `from`; returns its body range.
fn find_box(data: &[u8], from: usize, kind: &[u8; 4]) -> Option<(usize, usize)> {
    let mut pos = from;
    while pos + 8 <= data.len() {
        let length = BigEndian::read_u32(&data[pos..pos + 4]) as usize;
        let box_type = &data[pos + 4..pos + 8];
        let (header, length) = match length {
            0 => (8, data.len() - pos),
            1 if pos + 16 <= data.len() => {
                (16, usize::try_from(BigEndian::read_u64(&data[pos + 8..pos + 16])).ok()?)
            }
            n => (8, n),
        };
        if length < header {
            return None;
        }
        let end = pos.checked_add(length).filter(|&end| end <= data.len())?;
        if box_type == kind {
            return Some((pos + header, end));
        }
        pos = end;
    }
    None
}
