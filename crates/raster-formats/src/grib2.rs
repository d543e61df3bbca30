//! GRIB2 (WMO FM 92 edition 2) message scanning.
//!
//! Every product definition section found in a file becomes one variable
//! whose shape comes from the grid definition preceding it. Data sections
//! are not unpacked.

use std::io::Read;
use std::path::Path;

use bytes::Bytes;
use chrono::{DateTime, NaiveDate, Utc};
use flate2::read::GzDecoder;
use serde_json::{json, Map, Value};
use tracing::debug;

use crate::dataset::{DataType, Dataset, Variable};
use crate::error::{FormatError, FormatResult};

const FORMAT: &str = "GRIB2";
/// Upper bound for an inflated `.grib2.gz` file
const MAX_DECOMPRESSED_LEN: u64 = 4 * 1024 * 1024 * 1024;
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Identification fields of a message (section 1).
#[derive(Debug, Clone)]
pub struct Identification {
    pub center: u16,
    pub sub_center: u16,
    pub reference_time: DateTime<Utc>,
}

/// Grid size from section 3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridShape {
    pub template: u16,
    pub ni: u32,
    pub nj: u32,
}

/// One field described by a section 4.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    pub discipline: u8,
    pub parameter_category: u8,
    pub parameter_number: u8,
    pub level_type: u8,
    pub level_value: u32,
    pub grid: GridShape,
}

impl FieldInfo {
    pub fn short_name(&self) -> String {
        parameter_short_name(self.discipline, self.parameter_category, self.parameter_number)
    }
}

/// True if `header` starts a GRIB2 file, plain or gzip-compressed.
pub fn detect(path: &Path, header: &[u8]) -> bool {
    if header.starts_with(b"GRIB") {
        return header.get(7) == Some(&2) || header.len() < 8;
    }
    header.starts_with(&GZIP_MAGIC)
        && path
            .to_str()
            .map(|p| {
                let p = p.to_lowercase();
                p.ends_with(".grib2.gz") || p.ends_with(".grb2.gz")
            })
            .unwrap_or(false)
}

/// Decode a GRIB2 file from the local filesystem.
pub fn decode_path(path: &Path) -> FormatResult<Dataset> {
    let raw = std::fs::read(path)?;
    let data = if raw.starts_with(&GZIP_MAGIC) {
        let out = gunzip(&raw, MAX_DECOMPRESSED_LEN)?;
        debug!(path = %path.display(), compressed = raw.len(), size = out.len(), "Decompressed GRIB2 file");
        out
    } else {
        raw
    };
    decode_bytes(Bytes::from(data), &path.to_string_lossy())
}

/// Inflate a gzip stream, refusing output larger than `limit` bytes.
fn gunzip(raw: &[u8], limit: u64) -> FormatResult<Vec<u8>> {
    let mut out = Vec::new();
    GzDecoder::new(raw).take(limit + 1).read_to_end(&mut out)?;
    if out.len() as u64 > limit {
        return Err(FormatError::unsupported(
            FORMAT,
            format!("decompressed size exceeds {} bytes", limit),
        ));
    }
    Ok(out)
}

/// Decode GRIB2 messages held in memory.
pub fn decode_bytes(data: Bytes, source: &str) -> FormatResult<Dataset> {
    let (identification, fields) = scan_messages(&data)?;

    let mut dataset = Dataset::new(source, "grib2");
    dataset.attrs.insert("GRIB_edition".to_string(), json!(2));
    dataset.attrs.insert("GRIB_centre".to_string(), json!(identification.center));
    dataset
        .attrs
        .insert("GRIB_subCentre".to_string(), json!(identification.sub_center));
    dataset.attrs.insert(
        "reference_time".to_string(),
        json!(identification.reference_time.to_rfc3339()),
    );
    dataset
        .attrs
        .insert("GRIB_fields".to_string(), json!(fields.len()));

    for (index, field) in fields.iter().enumerate() {
        let mut name = field.short_name();
        if dataset.variables.contains_key(&name) {
            name = format!("{}_{}_{}", name, field.level_type, field.level_value);
        }
        if dataset.variables.contains_key(&name) {
            name = format!("{}_{}", name, index);
        }

        let mut var = Variable::new(
            vec!["y".to_string(), "x".to_string()],
            vec![field.grid.nj as usize, field.grid.ni as usize],
            DataType::Float32,
        );
        let attrs: &mut Map<String, Value> = &mut var.attrs;
        attrs.insert("GRIB_discipline".to_string(), json!(field.discipline));
        attrs.insert("GRIB_parameterCategory".to_string(), json!(field.parameter_category));
        attrs.insert("GRIB_parameterNumber".to_string(), json!(field.parameter_number));
        attrs.insert("GRIB_typeOfFirstFixedSurface".to_string(), json!(field.level_type));
        attrs.insert("GRIB_level".to_string(), json!(field.level_value));
        attrs.insert("GRIB_gridDefinitionTemplate".to_string(), json!(field.grid.template));
        dataset.add_variable(name, var);
    }

    Ok(dataset.with_backing(data))
}

/// Walk every message of the buffer.
///
/// Returns the identification of the first message and one entry per
/// product definition section.
pub fn scan_messages(data: &[u8]) -> FormatResult<(Identification, Vec<FieldInfo>)> {
    let mut offset = find_magic(data, 0)
        .ok_or_else(|| FormatError::invalid(FORMAT, "no GRIB indicator found"))?;
    let mut first_identification = None;
    let mut fields = Vec::new();

    while offset + 16 <= data.len() {
        let edition = data[offset + 7];
        if edition != 2 {
            return Err(FormatError::unsupported(
                FORMAT,
                format!("GRIB edition {} at offset {}", edition, offset),
            ));
        }
        let discipline = data[offset + 6];
        let message_length = u64::from_be_bytes([
            data[offset + 8],
            data[offset + 9],
            data[offset + 10],
            data[offset + 11],
            data[offset + 12],
            data[offset + 13],
            data[offset + 14],
            data[offset + 15],
        ]) as usize;
        let end = offset
            .checked_add(message_length)
            .filter(|&end| end <= data.len() && message_length >= 20)
            .ok_or(FormatError::Truncated {
                format: FORMAT,
                offset,
            })?;
        let message = &data[offset..end];
        if &message[message.len() - 4..] != b"7777" {
            return Err(FormatError::invalid(
                FORMAT,
                format!("message at offset {} does not end with 7777", offset),
            ));
        }

        let identification = parse_message(message, discipline, &mut fields)?;
        if first_identification.is_none() {
            first_identification = Some(identification);
        }

        match find_magic(data, end) {
            Some(next) => offset = next,
            None => break,
        }
    }

    let identification = first_identification.ok_or(FormatError::Truncated {
        format: FORMAT,
        offset: 0,
    })?;
    Ok((identification, fields))
}

fn parse_message(
    message: &[u8],
    discipline: u8,
    fields: &mut Vec<FieldInfo>,
) -> FormatResult<Identification> {
    let mut identification = None;
    let mut grid = None;
    let mut offset = 16;
    let body_end = message.len() - 4;

    while offset + 5 <= body_end {
        let section_length = u32::from_be_bytes([
            message[offset],
            message[offset + 1],
            message[offset + 2],
            message[offset + 3],
        ]) as usize;
        if section_length < 5 || offset + section_length > body_end {
            return Err(FormatError::invalid(
                FORMAT,
                format!("invalid section length {} at offset {}", section_length, offset),
            ));
        }
        let section = &message[offset..offset + section_length];

        match section[4] {
            1 => identification = Some(parse_identification(section)?),
            3 => grid = Some(parse_grid_shape(section)?),
            4 => {
                let grid = grid.ok_or_else(|| {
                    FormatError::invalid(FORMAT, "product definition before grid definition")
                })?;
                fields.push(parse_product_definition(section, discipline, grid)?);
            }
            _ => {}
        }
        offset += section_length;
    }

    identification.ok_or_else(|| FormatError::invalid(FORMAT, "missing identification section"))
}

fn parse_identification(section: &[u8]) -> FormatResult<Identification> {
    if section.len() < 19 {
        return Err(FormatError::invalid(FORMAT, "identification section too short"));
    }
    let center = u16::from_be_bytes([section[5], section[6]]);
    let sub_center = u16::from_be_bytes([section[7], section[8]]);
    let year = u16::from_be_bytes([section[12], section[13]]);
    let (month, day, hour, minute, second) =
        (section[14], section[15], section[16], section[17], section[18]);

    let reference_time = NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
        .and_then(|date| date.and_hms_opt(hour as u32, minute as u32, second as u32))
        .ok_or_else(|| {
            FormatError::invalid(
                FORMAT,
                format!(
                    "invalid reference time {}-{:02}-{:02} {:02}:{:02}:{:02}",
                    year, month, day, hour, minute, second
                ),
            )
        })?;

    Ok(Identification {
        center,
        sub_center,
        reference_time: DateTime::<Utc>::from_naive_utc_and_offset(reference_time, Utc),
    })
}

fn parse_grid_shape(section: &[u8]) -> FormatResult<GridShape> {
    // Ni and Nj sit at the same template offsets for the lat/lon,
    // rotated, gaussian and polar stereographic templates.
    if section.len() < 38 {
        return Err(FormatError::invalid(FORMAT, "grid definition section too short"));
    }
    let template = u16::from_be_bytes([section[12], section[13]]);
    let ni = u32::from_be_bytes([section[30], section[31], section[32], section[33]]);
    let nj = u32::from_be_bytes([section[34], section[35], section[36], section[37]]);
    Ok(GridShape { template, ni, nj })
}

fn parse_product_definition(
    section: &[u8],
    discipline: u8,
    grid: GridShape,
) -> FormatResult<FieldInfo> {
    if section.len() < 11 {
        return Err(FormatError::invalid(FORMAT, "product definition section too short"));
    }
    let level_type = section.get(22).copied().unwrap_or(1);
    let level_value = if section.len() >= 28 {
        u32::from_be_bytes([section[24], section[25], section[26], section[27]])
    } else {
        0
    };
    Ok(FieldInfo {
        discipline,
        parameter_category: section[9],
        parameter_number: section[10],
        level_type,
        level_value,
        grid,
    })
}

fn find_magic(data: &[u8], from: usize) -> Option<usize> {
    if from >= data.len() {
        return None;
    }
    data[from..]
        .windows(4)
        .position(|w| w == b"GRIB")
        .map(|pos| from + pos)
}

/// Short name of a parameter (WMO code table 4.2 subset).
pub fn parameter_short_name(discipline: u8, category: u8, number: u8) -> String {
    let name = match (discipline, category, number) {
        (0, 0, 0) => "TMP",
        (0, 0, 6) => "DPT",
        (0, 1, 1) => "RH",
        (0, 1, 8) => "APCP",
        (0, 2, 2) => "UGRD",
        (0, 2, 3) => "VGRD",
        (0, 3, 0) => "PRES",
        (0, 3, 1) => "PRMSL",
        (0, 3, 5) => "HGT",
        (0, 6, 1) => "TCDC",
        (0, 16, 196) => "REFC",
        _ => return format!("var{}_{}_{}", discipline, category, number),
    };
    name.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gunzip_limit() {
        use flate2::{write::GzEncoder, Compression};
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&[0u8; 4096]).unwrap();
        let raw = encoder.finish().unwrap();

        assert_eq!(gunzip(&raw, 4096).unwrap().len(), 4096);
        let err = gunzip(&raw, 1024).unwrap_err();
        assert!(matches!(err, FormatError::Unsupported { .. }));
    }

    #[test]
    fn test_short_names() {
        assert_eq!(parameter_short_name(0, 0, 0), "TMP");
        assert_eq!(parameter_short_name(0, 3, 1), "PRMSL");
        assert_eq!(parameter_short_name(10, 0, 3), "var10_0_3");
    }

    #[test]
    fn test_detect() {
        assert!(detect(Path::new("a.grib2"), b"GRIB\0\0\0\x02"));
        assert!(!detect(Path::new("a.grib2"), b"GRIB\0\0\0\x01"));
        assert!(detect(Path::new("gfs.grib2.gz"), &[0x1f, 0x8b, 8, 0]));
        assert!(!detect(Path::new("x.tar.gz"), &[0x1f, 0x8b, 8, 0]));
    }

    #[test]
    fn test_rejects_non_grib() {
        let err = decode_bytes(Bytes::from_static(b"CDF\x01 not grib"), "x").unwrap_err();
        assert!(matches!(err, FormatError::InvalidFormat { .. }));
    }
}
