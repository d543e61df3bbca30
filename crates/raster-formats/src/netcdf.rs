//! NetCDF classic (CDF-1) and 64-bit offset (CDF-2) header decoding.
//!
//! The header lists dimensions, global attributes and variables with their
//! own attributes. NetCDF-4 files are HDF5 containers and are reported as
//! unsupported so the caller can try another engine.

use std::path::Path;

use byteorder::{BigEndian, ByteOrder};
use bytes::Bytes;
use serde_json::{json, Map, Value};

use crate::dataset::{DataType, Dataset, Variable};
use crate::error::{FormatError, FormatResult};

const FORMAT: &str = "NetCDF";
const HDF5_MAGIC: &[u8] = b"\x89HDF\r\n\x1a\n";

const NC_DIMENSION: u32 = 0x0A;
const NC_VARIABLE: u32 = 0x0B;
const NC_ATTRIBUTE: u32 = 0x0C;
const STREAMING: u32 = 0xFFFF_FFFF;

/// One dimension of the header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dimension {
    pub name: String,
    /// Zero for the record dimension
    pub length: usize,
}

impl Dimension {
    pub fn is_record(&self) -> bool {
        self.length == 0
    }
}

/// True if `header` starts a NetCDF classic, 64-bit offset or NetCDF-4 file.
pub fn detect(_path: &Path, header: &[u8]) -> bool {
    (header.len() >= 4 && &header[0..3] == b"CDF" && matches!(header[3], 1 | 2 | 5))
        || header.starts_with(HDF5_MAGIC)
}

/// Decode a NetCDF file from the local filesystem.
pub fn decode_path(path: &Path) -> FormatResult<Dataset> {
    let data = std::fs::read(path)?;
    decode_bytes(Bytes::from(data), &path.to_string_lossy())
}

/// Decode a NetCDF header held in memory.
pub fn decode_bytes(data: Bytes, source: &str) -> FormatResult<Dataset> {
    if data.starts_with(HDF5_MAGIC) {
        return Err(FormatError::unsupported(FORMAT, "NetCDF-4/HDF5 container"));
    }
    if data.len() < 4 || &data[0..3] != b"CDF" {
        return Err(FormatError::invalid(FORMAT, "missing CDF magic"));
    }
    let version = data[3];
    let offset_size = match version {
        1 => 4,
        2 => 8,
        5 => return Err(FormatError::unsupported(FORMAT, "CDF-5 64-bit data")),
        other => {
            return Err(FormatError::invalid(
                FORMAT,
                format!("unknown format version {}", other),
            ))
        }
    };

    let mut reader = HeaderReader::new(&data, 4);
    let numrecs = reader.u32()?;
    let numrecs = if numrecs == STREAMING { 0 } else { numrecs as usize };

    let dims = reader.dimensions()?;
    let global_attrs = reader.attributes()?;

    let mut dataset = Dataset::new(source, "netcdf");
    dataset.attrs = global_attrs;
    dataset
        .attrs
        .insert("netcdf_format".to_string(), json!(format!("CDF-{}", version)));

    let var_count = reader.list_header(NC_VARIABLE)?;
    for _ in 0..var_count {
        let name = reader.name()?;
        let ndims = reader.u32()? as usize;
        reader.ensure_entries(ndims, 4)?;
        let mut var_dims = Vec::with_capacity(ndims);
        let mut shape = Vec::with_capacity(ndims);
        for _ in 0..ndims {
            let dim_id = reader.u32()? as usize;
            let dim = dims.get(dim_id).ok_or_else(|| {
                FormatError::invalid(
                    FORMAT,
                    format!("variable '{}' references unknown dimension {}", name, dim_id),
                )
            })?;
            var_dims.push(dim.name.clone());
            shape.push(if dim.is_record() { numrecs } else { dim.length });
        }
        let attrs = reader.attributes()?;
        let dtype = nc_type(reader.u32()?)?;
        let _vsize = reader.u32()?;
        reader.skip(offset_size)?;

        let mut var = Variable::new(var_dims, shape, dtype);
        var.attrs = attrs;
        dataset.add_variable(name, var);
    }

    Ok(dataset.with_backing(data))
}

fn nc_type(code: u32) -> FormatResult<DataType> {
    Ok(match code {
        1 => DataType::Int8,
        2 => DataType::Char,
        3 => DataType::Int16,
        4 => DataType::Int32,
        5 => DataType::Float32,
        6 => DataType::Float64,
        other => {
            return Err(FormatError::invalid(
                FORMAT,
                format!("unknown nc_type {}", other),
            ))
        }
    })
}

struct HeaderReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HeaderReader<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn take(&mut self, n: usize) -> FormatResult<&'a [u8]> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(FormatError::Truncated {
                format: FORMAT,
                offset: self.pos,
            })?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Reject element counts that cannot fit in the remaining header bytes.
    fn ensure_entries(&self, count: usize, min_entry_size: usize) -> FormatResult<()> {
        let remaining = self.data.len() - self.pos;
        match count.checked_mul(min_entry_size) {
            Some(needed) if needed <= remaining => Ok(()),
            _ => Err(FormatError::Truncated {
                format: FORMAT,
                offset: self.pos,
            }),
        }
    }

    fn skip(&mut self, n: usize) -> FormatResult<()> {
        self.take(n).map(|_| ())
    }

    fn u32(&mut self) -> FormatResult<u32> {
        Ok(BigEndian::read_u32(self.take(4)?))
    }

    /// Bytes padded to a 4-byte boundary.
    fn padded(&mut self, n: usize) -> FormatResult<&'a [u8]> {
        let bytes = self.take(n)?;
        let padding = (4 - n % 4) % 4;
        self.skip(padding)?;
        Ok(bytes)
    }

    fn name(&mut self) -> FormatResult<String> {
        let len = self.u32()? as usize;
        let bytes = self.padded(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| FormatError::invalid(FORMAT, "name is not valid UTF-8"))
    }

    /// Read a list tag and its element count. ABSENT lists yield zero.
    fn list_header(&mut self, expected: u32) -> FormatResult<usize> {
        let tag = self.u32()?;
        let count = self.u32()? as usize;
        match tag {
            0 if count == 0 => Ok(0),
            t if t == expected => Ok(count),
            other => Err(FormatError::invalid(
                FORMAT,
                format!("expected list tag {:#x}, found {:#x}", expected, other),
            )),
        }
    }

    fn dimensions(&mut self) -> FormatResult<Vec<Dimension>> {
        let count = self.list_header(NC_DIMENSION)?;
        // name length plus dimension length
        self.ensure_entries(count, 8)?;
        let mut dims = Vec::with_capacity(count);
        for _ in 0..count {
            let name = self.name()?;
            let length = self.u32()? as usize;
            dims.push(Dimension { name, length });
        }
        Ok(dims)
    }

    fn attributes(&mut self) -> FormatResult<Map<String, Value>> {
        let count = self.list_header(NC_ATTRIBUTE)?;
        let mut attrs = Map::new();
        for _ in 0..count {
            let name = self.name()?;
            let dtype = nc_type(self.u32()?)?;
            let nelems = self.u32()? as usize;
            let size = dtype.size().unwrap_or(1);
            let len = nelems.checked_mul(size).ok_or(FormatError::Truncated {
                format: FORMAT,
                offset: self.pos,
            })?;
            let raw = self.padded(len)?;
            attrs.insert(name, attribute_value(dtype, raw));
        }
        Ok(attrs)
    }
}

fn attribute_value(dtype: DataType, raw: &[u8]) -> Value {
    if dtype == DataType::Char {
        let text = String::from_utf8_lossy(raw);
        return json!(text.trim_end_matches('\0'));
    }
    let values: Vec<Value> = match dtype {
        DataType::Int8 => raw.iter().map(|&b| json!(b as i8)).collect(),
        DataType::Int16 => raw.chunks_exact(2).map(|c| json!(BigEndian::read_i16(c))).collect(),
        DataType::Int32 => raw.chunks_exact(4).map(|c| json!(BigEndian::read_i32(c))).collect(),
        DataType::Float32 => raw.chunks_exact(4).map(|c| json!(BigEndian::read_f32(c))).collect(),
        DataType::Float64 => raw.chunks_exact(8).map(|c| json!(BigEndian::read_f64(c))).collect(),
        _ => Vec::new(),
    };
    match values.len() {
        1 => values.into_iter().next().unwrap_or(Value::Null),
        _ => Value::Array(values),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect() {
        assert!(detect(Path::new("a.nc"), b"CDF\x01\0\0\0\0"));
        assert!(detect(Path::new("a.nc"), b"\x89HDF\r\n\x1a\n"));
        assert!(!detect(Path::new("a.nc"), b"GRIB"));
    }

    #[test]
    fn test_hdf5_is_unsupported() {
        let err = decode_bytes(Bytes::from_static(b"\x89HDF\r\n\x1a\n0000"), "x.nc").unwrap_err();
        assert!(matches!(err, FormatError::Unsupported { .. }));
    }

    #[test]
    fn test_truncated_header() {
        let err = decode_bytes(Bytes::from_static(b"CDF\x01\0\0"), "x.nc").unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }));
    }

    #[test]
    fn test_variable_dimension_count_checked_against_header() {
        let mut data = b"CDF\x01".to_vec();
        data.extend_from_slice(&[0u8; 4]); // numrecs
        data.extend_from_slice(&[0u8; 16]); // dims and gatts absent
        data.extend_from_slice(&NC_VARIABLE.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"t\0\0\0");
        data.extend_from_slice(&u32::MAX.to_be_bytes()); // ndims
        let err = decode_bytes(Bytes::from(data), "x.nc").unwrap_err();
        assert!(matches!(err, FormatError::Truncated { .. }));
    }

    #[test]
    fn test_empty_classic_file() {
        let mut data = b"CDF\x01".to_vec();
        data.extend_from_slice(&[0u8; 4]); // numrecs
        data.extend_from_slice(&[0u8; 8]); // dims absent
        data.extend_from_slice(&[0u8; 8]); // gatts absent
        data.extend_from_slice(&[0u8; 8]); // vars absent
        let ds = decode_bytes(Bytes::from(data), "empty.nc").unwrap();
        assert!(ds.variables.is_empty());
        assert_eq!(ds.attrs.get("netcdf_format"), Some(&json!("CDF-1")));
    }
}
