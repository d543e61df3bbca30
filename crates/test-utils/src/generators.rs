//! Synthetic file generators for every supported format.
//!
//! The generated files contain valid headers only; decoders in this
//! workspace never unpack pixel data, so payloads are left out.

use std::io::Write;

use flate2::write::GzEncoder;
use flate2::Compression;

/// One GRIB2 field: (discipline, parameter category, parameter number).
pub type GribField = (u8, u8, u8);

/// Build a single GRIB2 message with a lat/lon grid of `ni` x `nj` points.
///
/// ```
/// use test_utils::grib2_message;
///
/// let msg = grib2_message((0, 0, 0), 4, 3);
/// assert_eq!(&msg[0..4], b"GRIB");
/// assert_eq!(&msg[msg.len() - 4..], b"7777");
/// ```
pub fn grib2_message(field: GribField, ni: u32, nj: u32) -> Vec<u8> {
    let (discipline, category, number) = field;

    let mut body = Vec::new();

    // Section 1: identification, reference time 2024-01-15 06:00:00
    let mut s1 = vec![0u8; 21];
    s1[0..4].copy_from_slice(&21u32.to_be_bytes());
    s1[4] = 1;
    s1[5..7].copy_from_slice(&7u16.to_be_bytes()); // NCEP
    s1[9] = 2;
    s1[10] = 1;
    s1[11] = 1;
    s1[12..14].copy_from_slice(&2024u16.to_be_bytes());
    s1[14] = 1;
    s1[15] = 15;
    s1[16] = 6;
    s1[20] = 1;
    body.extend_from_slice(&s1);

    // Section 3: grid definition, template 3.0
    let mut s3 = vec![0u8; 72];
    s3[0..4].copy_from_slice(&72u32.to_be_bytes());
    s3[4] = 3;
    s3[6..10].copy_from_slice(&(ni * nj).to_be_bytes());
    s3[30..34].copy_from_slice(&ni.to_be_bytes());
    s3[34..38].copy_from_slice(&nj.to_be_bytes());
    body.extend_from_slice(&s3);

    // Section 4: product definition, template 4.0 at the surface
    let mut s4 = vec![0u8; 34];
    s4[0..4].copy_from_slice(&34u32.to_be_bytes());
    s4[4] = 4;
    s4[9] = category;
    s4[10] = number;
    s4[22] = 1;
    body.extend_from_slice(&s4);

    // Section 5: data representation, simple packing
    let mut s5 = vec![0u8; 21];
    s5[0..4].copy_from_slice(&21u32.to_be_bytes());
    s5[4] = 5;
    s5[5..9].copy_from_slice(&(ni * nj).to_be_bytes());
    body.extend_from_slice(&s5);

    // Section 7: empty data section
    body.extend_from_slice(&5u32.to_be_bytes());
    body.push(7);

    let total = 16 + body.len() + 4;
    let mut message = Vec::with_capacity(total);
    message.extend_from_slice(b"GRIB");
    message.extend_from_slice(&[0, 0, discipline, 2]);
    message.extend_from_slice(&(total as u64).to_be_bytes());
    message.extend_from_slice(&body);
    message.extend_from_slice(b"7777");
    message
}

/// Concatenate one message per field.
pub fn grib2_file(fields: &[GribField], ni: u32, nj: u32) -> Vec<u8> {
    fields
        .iter()
        .flat_map(|&field| grib2_message(field, ni, nj))
        .collect()
}

/// Gzip-compress a buffer.
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::fast());
    // Writing into a Vec cannot fail.
    let _ = encoder.write_all(data);
    encoder.finish().unwrap_or_default()
}

/// NetCDF classic variable: name, dimension ids, nc_type code.
pub struct NcVar<'a> {
    pub name: &'a str,
    pub dim_ids: &'a [u32],
    pub nc_type: u32,
    pub units: Option<&'a str>,
}

/// Build a NetCDF classic (CDF-1) header.
///
/// Global attributes are text attributes.
pub fn netcdf_classic(
    dims: &[(&str, u32)],
    global_attrs: &[(&str, &str)],
    vars: &[NcVar<'_>],
) -> Vec<u8> {
    fn name(out: &mut Vec<u8>, s: &str) {
        out.extend_from_slice(&(s.len() as u32).to_be_bytes());
        padded(out, s.as_bytes());
    }
    fn padded(out: &mut Vec<u8>, bytes: &[u8]) {
        out.extend_from_slice(bytes);
        out.extend(std::iter::repeat(0u8).take((4 - bytes.len() % 4) % 4));
    }
    fn text_attrs(out: &mut Vec<u8>, attrs: &[(&str, &str)]) {
        if attrs.is_empty() {
            out.extend_from_slice(&[0u8; 8]);
            return;
        }
        out.extend_from_slice(&0x0Cu32.to_be_bytes());
        out.extend_from_slice(&(attrs.len() as u32).to_be_bytes());
        for (key, value) in attrs {
            name(out, key);
            out.extend_from_slice(&2u32.to_be_bytes());
            out.extend_from_slice(&(value.len() as u32).to_be_bytes());
            padded(out, value.as_bytes());
        }
    }

    let mut out = b"CDF\x01".to_vec();
    out.extend_from_slice(&0u32.to_be_bytes());

    if dims.is_empty() {
        out.extend_from_slice(&[0u8; 8]);
    } else {
        out.extend_from_slice(&0x0Au32.to_be_bytes());
        out.extend_from_slice(&(dims.len() as u32).to_be_bytes());
        for (dim, len) in dims {
            name(&mut out, dim);
            out.extend_from_slice(&len.to_be_bytes());
        }
    }

    text_attrs(&mut out, global_attrs);

    if vars.is_empty() {
        out.extend_from_slice(&[0u8; 8]);
    } else {
        out.extend_from_slice(&0x0Bu32.to_be_bytes());
        out.extend_from_slice(&(vars.len() as u32).to_be_bytes());
        for var in vars {
            name(&mut out, var.name);
            out.extend_from_slice(&(var.dim_ids.len() as u32).to_be_bytes());
            for id in var.dim_ids {
                out.extend_from_slice(&id.to_be_bytes());
            }
            match var.units {
                Some(units) => text_attrs(&mut out, &[("units", units)]),
                None => text_attrs(&mut out, &[]),
            }
            out.extend_from_slice(&var.nc_type.to_be_bytes());
            out.extend_from_slice(&0u32.to_be_bytes()); // vsize
            out.extend_from_slice(&0u32.to_be_bytes()); // begin
        }
    }
    out
}

/// Build a little-endian baseline TIFF header (no strips).
///
/// `sample_format` follows TIFF tag 339: 1 unsigned, 2 signed, 3 float.
pub fn tiff(width: u32, height: u32, bits: u16, sample_format: u16) -> Vec<u8> {
    let entries: [(u16, u16, u32); 6] = [
        (256, 4, width),
        (257, 4, height),
        (258, 3, bits as u32),
        (259, 3, 1),
        (277, 3, 1),
        (339, 3, sample_format as u32),
    ];
    let mut out = b"II*\0".to_vec();
    out.extend_from_slice(&8u32.to_le_bytes());
    out.extend_from_slice(&(entries.len() as u16).to_le_bytes());
    for (tag, type_id, value) in entries {
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&type_id.to_le_bytes());
        out.extend_from_slice(&1u32.to_le_bytes());
        if type_id == 3 {
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        } else {
            out.extend_from_slice(&value.to_le_bytes());
        }
    }
    out.extend_from_slice(&0u32.to_le_bytes());
    out
}

/// Build a JP2 file made of the signature, ftyp and jp2h/ihdr boxes.
pub fn jp2(width: u32, height: u32, components: u16, bit_depth: u8) -> Vec<u8> {
    let mut out = vec![
        0x00, 0x00, 0x00, 0x0C, 0x6A, 0x50, 0x20, 0x20, 0x0D, 0x0A, 0x87, 0x0A,
    ];
    out.extend_from_slice(&20u32.to_be_bytes());
    out.extend_from_slice(b"ftypjp2 ");
    out.extend_from_slice(&0u32.to_be_bytes());
    out.extend_from_slice(b"jp2 ");

    out.extend_from_slice(&30u32.to_be_bytes());
    out.extend_from_slice(b"jp2h");
    out.extend_from_slice(&22u32.to_be_bytes());
    out.extend_from_slice(b"ihdr");
    out.extend_from_slice(&height.to_be_bytes());
    out.extend_from_slice(&width.to_be_bytes());
    out.extend_from_slice(&components.to_be_bytes());
    out.push(bit_depth.saturating_sub(1) & 0x7f);
    out.extend_from_slice(&[7, 0, 0]);
    out
}

/// Build a Zarr v2 `.zmetadata` document with float32 `(y, x)` arrays.
pub fn zmetadata(arrays: &[(&str, usize, usize)]) -> String {
    let mut metadata = serde_json::Map::new();
    metadata.insert(".zgroup".to_string(), serde_json::json!({"zarr_format": 2}));
    metadata.insert(".zattrs".to_string(), serde_json::json!({}));
    for (name, ny, nx) in arrays {
        metadata.insert(
            format!("{}/.zarray", name),
            serde_json::json!({
                "shape": [ny, nx],
                "chunks": [ny, nx],
                "dtype": "<f4",
                "zarr_format": 2
            }),
        );
        metadata.insert(
            format!("{}/.zattrs", name),
            serde_json::json!({"_ARRAY_DIMENSIONS": ["y", "x"]}),
        );
    }
    serde_json::json!({"zarr_consolidated_format": 1, "metadata": metadata}).to_string()
}

/// Build a zip archive holding `members` (name, content).
pub fn zip_archive(members: &[(&str, &[u8])]) -> Vec<u8> {
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = zip::ZipWriter::new(&mut cursor);
        let options = zip::write::SimpleFileOptions::default()
            .compression_method(zip::CompressionMethod::Stored);
        for (name, content) in members {
            if writer.start_file(*name, options).is_ok() {
                let _ = writer.write_all(content);
            }
        }
        let _ = writer.finish();
    }
    cursor.into_inner()
}
