//! Zarr store decoding from consolidated metadata.
//!
//! Version 2 stores expose a `.zmetadata` document, version 3 stores a
//! `zarr.json` root with `consolidated_metadata`. Chunks are not read.

use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::debug;

use crate::dataset::{DataType, Dataset, Variable};
use crate::error::{FormatError, FormatResult};

const FORMAT: &str = "Zarr";

/// Consolidated metadata file names, in lookup order.
pub const METADATA_FILES: &[&str] = &[".zmetadata", "zarr.json"];

#[derive(Debug, Deserialize)]
struct ConsolidatedV2 {
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ArrayMetaV2 {
    shape: Vec<usize>,
    dtype: Value,
}

#[derive(Debug, Deserialize)]
struct RootV3 {
    zarr_format: u8,
    #[serde(default)]
    attributes: Map<String, Value>,
    consolidated_metadata: Option<ConsolidatedV3>,
}

#[derive(Debug, Deserialize)]
struct ConsolidatedV3 {
    metadata: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct NodeV3 {
    node_type: String,
    #[serde(default)]
    shape: Vec<usize>,
    #[serde(default)]
    data_type: Value,
    #[serde(default)]
    dimension_names: Option<Vec<Option<String>>>,
    #[serde(default)]
    attributes: Map<String, Value>,
}

/// True for a store directory or a consolidated metadata document.
pub fn detect(path: &Path, header: &[u8]) -> bool {
    if path.is_dir() {
        return METADATA_FILES.iter().any(|name| path.join(name).is_file());
    }
    let is_metadata_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| METADATA_FILES.contains(&n))
        .unwrap_or(false);
    let trimmed = header
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .map(|pos| &header[pos..])
        .unwrap_or(&[]);
    is_metadata_name && trimmed.starts_with(b"{")
}

/// Decode a store directory or a metadata document on the local filesystem.
pub fn decode_path(path: &Path) -> FormatResult<Dataset> {
    let document = if path.is_dir() {
        METADATA_FILES
            .iter()
            .map(|name| path.join(name))
            .find(|candidate| candidate.is_file())
            .ok_or_else(|| {
                FormatError::invalid(FORMAT, format!("no consolidated metadata in {}", path.display()))
            })?
    } else {
        path.to_path_buf()
    };
    debug!(store = %path.display(), metadata = %document.display(), "Reading Zarr metadata");
    let data = std::fs::read(&document)?;
    decode_bytes(&data, &path.to_string_lossy())
}

/// Decode a consolidated metadata document.
pub fn decode_bytes(data: &[u8], source: &str) -> FormatResult<Dataset> {
    let root: Value = serde_json::from_slice(data)?;
    let mut dataset = Dataset::new(source, "zarr");

    match root.get("zarr_format").and_then(Value::as_u64) {
        Some(3) => decode_v3(serde_json::from_value(root)?, &mut dataset)?,
        _ if root.get("metadata").is_some() => {
            decode_v2(serde_json::from_value(root)?, &mut dataset)?
        }
        _ => {
            return Err(FormatError::invalid(
                FORMAT,
                "document is neither .zmetadata nor a v3 root",
            ))
        }
    }
    Ok(dataset)
}

fn decode_v2(doc: ConsolidatedV2, dataset: &mut Dataset) -> FormatResult<()> {
    dataset
        .attrs
        .insert("zarr_format".to_string(), Value::from(2));
    if let Some(Value::Object(attrs)) = doc.metadata.get(".zattrs") {
        dataset.attrs.extend(attrs.clone());
    }

    for (key, value) in &doc.metadata {
        let Some(name) = key.strip_suffix("/.zarray") else {
            continue;
        };
        let meta: ArrayMetaV2 = serde_json::from_value(value.clone())?;
        let attrs = match doc.metadata.get(&format!("{}/.zattrs", name)) {
            Some(Value::Object(attrs)) => attrs.clone(),
            _ => Map::new(),
        };
        let dims = match attrs.get("_ARRAY_DIMENSIONS") {
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| n.as_str().unwrap_or_default().to_string())
                .collect(),
            _ => default_dims(meta.shape.len()),
        };
        let mut var = Variable::new(dims, meta.shape, v2_dtype(&meta.dtype));
        var.attrs = attrs;
        var.attrs.remove("_ARRAY_DIMENSIONS");
        dataset.add_variable(name, var);
    }
    Ok(())
}

fn decode_v3(root: RootV3, dataset: &mut Dataset) -> FormatResult<()> {
    dataset
        .attrs
        .insert("zarr_format".to_string(), Value::from(root.zarr_format));
    dataset.attrs.extend(root.attributes);

    let consolidated = root.consolidated_metadata.ok_or_else(|| {
        FormatError::unsupported(FORMAT, "v3 store without consolidated metadata")
    })?;
    for (name, value) in consolidated.metadata {
        let node: NodeV3 = serde_json::from_value(value)?;
        if node.node_type != "array" {
            continue;
        }
        let dims = match node.dimension_names {
            Some(names) => names
                .into_iter()
                .enumerate()
                .map(|(i, n)| n.unwrap_or_else(|| format!("dim_{}", i)))
                .collect(),
            None => default_dims(node.shape.len()),
        };
        let dtype = node
            .data_type
            .as_str()
            .map(v3_dtype)
            .unwrap_or(DataType::Unknown);
        let mut var = Variable::new(dims, node.shape, dtype);
        var.attrs = node.attributes;
        dataset.add_variable(name, var);
    }
    Ok(())
}

fn default_dims(ndim: usize) -> Vec<String> {
    (0..ndim).map(|i| format!("dim_{}", i)).collect()
}

/// Numpy type string such as `<f4` or `|u1`.
fn v2_dtype(dtype: &Value) -> DataType {
    let Some(s) = dtype.as_str() else {
        return DataType::Unknown;
    };
    let s = s.trim_start_matches(['<', '>', '|', '=']);
    match s {
        "i1" => DataType::Int8,
        "u1" | "b1" => DataType::UInt8,
        "i2" => DataType::Int16,
        "u2" => DataType::UInt16,
        "i4" => DataType::Int32,
        "u4" => DataType::UInt32,
        "i8" => DataType::Int64,
        "u8" => DataType::UInt64,
        "f4" => DataType::Float32,
        "f8" => DataType::Float64,
        _ if s.starts_with('S') || s.starts_with('U') => DataType::Char,
        _ => DataType::Unknown,
    }
}

fn v3_dtype(name: &str) -> DataType {
    match name {
        "int8" => DataType::Int8,
        "uint8" | "bool" => DataType::UInt8,
        "int16" => DataType::Int16,
        "uint16" => DataType::UInt16,
        "int32" => DataType::Int32,
        "uint32" => DataType::UInt32,
        "int64" => DataType::Int64,
        "uint64" => DataType::UInt64,
        "float32" => DataType::Float32,
        "float64" => DataType::Float64,
        _ => DataType::Unknown,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_v2_consolidated() {
        let doc = json!({
            "zarr_consolidated_format": 1,
            "metadata": {
                ".zgroup": {"zarr_format": 2},
                ".zattrs": {"title": "cube"},
                "t2m/.zarray": {"shape": [3, 4], "dtype": "<f4", "chunks": [3, 4]},
                "t2m/.zattrs": {"_ARRAY_DIMENSIONS": ["y", "x"], "units": "K"}
            }
        });
        let ds = decode_bytes(doc.to_string().as_bytes(), "s.zarr").unwrap();
        let var = ds.variable("t2m").unwrap();
        assert_eq!(var.dims, vec!["y", "x"]);
        assert_eq!(var.shape, vec![3, 4]);
        assert_eq!(var.dtype, DataType::Float32);
        assert_eq!(var.attrs.get("units"), Some(&json!("K")));
        assert!(var.attrs.get("_ARRAY_DIMENSIONS").is_none());
        assert_eq!(ds.attrs.get("title"), Some(&json!("cube")));
    }

    #[test]
    fn test_decode_v3_consolidated() {
        let doc = json!({
            "zarr_format": 3,
            "node_type": "group",
            "attributes": {"source": "test"},
            "consolidated_metadata": {
                "kind": "inline",
                "metadata": {
                    "band": {"node_type": "array", "shape": [10], "data_type": "uint16",
                             "dimension_names": ["x"]},
                    "sub": {"node_type": "group"}
                }
            }
        });
        let ds = decode_bytes(doc.to_string().as_bytes(), "s.zarr").unwrap();
        assert_eq!(ds.variables.len(), 1);
        assert_eq!(ds.variable("band").unwrap().dtype, DataType::UInt16);
    }

    #[test]
    fn test_v3_without_consolidation_is_unsupported() {
        let doc = json!({"zarr_format": 3, "node_type": "group"});
        let err = decode_bytes(doc.to_string().as_bytes(), "s.zarr").unwrap_err();
        assert!(matches!(err, FormatError::Unsupported { .. }));
    }

    #[test]
    fn test_not_json() {
        let err = decode_bytes(b"CDF\x01", "x").unwrap_err();
        assert!(matches!(err, FormatError::Json(_)));
    }
}
