//! In-memory dataset model produced by every decoder.

use std::collections::BTreeMap;
use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Element type of a variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Char,
    Unknown,
}

impl DataType {
    /// Size of one element in bytes, if fixed.
    pub fn size(&self) -> Option<usize> {
        match self {
            DataType::Int8 | DataType::UInt8 | DataType::Char => Some(1),
            DataType::Int16 | DataType::UInt16 => Some(2),
            DataType::Int32 | DataType::UInt32 | DataType::Float32 => Some(4),
            DataType::Int64 | DataType::UInt64 | DataType::Float64 => Some(8),
            DataType::Unknown => None,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Int8 => "int8",
            DataType::UInt8 => "uint8",
            DataType::Int16 => "int16",
            DataType::UInt16 => "uint16",
            DataType::Int32 => "int32",
            DataType::UInt32 => "uint32",
            DataType::Int64 => "int64",
            DataType::UInt64 => "uint64",
            DataType::Float32 => "float32",
            DataType::Float64 => "float64",
            DataType::Char => "char",
            DataType::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// A named n-dimensional array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub dims: Vec<String>,
    pub shape: Vec<usize>,
    pub dtype: DataType,
    #[serde(default)]
    pub attrs: Map<String, Value>,
}

impl Variable {
    pub fn new(dims: Vec<String>, shape: Vec<usize>, dtype: DataType) -> Self {
        Self {
            dims,
            shape,
            dtype,
            attrs: Map::new(),
        }
    }

    /// Total number of elements.
    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A decoded dataset: named variables plus global attributes.
#[derive(Debug, Clone)]
pub struct Dataset {
    /// Address or path the dataset was decoded from
    pub source: String,
    /// Name of the engine that decoded it
    pub engine: String,
    pub variables: BTreeMap<String, Variable>,
    pub attrs: Map<String, Value>,
    backing: Option<Bytes>,
    closed: bool,
}

impl Dataset {
    pub fn new(source: impl Into<String>, engine: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            engine: engine.into(),
            variables: BTreeMap::new(),
            attrs: Map::new(),
            backing: None,
            closed: false,
        }
    }

    /// Keep the raw bytes the dataset was decoded from until it is closed.
    pub fn with_backing(mut self, bytes: Bytes) -> Self {
        self.backing = Some(bytes);
        self
    }

    pub fn add_variable(&mut self, name: impl Into<String>, variable: Variable) {
        self.variables.insert(name.into(), variable);
    }

    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    pub fn variable_names(&self) -> impl Iterator<Item = &str> {
        self.variables.keys().map(String::as_str)
    }

    /// Merge `attrs` into the global attributes, overwriting existing keys.
    pub fn update_attrs(&mut self, attrs: &Map<String, Value>) {
        for (key, value) in attrs {
            self.attrs.insert(key.clone(), value.clone());
        }
    }

    /// Size of the retained raw bytes.
    pub fn backing_len(&self) -> usize {
        self.backing.as_ref().map(Bytes::len).unwrap_or(0)
    }

    /// Release the retained bytes. Calling it again is a no-op.
    pub fn close(&mut self) {
        self.backing = None;
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl fmt::Display for Dataset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Dataset({}, engine={}, variables=[", self.source, self.engine)?;
        for (i, (name, var)) in self.variables.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}{:?}: {}", name, var.shape, var.dtype)?;
        }
        f.write_str("])")
    }
}

/// Single-band raster array as returned by band-oriented decoders.
#[derive(Debug, Clone)]
pub struct RasterArray {
    pub source: String,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub dtype: DataType,
    pub attrs: Map<String, Value>,
    pub backing: Option<Bytes>,
}

impl RasterArray {
    /// Wrap the array as a one-variable dataset under `name`.
    pub fn into_dataset(self, name: &str, engine: &str) -> Dataset {
        let variable = Variable {
            dims: vec!["band".to_string(), "y".to_string(), "x".to_string()],
            shape: vec![self.bands, self.height, self.width],
            dtype: self.dtype,
            attrs: self.attrs,
        };
        let mut dataset = Dataset::new(self.source, engine);
        dataset.add_variable(name, variable);
        if let Some(bytes) = self.backing {
            dataset = dataset.with_backing(bytes);
        }
        dataset
    }
}
