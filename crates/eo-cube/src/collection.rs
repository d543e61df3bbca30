//! Keyed collection of opened datasets and the handles backing them.

use std::collections::HashMap;
use std::fmt;

use raster_formats::Dataset;
use serde_json::{Map, Value};
use storage::AccessHandle;
use tracing::debug;

/// Ordered mapping of keys to datasets.
///
/// Every dataset keeps the handle it was read from in a side table with the
/// same key set. Closing the collection closes both, and happens on drop.
#[derive(Debug, Default)]
pub struct DatasetCollection {
    datasets: Vec<(String, Dataset)>,
    handles: HashMap<String, AccessHandle>,
    closed: bool,
}

impl DatasetCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a dataset with its handle, replacing any entry under `key`.
    pub fn insert(&mut self, key: impl Into<String>, dataset: Dataset, handle: AccessHandle) {
        let key = key.into();
        match self.datasets.iter_mut().find(|(k, _)| *k == key) {
            Some((_, existing)) => {
                existing.close();
                *existing = dataset;
            }
            None => self.datasets.push((key.clone(), dataset)),
        }
        if let Some(mut previous) = self.handles.insert(key, handle) {
            previous.close();
        }
        self.closed = false;
    }

    pub fn get(&self, key: &str) -> Option<&Dataset> {
        self.datasets.iter().find(|(k, _)| k == key).map(|(_, d)| d)
    }

    /// Handle the dataset under `key` was read from.
    pub fn handle(&self, key: &str) -> Option<&AccessHandle> {
        self.handles.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.handles.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.datasets.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Dataset)> {
        self.datasets.iter().map(|(k, d)| (k.as_str(), d))
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }

    /// Sort entries by key.
    pub fn sort(&mut self) {
        self.datasets.sort_by(|(a, _), (b, _)| a.cmp(b));
    }

    /// Merge `attrs` into the attributes of every dataset.
    pub fn set_attrs(&mut self, attrs: &Map<String, Value>) {
        for (_, dataset) in &mut self.datasets {
            dataset.update_attrs(attrs);
        }
    }

    /// Close every dataset and handle. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        if !self.datasets.is_empty() {
            debug!(datasets = self.datasets.len(), "Closing dataset collection");
        }
        for (_, dataset) in &mut self.datasets {
            dataset.close();
        }
        for handle in self.handles.values_mut() {
            handle.close();
        }
        self.closed = true;
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Drop for DatasetCollection {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Display for DatasetCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatasetCollection ({} datasets)", self.datasets.len())?;
        for (key, dataset) in &self.datasets {
            write!(f, "\n  {}: {}", key, dataset)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde_json::json;

    fn entry(key: &str) -> (Dataset, AccessHandle) {
        let address = format!("mem://{}", key);
        (
            Dataset::new(address.clone(), "raster").with_backing(Bytes::from_static(b"abc")),
            AccessHandle::from_bytes(address.into(), Bytes::from_static(b"abc")),
        )
    }

    #[test]
    fn test_keys_match_handles_and_sort() {
        let mut collection = DatasetCollection::new();
        for key in ["B04", "B02", "B03"] {
            let (dataset, handle) = entry(key);
            collection.insert(key, dataset, handle);
        }
        collection.sort();
        assert_eq!(collection.keys().collect::<Vec<_>>(), vec!["B02", "B03", "B04"]);
        assert!(collection.keys().all(|k| collection.handle(k).is_some()));
        assert_eq!(collection.len(), 3);
    }

    #[test]
    fn test_insert_replaces_and_closes_previous() {
        let mut collection = DatasetCollection::new();
        let (first, handle) = entry("a");
        collection.insert("a", first, handle);
        let (second, handle) = entry("a");
        collection.insert("a", second, handle);
        assert_eq!(collection.len(), 1);
        assert!(!collection.get("a").unwrap().is_closed());
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut collection = DatasetCollection::new();
        let (dataset, handle) = entry("a");
        collection.insert("a", dataset, handle);
        collection.close();
        collection.close();
        assert!(collection.is_closed());
        assert!(collection.get("a").unwrap().is_closed());
        assert!(collection.handle("a").unwrap().is_closed());
    }

    #[test]
    fn test_set_attrs_and_display() {
        let mut collection = DatasetCollection::new();
        let (dataset, handle) = entry("data");
        collection.insert("data", dataset, handle);
        let mut props = Map::new();
        props.insert("platform".to_string(), json!("S2A"));
        collection.set_attrs(&props);
        assert_eq!(collection.get("data").unwrap().attrs.get("platform"), Some(&json!("S2A")));
        let text = collection.to_string();
        assert!(text.starts_with("DatasetCollection (1 datasets)"));
        assert!(text.contains("data: Dataset(mem://data"));
    }
}
