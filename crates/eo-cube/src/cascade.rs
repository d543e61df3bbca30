//! Opening a handle by trying decode engines in order.

use std::io::Read;
use std::path::Path;
use std::sync::Arc;

use eo_common::{AccessError, AccessResult};
use raster_formats::{Dataset, SNIFF_LEN};
use storage::{AccessHandle, HandleState};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

use crate::engines::{EngineInput, EngineRegistry};
use crate::hints::{ExtensionHints, FormatHintProvider};

/// Per-call options of the cascade.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpenOptions {
    /// Engine to use instead of guessing
    pub engine: Option<String>,
}

impl OpenOptions {
    pub fn with_engine(engine: impl Into<String>) -> Self {
        Self {
            engine: Some(engine.into()),
        }
    }
}

/// A decoded dataset and the handle it was read from.
#[derive(Debug)]
pub struct OpenedDataset {
    pub dataset: Dataset,
    pub handle: AccessHandle,
    /// Engine that succeeded
    pub engine: String,
    /// Engines tried, in order, the successful one last
    pub attempts: Vec<String>,
}

/// Opens handles whose encoding is not known up front.
#[derive(Clone)]
pub struct EngineCascadeOpener {
    registry: Arc<EngineRegistry>,
    hints: Arc<dyn FormatHintProvider>,
}

impl std::fmt::Debug for EngineCascadeOpener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineCascadeOpener")
            .field("engines", &self.registry.names())
            .finish_non_exhaustive()
    }
}

impl Default for EngineCascadeOpener {
    fn default() -> Self {
        Self::new(Arc::new(EngineRegistry::builtin()), Arc::new(ExtensionHints))
    }
}

impl EngineCascadeOpener {
    pub fn new(registry: Arc<EngineRegistry>, hints: Arc<dyn FormatHintProvider>) -> Self {
        Self { registry, hints }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    /// Open `handle` with the first engine that accepts it.
    ///
    /// Local handles with several candidate engines are opened once by
    /// magic-byte detection and fail with `LocalOpenFailed`. Otherwise the
    /// candidates are tried in order, local-only engines skipped for remote
    /// handles, until one succeeds or `DecodeEngineExhausted` is returned.
    #[instrument(skip_all, fields(address = %handle.address()))]
    pub async fn open(
        &self,
        handle: AccessHandle,
        options: &OpenOptions,
        cancel: &CancellationToken,
    ) -> AccessResult<OpenedDataset> {
        if cancel.is_cancelled() {
            return Err(AccessError::Cancelled);
        }

        let candidates = match &options.engine {
            Some(engine) => vec![engine.clone()],
            None => {
                let hinted = tokio::select! {
                    _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                    hinted = self.hints.guess_engines(&handle, &self.registry) => hinted,
                };
                if hinted.is_empty() {
                    self.registry.names().into_iter().map(str::to_string).collect()
                } else {
                    hinted
                }
            }
        };
        debug!(candidates = ?candidates, local = handle.is_local(), "Engine candidates");

        if handle.is_local() && candidates.len() > 1 {
            return self.auto_detect(handle, cancel).await;
        }

        let candidates: Vec<String> = if handle.is_local() {
            candidates
        } else {
            candidates
                .into_iter()
                .filter(|name| match self.registry.get(name) {
                    Some(engine) if engine.local_only => {
                        debug!(engine = %name, "Skipping local-only engine for remote handle");
                        false
                    }
                    _ => true,
                })
                .collect()
        };

        self.try_candidates(handle, candidates, cancel).await
    }

    async fn try_candidates(
        &self,
        handle: AccessHandle,
        candidates: Vec<String>,
        cancel: &CancellationToken,
    ) -> AccessResult<OpenedDataset> {
        let address = handle.address().without_nested_prefix().to_string();
        let mut current = handle;
        let mut attempts = Vec::with_capacity(candidates.len());

        for name in candidates {
            if cancel.is_cancelled() {
                return Err(AccessError::Cancelled);
            }
            if current.state() != HandleState::Fresh {
                match current.reopen() {
                    Ok(fresh) => current = fresh,
                    Err(e) => debug!(error = %e, "Reopen failed, reusing current handle"),
                }
            }
            attempts.push(name.clone());

            let Some(engine) = self.registry.get(&name).copied() else {
                debug!(engine = %name, "Unknown engine");
                continue;
            };

            let input = match current.local_path() {
                Some(path) => EngineInput::Path(path.to_path_buf()),
                None => {
                    let was_fresh = current.state() == HandleState::Fresh;
                    let read = tokio::select! {
                        _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                        read = current.read_all() => read,
                    };
                    match read {
                        Ok(bytes) => EngineInput::Buffer {
                            bytes,
                            source: address.clone(),
                        },
                        // The resource itself is unreachable; no engine can help.
                        Err(e) if was_fresh => return Err(e),
                        Err(e) => {
                            debug!(engine = %name, error = %e, "Cannot read handle");
                            continue;
                        }
                    }
                }
            };

            let decoded = tokio::select! {
                _ = cancel.cancelled() => return Err(AccessError::Cancelled),
                joined = tokio::task::spawn_blocking(move || engine.decode(input)) => joined,
            };
            match decoded {
                Ok(Ok(dataset)) => {
                    debug!(engine = %name, attempts = attempts.len(), "Dataset opened");
                    return Ok(OpenedDataset {
                        dataset,
                        handle: current,
                        engine: name,
                        attempts,
                    });
                }
                Ok(Err(e)) => debug!(engine = %name, error = %e, "Engine could not open dataset"),
                Err(e) => debug!(engine = %name, error = %e, "Decode task failed"),
            }
        }

        Err(AccessError::DecodeEngineExhausted {
            address,
            tried: attempts,
        })
    }

    async fn auto_detect(
        &self,
        handle: AccessHandle,
        cancel: &CancellationToken,
    ) -> AccessResult<OpenedDataset> {
        let path = handle.local_path().map(Path::to_path_buf).unwrap_or_default();
        let registry = self.registry.clone();
        let target = path.clone();

        let task = tokio::task::spawn_blocking(move || -> Result<(Dataset, &'static str), String> {
            let header = read_header(&target).map_err(|e| e.to_string())?;
            let engine = registry
                .detect(&target, &header)
                .copied()
                .ok_or_else(|| "no engine recognizes the file".to_string())?;
            engine
                .decode(EngineInput::Path(target))
                .map(|dataset| (dataset, engine.name))
                .map_err(|e| format!("{}: {}", engine.name, e))
        });

        let joined = tokio::select! {
            _ = cancel.cancelled() => return Err(AccessError::Cancelled),
            joined = task => joined,
        };
        let local_failure = |reason: String| AccessError::LocalOpenFailed {
            path: path.display().to_string(),
            reason,
        };
        let (dataset, engine) = joined
            .map_err(|e| local_failure(format!("detection task failed: {}", e)))?
            .map_err(local_failure)?;

        debug!(engine = %engine, "Dataset opened by detection");
        Ok(OpenedDataset {
            dataset,
            handle,
            engine: engine.to_string(),
            attempts: vec![engine.to_string()],
        })
    }
}

/// First bytes of a file; empty for directories.
fn read_header(path: &Path) -> std::io::Result<Vec<u8>> {
    if path.is_dir() {
        return Ok(Vec::new());
    }
    let mut header = Vec::with_capacity(SNIFF_LEN);
    std::fs::File::open(path)?
        .take(SNIFF_LEN as u64)
        .read_to_end(&mut header)?;
    Ok(header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use raster_formats::{FormatError, FormatResult};

    use crate::engines::{EngineDecoder, EngineDescriptor};

    fn refuse(_: EngineInput) -> FormatResult<Dataset> {
        Err(FormatError::Unsupported {
            format: "test",
            reason: "refused".to_string(),
        })
    }

    fn accept(input: EngineInput) -> FormatResult<Dataset> {
        Ok(Dataset::new(input.source(), "accept"))
    }

    fn never(_: &Path, _: &[u8]) -> bool {
        false
    }

    fn engine(
        name: &'static str,
        local_only: bool,
        decode: fn(EngineInput) -> FormatResult<Dataset>,
    ) -> EngineDescriptor {
        EngineDescriptor {
            name,
            local_only,
            extensions: &[],
            detect: never,
            decoder: EngineDecoder::Dataset(decode),
        }
    }

    fn opener(engines: Vec<EngineDescriptor>) -> EngineCascadeOpener {
        EngineCascadeOpener::new(Arc::new(EngineRegistry::new(engines)), Arc::new(ExtensionHints))
    }

    #[tokio::test]
    async fn test_first_success_stops_cascade() {
        let opener = opener(vec![
            engine("a", false, refuse),
            engine("b", false, accept),
            engine("c", false, accept),
        ]);
        let handle = AccessHandle::from_bytes("s3://bucket/blob".into(), Bytes::from_static(b"x"));
        let opened = opener
            .open(handle, &OpenOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(opened.engine, "b");
        assert_eq!(opened.attempts, vec!["a", "b"]);
        assert_eq!(opened.dataset.source, "s3://bucket/blob");
    }

    #[tokio::test]
    async fn test_remote_skips_local_only() {
        let opener = opener(vec![engine("local", true, accept), engine("remote", false, refuse)]);
        let handle = AccessHandle::from_bytes("https://host/blob".into(), Bytes::new());
        let err = opener
            .open(handle, &OpenOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        match err {
            AccessError::DecodeEngineExhausted { tried, .. } => assert_eq!(tried, vec!["remote"]),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_explicit_engine() {
        let opener = opener(vec![engine("a", false, accept), engine("b", false, accept)]);
        let handle = AccessHandle::from_bytes("s3://bucket/blob".into(), Bytes::new());
        let opened = opener
            .open(handle, &OpenOptions::with_engine("b"), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(opened.attempts, vec!["b"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_open() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = AccessHandle::from_bytes("s3://bucket/blob".into(), Bytes::new());
        let err = EngineCascadeOpener::default()
            .open(handle, &OpenOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::Cancelled));
    }

    #[tokio::test]
    async fn test_local_detection_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_utils::write_file(dir.path(), "notes.bin", b"plain text");
        let err = EngineCascadeOpener::default()
            .open(AccessHandle::local(&path), &OpenOptions::default(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AccessError::LocalOpenFailed { .. }));
    }

    #[tokio::test]
    async fn test_local_detection_success() {
        let dir = tempfile::tempdir().unwrap();
        let path = test_utils::write_file(dir.path(), "granule.bin", &test_utils::jp2(8, 8, 1, 12));
        let opened = EngineCascadeOpener::default()
            .open(AccessHandle::local(&path), &OpenOptions::default(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(opened.engine, "raster");
        assert!(opened.dataset.variable("band_data").is_some());
    }
}
