//! Readable handles bound to a physical address and its access context.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use eo_common::{AccessError, AccessResult, PhysicalAddress, Scheme};
use tracing::debug;

use crate::context::AccessContext;
use crate::fetch::DataFetcher;

/// Lifecycle of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Not read yet
    Fresh,
    /// Content has been read; reopen to read again
    Consumed,
    Closed,
}

#[derive(Clone)]
enum HandleSource {
    Local(PathBuf),
    Remote {
        context: AccessContext,
        fetcher: Arc<DataFetcher>,
    },
    Memory,
}

/// A readable resource for one address.
///
/// Reading consumes the handle. [`AccessHandle::reopen`] yields a fresh
/// handle for the same address and context; remote content already fetched
/// is shared with it instead of being downloaded again.
pub struct AccessHandle {
    address: PhysicalAddress,
    source: HandleSource,
    content: Option<Bytes>,
    state: HandleState,
}

impl fmt::Debug for AccessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.source {
            HandleSource::Local(_) => "local",
            HandleSource::Remote { .. } => "remote",
            HandleSource::Memory => "memory",
        };
        f.debug_struct("AccessHandle")
            .field("address", &self.address)
            .field("kind", &kind)
            .field("state", &self.state)
            .finish()
    }
}

impl AccessHandle {
    /// Open a handle for `address`.
    ///
    /// Local paths must exist. Unknown schemes are rejected with
    /// `UnsupportedAddressScheme`.
    pub async fn open(
        address: PhysicalAddress,
        context: AccessContext,
        fetcher: Arc<DataFetcher>,
    ) -> AccessResult<Self> {
        let cleaned = address.without_nested_prefix();
        let source = match cleaned.scheme() {
            Scheme::File => {
                let path = cleaned.local_path().unwrap_or_default();
                tokio::fs::metadata(&path).await?;
                HandleSource::Local(path)
            }
            Scheme::S3 | Scheme::ZipS3 | Scheme::Http | Scheme::Https => {
                HandleSource::Remote { context, fetcher }
            }
            Scheme::Other(scheme) => {
                return Err(AccessError::UnsupportedAddressScheme {
                    product: address.to_string(),
                    scheme,
                })
            }
        };
        debug!(address = %address, "Opened access handle");
        Ok(Self {
            address,
            source,
            content: None,
            state: HandleState::Fresh,
        })
    }

    /// Handle over bytes already in memory, treated as a remote stream.
    pub fn from_bytes(address: PhysicalAddress, bytes: Bytes) -> Self {
        Self {
            address,
            source: HandleSource::Memory,
            content: Some(bytes),
            state: HandleState::Fresh,
        }
    }

    /// Handle over a local path, without an existence check.
    pub fn local(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            address: PhysicalAddress::from_local_path(&path),
            source: HandleSource::Local(path),
            content: None,
            state: HandleState::Fresh,
        }
    }

    pub fn address(&self) -> &PhysicalAddress {
        &self.address
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_local(&self) -> bool {
        matches!(self.source, HandleSource::Local(_))
    }

    pub fn local_path(&self) -> Option<&Path> {
        match &self.source {
            HandleSource::Local(path) => Some(path),
            _ => None,
        }
    }

    /// Access context of a remote handle.
    pub fn context(&self) -> Option<&AccessContext> {
        match &self.source {
            HandleSource::Remote { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Fetcher of a remote handle.
    pub fn fetcher(&self) -> Option<&Arc<DataFetcher>> {
        match &self.source {
            HandleSource::Remote { fetcher, .. } => Some(fetcher),
            _ => None,
        }
    }

    /// Read the whole content, consuming the handle.
    pub async fn read_all(&mut self) -> AccessResult<Bytes> {
        match self.state {
            HandleState::Fresh => {}
            HandleState::Consumed => {
                return Err(AccessError::Storage(format!(
                    "Handle for {} already consumed",
                    self.address
                )))
            }
            HandleState::Closed => {
                return Err(AccessError::Storage(format!(
                    "Handle for {} is closed",
                    self.address
                )))
            }
        }

        let bytes = match &self.content {
            Some(bytes) => bytes.clone(),
            None => match &self.source {
                HandleSource::Local(path) => Bytes::from(tokio::fs::read(path).await?),
                HandleSource::Remote { context, fetcher } => {
                    fetcher.fetch(&self.address, context).await?
                }
                HandleSource::Memory => Bytes::new(),
            },
        };
        if !self.is_local() {
            self.content = Some(bytes.clone());
        }
        self.state = HandleState::Consumed;
        Ok(bytes)
    }

    /// Fresh handle for the same address and context.
    pub fn reopen(&self) -> AccessResult<Self> {
        if self.state == HandleState::Closed {
            return Err(AccessError::Storage(format!(
                "Cannot reopen closed handle for {}",
                self.address
            )));
        }
        Ok(Self {
            address: self.address.clone(),
            source: self.source.clone(),
            content: self.content.clone(),
            state: HandleState::Fresh,
        })
    }

    /// Release buffered content. Closing twice is a no-op.
    pub fn close(&mut self) {
        if self.state != HandleState::Closed {
            debug!(address = %self.address, "Closing access handle");
        }
        self.content = None;
        self.state = HandleState::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.state == HandleState::Closed
    }
}
