//! Storage access for product datasets.
//!
//! - [`context`]: per-address access contexts (credentials, endpoints, headers)
//! - [`handle`]: readable handles with explicit consume/reopen/close states
//! - [`fetch`]: byte backends for file, s3, zip+s3 and http(s) addresses
//! - [`object_store`]: S3-compatible object storage clients

pub mod context;
pub mod fetch;
pub mod handle;
pub mod object_store;

pub use context::{AccessContext, HttpContext, S3Context, StorageContextBuilder, DEFAULT_USER_AGENT};
pub use fetch::{extract_member, DataFetcher, RemoteMetadata};
pub use handle::{AccessHandle, HandleState};
pub use object_store::{ObjectStorage, S3StoreProvider, StaticStoreProvider, StoreProvider};
