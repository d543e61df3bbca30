//! Resolve Earth-observation products into opened datasets.
//!
//! A [`ProductAccess`] turns a [`Product`](eo_common::Product) into a
//! [`DatasetCollection`]:
//!
//! 1. [`drivers`] compute the physical address of an asset or band
//! 2. [`storage`] builds the access context and handle for that address
//! 3. [`cascade`] tries the decode [`engines`] until one opens the handle
//! 4. [`fetch`] does this for every eligible asset concurrently
//! 5. [`fallback`] opens the product directly, then from a downloaded copy

pub mod access;
pub mod cascade;
pub mod collection;
pub mod config;
pub mod drivers;
pub mod engines;
pub mod fallback;
pub mod fetch;
pub mod hints;
pub mod logging;
pub mod scanner;

pub use access::{ProductAccess, ProductAccessBuilder, RetrievalRequest};
pub use cascade::{EngineCascadeOpener, OpenOptions, OpenedDataset};
pub use collection::DatasetCollection;
pub use config::CubeConfig;
pub use drivers::{AddressResolver, DriverKind, DriverRule};
pub use engines::{EngineDescriptor, EngineInput, EngineRegistry};
pub use fallback::{DownloadFallbackOrchestrator, DownloadSettings};
pub use fetch::{eligible_assets, AssetFetchOrchestrator};
pub use hints::{ExtensionHints, FormatHintProvider};
pub use logging::init_tracing;
pub use scanner::{FilesystemScanner, WalkdirScanner};
