//! Common types shared across the eo-cube workspace.

pub mod address;
pub mod collaborators;
pub mod error;
pub mod product;

pub use address::{PhysicalAddress, Scheme};
pub use collaborators::{Authenticator, AwsCredentials, Credentials, DownloadRequest, Downloader};
pub use error::{AccessError, AccessResult};
pub use product::{Asset, Assets, Product, ProductCapabilities, OFFLINE_STATUS};
