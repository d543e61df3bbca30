//! Format hints used to rank decode engines before trying them.

use std::sync::OnceLock;

use async_trait::async_trait;
use eo_common::address::file_extension;
use regex::Regex;
use storage::{AccessHandle, HttpContext, RemoteMetadata};
use tracing::debug;

use crate::engines::EngineRegistry;

/// Ranks engine names for a handle; an empty result means "try them all".
#[async_trait]
pub trait FormatHintProvider: Send + Sync {
    async fn guess_engines(&self, handle: &AccessHandle, registry: &EngineRegistry) -> Vec<String>;
}

/// Guesses the engine from the file extension of the resource.
///
/// For http(s) handles a HEAD request is issued first: the file name of a
/// `Content-Disposition` header wins, then the `Content-Type`, then the URL
/// path.
#[derive(Debug, Default, Clone, Copy)]
pub struct ExtensionHints;

#[async_trait]
impl FormatHintProvider for ExtensionHints {
    async fn guess_engines(&self, handle: &AccessHandle, registry: &EngineRegistry) -> Vec<String> {
        let address = handle.address().without_nested_prefix();

        if address.scheme().is_http() {
            if let Some(fetcher) = handle.fetcher() {
                let default = HttpContext::default();
                let context = handle.context().and_then(|c| c.as_http()).unwrap_or(&default);
                match fetcher.head(address.as_str(), context).await {
                    Ok(metadata) => {
                        if let Some(ext) = extension_from_headers(&metadata) {
                            let engines = registry.engines_for(&ext);
                            if !engines.is_empty() {
                                debug!(address = %address, extension = %ext, "Engine guessed from response headers");
                                return engines.into_iter().map(str::to_string).collect();
                            }
                        }
                    }
                    Err(e) => debug!(address = %address, error = %e, "HEAD request failed"),
                }
            }
        }

        let name = match handle.local_path() {
            Some(path) => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            None => address.file_name().unwrap_or_default().to_string(),
        };
        registry
            .engines_for(&name)
            .into_iter()
            .map(str::to_string)
            .collect()
    }
}

/// Extension suggested by HEAD response headers.
pub fn extension_from_headers(metadata: &RemoteMetadata) -> Option<String> {
    metadata
        .content_disposition
        .as_deref()
        .and_then(disposition_file_name)
        .and_then(|name| file_extension(&name))
        .or_else(|| {
            metadata
                .content_type
                .as_deref()
                .and_then(extension_for_content_type)
                .map(str::to_string)
        })
}

fn disposition_regex() -> Option<&'static Regex> {
    static DISPOSITION: OnceLock<Option<Regex>> = OnceLock::new();
    DISPOSITION
        .get_or_init(|| Regex::new(r#"(?i)filename\*?=(?:UTF-8'')?"?([^";]+)"?"#).ok())
        .as_ref()
}

/// File name carried by a `Content-Disposition` header.
pub fn disposition_file_name(header: &str) -> Option<String> {
    disposition_regex()?
        .captures(header)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .filter(|name| !name.is_empty())
}

/// Extension for a media type. Generic binary types yield nothing.
pub fn extension_for_content_type(content_type: &str) -> Option<&'static str> {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or(content_type)
        .trim()
        .to_lowercase();
    match media.as_str() {
        "application/x-netcdf" | "application/netcdf" | "application/x-netcdf4" => Some(".nc"),
        "image/tiff" | "image/geotiff" => Some(".tif"),
        "image/jp2" | "image/jpx" => Some(".jp2"),
        "application/x-grib" | "application/grib" | "application/wmo-grib" => Some(".grib2"),
        "application/vnd+zarr" | "application/x-zarr" => Some(".zarr"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn test_disposition_file_name() {
        assert_eq!(
            disposition_file_name(r#"attachment; filename="S2_B01.jp2""#).as_deref(),
            Some("S2_B01.jp2")
        );
        assert_eq!(
            disposition_file_name("attachment; filename*=UTF-8''cube.nc").as_deref(),
            Some("cube.nc")
        );
        assert!(disposition_file_name("inline").is_none());
    }

    #[test]
    fn test_disposition_regex_compiled_once() {
        let first = disposition_regex().unwrap();
        let second = disposition_regex().unwrap();
        assert!(std::ptr::eq(first, second));
    }

    #[test]
    fn test_octet_stream_is_ignored() {
        let metadata = RemoteMetadata {
            content_disposition: None,
            content_type: Some("application/octet-stream".to_string()),
        };
        assert!(extension_from_headers(&metadata).is_none());
    }

    #[test]
    fn test_disposition_wins_over_content_type() {
        let metadata = RemoteMetadata {
            content_disposition: Some(r#"attachment; filename="a.grib2""#.to_string()),
            content_type: Some("image/tiff; application=geotiff".to_string()),
        };
        assert_eq!(extension_from_headers(&metadata).as_deref(), Some(".grib2"));
    }

    #[test]
    fn test_geotiff_content_type() {
        assert_eq!(
            extension_for_content_type("image/tiff; application=geotiff; profile=cloud-optimized"),
            Some(".tif")
        );
    }

    #[tokio::test]
    async fn test_memory_handle_uses_address_extension() {
        let registry = EngineRegistry::builtin();
        let handle = AccessHandle::from_bytes("s3://bucket/cube.nc?x=1".into(), Bytes::new());
        assert_eq!(ExtensionHints.guess_engines(&handle, &registry).await, vec!["netcdf"]);

        let unknown = AccessHandle::from_bytes("s3://bucket/blob".into(), Bytes::new());
        assert!(ExtensionHints.guess_engines(&unknown, &registry).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_handle_uses_file_name() {
        let registry = EngineRegistry::builtin();
        let handle = AccessHandle::local("/data/gfs.t00z.pgrb2.grib2.gz");
        assert_eq!(ExtensionHints.guess_engines(&handle, &registry).await, vec!["grib2"]);
    }
}
