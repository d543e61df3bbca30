//! Physical dataset addresses.
//!
//! An address has the form `<scheme>://<path>[!member]`. Composite addresses
//! point at a member inside an archive stored elsewhere, e.g.
//! `zip+s3://bucket/product.zip!B01.tif`. Plain filesystem paths without a
//! scheme are treated as `file` addresses.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Location scheme of an address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Scheme {
    /// Local filesystem (`file://` or a bare path)
    File,
    /// Object storage (`s3://bucket/key`)
    S3,
    /// Archive member inside an object (`zip+s3://bucket/key.zip!member`)
    ZipS3,
    /// Plain HTTP
    Http,
    /// HTTPS
    Https,
    /// Anything else, lower-cased
    Other(String),
}

impl Scheme {
    /// Parse a scheme string (the part before `://`).
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "" | "file" => Scheme::File,
            "s3" => Scheme::S3,
            "zip+s3" => Scheme::ZipS3,
            "http" => Scheme::Http,
            "https" => Scheme::Https,
            other => Scheme::Other(other.to_string()),
        }
    }

    /// Scheme as it appears in an address.
    pub fn as_str(&self) -> &str {
        match self {
            Scheme::File => "file",
            Scheme::S3 => "s3",
            Scheme::ZipS3 => "zip+s3",
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Other(s) => s,
        }
    }

    /// True for http and https.
    pub fn is_http(&self) -> bool {
        matches!(self, Scheme::Http | Scheme::Https)
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable physical address of a dataset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PhysicalAddress(String);

impl PhysicalAddress {
    /// Wrap an address string.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// Build a `file` address from a local path.
    pub fn from_local_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    /// The raw address string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Location scheme.
    pub fn scheme(&self) -> Scheme {
        match self.0.split_once("://") {
            Some((scheme, _)) => Scheme::parse(scheme),
            None => Scheme::File,
        }
    }

    /// True if the address points at the local filesystem.
    pub fn is_local(&self) -> bool {
        self.scheme() == Scheme::File
    }

    /// Everything after `://` (the whole string for bare paths).
    pub fn path_part(&self) -> &str {
        match self.0.split_once("://") {
            Some((_, rest)) => rest,
            None => &self.0,
        }
    }

    /// Local filesystem path for `file` addresses.
    pub fn local_path(&self) -> Option<PathBuf> {
        if self.is_local() {
            Some(PathBuf::from(uri_to_path(&self.0)))
        } else {
            None
        }
    }

    /// Archive member of a composite address (after `!`).
    pub fn archive_member(&self) -> Option<&str> {
        self.path_part()
            .split_once('!')
            .map(|(_, member)| member)
            .filter(|m| !m.is_empty())
    }

    /// Address of the outer object with the composite scheme prefix and the
    /// archive member removed: `zip+s3://b/k.zip!m` becomes `s3://b/k.zip`.
    pub fn outer(&self) -> PhysicalAddress {
        let cleaned = self.without_nested_prefix();
        let without_member = cleaned.0.split('!').next().unwrap_or(&cleaned.0).to_string();
        match without_member.split_once("://") {
            Some((scheme, rest)) if scheme.contains('+') => {
                let outer_scheme = scheme.rsplit('+').next().unwrap_or(scheme);
                PhysicalAddress(format!("{}://{}", outer_scheme, rest))
            }
            _ => PhysicalAddress(without_member),
        }
    }

    /// Remove doubled scheme artifacts such as `s3://zip+s3://`.
    pub fn without_nested_prefix(&self) -> PhysicalAddress {
        PhysicalAddress(self.0.replace("s3://zip+s3://", "zip+s3://"))
    }

    /// Bucket (authority) and key prefix of an object-storage address.
    ///
    /// Composite addresses are reduced to their outer object first.
    pub fn bucket_and_prefix(&self) -> Option<(String, String)> {
        let outer = self.outer();
        if outer.scheme() != Scheme::S3 {
            return None;
        }
        let rest = outer.path_part();
        let (bucket, prefix) = match rest.split_once('/') {
            Some((bucket, prefix)) => (bucket, prefix),
            None => (rest, ""),
        };
        if bucket.is_empty() {
            return None;
        }
        Some((bucket.to_string(), prefix.trim_matches('/').to_string()))
    }

    /// File name of the addressed resource, ignoring query strings.
    ///
    /// For composite addresses this is the archive member's file name.
    pub fn file_name(&self) -> Option<&str> {
        let target = match self.archive_member() {
            Some(member) => member,
            None => self.path_part(),
        };
        let target = target.split(['?', '#']).next().unwrap_or(target);
        target
            .trim_end_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
    }

    /// Lower-cased extension including the leading dot (`.tif`).
    ///
    /// Double extensions of compressed files are kept (`.grib2.gz`).
    pub fn extension(&self) -> Option<String> {
        self.file_name().and_then(file_extension)
    }
}

impl fmt::Display for PhysicalAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PhysicalAddress {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for PhysicalAddress {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Convert a `file://` URI (or bare path) to a filesystem path string.
pub fn uri_to_path(uri: &str) -> String {
    match uri.split_once("://") {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("file") => rest.to_string(),
        Some(_) => uri.to_string(),
        None => uri.to_string(),
    }
}

/// Lower-cased extension of a file name including the leading dot.
pub fn file_extension(file_name: &str) -> Option<String> {
    let lower = file_name.to_lowercase();
    if lower.ends_with(".gz") {
        let stem = &lower[..lower.len() - 3];
        if let Some(pos) = stem.rfind('.') {
            return Some(lower[pos..].to_string());
        }
    }
    lower.rfind('.').filter(|&pos| pos > 0).map(|pos| lower[pos..].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_detection() {
        assert_eq!(PhysicalAddress::new("/tmp/a.tif").scheme(), Scheme::File);
        assert_eq!(PhysicalAddress::new("file:///tmp/a.tif").scheme(), Scheme::File);
        assert_eq!(PhysicalAddress::new("s3://b/k").scheme(), Scheme::S3);
        assert_eq!(PhysicalAddress::new("ZIP+S3://b/k.zip!m").scheme(), Scheme::ZipS3);
        assert_eq!(
            PhysicalAddress::new("ftp://host/x").scheme(),
            Scheme::Other("ftp".to_string())
        );
    }

    #[test]
    fn test_uri_to_path() {
        assert_eq!(uri_to_path("file:///data/x.nc"), "/data/x.nc");
        assert_eq!(uri_to_path("/data/x.nc"), "/data/x.nc");
    }

    #[test]
    fn test_file_extension() {
        assert_eq!(file_extension("a.TIF").as_deref(), Some(".tif"));
        assert_eq!(file_extension("gfs.f003.grib2.gz").as_deref(), Some(".grib2.gz"));
        assert_eq!(file_extension("README"), None);
        assert_eq!(file_extension(".hidden"), None);
    }
}
