//! Product and asset records produced by the search layer.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::address::Scheme;

/// Property value marking a product that must be ordered before access.
pub const OFFLINE_STATUS: &str = "OFFLINE";

/// A named, addressable sub-resource of a product.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Asset {
    /// Asset key, unique within its product
    pub key: String,
    /// URI of the asset data
    pub href: String,
    /// Role tags; `None` when the record carries no roles field at all
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Media type (e.g. `image/tiff; application=geotiff`)
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    /// Any other metadata
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Asset {
    /// Create an asset without roles.
    pub fn new(key: impl Into<String>, href: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            href: href.into(),
            roles: None,
            title: None,
            media_type: None,
            extra: Map::new(),
        }
    }

    /// Set the roles of this asset.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.roles = Some(roles.into_iter().map(Into::into).collect());
        self
    }

    /// True if the roles field is present (possibly empty).
    pub fn declares_roles(&self) -> bool {
        self.roles.is_some()
    }

    /// True if the asset carries the given role.
    pub fn has_role(&self, role: &str) -> bool {
        self.roles
            .as_ref()
            .map(|roles| roles.iter().any(|r| r == role))
            .unwrap_or(false)
    }

    /// True if any of the asset roles is contained in `filter`.
    pub fn has_any_role<S: AsRef<str>>(&self, filter: &[S]) -> bool {
        filter.iter().any(|role| self.has_role(role.as_ref()))
    }

    /// Last path segment of the href, ignoring query strings.
    pub fn href_basename(&self) -> Option<&str> {
        let path = match self.href.split_once("://") {
            Some((_, rest)) => rest.split_once('/').map(|(_, p)| p).unwrap_or(""),
            None => self.href.as_str(),
        };
        let path = path.split(['?', '#']).next().unwrap_or(path);
        path.trim_matches('/')
            .rsplit(['/', '\\'])
            .next()
            .filter(|name| !name.is_empty())
    }
}

/// Ordered asset collection preserving insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Assets(Vec<Asset>);

impl Assets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an asset, replacing any existing asset with the same key in place.
    pub fn insert(&mut self, asset: Asset) {
        match self.0.iter_mut().find(|a| a.key == asset.key) {
            Some(existing) => *existing = asset,
            None => self.0.push(asset),
        }
    }

    pub fn get(&self, key: &str) -> Option<&Asset> {
        self.0.iter().find(|a| a.key == key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Asset> {
        self.0.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|a| a.key.as_str())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// True if at least one asset declares a roles field.
    pub fn roles_exist(&self) -> bool {
        self.0.iter().any(Asset::declares_roles)
    }
}

impl FromIterator<Asset> for Assets {
    fn from_iter<T: IntoIterator<Item = Asset>>(iter: T) -> Self {
        let mut assets = Assets::new();
        for asset in iter {
            assets.insert(asset);
        }
        assets
    }
}

impl<'a> IntoIterator for &'a Assets {
    type Item = &'a Asset;
    type IntoIter = std::slice::Iter<'a, Asset>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// An identified bundle of raster sub-resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Product {
    /// Product identifier
    pub id: String,
    /// Provider the product originates from
    #[serde(default)]
    pub provider: String,
    /// Product type (e.g. `S2_MSI_L1C`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_type: Option<String>,
    /// Current location, remote or local once downloaded
    pub location: String,
    /// Original remote location
    #[serde(default)]
    pub remote_location: String,
    #[serde(default)]
    pub assets: Assets,
    /// Free-form metadata
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl Product {
    /// Create a product located at `location`.
    pub fn new(id: impl Into<String>, location: impl Into<String>) -> Self {
        let location = location.into();
        Self {
            id: id.into(),
            provider: String::new(),
            product_type: None,
            remote_location: location.clone(),
            location,
            assets: Assets::new(),
            properties: Map::new(),
        }
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = provider.into();
        self
    }

    pub fn with_product_type(mut self, product_type: impl Into<String>) -> Self {
        self.product_type = Some(product_type.into());
        self
    }

    pub fn with_asset(mut self, asset: Asset) -> Self {
        self.assets.insert(asset);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    /// Scheme of the product location.
    pub fn location_scheme(&self) -> Scheme {
        match self.location.split_once("://") {
            Some((scheme, _)) => Scheme::parse(scheme),
            None => Scheme::File,
        }
    }

    /// Storage status property, if any.
    pub fn storage_status(&self) -> Option<&str> {
        self.properties.get("storageStatus").and_then(Value::as_str)
    }

    /// True if the product must be ordered before it can be accessed.
    pub fn is_offline(&self) -> bool {
        self.storage_status() == Some(OFFLINE_STATUS)
    }

    /// Capability descriptor used to select an address driver.
    pub fn capabilities(&self) -> ProductCapabilities {
        ProductCapabilities {
            has_assets: !self.assets.is_empty() || self.properties.contains_key("assets"),
            product_type: self.product_type.clone(),
            location_scheme: self.location_scheme(),
        }
    }
}

impl std::fmt::Display for Product {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.provider.is_empty() {
            write!(f, "Product(id={})", self.id)
        } else {
            write!(f, "Product(id={}, provider={})", self.id, self.provider)
        }
    }
}

/// What a product exposes, extracted once per resolution call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProductCapabilities {
    /// Product has a non-empty asset collection
    pub has_assets: bool,
    /// Declared product type
    pub product_type: Option<String>,
    /// Scheme of the product location
    pub location_scheme: Scheme,
}
