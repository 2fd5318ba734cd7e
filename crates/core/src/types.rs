//! Core data types: plugin records, the core script record, categories and
//! the remote catalog document.

use std::collections::BTreeMap;

use {
    serde::{Deserialize, Serialize},
    serde_json::{Map, Value},
    tracing::warn,
};

use crate::{Error, Result, meta::ARRAY_KEYS, uid::resolve_uid};

/// Parsed `==UserScript==` header: directive name → string, or array of
/// strings for repeatable directives.
pub type Meta = Map<String, Value>;

/// Plugins keyed by uid.
pub type PluginMap = BTreeMap<String, PluginRecord>;

/// Category display metadata keyed by category name.
pub type Categories = BTreeMap<String, Category>;

/// Category assigned to user plugins that do not declare one.
pub const DEFAULT_CATEGORY: &str = "Misc";

/// Catalog categories whose plugins are never offered.
pub const RESERVED_CATEGORIES: [&str; 2] = ["Obsolete", "Deleted"];

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PluginStatus {
    On,
    #[default]
    Off,
}

impl PluginStatus {
    pub fn is_on(self) -> bool {
        self == Self::On
    }
}

/// One plugin as known within a channel.
///
/// The same shape is stored in `plugins_flat`, `plugins_local` and
/// `plugins_user`. Header directives without a dedicated field are kept in
/// `extra` so they survive a round trip through storage.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct PluginRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub status: PluginStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Active code comes from a user-supplied script.
    #[serde(default)]
    pub user: bool,
    /// A user-supplied script shadows the catalog entry with this uid.
    #[serde(default, rename = "override")]
    pub overridden: bool,
    #[serde(default, rename = "addedAt", skip_serializing_if = "Option::is_none")]
    pub added_at: Option<u64>,
    #[serde(
        default,
        rename = "statusChangedAt",
        skip_serializing_if = "Option::is_none"
    )]
    pub status_changed_at: Option<u64>,
    #[serde(default, rename = "updatedAt", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<u64>,
    #[serde(default, rename = "updateURL", skip_serializing_if = "Option::is_none")]
    pub update_url: Option<String>,
    #[serde(
        default,
        rename = "downloadURL",
        skip_serializing_if = "Option::is_none"
    )]
    pub download_url: Option<String>,
    #[serde(default, rename = "match", skip_serializing_if = "Vec::is_empty")]
    pub matches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude: Vec<String>,
    #[serde(default, rename = "excludeMatch", skip_serializing_if = "Vec::is_empty")]
    pub exclude_match: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub require: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub grant: Vec<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl PluginRecord {
    /// Build a record from a parsed header.
    pub fn from_meta(meta: Meta) -> Result<Self> {
        serde_json::from_value(Value::Object(meta)).map_err(|_| Error::InvalidHeader)
    }

    /// Read one `meta.json` plugin entry.
    ///
    /// Scalars in string fields are stringified, a lone string in an array
    /// field becomes a one-element array, and per-channel state (`status`,
    /// `user`, `override`, timestamps) is dropped. Values that still do not
    /// fit are removed. Returns `None` only when the entry is not an object.
    pub fn from_catalog_entry(entry: Value) -> Option<Self> {
        let Value::Object(mut map) = entry else {
            return None;
        };
        for key in CATALOG_STATE_KEYS {
            map.remove(*key);
        }
        for key in CATALOG_STRING_KEYS {
            if let Some(value) = map.remove(*key)
                && let Some(text) = scalar_string(value)
            {
                map.insert((*key).to_string(), Value::String(text));
            }
        }
        for key in ARRAY_KEYS {
            let items = match map.remove(*key) {
                Some(Value::Array(items)) => {
                    items.into_iter().filter_map(scalar_string).collect::<Vec<_>>()
                },
                Some(value) => scalar_string(value).into_iter().collect::<Vec<_>>(),
                None => continue,
            };
            map.insert(
                (*key).to_string(),
                Value::Array(items.into_iter().map(Value::String).collect()),
            );
        }
        serde_json::from_value(Value::Object(map)).ok()
    }

    pub fn resolve_uid(&self) -> Option<String> {
        resolve_uid(
            self.id.as_deref(),
            self.filename.as_deref(),
            self.name.as_deref(),
            self.namespace.as_deref(),
        )
    }

    pub fn is_on(&self) -> bool {
        self.status.is_on()
    }

    /// The uid exists in the distributed catalog (possibly shadowed by a
    /// user script), as opposed to a purely user-supplied plugin.
    pub fn is_catalog_origin(&self) -> bool {
        !self.user || self.overridden
    }
}

/// The core script, either from the catalog (`iitc_core`) or supplied by the
/// user (`iitc_core_user`). An empty `code` marks an unset user override.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CoreRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default)]
    pub code: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl CoreRecord {
    /// Build a core record from its header and source, resolving the uid.
    pub fn from_script(meta: Meta, code: String) -> Result<Self> {
        let mut record: Self =
            serde_json::from_value(Value::Object(meta)).map_err(|_| Error::InvalidHeader)?;
        record.uid = record.resolve_uid();
        record.code = code;
        Ok(record)
    }

    pub fn resolve_uid(&self) -> Option<String> {
        resolve_uid(
            self.id.as_deref(),
            self.filename.as_deref(),
            self.name.as_deref(),
            self.namespace.as_deref(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.code.is_empty()
    }

    /// The core script as an enabled plugin record, for injection.
    pub fn to_plugin(&self) -> Result<PluginRecord> {
        let mut plugin: PluginRecord = serde_json::from_value(serde_json::to_value(self)?)?;
        plugin.uid = self.uid.clone().or_else(|| self.resolve_uid());
        plugin.status = PluginStatus::On;
        Ok(plugin)
    }
}

/// Display metadata for a group of plugins.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Category {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Category {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }
}

/// Catalog entry fields that hold a single string.
const CATALOG_STRING_KEYS: &[&str] = &[
    "uid",
    "id",
    "name",
    "namespace",
    "filename",
    "category",
    "version",
    "author",
    "description",
    "code",
    "updateURL",
    "downloadURL",
];

/// Per-channel state that a catalog entry never carries.
const CATALOG_STATE_KEYS: &[&str] = &[
    "status",
    "user",
    "override",
    "addedAt",
    "statusChangedAt",
    "updatedAt",
];

fn scalar_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// The remote `meta.json` document.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub iitc_version: Option<String>,
    pub categories: BTreeMap<String, CatalogCategory>,
}

#[derive(Debug, Clone, Default)]
pub struct CatalogCategory {
    pub plugins: BTreeMap<String, PluginRecord>,
    pub info: Category,
}

impl Catalog {
    /// Decode `meta.json` entry by entry.
    ///
    /// Only a document without a `categories` object is rejected. An
    /// unreadable category or plugin entry is skipped with a warning and the
    /// rest of the catalog is kept.
    pub fn from_value(raw: Value) -> Option<Self> {
        let Value::Object(mut root) = raw else {
            return None;
        };
        let Some(Value::Object(groups)) = root.remove("categories") else {
            return None;
        };
        let iitc_version = root.remove("iitc_version").and_then(scalar_string);

        let mut categories = BTreeMap::new();
        for (name, group) in groups {
            let Value::Object(mut group) = group else {
                warn!(category = %name, "catalog category is not an object, skipped");
                continue;
            };
            let mut plugins = BTreeMap::new();
            if let Some(Value::Object(entries)) = group.remove("plugins") {
                for (key, entry) in entries {
                    match PluginRecord::from_catalog_entry(entry) {
                        Some(record) => {
                            plugins.insert(key, record);
                        },
                        None => {
                            warn!(category = %name, plugin = %key, "unreadable catalog entry skipped")
                        },
                    }
                }
            }
            let info = serde_json::from_value(Value::Object(group))
                .unwrap_or_else(|_| Category::named(name.as_str()));
            categories.insert(name, CatalogCategory { plugins, info });
        }

        Some(Self {
            iitc_version,
            categories,
        })
    }
}

/// A script supplied by the user: its parsed header plus source.
#[derive(Debug, Clone, PartialEq)]
pub struct UserScript {
    pub meta: Meta,
    pub code: String,
}

impl UserScript {
    pub fn new(meta: Meta, code: impl Into<String>) -> Self {
        Self {
            meta,
            code: code.into(),
        }
    }

    /// Parse the header out of `code`. Returns `None` when there is no
    /// `==UserScript==` block.
    pub fn from_code(code: impl Into<String>) -> Option<Self> {
        let code = code.into();
        let meta = crate::meta::parse_meta(&code)?;
        Some(Self { meta, code })
    }
}

/// Lifecycle actions accepted by [`crate::Manager::manage_plugin`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginAction {
    On,
    Off,
    Delete,
}
