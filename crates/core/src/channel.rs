//! Storage key layout and the typed per-channel view.
//!
//! Per-channel fields live under `${channel}_${field}`; a handful of global
//! settings are stored unprefixed. [`ChannelData::load`] only ever touches
//! the keys of the channel it was asked for.

use {
    iitcm_config::Channel,
    serde::{Serialize, de::DeserializeOwned},
    serde_json::{Map, Value},
};

use crate::{
    Error, Result,
    store::Store,
    types::{Categories, CoreRecord, PluginMap},
};

pub const KEY_CHANNEL: &str = "channel";
pub const KEY_NETWORK_HOST: &str = "network_host";
pub const KEY_IS_DAEMON: &str = "is_daemon";
pub const KEY_LAST_CHECK_EXTERNAL_UPDATE: &str = "last_check_external_update";
pub const KEY_EXTERNAL_UPDATE_CHECK_INTERVAL: &str = "external_update_check_interval";

/// Default period between two checks of the same loop, in seconds.
pub const DEFAULT_UPDATE_CHECK_INTERVAL: u64 = 24 * 60 * 60;

/// A per-channel storage field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    IitcVersion,
    LastModified,
    IitcCore,
    IitcCoreUser,
    Categories,
    PluginsFlat,
    PluginsLocal,
    PluginsUser,
    LastCheckUpdate,
    UpdateCheckInterval,
}

impl Field {
    pub const ALL: [Field; 10] = [
        Field::IitcVersion,
        Field::LastModified,
        Field::IitcCore,
        Field::IitcCoreUser,
        Field::Categories,
        Field::PluginsFlat,
        Field::PluginsLocal,
        Field::PluginsUser,
        Field::LastCheckUpdate,
        Field::UpdateCheckInterval,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::IitcVersion => "iitc_version",
            Self::LastModified => "last_modified",
            Self::IitcCore => "iitc_core",
            Self::IitcCoreUser => "iitc_core_user",
            Self::Categories => "categories",
            Self::PluginsFlat => "plugins_flat",
            Self::PluginsLocal => "plugins_local",
            Self::PluginsUser => "plugins_user",
            Self::LastCheckUpdate => "last_check_update",
            Self::UpdateCheckInterval => "update_check_interval",
        }
    }

    pub fn key(self, channel: Channel) -> String {
        format!("{channel}_{}", self.as_str())
    }
}

/// Everything stored for one channel, decoded.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChannelData {
    pub channel: Channel,
    pub iitc_version: Option<String>,
    pub last_modified: Option<String>,
    pub iitc_core: Option<CoreRecord>,
    pub iitc_core_user: Option<CoreRecord>,
    pub categories: Categories,
    pub plugins_flat: PluginMap,
    pub plugins_local: PluginMap,
    pub plugins_user: PluginMap,
    pub last_check_update: Option<u64>,
    pub update_check_interval: Option<u64>,
}

impl ChannelData {
    /// Read and validate every `${channel}_*` key.
    ///
    /// Missing or `null` values decode to their empty form. A present value
    /// of the wrong shape is reported as [`Error::Corrupt`].
    pub async fn load(store: &dyn Store, channel: Channel) -> Result<Self> {
        let keys: Vec<String> = Field::ALL.iter().map(|f| f.key(channel)).collect();
        let mut raw = store.get(Some(&keys)).await?;

        Ok(Self {
            channel,
            iitc_version: take(&mut raw, channel, Field::IitcVersion)?,
            last_modified: take(&mut raw, channel, Field::LastModified)?,
            iitc_core: take(&mut raw, channel, Field::IitcCore)?,
            iitc_core_user: take(&mut raw, channel, Field::IitcCoreUser)?,
            categories: take(&mut raw, channel, Field::Categories)?.unwrap_or_default(),
            plugins_flat: take(&mut raw, channel, Field::PluginsFlat)?.unwrap_or_default(),
            plugins_local: take(&mut raw, channel, Field::PluginsLocal)?.unwrap_or_default(),
            plugins_user: take(&mut raw, channel, Field::PluginsUser)?.unwrap_or_default(),
            last_check_update: take(&mut raw, channel, Field::LastCheckUpdate)?,
            update_check_interval: take(&mut raw, channel, Field::UpdateCheckInterval)?,
        })
    }

    /// The core record in effect: the user override when set, else the
    /// catalog one.
    pub fn active_core(&self) -> Option<&CoreRecord> {
        match &self.iitc_core_user {
            Some(user) if !user.is_empty() => Some(user),
            _ => self.iitc_core.as_ref(),
        }
    }

    /// The uid the core script is known by in this channel.
    pub fn core_uid(&self) -> Option<String> {
        [self.iitc_core_user.as_ref(), self.iitc_core.as_ref()]
            .into_iter()
            .flatten()
            .filter(|core| !core.is_empty())
            .find_map(|core| core.uid.clone().or_else(|| core.resolve_uid()))
    }

    pub fn is_core_uid(&self, uid: &str) -> bool {
        self.core_uid().as_deref() == Some(uid)
    }

    pub fn update_interval(&self) -> u64 {
        self.update_check_interval
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_UPDATE_CHECK_INTERVAL)
    }
}

fn take<T: DeserializeOwned>(
    raw: &mut Map<String, Value>,
    channel: Channel,
    field: Field,
) -> Result<Option<T>> {
    let key = field.key(channel);
    match raw.remove(&key) {
        None | Some(Value::Null) => Ok(None),
        Some(value) => serde_json::from_value(value)
            .map(Some)
            .map_err(|e| Error::corrupt(key, e)),
    }
}

/// Decode one global value. Missing, `null` and mistyped values read as `None`.
pub(crate) fn global<T: DeserializeOwned>(raw: &Map<String, Value>, key: &str) -> Option<T> {
    raw.get(key)
        .filter(|v| !v.is_null())
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// A batch of writes against one channel plus optional global keys,
/// committed with a single `Store::set`.
#[derive(Debug)]
pub struct ChannelPatch {
    channel: Channel,
    entries: Map<String, Value>,
}

impl ChannelPatch {
    pub fn new(channel: Channel) -> Self {
        Self {
            channel,
            entries: Map::new(),
        }
    }

    pub fn put<T: Serialize + ?Sized>(&mut self, field: Field, value: &T) -> Result<&mut Self> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(field.key(self.channel), value);
        Ok(self)
    }

    pub fn clear(&mut self, field: Field) -> &mut Self {
        self.entries.insert(field.key(self.channel), Value::Null);
        self
    }

    pub fn put_global<T: Serialize + ?Sized>(&mut self, key: &str, value: &T) -> Result<&mut Self> {
        let value = serde_json::to_value(value)?;
        self.entries.insert(key.to_string(), value);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.entries
    }

    pub async fn commit(self, store: &dyn Store) -> Result<()> {
        if self.entries.is_empty() {
            return Ok(());
        }
        store.set(self.entries).await
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::{
            store_memory::InMemoryStore,
            types::{PluginRecord, PluginStatus},
        },
        serde_json::json,
    };

    #[test]
    fn keys_are_namespaced() {
        assert_eq!(Field::PluginsFlat.key(Channel::Release), "release_plugins_flat");
        assert_eq!(Field::IitcCoreUser.key(Channel::Beta), "beta_iitc_core_user");
        assert_eq!(
            Field::UpdateCheckInterval.key(Channel::Custom),
            "custom_update_check_interval"
        );
    }

    #[tokio::test]
    async fn load_reads_only_own_channel() {
        let mut data = Map::new();
        data.insert(
            "release_plugins_flat".into(),
            json!({"a+b": {"uid": "a+b", "status": "on"}}),
        );
        data.insert(
            "beta_plugins_flat".into(),
            json!({"c+d": {"uid": "c+d", "status": "off"}}),
        );
        data.insert("beta_last_modified".into(), json!("Tue, 01 Oct 2024 10:00:00 GMT"));
        let store = InMemoryStore::with_data(data);

        let beta = ChannelData::load(&store, Channel::Beta).await.unwrap();
        assert_eq!(beta.plugins_flat.len(), 1);
        assert!(beta.plugins_flat.contains_key("c+d"));
        assert_eq!(
            beta.last_modified.as_deref(),
            Some("Tue, 01 Oct 2024 10:00:00 GMT")
        );
        assert!(beta.plugins_local.is_empty());
        assert_eq!(beta.update_interval(), DEFAULT_UPDATE_CHECK_INTERVAL);
    }

    #[tokio::test]
    async fn null_values_read_as_empty() {
        let mut data = Map::new();
        data.insert("release_plugins_user".into(), Value::Null);
        data.insert("release_last_check_update".into(), Value::Null);
        let store = InMemoryStore::with_data(data);

        let release = ChannelData::load(&store, Channel::Release).await.unwrap();
        assert!(release.plugins_user.is_empty());
        assert!(release.last_check_update.is_none());
    }

    #[tokio::test]
    async fn corrupt_value_is_reported() {
        let mut data = Map::new();
        data.insert("release_plugins_local".into(), json!("not a map"));
        let store = InMemoryStore::with_data(data);

        let err = ChannelData::load(&store, Channel::Release).await.unwrap_err();
        match err {
            Error::Corrupt { key, .. } => assert_eq!(key, "release_plugins_local"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn patch_commits_under_channel_keys() {
        let store = InMemoryStore::new();
        let mut flat = PluginMap::new();
        flat.insert(
            "a+b".into(),
            PluginRecord {
                uid: Some("a+b".into()),
                status: PluginStatus::On,
                ..Default::default()
            },
        );

        let mut patch = ChannelPatch::new(Channel::Custom);
        patch.put(Field::PluginsFlat, &flat).unwrap();
        patch.clear(Field::LastCheckUpdate);
        patch.put_global(KEY_CHANNEL, &Channel::Custom).unwrap();
        patch.commit(&store).await.unwrap();

        let all = store.snapshot();
        assert_eq!(all["custom_plugins_flat"]["a+b"]["status"], "on");
        assert!(all["custom_last_check_update"].is_null());
        assert_eq!(all["channel"], "custom");
        assert!(!all.contains_key("release_plugins_flat"));
    }

    #[test]
    fn user_core_takes_precedence_when_set() {
        let catalog = CoreRecord {
            uid: Some("core+ns".into()),
            code: "catalog".into(),
            ..Default::default()
        };
        let mut data = ChannelData {
            iitc_core: Some(catalog),
            iitc_core_user: Some(CoreRecord::default()),
            ..Default::default()
        };
        assert_eq!(data.active_core().unwrap().code, "catalog");
        assert!(data.is_core_uid("core+ns"));

        data.iitc_core_user = Some(CoreRecord {
            uid: Some("core+ns".into()),
            code: "user".into(),
            ..Default::default()
        });
        assert_eq!(data.active_core().unwrap().code, "user");
    }
}
