//! Plugin lifecycle: enable, disable, delete, user scripts and channel
//! switches.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
};

use {
    iitcm_config::Channel,
    tracing::{debug, info, warn},
};

use crate::{
    Error, Result,
    channel::{ChannelData, ChannelPatch, Field, KEY_CHANNEL},
    events::{EventKind, SourceHint, build_event, enabled_uids},
    manager::{Manager, now_secs},
    types::{
        Categories, Category, CoreRecord, DEFAULT_CATEGORY, PluginAction, PluginMap,
        PluginRecord, PluginStatus, UserScript,
    },
};

impl Manager {
    /// Apply `action` to `uid` in the current channel.
    pub async fn manage_plugin(&self, uid: &str, action: PluginAction) -> Result<()> {
        self.ensure_init().await?;
        let data = ChannelData::load(&*self.store, self.channel()).await?;
        match action {
            PluginAction::On => self.enable(data, uid).await,
            PluginAction::Off => self.disable(data, uid).await,
            PluginAction::Delete => self.delete(data, uid).await,
        }
    }

    async fn enable(&self, mut data: ChannelData, uid: &str) -> Result<()> {
        let channel = data.channel;
        let now = now_secs();
        let Some(flat) = data.plugins_flat.get_mut(uid) else {
            return Err(Error::plugin_not_found(uid));
        };

        let mut patch = ChannelPatch::new(channel);
        if flat.user || data.plugins_local.contains_key(uid) {
            flat.status = PluginStatus::On;
            flat.status_changed_at = Some(now);
            let source = if flat.user {
                data.plugins_user.get_mut(uid)
            } else {
                data.plugins_local.get_mut(uid)
            };
            if let Some(source) = source {
                source.status = PluginStatus::On;
                source.status_changed_at = Some(now);
            }
            patch.put(Field::PluginsUser, &data.plugins_user)?;
        } else {
            let Some(filename) = flat.filename.clone().filter(|f| !f.is_empty()) else {
                warn!(%channel, uid, "catalog plugin has no filename");
                return Ok(());
            };
            let url = format!("{}/plugins/{filename}", self.host_url(channel));
            let Some(code) = self.fetcher.get_text(&url, false).await else {
                warn!(%channel, uid, %url, "plugin download failed");
                return Ok(());
            };
            flat.status = PluginStatus::On;
            flat.status_changed_at = Some(now);
            flat.code = Some(code);
            let cached = flat.clone();
            data.plugins_local.insert(uid.to_string(), cached);
        }
        patch.put(Field::PluginsFlat, &data.plugins_flat)?;
        patch.put(Field::PluginsLocal, &data.plugins_local)?;
        patch.commit(&*self.store).await?;
        info!(%channel, uid, "plugin enabled");

        if let Some(event) = build_event(&data, [uid], EventKind::Add, None) {
            self.host.plugin_event(&event);
        }
        Ok(())
    }

    async fn disable(&self, data: ChannelData, uid: &str) -> Result<()> {
        let channel = data.channel;
        let before = data.clone();
        let mut data = data;
        let now = now_secs();
        let Some(flat) = data.plugins_flat.get_mut(uid) else {
            return Err(Error::plugin_not_found(uid));
        };

        flat.status = PluginStatus::Off;
        flat.status_changed_at = Some(now);
        let source = if flat.user {
            data.plugins_user.get_mut(uid)
        } else {
            data.plugins_local.get_mut(uid)
        };
        if let Some(source) = source {
            source.status = PluginStatus::Off;
            source.status_changed_at = Some(now);
        }

        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::PluginsFlat, &data.plugins_flat)?;
        patch.put(Field::PluginsLocal, &data.plugins_local)?;
        patch.put(Field::PluginsUser, &data.plugins_user)?;
        patch.commit(&*self.store).await?;
        info!(%channel, uid, "plugin disabled");

        if let Some(event) = build_event(&before, [uid], EventKind::Remove, None) {
            self.host.plugin_event(&event);
        }
        Ok(())
    }

    async fn delete(&self, data: ChannelData, uid: &str) -> Result<()> {
        let channel = data.channel;
        let before = data.clone();
        let mut data = data;
        let mut patch = ChannelPatch::new(channel);

        if data.is_core_uid(uid) {
            data.iitc_core_user = Some(CoreRecord::default());
            patch.put(Field::IitcCoreUser, &CoreRecord::default())?;
            patch.commit(&*self.store).await?;
            info!(%channel, uid, "user core script removed");

            if let Some(event) = build_event(&data, [uid], EventKind::Update, None) {
                self.host.plugin_event(&event);
            }
            return Ok(());
        }

        let Some(flat) = data.plugins_flat.get(uid) else {
            return Err(Error::plugin_not_found(uid));
        };
        if !flat.user {
            return Err(Error::not_deletable(uid));
        }

        if flat.overridden {
            let mut restored = match data.plugins_local.get(uid) {
                Some(local) => local.clone(),
                None => {
                    let mut stripped = flat.clone();
                    stripped.code = None;
                    stripped.updated_at = None;
                    stripped
                },
            };
            restored.uid = Some(uid.to_string());
            restored.status = PluginStatus::Off;
            restored.status_changed_at = Some(now_secs());
            restored.user = false;
            restored.overridden = false;
            restored.added_at = None;
            data.plugins_flat.insert(uid.to_string(), restored);
            debug!(%channel, uid, "override removed, catalog version restored");
        } else {
            data.plugins_flat.remove(uid);
        }
        data.plugins_user.remove(uid);

        patch.put(Field::PluginsFlat, &data.plugins_flat)?;
        patch.put(Field::PluginsUser, &data.plugins_user)?;
        patch.commit(&*self.store).await?;
        info!(%channel, uid, "user plugin deleted");

        if let Some(event) = build_event(&before, [uid], EventKind::Remove, None) {
            self.host.plugin_event(&event);
        }
        Ok(())
    }

    /// Install or refresh user scripts in the current channel.
    ///
    /// Every script needs a resolvable uid; otherwise the call fails with
    /// [`Error::InvalidHeader`] before anything is stored. A script whose uid
    /// matches the core script becomes the user core. Returns the resulting
    /// flat record for each uid.
    pub async fn add_user_scripts(
        &self,
        scripts: Vec<UserScript>,
    ) -> Result<BTreeMap<String, PluginRecord>> {
        self.ensure_init().await?;
        let channel = self.channel();
        let mut data = ChannelData::load(&*self.store, channel).await?;
        let now = now_secs();

        let mut added = BTreeSet::new();
        let mut refreshed = BTreeSet::new();
        let mut core_uid = None;
        let mut result = BTreeMap::new();

        for UserScript { meta, code } in scripts {
            let mut record = PluginRecord::from_meta(meta.clone())?;
            let uid = record.resolve_uid().ok_or(Error::InvalidHeader)?;

            if data.is_core_uid(&uid) {
                let core = CoreRecord::from_script(meta, code)?;
                result.insert(uid.clone(), core.to_plugin()?);
                data.iitc_core_user = Some(core);
                core_uid = Some(uid);
                continue;
            }

            let previous = data.plugins_user.get(&uid);
            let is_refresh = previous.is_some();
            record.uid = Some(uid.clone());
            record.status = PluginStatus::On;
            record.code = Some(code);
            record.user = true;
            record.overridden = false;
            record.added_at = previous.and_then(|p| p.added_at).or(Some(now));
            record.status_changed_at = Some(now);
            record.updated_at = Some(now);
            if record.filename.is_none() {
                record.filename = Some(derive_filename(&record));
            }

            let shadows_catalog = data
                .plugins_flat
                .get(&uid)
                .is_some_and(PluginRecord::is_catalog_origin);
            let flat = if shadows_catalog {
                if let Some(local) = data.plugins_local.get_mut(&uid) {
                    local.status = PluginStatus::Off;
                }
                let mut flat = data.plugins_flat.get(&uid).cloned().unwrap_or_default();
                flat.status = PluginStatus::On;
                flat.code = record.code.clone();
                flat.user = true;
                flat.overridden = true;
                flat.added_at = record.added_at;
                flat.status_changed_at = record.status_changed_at;
                flat.updated_at = record.updated_at;
                flat
            } else {
                let category = record
                    .category
                    .get_or_insert_with(|| DEFAULT_CATEGORY.to_string())
                    .clone();
                ensure_category(&mut data.categories, &category);
                record.clone()
            };

            data.plugins_flat.insert(uid.clone(), flat.clone());
            data.plugins_user.insert(uid.clone(), record);
            result.insert(uid.clone(), flat);

            if is_refresh {
                if !added.contains(&uid) {
                    refreshed.insert(uid);
                }
            } else {
                added.insert(uid);
            }
        }

        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::Categories, &data.categories)?;
        patch.put(Field::PluginsFlat, &data.plugins_flat)?;
        patch.put(Field::PluginsLocal, &data.plugins_local)?;
        patch.put(Field::PluginsUser, &data.plugins_user)?;
        if let Some(core) = &data.iitc_core_user
            && core_uid.is_some()
        {
            patch.put(Field::IitcCoreUser, core)?;
        }
        patch.commit(&*self.store).await?;
        info!(
            %channel,
            added = added.len(),
            refreshed = refreshed.len(),
            core = core_uid.is_some(),
            "user scripts stored"
        );

        if let Some(event) = build_event(&data, &added, EventKind::Add, None) {
            self.host.plugin_event(&event);
        }
        refreshed.extend(core_uid);
        if let Some(event) =
            build_event(&data, &refreshed, EventKind::Update, Some(SourceHint::User))
        {
            self.host.plugin_event(&event);
        }
        Ok(result)
    }

    /// Switch to `channel`.
    ///
    /// The host is told to tear down everything enabled in the outgoing
    /// channel and to bring up everything enabled in the incoming one before
    /// any network access; then a forced reconciliation runs.
    pub async fn set_channel(self: &Arc<Self>, channel: Channel) -> Result<()> {
        self.ensure_init().await?;
        let previous = self.channel();

        let outgoing = ChannelData::load(&*self.store, previous).await?;
        if let Some(event) = build_event(
            &outgoing,
            enabled_uids(&outgoing),
            EventKind::Remove,
            None,
        ) {
            self.host.plugin_event(&event);
        }

        let structures = [
            Field::Categories,
            Field::PluginsFlat,
            Field::PluginsLocal,
            Field::PluginsUser,
        ];
        let keys: Vec<String> = structures.iter().map(|f| f.key(channel)).collect();
        let existing = self.store.get(Some(&keys)).await?;

        let mut patch = ChannelPatch::new(channel);
        patch.put_global(KEY_CHANNEL, &channel)?;
        patch.clear(Field::LastCheckUpdate);
        for field in structures {
            if existing.get(&field.key(channel)).is_none_or(|v| v.is_null()) {
                match field {
                    Field::Categories => patch.put(field, &Categories::new())?,
                    _ => patch.put(field, &PluginMap::new())?,
                };
            }
        }
        patch.commit(&*self.store).await?;
        self.set_current_channel(channel);
        info!(from = %previous, to = %channel, "channel switched");

        let incoming = ChannelData::load(&*self.store, channel).await?;
        if let Some(event) =
            build_event(&incoming, enabled_uids(&incoming), EventKind::Add, None)
        {
            self.host.plugin_event(&event);
        }

        self.check_updates(true).await
    }
}

fn ensure_category(categories: &mut Categories, name: &str) {
    categories
        .entry(name.to_string())
        .or_insert_with(|| Category::named(name));
}

/// File name for a user script that does not declare one: `<id>.user.js`,
/// else a slug of its name.
fn derive_filename(record: &PluginRecord) -> String {
    if let Some(id) = record.id.as_deref().filter(|id| !id.is_empty()) {
        return format!("{id}.user.js");
    }
    let source = record.name.as_deref().unwrap_or("plugin");
    let mut slug = String::with_capacity(source.len());
    for c in source.chars() {
        if c.is_alphanumeric() {
            slug.extend(c.to_lowercase());
        } else if !slug.ends_with('-') && !slug.is_empty() {
            slug.push('-');
        }
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "plugin.user.js".to_string()
    } else {
        format!("{slug}.user.js")
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case(Some("ap-stats"), Some("AP stats"), "ap-stats.user.js")]
    #[case(None, Some("My Cool Plugin!"), "my-cool-plugin.user.js")]
    #[case(None, Some("  Hello,  World  "), "hello-world.user.js")]
    #[case(Some(""), Some("X"), "x.user.js")]
    #[case(None, Some("!!!"), "plugin.user.js")]
    #[case(None, None, "plugin.user.js")]
    fn filename_is_derived(
        #[case] id: Option<&str>,
        #[case] name: Option<&str>,
        #[case] expected: &str,
    ) {
        let record = PluginRecord {
            id: id.map(str::to_string),
            name: name.map(str::to_string),
            ..Default::default()
        };
        assert_eq!(derive_filename(&record), expected);
    }
}
