//! Core and external synchronization loops.

use std::{collections::BTreeSet, sync::Arc};

use {
    iitcm_config::Channel,
    serde_json::{Map, Value},
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    channel::{
        ChannelData, ChannelPatch, DEFAULT_UPDATE_CHECK_INTERVAL, Field,
        KEY_EXTERNAL_UPDATE_CHECK_INTERVAL, KEY_LAST_CHECK_EXTERNAL_UPDATE, global,
    },
    events::{EventKind, SourceHint, build_event},
    manager::{Manager, now_secs},
    meta::parse_meta,
    reconcile::{catalog_categories, flatten_catalog, merge_flat, rebuild_categories},
    scheduler::SyncLoop,
    types::{Catalog, CoreRecord, PluginMap, PluginRecord},
};

/// File name of the core script in every repository.
pub const CORE_SCRIPT: &str = "total-conversion-build.user.js";

/// Seconds left before a check that last ran at `last` is due again.
fn remaining(last: Option<u64>, interval: u64, now: u64) -> Option<u64> {
    let last = last?;
    let elapsed = now.saturating_sub(last);
    (elapsed < interval).then(|| interval - elapsed)
}

/// Outcome of refreshing the local plugin cache.
struct LocalRefresh {
    plugins_local: PluginMap,
    updated: Vec<String>,
    dropped: Vec<String>,
}

impl Manager {
    /// Reconcile the current channel against its repository.
    ///
    /// Runs when `force` is set, when the channel was never reconciled, or
    /// when its check interval has elapsed; otherwise only the timer is
    /// re-armed. The catalog is downloaded only when its `Last-Modified`
    /// changed (or on `force`).
    pub async fn check_updates(self: &Arc<Self>, force: bool) -> Result<()> {
        self.ensure_init().await?;
        self.scheduler.cancel(SyncLoop::Core);

        let channel = self.channel();
        let data = ChannelData::load(&*self.store, channel).await?;
        let interval = data.update_interval();

        let never_synced = data.last_modified.is_none() || data.last_check_update.is_none();
        if !force
            && !never_synced
            && let Some(wait) = remaining(data.last_check_update, interval, now_secs())
        {
            debug!(%channel, wait_secs = wait, "core update not due");
            self.arm(SyncLoop::Core, wait);
            return Ok(());
        }

        let meta_url = format!("{}/meta.json", self.host_url(channel));
        let last_modified = self.fetcher.get_last_modified(&meta_url, true).await;
        let changed = data.last_modified.is_none() || last_modified != data.last_modified;
        if force || changed {
            self.update_core(data, last_modified).await?;
        } else {
            debug!(%channel, "catalog not modified");
        }

        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::LastCheckUpdate, &now_secs())?;
        patch.commit(&*self.store).await?;

        self.arm(SyncLoop::Core, interval);
        Ok(())
    }

    /// Download the catalog and rebuild the channel's flat view.
    async fn update_core(&self, data: ChannelData, last_modified: Option<String>) -> Result<()> {
        let channel = data.channel;
        let meta_url = format!("{}/meta.json", self.host_url(channel));

        let Some(raw) = self.fetcher.get_json(&meta_url, true).await else {
            warn!(%channel, url = %meta_url, "catalog unavailable, skipping this cycle");
            return Ok(());
        };
        let Some(catalog) = Catalog::from_value(raw) else {
            warn!(%channel, url = %meta_url, "catalog has no categories, skipping this cycle");
            return Ok(());
        };

        let fresh = flatten_catalog(&catalog);
        let categories = rebuild_categories(catalog_categories(&catalog), &data.plugins_user);

        let (core, local) = tokio::join!(
            self.refresh_core(channel),
            self.refresh_local(channel, &data.plugins_local, &fresh),
        );
        let core = core?;

        let plugins_flat = merge_flat(fresh, &local.plugins_local, &data.plugins_user);

        let mut patch = ChannelPatch::new(channel);
        match &catalog.iitc_version {
            Some(version) => patch.put(Field::IitcVersion, version)?,
            None => patch.clear(Field::IitcVersion),
        };
        match &last_modified {
            Some(value) => patch.put(Field::LastModified, value)?,
            None => patch.clear(Field::LastModified),
        };
        patch.put(Field::Categories, &categories)?;
        patch.put(Field::PluginsFlat, &plugins_flat)?;
        patch.put(Field::PluginsLocal, &local.plugins_local)?;
        patch.commit(&*self.store).await?;

        info!(
            %channel,
            plugins = plugins_flat.len(),
            cached = local.plugins_local.len(),
            version = catalog.iitc_version.as_deref().unwrap_or("unknown"),
            "catalog reconciled"
        );

        let before = data.clone();
        let core_changed = core.as_ref().is_some_and(|fresh_core| {
            before
                .iitc_core
                .as_ref()
                .is_none_or(|old| old.uid != fresh_core.uid || old.code != fresh_core.code)
        });
        let after = ChannelData {
            iitc_version: catalog.iitc_version.clone(),
            last_modified,
            iitc_core: core.or(data.iitc_core),
            categories,
            plugins_flat,
            plugins_local: local.plugins_local,
            ..data
        };

        if let Some(event) =
            build_event(&before, &local.dropped, EventKind::Remove, Some(SourceHint::Local))
        {
            self.host.plugin_event(&event);
        }
        let mut updated: BTreeSet<String> = local.updated.into_iter().collect();
        if core_changed && let Some(uid) = after.core_uid() {
            updated.insert(uid);
        }
        if let Some(event) =
            build_event(&after, &updated, EventKind::Update, Some(SourceHint::Local))
        {
            self.host.plugin_event(&event);
        }
        Ok(())
    }

    /// Fetch the core script and persist it as the channel's catalog core.
    async fn refresh_core(&self, channel: Channel) -> Result<Option<CoreRecord>> {
        let url = format!("{}/{CORE_SCRIPT}", self.host_url(channel));
        let Some(code) = self.fetcher.get_text(&url, true).await else {
            warn!(%channel, %url, "core script unavailable");
            return Ok(None);
        };
        let Some(meta) = parse_meta(&code) else {
            warn!(%channel, %url, "core script has no ==UserScript== header");
            return Ok(None);
        };
        let core = match CoreRecord::from_script(meta, code) {
            Ok(core) => core,
            Err(e) => {
                warn!(%channel, error = %e, "core script header is invalid");
                return Ok(None);
            },
        };

        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::IitcCore, &core)?;
        patch.commit(&*self.store).await?;
        debug!(%channel, version = core.version.as_deref().unwrap_or("unknown"), "core script stored");
        Ok(Some(core))
    }

    /// Re-download every cached catalog plugin still in the catalog and
    /// drop the ones that disappeared.
    async fn refresh_local(
        &self,
        channel: Channel,
        cached: &PluginMap,
        catalog: &PluginMap,
    ) -> LocalRefresh {
        let host = self.host_url(channel);
        let mut plugins_local = PluginMap::new();
        let mut updated = Vec::new();
        let mut dropped = Vec::new();

        for (uid, record) in cached {
            let filename = record.filename.as_deref().filter(|f| !f.is_empty());
            let (Some(filename), true) = (filename, catalog.contains_key(uid)) else {
                debug!(%channel, uid = %uid, "cached plugin left the catalog");
                dropped.push(uid.clone());
                continue;
            };

            let mut record = record.clone();
            let url = format!("{host}/plugins/{filename}");
            if let Some(code) = self.fetcher.get_text(&url, false).await {
                if record.code.as_deref() != Some(code.as_str()) {
                    updated.push(uid.clone());
                }
                record.code = Some(code);
                record.updated_at = Some(now_secs());
            }
            plugins_local.insert(uid.clone(), record);
        }

        LocalRefresh {
            plugins_local,
            updated,
            dropped,
        }
    }

    /// Check user scripts that declare `updateURL` and `downloadURL` for
    /// new versions. Runs on its own interval and timer.
    pub async fn check_external_updates(self: &Arc<Self>, force: bool) -> Result<()> {
        self.ensure_init().await?;
        self.scheduler.cancel(SyncLoop::External);

        let keys = [
            KEY_LAST_CHECK_EXTERNAL_UPDATE,
            KEY_EXTERNAL_UPDATE_CHECK_INTERVAL,
        ]
        .map(String::from);
        let stored = self.store.get(Some(&keys)).await?;
        let interval = global::<u64>(&stored, KEY_EXTERNAL_UPDATE_CHECK_INTERVAL)
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_UPDATE_CHECK_INTERVAL);
        let last = global::<u64>(&stored, KEY_LAST_CHECK_EXTERNAL_UPDATE);

        if !force && let Some(wait) = remaining(last, interval, now_secs()) {
            debug!(wait_secs = wait, "external update not due");
            self.arm(SyncLoop::External, wait);
            return Ok(());
        }

        self.update_external(self.channel()).await?;

        let mut data = Map::new();
        data.insert(KEY_LAST_CHECK_EXTERNAL_UPDATE.into(), Value::from(now_secs()));
        self.store.set(data).await?;

        self.arm(SyncLoop::External, interval);
        Ok(())
    }

    async fn update_external(&self, channel: Channel) -> Result<()> {
        let data = ChannelData::load(&*self.store, channel).await?;
        let mut plugins_user = data.plugins_user.clone();
        let mut updated = Vec::new();

        for (uid, plugin) in plugins_user.iter_mut() {
            let (Some(update_url), Some(download_url)) =
                (plugin.update_url.clone(), plugin.download_url.clone())
            else {
                continue;
            };
            let Some(fresh) = self.fetch_external(uid, plugin, &update_url, &download_url).await
            else {
                continue;
            };
            info!(
                %channel,
                uid = %uid,
                from = plugin.version.as_deref().unwrap_or("unknown"),
                to = fresh.version.as_deref().unwrap_or("unknown"),
                "user plugin updated"
            );
            *plugin = fresh;
            updated.push(uid.clone());
        }

        if updated.is_empty() {
            debug!(%channel, "no user plugin updates");
            return Ok(());
        }

        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::PluginsUser, &plugins_user)?;
        patch.commit(&*self.store).await?;

        let after = ChannelData {
            plugins_user,
            ..data
        };
        if let Some(event) =
            build_event(&after, &updated, EventKind::Update, Some(SourceHint::User))
        {
            self.host.plugin_event(&event);
        }
        Ok(())
    }

    /// The replacement record for `current`, or `None` when there is no
    /// newer version or it could not be downloaded.
    async fn fetch_external(
        &self,
        uid: &str,
        current: &PluginRecord,
        update_url: &str,
        download_url: &str,
    ) -> Option<PluginRecord> {
        let header = self.fetcher.get_text(update_url, false).await?;
        let meta = parse_meta(&header)?;
        let version = meta.get("version").and_then(Value::as_str)?;
        if current.version.as_deref() == Some(version) {
            return None;
        }

        let code = self.fetcher.get_text(download_url, false).await?;
        let meta = parse_meta(&code).unwrap_or(meta);
        let mut fresh = match PluginRecord::from_meta(meta) {
            Ok(record) => record,
            Err(e) => {
                warn!(uid, error = %e, "update has an invalid header");
                return None;
            },
        };
        fresh.uid = Some(uid.to_string());
        fresh.status = current.status;
        fresh.user = current.user;
        fresh.added_at = current.added_at;
        fresh.status_changed_at = current.status_changed_at;
        fresh.updated_at = Some(now_secs());
        fresh.category = current.category.clone().or(fresh.category);
        fresh.filename = current.filename.clone().or(fresh.filename);
        fresh.update_url = fresh.update_url.or_else(|| Some(update_url.to_string()));
        fresh.download_url = fresh.download_url.or_else(|| Some(download_url.to_string()));
        fresh.code = Some(code);
        Some(fresh)
    }
}
