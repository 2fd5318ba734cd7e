//! The plugin manager: settings bootstrap, accessors and injection.
//!
//! Synchronization lives in [`crate::sync`], lifecycle operations in
//! [`crate::lifecycle`]; both are further `impl Manager` blocks.

use std::{
    sync::{Arc, RwLock},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

use {
    futures::future::BoxFuture,
    iitcm_config::{Channel, ManagerConfig, NetworkHost},
    serde_json::{Map, Value},
    tracing::{debug, info, warn},
};

use crate::{
    Result,
    channel::{
        ChannelData, ChannelPatch, Field, KEY_CHANNEL, KEY_EXTERNAL_UPDATE_CHECK_INTERVAL,
        KEY_IS_DAEMON, KEY_NETWORK_HOST, global,
    },
    fetch::Fetcher,
    host::Host,
    http::HttpClient,
    scheduler::{Scheduler, SyncLoop},
    store::Store,
    types::{PluginMap, PluginRecord},
};

pub(crate) fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[derive(Debug, Clone)]
struct Settings {
    channel: Channel,
    network_host: NetworkHost,
    is_daemon: bool,
    /// Process-local daemon override, never persisted.
    session_daemon: Option<bool>,
    initialized: bool,
}

/// Keeps the plugin state of every channel in sync with its repository and
/// the user's own scripts.
pub struct Manager {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) fetcher: Fetcher,
    pub(crate) host: Host,
    pub(crate) scheduler: Scheduler,
    config: ManagerConfig,
    settings: RwLock<Settings>,
}

impl Manager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn Store>,
        client: Arc<dyn HttpClient>,
        host: Host,
    ) -> Arc<Self> {
        let fetcher = Fetcher::new(client, host.clone(), config.fetch.clone());
        let settings = Settings {
            channel: config.channel.unwrap_or_default(),
            network_host: config.network_host.clone().unwrap_or_default(),
            is_daemon: config.is_daemon.unwrap_or(true),
            session_daemon: None,
            initialized: false,
        };
        Arc::new(Self {
            store,
            fetcher,
            host,
            scheduler: Scheduler::new(),
            config,
            settings: RwLock::new(settings),
        })
    }

    /// Resolve `channel`, `network_host` and `is_daemon` (config override,
    /// then stored value, then default) and write them back to storage.
    pub async fn init(&self) -> Result<()> {
        let keys = [KEY_CHANNEL, KEY_NETWORK_HOST, KEY_IS_DAEMON].map(String::from);
        let stored = self.store.get(Some(&keys)).await?;

        let channel = self
            .config
            .channel
            .or_else(|| global::<Channel>(&stored, KEY_CHANNEL))
            .unwrap_or_default();
        let network_host = self
            .config
            .network_host
            .clone()
            .or_else(|| global::<NetworkHost>(&stored, KEY_NETWORK_HOST))
            .unwrap_or_default();
        let is_daemon = self
            .config
            .is_daemon
            .or_else(|| global::<bool>(&stored, KEY_IS_DAEMON))
            .unwrap_or(true);

        let mut data = Map::new();
        data.insert(KEY_CHANNEL.into(), serde_json::to_value(channel)?);
        data.insert(KEY_NETWORK_HOST.into(), serde_json::to_value(&network_host)?);
        data.insert(KEY_IS_DAEMON.into(), Value::Bool(is_daemon));
        self.store.set(data).await?;

        {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            settings.channel = channel;
            settings.network_host = network_host;
            settings.is_daemon = is_daemon;
            settings.initialized = true;
        }
        info!(%channel, is_daemon, "plugin manager initialised");
        Ok(())
    }

    pub(crate) async fn ensure_init(&self) -> Result<()> {
        let initialized = self
            .settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .initialized;
        if !initialized {
            self.init().await?;
        }
        Ok(())
    }

    /// Initialise, then run one core and one external check. In daemon mode
    /// both loops keep rescheduling themselves until [`Manager::stop`].
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        self.init().await?;
        self.check_updates(false).await?;
        self.check_external_updates(false).await?;
        Ok(())
    }

    /// Cancel both pending timers.
    pub fn stop(&self) {
        self.scheduler.cancel_all();
        info!("plugin manager stopped");
    }

    pub fn channel(&self) -> Channel {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .channel
    }

    pub fn network_host(&self) -> NetworkHost {
        self.settings
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .network_host
            .clone()
    }

    /// Whether sync loops re-arm their timers: the session override when
    /// set, else the persisted mode.
    pub fn is_daemon(&self) -> bool {
        let settings = self.settings.read().unwrap_or_else(|e| e.into_inner());
        settings.session_daemon.unwrap_or(settings.is_daemon)
    }

    /// Override daemon mode for this process only. Unlike
    /// `ManagerConfig::is_daemon`, the value is never written to storage, so
    /// a one-shot invocation does not change later runs.
    pub fn set_session_daemon(&self, daemon: Option<bool>) {
        self.settings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .session_daemon = daemon;
        if daemon == Some(false) {
            self.scheduler.cancel_all();
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub(crate) fn set_current_channel(&self, channel: Channel) {
        self.settings
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .channel = channel;
    }

    /// Repository base URL for `channel`, without a trailing slash.
    pub(crate) fn host_url(&self, channel: Channel) -> String {
        let settings = self.settings.read().unwrap_or_else(|e| e.into_inner());
        settings
            .network_host
            .get(channel)
            .trim_end_matches('/')
            .to_string()
    }

    /// Arm `which` to run again after `secs`, in daemon mode only.
    pub(crate) fn arm(self: &Arc<Self>, which: SyncLoop, secs: u64) {
        if !self.is_daemon() {
            return;
        }
        let tick = Arc::clone(self).scheduled_tick(which);
        self.scheduler
            .schedule(which, Duration::from_secs(secs), tick);
    }

    fn scheduled_tick(self: Arc<Self>, which: SyncLoop) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            let result = match which {
                SyncLoop::Core => self.check_updates(false).await,
                SyncLoop::External => self.check_external_updates(false).await,
            };
            if let Err(e) = result {
                warn!(?which, error = %e, "scheduled update check failed");
            }
        })
    }

    /// The flat view of the current channel.
    pub async fn plugins(&self) -> Result<PluginMap> {
        self.ensure_init().await?;
        let data = ChannelData::load(&*self.store, self.channel()).await?;
        Ok(data.plugins_flat)
    }

    /// The flat record for `uid` in the current channel.
    pub async fn get_plugin_info(&self, uid: &str) -> Result<Option<PluginRecord>> {
        Ok(self.plugins().await?.remove(uid))
    }

    /// Point the custom channel at another repository.
    pub async fn set_custom_channel_url(&self, url: &str) -> Result<()> {
        self.ensure_init().await?;
        let network_host = {
            let mut settings = self.settings.write().unwrap_or_else(|e| e.into_inner());
            settings.network_host.set(Channel::Custom, url);
            settings.network_host.clone()
        };
        let mut data = Map::new();
        data.insert(KEY_NETWORK_HOST.into(), serde_json::to_value(&network_host)?);
        self.store.set(data).await?;
        info!(url, "custom channel url updated");
        Ok(())
    }

    /// Set the core check period of `channel`, in seconds. For the current
    /// channel the pending timer is re-armed against the new period.
    pub async fn set_update_check_interval(
        self: &Arc<Self>,
        secs: u64,
        channel: Channel,
    ) -> Result<()> {
        self.ensure_init().await?;
        let mut patch = ChannelPatch::new(channel);
        patch.put(Field::UpdateCheckInterval, &secs)?;
        patch.commit(&*self.store).await?;
        debug!(%channel, secs, "update check interval set");

        if channel == self.channel() {
            self.check_updates(false).await?;
        }
        Ok(())
    }

    /// Set the external check period, in seconds.
    pub async fn set_external_update_check_interval(self: &Arc<Self>, secs: u64) -> Result<()> {
        self.ensure_init().await?;
        let mut data = Map::new();
        data.insert(KEY_EXTERNAL_UPDATE_CHECK_INTERVAL.into(), Value::from(secs));
        self.store.set(data).await?;
        debug!(secs, "external update check interval set");
        self.check_external_updates(false).await
    }

    /// Push the core script and every enabled plugin to the host.
    ///
    /// The core goes first. Each plugin is resolved to the record that owns
    /// its code: the user script when one is active, else the cached copy.
    pub async fn inject(&self) -> Result<()> {
        self.ensure_init().await?;
        let data = ChannelData::load(&*self.store, self.channel()).await?;

        let Some(core) = data.active_core() else {
            debug!(channel = %data.channel, "no core script to inject");
            return Ok(());
        };
        self.host.inject_plugin(&core.to_plugin()?);
        self.host.inject_user_script(&core.code);

        let mut injected = 0usize;
        for (uid, flat) in data.plugins_flat.iter().filter(|(_, p)| p.is_on()) {
            let source = if flat.user {
                data.plugins_user.get(uid)
            } else {
                data.plugins_local.get(uid)
            };
            let mut plugin = source.unwrap_or(flat).clone();
            let Some(code) = plugin.code.clone().or_else(|| flat.code.clone()) else {
                warn!(uid = %uid, "enabled plugin has no code");
                continue;
            };
            plugin.uid = Some(uid.clone());
            plugin.code = Some(code.clone());
            self.host.inject_plugin(&plugin);
            self.host.inject_user_script(&code);
            injected += 1;
        }
        info!(channel = %data.channel, plugins = injected, "injected enabled plugins");
        Ok(())
    }
}
