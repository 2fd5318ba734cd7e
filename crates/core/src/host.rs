//! Callbacks into the embedding application.
//!
//! Every callback is optional and fire-and-forget: a missing callback is a
//! no-op, and the engine never observes a result from one.

use std::{fmt, sync::Arc};

use crate::{events::PluginEvent, types::PluginRecord};

pub type InjectUserScriptFn = Arc<dyn Fn(&str) + Send + Sync>;
pub type InjectPluginFn = Arc<dyn Fn(&PluginRecord) + Send + Sync>;
pub type PluginEventFn = Arc<dyn Fn(&PluginEvent) + Send + Sync>;
pub type MessageFn = Arc<dyn Fn(&str, &[String]) + Send + Sync>;
pub type ProgressbarFn = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Clone, Default)]
pub struct Host {
    inject_user_script: Option<InjectUserScriptFn>,
    inject_plugin: Option<InjectPluginFn>,
    plugin_event: Option<PluginEventFn>,
    message: Option<MessageFn>,
    progressbar: Option<ProgressbarFn>,
}

impl Host {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deprecated raw-code injection; prefer [`Host::on_inject_plugin`].
    pub fn on_inject_user_script(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.inject_user_script = Some(Arc::new(f));
        self
    }

    pub fn on_inject_plugin(mut self, f: impl Fn(&PluginRecord) + Send + Sync + 'static) -> Self {
        self.inject_plugin = Some(Arc::new(f));
        self
    }

    pub fn on_plugin_event(mut self, f: impl Fn(&PluginEvent) + Send + Sync + 'static) -> Self {
        self.plugin_event = Some(Arc::new(f));
        self
    }

    /// User-facing status text, identified by a message key such as
    /// `serverNotAvailableRetry`.
    pub fn on_message(mut self, f: impl Fn(&str, &[String]) + Send + Sync + 'static) -> Self {
        self.message = Some(Arc::new(f));
        self
    }

    pub fn on_progressbar(mut self, f: impl Fn(bool) + Send + Sync + 'static) -> Self {
        self.progressbar = Some(Arc::new(f));
        self
    }

    pub(crate) fn inject_user_script(&self, code: &str) {
        if let Some(f) = &self.inject_user_script {
            f(code);
        }
    }

    pub(crate) fn inject_plugin(&self, plugin: &PluginRecord) {
        if let Some(f) = &self.inject_plugin {
            f(plugin);
        }
    }

    pub(crate) fn plugin_event(&self, event: &PluginEvent) {
        if let Some(f) = &self.plugin_event {
            f(event);
        }
    }

    pub(crate) fn message(&self, key: &str, args: &[String]) {
        if let Some(f) = &self.message {
            f(key, args);
        }
    }

    pub(crate) fn progressbar(&self, visible: bool) {
        if let Some(f) = &self.progressbar {
            f(visible);
        }
    }
}

impl fmt::Debug for Host {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Host")
            .field("inject_user_script", &self.inject_user_script.is_some())
            .field("inject_plugin", &self.inject_plugin.is_some())
            .field("plugin_event", &self.plugin_event.is_some())
            .field("message", &self.message.is_some())
            .field("progressbar", &self.progressbar.is_some())
            .finish()
    }
}
