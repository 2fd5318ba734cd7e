//! Plugin events reported to the host.
//!
//! Events are computed from a channel snapshot: callers pass the state after
//! the mutation for `add`/`update` and the state before it for `remove`, so
//! "was this plugin effectively present" is answered the same way for every
//! verb.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{
    channel::ChannelData,
    types::{CoreRecord, PluginRecord},
};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Add,
    Update,
    Remove,
}

/// Which record source is authoritative when resolving a uid.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SourceHint {
    /// The change came from the catalog cache. Uids shadowed by a user
    /// script are skipped.
    Local,
    /// The change came from a user script.
    User,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum EventPlugin {
    Plugin(PluginRecord),
    Core(CoreRecord),
    Removed {},
}

/// Payload of the `plugin_event` callback.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct PluginEvent {
    pub event: EventKind,
    pub plugins: BTreeMap<String, EventPlugin>,
}

impl PluginEvent {
    pub fn uids(&self) -> impl Iterator<Item = &str> {
        self.plugins.keys().map(String::as_str)
    }
}

/// Build the event for `uids`, or `None` when nothing is left to report.
pub fn build_event<I, S>(
    data: &ChannelData,
    uids: I,
    kind: EventKind,
    hint: Option<SourceHint>,
) -> Option<PluginEvent>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut plugins = BTreeMap::new();

    for uid in uids {
        let uid = uid.as_ref();
        if data.is_core_uid(uid) {
            if let Some(core) = resolve_core(data, hint) {
                let entry = match kind {
                    EventKind::Remove => EventPlugin::Removed {},
                    EventKind::Add | EventKind::Update => EventPlugin::Core(core.clone()),
                };
                plugins.insert(uid.to_string(), entry);
            }
            continue;
        }

        let Some(record) = resolve_plugin(data, uid, hint) else {
            continue;
        };
        if !record.is_on() {
            continue;
        }
        let entry = match kind {
            EventKind::Remove => EventPlugin::Removed {},
            EventKind::Add | EventKind::Update => {
                let mut record = record.clone();
                record.uid = Some(uid.to_string());
                EventPlugin::Plugin(record)
            },
        };
        plugins.insert(uid.to_string(), entry);
    }

    if plugins.is_empty() {
        None
    } else {
        Some(PluginEvent {
            event: kind,
            plugins,
        })
    }
}

/// Every uid effectively present in the page: the core script plus each
/// flat record that is on.
pub fn enabled_uids(data: &ChannelData) -> Vec<String> {
    let mut uids: Vec<String> = data.core_uid().into_iter().collect();
    uids.extend(
        data.plugins_flat
            .iter()
            .filter(|(_, record)| record.is_on())
            .map(|(uid, _)| uid.clone()),
    );
    uids
}

fn resolve_core(data: &ChannelData, hint: Option<SourceHint>) -> Option<&CoreRecord> {
    let user = data.iitc_core_user.as_ref().filter(|core| !core.is_empty());
    match hint {
        Some(SourceHint::Local) if user.is_some() => None,
        Some(SourceHint::Local) => data.iitc_core.as_ref(),
        Some(SourceHint::User) => user,
        None => data.active_core(),
    }
}

fn resolve_plugin<'a>(
    data: &'a ChannelData,
    uid: &str,
    hint: Option<SourceHint>,
) -> Option<&'a PluginRecord> {
    match hint {
        Some(SourceHint::Local) if data.plugins_user.contains_key(uid) => None,
        Some(SourceHint::Local) => data.plugins_local.get(uid),
        Some(SourceHint::User) => data.plugins_user.get(uid),
        None => data
            .plugins_user
            .get(uid)
            .or_else(|| data.plugins_local.get(uid))
            .or_else(|| data.plugins_flat.get(uid)),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::types::PluginStatus,
        serde_json::json,
    };

    fn record(uid: &str, status: PluginStatus) -> PluginRecord {
        PluginRecord {
            uid: Some(uid.into()),
            status,
            code: Some(format!("// {uid}")),
            ..Default::default()
        }
    }

    fn sample() -> ChannelData {
        let mut data = ChannelData {
            iitc_core: Some(CoreRecord {
                uid: Some("core+ns".into()),
                code: "// core".into(),
                ..Default::default()
            }),
            ..Default::default()
        };
        data.plugins_local
            .insert("on+ns".into(), record("on+ns", PluginStatus::On));
        data.plugins_local
            .insert("off+ns".into(), record("off+ns", PluginStatus::Off));
        data.plugins_local
            .insert("shadow+ns".into(), record("shadow+ns", PluginStatus::Off));
        data.plugins_user
            .insert("shadow+ns".into(), record("shadow+ns", PluginStatus::On));
        for uid in ["on+ns", "off+ns"] {
            let flat = data.plugins_local[uid].clone();
            data.plugins_flat.insert(uid.into(), flat);
        }
        let mut shadow = data.plugins_user["shadow+ns"].clone();
        shadow.user = true;
        shadow.overridden = true;
        data.plugins_flat.insert("shadow+ns".into(), shadow);
        data
    }

    #[test]
    fn off_plugins_are_dropped() {
        let data = sample();
        let event = build_event(&data, ["on+ns", "off+ns"], EventKind::Add, None).unwrap();
        assert_eq!(event.uids().collect::<Vec<_>>(), vec!["on+ns"]);
    }

    #[test]
    fn empty_payload_is_none() {
        let data = sample();
        assert!(build_event(&data, ["off+ns", "unknown+ns"], EventKind::Remove, None).is_none());
        assert!(build_event(&data, Vec::<String>::new(), EventKind::Add, None).is_none());
    }

    #[test]
    fn remove_carries_empty_objects() {
        let data = sample();
        let event = build_event(&data, ["on+ns"], EventKind::Remove, None).unwrap();
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value, json!({"event": "remove", "plugins": {"on+ns": {}}}));
    }

    #[test]
    fn local_hint_skips_user_shadowed_uids() {
        let data = sample();
        assert!(
            build_event(&data, ["shadow+ns"], EventKind::Update, Some(SourceHint::Local))
                .is_none()
        );
        let event =
            build_event(&data, ["shadow+ns"], EventKind::Update, Some(SourceHint::User)).unwrap();
        match &event.plugins["shadow+ns"] {
            EventPlugin::Plugin(p) => assert_eq!(p.code.as_deref(), Some("// shadow+ns")),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn core_is_always_reported() {
        let mut data = sample();
        let event = build_event(&data, ["core+ns"], EventKind::Update, None).unwrap();
        assert!(matches!(event.plugins["core+ns"], EventPlugin::Core(_)));

        data.iitc_core_user = Some(CoreRecord {
            uid: Some("core+ns".into()),
            code: "// user core".into(),
            ..Default::default()
        });
        assert!(
            build_event(&data, ["core+ns"], EventKind::Update, Some(SourceHint::Local)).is_none()
        );
        let event = build_event(&data, ["core+ns"], EventKind::Update, None).unwrap();
        match &event.plugins["core+ns"] {
            EventPlugin::Core(core) => assert_eq!(core.code, "// user core"),
            other => panic!("unexpected entry: {other:?}"),
        }
    }

    #[test]
    fn enabled_set_includes_core() {
        let data = sample();
        let mut uids = enabled_uids(&data);
        uids.sort();
        assert_eq!(uids, vec!["core+ns", "on+ns", "shadow+ns"]);
    }
}
