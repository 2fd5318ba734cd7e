//! Config schema types (channels, repository hosts, fetch policy, storage).

use std::{fmt, path::PathBuf, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::Error;

/// An independent update track with its own repository and storage namespace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    #[default]
    Release,
    Beta,
    Custom,
}

impl Channel {
    pub const ALL: [Channel; 3] = [Channel::Release, Channel::Beta, Channel::Custom];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Release => "release",
            Self::Beta => "beta",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "release" => Ok(Self::Release),
            "beta" => Ok(Self::Beta),
            "custom" => Ok(Self::Custom),
            other => Err(Error::unknown_channel(other)),
        }
    }
}

/// Base URLs of the repositories serving `meta.json`, the core script and
/// `plugins/<filename>` for each channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkHost {
    pub release: String,
    pub beta: String,
    pub custom: String,
}

impl NetworkHost {
    pub fn get(&self, channel: Channel) -> &str {
        match channel {
            Channel::Release => &self.release,
            Channel::Beta => &self.beta,
            Channel::Custom => &self.custom,
        }
    }

    pub fn set(&mut self, channel: Channel, url: impl Into<String>) {
        let url = url.into();
        match channel {
            Channel::Release => self.release = url,
            Channel::Beta => self.beta = url,
            Channel::Custom => self.custom = url,
        }
    }
}

impl Default for NetworkHost {
    fn default() -> Self {
        Self {
            release: "https://iitc.app/build/release".into(),
            beta: "https://iitc.app/build/beta".into(),
            custom: "http://localhost:8000".into(),
        }
    }
}

/// Retry and progress policy for network requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    /// Upper bound for a single backoff wait, in seconds. Defaults to 30 minutes.
    pub max_backoff_secs: u64,
    /// Give up after this many attempts. `None` retries until the request succeeds.
    pub max_attempts: Option<u32>,
    /// Period of the progress signal while a request is outstanding.
    pub progress_interval_ms: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_backoff_secs: 30 * 60,
            max_attempts: None,
            progress_interval_ms: 300,
        }
    }
}

/// Where the binary keeps its key-value document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Path of the JSON store. Defaults to `<data dir>/storage.json`.
    pub path: Option<PathBuf>,
}

/// Root configuration.
///
/// `channel`, `network_host` and `is_daemon` are overrides: when unset, the
/// value already persisted in storage is used, then the built-in default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub channel: Option<Channel>,
    pub network_host: Option<NetworkHost>,
    pub is_daemon: Option<bool>,
    pub fetch: FetchConfig,
    pub storage: StorageConfig,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, rstest::rstest};

    #[rstest]
    #[case("release", Channel::Release)]
    #[case("beta", Channel::Beta)]
    #[case("custom", Channel::Custom)]
    fn channel_parses(#[case] raw: &str, #[case] expected: Channel) {
        assert_eq!(raw.parse::<Channel>().unwrap(), expected);
        assert_eq!(expected.to_string(), raw);
    }

    #[test]
    fn unknown_channel_is_rejected() {
        let err = "nightly".parse::<Channel>().unwrap_err();
        assert_eq!(err.to_string(), "unknown channel: nightly");
    }

    #[test]
    fn network_host_set_and_get() {
        let mut hosts = NetworkHost::default();
        hosts.set(Channel::Custom, "http://127.0.0.1:31606/custom");
        assert_eq!(hosts.get(Channel::Custom), "http://127.0.0.1:31606/custom");
        assert_eq!(hosts.get(Channel::Release), "https://iitc.app/build/release");
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: ManagerConfig = toml::from_str(
            r#"
            channel = "beta"

            [fetch]
            max_attempts = 3
            "#,
        )
        .unwrap();
        assert_eq!(cfg.channel, Some(Channel::Beta));
        assert_eq!(cfg.fetch.max_attempts, Some(3));
        assert_eq!(cfg.fetch.max_backoff_secs, 1800);
        assert_eq!(cfg.fetch.progress_interval_ms, 300);
        assert!(cfg.network_host.is_none());
        assert!(cfg.is_daemon.is_none());
    }

    #[test]
    fn partial_network_host_keeps_other_defaults() {
        let cfg: ManagerConfig =
            serde_json::from_str(r#"{"network_host": {"custom": "http://10.0.0.2"}}"#).unwrap();
        let hosts = cfg.network_host.unwrap();
        assert_eq!(hosts.custom, "http://10.0.0.2");
        assert_eq!(hosts.beta, "https://iitc.app/build/beta");
    }
}
