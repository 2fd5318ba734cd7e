use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error("unknown channel: {channel}")]
    UnknownChannel { channel: String },

    #[error("unsupported config format: .{extension}")]
    UnsupportedFormat { extension: String },
}

impl Error {
    #[must_use]
    pub fn unknown_channel(channel: impl Into<String>) -> Self {
        Self::UnknownChannel {
            channel: channel.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
