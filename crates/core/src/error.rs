use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Config(#[from] iitcm_config::Error),

    #[error("The plugin has an incorrect ==UserScript== header")]
    InvalidHeader,

    #[error("plugin not found: {uid}")]
    PluginNotFound { uid: String },

    #[error("plugin is not user-supplied and cannot be deleted: {uid}")]
    NotDeletable { uid: String },

    #[error("invalid value stored under {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{message}")]
    Message { message: String },

    #[error("{context}: {source}")]
    External {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl Error {
    #[must_use]
    pub fn message(message: impl Into<String>) -> Self {
        Self::Message {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn plugin_not_found(uid: impl Into<String>) -> Self {
        Self::PluginNotFound { uid: uid.into() }
    }

    #[must_use]
    pub fn not_deletable(uid: impl Into<String>) -> Self {
        Self::NotDeletable { uid: uid.into() }
    }

    #[must_use]
    pub fn corrupt(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Corrupt {
            key: key.into(),
            source,
        }
    }

    #[must_use]
    pub fn external(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            context: context.into(),
            source: Box::new(source),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
