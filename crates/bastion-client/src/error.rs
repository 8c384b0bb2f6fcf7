//! Client error types.

use std::path::PathBuf;

use bastion_core::ValidationError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("cannot determine home directory")]
    NoHomeDir,

    #[error("config not found at {0} - run `bastion config set server_url <url>` first")]
    ConfigMissing(PathBuf),

    #[error("config I/O error at {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0} is not configured - run `bastion config set {0} <value>`")]
    NotConfigured(&'static str),

    #[error("unknown config key {0:?} (valid: {keys})", keys = crate::config::KEYS.join(", "))]
    UnknownKey(String),

    #[error("{0:?} is read-only (set by the server during register)")]
    ReadOnlyKey(String),

    #[error("server URL {0:?} must use https")]
    InsecureUrl(String),

    #[error("invalid server URL {0:?}")]
    InvalidUrl(String),

    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("cannot read public key {path}: {source}")]
    PublicKey {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ClientError>;
