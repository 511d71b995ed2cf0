//! Crate-wide error types.
//!
//! Fatal, caller-visible errors (configuration, transport bind failures) are
//! represented here so that both library consumers and integration tests can
//! match on error kind. Per-frame runtime errors never reach this type: they
//! are logged and the offending frame or connection is dropped in place.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid MAC address {0:?}")]
    InvalidMac(String),

    #[error("invalid filter rule {0:?}")]
    InvalidFilter(String),

    #[error("more than one of ifaces.links, ifaces.error_probs, path_loss was specified")]
    AmbiguousLinkModel,

    #[error("ifaces.error_probs has {rows} rows, expected {expected}")]
    ErrorProbDimensionMismatch { rows: usize, expected: usize },

    #[error("path_loss.positions/tx_powers length does not match ifaces.ids ({expected} entries)")]
    PathLossDimensionMismatch { expected: usize },

    #[error("unknown path-loss model {0:?}")]
    UnknownPathLossModel(String),

    #[error("failed to read PER file {path:?}: {source}")]
    PerFileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed PER file {path:?}: {reason}")]
    PerFileMalformed { path: PathBuf, reason: String },
}

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to bind transport {name}: {source}")]
    TransportBind {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
