//! Domain error taxonomy.

use std::path::PathBuf;

use thiserror::Error;

use crate::domain::NodeId;

/// Errors from routing-table mutation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RoutingError {
    /// A sender claimed our own id. The packet is dropped and logged.
    #[error("sender claims our own node id {0}")]
    OwnIdCollision(NodeId),

    /// All-zero (uninitialised) sender id.
    #[error("sender id is the zero sentinel")]
    BadSenderId,
}

/// Errors terminating a lookup without a result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    /// The lookup was cancelled before it converged.
    #[error("lookup cancelled")]
    Cancelled,

    /// The per-lookup deadline elapsed.
    #[error("lookup deadline exceeded")]
    DeadlineExceeded,

    /// The shortlist was exhausted without a single successful response.
    #[error("no contacts responded")]
    NoContacts,
}

/// Errors loading or saving the routing-table snapshot.
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Filesystem failure.
    #[error("snapshot I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The file is not valid bencode.
    #[error("snapshot is not valid bencode: {0}")]
    Bencode(#[from] dredge_bencode::BencodeError),

    /// The document decodes but does not match the snapshot schema. The
    /// file is left untouched.
    #[error("snapshot schema mismatch: {0}")]
    Schema(&'static str),
}

/// Errors constructing or loading a [`crate::DhtConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config {path}: {source}")]
    Read {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The file is not valid TOML for [`crate::DhtConfig`].
    #[error("cannot parse config {path}: {source}")]
    Parse {
        /// Path that failed.
        path: PathBuf,
        /// Underlying TOML error.
        source: Box<toml::de::Error>,
    },

    /// A field value the engine cannot run with.
    #[error("invalid config: {0}")]
    Invalid(&'static str),
}
