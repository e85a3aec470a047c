//! Error types for table loading, the physics world, sessions and the transport

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TableError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ron::error::SpannedError,
    },

    #[error("table data is invalid: {0}")]
    Invalid(String),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PhysicsError {
    #[error("no table has been initialised")]
    NoTable,

    #[error("the table has already been initialised")]
    AlreadyInitialised,

    #[error("physics engine has no free bodies")]
    Exhausted,

    #[error("a cue ball already exists")]
    CueballExists,
}

/// Reasons a match cannot start. The session stays alive in a disabled state.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Physics(#[from] PhysicsError),

    #[error("no rule director for {0:?}")]
    NoDirector(crate::table::Ruleset),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] bincode::Error),

    #[error("unknown peer {0}")]
    UnknownPeer(u32),

    #[error("connection attempt to {0} timed out")]
    ConnectTimeout(std::net::SocketAddr),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("listen_addr {0} is not a socket address")]
    ListenAddr(String),

    #[error("table name must not be empty")]
    EmptyTable,

    #[error("{0} must be > 0")]
    ZeroInterval(&'static str),

    #[error("broadcast_interval must be >= tick_interval")]
    BroadcastFasterThanTick,
}

#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to spawn server thread: {0}")]
    Thread(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("server thread exited during startup")]
    Startup,
}
