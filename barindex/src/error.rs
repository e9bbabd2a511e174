//! Error kinds the index core must distinguish (database failures, version
//! mismatches, missing rows, lock contention, corrupt probes, forwarding
//! failures).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum IndexError {
    #[error("database error: {0}")]
    DatabaseIo(#[from] rusqlite::Error),

    #[error("unsupported index schema version {found} (current is {current})")]
    VersionUnknown { found: i64, current: u32 },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("database busy")]
    Busy,

    #[error("corrupt index: {0}")]
    Corrupt(String),

    #[error("forwarded error from upstream: {0}")]
    Forwarded(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, IndexError>;
