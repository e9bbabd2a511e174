//! Enums shared across the schema, query builders and mutation API.

use num_enum::{IntoPrimitive, TryFromPrimitive};

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum ArchiveType {
    Normal = 0,
    Full = 1,
    Incremental = 2,
    Differential = 3,
    Continuous = 4,
    ContinuousName = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum EntryType {
    File = 0,
    Image = 1,
    Directory = 2,
    Link = 3,
    Hardlink = 4,
    Special = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum StorageState {
    None = 0,
    Ok = 1,
    Create = 2,
    UpdateRequested = 3,
    Update = 4,
    Error = 5,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[repr(i64)]
pub enum StorageMode {
    Manual = 0,
    Auto = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Ascending,
    Descending,
    None,
}

/// Column a listing is sorted by. The query builder maps each variant to a
/// concrete column name; adding a sort key means adding both a variant and
/// an arm in `column_name`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortMode {
    Name,
    Created,
    Size,
}

impl SortMode {
    pub fn column_name(self) -> &'static str {
        match self {
            SortMode::Name => "name",
            SortMode::Created => "created",
            SortMode::Size => "size",
        }
    }
}

/// Current wall-clock time as Unix seconds, used for `lastChecked`/log
/// timestamps where the caller has no more specific time to record.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Default entity id, permanent and never deleted (§3).
pub const DEFAULT_ENTITY_ID: i64 = 0;

/// Schema version emitted on CREATE and targeted by the migration chain (§4.E).
pub const CURRENT_SCHEMA_VERSION: u32 = 7;

pub const DATABASE_TIMEOUT_SECS: u64 = 30;
pub const SERVER_IO_TIMEOUT_SECS: u64 = 30;
pub const WORKER_POLL_INTERVAL_SECS: u64 = 20;
pub const PURGE_BATCH_SIZE: usize = 64;
