//! Backup-archive index engine: a relational catalog of backup jobs,
//! storages and archived entries, with aggregate maintenance, a background
//! cleanup worker, and master/slave forwarding for remote indices.

mod aggregate;
mod error;
mod handle;
mod migrate;
mod mutate;
mod query;
mod rpc;
mod schema;
mod types;
mod worker;

pub use error::{IndexError, Result};
pub use handle::{
    clear_pause_callback, index_do, index_dox, notify_worker, pause_requested, quit_requested,
    request_quit, set_pause_callback, use_count, IndexHandle, Mode, UpstreamPeer,
};
pub use mutate::{
    add_directory, add_file, add_hardlink, add_image, add_link, add_special,
    assign_storage_to_entity, delete_entity, delete_entry, delete_history, delete_skipped,
    delete_storage, find_uuid, new_entity, new_history, new_storage, new_uuid, prune_entities,
    prune_uuid, set_state, update_entity, update_entity_infos, update_storage,
    update_storage_infos,
};
pub use query::{
    append_ordering, filter_append, ids_clause, list_entities, list_entries, list_storages,
    list_uuids, normalize_fts_pattern, EntityRow, EntryRow, StorageRow, UuidRow,
};
pub use rpc::{escape_value, parse_reply, unescape_value};
pub use schema::{create as create_schema, read_version};
pub use types::{
    ArchiveType, EntryType, SortDirection, SortMode, StorageMode, StorageState,
    CURRENT_SCHEMA_VERSION, DATABASE_TIMEOUT_SECS, DEFAULT_ENTITY_ID, PURGE_BATCH_SIZE,
    SERVER_IO_TIMEOUT_SECS, WORKER_POLL_INTERVAL_SECS,
};
pub use worker::run as run_worker;
