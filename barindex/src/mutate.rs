//! Mutation API (§4.J): add UUID/entity/storage/entry, state transitions,
//! soft/hard delete, and assign operations.

use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::aggregate;
use crate::error::{IndexError, Result};
use crate::handle::notify_worker;
use crate::types::{ArchiveType, EntryType, StorageMode, StorageState, DEFAULT_ENTITY_ID};

pub fn new_uuid(connection: &Connection, job_uuid: &str) -> Result<i64> {
    if Uuid::parse_str(job_uuid).is_err() {
        return Err(IndexError::Corrupt(format!("'{job_uuid}' is not a valid UUID")));
    }
    connection.execute(
        "INSERT OR IGNORE INTO uuids (jobUUID) VALUES (?1)",
        params![job_uuid],
    )?;
    find_uuid(connection, job_uuid)
}

pub fn find_uuid(connection: &Connection, job_uuid: &str) -> Result<i64> {
    connection
        .query_row(
            "SELECT id FROM uuids WHERE jobUUID = ?1",
            params![job_uuid],
            |row| row.get(0),
        )
        .map_err(|_| IndexError::NotFound(format!("uuid {job_uuid}")))
}

#[allow(clippy::too_many_arguments)]
pub fn new_entity(
    connection: &Connection,
    job_uuid: &str,
    schedule_uuid: &str,
    host_name: &str,
    user_name: &str,
    archive_type: ArchiveType,
    created: i64,
) -> Result<i64> {
    new_uuid(connection, job_uuid)?;
    let archive_type_value: i64 = archive_type.into();
    connection.execute(
        "INSERT INTO entities (jobUUID, scheduleUUID, hostName, userName, archiveType, created)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![job_uuid, schedule_uuid, host_name, user_name, archive_type_value, created],
    )?;
    Ok(connection.last_insert_rowid())
}

#[allow(clippy::too_many_arguments)]
pub fn new_storage(
    connection: &Connection,
    entity_id: i64,
    user_name: &str,
    name: &str,
    created: i64,
    size: i64,
    state: StorageState,
    mode: StorageMode,
) -> Result<i64> {
    let state_value: i64 = state.into();
    let mode_value: i64 = mode.into();
    connection.execute(
        "INSERT INTO storages (entityId, userName, name, created, size, state, mode)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![entity_id, user_name, name, created, size, state_value, mode_value],
    )?;
    Ok(connection.last_insert_rowid())
}

fn insert_entry(
    connection: &Connection,
    entity_id: i64,
    entry_type: EntryType,
    name: &str,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
    size: i64,
) -> Result<i64> {
    let type_value: i64 = entry_type.into();
    connection.execute(
        "INSERT OR IGNORE INTO entries
            (entityId, type, name, timeLastAccess, timeModified, timeLastChanged, userId, groupId, permission, size)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![entity_id, type_value, name, times.0, times.1, times.2, uid, gid, permission, size],
    )?;
    let entry_id: i64 = connection.query_row(
        "SELECT id FROM entries WHERE entityId = ?1 AND type = ?2 AND name = ?3",
        params![entity_id, type_value, name],
        |row| row.get(0),
    )?;

    connection.execute(
        "INSERT OR IGNORE INTO entriesNewest (entryId, entityId, name) VALUES (?1, ?2, ?3)",
        params![entry_id, entity_id, name],
    )?;
    connection.execute(
        "INSERT OR IGNORE INTO entriesFTS(rowid, name) VALUES (?1, ?2)",
        params![entry_id, name],
    )?;

    Ok(entry_id)
}

fn is_newest(connection: &Connection, entry_id: i64) -> Result<bool> {
    Ok(connection.query_row(
        "SELECT COUNT(*) FROM entriesNewest WHERE entryId = ?1",
        params![entry_id],
        |row| row.get::<_, i64>(0),
    )? > 0)
}

fn parent_directory(name: &str) -> String {
    let trimmed = name.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => "/".to_string(),
        Some(idx) => trimmed[..idx].to_string(),
        None => "/".to_string(),
    }
}

#[allow(clippy::too_many_arguments)]
pub fn add_file(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    size: i64,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
    fragment_offset: i64,
    fragment_size: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::File, name, times, uid, gid, permission, size)?;
    connection.execute(
        "INSERT OR IGNORE INTO fileEntries (entryId, size) VALUES (?1, ?2)",
        params![entry_id, size],
    )?;
    connection.execute(
        "INSERT INTO entryFragments (entryId, storageId, offset, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, storage_id, fragment_offset, fragment_size],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), fragment_size, newest)?;
    Ok(entry_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_image(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    file_system_type: i64,
    size: i64,
    block_size: i64,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
    fragment_offset: i64,
    fragment_size: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::Image, name, times, uid, gid, permission, size)?;
    connection.execute(
        "INSERT OR IGNORE INTO imageEntries (entryId, fileSystemType, size, blockSize) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, file_system_type, size, block_size],
    )?;
    connection.execute(
        "INSERT INTO entryFragments (entryId, storageId, offset, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, storage_id, fragment_offset, fragment_size],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), fragment_size, newest)?;
    Ok(entry_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_hardlink(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    size: i64,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
    fragment_offset: i64,
    fragment_size: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::Hardlink, name, times, uid, gid, permission, size)?;
    connection.execute(
        "INSERT OR IGNORE INTO hardlinkEntries (entryId, size) VALUES (?1, ?2)",
        params![entry_id, size],
    )?;
    connection.execute(
        "INSERT INTO entryFragments (entryId, storageId, offset, size) VALUES (?1, ?2, ?3, ?4)",
        params![entry_id, storage_id, fragment_offset, fragment_size],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), fragment_size, newest)?;
    Ok(entry_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_directory(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::Directory, name, times, uid, gid, permission, 0)?;
    connection.execute(
        "INSERT OR IGNORE INTO directoryEntries (entryId, storageId, name) VALUES (?1, ?2, ?3)",
        params![entry_id, storage_id, name],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), 0, newest)?;
    Ok(entry_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_link(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    destination_name: &str,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::Link, name, times, uid, gid, permission, 0)?;
    connection.execute(
        "INSERT OR IGNORE INTO linkEntries (entryId, storageId, destinationName) VALUES (?1, ?2, ?3)",
        params![entry_id, storage_id, destination_name],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), 0, newest)?;
    Ok(entry_id)
}

#[allow(clippy::too_many_arguments)]
pub fn add_special(
    connection: &Connection,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    special_type: i64,
    major: i64,
    minor: i64,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
) -> Result<i64> {
    let entry_id = insert_entry(connection, entity_id, EntryType::Special, name, times, uid, gid, permission, 0)?;
    connection.execute(
        "INSERT OR IGNORE INTO specialEntries (entryId, storageId, specialType, major, minor) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entry_id, storage_id, special_type, major, minor],
    )?;

    let newest = is_newest(connection, entry_id)?;
    aggregate::bump_directory_aggregates(connection, storage_id, &parent_directory(name), 0, newest)?;
    Ok(entry_id)
}

pub fn set_state(
    connection: &Connection,
    storage_id: i64,
    state: StorageState,
    last_checked: i64,
    error_message: Option<&str>,
) -> Result<()> {
    let state_value: i64 = state.into();
    connection.execute(
        "UPDATE storages SET state = ?2, lastChecked = ?3, errorMessage = ?4 WHERE id = ?1",
        params![storage_id, state_value, last_checked, error_message.unwrap_or("")],
    )?;
    Ok(())
}

/// Update a storage's user-editable metadata (everything but its aggregate
/// columns and state).
pub fn update_storage(
    connection: &Connection,
    storage_id: i64,
    user_name: &str,
    comment: &str,
    size: i64,
) -> Result<()> {
    connection.execute(
        "UPDATE storages SET userName = ?2, comment = ?3, size = ?4 WHERE id = ?1",
        params![storage_id, user_name, comment, size],
    )?;
    Ok(())
}

/// Update entity metadata (not its aggregate columns).
pub fn update_entity(
    connection: &Connection,
    entity_id: i64,
    schedule_uuid: &str,
    host_name: &str,
    user_name: &str,
    archive_type: ArchiveType,
) -> Result<()> {
    let archive_type_value: i64 = archive_type.into();
    connection.execute(
        "UPDATE entities SET scheduleUUID = ?2, hostName = ?3, userName = ?4, archiveType = ?5 WHERE id = ?1",
        params![entity_id, schedule_uuid, host_name, user_name, archive_type_value],
    )?;
    Ok(())
}

/// Finalize a batch of `add_*` calls against `storage_id` by recomputing its
/// aggregate columns. Call once after ingesting a storage's entries rather
/// than after every single insert.
pub fn update_storage_infos(connection: &Connection, storage_id: i64) -> Result<()> {
    aggregate::update_storage_aggregates(connection, storage_id)
}

/// Recompute `entity_id`'s aggregate columns from its (non-deleted)
/// storages.
pub fn update_entity_infos(connection: &Connection, entity_id: i64) -> Result<()> {
    aggregate::update_entity_aggregates(connection, entity_id)
}

#[allow(clippy::too_many_arguments)]
pub fn new_history(
    connection: &Connection,
    job_uuid: &str,
    schedule_uuid: &str,
    host_name: &str,
    user_name: &str,
    archive_type: ArchiveType,
    created: i64,
    error_message: &str,
    duration: i64,
    total_entry_count: i64,
    total_entry_size: i64,
    skipped_entry_count: i64,
    skipped_entry_size: i64,
    error_entry_count: i64,
    error_entry_size: i64,
) -> Result<i64> {
    let archive_type_value: i64 = archive_type.into();
    connection.execute(
        "INSERT INTO history
            (jobUUID, scheduleUUID, hostName, userName, archiveType, created, errorMessage, duration,
             totalEntryCount, totalEntrySize, skippedEntryCount, skippedEntrySize, errorEntryCount, errorEntrySize)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            job_uuid,
            schedule_uuid,
            host_name,
            user_name,
            archive_type_value,
            created,
            error_message,
            duration,
            total_entry_count,
            total_entry_size,
            skipped_entry_count,
            skipped_entry_size,
            error_entry_count,
            error_entry_size,
        ],
    )?;
    Ok(connection.last_insert_rowid())
}

/// Set `deletedFlag=1` and wake the worker. The row becomes invisible to all
/// list calls immediately; its children are purged asynchronously (§4.H).
pub fn delete_storage(connection: &Connection, storage_id: i64) -> Result<()> {
    connection.execute(
        "UPDATE storages SET deletedFlag = 1 WHERE id = ?1",
        params![storage_id],
    )?;
    notify_worker();
    Ok(())
}

pub fn delete_entity(connection: &Connection, entity_id: i64) -> Result<()> {
    if entity_id == DEFAULT_ENTITY_ID {
        return Ok(());
    }
    connection.execute(
        "UPDATE entities SET deletedFlag = 1 WHERE id = ?1",
        params![entity_id],
    )?;
    notify_worker();
    Ok(())
}

/// Hard-delete a single entry: bypass foreign keys for this transaction,
/// remove the type-specific row, the `entriesNewest` shadow, and the
/// `entries` row, then reassert FK enforcement on every exit path.
pub fn delete_entry(connection: &Connection, entry_id: i64) -> Result<()> {
    connection.execute_batch("PRAGMA foreign_keys = OFF;")?;
    let result = (|| -> Result<()> {
        for table in [
            "fileEntries",
            "imageEntries",
            "directoryEntries",
            "linkEntries",
            "hardlinkEntries",
            "specialEntries",
            "entryFragments",
        ] {
            let sql = format!("DELETE FROM {table} WHERE entryId = ?1");
            connection.execute(&sql, params![entry_id])?;
        }
        connection.execute("DELETE FROM entriesNewest WHERE entryId = ?1", params![entry_id])?;
        connection.execute("DELETE FROM entriesFTS WHERE rowid = ?1", params![entry_id])?;
        connection.execute("DELETE FROM entries WHERE id = ?1", params![entry_id])?;
        Ok(())
    })();
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    result
}

pub fn delete_history(connection: &Connection, history_id: i64) -> Result<()> {
    connection.execute("DELETE FROM history WHERE id = ?1", params![history_id])?;
    Ok(())
}

pub fn delete_skipped(connection: &Connection, skipped_id: i64) -> Result<()> {
    connection.execute("DELETE FROM skippedEntries WHERE id = ?1", params![skipped_id])?;
    Ok(())
}

/// Move a storage to a different entity, then recompute aggregates of both
/// the source and destination entities and prune the source if it is now
/// empty.
pub fn assign_storage_to_entity(connection: &Connection, storage_id: i64, new_entity_id: i64) -> Result<()> {
    let old_entity_id: i64 = connection.query_row(
        "SELECT entityId FROM storages WHERE id = ?1",
        params![storage_id],
        |row| row.get(0),
    )?;

    connection.execute(
        "UPDATE storages SET entityId = ?2 WHERE id = ?1",
        params![storage_id, new_entity_id],
    )?;

    aggregate::update_entity_aggregates(connection, old_entity_id)?;
    aggregate::update_entity_aggregates(connection, new_entity_id)?;
    prune_entities(connection, old_entity_id)?;
    Ok(())
}

/// Remove `entity_id`'s row once it is soft-deleted and owns no storages.
/// A no-op for the default entity, for entities still holding storages, and
/// for entities that were never soft-deleted in the first place.
pub fn prune_entities(connection: &Connection, entity_id: i64) -> Result<()> {
    if entity_id == DEFAULT_ENTITY_ID {
        return Ok(());
    }
    connection.execute(
        "DELETE FROM entities
         WHERE id = ?1 AND deletedFlag = 1
           AND id NOT IN (SELECT DISTINCT entityId FROM storages)",
        params![entity_id],
    )?;
    Ok(())
}

/// Remove `job_uuid`'s row once no entity references it any longer.
pub fn prune_uuid(connection: &Connection, job_uuid: &str) -> Result<()> {
    connection.execute(
        "DELETE FROM uuids WHERE jobUUID = ?1 AND jobUUID NOT IN (SELECT jobUUID FROM entities)",
        params![job_uuid],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;

    fn setup() -> Connection {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();
        connection
    }

    #[test]
    fn scenario_s1_single_file_storage() {
        let connection = setup();
        let uuid_id = new_uuid(&connection, "550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert!(uuid_id > 0);

        let entity_id = new_entity(
            &connection,
            "550e8400-e29b-41d4-a716-446655440000",
            "",
            "h",
            "u",
            ArchiveType::Full,
            1_700_000_000,
        )
        .unwrap();

        let storage_id = new_storage(
            &connection,
            entity_id,
            "u",
            "backup-001.bar",
            1_700_000_000,
            0,
            StorageState::Create,
            StorageMode::Manual,
        )
        .unwrap();

        add_file(
            &connection,
            entity_id,
            storage_id,
            "/etc/hosts",
            158,
            (1_700_000_000, 1_700_000_000, 1_700_000_000),
            0,
            0,
            0o644,
            0,
            158,
        )
        .unwrap();
        update_storage_infos(&connection, storage_id).unwrap();

        let (entry_count, entry_size, file_count, file_size): (i64, i64, i64, i64) = connection
            .query_row(
                "SELECT totalEntryCount, totalEntrySize, totalFileCount, totalFileSize FROM storages WHERE id = ?1",
                params![storage_id],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
            )
            .unwrap();
        assert_eq!(entry_count, 1);
        assert_eq!(entry_size, 158);
        assert_eq!(file_count, 1);
        assert_eq!(file_size, 158);
    }

    #[test]
    fn delete_storage_hides_row_immediately() {
        let connection = setup();
        let entity_id = new_entity(
            &connection,
            "6ba7b810-9dad-11d1-80b4-00c04fd430c8",
            "",
            "h",
            "u",
            ArchiveType::Full,
            0,
        )
        .unwrap();
        let storage_id = new_storage(
            &connection, entity_id, "u", "s.bar", 0, 0, StorageState::Ok, StorageMode::Manual,
        )
        .unwrap();

        delete_storage(&connection, storage_id).unwrap();

        let deleted_flag: i64 = connection
            .query_row(
                "SELECT deletedFlag FROM storages WHERE id = ?1",
                params![storage_id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(deleted_flag, 1);
    }

    #[test]
    fn default_entity_cannot_be_deleted() {
        let connection = setup();
        delete_entity(&connection, DEFAULT_ENTITY_ID).unwrap();
        let deleted_flag: i64 = connection
            .query_row(
                "SELECT deletedFlag FROM entities WHERE id = 0",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(deleted_flag, 0);
    }

    #[test]
    fn new_uuid_rejects_malformed_strings() {
        let connection = setup();
        let result = new_uuid(&connection, "not-a-uuid");
        assert!(matches!(result, Err(IndexError::Corrupt(_))));
    }

    #[test]
    fn prune_entities_removes_soft_deleted_empty_entity() {
        let connection = setup();
        let entity_id = new_entity(
            &connection, "6ba7b810-9dad-11d1-80b4-00c04fd430c8", "", "h", "u", ArchiveType::Full, 0,
        )
        .unwrap();
        delete_entity(&connection, entity_id).unwrap();

        prune_entities(&connection, entity_id).unwrap();

        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM entities WHERE id = ?1", params![entity_id], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn prune_entities_leaves_non_deleted_entity() {
        let connection = setup();
        let entity_id = new_entity(
            &connection, "6ba7b810-9dad-11d1-80b4-00c04fd430c8", "", "h", "u", ArchiveType::Full, 0,
        )
        .unwrap();

        prune_entities(&connection, entity_id).unwrap();

        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM entities WHERE id = ?1", params![entity_id], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 1);
    }
}
