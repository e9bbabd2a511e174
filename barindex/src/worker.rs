//! Cleanup worker (§4.H): imports `.oldNNN` siblings once at startup, runs an
//! initial consistency pass, then loops purging soft-deleted storages in
//! small batches so a single sweep never holds a transaction across a sleep.

use std::time::Duration;

use rusqlite::{params, Connection};

use crate::aggregate;
use crate::error::Result;
use crate::handle::{self, quit_requested, use_count, worker_sleep};
use crate::migrate;
use crate::mutate;
use crate::types::{now_unix, StorageState, PURGE_BATCH_SIZE, WORKER_POLL_INTERVAL_SECS};

/// Entry point run on the worker's own thread against its own read-write
/// handle. Blocks until `handle::request_quit` is called.
pub fn run(path: &str) -> Result<()> {
    let connection = Connection::open(path)?;
    log::info!("INDEX: cleanup worker starting for '{path}' at {}", now_unix());
    import_pending_siblings(path, &connection)?;
    initial_cleanup(&connection)?;

    while !quit_requested() {
        let processed = process_one_batch(&connection)?;
        if processed == 0 {
            worker_sleep(Duration::from_secs(WORKER_POLL_INTERVAL_SECS));
        }
    }
    Ok(())
}

fn import_pending_siblings(path: &str, connection: &Connection) -> Result<()> {
    let mut suffix = 0;
    loop {
        let candidate = format!("{path}.old{suffix}");
        if !std::path::Path::new(&candidate).exists() {
            break;
        }
        let count = migrate::import_old_database(&candidate, connection)?;
        log::info!("INDEX: imported {count} entries from '{candidate}'");
        std::fs::remove_file(&candidate)?;
        suffix += 1;
    }
    Ok(())
}

/// Run once at startup: fold duplicate meta rows, reset stuck
/// update-in-progress markers, discard storages that never left the create
/// state, and drop storages that ended up with an empty name.
fn initial_cleanup(connection: &Connection) -> Result<()> {
    connection.execute(
        "DELETE FROM meta WHERE rowid NOT IN (SELECT MIN(rowid) FROM meta GROUP BY name)",
        [],
    )?;

    let update_state: i64 = StorageState::Update.into();
    let requested_state: i64 = StorageState::UpdateRequested.into();
    connection.execute(
        "UPDATE storages SET state = ?2 WHERE state = ?1",
        params![update_state, requested_state],
    )?;

    let create_state: i64 = StorageState::Create.into();
    let create_storage_ids: Vec<i64> = connection
        .prepare("SELECT id FROM storages WHERE state = ?1")?
        .query_map(params![create_state], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for storage_id in create_storage_ids {
        purge_storage(connection, storage_id)?;
    }

    let empty_name_ids: Vec<i64> = connection
        .prepare("SELECT id FROM storages WHERE name = ''")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for storage_id in empty_name_ids {
        purge_storage(connection, storage_id)?;
    }

    prune_empty_entities(connection)?;
    prune_orphan_uuids(connection)?;
    Ok(())
}

/// One steady-state iteration: find up to `PURGE_BATCH_SIZE` storages marked
/// for deletion and not mid-update, purge each, prune entities/UUIDs that
/// purging left empty, and report how many storages were processed so the
/// caller knows whether to sleep.
fn process_one_batch(connection: &Connection) -> Result<usize> {
    let update_state: i64 = StorageState::Update.into();
    let storage_ids: Vec<i64> = connection
        .prepare(
            "SELECT id FROM storages WHERE deletedFlag = 1 AND state != ?1 LIMIT ?2",
        )?
        .query_map(params![update_state, PURGE_BATCH_SIZE as i64], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    for storage_id in &storage_ids {
        if use_count() > 0 || quit_requested() {
            break;
        }
        purge_storage(connection, *storage_id)?;
    }

    prune_empty_entities(connection)?;
    prune_orphan_uuids(connection)?;

    Ok(storage_ids.len())
}

/// Hard-delete every entry attached to `storage_id` — whether discovered via
/// `entryFragments` (file/image/hardlink) or via a type table's own
/// `storageId` column (directory/link/special, which never have fragments)
/// — then the storage row itself, then recompute the owning entity's
/// aggregates.
fn purge_storage(connection: &Connection, storage_id: i64) -> Result<()> {
    let entity_id: i64 = connection.query_row(
        "SELECT entityId FROM storages WHERE id = ?1",
        params![storage_id],
        |row| row.get(0),
    )?;

    let mut entry_ids: Vec<i64> = connection
        .prepare("SELECT DISTINCT entryId FROM entryFragments WHERE storageId = ?1")?
        .query_map(params![storage_id], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;

    for table in ["directoryEntries", "linkEntries", "specialEntries"] {
        let sql = format!("SELECT entryId FROM {table} WHERE storageId = ?1");
        let ids: Vec<i64> = connection
            .prepare(&sql)?
            .query_map(params![storage_id], |row| row.get(0))?
            .collect::<std::result::Result<_, _>>()?;
        entry_ids.extend(ids);
    }
    entry_ids.sort_unstable();
    entry_ids.dedup();

    for entry_id in entry_ids {
        mutate::delete_entry(connection, entry_id)?;
    }

    connection.execute("DELETE FROM storages WHERE id = ?1", params![storage_id])?;
    aggregate::update_entity_aggregates(connection, entity_id)?;
    handle::notify_worker();
    Ok(())
}

fn prune_empty_entities(connection: &Connection) -> Result<()> {
    connection.execute(
        "DELETE FROM entities
         WHERE id != 0 AND deletedFlag = 1
           AND id NOT IN (SELECT DISTINCT entityId FROM storages)",
        [],
    )?;
    Ok(())
}

fn prune_orphan_uuids(connection: &Connection) -> Result<()> {
    connection.execute(
        "DELETE FROM uuids WHERE jobUUID NOT IN (SELECT jobUUID FROM entities)",
        [],
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema;
    use crate::types::StorageMode;

    #[test]
    fn purge_removes_soft_deleted_storage_and_its_entries() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();

        let storage_id = mutate::new_storage(
            &connection, 0, "u", "s.bar", 0, 0, StorageState::Ok, StorageMode::Manual,
        )
        .unwrap();
        mutate::add_file(&connection, 0, storage_id, "/a", 10, (0, 0, 0), 0, 0, 0o644, 0, 10).unwrap();
        mutate::delete_storage(&connection, storage_id).unwrap();

        let processed = process_one_batch(&connection).unwrap();
        assert_eq!(processed, 1);

        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM storages WHERE id = ?1", params![storage_id], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn purge_does_not_orphan_directory_entries() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();

        let storage_id = mutate::new_storage(
            &connection, 0, "u", "s.bar", 0, 0, StorageState::Ok, StorageMode::Manual,
        )
        .unwrap();
        mutate::add_directory(&connection, 0, storage_id, "/a", (0, 0, 0), 0, 0, 0o755).unwrap();
        mutate::delete_storage(&connection, storage_id).unwrap();

        process_one_batch(&connection).unwrap();

        let orphaned: i64 = connection
            .query_row("SELECT COUNT(*) FROM entries WHERE name = '/a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphaned, 0);
        let orphaned_newest: i64 = connection
            .query_row("SELECT COUNT(*) FROM entriesNewest WHERE name = '/a'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(orphaned_newest, 0);
    }

    #[test]
    fn batch_prunes_empty_entity_after_purge() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();

        let entity_id = mutate::new_entity(
            &connection, "6ba7b810-9dad-11d1-80b4-00c04fd430c8", "", "h", "u", crate::types::ArchiveType::Full, 0,
        )
        .unwrap();
        let storage_id = mutate::new_storage(
            &connection, entity_id, "u", "s.bar", 0, 0, StorageState::Ok, StorageMode::Manual,
        )
        .unwrap();
        mutate::delete_storage(&connection, storage_id).unwrap();
        mutate::delete_entity(&connection, entity_id).unwrap();

        process_one_batch(&connection).unwrap();

        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM entities WHERE id = ?1", params![entity_id], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }

    #[test]
    fn initial_cleanup_discards_stuck_create_storages() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();
        mutate::new_storage(
            &connection, 0, "u", "stuck.bar", 0, 0, StorageState::Create, StorageMode::Manual,
        )
        .unwrap();

        initial_cleanup(&connection).unwrap();

        let remaining: i64 = connection
            .query_row("SELECT COUNT(*) FROM storages WHERE name = 'stuck.bar'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(remaining, 0);
    }
}
