//! Aggregate maintainer (§4.G): per-storage/entity/UUID counts and sizes,
//! kept in two parallel flavours (all entries, newest-only), plus the
//! incremental per-directory walk run during ingestion.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::EntryType;

struct TypeCounts {
    entry: i64,
    file: i64,
    image: i64,
    directory: i64,
    link: i64,
    hardlink: i64,
    special: i64,
    entry_size: i64,
    file_size: i64,
    image_size: i64,
    hardlink_size: i64,
}

impl TypeCounts {
    fn zero() -> TypeCounts {
        TypeCounts {
            entry: 0,
            file: 0,
            image: 0,
            directory: 0,
            link: 0,
            hardlink: 0,
            special: 0,
            entry_size: 0,
            file_size: 0,
            image_size: 0,
            hardlink_size: 0,
        }
    }
}

/// One SELECT per (entry-type x newest?) combination, joining `entries` (or
/// `entriesNewest`) with the type-specific table and `entryFragments`.
fn count_storage(connection: &Connection, storage_id: i64, newest: bool) -> Result<TypeCounts> {
    let entries_table = if newest { "entriesNewest" } else { "entries" };
    let mut counts = TypeCounts::zero();

    counts.file = count_rows(
        connection,
        &format!(
            "SELECT COUNT(*) FROM {entries_table} e
             JOIN entries base ON base.id = e.{id_col}
             JOIN fileEntries f ON f.entryId = base.id
             JOIN entryFragments frag ON frag.entryId = base.id AND frag.storageId = ?1
             WHERE base.type = ?2",
            id_col = if newest { "entryId" } else { "id" }
        ),
        storage_id,
        EntryType::File,
    )?;
    counts.file_size = sum_fragment_size(connection, storage_id, EntryType::File, newest)?;

    counts.image = count_rows(
        connection,
        &format!(
            "SELECT COUNT(*) FROM {entries_table} e
             JOIN entries base ON base.id = e.{id_col}
             JOIN imageEntries i ON i.entryId = base.id
             JOIN entryFragments frag ON frag.entryId = base.id AND frag.storageId = ?1
             WHERE base.type = ?2",
            id_col = if newest { "entryId" } else { "id" }
        ),
        storage_id,
        EntryType::Image,
    )?;
    counts.image_size = sum_fragment_size(connection, storage_id, EntryType::Image, newest)?;

    counts.hardlink = count_rows(
        connection,
        &format!(
            "SELECT COUNT(*) FROM {entries_table} e
             JOIN entries base ON base.id = e.{id_col}
             JOIN hardlinkEntries h ON h.entryId = base.id
             JOIN entryFragments frag ON frag.entryId = base.id AND frag.storageId = ?1
             WHERE base.type = ?2",
            id_col = if newest { "entryId" } else { "id" }
        ),
        storage_id,
        EntryType::Hardlink,
    )?;
    counts.hardlink_size = sum_fragment_size(connection, storage_id, EntryType::Hardlink, newest)?;

    counts.directory = count_type_rows_no_fragments(connection, storage_id, "directoryEntries")?;
    counts.link = count_type_rows_no_fragments(connection, storage_id, "linkEntries")?;
    counts.special = count_type_rows_no_fragments(connection, storage_id, "specialEntries")?;

    counts.entry =
        counts.file + counts.image + counts.directory + counts.link + counts.hardlink + counts.special;
    counts.entry_size = counts.file_size + counts.image_size + counts.hardlink_size;

    Ok(counts)
}

fn count_rows(
    connection: &Connection,
    sql: &str,
    storage_id: i64,
    entry_type: EntryType,
) -> Result<i64> {
    let type_value: i64 = entry_type.into();
    Ok(connection.query_row(sql, params![storage_id, type_value], |row| row.get(0))?)
}

fn sum_fragment_size(
    connection: &Connection,
    storage_id: i64,
    entry_type: EntryType,
    newest: bool,
) -> Result<i64> {
    let entries_table = if newest { "entriesNewest" } else { "entries" };
    let id_col = if newest { "entryId" } else { "id" };
    let type_value: i64 = entry_type.into();
    let sql = format!(
        "SELECT COALESCE(SUM(frag.size), 0) FROM {entries_table} e
         JOIN entries base ON base.id = e.{id_col}
         JOIN entryFragments frag ON frag.entryId = base.id AND frag.storageId = ?1
         WHERE base.type = ?2"
    );
    Ok(connection.query_row(&sql, params![storage_id, type_value], |row| row.get(0))?)
}

fn count_type_rows_no_fragments(
    connection: &Connection,
    storage_id: i64,
    table: &str,
) -> Result<i64> {
    let sql = format!("SELECT COUNT(*) FROM {table} WHERE storageId = ?1");
    Ok(connection.query_row(&sql, params![storage_id], |row| row.get(0))?)
}

/// Recompute `storages.totalX...`/`...Newest` for one storage and write the
/// 22-column UPDATE described in §4.G.
pub fn update_storage_aggregates(connection: &Connection, storage_id: i64) -> Result<()> {
    let all = count_storage(connection, storage_id, false)?;
    let newest = count_storage(connection, storage_id, true)?;

    connection.execute(
        "UPDATE storages SET
            totalEntryCount=?2, totalFileCount=?3, totalImageCount=?4, totalDirectoryCount=?5,
            totalLinkCount=?6, totalHardlinkCount=?7, totalSpecialCount=?8,
            totalEntrySize=?9, totalFileSize=?10, totalImageSize=?11, totalHardlinkSize=?12,
            totalEntryCountNewest=?13, totalFileCountNewest=?14, totalImageCountNewest=?15,
            totalDirectoryCountNewest=?16, totalLinkCountNewest=?17, totalHardlinkCountNewest=?18,
            totalSpecialCountNewest=?19, totalEntrySizeNewest=?20, totalFileSizeNewest=?21,
            totalImageSizeNewest=?22
         WHERE id = ?1",
        params![
            storage_id,
            all.entry, all.file, all.image, all.directory, all.link, all.hardlink, all.special,
            all.entry_size, all.file_size, all.image_size, all.hardlink_size,
            newest.entry, newest.file, newest.image, newest.directory, newest.link,
            newest.hardlink, newest.special, newest.entry_size, newest.file_size, newest.image_size,
        ],
    )?;

    debug_assert!(non_negative_storage_aggregates(connection, storage_id)?);
    Ok(())
}

/// Sum the per-storage aggregates of every non-deleted storage belonging to
/// `entity_id` into the entity row.
pub fn update_entity_aggregates(connection: &Connection, entity_id: i64) -> Result<()> {
    connection.execute(
        "UPDATE entities SET
            totalEntryCount = (SELECT COALESCE(SUM(totalEntryCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalFileCount = (SELECT COALESCE(SUM(totalFileCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalImageCount = (SELECT COALESCE(SUM(totalImageCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalDirectoryCount = (SELECT COALESCE(SUM(totalDirectoryCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalLinkCount = (SELECT COALESCE(SUM(totalLinkCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalHardlinkCount = (SELECT COALESCE(SUM(totalHardlinkCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalSpecialCount = (SELECT COALESCE(SUM(totalSpecialCount),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalEntrySize = (SELECT COALESCE(SUM(totalEntrySize),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalFileSize = (SELECT COALESCE(SUM(totalFileSize),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalImageSize = (SELECT COALESCE(SUM(totalImageSize),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalHardlinkSize = (SELECT COALESCE(SUM(totalHardlinkSize),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalEntryCountNewest = (SELECT COALESCE(SUM(totalEntryCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalFileCountNewest = (SELECT COALESCE(SUM(totalFileCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalImageCountNewest = (SELECT COALESCE(SUM(totalImageCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalDirectoryCountNewest = (SELECT COALESCE(SUM(totalDirectoryCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalLinkCountNewest = (SELECT COALESCE(SUM(totalLinkCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalHardlinkCountNewest = (SELECT COALESCE(SUM(totalHardlinkCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalSpecialCountNewest = (SELECT COALESCE(SUM(totalSpecialCountNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalEntrySizeNewest = (SELECT COALESCE(SUM(totalEntrySizeNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalFileSizeNewest = (SELECT COALESCE(SUM(totalFileSizeNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalImageSizeNewest = (SELECT COALESCE(SUM(totalImageSizeNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0),
            totalHardlinkSizeNewest = (SELECT COALESCE(SUM(totalHardlinkSizeNewest),0) FROM storages WHERE entityId=?1 AND deletedFlag=0)
         WHERE id = ?1",
        params![entity_id],
    )?;
    Ok(())
}

fn non_negative_storage_aggregates(connection: &Connection, storage_id: i64) -> Result<bool> {
    let min: i64 = connection.query_row(
        "SELECT MIN(v) FROM (
            SELECT totalEntryCount AS v FROM storages WHERE id=?1
            UNION ALL SELECT totalEntrySize FROM storages WHERE id=?1
         )",
        params![storage_id],
        |row| row.get(0),
    )?;
    Ok(min >= 0)
}

/// Incremental per-mutation directory aggregate: walk from the entry's
/// directory up to the root, bumping `directoryEntries.totalEntryCount`/
/// `totalEntrySize` (and the newest-flavoured columns when the entry is
/// currently in `entriesNewest`) along the way.
pub fn bump_directory_aggregates(
    connection: &Connection,
    storage_id: i64,
    parent_dir: &str,
    size: i64,
    is_newest: bool,
) -> Result<()> {
    let mut current = parent_dir.to_string();
    loop {
        if is_newest {
            connection.execute(
                "UPDATE directoryEntries SET
                    totalEntryCount = totalEntryCount + 1,
                    totalEntrySize = totalEntrySize + ?3,
                    totalEntryCountNewest = totalEntryCountNewest + 1,
                    totalEntrySizeNewest = totalEntrySizeNewest + ?3
                 WHERE storageId = ?1 AND name = ?2",
                params![storage_id, current, size],
            )?;
        } else {
            connection.execute(
                "UPDATE directoryEntries SET
                    totalEntryCount = totalEntryCount + 1,
                    totalEntrySize = totalEntrySize + ?3
                 WHERE storageId = ?1 AND name = ?2",
                params![storage_id, current, size],
            )?;
        }

        match parent_of(&current) {
            Some(parent) => current = parent,
            None => break,
        }
    }
    Ok(())
}

fn parent_of(path: &str) -> Option<String> {
    if path.is_empty() || path == "/" {
        return None;
    }
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/".to_string()),
        Some(idx) => Some(trimmed[..idx].to_string()),
        None => None,
    }
}

/// Recompute every storage, entity and UUID aggregate from scratch — used
/// after import/migration where incremental tracking cannot be trusted.
pub fn recompute_all(connection: &Connection) -> Result<()> {
    let storage_ids: Vec<i64> = connection
        .prepare("SELECT id FROM storages")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for storage_id in storage_ids {
        update_storage_aggregates(connection, storage_id)?;
    }

    let entity_ids: Vec<i64> = connection
        .prepare("SELECT id FROM entities")?
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<_, _>>()?;
    for entity_id in entity_ids {
        update_entity_aggregates(connection, entity_id)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate;
    use crate::schema;

    #[test]
    fn parent_of_walks_up_to_root() {
        assert_eq!(parent_of("/a/b/c"), Some("/a/b".to_string()));
        assert_eq!(parent_of("/a"), Some("/".to_string()));
        assert_eq!(parent_of("/"), None);
    }

    #[test]
    fn storage_aggregates_reflect_one_file() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();
        connection
            .execute(
                "INSERT INTO storages (id, entityId, name) VALUES (1, 0, 'test.bar')",
                [],
            )
            .unwrap();

        mutate::add_file(
            &connection,
            0,
            1,
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
        update_storage_aggregates(&connection, 1).unwrap();

        let (count, size): (i64, i64) = connection
            .query_row(
                "SELECT totalFileCount, totalFileSize FROM storages WHERE id=1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(size, 158);
    }
}
