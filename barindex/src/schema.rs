//! Schema text for the current version (§3, §4.E). `CREATE_SCHEMA` is applied
//! verbatim to a fresh database; the `meta` version row is written separately
//! so the migration pipeline can reuse this text for a compare-target database.

use rusqlite::Connection;

use crate::error::Result;
use crate::types::CURRENT_SCHEMA_VERSION;

pub const CREATE_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS uuids (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    jobUUID  TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS entities (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    jobUUID                     TEXT NOT NULL,
    scheduleUUID                TEXT NOT NULL DEFAULT '',
    hostName                    TEXT NOT NULL DEFAULT '',
    userName                    TEXT NOT NULL DEFAULT '',
    archiveType                 INTEGER NOT NULL DEFAULT 0,
    created                     INTEGER NOT NULL DEFAULT 0,
    lockedCount                 INTEGER NOT NULL DEFAULT 0,
    deletedFlag                 INTEGER NOT NULL DEFAULT 0,
    totalEntryCount             INTEGER NOT NULL DEFAULT 0,
    totalFileCount              INTEGER NOT NULL DEFAULT 0,
    totalImageCount             INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCount         INTEGER NOT NULL DEFAULT 0,
    totalLinkCount              INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCount          INTEGER NOT NULL DEFAULT 0,
    totalSpecialCount           INTEGER NOT NULL DEFAULT 0,
    totalEntrySize              INTEGER NOT NULL DEFAULT 0,
    totalFileSize               INTEGER NOT NULL DEFAULT 0,
    totalImageSize              INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSize           INTEGER NOT NULL DEFAULT 0,
    totalEntryCountNewest       INTEGER NOT NULL DEFAULT 0,
    totalFileCountNewest        INTEGER NOT NULL DEFAULT 0,
    totalImageCountNewest       INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCountNewest   INTEGER NOT NULL DEFAULT 0,
    totalLinkCountNewest        INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCountNewest    INTEGER NOT NULL DEFAULT 0,
    totalSpecialCountNewest     INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest        INTEGER NOT NULL DEFAULT 0,
    totalFileSizeNewest         INTEGER NOT NULL DEFAULT 0,
    totalImageSizeNewest        INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS storages (
    id                          INTEGER PRIMARY KEY AUTOINCREMENT,
    entityId                    INTEGER NOT NULL REFERENCES entities(id),
    name                        TEXT NOT NULL DEFAULT '',
    userName                    TEXT NOT NULL DEFAULT '',
    comment                     TEXT NOT NULL DEFAULT '',
    created                     INTEGER NOT NULL DEFAULT 0,
    size                        INTEGER NOT NULL DEFAULT 0,
    state                       INTEGER NOT NULL DEFAULT 0,
    mode                        INTEGER NOT NULL DEFAULT 0,
    lastChecked                 INTEGER NOT NULL DEFAULT 0,
    errorMessage                TEXT NOT NULL DEFAULT '',
    totalEntryCount             INTEGER NOT NULL DEFAULT 0,
    totalFileCount              INTEGER NOT NULL DEFAULT 0,
    totalImageCount             INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCount         INTEGER NOT NULL DEFAULT 0,
    totalLinkCount              INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCount          INTEGER NOT NULL DEFAULT 0,
    totalSpecialCount           INTEGER NOT NULL DEFAULT 0,
    totalEntrySize              INTEGER NOT NULL DEFAULT 0,
    totalFileSize               INTEGER NOT NULL DEFAULT 0,
    totalImageSize              INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSize           INTEGER NOT NULL DEFAULT 0,
    totalEntryCountNewest       INTEGER NOT NULL DEFAULT 0,
    totalFileCountNewest        INTEGER NOT NULL DEFAULT 0,
    totalImageCountNewest       INTEGER NOT NULL DEFAULT 0,
    totalDirectoryCountNewest   INTEGER NOT NULL DEFAULT 0,
    totalLinkCountNewest        INTEGER NOT NULL DEFAULT 0,
    totalHardlinkCountNewest    INTEGER NOT NULL DEFAULT 0,
    totalSpecialCountNewest     INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest        INTEGER NOT NULL DEFAULT 0,
    totalFileSizeNewest         INTEGER NOT NULL DEFAULT 0,
    totalImageSizeNewest        INTEGER NOT NULL DEFAULT 0,
    totalHardlinkSizeNewest     INTEGER NOT NULL DEFAULT 0,
    deletedFlag                 INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS storagesEntityIdIndex ON storages(entityId);
CREATE INDEX IF NOT EXISTS storagesDeletedFlagIndex ON storages(deletedFlag, state);

CREATE TABLE IF NOT EXISTS entries (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    entityId         INTEGER NOT NULL REFERENCES entities(id),
    type             INTEGER NOT NULL,
    name             TEXT NOT NULL,
    timeLastAccess   INTEGER NOT NULL DEFAULT 0,
    timeModified     INTEGER NOT NULL DEFAULT 0,
    timeLastChanged  INTEGER NOT NULL DEFAULT 0,
    userId           INTEGER NOT NULL DEFAULT 0,
    groupId          INTEGER NOT NULL DEFAULT 0,
    permission       INTEGER NOT NULL DEFAULT 0,
    size             INTEGER NOT NULL DEFAULT 0,
    UNIQUE(entityId, type, name)
);
CREATE INDEX IF NOT EXISTS entriesEntityIdIndex ON entries(entityId);

CREATE VIRTUAL TABLE IF NOT EXISTS entriesFTS USING fts4(name);

CREATE TABLE IF NOT EXISTS entriesNewest (
    id               INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId          INTEGER NOT NULL REFERENCES entries(id),
    entityId         INTEGER NOT NULL,
    name             TEXT NOT NULL,
    UNIQUE(entityId, name)
);

CREATE TABLE IF NOT EXISTS fileEntries (
    entryId  INTEGER PRIMARY KEY REFERENCES entries(id),
    size     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS imageEntries (
    entryId        INTEGER PRIMARY KEY REFERENCES entries(id),
    fileSystemType INTEGER NOT NULL DEFAULT 0,
    size           INTEGER NOT NULL DEFAULT 0,
    blockSize      INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS directoryEntries (
    entryId                   INTEGER PRIMARY KEY REFERENCES entries(id),
    storageId                 INTEGER NOT NULL REFERENCES storages(id),
    name                      TEXT NOT NULL,
    totalEntryCount           INTEGER NOT NULL DEFAULT 0,
    totalEntrySize            INTEGER NOT NULL DEFAULT 0,
    totalEntryCountNewest     INTEGER NOT NULL DEFAULT 0,
    totalEntrySizeNewest      INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS directoryEntriesStorageIdNameIndex ON directoryEntries(storageId, name);

CREATE TABLE IF NOT EXISTS linkEntries (
    entryId          INTEGER PRIMARY KEY REFERENCES entries(id),
    storageId        INTEGER NOT NULL REFERENCES storages(id),
    destinationName  TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS hardlinkEntries (
    entryId  INTEGER PRIMARY KEY REFERENCES entries(id),
    size     INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS specialEntries (
    entryId      INTEGER PRIMARY KEY REFERENCES entries(id),
    storageId    INTEGER NOT NULL REFERENCES storages(id),
    specialType  INTEGER NOT NULL DEFAULT 0,
    major        INTEGER NOT NULL DEFAULT 0,
    minor        INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS entryFragments (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    entryId    INTEGER NOT NULL REFERENCES entries(id),
    storageId  INTEGER NOT NULL REFERENCES storages(id),
    offset     INTEGER NOT NULL DEFAULT 0,
    size       INTEGER NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS entryFragmentsEntryIdIndex ON entryFragments(entryId);
CREATE INDEX IF NOT EXISTS entryFragmentsStorageIdIndex ON entryFragments(storageId);

CREATE TABLE IF NOT EXISTS skippedEntries (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    entityId  INTEGER NOT NULL REFERENCES entities(id),
    type      INTEGER NOT NULL,
    name      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS history (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    jobUUID        TEXT NOT NULL,
    scheduleUUID   TEXT NOT NULL DEFAULT '',
    hostName       TEXT NOT NULL DEFAULT '',
    userName       TEXT NOT NULL DEFAULT '',
    archiveType    INTEGER NOT NULL DEFAULT 0,
    created        INTEGER NOT NULL DEFAULT 0,
    errorMessage   TEXT NOT NULL DEFAULT '',
    duration       INTEGER NOT NULL DEFAULT 0,
    totalEntryCount INTEGER NOT NULL DEFAULT 0,
    totalEntrySize  INTEGER NOT NULL DEFAULT 0,
    skippedEntryCount INTEGER NOT NULL DEFAULT 0,
    skippedEntrySize  INTEGER NOT NULL DEFAULT 0,
    errorEntryCount   INTEGER NOT NULL DEFAULT 0,
    errorEntrySize    INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS meta (
    name   TEXT NOT NULL,
    value  TEXT NOT NULL
);

INSERT OR IGNORE INTO entities (id, jobUUID, hostName, userName, created)
VALUES (0, '', '', '', 0);
"#;

/// Create a fresh schema and write the version row. Used both for a real new
/// database and for the in-memory "reference" database migrations compare
/// against (§4.E item 3).
pub fn create(connection: &Connection) -> Result<()> {
    connection.execute_batch(CREATE_SCHEMA)?;
    connection.execute(
        "INSERT OR REPLACE INTO meta (name, value) VALUES ('version', ?1)",
        [CURRENT_SCHEMA_VERSION.to_string()],
    )?;
    Ok(())
}

/// Read `meta.value WHERE name='version'`. `None` means the row is missing —
/// the caller treats that as corrupt (§4.E item 2).
pub fn read_version(connection: &Connection) -> Result<Option<i64>> {
    match connection.query_row(
        "SELECT value FROM meta WHERE name = 'version'",
        [],
        |row| row.get::<_, String>(0),
    ) {
        Ok(value) => Ok(value.parse::<i64>().ok()),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_current_version() {
        let connection = Connection::open_in_memory().unwrap();
        create(&connection).unwrap();
        assert_eq!(
            read_version(&connection).unwrap(),
            Some(CURRENT_SCHEMA_VERSION as i64)
        );
    }

    #[test]
    fn create_seeds_default_entity() {
        let connection = Connection::open_in_memory().unwrap();
        create(&connection).unwrap();
        let count: i64 = connection
            .query_row("SELECT COUNT(*) FROM entities WHERE id = 0", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 1);
    }
}
