//! Version-migration pipeline (§4.E). A `.oldNNN` sibling is imported by
//! chaining whichever `Migration` steps apply, then every aggregate is
//! recomputed from scratch.

use rusqlite::Connection;

use crate::aggregate;
use crate::error::Result;
use crate::handle::pause_requested;
use crate::schema;
use crate::types::CURRENT_SCHEMA_VERSION;

/// One version-to-version upgrade step. Steps are applied in order starting
/// from whichever step's `from_version` matches the source database.
pub trait Migration {
    fn from_version(&self) -> u32;
    fn upgrade(&self, connection: &Connection) -> Result<()>;
}

struct RepairIdsOnly {
    from: u32,
}

impl Migration for RepairIdsOnly {
    fn from_version(&self) -> u32 {
        self.from
    }

    fn upgrade(&self, connection: &Connection) -> Result<()> {
        for table in [
            "uuids",
            "entities",
            "storages",
            "entries",
            "entryFragments",
            "skippedEntries",
            "history",
        ] {
            let sql = format!("UPDATE {table} SET id = rowid WHERE id IS NULL");
            connection.execute(&sql, [])?;
        }
        connection.execute(
            "UPDATE meta SET value = ?1 WHERE name = 'version'",
            [(self.from + 1).to_string()],
        )?;
        Ok(())
    }
}

/// Registered in order 1→2 .. 6→7. Every step here is schema-compatible with
/// its predecessor (no column renames survive in this source), so each one
/// only needs to repair broken ids and bump the version marker.
fn migrations() -> Vec<Box<dyn Migration>> {
    (1..CURRENT_SCHEMA_VERSION)
        .map(|from| Box::new(RepairIdsOnly { from }) as Box<dyn Migration>)
        .collect()
}

/// Smallest `NNN >= 0` such that `<path>.oldNNN` does not exist.
pub fn next_old_path(path: &str) -> String {
    for n in 0.. {
        let candidate = format!("{path}.old{n}");
        if !std::path::Path::new(&candidate).exists() {
            return candidate;
        }
    }
    unreachable!("an unbounded search for a free suffix always terminates in practice")
}

/// Import one `.oldNNN` sibling database into the already-open current
/// database: repair ids, chain the migration steps from its on-disk version
/// up to current, then recompute every aggregate (storages -> entities ->
/// uuids). Returns the number of entries imported for the caller's log line.
pub fn import_old_database(old_path: &str, current: &Connection) -> Result<usize> {
    let old = Connection::open(old_path)?;
    let version = schema::read_version(&old)?.unwrap_or(0) as u32;

    for step in migrations().into_iter().filter(|m| m.from_version() >= version) {
        if pause_requested() {
            continue;
        }
        step.upgrade(&old)?;
    }

    copy_all_rows(&old, current)?;
    aggregate::recompute_all(current)?;

    let count: i64 = current.query_row("SELECT COUNT(*) FROM entries", [], |row| row.get(0))?;
    Ok(count as usize)
}

fn copy_all_rows(old: &Connection, current: &Connection) -> Result<()> {
    const TABLES: &[&str] = &[
        "uuids",
        "entities",
        "storages",
        "entries",
        "entriesNewest",
        "fileEntries",
        "imageEntries",
        "directoryEntries",
        "linkEntries",
        "hardlinkEntries",
        "specialEntries",
        "entryFragments",
        "skippedEntries",
        "history",
    ];

    for table in TABLES {
        let columns = table_columns(old, table)?;
        if columns.is_empty() {
            continue;
        }
        let column_list = columns.join(", ");
        let placeholders = columns.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let select_sql = format!("SELECT {column_list} FROM {table}");
        let insert_sql =
            format!("INSERT OR IGNORE INTO {table} ({column_list}) VALUES ({placeholders})");

        let mut select = old.prepare(&select_sql)?;
        let column_count = columns.len();
        let mut rows = select.query([])?;
        while let Some(row) = rows.next()? {
            let values: Vec<rusqlite::types::Value> = (0..column_count)
                .map(|i| row.get_unwrap::<_, rusqlite::types::Value>(i))
                .collect();
            current.execute(&insert_sql, rusqlite::params_from_iter(values))?;
        }
    }
    Ok(())
}

fn table_columns(connection: &Connection, table: &str) -> Result<Vec<String>> {
    let sql = format!("PRAGMA table_info({table})");
    let mut statement = connection.prepare(&sql)?;
    let columns = statement
        .query_map([], |row| row.get::<_, String>(1))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(columns)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_old_path_finds_first_free_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("index.db");
        let base_str = base.to_str().unwrap();
        assert_eq!(next_old_path(base_str), format!("{base_str}.old0"));

        std::fs::write(format!("{base_str}.old0"), b"").unwrap();
        assert_eq!(next_old_path(base_str), format!("{base_str}.old1"));
    }

    #[test]
    fn import_old_database_copies_rows_and_recomputes_aggregates() {
        let dir = tempfile::tempdir().unwrap();
        let old_path = dir.path().join("old.db");
        {
            let old = Connection::open(&old_path).unwrap();
            schema::create(&old).unwrap();
            old.execute(
                "INSERT INTO uuids (jobUUID) VALUES ('550e8400-e29b-41d4-a716-446655440000')",
                [],
            )
            .unwrap();
        }

        let current = Connection::open_in_memory().unwrap();
        schema::create(&current).unwrap();
        import_old_database(old_path.to_str().unwrap(), &current).unwrap();

        let count: i64 = current
            .query_row("SELECT COUNT(*) FROM uuids", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
