//! Query builders & iterators (§4.I): filter/order construction, full-text
//! pattern normalization, and result cursors for listings.

use rusqlite::{params, Connection};

use crate::error::Result;
use crate::types::SortDirection;

/// Appends `<connective> (<formatted condition>)` to `buffer` only when
/// `condition` is true and does the right thing whether or not the buffer
/// already has content (an empty buffer never gets a leading connective).
pub fn filter_append(buffer: &mut String, condition: bool, connective: &str, clause: &str) {
    if !condition {
        return;
    }
    if !buffer.is_empty() {
        buffer.push(' ');
        buffer.push_str(connective);
        buffer.push(' ');
    }
    buffer.push('(');
    buffer.push_str(clause);
    buffer.push(')');
}

/// Appends `ORDER BY <column> <ASC|DESC>` to `buffer`, or nothing for
/// `SortDirection::None`.
pub fn append_ordering(buffer: &mut String, column: &str, direction: SortDirection) {
    let suffix = match direction {
        SortDirection::Ascending => "ASC",
        SortDirection::Descending => "DESC",
        SortDirection::None => return,
    };
    buffer.push_str(" ORDER BY ");
    buffer.push_str(column);
    buffer.push(' ');
    buffer.push_str(suffix);
}

/// Builds a comma-separated `column IN (...)` clause for a list of ids, or
/// returns `None` when the list is empty (meaning "no restriction").
pub fn ids_clause(column: &str, ids: &[i64]) -> Option<String> {
    if ids.is_empty() {
        return None;
    }
    let joined = ids
        .iter()
        .map(i64::to_string)
        .collect::<Vec<_>>()
        .join(",");
    Some(format!("{column} IN ({joined})"))
}

/// Normalize a full-text search pattern: tokenize on whitespace; within each
/// token keep alphanumerics and code points >= 128; collapse other runs into
/// a single `*` suffix, producing a safe prefix pattern for the FTS module.
pub fn normalize_fts_pattern(pattern: &str) -> String {
    pattern
        .split_whitespace()
        .map(normalize_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn normalize_token(token: &str) -> String {
    let mut out = String::new();
    let mut pending_wildcard = false;
    for ch in token.chars() {
        if ch.is_alphanumeric() || (ch as u32) >= 128 {
            if pending_wildcard {
                out.push('*');
                pending_wildcard = false;
            }
            out.push(ch);
        } else {
            pending_wildcard = true;
        }
    }
    if pending_wildcard {
        out.push('*');
    }
    out
}

/// Normalize `pattern` and force every token into an FTS4 prefix query by
/// appending a trailing `*` where `normalize_fts_pattern` didn't already
/// leave one.
fn fts_prefix_pattern(pattern: &str) -> String {
    normalize_fts_pattern(pattern)
        .split(' ')
        .filter(|token| !token.is_empty())
        .map(|token| if token.ends_with('*') { token.to_string() } else { format!("{token}*") })
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct StorageRow {
    pub id: i64,
    pub entity_id: i64,
    pub name: String,
    pub size: i64,
    pub state: i64,
    pub total_entry_count: i64,
    pub total_entry_size: i64,
}

/// List non-deleted storages matching the given entity/storage id
/// restrictions and an optional (already-normalized) name pattern. A single-
/// pass, forward-only cursor materialized eagerly — `barindex` favors a
/// simple `Vec` cursor over a borrowed `rusqlite::Rows` lifetime since
/// callers want to hold the handle across other calls while iterating.
pub fn list_storages(
    connection: &Connection,
    entity_ids: &[i64],
    storage_ids: &[i64],
    name_pattern: Option<&str>,
    direction: SortDirection,
) -> Result<Vec<StorageRow>> {
    let mut filter = String::new();
    filter_append(&mut filter, true, "AND", "deletedFlag = 0");
    if let Some(clause) = ids_clause("entityId", entity_ids) {
        filter_append(&mut filter, true, "AND", &clause);
    }
    if let Some(clause) = ids_clause("id", storage_ids) {
        filter_append(&mut filter, true, "AND", &clause);
    }
    filter_append(&mut filter, true, "AND", "(?1 IS NULL OR name LIKE ?1)");

    let mut ordering = String::new();
    append_ordering(&mut ordering, "created", direction);

    let sql = format!(
        "SELECT id, entityId, name, size, state, totalEntryCount, totalEntrySize
         FROM storages WHERE {filter}{ordering}"
    );

    let like_pattern = name_pattern.map(|pattern| format!("{pattern}%"));
    let mut statement = connection.prepare(&sql)?;
    let rows = statement
        .query_map(params![like_pattern], |row| {
            Ok(StorageRow {
                id: row.get(0)?,
                entity_id: row.get(1)?,
                name: row.get(2)?,
                size: row.get(3)?,
                state: row.get(4)?,
                total_entry_count: row.get(5)?,
                total_entry_size: row.get(6)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct EntryRow {
    pub id: i64,
    pub entity_id: i64,
    pub name: String,
    pub entry_type: i64,
    pub size: i64,
}

/// List entries by entity restriction and an optional name search. A name
/// search is routed through `entriesFTS` (joined back to `entries` by
/// rowid) rather than a raw `LIKE`, since entry names are full-text indexed.
pub fn list_entries(
    connection: &Connection,
    entity_ids: &[i64],
    name_pattern: Option<&str>,
) -> Result<Vec<EntryRow>> {
    let mut filter = String::new();
    if let Some(clause) = ids_clause("entityId", entity_ids) {
        filter_append(&mut filter, true, "AND", &clause);
    }
    if filter.is_empty() {
        filter.push_str("1=1");
    }

    let row_mapper = |row: &rusqlite::Row| {
        Ok(EntryRow {
            id: row.get(0)?,
            entity_id: row.get(1)?,
            name: row.get(2)?,
            entry_type: row.get(3)?,
            size: row.get(4)?,
        })
    };

    let rows = match name_pattern {
        Some(pattern) => {
            let fts_pattern = fts_prefix_pattern(pattern);
            let sql = format!(
                "SELECT e.id, e.entityId, e.name, e.type, e.size
                 FROM entries e JOIN entriesFTS f ON f.rowid = e.id
                 WHERE f.name MATCH ?1 AND {filter}"
            );
            let mut statement = connection.prepare(&sql)?;
            let result = statement
                .query_map(params![fts_pattern], row_mapper)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        }
        None => {
            let sql = format!("SELECT id, entityId, name, type, size FROM entries WHERE {filter}");
            let mut statement = connection.prepare(&sql)?;
            let result = statement
                .query_map([], row_mapper)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            result
        }
    };
    Ok(rows)
}

pub struct UuidRow {
    pub id: i64,
    pub job_uuid: String,
}

/// List every known job UUID, oldest first.
pub fn list_uuids(connection: &Connection) -> Result<Vec<UuidRow>> {
    let mut statement = connection.prepare("SELECT id, jobUUID FROM uuids ORDER BY id")?;
    let rows = statement
        .query_map([], |row| Ok(UuidRow { id: row.get(0)?, job_uuid: row.get(1)? }))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct EntityRow {
    pub id: i64,
    pub job_uuid: String,
    pub host_name: String,
    pub user_name: String,
    pub archive_type: i64,
    pub created: i64,
}

/// List non-deleted entities, optionally restricted to a set of ids.
pub fn list_entities(connection: &Connection, entity_ids: &[i64]) -> Result<Vec<EntityRow>> {
    let mut filter = String::new();
    filter_append(&mut filter, true, "AND", "deletedFlag = 0");
    if let Some(clause) = ids_clause("id", entity_ids) {
        filter_append(&mut filter, true, "AND", &clause);
    }

    let sql = format!(
        "SELECT id, jobUUID, hostName, userName, archiveType, created
         FROM entities WHERE {filter} ORDER BY id"
    );
    let mut statement = connection.prepare(&sql)?;
    let rows = statement
        .query_map([], |row| {
            Ok(EntityRow {
                id: row.get(0)?,
                job_uuid: row.get(1)?,
                host_name: row.get(2)?,
                user_name: row.get(3)?,
                archive_type: row.get(4)?,
                created: row.get(5)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutate;
    use crate::schema;

    #[test]
    fn list_uuids_reports_inserted_uuids() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();
        mutate::new_uuid(&connection, "550e8400-e29b-41d4-a716-446655440000").unwrap();

        let rows = list_uuids(&connection).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].job_uuid, "550e8400-e29b-41d4-a716-446655440000");
    }

    #[test]
    fn list_entities_excludes_default_once_deleted() {
        let connection = Connection::open_in_memory().unwrap();
        schema::create(&connection).unwrap();
        let rows = list_entities(&connection, &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, 0);
    }

    #[test]
    fn filter_append_skips_false_conditions() {
        let mut buffer = String::new();
        filter_append(&mut buffer, false, "AND", "x = 1");
        assert!(buffer.is_empty());
    }

    #[test]
    fn filter_append_omits_leading_connective() {
        let mut buffer = String::new();
        filter_append(&mut buffer, true, "AND", "x = 1");
        assert_eq!(buffer, "(x = 1)");
        filter_append(&mut buffer, true, "AND", "y = 2");
        assert_eq!(buffer, "(x = 1) AND (y = 2)");
    }

    #[test]
    fn append_ordering_none_is_noop() {
        let mut buffer = String::new();
        append_ordering(&mut buffer, "name", SortDirection::None);
        assert!(buffer.is_empty());
    }

    #[test]
    fn normalize_collapses_punctuation_to_wildcard() {
        assert_eq!(normalize_fts_pattern("hello, world!"), "hello* world*");
        assert_eq!(normalize_fts_pattern("back-up_001"), "back*up*001");
    }

    #[test]
    fn normalize_keeps_codepoints_above_127() {
        assert_eq!(normalize_fts_pattern("café"), "café");
    }

    #[test]
    fn ids_clause_empty_list_means_no_restriction() {
        assert_eq!(ids_clause("id", &[]), None);
        assert_eq!(ids_clause("id", &[1, 2]), Some("id IN (1,2)".to_string()));
    }
}
