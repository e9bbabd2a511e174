//! Master/slave forwarding (§4.K). A slave handle has no local write access
//! of its own: every mutation is formatted as a `COMMAND key=value ...` line,
//! sent through `UpstreamPeer::call`, and the reply is parsed back into
//! key-value pairs.

use crate::error::{IndexError, Result};
use crate::handle::UpstreamPeer;
use crate::types::{ArchiveType, StorageMode, StorageState};

/// Escape a value for inclusion in a `key=value` command line: `'` becomes
/// `%'s`, `%` becomes `%%`, matching the textual protocol's quoting rule.
pub fn escape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("%%"),
            '\'' => out.push_str("%'s"),
            '\n' => out.push_str("%'n"),
            other => out.push(other),
        }
    }
    out
}

pub fn unescape_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '%' {
            match chars.next() {
                Some('%') => out.push('%'),
                Some('\'') => match chars.next() {
                    Some('s') => out.push('\''),
                    Some('n') => out.push('\n'),
                    Some(other) => out.push(other),
                    None => {}
                },
                Some(other) => out.push(other),
                None => {}
            }
        } else {
            out.push(ch);
        }
    }
    out
}

fn format_command(name: &str, pairs: &[(&str, String)]) -> String {
    let mut line = String::from(name);
    for (key, value) in pairs {
        line.push(' ');
        line.push_str(key);
        line.push('=');
        line.push_str(&escape_value(value));
    }
    line
}

/// Parse a `key=value key=value ...` reply into pairs, unescaping each value.
pub fn parse_reply(reply: &str) -> Vec<(String, String)> {
    reply
        .split_whitespace()
        .filter_map(|token| {
            let (key, value) = token.split_once('=')?;
            Some((key.to_string(), unescape_value(value)))
        })
        .collect()
}

fn reply_field(reply: &str, key: &str) -> Result<String> {
    parse_reply(reply)
        .into_iter()
        .find(|(k, _)| k == key)
        .map(|(_, v)| v)
        .ok_or_else(|| IndexError::Forwarded(format!("missing field '{key}' in reply: {reply}")))
}

fn parse_i64_field(reply: &str, key: &str) -> Result<i64> {
    reply_field(reply, key)?
        .parse()
        .map_err(|_| IndexError::Forwarded(format!("non-numeric field '{key}' in reply: {reply}")))
}

pub fn forward_new_uuid(peer: &dyn UpstreamPeer, job_uuid: &str) -> Result<i64> {
    let command = format_command("INDEX_NEW_UUID", &[("jobUUID", job_uuid.to_string())]);
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_new_entity(
    peer: &dyn UpstreamPeer,
    job_uuid: &str,
    host_name: &str,
    user_name: &str,
    archive_type: ArchiveType,
    created: i64,
) -> Result<i64> {
    let archive_type_value: i64 = archive_type.into();
    let command = format_command(
        "INDEX_NEW_ENTITY",
        &[
            ("jobUUID", job_uuid.to_string()),
            ("hostName", host_name.to_string()),
            ("userName", user_name.to_string()),
            ("archiveType", archive_type_value.to_string()),
            ("created", created.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

pub fn forward_find_uuid(peer: &dyn UpstreamPeer, job_uuid: &str) -> Result<i64> {
    let command = format_command("INDEX_FIND_UUID", &[("jobUUID", job_uuid.to_string())]);
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

pub fn forward_prune_uuid(peer: &dyn UpstreamPeer, job_uuid: &str) -> Result<()> {
    let command = format_command("INDEX_PRUNE_UUID", &[("jobUUID", job_uuid.to_string())]);
    peer.call(&command)?;
    Ok(())
}

pub fn forward_prune_entity(peer: &dyn UpstreamPeer, entity_id: i64) -> Result<()> {
    let command = format_command("INDEX_PRUNE_ENTITY", &[("id", entity_id.to_string())]);
    peer.call(&command)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn forward_update_entity(
    peer: &dyn UpstreamPeer,
    entity_id: i64,
    schedule_uuid: &str,
    host_name: &str,
    user_name: &str,
    archive_type: ArchiveType,
) -> Result<()> {
    let archive_type_value: i64 = archive_type.into();
    let command = format_command(
        "INDEX_UPDATE_ENTITY",
        &[
            ("id", entity_id.to_string()),
            ("scheduleUUID", schedule_uuid.to_string()),
            ("hostName", host_name.to_string()),
            ("userName", user_name.to_string()),
            ("archiveType", archive_type_value.to_string()),
        ],
    );
    peer.call(&command)?;
    Ok(())
}

pub fn forward_entity_update_infos(peer: &dyn UpstreamPeer, entity_id: i64) -> Result<()> {
    let command = format_command("INDEX_ENTITY_UPDATE_INFOS", &[("id", entity_id.to_string())]);
    peer.call(&command)?;
    Ok(())
}

pub fn forward_entity_delete(peer: &dyn UpstreamPeer, entity_id: i64) -> Result<()> {
    let command = format_command("INDEX_ENTITY_DELETE", &[("id", entity_id.to_string())]);
    peer.call(&command)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn forward_new_storage(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_NEW_STORAGE",
        &[
            ("entityId", entity_id.to_string()),
            ("userName", user_name.to_string()),
            ("name", name.to_string()),
            ("created", created.to_string()),
            ("size", size.to_string()),
            ("state", state_value.to_string()),
            ("mode", mode_value.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

pub fn forward_storage_update(
    peer: &dyn UpstreamPeer,
    storage_id: i64,
    user_name: &str,
    comment: &str,
    size: i64,
) -> Result<()> {
    let command = format_command(
        "INDEX_STORAGE_UPDATE",
        &[
            ("id", storage_id.to_string()),
            ("userName", user_name.to_string()),
            ("comment", comment.to_string()),
            ("size", size.to_string()),
        ],
    );
    peer.call(&command)?;
    Ok(())
}

pub fn forward_storage_update_infos(peer: &dyn UpstreamPeer, storage_id: i64) -> Result<()> {
    let command = format_command("INDEX_STORAGE_UPDATE_INFOS", &[("id", storage_id.to_string())]);
    peer.call(&command)?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_file(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_ADD_FILE",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("size", size.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
            ("offset", fragment_offset.to_string()),
            ("fragmentSize", fragment_size.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_image(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_ADD_IMAGE",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("fileSystemType", file_system_type.to_string()),
            ("size", size.to_string()),
            ("blockSize", block_size.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
            ("offset", fragment_offset.to_string()),
            ("fragmentSize", fragment_size.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_hardlink(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_ADD_HARDLINK",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("size", size.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
            ("offset", fragment_offset.to_string()),
            ("fragmentSize", fragment_size.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_directory(
    peer: &dyn UpstreamPeer,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
) -> Result<i64> {
    let command = format_command(
        "INDEX_ADD_DIRECTORY",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_link(
    peer: &dyn UpstreamPeer,
    entity_id: i64,
    storage_id: i64,
    name: &str,
    destination_name: &str,
    times: (i64, i64, i64),
    uid: i64,
    gid: i64,
    permission: i64,
) -> Result<i64> {
    let command = format_command(
        "INDEX_ADD_LINK",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("destinationName", destination_name.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_add_special(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_ADD_SPECIAL",
        &[
            ("entityId", entity_id.to_string()),
            ("storageId", storage_id.to_string()),
            ("name", name.to_string()),
            ("specialType", special_type.to_string()),
            ("major", major.to_string()),
            ("minor", minor.to_string()),
            ("timeLastAccess", times.0.to_string()),
            ("timeModified", times.1.to_string()),
            ("timeLastChanged", times.2.to_string()),
            ("userId", uid.to_string()),
            ("groupId", gid.to_string()),
            ("permission", permission.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

#[allow(clippy::too_many_arguments)]
pub fn forward_new_history(
    peer: &dyn UpstreamPeer,
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
    let command = format_command(
        "INDEX_NEW_HISTORY",
        &[
            ("jobUUID", job_uuid.to_string()),
            ("scheduleUUID", schedule_uuid.to_string()),
            ("hostName", host_name.to_string()),
            ("userName", user_name.to_string()),
            ("archiveType", archive_type_value.to_string()),
            ("created", created.to_string()),
            ("errorMessage", error_message.to_string()),
            ("duration", duration.to_string()),
            ("totalEntryCount", total_entry_count.to_string()),
            ("totalEntrySize", total_entry_size.to_string()),
            ("skippedEntryCount", skipped_entry_count.to_string()),
            ("skippedEntrySize", skipped_entry_size.to_string()),
            ("errorEntryCount", error_entry_count.to_string()),
            ("errorEntrySize", error_entry_size.to_string()),
        ],
    );
    let reply = peer.call(&command)?;
    parse_i64_field(&reply, "id")
}

pub fn forward_set_state(peer: &dyn UpstreamPeer, storage_id: i64, state: StorageState) -> Result<()> {
    let state_value: i64 = state.into();
    let command = format_command(
        "INDEX_SET_STATE",
        &[("id", storage_id.to_string()), ("state", state_value.to_string())],
    );
    peer.call(&command)?;
    Ok(())
}

pub fn forward_storage_delete(peer: &dyn UpstreamPeer, storage_id: i64) -> Result<()> {
    let command = format_command("INDEX_STORAGE_DELETE", &[("id", storage_id.to_string())]);
    peer.call(&command)?;
    Ok(())
}

/// A slave treats "is this storage deleted/empty" questions pessimistically:
/// without a local copy of the catalog it cannot know, so it always answers
/// `true` rather than risk acting on stale state.
pub fn forward_is_storage_deleted(_peer: &dyn UpstreamPeer, _storage_id: i64) -> bool {
    true
}

pub fn forward_is_storage_empty(_peer: &dyn UpstreamPeer, _storage_id: i64) -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EchoPeer;
    impl UpstreamPeer for EchoPeer {
        fn call(&self, command: &str) -> Result<String> {
            Ok(format!("OK command={}", escape_value(command)))
        }
    }

    #[test]
    fn escape_round_trips_quotes_and_percent() {
        let original = "back'up%100%";
        let escaped = escape_value(original);
        assert_eq!(unescape_value(&escaped), original);
    }

    #[test]
    fn parse_reply_extracts_pairs() {
        let pairs = parse_reply("id=42 name=backup%2D001");
        assert_eq!(pairs[0], ("id".to_string(), "42".to_string()));
        assert_eq!(pairs[1].0, "name");
    }

    #[test]
    fn forward_new_uuid_parses_id_field() {
        struct FixedPeer;
        impl UpstreamPeer for FixedPeer {
            fn call(&self, _command: &str) -> Result<String> {
                Ok("id=7".to_string())
            }
        }
        let id = forward_new_uuid(&FixedPeer, "550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(id, 7);
    }

    #[test]
    fn forward_is_storage_deleted_is_pessimistic() {
        assert!(forward_is_storage_deleted(&EchoPeer, 1));
        assert!(forward_is_storage_empty(&EchoPeer, 1));
    }

    #[test]
    fn forward_add_file_parses_id_field() {
        struct FixedPeer;
        impl UpstreamPeer for FixedPeer {
            fn call(&self, _command: &str) -> Result<String> {
                Ok("id=9".to_string())
            }
        }
        let id = forward_add_file(&FixedPeer, 0, 1, "/etc/hosts", 158, (0, 0, 0), 0, 0, 0o644, 0, 158).unwrap();
        assert_eq!(id, 9);
    }

    #[test]
    fn forward_prune_entity_sends_id() {
        struct CapturingPeer {
            last_command: std::cell::RefCell<String>,
        }
        impl UpstreamPeer for CapturingPeer {
            fn call(&self, command: &str) -> Result<String> {
                *self.last_command.borrow_mut() = command.to_string();
                Ok(String::new())
            }
        }
        let peer = CapturingPeer { last_command: std::cell::RefCell::new(String::new()) };
        forward_prune_entity(&peer, 5).unwrap();
        assert_eq!(*peer.last_command.borrow(), "INDEX_PRUNE_ENTITY id=5");
    }
}
