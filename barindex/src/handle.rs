//! Index handle and the process-global locking model (§4.F).
//!
//! `index_lock`/`pause_lock`/`busy_lock` are binary mutexes; `use_count` is
//! atomic; `thread_trigger` is a condvar the writer signals after
//! soft-deletes to wake the cleanup worker early.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::Duration;

use lazy_static::lazy_static;
use rusqlite::{Connection, OpenFlags};

use crate::error::{IndexError, Result};
use crate::migrate;
use crate::schema;
use crate::types::{CURRENT_SCHEMA_VERSION, DATABASE_TIMEOUT_SECS};

pub type PauseCallback = Box<dyn Fn() -> bool + Send + Sync>;

lazy_static! {
    /// Guards bookkeeping done while creating/destroying handles.
    pub static ref INDEX_LOCK: Mutex<()> = Mutex::new(());
    /// Guards the pause-callback slot.
    static ref PAUSE_LOCK: Mutex<Option<PauseCallback>> = Mutex::new(None);
    /// Cooperative "an operation is in progress" marker plus owning thread id.
    static ref BUSY_LOCK: Mutex<Option<std::thread::ThreadId>> = Mutex::new(None);
    /// Signaled by the writer after a soft-delete so the worker stops sleeping.
    pub static ref THREAD_TRIGGER: Condvar = Condvar::new();
    static ref THREAD_TRIGGER_LOCK: Mutex<()> = Mutex::new(());
}

/// Incremented around every body of work on any handle (`INDEX_DO`/`INDEX_DOX`).
/// The cleanup worker refuses to start a destructive batch while this is non-zero.
static USE_COUNT: AtomicU32 = AtomicU32::new(0);

static QUIT_FLAG: AtomicBool = AtomicBool::new(false);

pub fn set_pause_callback(callback: PauseCallback) {
    *PAUSE_LOCK.lock().unwrap() = Some(callback);
}

pub fn clear_pause_callback() {
    *PAUSE_LOCK.lock().unwrap() = None;
}

/// Polled by long data-copy loops during migration; `true` means "pause".
pub fn pause_requested() -> bool {
    PAUSE_LOCK.lock().unwrap().as_ref().map(|f| f()).unwrap_or(false)
}

pub fn request_quit() {
    QUIT_FLAG.store(true, Ordering::SeqCst);
    notify_worker();
}

pub fn quit_requested() -> bool {
    QUIT_FLAG.load(Ordering::SeqCst)
}

pub fn use_count() -> u32 {
    USE_COUNT.load(Ordering::SeqCst)
}

pub fn busy_thread() -> Option<std::thread::ThreadId> {
    *BUSY_LOCK.lock().unwrap()
}

/// Wake the cleanup worker out of its sleep, e.g. after a soft-delete.
pub fn notify_worker() {
    let _guard = THREAD_TRIGGER_LOCK.lock().unwrap();
    THREAD_TRIGGER.notify_all();
}

/// Sleep up to `timeout` or until `notify_worker`/`request_quit` fires.
pub fn worker_sleep(timeout: Duration) {
    let guard = THREAD_TRIGGER_LOCK.lock().unwrap();
    let _ = THREAD_TRIGGER.wait_timeout(guard, timeout);
}

/// RAII guard bumping `USE_COUNT` for the lifetime of one body of work. This
/// is the only way `use_count` changes, so every increment is paired with a
/// decrement even if the body panics.
pub struct UseGuard;

impl UseGuard {
    fn acquire() -> UseGuard {
        USE_COUNT.fetch_add(1, Ordering::SeqCst);
        *BUSY_LOCK.lock().unwrap() = Some(std::thread::current().id());
        UseGuard
    }
}

impl Drop for UseGuard {
    fn drop(&mut self) {
        if USE_COUNT.fetch_sub(1, Ordering::SeqCst) == 1 {
            *BUSY_LOCK.lock().unwrap() = None;
        }
    }
}

/// `INDEX_DO`: run `body` bracketed by a `use_count` increment/decrement.
pub fn index_do<F: FnOnce()>(body: F) {
    let _guard = UseGuard::acquire();
    body();
}

/// `INDEX_DOX`: same as `index_do` but propagates a return value.
pub fn index_dox<T, F: FnOnce() -> T>(body: F) -> T {
    let _guard = UseGuard::acquire();
    body()
}

/// An upstream peer a handle forwards mutations to in slave mode (§4.K).
/// Address resolution and the wire transport live outside this crate; the
/// handle only needs somewhere to send a formatted command and get a
/// key-value reply back.
pub trait UpstreamPeer: Send + Sync {
    fn call(&self, command: &str) -> Result<String>;
}

pub enum Mode {
    ReadOnly,
    ReadWrite,
}

pub struct IndexHandle {
    pub(crate) connection: Connection,
    pub upstream: Option<Box<dyn UpstreamPeer>>,
    pub upgrade_error: Option<String>,
    opened_by_thread: std::thread::ThreadId,
}

impl IndexHandle {
    /// Open (creating if absent) the index file at `path`, running the
    /// create-or-rename-and-reimport workflow described in §4.E.
    pub fn open(path: &str, mode: Mode) -> Result<IndexHandle> {
        let _lock = INDEX_LOCK.lock().unwrap();

        let exists = std::path::Path::new(path).exists();
        if !exists {
            let connection = open_connection(path, true)?;
            schema::create(&connection)?;
            log::info!("INDEX: Created new index database '{path}' (version {CURRENT_SCHEMA_VERSION})");
            return Ok(IndexHandle::from_connection(connection));
        }

        let version = {
            let probe = open_connection(path, false)?;
            schema::read_version(&probe)?
        };

        let needs_rename = match version {
            None => true,
            Some(v) if v < CURRENT_SCHEMA_VERSION as i64 => true,
            Some(v) if v > CURRENT_SCHEMA_VERSION as i64 => {
                return Err(IndexError::VersionUnknown {
                    found: v,
                    current: CURRENT_SCHEMA_VERSION,
                })
            }
            _ => false,
        };

        if needs_rename {
            let old_path = migrate::next_old_path(path);
            std::fs::rename(path, &old_path)?;
            log::warn!("INDEX: Moved outdated index '{path}' to '{old_path}' for import");
            let connection = open_connection(path, true)?;
            schema::create(&connection)?;
            return Ok(IndexHandle::from_connection(connection));
        }

        let read_write = matches!(mode, Mode::ReadWrite);
        let connection = open_connection(path, read_write)?;
        Ok(IndexHandle::from_connection(connection))
    }

    pub fn open_in_memory() -> Result<IndexHandle> {
        let connection = Connection::open_in_memory()?;
        connection.busy_timeout(Duration::from_secs(DATABASE_TIMEOUT_SECS))?;
        schema::create(&connection)?;
        Ok(IndexHandle::from_connection(connection))
    }

    fn from_connection(connection: Connection) -> IndexHandle {
        IndexHandle {
            connection,
            upstream: None,
            upgrade_error: None,
            opened_by_thread: std::thread::current().id(),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Register a callback SQLite invokes each time a statement on this
    /// handle's connection hits `SQLITE_BUSY`; returning `true` asks it to
    /// retry, `false` gives up and surfaces the busy error immediately.
    pub fn set_busy_callback(&mut self, callback: Box<dyn Fn() -> bool + Send + Sync>) -> Result<()> {
        self.connection.busy_handler(Some(move |_retries: i32| callback()))?;
        Ok(())
    }

    /// Ask the database to abort whatever statement is currently running.
    /// A fail-fast signal, not a rollback.
    pub fn interrupt(&self) {
        self.connection.get_interrupt_handle().interrupt();
    }

    pub fn is_slave(&self) -> bool {
        self.upstream.is_some()
    }

    #[cfg(debug_assertions)]
    pub fn opened_by_thread(&self) -> std::thread::ThreadId {
        self.opened_by_thread
    }
}

fn open_connection(path: &str, read_write: bool) -> Result<Connection> {
    let mut flags = OpenFlags::SQLITE_OPEN_NO_MUTEX;
    flags |= if read_write {
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE
    } else {
        OpenFlags::SQLITE_OPEN_READ_ONLY
    };
    let connection = Connection::open_with_flags(path, flags)?;
    connection.busy_timeout(Duration::from_secs(DATABASE_TIMEOUT_SECS))?;
    if read_write {
        connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    }
    Ok(connection)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opening_fresh_path_creates_schema() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.db");
        let handle = IndexHandle::open(path.to_str().unwrap(), Mode::ReadWrite).unwrap();
        assert_eq!(
            schema::read_version(handle.connection()).unwrap(),
            Some(CURRENT_SCHEMA_VERSION as i64)
        );
    }

    #[test]
    fn use_count_tracks_nested_work() {
        assert_eq!(use_count(), 0);
        index_do(|| {
            assert_eq!(use_count(), 1);
        });
        assert_eq!(use_count(), 0);
    }
}
