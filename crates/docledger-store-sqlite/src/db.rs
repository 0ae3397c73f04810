//! Connection management: one writer lane, many reader lanes.
//!
//! All mutating transactions go through the single writer connection, which
//! serializes them and makes the three-way state/audit/outbox commit a plain
//! SQLite transaction. Readers run on their own `query_only` connections and
//! proceed in parallel with writes under WAL.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use serde_json::Value;
use time::format_description::well_known::Rfc3339;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use docledger_core::Error;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_READERS: usize = 8;

/// Stored timestamps always carry nine fractional digits so that
/// lexicographic order over the TEXT column equals chronological order.
const TS_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:9]Z");

pub struct Db {
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Db {
    /// Open the database file, creating it if needed, and configure both
    /// lanes. The writer lane is exactly one connection; the reader lane
    /// sizes itself to the machine, capped at eight connections.
    pub fn open(path: &Path) -> Result<Self, Error> {
        let writer = open_connection(path, false)?;

        let reader_count = thread::available_parallelism()
            .map(std::num::NonZeroUsize::get)
            .unwrap_or(2)
            .min(MAX_READERS);
        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            readers.push(Mutex::new(open_connection(path, true)?));
        }

        Ok(Self {
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Run `f` inside an IMMEDIATE transaction on the writer connection.
    /// Commits on success; any error rolls back every effect of `f`.
    pub fn with_write<T>(
        &self,
        f: impl FnOnce(&Transaction<'_>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let mut conn = self.writer.lock();
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(map_sqlite_error)?;
        let out = f(&tx)?;
        tx.commit().map_err(map_sqlite_error)?;
        Ok(out)
    }

    /// Run `f` on one of the read-only connections.
    pub fn with_read<T>(&self, f: impl FnOnce(&Connection) -> Result<T, Error>) -> Result<T, Error> {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        let conn = self.readers[index].lock();
        f(&conn)
    }
}

fn open_connection(path: &Path, read_only: bool) -> Result<Connection, Error> {
    let conn = Connection::open(path).map_err(map_sqlite_error)?;
    conn.busy_timeout(BUSY_TIMEOUT).map_err(map_sqlite_error)?;

    // journal_mode returns the resulting mode as a row.
    let _mode: String = conn
        .query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))
        .map_err(map_sqlite_error)?;

    conn.execute_batch(
        "PRAGMA synchronous = NORMAL;
         PRAGMA temp_store = MEMORY;
         PRAGMA foreign_keys = ON;
         PRAGMA trusted_schema = OFF;",
    )
    .map_err(map_sqlite_error)?;

    if read_only {
        conn.execute_batch("PRAGMA query_only = ON;")
            .map_err(map_sqlite_error)?;
    }

    Ok(conn)
}

/// SQLITE_BUSY / SQLITE_LOCKED are worth retrying; everything else is
/// treated as fatal.
pub(crate) fn map_sqlite_error(err: rusqlite::Error) -> Error {
    match &err {
        rusqlite::Error::SqliteFailure(inner, _)
            if matches!(inner.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) =>
        {
            Error::TransientStore(err.to_string())
        }
        _ => Error::FatalStore(err.to_string()),
    }
}

pub(crate) fn encode_ts(value: OffsetDateTime) -> Result<String, Error> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&TS_FORMAT)
        .map_err(|err| Error::FatalStore(format!("format timestamp: {err}")))
}

pub(crate) fn parse_ts(raw: &str) -> Result<OffsetDateTime, Error> {
    OffsetDateTime::parse(raw, &Rfc3339)
        .map_err(|err| Error::FatalStore(format!("parse stored timestamp: {err}")))
}

pub(crate) fn encode_json(value: &Value) -> Result<String, Error> {
    serde_json::to_string(value).map_err(|err| Error::FatalStore(format!("encode json: {err}")))
}

pub(crate) fn parse_json(raw: &str) -> Result<Value, Error> {
    serde_json::from_str(raw).map_err(|err| Error::FatalStore(format!("parse stored json: {err}")))
}
