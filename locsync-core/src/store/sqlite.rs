//! SQLite-backed implementation of the storage traits.
//!
//! Provides persistent storage for:
//! - The event mirror (`calendar_event_cache`)
//! - The location schedule (`schedule_entries`)
//! - Key-value process state (`sync_state`)

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::classifier::LocationStatus;
use crate::error::StoreError;
use crate::mirror::{CachedEvent, EventMirror};
use crate::schedule::{ScheduleEntry, ScheduleStore};
use crate::state::StateStore;

const DATE_FORMAT: &str = "%Y-%m-%d";

const EVENT_COLUMNS: &str = "event_id, date, title, description, updated_ts, is_managed_property,
     is_managed_description, color_id, recurring_event_id, original_start_time";

/// One SQLite database holding every table.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at `path`.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::with_connection(conn)
    }

    /// Open an in-memory database.
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StoreError> {
        migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub(crate) fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }
}

fn migrate(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS calendar_event_cache (
            event_id               TEXT PRIMARY KEY,
            date                   TEXT NOT NULL,
            title                  TEXT,
            description            TEXT,
            updated_ts             TEXT NOT NULL,
            is_managed_property    INTEGER NOT NULL DEFAULT 0,
            is_managed_description INTEGER NOT NULL DEFAULT 0,
            color_id               TEXT,
            recurring_event_id     TEXT,
            original_start_time    TEXT
        );

        CREATE TABLE IF NOT EXISTS schedule_entries (
            date          TEXT PRIMARY KEY,
            location_code TEXT NOT NULL,
            status        TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS sync_state (
            key   TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_event_cache_date ON calendar_event_cache(date);",
    )
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn parse_date(table: &'static str, value: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(value, DATE_FORMAT).map_err(|e| StoreError::Corrupt {
        table,
        message: format!("bad date '{value}': {e}"),
    })
}

fn parse_timestamp(table: &'static str, value: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupt {
            table,
            message: format!("bad timestamp '{value}': {e}"),
        })
}

/// Raw columns of a cache row, converted after the statement is done.
struct EventRow {
    event_id: String,
    date: String,
    title: Option<String>,
    description: Option<String>,
    updated_ts: String,
    is_managed_property: bool,
    is_managed_description: bool,
    color_id: Option<String>,
    recurring_event_id: Option<String>,
    original_start_time: Option<String>,
}

impl EventRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(EventRow {
            event_id: row.get(0)?,
            date: row.get(1)?,
            title: row.get(2)?,
            description: row.get(3)?,
            updated_ts: row.get(4)?,
            is_managed_property: row.get(5)?,
            is_managed_description: row.get(6)?,
            color_id: row.get(7)?,
            recurring_event_id: row.get(8)?,
            original_start_time: row.get(9)?,
        })
    }

    fn into_cached(self) -> Result<CachedEvent, StoreError> {
        const TABLE: &str = "calendar_event_cache";
        Ok(CachedEvent {
            date: parse_date(TABLE, &self.date)?,
            updated: parse_timestamp(TABLE, &self.updated_ts)?,
            original_start: self
                .original_start_time
                .as_deref()
                .map(|s| parse_timestamp(TABLE, s))
                .transpose()?,
            event_id: self.event_id,
            title: self.title,
            description: self.description,
            managed_property: self.is_managed_property,
            managed_description: self.is_managed_description,
            color_id: self.color_id,
            recurring_event_id: self.recurring_event_id,
        })
    }
}

impl EventMirror for SqliteStore {
    fn upsert(&self, event: &CachedEvent) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO calendar_event_cache (
                event_id, date, title, description, updated_ts, is_managed_property,
                is_managed_description, color_id, recurring_event_id, original_start_time
             ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT (event_id) DO UPDATE SET
                date = excluded.date,
                title = excluded.title,
                description = excluded.description,
                updated_ts = excluded.updated_ts,
                is_managed_property = excluded.is_managed_property,
                is_managed_description = excluded.is_managed_description,
                color_id = excluded.color_id,
                recurring_event_id = excluded.recurring_event_id,
                original_start_time = excluded.original_start_time",
            params![
                event.event_id,
                format_date(event.date),
                event.title,
                event.description,
                event.updated.to_rfc3339(),
                event.managed_property,
                event.managed_description,
                event.color_id,
                event.recurring_event_id,
                event.original_start.map(|t| t.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    fn delete(&self, event_id: &str) -> Result<bool, StoreError> {
        let removed = self.conn()?.execute(
            "DELETE FROM calendar_event_cache WHERE event_id = ?1",
            params![event_id],
        )?;
        Ok(removed > 0)
    }

    fn clear(&self) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM calendar_event_cache", [])?;
        Ok(())
    }

    fn by_date(&self, date: NaiveDate) -> Result<Vec<CachedEvent>, StoreError> {
        let rows = {
            let conn = self.conn()?;
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM calendar_event_cache
                 WHERE date = ?1 ORDER BY updated_ts DESC, event_id"
            ))?;
            let rows = stmt
                .query_map(params![format_date(date)], EventRow::read)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(EventRow::into_cached).collect()
    }

    fn by_id(&self, event_id: &str) -> Result<Option<CachedEvent>, StoreError> {
        let row = self
            .conn()?
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM calendar_event_cache WHERE event_id = ?1"),
                params![event_id],
                EventRow::read,
            )
            .optional()?;
        row.map(EventRow::into_cached).transpose()
    }

    fn count(&self) -> Result<usize, StoreError> {
        let count: i64 =
            self.conn()?
                .query_row("SELECT COUNT(*) FROM calendar_event_cache", [], |row| {
                    row.get(0)
                })?;
        Ok(usize::try_from(count).unwrap_or_default())
    }
}

impl ScheduleStore for SqliteStore {
    fn get(&self, date: NaiveDate) -> Result<Option<ScheduleEntry>, StoreError> {
        const TABLE: &str = "schedule_entries";

        let row = self
            .conn()?
            .query_row(
                "SELECT location_code, status FROM schedule_entries WHERE date = ?1",
                params![format_date(date)],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        row.map(|(location_code, status)| {
            let status = status
                .parse::<LocationStatus>()
                .map_err(|message| StoreError::Corrupt { table: TABLE, message })?;
            Ok(ScheduleEntry {
                date,
                location_code,
                status,
            })
        })
        .transpose()
    }

    fn upsert(&self, entry: &ScheduleEntry) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT INTO schedule_entries (date, location_code, status) VALUES (?1, ?2, ?3)
             ON CONFLICT (date) DO UPDATE SET
                location_code = excluded.location_code,
                status = excluded.status",
            params![
                format_date(entry.date),
                entry.location_code,
                entry.status.as_str()
            ],
        )?;
        Ok(())
    }
}

impl StateStore for SqliteStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let value = self
            .conn()?
            .query_row(
                "SELECT value FROM sync_state WHERE key = ?1",
                params![key],
                |row| row.get::<_, String>(0),
            )
            .optional()?;
        Ok(value)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.conn()?.execute(
            "INSERT OR REPLACE INTO sync_state (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.conn()?
            .execute("DELETE FROM sync_state WHERE key = ?1", params![key])?;
        Ok(())
    }
}
