//! Durable storage for the mirror, the schedule and process state.

mod sqlite;

pub use sqlite::SqliteStore;
