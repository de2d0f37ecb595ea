//! rollcall-store — SQLite persistence for the attendance kiosk.
//!
//! The roster and schedule tables are written by the surrounding
//! record-management application; this crate reads snapshots of them and
//! owns the attendance table. A unique index on (student_id, date, shift)
//! backs the engine's once-per-day guarantee at the database level.

pub mod sqlite;

pub use sqlite::{SqliteStore, StoreError};
