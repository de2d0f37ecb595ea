use chrono::{NaiveDate, NaiveTime};
use thiserror::Error;
use tokio_rusqlite::Connection;

use rollcall_core::schedule::{ScheduleSet, ShiftSchedule};
use rollcall_core::types::{AttendanceRecord, Descriptor, RosterEntry};

const DATE_FMT: &str = "%Y-%m-%d";
const TIME_IN_FMT: &str = "%Y-%m-%d %H:%M:%S";
const START_TIME_FMT: &str = "%H:%M";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS students (
    id TEXT PRIMARY KEY,
    full_name TEXT NOT NULL,
    shifts TEXT NOT NULL DEFAULT '',
    class_name TEXT,
    descriptor TEXT,
    grace_period_minutes INTEGER
);

CREATE TABLE IF NOT EXISTS class_schedules (
    class_key TEXT NOT NULL,
    shift TEXT NOT NULL,
    start_time TEXT NOT NULL,
    grace_period_minutes INTEGER,
    PRIMARY KEY (class_key, shift)
);

CREATE TABLE IF NOT EXISTS attendance (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    student_id TEXT NOT NULL,
    student_name TEXT NOT NULL,
    date TEXT NOT NULL,
    shift TEXT NOT NULL,
    status TEXT NOT NULL,
    time_in TEXT NOT NULL,
    cutoff_time TEXT NOT NULL DEFAULT '',
    method TEXT NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_once_per_day
    ON attendance (student_id, date, shift);
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("invalid descriptor for student {student}: {reason}")]
    BadDescriptor { student: String, reason: String },
    #[error("invalid start_time for class {class_key}: {reason}")]
    BadStartTime { class_key: String, reason: String },
    #[error("attendance record already exists")]
    Duplicate,
}

/// Handle to the kiosk database. Cheap to clone; all calls run on the
/// connection's worker thread.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply the schema.
    pub async fn open(path: &str) -> Result<Self, StoreError> {
        let conn = Connection::open(path).await?;
        let store = Self { conn };
        store.init_schema().await?;
        tracing::info!(path, "attendance database opened");
        Ok(store)
    }

    /// In-memory database, used by tests and diagnostics.
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        self.conn
            .call(|conn| {
                conn.execute_batch(SCHEMA)?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Load the enrolled roster snapshot.
    ///
    /// Rows come back ordered by name then id, so candidate iteration order
    /// (and therefore matcher tie-breaking) is stable across runs. A stored
    /// comma-separated shift label is expanded into individual labels.
    pub async fn load_roster(&self) -> Result<Vec<RosterEntry>, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, full_name, shifts, class_name, descriptor, grace_period_minutes
                     FROM students ORDER BY full_name, id",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<String>>(3)?,
                            row.get::<_, Option<String>>(4)?,
                            row.get::<_, Option<u32>>(5)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        rows.into_iter()
            .map(|(id, full_name, shifts, class_name, descriptor, grace)| {
                let descriptor = descriptor
                    .map(|json| {
                        serde_json::from_str::<Vec<f32>>(&json)
                            .map(Descriptor::new)
                            .map_err(|e| StoreError::BadDescriptor {
                                student: id.clone(),
                                reason: e.to_string(),
                            })
                    })
                    .transpose()?;
                Ok(RosterEntry {
                    id,
                    full_name,
                    shifts: split_shifts(&shifts),
                    class_name,
                    descriptor,
                    grace_period_minutes: grace,
                })
            })
            .collect()
    }

    /// Load the class schedule snapshot.
    pub async fn load_schedules(&self) -> Result<ScheduleSet, StoreError> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT class_key, shift, start_time, grace_period_minutes FROM class_schedules",
                )?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, String>(2)?,
                            row.get::<_, Option<u32>>(3)?,
                        ))
                    })?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;

        let mut set = ScheduleSet::new();
        for (class_key, shift, start_time, grace) in rows {
            let start = NaiveTime::parse_from_str(&start_time, START_TIME_FMT).map_err(|e| {
                StoreError::BadStartTime { class_key: class_key.clone(), reason: e.to_string() }
            })?;
            set.insert(
                &class_key,
                &shift,
                ShiftSchedule { start_time: start, grace_period_minutes: grace },
            );
        }
        Ok(set)
    }

    /// Authoritative once-per-day check: does a record already exist for
    /// this (student, date, shift)?
    pub async fn attendance_exists(
        &self,
        student_id: &str,
        date: NaiveDate,
        shift: &str,
    ) -> Result<bool, StoreError> {
        let student_id = student_id.to_string();
        let date = date.format(DATE_FMT).to_string();
        let shift = shift.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let exists = conn.query_row(
                    "SELECT EXISTS(
                         SELECT 1 FROM attendance
                         WHERE student_id = ?1 AND date = ?2 AND shift = ?3)",
                    rusqlite::params![student_id, date, shift],
                    |row| row.get::<_, bool>(0),
                )?;
                Ok(exists)
            })
            .await?;
        Ok(exists)
    }

    /// Insert one attendance record. The unique index turns a lost race
    /// into `StoreError::Duplicate` rather than a second row.
    pub async fn insert_attendance(&self, record: &AttendanceRecord) -> Result<(), StoreError> {
        let record = record.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let result = conn.execute(
                    "INSERT INTO attendance
                         (student_id, student_name, date, shift, status, time_in, cutoff_time, method)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                    rusqlite::params![
                        record.student_id,
                        record.student_name,
                        record.date.format(DATE_FMT).to_string(),
                        record.shift,
                        record.status.to_string(),
                        record.time_in.format(TIME_IN_FMT).to_string(),
                        record.cutoff_time,
                        record.method,
                    ],
                );
                match result {
                    Ok(_) => Ok(true),
                    Err(rusqlite::Error::SqliteFailure(e, _))
                        if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                    {
                        Ok(false)
                    }
                    Err(e) => Err(e.into()),
                }
            })
            .await?;

        if inserted {
            Ok(())
        } else {
            Err(StoreError::Duplicate)
        }
    }

    /// Number of records written today for a shift, for status reporting.
    pub async fn marks_today(&self, date: NaiveDate, shift: &str) -> Result<u64, StoreError> {
        let date = date.format(DATE_FMT).to_string();
        let shift = shift.to_string();
        let count = self
            .conn
            .call(move |conn| {
                let count = conn.query_row(
                    "SELECT COUNT(*) FROM attendance WHERE date = ?1 AND shift = ?2",
                    rusqlite::params![date, shift],
                    |row| row.get::<_, u64>(0),
                )?;
                Ok(count)
            })
            .await?;
        Ok(count)
    }
}

fn split_shifts(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
