//! Attendance gate — deduplicates marks and produces write requests.
//!
//! Two dedup layers: a fast in-memory cooldown ledger keyed by
//! (student, shift, date), and the authoritative existence check the driver
//! runs against the attendance store before every insert. The ledger entry
//! is created *before* the write lands, which closes the race window where
//! two consecutive ticks both observe the same qualifying face; it is never
//! rolled back on failure, so a failed write still blocks immediate retry
//! until the cooldown window expires.

use std::collections::HashMap;

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::schedule::{self, FallbackCutoffs, ScheduleSet};
use crate::types::{AttendanceRecord, AttendanceStatus, RosterEntry};

/// Method tag written on every record produced by this engine.
pub const MARK_METHOD: &str = "face-scan";

/// Composite dedup key: one mark per student per session per calendar date.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CooldownKey {
    pub student_id: String,
    pub shift: String,
    pub date: NaiveDate,
}

#[derive(Debug, Clone)]
struct CooldownEntry {
    marked_at: NaiveDateTime,
    status: AttendanceStatus,
}

/// In-memory cooldown ledger, owned exclusively by the gate.
///
/// An optimization layer only: entries expire after the cooldown window and
/// the whole ledger is lost on restart. The store existence check is the
/// source of truth for once-per-day.
#[derive(Debug, Default)]
pub struct CooldownLedger {
    entries: HashMap<CooldownKey, CooldownEntry>,
}

impl CooldownLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Status stored under `key` if its entry is still inside the window.
    fn live(&self, key: &CooldownKey, now: NaiveDateTime, window: Duration) -> Option<&CooldownEntry> {
        self.entries.get(key).filter(|e| now - e.marked_at < window)
    }

    /// Drop entries older than the window. Called once per tick.
    pub fn sweep(&mut self, now: NaiveDateTime, window: Duration) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| now - e.marked_at < window);
        let removed = before - self.entries.len();
        if removed > 0 {
            tracing::debug!(removed, "swept expired cooldown entries");
        }
        removed
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A pending attendance write handed to the driver for async execution.
#[derive(Debug, Clone)]
pub struct MarkRequest {
    pub track_id: String,
    pub key: CooldownKey,
    pub record: AttendanceRecord,
}

/// Result of executing a `MarkRequest` against the attendance store.
#[derive(Debug, Clone)]
pub enum MarkOutcome {
    Committed { status: AttendanceStatus },
    /// A record for the key already existed in the store (restart or
    /// day-boundary case the in-memory ledger cannot cover).
    Duplicate,
    Failed { message: String },
}

/// Completed write fed back to the engine before the next tick's processing.
#[derive(Debug, Clone)]
pub struct MarkCompletion {
    pub track_id: String,
    pub key: CooldownKey,
    pub student_name: String,
    pub outcome: MarkOutcome,
}

/// Gate decision for one qualifying recognition.
#[derive(Debug, Clone)]
pub enum GateDecision {
    /// A live cooldown entry exists: no new write, surface the stored status.
    AlreadyMarked {
        status: AttendanceStatus,
        marked_at: NaiveDateTime,
    },
    /// Admitted: the cooldown entry is recorded and a write request produced.
    Admit {
        request: MarkRequest,
        status: AttendanceStatus,
    },
}

/// Run the gate for one qualifying match.
///
/// On admission the late/present status is determined from the schedule
/// snapshot at tick time and the cooldown entry is inserted immediately,
/// before the store write is even attempted.
#[allow(clippy::too_many_arguments)]
pub fn admit(
    ledger: &mut CooldownLedger,
    track_id: &str,
    entry: &RosterEntry,
    shift: &str,
    schedules: &ScheduleSet,
    fallback: &FallbackCutoffs,
    now: NaiveDateTime,
    cooldown: Duration,
) -> GateDecision {
    let key = CooldownKey {
        student_id: entry.id.clone(),
        shift: shift.to_string(),
        date: now.date(),
    };

    if let Some(existing) = ledger.live(&key, now, cooldown) {
        let remaining = cooldown - (now - existing.marked_at);
        tracing::debug!(
            student = %entry.full_name,
            remaining_secs = remaining.num_seconds(),
            "cooldown active, skipping mark"
        );
        return GateDecision::AlreadyMarked {
            status: existing.status,
            marked_at: existing.marked_at,
        };
    }

    let verdict = schedule::determine_status(entry, shift, schedules, fallback, now);

    ledger.entries.insert(
        key.clone(),
        CooldownEntry { marked_at: now, status: verdict.status },
    );

    let record = AttendanceRecord {
        student_id: entry.id.clone(),
        student_name: entry.full_name.clone(),
        date: now.date(),
        time_in: now,
        status: verdict.status,
        shift: shift.to_string(),
        cutoff_time: verdict.cutoff_display,
        method: MARK_METHOD.to_string(),
    };

    GateDecision::Admit {
        request: MarkRequest { track_id: track_id.to_string(), key, record },
        status: verdict.status,
    }
}
