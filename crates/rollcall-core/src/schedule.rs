//! Class/session schedules and the late-determination rule.
//!
//! A recognized student is late when the mark lands after
//! `shift start + grace period`. Grace resolves per-student override first,
//! then the schedule's own value, then a global default. Students whose
//! class has no schedule fall back to a fixed per-shift cutoff table.

use std::collections::HashMap;

use chrono::{NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

use crate::types::{AttendanceStatus, RosterEntry};

/// Grace period applied when neither the student nor the schedule carries one.
pub const DEFAULT_GRACE_MINUTES: u32 = 15;

/// Start time and grace period for one (class, shift) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShiftSchedule {
    pub start_time: NaiveTime,
    pub grace_period_minutes: Option<u32>,
}

/// Snapshot of all class schedules, keyed by normalized class key and
/// lowercased shift label. Treated as immutable for the duration of a tick.
#[derive(Debug, Clone, Default)]
pub struct ScheduleSet {
    entries: HashMap<(String, String), ShiftSchedule>,
}

impl ScheduleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, class_key: &str, shift: &str, schedule: ShiftSchedule) {
        self.entries
            .insert((class_key.to_lowercase(), shift.to_lowercase()), schedule);
    }

    /// Resolve the schedule for a roster class name and shift label.
    ///
    /// Roster entries store display names like "Class 12B" while schedules
    /// are keyed "12B"; the leading "Class " is stripped before lookup.
    pub fn resolve(&self, class_name: Option<&str>, shift: &str) -> Option<&ShiftSchedule> {
        let class_key = normalize_class_key(class_name?);
        self.entries.get(&(class_key, shift.to_lowercase()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn normalize_class_key(class_name: &str) -> String {
    class_name
        .strip_prefix("Class ")
        .unwrap_or(class_name)
        .trim()
        .to_lowercase()
}

/// Fixed per-shift cutoffs used when no class schedule is resolvable.
#[derive(Debug, Clone)]
pub struct FallbackCutoffs {
    cutoffs: HashMap<String, NaiveTime>,
}

impl Default for FallbackCutoffs {
    fn default() -> Self {
        let mut cutoffs = HashMap::new();
        cutoffs.insert("morning".to_string(), NaiveTime::from_hms_opt(8, 30, 0).unwrap());
        cutoffs.insert("afternoon".to_string(), NaiveTime::from_hms_opt(13, 30, 0).unwrap());
        cutoffs.insert("evening".to_string(), NaiveTime::from_hms_opt(18, 30, 0).unwrap());
        Self { cutoffs }
    }
}

impl FallbackCutoffs {
    /// Build from a label → time table (labels matched case-insensitively).
    pub fn from_table(table: HashMap<String, NaiveTime>) -> Self {
        Self {
            cutoffs: table.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect(),
        }
    }

    pub fn get(&self, shift: &str) -> Option<NaiveTime> {
        self.cutoffs.get(&shift.to_lowercase()).copied()
    }
}

/// Result of the late-determination rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LateVerdict {
    pub status: AttendanceStatus,
    /// Cutoff used for the decision, formatted for display; empty when no
    /// schedule and no fallback cutoff applied.
    pub cutoff_display: String,
}

/// Classify a mark at `now` as present or late.
pub fn determine_status(
    entry: &RosterEntry,
    shift: &str,
    schedules: &ScheduleSet,
    fallback: &FallbackCutoffs,
    now: NaiveDateTime,
) -> LateVerdict {
    if let Some(schedule) = schedules.resolve(entry.class_name.as_deref(), shift) {
        let grace = entry
            .grace_period_minutes
            .or(schedule.grace_period_minutes)
            .unwrap_or(DEFAULT_GRACE_MINUTES);
        let cutoff = now.date().and_time(schedule.start_time)
            + chrono::Duration::minutes(grace as i64);
        return LateVerdict {
            status: if now > cutoff { AttendanceStatus::Late } else { AttendanceStatus::Present },
            cutoff_display: format_cutoff(cutoff.time()),
        };
    }

    tracing::debug!(
        student = %entry.full_name,
        shift,
        "no schedule resolvable, using fallback cutoff"
    );

    match fallback.get(shift) {
        Some(cutoff_time) => {
            let cutoff = now.date().and_time(cutoff_time);
            LateVerdict {
                status: if now > cutoff { AttendanceStatus::Late } else { AttendanceStatus::Present },
                cutoff_display: format_cutoff(cutoff_time),
            }
        }
        None => LateVerdict {
            status: AttendanceStatus::Present,
            cutoff_display: String::new(),
        },
    }
}

/// 12-hour display format, e.g. "08:15 AM".
fn format_cutoff(t: NaiveTime) -> String {
    t.format("%I:%M %p").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn entry(class_name: Option<&str>, grace: Option<u32>) -> RosterEntry {
        RosterEntry {
            id: "s1".into(),
            full_name: "Sokha Chan".into(),
            shifts: vec!["Morning".into()],
            class_name: class_name.map(String::from),
            descriptor: None,
            grace_period_minutes: grace,
        }
    }

    fn schedules_12b(start: (u32, u32), grace: Option<u32>) -> ScheduleSet {
        let mut set = ScheduleSet::new();
        set.insert(
            "12B",
            "Morning",
            ShiftSchedule {
                start_time: NaiveTime::from_hms_opt(start.0, start.1, 0).unwrap(),
                grace_period_minutes: grace,
            },
        );
        set
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn test_late_after_grace() {
        // Start 08:00, grace 15min, mark at 08:20 → late, cutoff "08:15 AM"
        let verdict = determine_status(
            &entry(Some("Class 12B"), None),
            "Morning",
            &schedules_12b((8, 0), Some(15)),
            &FallbackCutoffs::default(),
            at(8, 20),
        );
        assert_eq!(verdict.status, AttendanceStatus::Late);
        assert_eq!(verdict.cutoff_display, "08:15 AM");
    }

    #[test]
    fn test_present_within_grace() {
        let verdict = determine_status(
            &entry(Some("Class 12B"), None),
            "Morning",
            &schedules_12b((8, 0), Some(15)),
            &FallbackCutoffs::default(),
            at(8, 10),
        );
        assert_eq!(verdict.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_exactly_at_cutoff_is_present() {
        // Late iff strictly after the cutoff
        let verdict = determine_status(
            &entry(Some("Class 12B"), None),
            "Morning",
            &schedules_12b((8, 0), Some(15)),
            &FallbackCutoffs::default(),
            at(8, 15),
        );
        assert_eq!(verdict.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_grace_zero_flips_outcome() {
        // now == start + 1min: grace 15 → present, grace 0 → late
        let e = entry(Some("Class 12B"), None);
        let fallback = FallbackCutoffs::default();

        let with_grace = determine_status(
            &e, "Morning", &schedules_12b((8, 0), Some(15)), &fallback, at(8, 1));
        assert_eq!(with_grace.status, AttendanceStatus::Present);

        let no_grace = determine_status(
            &e, "Morning", &schedules_12b((8, 0), Some(0)), &fallback, at(8, 1));
        assert_eq!(no_grace.status, AttendanceStatus::Late);
    }

    #[test]
    fn test_student_override_beats_schedule_grace() {
        // Schedule grace 15 would make 08:10 present; student override 5 → late
        let verdict = determine_status(
            &entry(Some("Class 12B"), Some(5)),
            "Morning",
            &schedules_12b((8, 0), Some(15)),
            &FallbackCutoffs::default(),
            at(8, 10),
        );
        assert_eq!(verdict.status, AttendanceStatus::Late);
        assert_eq!(verdict.cutoff_display, "08:05 AM");
    }

    #[test]
    fn test_default_grace_when_unspecified() {
        // Neither student nor schedule carries grace → 15 minutes
        let verdict = determine_status(
            &entry(Some("Class 12B"), None),
            "Morning",
            &schedules_12b((8, 0), None),
            &FallbackCutoffs::default(),
            at(8, 14),
        );
        assert_eq!(verdict.status, AttendanceStatus::Present);
        assert_eq!(verdict.cutoff_display, "08:15 AM");
    }

    #[test]
    fn test_class_prefix_normalization() {
        // "Class 12B" resolves the schedule keyed "12B"
        let mut set = ScheduleSet::new();
        set.insert(
            "12b",
            "morning",
            ShiftSchedule {
                start_time: NaiveTime::from_hms_opt(7, 0, 0).unwrap(),
                grace_period_minutes: Some(10),
            },
        );
        assert!(set.resolve(Some("Class 12B"), "Morning").is_some());
        assert!(set.resolve(Some("12B"), "Morning").is_some());
        assert!(set.resolve(Some("Class 7A"), "Morning").is_none());
        assert!(set.resolve(None, "Morning").is_none());
    }

    #[test]
    fn test_fallback_cutoff_applies_without_schedule() {
        // No class → Morning fallback 08:30
        let fallback = FallbackCutoffs::default();
        let early = determine_status(&entry(None, None), "Morning", &ScheduleSet::new(), &fallback, at(8, 29));
        assert_eq!(early.status, AttendanceStatus::Present);
        assert_eq!(early.cutoff_display, "08:30 AM");

        let late = determine_status(&entry(None, None), "Morning", &ScheduleSet::new(), &fallback, at(8, 31));
        assert_eq!(late.status, AttendanceStatus::Late);

        let evening = determine_status(&entry(None, None), "Evening", &ScheduleSet::new(), &fallback, at(19, 0));
        assert_eq!(evening.status, AttendanceStatus::Late);
        assert_eq!(evening.cutoff_display, "06:30 PM");
    }

    #[test]
    fn test_unknown_shift_defaults_present() {
        let verdict = determine_status(
            &entry(None, None),
            "Weekend",
            &ScheduleSet::new(),
            &FallbackCutoffs::default(),
            at(23, 0),
        );
        assert_eq!(verdict.status, AttendanceStatus::Present);
        assert_eq!(verdict.cutoff_display, "");
    }
}
