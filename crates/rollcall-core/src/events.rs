//! Outbound notification events.
//!
//! The engine pushes typed messages to a queue the driver drains after each
//! tick, so consumers see events in a defined order. A `CandidateObserved`
//! is emitted before the attendance write commits and may never be followed
//! by an `AttendanceCommitted` if the write fails or turns out to be a
//! duplicate; consumers must tolerate that.

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::types::AttendanceStatus;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum Notification {
    /// A qualifying match was observed and a mark attempt is starting.
    CandidateObserved {
        student_id: String,
        student_name: String,
        confidence: f32,
        at: NaiveDateTime,
    },
    /// An attendance record was durably written.
    AttendanceCommitted {
        student_id: String,
        student_name: String,
        status: AttendanceStatus,
        shift: String,
        at: NaiveDateTime,
    },
}

impl Notification {
    pub fn name(&self) -> &'static str {
        match self {
            Notification::CandidateObserved { .. } => "candidate-observed",
            Notification::AttendanceCommitted { .. } => "attendance-committed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_serialized_tag() {
        let n = Notification::CandidateObserved {
            student_id: "s1".into(),
            student_name: "Sokha Chan".into(),
            confidence: 75.0,
            at: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(8, 0, 0).unwrap(),
        };
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains(r#""event":"candidate-observed""#));
        assert_eq!(n.name(), "candidate-observed");
    }

    #[test]
    fn test_committed_carries_status() {
        let n = Notification::AttendanceCommitted {
            student_id: "s1".into(),
            student_name: "Sokha Chan".into(),
            status: AttendanceStatus::Late,
            shift: "Morning".into(),
            at: NaiveDate::from_ymd_opt(2026, 3, 2).unwrap().and_hms_opt(8, 20, 0).unwrap(),
        };
        let json = serde_json::to_string(&n).unwrap();
        assert!(json.contains(r#""status":"late""#));
    }
}
