//! Engine facade — runs one full pass per tick:
//! size filter → track association → dwell gating → candidate matching →
//! attendance gate.
//!
//! The engine is synchronous and owns all mutable engine state (tracks,
//! cooldown ledger, notification queue). The clock arrives as an argument
//! and store access happens outside: the tick emits `MarkRequest`s and the
//! driver feeds `MarkCompletion`s back before the next tick, so the ledger
//! and the per-track write lease stay visible to the very next tick even
//! while a write is still outstanding.

use chrono::NaiveDateTime;

use crate::config::EngineParams;
use crate::events::Notification;
use crate::filter;
use crate::gate::{self, CooldownLedger, GateDecision, MarkCompletion, MarkOutcome, MarkRequest};
use crate::matcher::{self, EuclideanMatcher, MatchVerdict, RosterMatcher};
use crate::schedule::{FallbackCutoffs, ScheduleSet};
use crate::tracker::{self, Identity, MarkState, Track, TrackState};
use crate::types::{AttendanceStatus, Detection, RosterEntry, TrackSnapshot};
use crate::dwell::{self, DwellDecision};

/// Everything one tick produced, in order: the snapshot for rendering, the
/// notifications to publish, and the writes to execute.
#[derive(Debug)]
pub struct TickReport {
    pub snapshot: Vec<TrackSnapshot>,
    pub notifications: Vec<Notification>,
    pub mark_requests: Vec<MarkRequest>,
}

/// Face-tracking and attendance-decision engine.
pub struct Engine {
    params: EngineParams,
    shift: String,
    roster: Vec<RosterEntry>,
    schedules: ScheduleSet,
    fallback: FallbackCutoffs,
    matcher: EuclideanMatcher,
    tracks: Vec<Track>,
    ledger: CooldownLedger,
    notifications: Vec<Notification>,
}

impl Engine {
    pub fn new(params: EngineParams, fallback: FallbackCutoffs) -> Self {
        Self {
            params,
            shift: matcher::ALL_SHIFTS.to_string(),
            roster: Vec::new(),
            schedules: ScheduleSet::new(),
            fallback,
            matcher: EuclideanMatcher,
            tracks: Vec::new(),
            ledger: CooldownLedger::new(),
            notifications: Vec::new(),
        }
    }

    /// Install the session to scan for along with fresh roster and schedule
    /// snapshots. Existing tracks are discarded; the cooldown ledger is kept
    /// (its keys are shift-scoped).
    pub fn set_session(&mut self, shift: &str, roster: Vec<RosterEntry>, schedules: ScheduleSet) {
        let enrolled = roster.iter().filter(|e| e.descriptor.is_some()).count();
        tracing::info!(
            shift,
            roster = roster.len(),
            enrolled,
            schedules = schedules.len(),
            "session installed"
        );
        self.shift = shift.to_string();
        self.roster = roster;
        self.schedules = schedules;
        self.tracks.clear();
    }

    /// Discard all tracks, cooldown entries and queued notifications.
    /// Loss of in-flight cooldown state is accepted: the store existence
    /// check re-covers anything already committed.
    pub fn reset(&mut self) {
        tracing::info!(tracks = self.tracks.len(), cooldowns = self.ledger.len(), "engine reset");
        self.tracks.clear();
        self.ledger.clear();
        self.notifications.clear();
    }

    pub fn shift(&self) -> &str {
        &self.shift
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn roster_len(&self) -> usize {
        self.roster.len()
    }

    /// Run one full pass over the current frame's detections.
    pub fn tick(&mut self, now: NaiveDateTime, detections: Vec<Detection>) -> TickReport {
        self.ledger.sweep(now, self.params.cooldown());

        let filtered = filter::by_size(
            detections,
            self.params.min_face_size,
            self.params.max_face_size,
        );

        let prev = std::mem::take(&mut self.tracks);
        let mut tracks = tracker::associate(prev, filtered, now, &self.params);

        let pool = matcher::candidate_pool(&self.roster, &self.shift);
        let mut mark_requests = Vec::new();
        let mut retired: Vec<String> = Vec::new();

        for track in tracks.iter_mut() {
            match dwell::evaluate(track, now, &self.params) {
                DwellDecision::Hold => {
                    track.state = TrackState::Detecting;
                }
                DwellDecision::Frozen => {}
                DwellDecision::Retire => {
                    tracing::debug!(track = %track.id, "retiring committed track");
                    retired.push(track.id.clone());
                }
                DwellDecision::Evaluate => {
                    let Some(descriptor) = track.descriptor.clone() else {
                        if matches!(track.state, TrackState::Detecting) {
                            track.state = TrackState::Recognizing;
                        }
                        continue;
                    };

                    match self.matcher.best_match(
                        &descriptor,
                        &pool,
                        self.params.required_confidence,
                    ) {
                        MatchVerdict::Match { entry, confidence, .. } => {
                            let decision = gate::admit(
                                &mut self.ledger,
                                &track.id,
                                entry,
                                &self.shift,
                                &self.schedules,
                                &self.fallback,
                                now,
                                self.params.cooldown(),
                            );
                            let identity = Identity {
                                id: entry.id.clone(),
                                full_name: entry.full_name.clone(),
                            };
                            match decision {
                                GateDecision::AlreadyMarked { status, marked_at } => {
                                    track.state = TrackState::Recognized {
                                        identity,
                                        confidence,
                                        // Anchor the cooldown freeze to the
                                        // original mark time, not this sighting.
                                        recognized_at: marked_at,
                                        attendance: MarkState::AlreadyMarked {
                                            status: Some(status),
                                        },
                                    };
                                }
                                GateDecision::Admit { request, .. } => {
                                    tracing::info!(
                                        student = %identity.full_name,
                                        confidence,
                                        shift = %self.shift,
                                        "candidate observed, starting mark"
                                    );
                                    self.notifications.push(Notification::CandidateObserved {
                                        student_id: identity.id.clone(),
                                        student_name: identity.full_name.clone(),
                                        confidence,
                                        at: now,
                                    });
                                    track.state = TrackState::Recognized {
                                        identity,
                                        confidence,
                                        recognized_at: now,
                                        attendance: MarkState::InFlight,
                                    };
                                    mark_requests.push(request);
                                }
                            }
                        }
                        MatchVerdict::BelowThreshold { best_confidence } => {
                            track.state = TrackState::Unknown {
                                reason: format!(
                                    "low confidence {best_confidence:.1}% < required {:.0}%",
                                    self.params.required_confidence
                                ),
                            };
                        }
                        MatchVerdict::NoCandidates => {
                            track.state = TrackState::Unknown {
                                reason: "no match above threshold".to_string(),
                            };
                        }
                    }
                }
            }
        }

        tracks.retain(|t| !retired.contains(&t.id));
        self.tracks = tracks;

        TickReport {
            snapshot: self.snapshot(),
            notifications: std::mem::take(&mut self.notifications),
            mark_requests,
        }
    }

    /// Apply one completed attendance write. Called by the driver for every
    /// outcome received since the previous tick; the committed notification
    /// is queued here and drained by the next tick so consumers always see
    /// `candidate-observed` before `attendance-committed`.
    ///
    /// The track may already be gone (left the frame past retention): the
    /// write stands and the notification still fires.
    pub fn apply_mark_outcome(&mut self, completion: MarkCompletion, now: NaiveDateTime) {
        let track = self.tracks.iter_mut().find(|t| t.id == completion.track_id);

        match completion.outcome {
            MarkOutcome::Committed { status } => {
                tracing::info!(
                    student = %completion.student_name,
                    %status,
                    shift = %completion.key.shift,
                    "attendance committed"
                );
                self.notifications.push(Notification::AttendanceCommitted {
                    student_id: completion.key.student_id.clone(),
                    student_name: completion.student_name.clone(),
                    status,
                    shift: completion.key.shift.clone(),
                    at: now,
                });
                if let Some(track) = track {
                    if let TrackState::Recognized { attendance, .. } = &mut track.state {
                        *attendance = MarkState::Marked { status, committed_at: now };
                    }
                }
            }
            MarkOutcome::Duplicate => {
                tracing::info!(
                    student = %completion.student_name,
                    shift = %completion.key.shift,
                    "record already exists, no new mark"
                );
                if let Some(track) = track {
                    if let TrackState::Recognized { attendance, .. } = &mut track.state {
                        *attendance = MarkState::AlreadyMarked { status: None };
                    }
                }
            }
            MarkOutcome::Failed { message } => {
                tracing::warn!(
                    student = %completion.student_name,
                    error = %message,
                    "attendance write failed"
                );
                // The cooldown entry stays: a failed write blocks immediate
                // retry until the window expires.
                if let Some(track) = track {
                    track.state = TrackState::Unknown {
                        reason: format!("attendance write failed: {message}"),
                    };
                }
            }
        }
    }

    /// Current per-track view for rendering.
    pub fn snapshot(&self) -> Vec<TrackSnapshot> {
        self.tracks.iter().map(snapshot_of).collect()
    }
}

fn status_str(status: AttendanceStatus) -> &'static str {
    match status {
        AttendanceStatus::Present => "present",
        AttendanceStatus::Late => "late",
    }
}

fn snapshot_of(track: &Track) -> TrackSnapshot {
    let (name, confidence, attendance, message) = match &track.state {
        TrackState::Detecting => (None, None, None, "Hold position...".to_string()),
        TrackState::Recognizing => (None, None, None, "Recognizing...".to_string()),
        TrackState::Unknown { reason } => (None, None, None, reason.clone()),
        TrackState::Recognized { identity, confidence, attendance, .. } => {
            let (att, message) = match attendance {
                MarkState::InFlight => (Some("marking"), "Marking attendance...".to_string()),
                MarkState::Marked { status, .. } => {
                    (Some(status_str(*status)), format!("Marked {status}"))
                }
                MarkState::AlreadyMarked { status } => (
                    status.map(status_str),
                    "Already marked".to_string(),
                ),
            };
            (Some(identity.full_name.clone()), Some(*confidence), att, message)
        }
    };

    TrackSnapshot {
        id: track.id.clone(),
        bbox: track.bbox,
        status: track.state.label(),
        name,
        confidence,
        attendance,
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schedule::ShiftSchedule;
    use crate::types::{BoundingBox, Descriptor};
    use chrono::{NaiveDate, NaiveTime};

    fn at(ms: i64) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, 2)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
            + chrono::Duration::milliseconds(ms)
    }

    fn entry(id: &str, descriptor: Vec<f32>) -> RosterEntry {
        RosterEntry {
            id: id.into(),
            full_name: format!("Student {id}"),
            shifts: vec!["Morning".into()],
            class_name: Some("Class 12B".into()),
            descriptor: Some(Descriptor::new(descriptor)),
            grace_period_minutes: None,
        }
    }

    fn schedules() -> ScheduleSet {
        let mut set = ScheduleSet::new();
        set.insert(
            "12B",
            "Morning",
            ShiftSchedule {
                start_time: NaiveTime::from_hms_opt(8, 0, 0).unwrap(),
                grace_period_minutes: Some(15),
            },
        );
        set
    }

    fn detection(x: f32, descriptor: Option<Vec<f32>>) -> Detection {
        Detection {
            bbox: BoundingBox { x, y: 0.0, width: 150.0, height: 150.0 },
            descriptor: descriptor.map(Descriptor::new),
        }
    }

    fn engine_with(roster: Vec<RosterEntry>) -> Engine {
        let mut engine = Engine::new(EngineParams::default(), FallbackCutoffs::default());
        engine.set_session("Morning", roster, schedules());
        engine
    }

    // Full happy path: dwell, recognize at distance 0.25 (confidence 75),
    // one write request, committed, display hold, retirement.
    #[test]
    fn test_recognition_flow_end_to_end() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);

        let r0 = engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(r0.snapshot.len(), 1);
        assert_eq!(r0.snapshot[0].status, "detecting");
        assert_eq!(r0.snapshot[0].message, "Hold position...");
        assert!(r0.mark_requests.is_empty());

        let r1 = engine.tick(at(1000), vec![detection(5.0, Some(vec![0.0]))]);
        assert_eq!(r1.snapshot[0].status, "detecting");
        assert!(r1.mark_requests.is_empty());

        // Dwell (1500ms) elapsed: recognized, lease taken, one write
        let r2 = engine.tick(at(2000), vec![detection(10.0, Some(vec![0.0]))]);
        assert_eq!(r2.snapshot[0].status, "recognized");
        assert_eq!(r2.snapshot[0].name.as_deref(), Some("Student s1"));
        assert!((r2.snapshot[0].confidence.unwrap() - 75.0).abs() < 1e-3);
        assert_eq!(r2.snapshot[0].attendance, Some("marking"));
        assert_eq!(r2.mark_requests.len(), 1);
        assert_eq!(r2.notifications.len(), 1);
        assert_eq!(r2.notifications[0].name(), "candidate-observed");

        let request = &r2.mark_requests[0];
        assert_eq!(request.record.status, AttendanceStatus::Present);
        assert_eq!(request.record.cutoff_time, "08:15 AM");

        // Write lands before the next tick
        engine.apply_mark_outcome(
            MarkCompletion {
                track_id: request.track_id.clone(),
                key: request.key.clone(),
                student_name: request.record.student_name.clone(),
                outcome: MarkOutcome::Committed { status: AttendanceStatus::Present },
            },
            at(2300),
        );

        let r3 = engine.tick(at(3000), vec![detection(10.0, Some(vec![0.0]))]);
        assert_eq!(r3.notifications.len(), 1);
        assert_eq!(r3.notifications[0].name(), "attendance-committed");
        assert_eq!(r3.snapshot[0].attendance, Some("present"));
        assert!(r3.mark_requests.is_empty());

        // Display hold (2s from commit at 2300) elapsed: track retired
        let r4 = engine.tick(at(4500), vec![detection(10.0, Some(vec![0.0]))]);
        assert!(r4.snapshot.is_empty());
    }

    #[test]
    fn test_undersized_detection_creates_no_track() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        let small = Detection {
            bbox: BoundingBox { x: 0.0, y: 0.0, width: 90.0, height: 90.0 },
            descriptor: Some(Descriptor::new(vec![0.0])),
        };
        let report = engine.tick(at(0), vec![small]);
        assert!(report.snapshot.is_empty());
    }

    #[test]
    fn test_no_resolution_before_dwell() {
        let mut engine = engine_with(vec![entry("s1", vec![0.0])]);
        // Perfect match available, but dwell not elapsed
        let report = engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(report.snapshot[0].status, "detecting");
        assert!(report.mark_requests.is_empty());
    }

    #[test]
    fn test_at_most_one_write_across_overlapping_tracks() {
        // Two distant tracks, same identity: the cooldown entry created by
        // the first admission blocks the second in the same tick.
        let mut engine = engine_with(vec![entry("s1", vec![0.0])]);
        let dets = vec![
            detection(0.0, Some(vec![0.0])),
            detection(600.0, Some(vec![0.0])),
        ];
        engine.tick(at(0), dets.clone());
        let report = engine.tick(at(2000), dets);

        assert_eq!(report.snapshot.len(), 2);
        assert_eq!(report.mark_requests.len(), 1);
        let marking: Vec<_> = report
            .snapshot
            .iter()
            .filter(|s| s.attendance == Some("marking"))
            .collect();
        assert_eq!(marking.len(), 1);
        assert!(report
            .snapshot
            .iter()
            .any(|s| s.message == "Already marked"));
    }

    #[test]
    fn test_redetection_inside_cooldown_shows_already_marked() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let r = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        let request = &r.mark_requests[0];
        engine.apply_mark_outcome(
            MarkCompletion {
                track_id: request.track_id.clone(),
                key: request.key.clone(),
                student_name: request.record.student_name.clone(),
                outcome: MarkOutcome::Committed { status: AttendanceStatus::Present },
            },
            at(2100),
        );
        // Track retires, face leaves, then comes back at t=5s as a new track
        engine.tick(at(4200), vec![]);
        engine.tick(at(5000), vec![detection(0.0, Some(vec![0.0]))]);
        engine.tick(at(6000), vec![detection(0.0, Some(vec![0.0]))]);
        let r2 = engine.tick(at(7000), vec![detection(0.0, Some(vec![0.0]))]);

        assert!(r2.mark_requests.is_empty(), "no second write inside cooldown");
        assert_eq!(r2.snapshot[0].status, "recognized");
        assert_eq!(r2.snapshot[0].message, "Already marked");
        assert_eq!(r2.snapshot[0].attendance, Some("present"));
    }

    #[test]
    fn test_below_threshold_is_unknown_with_reason() {
        // distance 0.5 → confidence 50 < 60
        let mut engine = engine_with(vec![entry("s1", vec![0.5])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let report = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(report.snapshot[0].status, "unknown");
        assert!(report.snapshot[0].message.starts_with("low confidence 50.0%"));
        assert!(report.mark_requests.is_empty());
    }

    #[test]
    fn test_empty_pool_is_unknown_no_match() {
        let mut engine = engine_with(vec![]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let report = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(report.snapshot[0].status, "unknown");
        assert_eq!(report.snapshot[0].message, "no match above threshold");
    }

    #[test]
    fn test_missing_descriptor_never_resolves() {
        let mut engine = engine_with(vec![entry("s1", vec![0.0])]);
        engine.tick(at(0), vec![detection(0.0, None)]);
        let report = engine.tick(at(2000), vec![detection(0.0, None)]);
        assert_eq!(report.snapshot[0].status, "recognizing");
        assert!(report.mark_requests.is_empty());
    }

    #[test]
    fn test_failed_write_surfaces_unknown_and_blocks_retry() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let r = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        let request = &r.mark_requests[0];

        engine.apply_mark_outcome(
            MarkCompletion {
                track_id: request.track_id.clone(),
                key: request.key.clone(),
                student_name: request.record.student_name.clone(),
                outcome: MarkOutcome::Failed { message: "store unavailable".into() },
            },
            at(2500),
        );

        // Failure state is visible until the next evaluation replaces it
        let snap = engine.snapshot();
        assert_eq!(snap[0].status, "unknown");
        assert!(snap[0].message.contains("attendance write failed"));

        // The cooldown entry was not rolled back: re-evaluation inside the
        // window yields already-marked, not a second write.
        let r2 = engine.tick(at(3000), vec![detection(0.0, Some(vec![0.0]))]);
        assert!(r2.mark_requests.is_empty());
        assert_eq!(r2.snapshot[0].message, "Already marked");
        let r3 = engine.tick(at(4000), vec![detection(0.0, Some(vec![0.0]))]);
        assert!(r3.mark_requests.is_empty());
    }

    #[test]
    fn test_store_duplicate_surfaces_already_marked() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let r = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        let request = &r.mark_requests[0];

        engine.apply_mark_outcome(
            MarkCompletion {
                track_id: request.track_id.clone(),
                key: request.key.clone(),
                student_name: request.record.student_name.clone(),
                outcome: MarkOutcome::Duplicate,
            },
            at(2500),
        );

        let r2 = engine.tick(at(3000), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(r2.snapshot[0].status, "recognized");
        assert_eq!(r2.snapshot[0].message, "Already marked");
        assert_eq!(r2.snapshot[0].attendance, None);
        assert!(r2.notifications.is_empty(), "duplicates emit no committed event");
    }

    #[test]
    fn test_committed_event_fires_even_if_track_left() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        let r = engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        let request = r.mark_requests[0].clone();

        // Face leaves; track dropped past retention
        engine.tick(at(3000), vec![]);
        let r2 = engine.tick(at(4500), vec![]);
        assert!(r2.snapshot.is_empty());

        engine.apply_mark_outcome(
            MarkCompletion {
                track_id: request.track_id.clone(),
                key: request.key.clone(),
                student_name: request.record.student_name.clone(),
                outcome: MarkOutcome::Committed { status: AttendanceStatus::Late },
            },
            at(4600),
        );
        let r3 = engine.tick(at(5000), vec![]);
        assert_eq!(r3.notifications.len(), 1);
        assert_eq!(r3.notifications[0].name(), "attendance-committed");
    }

    #[test]
    fn test_one_failing_track_does_not_abort_others() {
        // s1 matches track A; track B has no match. Both process in one tick.
        let mut engine = engine_with(vec![entry("s1", vec![0.0])]);
        let dets = vec![
            detection(0.0, Some(vec![0.0])),
            detection(600.0, Some(vec![2.0])), // distance 2.0, confidence -100
        ];
        engine.tick(at(0), dets.clone());
        let report = engine.tick(at(2000), dets);
        assert_eq!(report.snapshot.len(), 2);
        assert_eq!(report.mark_requests.len(), 1);
        assert!(report.snapshot.iter().any(|s| s.status == "recognized"));
        assert!(report.snapshot.iter().any(|s| s.status == "unknown"));
    }

    #[test]
    fn test_reset_clears_state() {
        let mut engine = engine_with(vec![entry("s1", vec![0.25])]);
        engine.tick(at(0), vec![detection(0.0, Some(vec![0.0]))]);
        engine.tick(at(2000), vec![detection(0.0, Some(vec![0.0]))]);
        assert_eq!(engine.track_count(), 1);

        engine.reset();
        assert_eq!(engine.track_count(), 0);
        let report = engine.tick(at(3000), vec![]);
        assert!(report.snapshot.is_empty());
        assert!(report.notifications.is_empty());
    }
}
