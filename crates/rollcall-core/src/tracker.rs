//! Track matcher — associates this frame's detections with tracks carried
//! over from the previous frame.
//!
//! Association is greedy nearest-centroid: previous tracks are visited in
//! insertion order and each claims its closest unclaimed detection within a
//! fixed pixel radius. Ordering is deterministic: distances are compared
//! with strict `<`, so an exact tie resolves to the earliest detection
//! index, and no two tracks can claim the same detection.

use chrono::NaiveDateTime;
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineParams;
use crate::types::{AttendanceStatus, BoundingBox, Descriptor, Detection};

/// The roster identity a recognized track resolved to.
#[derive(Debug, Clone, Serialize)]
pub struct Identity {
    pub id: String,
    pub full_name: String,
}

/// Progress of the attendance write for a recognized track.
#[derive(Debug, Clone)]
pub enum MarkState {
    /// Exclusive lease: a write for this track is in flight.
    InFlight,
    /// Persistence succeeded; the track is retired after a short display hold.
    Marked {
        status: AttendanceStatus,
        committed_at: NaiveDateTime,
    },
    /// Cooldown hit or store-level duplicate. The status is known when the
    /// in-memory cooldown entry supplied it, unknown for a store duplicate.
    AlreadyMarked { status: Option<AttendanceStatus> },
}

/// Track lifecycle state. Only the fields valid for each state exist, so a
/// recognized track always carries its identity and an unknown track always
/// carries its reason.
#[derive(Debug, Clone)]
pub enum TrackState {
    /// Dwell not yet elapsed; the face must hold still.
    Detecting,
    /// Dwell elapsed but no usable descriptor yet.
    Recognizing,
    /// Evaluated without a qualifying match, or a failed write.
    Unknown { reason: String },
    Recognized {
        identity: Identity,
        confidence: f32,
        recognized_at: NaiveDateTime,
        attendance: MarkState,
    },
}

impl TrackState {
    /// Stable label used in snapshots and logs.
    pub fn label(&self) -> &'static str {
        match self {
            TrackState::Detecting => "detecting",
            TrackState::Recognizing => "recognizing",
            TrackState::Unknown { .. } => "unknown",
            TrackState::Recognized { .. } => "recognized",
        }
    }
}

/// A provisional identity hypothesis for one face across frames.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: String,
    pub bbox: BoundingBox,
    pub descriptor: Option<Descriptor>,
    pub first_seen: NaiveDateTime,
    pub last_seen: NaiveDateTime,
    pub state: TrackState,
}

impl Track {
    fn new(detection: Detection, now: NaiveDateTime) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            bbox: detection.bbox,
            descriptor: detection.descriptor,
            first_seen: now,
            last_seen: now,
            state: TrackState::Detecting,
        }
    }

    /// True while an attendance write for this track is outstanding.
    pub fn has_lease(&self) -> bool {
        matches!(
            self.state,
            TrackState::Recognized { attendance: MarkState::InFlight, .. }
        )
    }
}

/// Associate previous-tick tracks with this tick's filtered detections.
///
/// Bound tracks update their box, descriptor and `last_seen`; unbound tracks
/// are retained verbatim until the retention window lapses; detections left
/// unclaimed spawn new `Detecting` tracks. Track identity is stable as long
/// as per-tick centroid motion stays under `match_radius_px`.
pub fn associate(
    prev: Vec<Track>,
    detections: Vec<Detection>,
    now: NaiveDateTime,
    params: &EngineParams,
) -> Vec<Track> {
    let mut claimed = vec![false; detections.len()];
    let mut next: Vec<Track> = Vec::with_capacity(prev.len() + detections.len());

    for mut track in prev {
        let mut best: Option<(usize, f32)> = None;
        for (i, det) in detections.iter().enumerate() {
            if claimed[i] {
                continue;
            }
            let dist = track.bbox.centroid_distance(&det.bbox);
            if dist < params.match_radius_px && best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }

        match best {
            Some((i, _)) => {
                claimed[i] = true;
                let det = &detections[i];
                track.bbox = det.bbox;
                if let Some(desc) = &det.descriptor {
                    track.descriptor = Some(desc.clone());
                }
                track.last_seen = now;
                next.push(track);
            }
            None => {
                // Keep the track for a grace period after it disappears.
                if now - track.last_seen < params.retention() {
                    next.push(track);
                } else {
                    tracing::debug!(track = %track.id, "track retired (unseen past retention)");
                }
            }
        }
    }

    for (i, det) in detections.into_iter().enumerate() {
        if !claimed[i] {
            let track = Track::new(det, now);
            tracing::debug!(track = %track.id, "new track");
            next.push(track);
        }
    }

    next
}
