//! Dwell/recognition gating — decides, per track and per tick, whether the
//! track is held in `Detecting`, frozen in its resolved state, retired, or
//! handed to the candidate matcher.

use chrono::NaiveDateTime;

use crate::config::EngineParams;
use crate::tracker::{MarkState, Track, TrackState};

/// What the state machine does with a track this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwellDecision {
    /// Dwell not elapsed: force `Detecting`, no recognition.
    Hold,
    /// Resolved and inside its cooldown, or under an in-flight lease:
    /// returned unchanged.
    Frozen,
    /// Committed mark displayed long enough: remove the track.
    Retire,
    /// Eligible for recognition this tick.
    Evaluate,
}

/// Evaluate one track against the dwell, cooldown and display-hold windows.
///
/// Dwell avoids false triggers from faces passing through the frame edge;
/// cooldown avoids re-querying the matcher every tick for a face that
/// lingers after resolving.
pub fn evaluate(track: &Track, now: NaiveDateTime, params: &EngineParams) -> DwellDecision {
    if track.has_lease() {
        return DwellDecision::Frozen;
    }

    if let TrackState::Recognized {
        attendance: MarkState::Marked { committed_at, .. },
        ..
    } = &track.state
    {
        if now - *committed_at >= params.display_hold() {
            return DwellDecision::Retire;
        }
        return DwellDecision::Frozen;
    }

    if now - track.first_seen < params.dwell() {
        return DwellDecision::Hold;
    }

    if let TrackState::Recognized { recognized_at, .. } = &track.state {
        if now - *recognized_at < params.cooldown() {
            return DwellDecision::Frozen;
        }
    }

    DwellDecision::Evaluate
}
