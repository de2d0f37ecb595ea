use chrono::Duration;
use serde::{Deserialize, Serialize};

/// Operator-configurable engine parameters.
///
/// All durations are milliseconds. Values arrive from the daemon's
/// environment/TOML configuration; every field falls back to its default
/// when omitted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParams {
    /// Minimum time a track must be in frame before recognition is attempted.
    pub dwell_ms: u64,
    /// Window during which a resolved track is frozen and a marked
    /// (student, shift, date) key blocks re-marking.
    pub cooldown_ms: u64,
    /// Confidence percentage a candidate must reach to qualify.
    pub required_confidence: f32,
    /// Smallest acceptable face size in pixels (too far away below this).
    pub min_face_size: f32,
    /// Largest acceptable face size in pixels (too close above this).
    pub max_face_size: f32,
    /// How long an unseen track is retained before it is dropped.
    pub retention_ms: u64,
    /// Maximum centroid displacement for a detection to bind to a track.
    pub match_radius_px: f32,
    /// How long a committed track stays on screen before retirement.
    pub display_hold_ms: u64,
}

impl Default for EngineParams {
    fn default() -> Self {
        Self {
            dwell_ms: 1500,
            cooldown_ms: 30_000,
            required_confidence: 60.0,
            min_face_size: 100.0,
            max_face_size: 400.0,
            retention_ms: 2000,
            match_radius_px: 100.0,
            display_hold_ms: 2000,
        }
    }
}

impl EngineParams {
    pub fn dwell(&self) -> Duration {
        Duration::milliseconds(self.dwell_ms as i64)
    }

    pub fn cooldown(&self) -> Duration {
        Duration::milliseconds(self.cooldown_ms as i64)
    }

    pub fn retention(&self) -> Duration {
        Duration::milliseconds(self.retention_ms as i64)
    }

    pub fn display_hold(&self) -> Duration {
        Duration::milliseconds(self.display_hold_ms as i64)
    }
}
