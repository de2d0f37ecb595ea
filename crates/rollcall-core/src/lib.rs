//! rollcall-core — Face tracking and attendance decision engine.
//!
//! Turns a stream of per-frame face detections into stable identity tracks,
//! runs a dwell-and-confirm recognition state machine against an enrolled
//! roster, and emits deduplicated attendance decisions with late/on-time
//! classification. Detection itself, camera capture, and persistence are
//! external; the engine is synchronous and takes the clock as an argument.

pub mod config;
pub mod dwell;
pub mod engine;
pub mod events;
pub mod filter;
pub mod gate;
pub mod matcher;
pub mod schedule;
pub mod tracker;
pub mod types;

pub use config::EngineParams;
pub use engine::{Engine, TickReport};
pub use events::Notification;
pub use gate::{CooldownKey, MarkCompletion, MarkOutcome, MarkRequest};
pub use schedule::{FallbackCutoffs, ScheduleSet, ShiftSchedule};
pub use tracker::{MarkState, Track, TrackState};
pub use types::{
    AttendanceRecord, AttendanceStatus, BoundingBox, Descriptor, Detection, RosterEntry,
    TrackSnapshot,
};
