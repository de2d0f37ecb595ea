//! Candidate matcher — compares a track descriptor against the enrolled
//! roster and selects the best candidate under the confidence threshold.

use crate::types::{Descriptor, RosterEntry};

/// Session label that selects every enrolled entry.
pub const ALL_SHIFTS: &str = "All";

/// Confidence percentage for a descriptor distance.
///
/// Deliberately unclamped: a distance above 1.0 yields a negative value,
/// which can never qualify against a non-negative operator threshold, and a
/// degenerate distance below 0.0 would read above 100.
pub fn score_confidence(distance: f32) -> f32 {
    (1.0 - distance) * 100.0
}

/// Outcome of matching one probe descriptor against the candidate pool.
#[derive(Debug, Clone)]
pub enum MatchVerdict<'a> {
    /// Best qualifying candidate: minimal distance among entries whose
    /// confidence reached the threshold.
    Match {
        entry: &'a RosterEntry,
        distance: f32,
        confidence: f32,
    },
    /// Candidates existed but none qualified; carries the best confidence
    /// seen for the operator-facing message.
    BelowThreshold { best_confidence: f32 },
    /// Empty candidate pool.
    NoCandidates,
}

/// Strategy for resolving a probe descriptor against the roster.
pub trait RosterMatcher {
    fn best_match<'a>(
        &self,
        probe: &Descriptor,
        pool: &[&'a RosterEntry],
        required_confidence: f32,
    ) -> MatchVerdict<'a>;
}

/// Euclidean-distance matcher over enrolled descriptors.
///
/// Iterates every candidate; among qualifiers the minimum distance wins and
/// an exact tie keeps the earliest roster entry (strict `<` comparison), so
/// selection is deterministic for a fixed roster order.
pub struct EuclideanMatcher;

impl RosterMatcher for EuclideanMatcher {
    fn best_match<'a>(
        &self,
        probe: &Descriptor,
        pool: &[&'a RosterEntry],
        required_confidence: f32,
    ) -> MatchVerdict<'a> {
        let mut best: Option<(&'a RosterEntry, f32)> = None;
        let mut best_any: Option<f32> = None;

        for entry in pool {
            let Some(enrolled) = &entry.descriptor else {
                continue;
            };
            let distance = probe.euclidean_distance(enrolled);
            let confidence = score_confidence(distance);

            tracing::trace!(
                student = %entry.full_name,
                distance,
                confidence,
                required_confidence,
                "candidate compared"
            );

            if best_any.map_or(true, |c| confidence > c) {
                best_any = Some(confidence);
            }
            if confidence >= required_confidence && best.map_or(true, |(_, d)| distance < d) {
                best = Some((entry, distance));
            }
        }

        match (best, best_any) {
            (Some((entry, distance)), _) => MatchVerdict::Match {
                entry,
                distance,
                confidence: score_confidence(distance),
            },
            (None, Some(best_confidence)) => MatchVerdict::BelowThreshold { best_confidence },
            (None, None) => MatchVerdict::NoCandidates,
        }
    }
}

/// Filter the roster to entries enrolled for the given session.
///
/// `"All"` (or an empty selection) passes every entry; otherwise an entry
/// qualifies when any of its shift labels equals the selection
/// case-insensitively. Entries without a descriptor never participate.
pub fn candidate_pool<'a>(roster: &'a [RosterEntry], shift: &str) -> Vec<&'a RosterEntry> {
    roster
        .iter()
        .filter(|e| e.descriptor.is_some())
        .filter(|e| {
            if shift.is_empty() || shift.eq_ignore_ascii_case(ALL_SHIFTS) {
                return true;
            }
            e.shifts.iter().any(|s| s.eq_ignore_ascii_case(shift))
        })
        .collect()
}
