//! Size/distance filter — rejects detections whose face size falls outside
//! the operator-configured pixel range. Size approximates distance from the
//! kiosk: too small is too far away, too large is pressed against the lens.

use crate::types::Detection;

/// Keep detections whose `max(width, height)` lies in `[min_size, max_size]`.
///
/// An empty result is valid and simply yields no new tracks this tick.
pub fn by_size(detections: Vec<Detection>, min_size: f32, max_size: f32) -> Vec<Detection> {
    detections
        .into_iter()
        .filter(|d| {
            let size = d.bbox.size();
            let ok = size >= min_size && size <= max_size;
            if !ok {
                tracing::debug!(size, min_size, max_size, "detection outside size range");
            }
            ok
        })
        .collect()
}
