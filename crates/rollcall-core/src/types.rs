use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

/// Face descriptor vector (fixed-length, typically 128- or 512-dimensional).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Compute Euclidean distance to another descriptor.
    ///
    /// Descriptors are assumed comparable (same model, same length); extra
    /// dimensions on either side are ignored.
    pub fn euclidean_distance(&self, other: &Descriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

/// Axis-aligned bounding box for a detected face, in frame pixels.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    /// Box centroid.
    pub fn centroid(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    /// Euclidean distance between the centroids of two boxes.
    pub fn centroid_distance(&self, other: &BoundingBox) -> f32 {
        let (ax, ay) = self.centroid();
        let (bx, by) = other.centroid();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    /// Face size used for the distance approximation: the larger side.
    pub fn size(&self) -> f32 {
        self.width.max(self.height)
    }
}

/// One raw detection from the external face-detection capability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub descriptor: Option<Descriptor>,
}

/// An enrolled roster entry. Read-only to the engine; only entries with a
/// descriptor participate in matching.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RosterEntry {
    pub id: String,
    pub full_name: String,
    /// Session/shift labels this entry belongs to. A stored comma-separated
    /// label expands to multiple entries here; matching is case-insensitive.
    pub shifts: Vec<String>,
    pub class_name: Option<String>,
    pub descriptor: Option<Descriptor>,
    pub grace_period_minutes: Option<u32>,
}

/// Final classification of a committed attendance mark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl std::fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttendanceStatus::Present => write!(f, "present"),
            AttendanceStatus::Late => write!(f, "late"),
        }
    }
}

/// A durable attendance record, written exactly once per (student, session,
/// date) by the attendance gate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub student_id: String,
    pub student_name: String,
    pub date: NaiveDate,
    pub time_in: NaiveDateTime,
    pub status: AttendanceStatus,
    pub shift: String,
    /// Cutoff used for the late decision, formatted for display ("08:15 AM").
    pub cutoff_time: String,
    pub method: String,
}

/// Per-track view published after every tick for rendering. Purely
/// informational; no acknowledgement expected.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSnapshot {
    pub id: String,
    #[serde(rename = "box")]
    pub bbox: BoundingBox,
    pub status: &'static str,
    pub name: Option<String>,
    pub confidence: Option<f32>,
    pub attendance: Option<&'static str>,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Descriptor::new(vec![1.0, 0.0, 0.0]);
        let b = Descriptor::new(vec![1.0, 0.0, 0.0]);
        assert!(a.euclidean_distance(&b).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_unit_axes() {
        let a = Descriptor::new(vec![1.0, 0.0]);
        let b = Descriptor::new(vec![0.0, 1.0]);
        assert!((a.euclidean_distance(&b) - 2.0f32.sqrt()).abs() < 1e-6);
    }

    #[test]
    fn test_centroid() {
        let b = BoundingBox { x: 10.0, y: 20.0, width: 100.0, height: 50.0 };
        assert_eq!(b.centroid(), (60.0, 45.0));
    }

    #[test]
    fn test_centroid_distance() {
        let a = BoundingBox { x: 0.0, y: 0.0, width: 10.0, height: 10.0 };
        let b = BoundingBox { x: 30.0, y: 40.0, width: 10.0, height: 10.0 };
        assert!((a.centroid_distance(&b) - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_size_is_larger_side() {
        let b = BoundingBox { x: 0.0, y: 0.0, width: 90.0, height: 120.0 };
        assert_eq!(b.size(), 120.0);
    }
}
