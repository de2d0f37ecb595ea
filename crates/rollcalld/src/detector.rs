//! Client for the external face-detection service.
//!
//! The detection capability owns the camera and the models; one `Detect`
//! call captures the current frame and returns its detections as JSON:
//! `[{"box": {"x": .., "y": .., "width": .., "height": ..},
//!    "descriptor": [..] | null}, ..]`.

use rollcall_core::types::Detection;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DetectorError {
    #[error("detection service: {0}")]
    Bus(#[from] zbus::Error),
    #[error("malformed detection payload: {0}")]
    Payload(#[from] serde_json::Error),
}

#[zbus::proxy(
    interface = "org.kiosk.FaceDetect1",
    default_service = "org.kiosk.FaceDetect1",
    default_path = "/org/kiosk/FaceDetect1"
)]
trait FaceDetect {
    /// Capture one frame and detect faces in it.
    async fn detect(&self) -> zbus::Result<String>;
}

/// Thin wrapper over the D-Bus proxy that decodes the wire payload.
pub struct DetectionClient {
    proxy: FaceDetectProxy<'static>,
}

impl DetectionClient {
    pub async fn connect(conn: &zbus::Connection) -> Result<Self, DetectorError> {
        Ok(Self { proxy: FaceDetectProxy::new(conn).await? })
    }

    /// One frame-capture-and-detect round trip.
    pub async fn detect(&self) -> Result<Vec<Detection>, DetectorError> {
        let payload = self.proxy.detect().await?;
        let detections: Vec<Detection> = serde_json::from_str(&payload)?;
        tracing::debug!(count = detections.len(), "detections received");
        Ok(detections)
    }
}
