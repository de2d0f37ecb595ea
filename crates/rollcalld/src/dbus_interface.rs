use zbus::interface;
use zbus::object_server::SignalEmitter;

use crate::driver::DriverHandle;

pub const DBUS_NAME: &str = "org.kiosk.Rollcall1";
pub const DBUS_PATH: &str = "/org/kiosk/Rollcall1";

/// D-Bus control interface for the attendance kiosk daemon.
///
/// Bus name: org.kiosk.Rollcall1
/// Object path: /org/kiosk/Rollcall1
pub struct RollcallService {
    driver: DriverHandle,
}

impl RollcallService {
    pub fn new(driver: DriverHandle) -> Self {
        Self { driver }
    }
}

#[interface(name = "org.kiosk.Rollcall1")]
impl RollcallService {
    /// Begin scanning for the given session/shift label ("Morning",
    /// "Afternoon", "Evening" or "All"). Reloads the roster and schedule
    /// snapshots, then starts the detection loop.
    async fn start(&self, shift: &str) -> zbus::fdo::Result<()> {
        tracing::info!(shift, "start requested");
        self.driver
            .start(shift)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Stop the detection loop, discarding all tracks and cooldown state.
    async fn stop(&self) -> zbus::fdo::Result<()> {
        tracing::info!("stop requested");
        self.driver
            .stop()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Return daemon status information as JSON.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self
            .driver
            .status()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "running": status.running,
            "shift": status.shift,
            "tracks": status.tracks,
            "roster": status.roster,
        })
        .to_string())
    }

    /// Return the current track snapshot as JSON.
    async fn snapshot(&self) -> zbus::fdo::Result<String> {
        self.driver
            .snapshot()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// A qualifying match was observed; a mark attempt is starting. May not
    /// be followed by `AttendanceCommitted` if the write fails.
    #[zbus(signal)]
    pub async fn candidate_observed(
        emitter: &SignalEmitter<'_>,
        payload: &str,
    ) -> zbus::Result<()>;

    /// An attendance record was durably written.
    #[zbus(signal)]
    pub async fn attendance_committed(
        emitter: &SignalEmitter<'_>,
        payload: &str,
    ) -> zbus::Result<()>;

    /// Full track snapshot, emitted after every tick.
    #[zbus(signal)]
    pub async fn snapshot_updated(emitter: &SignalEmitter<'_>, payload: &str)
        -> zbus::Result<()>;
}
