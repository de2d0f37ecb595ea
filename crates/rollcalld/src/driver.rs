//! Detection loop driver.
//!
//! A single tokio task owns the engine and ticks it on a fixed interval.
//! The detector call is awaited inline, so a new tick structurally cannot
//! start while one is outstanding; a hung detector is bounded by an
//! explicit timeout that counts as "no detections this tick". Attendance
//! writes are spawned as separate tasks and their outcomes drain back over
//! a channel, so the cooldown ledger and per-track write leases are already
//! in place for the very next tick even while a write is still in flight.

use std::time::Duration;

use chrono::Local;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use rollcall_core::events::Notification;
use rollcall_core::gate::{MarkCompletion, MarkOutcome, MarkRequest};
use rollcall_core::types::TrackSnapshot;
use rollcall_core::Engine;
use rollcall_store::{SqliteStore, StoreError};

use crate::dbus_interface::{RollcallService, DBUS_PATH};
use crate::detector::DetectionClient;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("driver task exited")]
    ChannelClosed,
}

pub struct DriverConfig {
    pub detection_interval_ms: u64,
    pub detector_timeout_ms: u64,
}

#[derive(Debug, Serialize)]
pub struct DriverStatus {
    pub running: bool,
    pub shift: String,
    pub tracks: usize,
    pub roster: usize,
}

/// Messages sent from D-Bus handlers to the driver task.
enum DriverCommand {
    Start {
        shift: String,
        reply: oneshot::Sender<Result<(), DriverError>>,
    },
    Stop {
        reply: oneshot::Sender<()>,
    },
    Status {
        reply: oneshot::Sender<DriverStatus>,
    },
    Snapshot {
        reply: oneshot::Sender<String>,
    },
}

/// Clone-safe handle to the driver task.
#[derive(Clone)]
pub struct DriverHandle {
    tx: mpsc::Sender<DriverCommand>,
}

impl DriverHandle {
    pub async fn start(&self, shift: &str) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Start { shift: shift.to_string(), reply: reply_tx })
            .await
            .map_err(|_| DriverError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DriverError::ChannelClosed)?
    }

    pub async fn stop(&self) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Stop { reply: reply_tx })
            .await
            .map_err(|_| DriverError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DriverError::ChannelClosed)
    }

    pub async fn status(&self) -> Result<DriverStatus, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Status { reply: reply_tx })
            .await
            .map_err(|_| DriverError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DriverError::ChannelClosed)
    }

    pub async fn snapshot(&self) -> Result<String, DriverError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(DriverCommand::Snapshot { reply: reply_tx })
            .await
            .map_err(|_| DriverError::ChannelClosed)?;
        reply_rx.await.map_err(|_| DriverError::ChannelClosed)
    }
}

/// Spawn the driver task and return a handle to it.
pub fn spawn_driver(
    engine: Engine,
    store: SqliteStore,
    detector: DetectionClient,
    cfg: DriverConfig,
    conn: zbus::Connection,
) -> DriverHandle {
    let (tx, rx) = mpsc::channel(8);
    tokio::spawn(run(engine, store, detector, cfg, conn, rx));
    DriverHandle { tx }
}

async fn run(
    mut engine: Engine,
    store: SqliteStore,
    detector: DetectionClient,
    cfg: DriverConfig,
    conn: zbus::Connection,
    mut rx: mpsc::Receiver<DriverCommand>,
) {
    tracing::info!(
        interval_ms = cfg.detection_interval_ms,
        timeout_ms = cfg.detector_timeout_ms,
        "driver task started"
    );

    let (done_tx, mut done_rx) = mpsc::unbounded_channel::<MarkCompletion>();
    let mut interval = tokio::time::interval(Duration::from_millis(cfg.detection_interval_ms));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut running = false;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(DriverCommand::Start { shift, reply }) => {
                    let result = start_session(&mut engine, &store, &shift).await;
                    if result.is_ok() {
                        running = true;
                        interval.reset();
                    }
                    let _ = reply.send(result);
                }
                Some(DriverCommand::Stop { reply }) => {
                    running = false;
                    // Outcomes of writes still in flight are dropped with
                    // the rest of the engine state; the store existence
                    // check covers anything that already committed.
                    while done_rx.try_recv().is_ok() {}
                    engine.reset();
                    let _ = reply.send(());
                }
                Some(DriverCommand::Status { reply }) => {
                    let _ = reply.send(DriverStatus {
                        running,
                        shift: engine.shift().to_string(),
                        tracks: engine.track_count(),
                        roster: engine.roster_len(),
                    });
                }
                Some(DriverCommand::Snapshot { reply }) => {
                    let json = serde_json::to_string(&engine.snapshot())
                        .unwrap_or_else(|_| "[]".to_string());
                    let _ = reply.send(json);
                }
                None => break,
            },
            _ = interval.tick(), if running => {
                run_tick(&mut engine, &store, &detector, &cfg, &conn, &done_tx, &mut done_rx)
                    .await;
            }
        }
    }

    tracing::info!("driver task exiting");
}

async fn start_session(
    engine: &mut Engine,
    store: &SqliteStore,
    shift: &str,
) -> Result<(), DriverError> {
    let roster = store.load_roster().await?;
    let schedules = store.load_schedules().await?;
    engine.set_session(shift, roster, schedules);
    Ok(())
}

async fn run_tick(
    engine: &mut Engine,
    store: &SqliteStore,
    detector: &DetectionClient,
    cfg: &DriverConfig,
    conn: &zbus::Connection,
    done_tx: &mpsc::UnboundedSender<MarkCompletion>,
    done_rx: &mut mpsc::UnboundedReceiver<MarkCompletion>,
) {
    // Apply every write outcome that landed since the previous tick, before
    // any track is processed.
    let now = Local::now().naive_local();
    while let Ok(completion) = done_rx.try_recv() {
        engine.apply_mark_outcome(completion, now);
    }

    let timeout = Duration::from_millis(cfg.detector_timeout_ms);
    let detections = match tokio::time::timeout(timeout, detector.detect()).await {
        Ok(Ok(detections)) => detections,
        Ok(Err(e)) => {
            // Transient failure: keep tracks unchanged, try again next tick.
            tracing::warn!(error = %e, "detector failed, tick skipped");
            return;
        }
        Err(_) => {
            tracing::warn!(
                timeout_ms = cfg.detector_timeout_ms,
                "detector timed out, treating as no detections"
            );
            Vec::new()
        }
    };

    let now = Local::now().naive_local();
    let report = engine.tick(now, detections);

    for request in report.mark_requests {
        let store = store.clone();
        let done = done_tx.clone();
        tokio::spawn(async move {
            let outcome = execute_mark(&store, &request).await;
            let _ = done.send(MarkCompletion {
                track_id: request.track_id,
                key: request.key,
                student_name: request.record.student_name,
                outcome,
            });
        });
    }

    publish(conn, &report.notifications, &report.snapshot).await;
}

/// Run the existence check, then the insert, for one admitted mark.
async fn execute_mark(store: &SqliteStore, request: &MarkRequest) -> MarkOutcome {
    match store
        .attendance_exists(&request.key.student_id, request.key.date, &request.key.shift)
        .await
    {
        Ok(true) => MarkOutcome::Duplicate,
        Ok(false) => match store.insert_attendance(&request.record).await {
            Ok(()) => MarkOutcome::Committed { status: request.record.status },
            Err(StoreError::Duplicate) => MarkOutcome::Duplicate,
            Err(e) => MarkOutcome::Failed { message: e.to_string() },
        },
        Err(e) => MarkOutcome::Failed { message: e.to_string() },
    }
}

/// Emit notifications and the track snapshot as D-Bus signals.
async fn publish(
    conn: &zbus::Connection,
    notifications: &[Notification],
    snapshot: &[TrackSnapshot],
) {
    let iface = match conn
        .object_server()
        .interface::<_, RollcallService>(DBUS_PATH)
        .await
    {
        Ok(iface) => iface,
        Err(e) => {
            tracing::debug!(error = %e, "control interface not registered, skipping signals");
            return;
        }
    };
    let emitter = iface.signal_emitter();

    for notification in notifications {
        let payload = match serde_json::to_string(notification) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(error = %e, "notification serialization failed");
                continue;
            }
        };
        let result = match notification {
            Notification::CandidateObserved { .. } => {
                RollcallService::candidate_observed(emitter, &payload).await
            }
            Notification::AttendanceCommitted { .. } => {
                RollcallService::attendance_committed(emitter, &payload).await
            }
        };
        if let Err(e) = result {
            tracing::warn!(error = %e, event = notification.name(), "signal emission failed");
        }
    }

    match serde_json::to_string(snapshot) {
        Ok(json) => {
            if let Err(e) = RollcallService::snapshot_updated(emitter, &json).await {
                tracing::warn!(error = %e, "snapshot signal emission failed");
            }
        }
        Err(e) => tracing::warn!(error = %e, "snapshot serialization failed"),
    }
}
