//! Employee presence and daily attendance.
//!
//! All cameras funnel stabilized sightings into one actor task that
//! owns every employee's state, so two cameras seeing the same person
//! concurrently can never race on a presence row. Absence detection
//! runs on a sweep timer over stored timestamps, so it keeps working
//! when frames stall.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Local, NaiveDate, TimeZone, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use vigil_core::EmployeeId;

use crate::alerts::{AlertEngine, EventGate};
use crate::store::{Employee, StoreWriter, WriteOp};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PresenceStatus {
    Off,
    Available,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Off => "off",
            PresenceStatus::Available => "available",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PresenceConfig {
    /// No stabilized sighting for this long while Available → Off.
    pub absence_timeout: Duration,
    /// Continuously Off for this long → absence alert.
    pub alert_after: Duration,
    /// Minimum spacing of repeated same-state event rows.
    pub event_interval: Duration,
}

/// A stabilized sighting forwarded by a camera pipeline.
#[derive(Debug, Clone)]
pub struct Sighting {
    pub employee: EmployeeId,
    pub camera_id: i64,
    /// Timestamp of the frame that confirmed the sighting.
    pub at: DateTime<Utc>,
    /// When the underlying track first appeared. An Off→Available
    /// transition is backdated to this: the person was standing
    /// there while the vote window filled.
    pub track_started: DateTime<Utc>,
    pub confidence: f32,
}

#[derive(Debug, Clone, Serialize)]
pub struct PresenceView {
    pub employee: EmployeeId,
    pub name: String,
    pub status: PresenceStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub last_transition: Option<DateTime<Utc>>,
    pub alert_open: bool,
}

struct EmployeeState {
    name: String,
    status: PresenceStatus,
    last_seen: Option<DateTime<Utc>>,
    last_transition: Option<DateTime<Utc>>,
}

/// Owns all per-employee presence state. Driven by the actor loop;
/// every method returns the durable writes it decided on so the loop
/// can hand them to the store worker.
pub struct PresenceBoard {
    config: PresenceConfig,
    employees: HashMap<EmployeeId, EmployeeState>,
    alerts: AlertEngine,
    events: EventGate,
}

impl PresenceBoard {
    pub fn new(config: PresenceConfig, roster: &[Employee]) -> Self {
        let mut employees = HashMap::new();
        for employee in roster {
            employees.insert(
                employee.id,
                EmployeeState {
                    name: employee.name.clone(),
                    status: PresenceStatus::Off,
                    last_seen: None,
                    last_transition: None,
                },
            );
        }
        Self {
            alerts: AlertEngine::new(config.alert_after),
            events: EventGate::new(config.event_interval),
            config,
            employees,
        }
    }

    pub fn sighting(&mut self, s: &Sighting) -> Vec<WriteOp> {
        let Some(state) = self.employees.get_mut(&s.employee) else {
            tracing::warn!(employee = %s.employee, "sighting for unregistered employee");
            return Vec::new();
        };

        let mut ops = Vec::new();
        let last_seen = state.last_seen.map_or(s.at, |prev| prev.max(s.at));
        state.last_seen = Some(last_seen);

        match state.status {
            PresenceStatus::Off => {
                // A track that resolves its identity late may predate
                // the previous transition; the backdate never reaches
                // past it.
                let since = match state.last_transition {
                    Some(prev) => s.track_started.max(prev),
                    None => s.track_started,
                };
                state.status = PresenceStatus::Available;
                state.last_transition = Some(since);
                tracing::info!(
                    employee = %s.employee,
                    camera = s.camera_id,
                    since = %since,
                    confidence = s.confidence,
                    "employee available"
                );

                let day = since.with_timezone(&Local).date_naive();
                ops.push(WriteOp::AttendanceFirstIn {
                    employee: s.employee,
                    day,
                    at: since,
                });
                ops.push(WriteOp::Presence {
                    employee: s.employee,
                    status: PresenceStatus::Available,
                    last_seen,
                    transition_at: since,
                });
                self.events.permit(s.employee, s.at, true);
                ops.push(WriteOp::Event {
                    employee: s.employee,
                    status: PresenceStatus::Available,
                    at: since,
                });
                ops.push(self.alerts.on_available(s.employee, s.at));
            }
            PresenceStatus::Available => {
                // Steady state: refresh, rate-limited.
                if self.events.permit(s.employee, s.at, false) {
                    ops.push(WriteOp::Presence {
                        employee: s.employee,
                        status: PresenceStatus::Available,
                        last_seen,
                        transition_at: state.last_transition.unwrap_or(s.at),
                    });
                    ops.push(WriteOp::Event {
                        employee: s.employee,
                        status: PresenceStatus::Available,
                        at: s.at,
                    });
                }
            }
        }
        ops
    }

    /// Timer-driven absence detection. Operates purely on stored
    /// timestamps; a stalled pipeline delays sightings, not this.
    pub fn sweep(&mut self, now: DateTime<Utc>) -> Vec<WriteOp> {
        let mut ops = Vec::new();

        for (&employee, state) in self.employees.iter_mut() {
            let Some(last_seen) = state.last_seen else { continue };

            if state.status == PresenceStatus::Available
                && now - last_seen > self.config.absence_timeout
            {
                state.status = PresenceStatus::Off;
                let session_start = state.last_transition.unwrap_or(last_seen);
                state.last_transition = Some(last_seen);
                tracing::info!(
                    employee = %employee,
                    last_seen = %last_seen,
                    "employee off"
                );

                // last_out is the last confirmed sighting, not the
                // moment the sweep noticed. A session that crossed
                // midnight closes each earlier day at its local end
                // and opens the next day's row at midnight.
                let final_day = last_seen.with_timezone(&Local).date_naive();
                let mut day = session_start.with_timezone(&Local).date_naive();
                while day < final_day {
                    let Some((next, midnight)) = day
                        .succ_opt()
                        .and_then(|next| Some((next, start_of_local_day(next)?)))
                    else {
                        break;
                    };
                    ops.push(WriteOp::AttendanceLastOut {
                        employee,
                        day,
                        at: midnight - Duration::seconds(1),
                    });
                    ops.push(WriteOp::AttendanceFirstIn { employee, day: next, at: midnight });
                    day = next;
                }
                ops.push(WriteOp::AttendanceLastOut { employee, day: final_day, at: last_seen });
                ops.push(WriteOp::Presence {
                    employee,
                    status: PresenceStatus::Off,
                    last_seen,
                    transition_at: last_seen,
                });
                self.events.permit(employee, now, true);
                ops.push(WriteOp::Event {
                    employee,
                    status: PresenceStatus::Off,
                    at: last_seen,
                });
            }

            if state.status == PresenceStatus::Off {
                if let Some(op) = self.alerts.check_absent(employee, last_seen, now) {
                    ops.push(op);
                }
            }
        }
        ops
    }

    pub fn snapshot(&self) -> Vec<PresenceView> {
        let mut views: Vec<PresenceView> = self
            .employees
            .iter()
            .map(|(&employee, state)| PresenceView {
                employee,
                name: state.name.clone(),
                status: state.status,
                last_seen: state.last_seen,
                last_transition: state.last_transition,
                alert_open: self.alerts.is_open(employee),
            })
            .collect();
        views.sort_by_key(|v| v.employee);
        views
    }
}

/// Local midnight opening `day`, in Utc. None only when the local
/// offset skips midnight that day.
fn start_of_local_day(day: NaiveDate) -> Option<DateTime<Utc>> {
    Local
        .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
        .earliest()
        .map(|t| t.with_timezone(&Utc))
}

enum PresenceMsg {
    Sighting(Sighting),
    Snapshot { reply: oneshot::Sender<Vec<PresenceView>> },
}

/// Clone-safe handle to the presence actor.
#[derive(Clone)]
pub struct PresenceHandle {
    tx: mpsc::Sender<PresenceMsg>,
}

impl PresenceHandle {
    pub async fn sighting(&self, sighting: Sighting) {
        if self.tx.send(PresenceMsg::Sighting(sighting)).await.is_err() {
            tracing::warn!("presence actor gone; sighting dropped");
        }
    }

    pub async fn snapshot(&self) -> Vec<PresenceView> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.tx.send(PresenceMsg::Snapshot { reply: reply_tx }).await.is_err() {
            return Vec::new();
        }
        reply_rx.await.unwrap_or_default()
    }
}

/// Spawn the presence actor: single consumer of all sightings plus
/// the absence sweep timer.
pub fn spawn_presence_actor(
    mut board: PresenceBoard,
    writer: StoreWriter,
    sweep_interval: std::time::Duration,
) -> (PresenceHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PresenceMsg>(64);

    let handle = tokio::spawn(async move {
        // First sweep one full interval in; nothing can be absent at startup.
        let start = tokio::time::Instant::now() + sweep_interval;
        let mut sweep = tokio::time::interval_at(start, sweep_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                msg = rx.recv() => match msg {
                    Some(PresenceMsg::Sighting(sighting)) => {
                        for op in board.sighting(&sighting) {
                            writer.enqueue(op);
                        }
                    }
                    Some(PresenceMsg::Snapshot { reply }) => {
                        let _ = reply.send(board.snapshot());
                    }
                    None => {
                        tracing::info!("presence actor exiting");
                        return;
                    }
                },
                _ = sweep.tick() => {
                    for op in board.sweep(Utc::now()) {
                        writer.enqueue(op);
                    }
                }
            }
        }
    });

    (PresenceHandle { tx }, handle)
}
