//! Absence alerts and event-rate control.
//!
//! The alert engine watches presence transitions from inside the
//! presence actor; the event gate bounds storage growth by throttling
//! repeated same-state event rows.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Duration, Utc};
use vigil_core::EmployeeId;

use crate::store::WriteOp;

pub const REASON_ABSENCE: &str = "absence";

/// Opens an alert after continuous absence, resolves it on return.
/// At most one open alert per employee; the SQL guard enforces the
/// same invariant across daemon restarts.
pub struct AlertEngine {
    alert_after: Duration,
    open: HashSet<EmployeeId>,
}

impl AlertEngine {
    pub fn new(alert_after: Duration) -> Self {
        Self { alert_after, open: HashSet::new() }
    }

    /// Sweep-side check for an employee currently Off.
    ///
    /// `last_seen` is the last confirmed sighting; the alert opens at
    /// `last_seen + alert_after`, not at the sweep tick that noticed.
    pub fn check_absent(
        &mut self,
        employee: EmployeeId,
        last_seen: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Option<WriteOp> {
        if now - last_seen <= self.alert_after || self.open.contains(&employee) {
            return None;
        }
        self.open.insert(employee);
        let opened_at = last_seen + self.alert_after;
        tracing::warn!(employee = %employee, opened_at = %opened_at, "absence alert opened");
        Some(WriteOp::AlertOpen {
            employee,
            opened_at,
            reason: REASON_ABSENCE.to_string(),
        })
    }

    /// Off→Available transition. Resolution is emitted even when no
    /// alert is tracked in memory; after a restart the open row may
    /// exist only in the database, and the UPDATE is a no-op otherwise.
    pub fn on_available(&mut self, employee: EmployeeId, at: DateTime<Utc>) -> WriteOp {
        if self.open.remove(&employee) {
            tracing::info!(employee = %employee, resolved_at = %at, "absence alert resolved");
        }
        WriteOp::AlertResolve { employee, resolved_at: at }
    }

    pub fn is_open(&self, employee: EmployeeId) -> bool {
        self.open.contains(&employee)
    }
}

/// Per-employee throttle on event rows.
///
/// Transitions always pass and reset the clock; steady-state
/// observations pass at most once per interval.
pub struct EventGate {
    min_interval: Duration,
    last: HashMap<EmployeeId, DateTime<Utc>>,
}

impl EventGate {
    pub fn new(min_interval: Duration) -> Self {
        Self { min_interval, last: HashMap::new() }
    }

    pub fn permit(&mut self, employee: EmployeeId, at: DateTime<Utc>, transition: bool) -> bool {
        if !transition {
            if let Some(last) = self.last.get(&employee) {
                if at - *last < self.min_interval {
                    return false;
                }
            }
        }
        self.last.insert(employee, at);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap() + Duration::seconds(secs)
    }

    const E1: EmployeeId = EmployeeId(1);

    #[test]
    fn alert_opens_after_threshold_exactly_once() {
        let mut engine = AlertEngine::new(Duration::seconds(60));

        // 60 s absent is not *longer than* the threshold.
        assert!(engine.check_absent(E1, t(0), t(60)).is_none());

        let op = engine.check_absent(E1, t(0), t(61)).expect("alert at 61 s");
        match op {
            WriteOp::AlertOpen { opened_at, ref reason, .. } => {
                assert_eq!(opened_at, t(60), "backdated to last_seen + threshold");
                assert_eq!(reason, REASON_ABSENCE);
            }
            other => panic!("unexpected op: {other:?}"),
        }

        // Subsequent sweeps observe the same absence: no duplicate.
        assert!(engine.check_absent(E1, t(0), t(90)).is_none());
        assert!(engine.is_open(E1));
    }

    #[test]
    fn return_resolves_and_rearms() {
        let mut engine = AlertEngine::new(Duration::seconds(60));
        engine.check_absent(E1, t(0), t(61)).unwrap();

        let op = engine.on_available(E1, t(65));
        assert!(matches!(op, WriteOp::AlertResolve { resolved_at, .. } if resolved_at == t(65)));
        assert!(!engine.is_open(E1));

        // A fresh absence can open again.
        assert!(engine.check_absent(E1, t(65), t(130)).is_some());
    }

    #[test]
    fn short_absence_never_alerts() {
        let mut engine = AlertEngine::new(Duration::seconds(60));
        assert!(engine.check_absent(E1, t(0), t(59)).is_none());
        assert!(!engine.is_open(E1));
    }

    #[test]
    fn gate_throttles_steady_state() {
        let mut gate = EventGate::new(Duration::seconds(300));

        assert!(gate.permit(E1, t(0), true), "transition always passes");
        assert!(!gate.permit(E1, t(10), false));
        assert!(!gate.permit(E1, t(299), false));
        assert!(gate.permit(E1, t(300), false), "interval elapsed");
        assert!(!gate.permit(E1, t(301), false), "clock reset by re-emission");
    }

    #[test]
    fn gate_transition_resets_clock() {
        let mut gate = EventGate::new(Duration::seconds(300));
        assert!(gate.permit(E1, t(0), false));
        assert!(gate.permit(E1, t(5), true));
        assert!(!gate.permit(E1, t(304), false), "interval counts from the transition");
    }

    #[test]
    fn gate_is_per_employee() {
        let mut gate = EventGate::new(Duration::seconds(300));
        assert!(gate.permit(EmployeeId(1), t(0), false));
        assert!(gate.permit(EmployeeId(2), t(1), false));
    }
}
