//! Temporal smoother: sliding-window majority vote over per-track
//! identity matches.
//!
//! A single frame never decides who a track is. Votes accumulate in a
//! bounded ring; a named identity wins only by holding a strict
//! majority of the whole window, Unknown votes included in the
//! denominator. A resolved identity may flip to a different employee
//! no faster than once per window refill.

use std::collections::VecDeque;

use crate::types::{EmployeeId, Identity};

#[derive(Debug, Clone)]
pub struct SmootherConfig {
    /// Window capacity K, the number of most recent votes retained.
    pub window: usize,
    /// Fraction of the window a label must strictly exceed to win.
    pub min_fraction: f32,
}

impl Default for SmootherConfig {
    fn default() -> Self {
        Self { window: 5, min_fraction: 0.5 }
    }
}

/// Bounded ring of identity votes for one track.
#[derive(Debug, Clone)]
pub struct VoteWindow {
    config: SmootherConfig,
    votes: VecDeque<(Identity, f32)>,
    resolved: Option<EmployeeId>,
    /// Last employee the window resolved to, surviving unresolved gaps.
    last_named: Option<EmployeeId>,
    /// Votes cast since the window last switched to a named employee.
    votes_since_switch: usize,
}

impl VoteWindow {
    pub fn new(config: SmootherConfig) -> Self {
        let capacity = config.window;
        Self {
            config,
            votes: VecDeque::with_capacity(capacity),
            resolved: None,
            last_named: None,
            votes_since_switch: 0,
        }
    }

    /// Append a vote and return the stabilized identity, if any.
    ///
    /// `Unknown` votes dilute every candidate but never elect one.
    pub fn vote(&mut self, identity: Identity, confidence: f32) -> Option<EmployeeId> {
        if self.votes.len() == self.config.window {
            self.votes.pop_front();
        }
        self.votes.push_back((identity, confidence));
        self.votes_since_switch += 1;

        match self.majority() {
            Some(next) => {
                if self.resolved == Some(next) {
                    // Majority confirms the current resolution.
                } else if self.may_switch_to(next) {
                    self.resolved = Some(next);
                    self.last_named = Some(next);
                    self.votes_since_switch = 0;
                }
                // Otherwise the switch is rate-limited: hold the
                // current resolution (possibly unresolved).
            }
            None => self.resolved = None,
        }
        self.resolved
    }

    /// Current stabilized identity without casting a vote.
    pub fn resolved(&self) -> Option<EmployeeId> {
        self.resolved
    }

    /// Mean confidence of the resolved employee's votes in the window.
    pub fn confidence(&self) -> f32 {
        let Some(winner) = self.resolved else { return 0.0 };
        let mut sum = 0.0f32;
        let mut count = 0usize;
        for (identity, conf) in &self.votes {
            if identity.employee() == Some(winner) {
                sum += conf;
                count += 1;
            }
        }
        if count == 0 { 0.0 } else { sum / count as f32 }
    }

    /// A switch to a *different* employee than the last resolution is
    /// permitted only after a full window of fresh votes.
    fn may_switch_to(&self, next: EmployeeId) -> bool {
        match self.last_named {
            None => true,
            Some(prev) if prev == next => true,
            Some(_) => self.votes_since_switch >= self.config.window,
        }
    }

    /// Majority label strictly exceeding `min_fraction` of the whole
    /// window, ties to the lowest employee id.
    fn majority(&self) -> Option<EmployeeId> {
        let len = self.votes.len();
        if len == 0 {
            return None;
        }

        let mut counts: Vec<(EmployeeId, usize)> = Vec::new();
        for (identity, _) in &self.votes {
            if let Some(id) = identity.employee() {
                match counts.iter_mut().find(|(e, _)| *e == id) {
                    Some((_, n)) => *n += 1,
                    None => counts.push((id, 1)),
                }
            }
        }

        let mut best: Option<(EmployeeId, usize)> = None;
        for (id, n) in counts {
            let better = match best {
                None => true,
                Some((bid, bn)) => n > bn || (n == bn && id < bid),
            };
            if better {
                best = Some((id, n));
            }
        }

        let (id, n) = best?;
        if (n as f32) > self.config.min_fraction * len as f32 {
            Some(id)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(k: usize) -> VoteWindow {
        VoteWindow::new(SmootherConfig { window: k, min_fraction: 0.5 })
    }

    fn emp(id: i64) -> Identity {
        Identity::Employee(EmployeeId(id))
    }

    #[test]
    fn single_confident_vote_resolves_fresh_window() {
        // 1 of 1 votes = 100% of the current window contents: the
        // minority-rejection bar is over what the window holds so far.
        let mut w = window(5);
        assert_eq!(w.vote(emp(1), 0.9), Some(EmployeeId(1)));
    }

    #[test]
    fn unknown_votes_dilute_but_never_elect() {
        let mut w = window(5);
        w.vote(Identity::Unknown, 0.0);
        w.vote(Identity::Unknown, 0.0);
        // 1 named vote of 3 total: 33%, below the bar.
        assert_eq!(w.vote(emp(1), 0.9), None);
        // 2 of 4 = 50%: not *strictly* above the bar.
        assert_eq!(w.vote(emp(1), 0.9), None);
        // 3 of 5 = 60%: resolved.
        assert_eq!(w.vote(emp(1), 0.9), Some(EmployeeId(1)));
    }

    #[test]
    fn single_dissent_never_flips_unanimous_window() {
        let mut w = window(5);
        for _ in 0..5 {
            w.vote(emp(1), 0.8);
        }
        assert_eq!(w.resolved(), Some(EmployeeId(1)));
        // One dissenting vote: window is 4x E1 + 1x E2, E1 holds.
        assert_eq!(w.vote(emp(2), 0.99), Some(EmployeeId(1)));
    }

    #[test]
    fn identity_reassigns_as_evidence_shifts() {
        let mut w = window(5);
        for _ in 0..5 {
            w.vote(emp(1), 0.8);
        }
        assert_eq!(w.resolved(), Some(EmployeeId(1)));
        let mut last = None;
        for _ in 0..5 {
            last = w.vote(emp(2), 0.9);
        }
        assert_eq!(last, Some(EmployeeId(2)));
    }

    #[test]
    fn reresolution_waits_for_window_refill() {
        let mut w = window(4);
        // E1 resolves on the first vote; the switch counter starts there.
        assert_eq!(w.vote(emp(1), 0.8), Some(EmployeeId(1)));

        // E2 floods in. Majority shifts to E2 by the third E2 vote, but
        // fewer than K=4 votes have passed since the E1 resolution, so
        // the window must not rebind yet.
        assert_eq!(w.vote(emp(2), 0.9), None, "50/50 collapses resolution");
        assert_eq!(w.vote(emp(2), 0.9), None, "E2 majority, switch gated");
        assert_eq!(w.vote(emp(2), 0.9), None, "E2 majority, switch gated");
        // Fourth vote since the E1 resolution: switch permitted.
        assert_eq!(w.vote(emp(2), 0.9), Some(EmployeeId(2)));
    }

    #[test]
    fn majority_collapse_unresolves() {
        let mut w = window(4);
        for _ in 0..4 {
            w.vote(emp(1), 0.8);
        }
        for _ in 0..2 {
            w.vote(Identity::Unknown, 0.0);
        }
        // Window: 2x E1, 2x Unknown. 50% is not strictly above the bar.
        assert_eq!(w.resolved(), None);
    }

    #[test]
    fn confidence_averages_winning_votes() {
        let mut w = window(5);
        w.vote(emp(1), 0.6);
        w.vote(emp(1), 0.8);
        w.vote(Identity::Unknown, 0.0);
        assert_eq!(w.resolved(), Some(EmployeeId(1)));
        assert!((w.confidence() - 0.7).abs() < 1e-6);
    }

    #[test]
    fn exact_count_tie_breaks_to_lowest_employee_id() {
        let mut w = VoteWindow::new(SmootherConfig { window: 4, min_fraction: 0.4 });
        w.vote(emp(9), 0.8);
        w.vote(emp(9), 0.8);
        w.vote(emp(2), 0.8);
        w.vote(emp(2), 0.8);
        // 2x E9 vs 2x E2, both at 50% > 40%: the majority computation
        // must pick the lowest id deterministically.
        assert_eq!(w.majority(), Some(EmployeeId(2)));
    }
}
