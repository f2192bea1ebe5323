//! Per-camera track association and lifecycle.
//!
//! Greedy IOU matching: sort candidate pairs by descending overlap and
//! take them first-come. Deliberately not a globally optimal
//! assignment: at ≤15 fps face densities, ambiguous overlaps are
//! rare and the O(n·m log nm) greedy pass is plenty. The pairing step
//! is the free function [`associate`] so an optimal solver can replace
//! it without touching track lifecycle.

use chrono::{DateTime, Utc};

use crate::smoother::{SmootherConfig, VoteWindow};
use crate::types::{BoundingBox, EmployeeId, Identity};

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Minimum IOU for a detection to associate with a track.
    pub min_iou: f32,
    /// Consecutive hits required to promote Tentative → Active.
    pub confirm_hits: u32,
    /// Frames unseen before a track goes Lost.
    pub lost_after: u32,
    /// Seconds unseen before a Lost track is removed outright.
    pub remove_after_secs: f32,
    pub smoother: SmootherConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            confirm_hits: 3,
            lost_after: 15,
            remove_after_secs: 5.0,
            smoother: SmootherConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    Tentative,
    Active,
    Lost,
}

/// One face's spatial continuity within a single camera.
#[derive(Debug, Clone)]
pub struct Track {
    pub id: u64,
    pub bbox: BoundingBox,
    pub state: TrackState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    votes: VoteWindow,
    /// Consecutive associations since the last miss.
    streak: u32,
    /// Frames since the last association.
    misses: u32,
    /// Set once the track has ever been Active; re-association of a
    /// Lost confirmed track restores Active rather than Tentative.
    confirmed: bool,
}

impl Track {
    pub fn stabilized(&self) -> Option<EmployeeId> {
        self.votes.resolved()
    }

    pub fn confidence(&self) -> f32 {
        self.votes.confidence()
    }
}

/// Per-frame input to the tracker: a quality-gated, identity-matched
/// detection. `vote` is `Unknown` when the quality gate rejected the
/// detection or no template cleared the threshold.
#[derive(Debug, Clone)]
pub struct Observation {
    pub bbox: BoundingBox,
    pub vote: Identity,
    pub confidence: f32,
}

/// Outcome of one frame for one surviving track.
#[derive(Debug, Clone)]
pub struct TrackUpdate {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub state: TrackState,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub stabilized: Option<EmployeeId>,
    pub confidence: f32,
}

/// Greedy IOU pairing between track boxes and detection boxes.
///
/// Returns `(track_index, observation_index)` pairs. Candidates above
/// `min_iou` are taken in descending-IOU order; exact IOU ties go to
/// the earliest-created (lowest-index) track, then lowest detection
/// index. Each track and each observation is used at most once.
pub fn associate(
    tracks: &[BoundingBox],
    observations: &[BoundingBox],
    min_iou: f32,
) -> Vec<(usize, usize)> {
    let mut candidates: Vec<(f32, usize, usize)> = Vec::new();
    for (ti, tb) in tracks.iter().enumerate() {
        for (oi, ob) in observations.iter().enumerate() {
            let iou = tb.iou(ob);
            if iou >= min_iou {
                candidates.push((iou, ti, oi));
            }
        }
    }
    candidates.sort_by(|a, b| {
        b.0.partial_cmp(&a.0)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then(a.1.cmp(&b.1))
            .then(a.2.cmp(&b.2))
    });

    let mut track_taken = vec![false; tracks.len()];
    let mut obs_taken = vec![false; observations.len()];
    let mut pairs = Vec::new();
    for (_, ti, oi) in candidates {
        if track_taken[ti] || obs_taken[oi] {
            continue;
        }
        track_taken[ti] = true;
        obs_taken[oi] = true;
        pairs.push((ti, oi));
    }
    pairs
}

/// Per-camera tracker. Owns its tracks exclusively; never shared
/// across cameras.
pub struct Tracker {
    camera_id: i64,
    config: TrackerConfig,
    tracks: Vec<Track>,
    next_id: u64,
}

impl Tracker {
    pub fn new(camera_id: i64, config: TrackerConfig) -> Self {
        Self { camera_id, config, tracks: Vec::new(), next_id: 1 }
    }

    pub fn camera_id(&self) -> i64 {
        self.camera_id
    }

    /// Process one frame of observations.
    ///
    /// Associates, ages out the unseen, spawns Tentative tracks for
    /// the unmatched, and feeds every matched observation's identity
    /// vote into its track's window. Returns an update per surviving
    /// track, in track-id order.
    pub fn observe(&mut self, observations: &[Observation], now: DateTime<Utc>) -> Vec<TrackUpdate> {
        let track_boxes: Vec<BoundingBox> = self.tracks.iter().map(|t| t.bbox).collect();
        let obs_boxes: Vec<BoundingBox> = observations.iter().map(|o| o.bbox).collect();
        let pairs = associate(&track_boxes, &obs_boxes, self.config.min_iou);

        let mut track_hit = vec![false; self.tracks.len()];
        let mut obs_matched = vec![false; observations.len()];

        for (ti, oi) in pairs {
            track_hit[ti] = true;
            obs_matched[oi] = true;
            self.hit(ti, &observations[oi], now);
        }

        // Age unmatched tracks; remove the long-gone (back to front so
        // indices stay valid).
        for i in (0..self.tracks.len()).rev() {
            if track_hit[i] {
                continue;
            }
            self.miss(i, now);
            let track = &self.tracks[i];
            let unseen = (now - track.last_seen).num_milliseconds() as f32 / 1000.0;
            if track.state == TrackState::Lost && unseen > self.config.remove_after_secs {
                tracing::debug!(
                    camera = self.camera_id,
                    track = track.id,
                    unseen_secs = unseen,
                    "track removed"
                );
                self.tracks.remove(i);
            }
        }

        // Unmatched observations spawn fresh Tentative tracks.
        for (oi, obs) in observations.iter().enumerate() {
            if !obs_matched[oi] {
                self.spawn(obs, now);
            }
        }

        self.tracks.sort_by_key(|t| t.id);
        self.tracks.iter().map(update_of).collect()
    }

    /// Retire every track deterministically; called when the camera
    /// stream stops. Active tracks pass through Lost; nothing leaks.
    pub fn flush(&mut self) -> Vec<TrackUpdate> {
        for track in &mut self.tracks {
            if track.state != TrackState::Lost {
                tracing::debug!(
                    camera = self.camera_id,
                    track = track.id,
                    "track retired on stream stop"
                );
                track.state = TrackState::Lost;
            }
        }
        let updates = self.tracks.iter().map(update_of).collect();
        self.tracks.clear();
        updates
    }

    /// Read-only view of live (non-Lost) tracks for the query surface.
    pub fn active_tracks(&self) -> Vec<TrackUpdate> {
        self.tracks
            .iter()
            .filter(|t| t.state != TrackState::Lost)
            .map(update_of)
            .collect()
    }

    fn hit(&mut self, index: usize, obs: &Observation, now: DateTime<Utc>) {
        let confirm_hits = self.config.confirm_hits;
        let track = &mut self.tracks[index];
        track.bbox = obs.bbox;
        track.last_seen = now;
        track.misses = 0;
        track.streak += 1;

        if track.confirmed {
            track.state = TrackState::Active;
        } else if track.streak >= confirm_hits {
            track.state = TrackState::Active;
            track.confirmed = true;
            tracing::debug!(camera = self.camera_id, track = track.id, "track confirmed");
        } else {
            track.state = TrackState::Tentative;
        }

        track.votes.vote(obs.vote, obs.confidence);
    }

    fn miss(&mut self, index: usize, _now: DateTime<Utc>) {
        let lost_after = self.config.lost_after;
        let track = &mut self.tracks[index];
        track.streak = 0;
        track.misses += 1;
        if track.misses > lost_after && track.state != TrackState::Lost {
            tracing::debug!(camera = self.camera_id, track = track.id, "track lost");
            track.state = TrackState::Lost;
        }
    }

    fn spawn(&mut self, obs: &Observation, now: DateTime<Utc>) {
        let id = self.next_id;
        self.next_id += 1;

        let mut votes = VoteWindow::new(self.config.smoother.clone());
        votes.vote(obs.vote, obs.confidence);

        tracing::debug!(camera = self.camera_id, track = id, "track created");
        self.tracks.push(Track {
            id,
            bbox: obs.bbox,
            state: TrackState::Tentative,
            first_seen: now,
            last_seen: now,
            votes,
            streak: 1,
            misses: 0,
            confirmed: false,
        });
    }
}

fn update_of(track: &Track) -> TrackUpdate {
    TrackUpdate {
        track_id: track.id,
        bbox: track.bbox,
        state: track.state,
        first_seen: track.first_seen,
        last_seen: track.last_seen,
        stabilized: track.stabilized(),
        confidence: track.confidence(),
    }
}
