//! Per-camera frame pipeline: quality gate → identity match → track
//! association → temporal smoothing → stabilized sightings.
//!
//! Each camera gets its own worker task and its own tracker; nothing
//! mutable is shared across cameras except the employee-keyed
//! presence actor. The frame queue is bounded with drop-oldest
//! overflow so one slow consumer never backs up into the detector.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Notify;
use vigil_core::tracker::{TrackState, TrackUpdate};
use vigil_core::{
    BoundingBox, CosineMatcher, Detection, EmployeeId, FaceTemplate, Identity, Matcher,
    QualityGate, Tracker, TrackerConfig,
};

use crate::config::CameraConfig;
use crate::presence::{PresenceHandle, Sighting};

/// One frame's worth of detections from the external detector.
#[derive(Debug, Clone)]
pub struct FrameBatch {
    pub camera_id: i64,
    pub at: DateTime<Utc>,
    pub detections: Vec<Detection>,
}

/// Read-only view of one live track, for the dashboard layer.
#[derive(Debug, Clone, Serialize)]
pub struct TrackView {
    pub track_id: u64,
    pub bbox: BoundingBox,
    pub state: TrackState,
    /// Stabilized identity, absent while unresolved.
    pub employee: Option<EmployeeId>,
    pub confidence: f32,
}

/// Shared per-camera snapshots of live tracks.
pub type TrackBoard = Arc<RwLock<HashMap<i64, Vec<TrackView>>>>;

/// Current template gallery, swapped wholesale on reload so a running
/// frame keeps the snapshot it started with.
pub type Gallery = Arc<RwLock<Vec<FaceTemplate>>>;

enum Job {
    Frame(FrameBatch),
    Stop,
}

/// Clone-safe handle to one camera's worker.
#[derive(Clone)]
pub struct PipelineHandle {
    camera_id: i64,
    depth: usize,
    queue: Arc<Mutex<VecDeque<Job>>>,
    notify: Arc<Notify>,
    dropped: Arc<AtomicU64>,
}

impl PipelineHandle {
    pub fn camera_id(&self) -> i64 {
        self.camera_id
    }

    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a frame. Never blocks: past the depth bound the oldest
    /// queued frame is discarded to make room.
    pub fn submit(&self, batch: FrameBatch) {
        {
            let mut queue = self.queue.lock().expect("pipeline queue poisoned");
            if queue.len() >= self.depth {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    camera = self.camera_id,
                    dropped,
                    "frame queue full; oldest frame dropped"
                );
            }
            queue.push_back(Job::Frame(batch));
        }
        self.notify.notify_one();
    }

    /// Stop the worker. Its tracker flushes deterministically; the
    /// stop request bypasses the depth bound.
    pub fn stop(&self) {
        self.queue
            .lock()
            .expect("pipeline queue poisoned")
            .push_back(Job::Stop);
        self.notify.notify_one();
    }
}

pub struct PipelineConfig {
    pub quality: QualityGate,
    pub tracker: TrackerConfig,
    pub similarity_threshold: f32,
    pub queue_depth: usize,
}

/// Spawn the worker task for one camera.
pub fn spawn_pipeline(
    camera: CameraConfig,
    config: PipelineConfig,
    gallery: Gallery,
    presence: PresenceHandle,
    tracks: TrackBoard,
) -> (PipelineHandle, tokio::task::JoinHandle<()>) {
    let handle = PipelineHandle {
        camera_id: camera.id,
        depth: config.queue_depth.max(1),
        queue: Arc::new(Mutex::new(VecDeque::new())),
        notify: Arc::new(Notify::new()),
        dropped: Arc::new(AtomicU64::new(0)),
    };

    let worker_handle = handle.clone();
    let join = tokio::spawn(async move {
        let mut tracker = Tracker::new(camera.id, config.tracker.clone());
        tracing::info!(camera = camera.id, name = %camera.name, "pipeline started");

        loop {
            let job = worker_handle.queue.lock().expect("pipeline queue poisoned").pop_front();
            let Some(job) = job else {
                worker_handle.notify.notified().await;
                continue;
            };

            match job {
                Job::Frame(batch) => {
                    process_frame(
                        &batch,
                        &config,
                        &gallery,
                        &mut tracker,
                        &presence,
                        &tracks,
                    )
                    .await;
                }
                Job::Stop => {
                    let retired = tracker.flush();
                    tracks.write().expect("track board poisoned").remove(&camera.id);
                    tracing::info!(
                        camera = camera.id,
                        retired = retired.len(),
                        "pipeline stopped; tracks retired"
                    );
                    return;
                }
            }
        }
    });

    (handle, join)
}

async fn process_frame(
    batch: &FrameBatch,
    config: &PipelineConfig,
    gallery: &Gallery,
    tracker: &mut Tracker,
    presence: &PresenceHandle,
    tracks: &TrackBoard,
) {
    let observations = build_observations(batch, config, gallery);
    let updates = tracker.observe(&observations, batch.at);

    publish_snapshot(tracks, batch.camera_id, &updates);

    for update in &updates {
        // Only confirmed tracks with a stabilized identity reach the
        // presence layer, and only when this frame actually saw them.
        if update.state != TrackState::Active || update.last_seen != batch.at {
            continue;
        }
        let Some(employee) = update.stabilized else { continue };
        presence
            .sighting(Sighting {
                employee,
                camera_id: batch.camera_id,
                at: update.last_seen,
                track_started: update.first_seen,
                confidence: update.confidence,
            })
            .await;
    }
}

/// Gate + match each detection into a tracker observation. Malformed
/// detections are dropped with a warning; quality-rejected ones keep
/// their box but vote Unknown.
fn build_observations(
    batch: &FrameBatch,
    config: &PipelineConfig,
    gallery: &Gallery,
) -> Vec<vigil_core::tracker::Observation> {
    let gallery = gallery.read().expect("gallery poisoned");
    let mut observations = Vec::with_capacity(batch.detections.len());

    for detection in &batch.detections {
        if detection.is_malformed() {
            tracing::warn!(
                camera = batch.camera_id,
                bbox = ?detection.bbox,
                has_embedding = detection.embedding.is_some(),
                "malformed detection dropped"
            );
            continue;
        }

        let (vote, confidence) = if config.quality.accept(detection) {
            // is_malformed() guarantees the embedding is present.
            let embedding = detection.embedding.as_ref().expect("checked above");
            let result =
                CosineMatcher.best_match(embedding, &gallery, config.similarity_threshold);
            (result.identity, result.similarity)
        } else {
            (Identity::Unknown, 0.0)
        };

        observations.push(vigil_core::tracker::Observation {
            bbox: detection.bbox,
            vote,
            confidence,
        });
    }
    observations
}

fn publish_snapshot(tracks: &TrackBoard, camera_id: i64, updates: &[TrackUpdate]) {
    let views: Vec<TrackView> = updates
        .iter()
        .filter(|u| u.state != TrackState::Lost)
        .map(|u| TrackView {
            track_id: u.track_id,
            bbox: u.bbox,
            state: u.state,
            employee: u.stabilized,
            confidence: u.confidence,
        })
        .collect();
    tracks.write().expect("track board poisoned").insert(camera_id, views);
}
