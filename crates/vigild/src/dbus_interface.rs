//! D-Bus surface for the Vigil presence daemon.
//!
//! Bus name: org.freedesktop.Vigil1
//! Object path: /org/freedesktop/Vigil1
//!
//! The external detector pushes per-frame detections through
//! `SubmitDetections`; the dashboard layer reads `ActiveTracks` and
//! `Status`. Structured payloads are JSON strings.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use zbus::interface;

use vigil_core::{BoundingBox, Detection, Embedding, QualityMetrics};

use crate::pipeline::{FrameBatch, Gallery, PipelineHandle, TrackBoard};
use crate::presence::PresenceHandle;
use crate::store::Store;

/// Wire format of one frame submission.
#[derive(Debug, Deserialize)]
struct WireFrame {
    camera_id: i64,
    timestamp: DateTime<Utc>,
    detections: Vec<WireDetection>,
}

#[derive(Debug, Deserialize)]
struct WireDetection {
    bbox: BoundingBox,
    /// Absent when the recognition model failed on this crop.
    #[serde(default)]
    embedding: Option<Vec<f32>>,
    quality: QualityMetrics,
}

pub struct VigilService {
    pub pipelines: HashMap<i64, PipelineHandle>,
    pub presence: PresenceHandle,
    pub store: Store,
    pub tracks: TrackBoard,
    pub gallery: Gallery,
    pub started_at: DateTime<Utc>,
}

#[interface(name = "org.freedesktop.Vigil1")]
impl VigilService {
    /// Ingest one frame of detections from the external detector.
    ///
    /// Returns the number of detections queued. An unknown camera is
    /// a stream-level fault and is rejected outright; malformed
    /// detections within a valid frame are dropped downstream with a
    /// warning instead.
    async fn submit_detections(&self, payload: &str) -> zbus::fdo::Result<u32> {
        let frame: WireFrame = serde_json::from_str(payload)
            .map_err(|e| zbus::fdo::Error::InvalidArgs(format!("bad frame payload: {e}")))?;

        let Some(pipeline) = self.pipelines.get(&frame.camera_id) else {
            tracing::warn!(camera = frame.camera_id, "frame for unknown camera rejected");
            return Err(zbus::fdo::Error::Failed(format!(
                "unknown camera {}",
                frame.camera_id
            )));
        };

        let count = frame.detections.len() as u32;
        let detections = frame
            .detections
            .into_iter()
            .map(|d| Detection {
                camera_id: frame.camera_id,
                timestamp: frame.timestamp,
                bbox: d.bbox,
                embedding: d.embedding.map(|values| Embedding { values }),
                quality: d.quality,
            })
            .collect();

        pipeline.submit(FrameBatch {
            camera_id: frame.camera_id,
            at: frame.timestamp,
            detections,
        });
        Ok(count)
    }

    /// Live tracks for one camera: box, state, stabilized identity
    /// (null while unresolved), confidence. Read-only.
    async fn active_tracks(&self, camera_id: i64) -> zbus::fdo::Result<String> {
        let tracks = self
            .tracks
            .read()
            .map_err(|_| zbus::fdo::Error::Failed("track board poisoned".into()))?;
        let views = tracks.get(&camera_id).cloned().unwrap_or_default();
        serde_json::to_string(&views).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
    }

    /// Daemon status: per-employee presence plus per-camera counters.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let presence = self.presence.snapshot().await;
        let cameras: Vec<_> = self
            .pipelines
            .values()
            .map(|p| {
                serde_json::json!({
                    "camera_id": p.camera_id(),
                    "dropped_frames": p.dropped_frames(),
                })
            })
            .collect();

        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": self.started_at.to_rfc3339(),
            "employees": presence,
            "cameras": cameras,
        })
        .to_string())
    }

    /// Bulk-delete persisted event and alert history in an inclusive
    /// date range (YYYY-MM-DD). In-memory tracking state is untouched.
    async fn prune_history(&self, from: &str, to: &str) -> zbus::fdo::Result<u64> {
        let from: NaiveDate = from
            .parse()
            .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("bad date: {from}")))?;
        let to: NaiveDate = to
            .parse()
            .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("bad date: {to}")))?;
        if from > to {
            return Err(zbus::fdo::Error::InvalidArgs("from is after to".into()));
        }

        let deleted = self
            .store
            .prune_history(from, to)
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        tracing::info!(%from, %to, deleted, "history pruned");
        Ok(deleted)
    }

    /// Re-read face templates from the store. New registrations take
    /// effect on the next matcher call; frames in flight keep the
    /// gallery snapshot they started with.
    async fn reload_templates(&self) -> zbus::fdo::Result<u32> {
        let templates = self
            .store
            .load_templates()
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        let count = templates.len() as u32;
        *self
            .gallery
            .write()
            .map_err(|_| zbus::fdo::Error::Failed("gallery poisoned".into()))? = templates;
        tracing::info!(count, "face templates reloaded");
        Ok(count)
    }
}
