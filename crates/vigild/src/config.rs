use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use vigil_core::{QualityConfig, SmootherConfig, TrackerConfig};

/// Daemon configuration: `VIGIL_*` environment variables plus a TOML
/// camera roster. Any malformed value is fatal at startup; nothing
/// later in the pipeline is.
#[derive(Debug)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    /// Path to the camera roster TOML file.
    pub cameras_path: PathBuf,
    /// Cosine similarity threshold for a positive identity match.
    pub similarity_threshold: f32,
    pub quality: QualityConfig,
    pub tracker: TrackerConfig,
    /// Seconds without a stabilized sighting before Available → Off.
    pub absence_timeout_secs: u64,
    /// Seconds continuously absent before an alert opens.
    pub absence_alert_secs: u64,
    /// Minimum seconds between repeated same-state event rows.
    pub event_interval_secs: u64,
    /// Absence-sweep cadence.
    pub sweep_interval_secs: u64,
    /// Per-camera frame queue depth (drop-oldest past this).
    pub frame_queue_depth: usize,
    /// Pending store-write buffer bound (drop-oldest past this).
    pub store_queue_depth: usize,
    pub cameras: Vec<CameraConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CameraConfig {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct CameraRoster {
    #[serde(rename = "camera", default)]
    cameras: Vec<CameraConfig>,
}

impl Config {
    /// Load configuration from the environment and the camera roster.
    pub fn load() -> Result<Self> {
        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("vigil");

        let db_path = std::env::var("VIGIL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("vigil.db"));

        let cameras_path = std::env::var("VIGIL_CAMERAS")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/etc/vigil/cameras.toml"));

        let roster = std::fs::read_to_string(&cameras_path)
            .with_context(|| format!("reading camera roster {}", cameras_path.display()))?;
        let roster: CameraRoster = toml::from_str(&roster)
            .with_context(|| format!("parsing camera roster {}", cameras_path.display()))?;

        Ok(Self {
            db_path,
            cameras_path,
            similarity_threshold: env_f32("VIGIL_SIMILARITY_THRESHOLD", 0.5)?,
            quality: QualityConfig {
                min_sharpness: env_f32("VIGIL_MIN_SHARPNESS", 60.0)?,
                brightness_min: env_f32("VIGIL_BRIGHTNESS_MIN", 40.0)?,
                brightness_max: env_f32("VIGIL_BRIGHTNESS_MAX", 220.0)?,
                min_box_area: env_f32("VIGIL_MIN_BOX_AREA", 1600.0)?,
            },
            tracker: TrackerConfig {
                min_iou: env_f32("VIGIL_MIN_IOU", 0.3)?,
                confirm_hits: env_u64("VIGIL_CONFIRM_HITS", 3)? as u32,
                lost_after: env_u64("VIGIL_LOST_AFTER_FRAMES", 15)? as u32,
                remove_after_secs: env_f32("VIGIL_REMOVE_AFTER_SECS", 5.0)?,
                smoother: SmootherConfig {
                    window: env_u64("VIGIL_VOTE_WINDOW", 5)? as usize,
                    min_fraction: env_f32("VIGIL_VOTE_FRACTION", 0.5)?,
                },
            },
            absence_timeout_secs: env_u64("VIGIL_ABSENCE_TIMEOUT_SECS", 30)?,
            absence_alert_secs: env_u64("VIGIL_ABSENCE_ALERT_SECS", 60)?,
            event_interval_secs: env_u64("VIGIL_EVENT_INTERVAL_SECS", 300)?,
            sweep_interval_secs: env_u64("VIGIL_SWEEP_INTERVAL_SECS", 1)?,
            frame_queue_depth: env_u64("VIGIL_FRAME_QUEUE_DEPTH", 16)? as usize,
            store_queue_depth: env_u64("VIGIL_STORE_QUEUE_DEPTH", 256)? as usize,
            cameras: roster.cameras,
        })
    }
}

fn env_f32(key: &str, default: f32) -> Result<f32> {
    match std::env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key}={v} is not a number")),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64> {
    match std::env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key}={v} is not an integer")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roster_parses() {
        let roster: CameraRoster = toml::from_str(
            r#"
            [[camera]]
            id = 1
            name = "lobby"

            [[camera]]
            id = 2
            name = "floor-2"
            "#,
        )
        .unwrap();
        assert_eq!(roster.cameras.len(), 2);
        assert_eq!(roster.cameras[0].id, 1);
        assert_eq!(roster.cameras[1].name, "floor-2");
    }

    #[test]
    fn empty_roster_is_valid() {
        let roster: CameraRoster = toml::from_str("").unwrap();
        assert!(roster.cameras.is_empty());
    }

    #[test]
    fn env_helpers_default_when_unset() {
        assert_eq!(env_f32("VIGIL_TEST_UNSET_F32", 0.25).unwrap(), 0.25);
        assert_eq!(env_u64("VIGIL_TEST_UNSET_U64", 7).unwrap(), 7);
    }
}
