//! Quality gate: decides whether a detection may cast an identity vote.
//!
//! A rejected detection still participates in spatial tracking; it is
//! only barred from naming an employee. Motion blur, backlight, and
//! small partial faces are the classic identity corrupters.

use crate::types::Detection;

/// Thresholds for admitting a detection into identity voting.
#[derive(Debug, Clone)]
pub struct QualityConfig {
    /// Sharpness floor (e.g. Laplacian variance). Below = motion blur.
    pub min_sharpness: f32,
    /// Acceptable mean-luminance band, 0–255.
    pub brightness_min: f32,
    pub brightness_max: f32,
    /// Minimum bounding-box area in pixels.
    pub min_box_area: f32,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_sharpness: 60.0,
            brightness_min: 40.0,
            brightness_max: 220.0,
            min_box_area: 1600.0, // 40x40 px face
        }
    }
}

/// Filters raw detections by sharpness, brightness, and size.
#[derive(Debug, Clone, Default)]
pub struct QualityGate {
    config: QualityConfig,
}

impl QualityGate {
    pub fn new(config: QualityConfig) -> Self {
        Self { config }
    }

    /// True if this detection is sharp, well-lit, and large enough to
    /// trust its embedding.
    pub fn accept(&self, detection: &Detection) -> bool {
        let q = &detection.quality;
        if q.blur < self.config.min_sharpness {
            return false;
        }
        if q.brightness < self.config.brightness_min || q.brightness > self.config.brightness_max {
            return false;
        }
        if detection.bbox.area() < self.config.min_box_area {
            return false;
        }
        true
    }
}
