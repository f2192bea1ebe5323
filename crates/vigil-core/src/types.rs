use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const EPSILON: f32 = 1e-5;

/// Axis-aligned bounding box in pixel coordinates, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub w: f32,
    pub h: f32,
}

impl BoundingBox {
    pub fn area(&self) -> f32 {
        self.w.max(0.0) * self.h.max(0.0)
    }

    /// True if the box cannot contain a face (zero or negative extent).
    pub fn is_degenerate(&self) -> bool {
        self.w <= 0.0 || self.h <= 0.0
    }

    /// Intersection-over-union with another box.
    ///
    /// Returns a value in [0, 1]; 0 for degenerate boxes or a union
    /// below epsilon.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        if self.is_degenerate() || other.is_degenerate() {
            return 0.0;
        }
        let ix = (self.x + self.w).min(other.x + other.w) - self.x.max(other.x);
        let iy = (self.y + self.h).min(other.y + other.h) - self.y.max(other.y);
        let intersection = ix.max(0.0) * iy.max(0.0);
        let union = self.area() + other.area() - intersection;
        if union <= EPSILON {
            return 0.0;
        }
        intersection / union
    }
}

/// Face embedding vector produced by the external recognition model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// Cosine similarity between two embeddings.
    ///
    /// Returns a value in [-1, 1]; 0 when either vector has zero norm.
    pub fn similarity(&self, other: &Embedding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 {
            dot / denom
        } else {
            0.0
        }
    }
}

/// Per-detection quality signals from the detector.
///
/// `blur` is a sharpness score (higher = sharper, e.g. Laplacian
/// variance); `brightness` is mean pixel luminance 0–255.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityMetrics {
    pub blur: f32,
    pub brightness: f32,
}

/// Employee identifier, assigned at registration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EmployeeId(pub i64);

impl std::fmt::Display for EmployeeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Outcome of an identity decision: a known employee or nobody we know.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Identity {
    Employee(EmployeeId),
    Unknown,
}

impl Identity {
    pub fn employee(&self) -> Option<EmployeeId> {
        match self {
            Identity::Employee(id) => Some(*id),
            Identity::Unknown => None,
        }
    }
}

/// One face detected in one frame by the external detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    pub camera_id: i64,
    pub timestamp: DateTime<Utc>,
    pub bbox: BoundingBox,
    /// Absent when the recognition model failed on this crop.
    pub embedding: Option<Embedding>,
    pub quality: QualityMetrics,
}

impl Detection {
    /// A detection the pipeline must drop rather than process:
    /// zero-size box or missing embedding.
    pub fn is_malformed(&self) -> bool {
        self.bbox.is_degenerate() || self.embedding.is_none()
    }
}

/// A stored reference embedding for one employee.
///
/// Immutable once registered; re-registration replaces the row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FaceTemplate {
    pub id: Uuid,
    pub employee: EmployeeId,
    pub embedding: Embedding,
    pub created_at: DateTime<Utc>,
}

/// Result of matching a probe embedding against the template gallery.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchResult {
    pub identity: Identity,
    /// Best cosine similarity seen, even when below threshold.
    pub similarity: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bb(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox { x, y, w, h }
    }

    #[test]
    fn iou_identical_boxes() {
        let a = bb(10.0, 10.0, 40.0, 40.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn iou_disjoint_boxes() {
        let a = bb(0.0, 0.0, 20.0, 20.0);
        let b = bb(50.0, 50.0, 20.0, 20.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn iou_partial_overlap() {
        // Intersection 25x25 = 625, union 2500 + 2500 - 625 = 4375.
        let a = bb(0.0, 0.0, 50.0, 50.0);
        let b = bb(25.0, 25.0, 50.0, 50.0);
        let iou = a.iou(&b);
        assert!((iou - 625.0 / 4375.0).abs() < 1e-4);
    }

    #[test]
    fn iou_degenerate_box_is_zero() {
        let a = bb(0.0, 0.0, 0.0, 10.0);
        let b = bb(0.0, 0.0, 10.0, 10.0);
        assert_eq!(a.iou(&b), 0.0);
        assert_eq!(b.iou(&a), 0.0);
    }

    #[test]
    fn similarity_identical() {
        let a = Embedding { values: vec![1.0, 0.0, 0.0] };
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn similarity_orthogonal() {
        let a = Embedding { values: vec![1.0, 0.0] };
        let b = Embedding { values: vec![0.0, 1.0] };
        assert!(a.similarity(&b).abs() < 1e-6);
    }

    #[test]
    fn similarity_zero_vector() {
        let a = Embedding { values: vec![0.0, 0.0] };
        let b = Embedding { values: vec![1.0, 0.0] };
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn malformed_detection_flags() {
        let good = Detection {
            camera_id: 1,
            timestamp: Utc::now(),
            bbox: bb(0.0, 0.0, 32.0, 32.0),
            embedding: Some(Embedding { values: vec![1.0] }),
            quality: QualityMetrics { blur: 100.0, brightness: 128.0 },
        };
        assert!(!good.is_malformed());

        let no_embedding = Detection { embedding: None, ..good.clone() };
        assert!(no_embedding.is_malformed());

        let zero_box = Detection { bbox: bb(0.0, 0.0, 0.0, 0.0), ..good };
        assert!(zero_box.is_malformed());
    }
}
