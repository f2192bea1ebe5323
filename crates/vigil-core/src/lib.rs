//! vigil-core: detection-to-presence pipeline primitives.
//!
//! Pure, synchronous building blocks: the quality gate, the cosine
//! identity matcher, the per-camera IOU tracker, and the temporal
//! vote smoother. No I/O lives here; the daemon wires these together.

pub mod matcher;
pub mod quality;
pub mod smoother;
pub mod tracker;
pub mod types;

pub use matcher::{CosineMatcher, Matcher};
pub use quality::{QualityConfig, QualityGate};
pub use smoother::{SmootherConfig, VoteWindow};
pub use tracker::{Tracker, TrackerConfig};
pub use types::{
    BoundingBox, Detection, Embedding, EmployeeId, FaceTemplate, Identity, MatchResult,
    QualityMetrics,
};
