//! Identity matcher: nearest-embedding lookup against stored templates.

use crate::types::{Embedding, FaceTemplate, Identity, MatchResult};

/// Strategy for matching a probe embedding against the template gallery.
pub trait Matcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[FaceTemplate],
        threshold: f32,
    ) -> MatchResult;
}

/// Cosine-similarity matcher over the full gallery.
///
/// Always scans every template. Exact similarity ties resolve to the
/// lowest employee id so runs are reproducible.
pub struct CosineMatcher;

impl Matcher for CosineMatcher {
    fn best_match(
        &self,
        probe: &Embedding,
        gallery: &[FaceTemplate],
        threshold: f32,
    ) -> MatchResult {
        let mut best_sim = f32::NEG_INFINITY;
        let mut best: Option<&FaceTemplate> = None;

        for template in gallery {
            let sim = probe.similarity(&template.embedding);
            let better = match best {
                None => true,
                Some(prev) => {
                    sim > best_sim || (sim == best_sim && template.employee < prev.employee)
                }
            };
            if better {
                best_sim = sim;
                best = Some(template);
            }
        }

        match best {
            Some(template) if best_sim >= threshold => MatchResult {
                identity: Identity::Employee(template.employee),
                similarity: best_sim,
            },
            _ => MatchResult {
                identity: Identity::Unknown,
                similarity: if best_sim == f32::NEG_INFINITY { 0.0 } else { best_sim },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EmployeeId;
    use chrono::Utc;
    use uuid::Uuid;

    fn template(employee: i64, values: Vec<f32>) -> FaceTemplate {
        FaceTemplate {
            id: Uuid::new_v4(),
            employee: EmployeeId(employee),
            embedding: Embedding { values },
            created_at: Utc::now(),
        }
    }

    #[test]
    fn matches_best_template_above_threshold() {
        let gallery = vec![
            template(1, vec![0.0, 1.0, 0.0]),
            template(2, vec![1.0, 0.0, 0.0]),
        ];
        let probe = Embedding { values: vec![1.0, 0.0, 0.0] };

        let result = CosineMatcher.best_match(&probe, &gallery, 0.5);
        assert_eq!(result.identity, Identity::Employee(EmployeeId(2)));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }

    #[test]
    fn below_threshold_is_unknown_not_error() {
        let gallery = vec![template(1, vec![0.0, 1.0])];
        let probe = Embedding { values: vec![1.0, 0.0] };

        let result = CosineMatcher.best_match(&probe, &gallery, 0.5);
        assert_eq!(result.identity, Identity::Unknown);
        assert!(result.similarity.abs() < 1e-6);
    }

    #[test]
    fn empty_gallery_is_unknown() {
        let probe = Embedding { values: vec![1.0, 0.0] };
        let result = CosineMatcher.best_match(&probe, &[], 0.5);
        assert_eq!(result.identity, Identity::Unknown);
        assert_eq!(result.similarity, 0.0);
    }

    #[test]
    fn exact_tie_breaks_to_lowest_employee_id() {
        // Identical embeddings, listed highest id first.
        let gallery = vec![
            template(7, vec![1.0, 0.0]),
            template(3, vec![1.0, 0.0]),
        ];
        let probe = Embedding { values: vec![1.0, 0.0] };

        let result = CosineMatcher.best_match(&probe, &gallery, 0.5);
        assert_eq!(result.identity, Identity::Employee(EmployeeId(3)));
    }

    #[test]
    fn multiple_templates_per_employee() {
        // Same employee registered with two looks; either may win.
        let gallery = vec![
            template(4, vec![0.9, 0.1]),
            template(4, vec![1.0, 0.0]),
        ];
        let probe = Embedding { values: vec![1.0, 0.0] };

        let result = CosineMatcher.best_match(&probe, &gallery, 0.5);
        assert_eq!(result.identity, Identity::Employee(EmployeeId(4)));
        assert!((result.similarity - 1.0).abs() < 1e-6);
    }
}
