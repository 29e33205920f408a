//! Numeric helpers for confidence propagation and similarity.

use uuid::Uuid;

use super::{ConfidenceVector, EdgeType};

/// Clamp into `[0.0, 1.0]`, mapping NaN to `0.0`.
#[inline]
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

/// Weight multiplier for the relation an evidence edge expresses.
pub fn edge_factor(edge_type: &EdgeType) -> f64 {
    match edge_type {
        EdgeType::Causal => 1.1,
        EdgeType::Correlative => 0.9,
        _ => 1.0,
    }
}

/// Update weight of one evidence item.
pub fn evidence_weight(strength: f64, statistical_power: f64, edge_type: &EdgeType) -> f64 {
    clamp_unit(clamp_unit(strength) * clamp_unit(statistical_power) * edge_factor(edge_type))
}

/// Move `prior` toward `implied` by `weight`.
///
/// Every component of the result is in `[0.0, 1.0]` for any input, including
/// out-of-range and NaN values.
pub fn bayesian_update(prior: &ConfidenceVector, implied: &[f64; 4], weight: f64) -> ConfidenceVector {
    let w = clamp_unit(weight);
    let prior = prior.to_array();
    let mut posterior = [0.0; 4];
    for i in 0..4 {
        let p = clamp_unit(prior[i]);
        posterior[i] = clamp_unit(p + w * (clamp_unit(implied[i]) - p));
    }
    ConfidenceVector::new(posterior[0], posterior[1], posterior[2], posterior[3])
}

/// Mean absolute component change between two vectors.
pub fn information_gain(prior: &ConfidenceVector, posterior: &ConfidenceVector) -> f64 {
    let a = prior.to_array();
    let b = posterior.to_array();
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).sum::<f64>() / 4.0
}

/// Largest absolute component change between two vectors.
pub fn max_component_delta(prior: &ConfidenceVector, posterior: &ConfidenceVector) -> f64 {
    let a = prior.to_array();
    let b = posterior.to_array();
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f64::max)
}

/// Mean squared distance of the components from 0.5.
pub fn confidence_spread(confidence: &ConfidenceVector) -> f64 {
    confidence
        .to_array()
        .iter()
        .map(|c| (c - 0.5).powi(2))
        .sum::<f64>()
        / 4.0
}

/// Case-insensitive bigram similarity of two labels, in `[0.0, 1.0]`.
pub fn label_similarity(a: &str, b: &str) -> f64 {
    clamp_unit(strsim::sorensen_dice(&a.to_lowercase(), &b.to_lowercase()))
}

const UNIT_MASK: u64 = (1u64 << 53) - 1;

/// Deterministic value in `[0.0, 1.0)` derived from `seed`.
///
/// Replaces random draws so a rerun over the same graph produces the same
/// nodes.
pub fn stable_unit(seed: &str) -> f64 {
    // The low 53 bits lie below the RFC 4122 variant bits.
    let digest = Uuid::new_v5(&Uuid::NAMESPACE_OID, seed.as_bytes()).as_u128() as u64;
    (digest & UNIT_MASK) as f64 / (1u64 << 53) as f64
}

/// Deterministic value in `[low, high)`.
pub fn stable_range(seed: &str, low: f64, high: f64) -> f64 {
    low + stable_unit(seed) * (high - low)
}

/// Deterministic index in `0..len` (0 when `len` is 0).
pub fn stable_index(seed: &str, len: usize) -> usize {
    if len == 0 {
        return 0;
    }
    ((stable_unit(seed) * len as f64) as usize).min(len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(-0.5), 0.0);
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert!((clamp_unit(0.42) - 0.42).abs() < f64::EPSILON);
    }

    #[test]
    fn test_evidence_weight_factors() {
        let causal = evidence_weight(0.8, 0.5, &EdgeType::Causal);
        let temporal = evidence_weight(0.8, 0.5, &EdgeType::Temporal);
        let correlative = evidence_weight(0.8, 0.5, &EdgeType::Correlative);
        assert!(causal > temporal);
        assert!(temporal > correlative);
        assert!((temporal - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_evidence_weight_is_clamped() {
        assert_eq!(evidence_weight(1.0, 1.0, &EdgeType::Causal), 1.0);
        assert_eq!(evidence_weight(-1.0, 1.0, &EdgeType::Causal), 0.0);
    }

    #[test]
    fn test_bayesian_update_moves_toward_implied() {
        let prior = ConfidenceVector::uniform(0.5);
        let posterior = bayesian_update(&prior, &[1.0; 4], 0.5);
        for v in posterior.to_array() {
            assert!((v - 0.75).abs() < 1e-12);
        }

        let posterior = bayesian_update(&prior, &[0.0; 4], 0.5);
        for v in posterior.to_array() {
            assert!((v - 0.25).abs() < 1e-12);
        }
    }

    #[test]
    fn test_bayesian_update_zero_weight_is_identity() {
        let prior = ConfidenceVector::new(0.1, 0.2, 0.3, 0.4);
        let posterior = bayesian_update(&prior, &[1.0; 4], 0.0);
        assert_eq!(prior, posterior);
    }

    #[test]
    fn test_bayesian_update_handles_garbage_inputs() {
        let prior = ConfidenceVector::uniform(0.9);
        let posterior = bayesian_update(&prior, &[f64::NAN, 7.0, -3.0, f64::INFINITY], 2.0);
        assert!(posterior.is_bounded());
        assert_eq!(posterior.empirical_support, 0.0);
        assert_eq!(posterior.theoretical_basis, 1.0);
        assert_eq!(posterior.methodological_rigor, 0.0);
        assert_eq!(posterior.consensus_alignment, 1.0);
    }

    #[test]
    fn test_information_gain() {
        let a = ConfidenceVector::uniform(0.5);
        let b = ConfidenceVector::new(0.9, 0.5, 0.1, 0.5);
        assert!((information_gain(&a, &b) - 0.2).abs() < 1e-12);
        assert!((max_component_delta(&a, &b) - 0.4).abs() < 1e-12);
        assert_eq!(information_gain(&a, &a), 0.0);
    }

    #[test]
    fn test_confidence_spread() {
        assert_eq!(confidence_spread(&ConfidenceVector::uniform(0.5)), 0.0);
        assert!((confidence_spread(&ConfidenceVector::uniform(1.0)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_label_similarity() {
        assert!((label_similarity("Immune Response", "immune response") - 1.0).abs() < 1e-12);
        assert!(label_similarity("lipid nanoparticle", "spike protein") < 0.5);
    }

    #[test]
    fn test_stable_unit_is_deterministic_and_bounded() {
        let a = stable_unit("root-1/dim-0");
        let b = stable_unit("root-1/dim-0");
        assert_eq!(a, b);
        assert!((0.0..1.0).contains(&a));
        assert_ne!(stable_unit("seed-a"), stable_unit("seed-b"));
    }

    #[test]
    fn test_stable_unit_covers_the_unit_interval() {
        let draws: Vec<f64> = (0..1000).map(|i| stable_unit(&format!("spread-{}", i))).collect();
        let min = draws.iter().copied().fold(f64::INFINITY, f64::min);
        let max = draws.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        assert!(min < 0.1, "min {}", min);
        assert!(max > 0.9, "max {}", max);

        let low = draws.iter().filter(|d| **d < 0.25).count();
        let high = draws.iter().filter(|d| **d >= 0.75).count();
        assert!(low > 150 && high > 150, "low {} high {}", low, high);
    }

    #[test]
    fn test_stable_index_reaches_every_slot() {
        let mut seen = [0usize; 3];
        for i in 0..300 {
            seen[stable_index(&format!("slot-{}", i), 3)] += 1;
        }
        assert!(seen.iter().all(|&n| n > 50), "{:?}", seen);
    }

    #[test]
    fn test_stable_index_bounds() {
        for i in 0..50 {
            let idx = stable_index(&format!("seed-{}", i), 3);
            assert!(idx < 3);
        }
        assert_eq!(stable_index("anything", 0), 0);
    }

    #[test]
    fn test_stable_range_bounds() {
        for i in 0..50 {
            let v = stable_range(&format!("range-{}", i), 0.2, 0.8);
            assert!((0.2..0.8).contains(&v));
        }
    }
}
