//! Property-based tests for confidence math
//!
//! Bayesian updates, evidence weights and label similarity must stay in
//! `[0.0, 1.0]` for any input the evidence loop can feed them.

use proptest::prelude::*;

use got_pipeline::graph::math::{
    bayesian_update, evidence_weight, label_similarity, max_component_delta, stable_index,
};
use got_pipeline::graph::{ConfidenceVector, EdgeType};

fn any_component() -> impl Strategy<Value = f64> {
    prop_oneof![
        4 => 0.0..=1.0f64,
        1 => -10.0..10.0f64,
        1 => Just(f64::NAN),
    ]
}

fn unit_vector() -> impl Strategy<Value = ConfidenceVector> {
    (0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64, 0.0..=1.0f64)
        .prop_map(|(a, b, c, d)| ConfidenceVector::new(a, b, c, d))
}

fn evidential_edge() -> impl Strategy<Value = EdgeType> {
    prop_oneof![
        Just(EdgeType::Causal),
        Just(EdgeType::Temporal),
        Just(EdgeType::Correlative),
    ]
}

proptest! {
    #[test]
    fn posterior_is_always_bounded(
        prior in unit_vector(),
        implied in prop::array::uniform4(any_component()),
        weight in any_component(),
    ) {
        let posterior = bayesian_update(&prior, &implied, weight);
        prop_assert!(posterior.is_bounded());
    }

    #[test]
    fn posterior_moves_toward_implied(
        prior in unit_vector(),
        implied in prop::array::uniform4(0.0..=1.0f64),
        weight in 0.0..=1.0f64,
    ) {
        let posterior = bayesian_update(&prior, &implied, weight).to_array();
        for (i, p) in prior.to_array().iter().enumerate() {
            let (lo, hi) = if *p <= implied[i] { (*p, implied[i]) } else { (implied[i], *p) };
            prop_assert!(posterior[i] >= lo - 1e-12 && posterior[i] <= hi + 1e-12);
        }
    }

    #[test]
    fn zero_weight_leaves_prior_unchanged(
        prior in unit_vector(),
        implied in prop::array::uniform4(0.0..=1.0f64),
    ) {
        let posterior = bayesian_update(&prior, &implied, 0.0);
        prop_assert!(max_component_delta(&prior, &posterior) < 1e-12);
    }

    #[test]
    fn evidence_weight_is_bounded(
        strength in any_component(),
        power in any_component(),
        edge in evidential_edge(),
    ) {
        let weight = evidence_weight(strength, power, &edge);
        prop_assert!((0.0..=1.0).contains(&weight));
    }

    #[test]
    fn label_similarity_is_symmetric_and_bounded(a in "[a-zA-Z ]{0,40}", b in "[a-zA-Z ]{0,40}") {
        let ab = label_similarity(&a, &b);
        prop_assert!((0.0..=1.0).contains(&ab));
        prop_assert!((ab - label_similarity(&b, &a)).abs() < 1e-12);
    }

    #[test]
    fn stable_index_stays_in_range(seed in ".{0,30}", len in 1usize..50) {
        prop_assert!(stable_index(&seed, len) < len);
        prop_assert_eq!(stable_index(&seed, len), stable_index(&seed, len));
    }
}
