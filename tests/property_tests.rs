//! Property-based tests for the invariants in the design's testable
//! properties section: quantization error bounds, store round-trips, and
//! distance-score monotonicity, run over randomly generated inputs with
//! `proptest` rather than hand-picked examples.

use embervec::distance::DistanceMetric;
use embervec::quantization::{decompress, BitDepth, ScalarQuantizer};
use embervec::record::VectorRecord;
use embervec::storage::{MemoryStore, VectorStore};
use proptest::prelude::*;

fn bit_depth_strategy() -> impl Strategy<Value = BitDepth> {
    prop_oneof![
        Just(BitDepth::Four),
        Just(BitDepth::Eight),
        Just(BitDepth::Twelve),
        Just(BitDepth::Sixteen),
    ]
}

proptest! {
    /// Scalar quantization's max per-component reconstruction error never
    /// exceeds `R / (2*(2^b - 1))` for the observed range `R`.
    #[test]
    fn scalar_quantization_error_stays_within_bound(
        values in prop::collection::vec(-1000.0f32..1000.0, 1..64),
        depth in bit_depth_strategy(),
    ) {
        let q = ScalarQuantizer { bit_depth: depth, ..ScalarQuantizer::default() };
        let batch = q.compress(&values).unwrap();
        let restored = &decompress(&batch)[0];

        let range = values.iter().copied().fold(f32::NEG_INFINITY, f32::max)
            - values.iter().copied().fold(f32::INFINITY, f32::min);
        let bound = range.max(f32::EPSILON) / (2.0 * depth.max_level() as f32);

        for (orig, got) in values.iter().zip(restored) {
            prop_assert!((orig - got).abs() <= bound + 1e-3);
        }
    }

    /// A store round-trips a written record bit-for-bit, and a deleted
    /// record is no longer retrievable (there's no dimension concept inside
    /// `VectorStore` itself, so this exercises id/value round-tripping and
    /// the delete-then-miss half of the contract).
    #[test]
    fn memory_store_put_get_delete_round_trips(
        id in "[a-z][a-z0-9_]{0,16}",
        values in prop::collection::vec(any::<f32>().prop_filter("finite", |v| v.is_finite()), 1..16),
    ) {
        let store = MemoryStore::default();
        let record = VectorRecord::new(id.clone(), values.clone(), None, 0);
        store.put(record).unwrap();

        let got = store.get(&id).unwrap().unwrap();
        prop_assert_eq!(got.values, values);

        store.delete(&id).unwrap();
        prop_assert!(store.get(&id).unwrap().is_none());
    }

    /// For any two candidates, a smaller distance never yields a smaller
    /// score under a metric's `score_from_distance` mapping.
    #[test]
    fn score_is_monotonically_decreasing_in_distance(
        d_a in 0.0f32..10.0,
        d_b in 0.0f32..10.0,
        metric in prop_oneof![
            Just(DistanceMetric::Cosine),
            Just(DistanceMetric::Euclidean),
            Just(DistanceMetric::Manhattan),
            Just(DistanceMetric::Dot),
            Just(DistanceMetric::Hamming),
            Just(DistanceMetric::Jaccard),
        ],
    ) {
        let (lo, hi) = if d_a <= d_b { (d_a, d_b) } else { (d_b, d_a) };
        let score_lo = metric.score_from_distance(lo);
        let score_hi = metric.score_from_distance(hi);
        prop_assert!(score_lo >= score_hi - 1e-5);
    }
}

/// Namespace isolation holds for an arbitrary set of shared ids inserted
/// into two distinct namespaces.
#[test]
fn namespace_isolation_holds_for_arbitrary_shared_ids() {
    let db = embervec::Database::open_in_memory();
    db.create_namespace("a", 2, DistanceMetric::Euclidean).unwrap();
    db.create_namespace("b", 2, DistanceMetric::Euclidean).unwrap();

    for i in 0..25 {
        let id = format!("shared-{i}");
        db.add_vector("a", &id, vec![i as f32, 0.0], None).unwrap();
    }

    for i in 0..25 {
        let id = format!("shared-{i}");
        assert!(db.get_vector("b", &id).is_err());
    }
    assert_eq!(db.get_vector("a", "shared-0").unwrap().values, vec![0.0, 0.0]);
}
