//! End-to-end scenarios exercising the public `Database` API the way a
//! host application would, across the namespace/search/index/eviction/quota
//! seams.

use embervec::config::EmbervecConfig;
use embervec::distance::DistanceMetric;
use embervec::eviction::Strategy;
use embervec::namespace::IndexStrategy;
use embervec::quota::Severity;
use serde_json::json;
use std::sync::{Arc, Mutex};

/// Cosine brute force ordering and exact scores.
#[test]
fn cosine_brute_force_orders_and_scores_correctly() {
    let db = embervec::Database::open_in_memory();
    db.create_namespace("vectors", 3, DistanceMetric::Cosine).unwrap();
    db.add_vector("vectors", "a", vec![1.0, 0.0, 0.0], None).unwrap();
    db.add_vector("vectors", "b", vec![0.0, 1.0, 0.0], None).unwrap();
    let inv_sqrt2 = 1.0 / std::f32::consts::SQRT_2;
    db.add_vector("vectors", "c", vec![inv_sqrt2, inv_sqrt2, 0.0], None)
        .unwrap();

    let hits = db.search("vectors", &[1.0, 0.0, 0.0], 3, None).unwrap();
    let ids: Vec<&str> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["a", "c", "b"]);

    assert!((hits[0].score - 1.0).abs() < 1e-5);
    assert!((hits[1].score - 0.853_55).abs() < 1e-3);
    assert!((hits[2].score - 0.5).abs() < 1e-5);
}

/// Compound `$and`/`$gte` filter admits only the matching record.
#[test]
fn compound_filter_admits_only_the_matching_record() {
    let db = embervec::Database::open_in_memory();
    db.create_namespace("items", 2, DistanceMetric::Euclidean).unwrap();
    db.add_vector("items", "1", vec![0.0, 0.0], Some(json!({"group": "A", "value": 1})))
        .unwrap();
    db.add_vector("items", "2", vec![1.0, 1.0], Some(json!({"group": "B", "value": 2})))
        .unwrap();
    db.add_vector("items", "3", vec![2.0, 2.0], Some(json!({"group": "A", "value": 3})))
        .unwrap();

    let filter = json!({"$and": [{"group": "A"}, {"value": {"$gte": 2}}]});
    let hits = db.search("items", &[0.0, 0.0], 10, Some(&filter)).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, "3");
}

/// Disabling indexing falls back to brute force, and `rebuild_index`
/// after re-enabling recovers a near-identical top-k.
#[test]
fn index_rebuild_recovers_consistent_top_k() {
    let mut config = EmbervecConfig::default();
    config.index.ef_search = 200;
    let db = embervec::Database::open(config);
    db.create_namespace("big", 8, DistanceMetric::Euclidean).unwrap();

    let mut rng_state: u64 = 0x2545_F491_4F6C_DD1D;
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state >> 40) as f32 / (1u64 << 24) as f32
    };

    for i in 0..1_000 {
        let values: Vec<f32> = (0..8).map(|_| next()).collect();
        db.add_vector("big", &format!("v{i}"), values, None).unwrap();
    }

    let query: Vec<f32> = (0..8).map(|j| (j as f32) * 0.1).collect();

    db.set_indexing("big", IndexStrategy::Brute).unwrap();
    let brute_hits = db.search("big", &query, 10, None).unwrap();
    let brute_ids: std::collections::HashSet<String> =
        brute_hits.into_iter().map(|h| h.id).collect();

    db.set_indexing("big", IndexStrategy::Hnsw).unwrap();
    db.rebuild_index("big").unwrap();
    let indexed_hits = db.search("big", &query, 10, None).unwrap();
    let indexed_ids: std::collections::HashSet<String> =
        indexed_hits.into_iter().map(|h| h.id).collect();

    let overlap = brute_ids.intersection(&indexed_ids).count();
    assert!(overlap >= 9, "expected >=9 overlap, got {overlap}");
}

/// LRU eviction under a byte target preserves permanent records and
/// removes exactly the oldest-accessed remainder.
#[test]
fn lru_eviction_respects_target_and_permanence() {
    // Zero-padded ids keep every temp record's `approx_size_bytes()` equal,
    // so the byte target below maps to an exact record count. The target
    // has to account for the 5 permanent records' bytes too, since they
    // stay resident and still count toward total usage.
    let temp_size = embervec::record::VectorRecord::new("temp00".into(), vec![0.0], None, 0).approx_size_bytes();
    let perm_size =
        embervec::record::VectorRecord::new("perm0".into(), vec![0.0], Some(json!({"permanent": true})), 0)
            .approx_size_bytes();
    let target_bytes = perm_size * 5 + temp_size * 35;

    let mut config = EmbervecConfig::default();
    config.eviction.target_bytes = Some(target_bytes);
    let db = embervec::Database::open(config);
    db.create_namespace("docs", 1, DistanceMetric::Euclidean).unwrap();

    for i in 0..5 {
        db.add_vector("docs", &format!("perm{i}"), vec![i as f32], Some(json!({"permanent": true})))
            .unwrap();
    }
    for i in 0..95 {
        db.add_vector("docs", &format!("temp{i:02}"), vec![i as f32], None).unwrap();
    }

    let before = db.get_eviction_stats("docs").unwrap();
    assert_eq!(before.total_records, 100);

    let evicted = db.evict_vectors("docs", Some(Strategy::Lru)).unwrap();
    assert_eq!(evicted.evicted_count, 60);

    for i in 0..5 {
        assert!(db.get_vector("docs", &format!("perm{i}")).is_ok());
    }
    let after = db.get_eviction_stats("docs").unwrap();
    assert_eq!(after.total_records, 40);
}

/// PQ asymmetric search achieves reasonable recall against brute-force
/// cosine on held-out queries.
#[test]
fn product_quantization_asymmetric_distance_tracks_true_distance() {
    use embervec::quantization::{ProductQuantizer, ProductQuantizerConfig};

    let dim = 32;
    let mut rng_state: u64 = 0x9E37_79B9_7F4A_7C15;
    let mut next = || {
        rng_state ^= rng_state << 13;
        rng_state ^= rng_state >> 7;
        rng_state ^= rng_state << 17;
        (rng_state >> 40) as f32 / (1u64 << 24) as f32
    };

    let training: Vec<Vec<f32>> = (0..1_000)
        .map(|_| (0..dim).map(|_| next()).collect())
        .collect();

    let mut pq = ProductQuantizer::new(ProductQuantizerConfig {
        m: 4,
        k: 16,
        ..ProductQuantizerConfig::default()
    });
    pq.train(&training).unwrap();
    assert!(pq.is_trained());

    let mut hits = 0;
    let queries: Vec<Vec<f32>> = (0..50).map(|_| (0..dim).map(|_| next()).collect()).collect();
    for query in &queries {
        let mut brute: Vec<(usize, f32)> = training
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let d: f32 = v.iter().zip(query).map(|(a, b)| (a - b).powi(2)).sum::<f32>().sqrt();
                (i, d)
            })
            .collect();
        brute.sort_by(|a, b| a.1.total_cmp(&b.1));
        let true_top = brute[0].0;

        let mut approx: Vec<(usize, f32)> = training
            .iter()
            .enumerate()
            .map(|(i, v)| {
                let code = pq.encode(v).unwrap();
                (i, pq.asymmetric_distance(query, &code).unwrap())
            })
            .collect();
        approx.sort_by(|a, b| a.1.total_cmp(&b.1));
        let approx_top10: std::collections::HashSet<usize> = approx.iter().take(10).map(|(i, _)| *i).collect();
        if approx_top10.contains(&true_top) {
            hits += 1;
        }
    }

    let recall = hits as f32 / queries.len() as f32;
    assert!(recall >= 0.5, "recall@10 was {recall}, expected >= 0.5");
}

/// Crossing the hard limit fires exactly one emergency event, triggers
/// auto-eviction, and the next sample reports usage back under the
/// critical fraction.
#[test]
fn quota_emergency_triggers_auto_eviction_and_recovers() {
    let mut config = EmbervecConfig::default();
    config.quota.hard_limit_bytes = 4_000;
    config.quota.warning_fraction = 0.8;
    config.quota.critical_fraction = 0.85;
    config.quota.emergency_fraction = 0.95;
    let db = embervec::Database::open(config);
    db.create_namespace("docs", 4, DistanceMetric::Euclidean).unwrap();

    let severities: Arc<Mutex<Vec<Severity>>> = Arc::new(Mutex::new(Vec::new()));
    let recorder = Arc::clone(&severities);
    db.on_quota_warning(move |event| recorder.lock().unwrap().push(event.severity));

    let mut i = 0;
    loop {
        db.add_vector("docs", &format!("v{i}"), vec![0.0, 0.0, 0.0, 0.0], None).unwrap();
        i += 1;
        if severities.lock().unwrap().iter().any(|s| *s == Severity::Emergency) {
            break;
        }
        assert!(i < 2_000, "never reached an emergency event");
    }

    let emergencies = severities
        .lock()
        .unwrap()
        .iter()
        .filter(|s| **s == Severity::Emergency)
        .count();
    assert_eq!(emergencies, 1);

    let quota = db.get_storage_quota();
    let ratio = quota.used_bytes as f64 / quota.limit_bytes as f64;
    assert!(ratio < 0.85, "usage ratio after auto-eviction was {ratio}");
}
