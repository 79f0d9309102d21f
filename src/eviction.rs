//! Eviction manager: LRU/LFU/TTL/score/hybrid policies that keep
//! a namespace within its storage budget, preserving permanent records.
//!
//! Each policy sorts (or filters) a candidate set pulled from a
//! [`VectorStore`] scan and deletes from the front until the configured
//! byte/count target is met.

use crate::metadata;
use crate::record::VectorRecord;
use crate::storage::VectorStore;
use std::time::Duration;

/// Which policy a sweep ran (or was suggested to run).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Evict least-recently-accessed first.
    Lru,
    /// Evict least-frequently-accessed first.
    Lfu,
    /// Evict everything older than a TTL.
    Ttl,
    /// Evict by a weighted access/priority/age score.
    Score,
    /// TTL first, then score for the remainder.
    Hybrid,
}

impl Strategy {
    /// Human-readable name, used in [`EvictionResult`] and log output.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Lru => "lru",
            Self::Lfu => "lfu",
            Self::Ttl => "ttl",
            Self::Score => "score",
            Self::Hybrid => "hybrid",
        }
    }
}

/// Eviction sweep configuration.
#[derive(Debug, Clone, Copy)]
pub struct EvictionConfig {
    /// Stop once total storage is at or below this many bytes. `None` means
    /// byte usage does not bound the sweep.
    pub target_bytes: Option<usize>,
    /// Stop once the record count is at or below this. `None` means count
    /// does not bound the sweep.
    pub max_vectors: Option<usize>,
    /// TTL threshold in seconds, used by [`Strategy::Ttl`] and the TTL phase
    /// of [`Strategy::Hybrid`].
    pub ttl_seconds: u64,
    /// When true, records with `metadata.permanent == true` are never
    /// candidates for eviction.
    pub preserve_permanent: bool,
    /// Deletions are issued in batches of this size so a large sweep does
    /// not monopolize the store.
    pub batch_size: usize,
}

impl Default for EvictionConfig {
    fn default() -> Self {
        Self {
            target_bytes: None,
            max_vectors: None,
            ttl_seconds: 7 * 24 * 3600,
            preserve_permanent: true,
            batch_size: 100,
        }
    }
}

/// Outcome of a single eviction sweep.
#[derive(Debug, Clone)]
pub struct EvictionResult {
    /// Number of records deleted.
    pub evicted_count: usize,
    /// Approximate bytes freed.
    pub freed_bytes: usize,
    /// Per-id errors encountered deleting a selected candidate; these do
    /// not halt the sweep.
    pub errors: Vec<(String, String)>,
    /// Wall-clock duration of the sweep.
    pub duration: Duration,
    /// The strategy that ran.
    pub strategy: Strategy,
}

/// Observed per-namespace statistics, used by [`suggest_strategy`].
#[derive(Debug, Clone, Copy)]
pub struct StoreStats {
    /// Total record count.
    pub total_records: usize,
    /// Fraction of records past their TTL under the configured threshold.
    pub expired_fraction: f32,
    /// Mean `access_count` across all records.
    pub mean_access_count: f32,
}

/// A strategy suggestion with human-readable reasoning.
#[derive(Debug, Clone)]
pub struct StrategySuggestion {
    /// Suggested strategy.
    pub strategy: Strategy,
    /// Why this strategy was suggested.
    pub reasoning: String,
}

/// Suggests a policy from observed store statistics.
#[must_use]
pub fn suggest_strategy(stats: &StoreStats) -> StrategySuggestion {
    if stats.expired_fraction > 0.2 {
        return StrategySuggestion {
            strategy: Strategy::Ttl,
            reasoning: format!(
                "{:.0}% of records are past the TTL threshold",
                stats.expired_fraction * 100.0
            ),
        };
    }
    if stats.mean_access_count > 2.0 {
        return StrategySuggestion {
            strategy: Strategy::Hybrid,
            reasoning: format!(
                "varied access patterns (mean access count {:.1} > 2)",
                stats.mean_access_count
            ),
        };
    }
    StrategySuggestion {
        strategy: Strategy::Lru,
        reasoning: "no strong signal; defaulting to recency-based eviction".to_string(),
    }
}

/// Runs an eviction sweep against `store` under `config`, using `strategy`.
///
/// `now_ms`/`now_secs` are supplied by the caller so the manager stays
/// testable without a wall-clock dependency.
///
/// # Errors
///
/// This function does not itself return an error: per-candidate delete
/// failures are collected into [`EvictionResult::errors`] rather than
/// aborting the sweep.
pub fn run(
    store: &dyn VectorStore,
    config: &EvictionConfig,
    strategy: Strategy,
    now_secs: u64,
    started: std::time::Instant,
) -> EvictionResult {
    let mut candidates = collect_candidates(store, config);

    match strategy {
        Strategy::Lru => sort_lru(&mut candidates),
        Strategy::Lfu => sort_lfu(&mut candidates),
        Strategy::Ttl => {
            let cutoff = now_secs.saturating_sub(config.ttl_seconds) * 1000;
            candidates.retain(|c| c.last_accessed_at < cutoff);
            sort_lru(&mut candidates);
        }
        Strategy::Score => sort_score(&mut candidates, now_secs),
        Strategy::Hybrid => {
            let cutoff_ms = now_secs.saturating_sub(config.ttl_seconds) * 1000;
            let (mut expired, mut rest): (Vec<_>, Vec<_>) =
                candidates.into_iter().partition(|c| c.last_accessed_at < cutoff_ms);
            sort_lru(&mut expired);

            let (current_bytes, current_count) = current_usage(store);
            if !would_meet_target(config, current_count, current_bytes, expired.len(), bytes_of(&expired)) {
                sort_score(&mut rest, now_secs);
                expired.extend(rest);
            }
            candidates = expired;
        }
    }

    evict_until_target(store, config, candidates, strategy, started)
}

struct Candidate {
    id: String,
    last_accessed_at: u64,
    created_at: u64,
    access_count: u64,
    size_bytes: usize,
    priority: f32,
}

fn collect_candidates(store: &dyn VectorStore, config: &EvictionConfig) -> Vec<Candidate> {
    let mut out = Vec::new();
    let _ = store.scan(&mut |record: &VectorRecord| {
        if config.preserve_permanent && record.is_permanent() {
            return;
        }
        out.push(Candidate {
            id: record.id.clone(),
            last_accessed_at: record.last_accessed_at,
            created_at: record.created_at,
            access_count: record.access_count,
            size_bytes: record.approx_size_bytes(),
            priority: metadata::priority(record.metadata.as_ref()),
        });
    });
    out
}

fn sort_lru(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.last_accessed_at
            .cmp(&b.last_accessed_at)
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

fn sort_lfu(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| {
        a.access_count
            .cmp(&b.access_count)
            .then_with(|| a.last_accessed_at.cmp(&b.last_accessed_at))
    });
}

/// `score = 0.3*log(1+access_count) + 0.4*priority + 0.2*exp(-age_since_access_days)
///  + 0.1*exp(-age_days/7)`; lowest scores are evicted first.
fn sort_score(candidates: &mut [Candidate], now_secs: u64) {
    let now_ms = now_secs * 1000;
    let score_of = |c: &Candidate| -> f32 {
        let access_term = 0.3 * (1.0 + c.access_count as f32).ln();
        let priority_term = 0.4 * c.priority;
        let since_access_days = (now_ms.saturating_sub(c.last_accessed_at)) as f32 / 86_400_000.0;
        let recency_term = 0.2 * (-since_access_days).exp();
        let age_days = (now_ms.saturating_sub(c.created_at)) as f32 / 86_400_000.0;
        let age_term = 0.1 * (-age_days / 7.0).exp();
        access_term + priority_term + recency_term + age_term
    };
    candidates.sort_by(|a, b| score_of(a).total_cmp(&score_of(b)));
}

fn bytes_of(candidates: &[Candidate]) -> usize {
    candidates.iter().map(|c| c.size_bytes).sum()
}

fn current_usage(store: &dyn VectorStore) -> (usize, usize) {
    (store.approx_size_bytes(), store.count())
}

fn would_meet_target(
    config: &EvictionConfig,
    current_count: usize,
    current_bytes: usize,
    evicting_count: usize,
    evicting_bytes: usize,
) -> bool {
    let bytes_ok = config
        .target_bytes
        .is_none_or(|target| current_bytes.saturating_sub(evicting_bytes) <= target);
    let count_ok = config
        .max_vectors
        .is_none_or(|max| current_count.saturating_sub(evicting_count) <= max);
    bytes_ok && count_ok
}

fn evict_until_target(
    store: &dyn VectorStore,
    config: &EvictionConfig,
    candidates: Vec<Candidate>,
    strategy: Strategy,
    started: std::time::Instant,
) -> EvictionResult {
    let (mut used_bytes, mut used_count) = current_usage(store);
    let mut evicted_count = 0;
    let mut freed_bytes = 0;
    let mut errors = Vec::new();

    // TTL runs unconditionally against every expired candidate; the other
    // strategies stop as soon as the byte/count target is satisfied.
    let unconditional = matches!(strategy, Strategy::Ttl);

    for batch in candidates.chunks(config.batch_size.max(1)) {
        if !unconditional {
            let target_met = config.target_bytes.is_some_and(|t| used_bytes <= t)
                || config.max_vectors.is_some_and(|m| used_count <= m);
            if target_met {
                break;
            }
        }

        for candidate in batch {
            match store.delete(&candidate.id) {
                Ok(()) => {
                    evicted_count += 1;
                    freed_bytes += candidate.size_bytes;
                    used_bytes = used_bytes.saturating_sub(candidate.size_bytes);
                    used_count = used_count.saturating_sub(1);
                }
                Err(e) => errors.push((candidate.id.clone(), e.to_string())),
            }

            if !unconditional {
                let target_met = config.target_bytes.is_some_and(|t| used_bytes <= t)
                    || config.max_vectors.is_some_and(|m| used_count <= m);
                if target_met {
                    break;
                }
            }
        }
    }

    EvictionResult {
        evicted_count,
        freed_bytes,
        errors,
        duration: started.elapsed(),
        strategy,
    }
}
