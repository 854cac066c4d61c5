//! Reciprocal Rank Fusion.
//!
//! `score(d) = Σ_lists weight / (k + rank(d))` with 1-indexed ranks. Only the
//! order within each list matters, so lists scored on incomparable scales
//! (cosine, term weights) can be combined.

use std::collections::HashMap;
use std::hash::Hash;

/// Standard RRF `k` from Cormack, Clarke and Buettcher (SIGIR 2009).
pub const RRF_K: f32 = 60.0;

/// Fuse ranked id lists with equal weight.
///
/// Output is sorted by fused score descending; ties break by id ascending so
/// the result is deterministic.
#[must_use]
pub fn reciprocal_rank_fusion<T>(lists: &[Vec<T>], k: f32) -> Vec<(T, f32)>
where
    T: Clone + Eq + Hash + Ord,
{
    let weighted: Vec<(f32, &[T])> = lists.iter().map(|l| (1.0, l.as_slice())).collect();
    weighted_rrf(&weighted, k)
}

/// Fuse ranked id lists, scaling each list's contributions by its weight.
///
/// An id repeated within one list only counts at its best rank.
#[must_use]
pub fn weighted_rrf<T>(lists: &[(f32, &[T])], k: f32) -> Vec<(T, f32)>
where
    T: Clone + Eq + Hash + Ord,
{
    let mut scores: HashMap<T, f32> = HashMap::new();
    for (weight, list) in lists {
        let mut seen: HashMap<&T, ()> = HashMap::with_capacity(list.len());
        for (rank, item) in list.iter().enumerate() {
            if seen.insert(item, ()).is_some() {
                continue;
            }
            #[allow(clippy::cast_precision_loss)]
            let position = (rank + 1) as f32;
            *scores.entry(item.clone()).or_insert(0.0) += weight / (k + position);
        }
    }

    let mut fused: Vec<(T, f32)> = scores.into_iter().collect();
    fused.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    fused
}

/// Highest fused score reachable: rank 1 in every list.
#[must_use]
pub fn max_rrf_score(weights: &[f32], k: f32) -> f32 {
    weights.iter().map(|w| w / (k + 1.0)).sum()
}
