//! Reciprocal Rank Fusion.
//!
//! `score(address) = Σ 1 / (k + rank)` over every list the address appears
//! in, with 1-based ranks. Absence from a list contributes nothing. Only the
//! positions of candidates matter; the per-pass scores are never compared.
//!
//! The terms of a sum are added in ascending rank order, not list order, so
//! candidates holding the same ranks in different lists get bit-identical
//! scores and fall through to the address tie-break.

use std::collections::HashMap;

use crate::address::Address;

/// Default RRF smoothing constant.
pub const DEFAULT_RRF_K: f64 = 60.0;

/// One address after fusion.
#[derive(Debug, Clone, PartialEq)]
pub struct FusedCandidate {
    pub address: Address,
    pub score: f64,
    /// 1-based rank in each input list, `None` where absent
    pub ranks: Vec<Option<usize>>,
}

/// Fuse ranked candidate lists into one list ordered by descending fused
/// score, ties broken by address ascending.
///
/// If an address repeats inside one list, only its first position counts.
pub fn reciprocal_rank_fusion(lists: &[Vec<Address>], k: f64) -> Vec<FusedCandidate> {
    let mut fused: HashMap<&Address, FusedCandidate> = HashMap::new();

    for (list_idx, list) in lists.iter().enumerate() {
        for (position, address) in list.iter().enumerate() {
            let rank = position + 1;
            let entry = fused.entry(address).or_insert_with(|| FusedCandidate {
                address: address.clone(),
                score: 0.0,
                ranks: vec![None; lists.len()],
            });
            if entry.ranks[list_idx].is_none() {
                entry.ranks[list_idx] = Some(rank);
            }
        }
    }

    let mut results: Vec<FusedCandidate> = fused.into_values().collect();
    for candidate in &mut results {
        let mut ranks: Vec<usize> = candidate.ranks.iter().flatten().copied().collect();
        ranks.sort_unstable();
        candidate.score = ranks.iter().map(|&rank| 1.0 / (k + rank as f64)).sum();
    }
    results.sort_by(|a, b| {
        b.score
            .total_cmp(&a.score)
            .then_with(|| a.address.cmp(&b.address))
    });
    results
}
