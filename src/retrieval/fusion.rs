use std::cmp::Ordering;
use std::collections::HashMap;

use crate::retrieval::{HitSource, SearchHit};

/// Contribution of one list position (1-based) to the fused score.
pub fn rrf_contribution(rank: usize, rrf_k: f64) -> f64 {
    1.0 / (rank as f64 + rrf_k)
}

#[derive(Debug)]
struct FusedEntry {
    hit: SearchHit,
    bm25_rank: Option<usize>,
    bm25_part: f64,
    vector_part: f64,
}

/// Reciprocal rank fusion of a BM25 list and a vector list, both best first.
///
/// Documents are keyed by `(item_id, chunk_id)`. Without `alpha` the two
/// contributions are summed. With `alpha`, a document found by both lists
/// scores `2 * ((1 - alpha) * bm25 + alpha * vector)`, so `0.5` matches the
/// plain sum; documents found by one list keep that list's contribution.
/// Ties fall back to the better BM25 rank, then to chunk id.
pub fn fuse(
    bm25_ranked: &[SearchHit],
    vector_ranked: &[SearchHit],
    k: usize,
    alpha: Option<f64>,
    rrf_k: f64,
) -> Vec<SearchHit> {
    let mut merged = HashMap::<(String, String), FusedEntry>::new();

    for (index, hit) in bm25_ranked.iter().enumerate() {
        let rank = index + 1;
        let entry = merged
            .entry((hit.item_id.clone(), hit.chunk_id.clone()))
            .or_insert_with(|| seed_entry(hit));
        entry.bm25_rank = Some(entry.bm25_rank.map_or(rank, |existing| existing.min(rank)));
        entry.bm25_part = entry.bm25_part.max(rrf_contribution(rank, rrf_k));
        entry.hit.relevance = entry.hit.relevance.max(hit.relevance);
        merge_source(&mut entry.hit, HitSource::Bm25);
    }

    for (index, hit) in vector_ranked.iter().enumerate() {
        let rank = index + 1;
        let entry = merged
            .entry((hit.item_id.clone(), hit.chunk_id.clone()))
            .or_insert_with(|| seed_entry(hit));
        entry.vector_part = entry.vector_part.max(rrf_contribution(rank, rrf_k));
        entry.hit.relevance = entry.hit.relevance.max(hit.relevance);
        if entry.hit.item_type.is_none() {
            entry.hit.item_type = hit.item_type.clone();
        }
        merge_source(&mut entry.hit, HitSource::Vector);
    }

    let alpha = alpha.map(|value| value.clamp(0.0, 1.0));
    let mut fused = merged
        .into_values()
        .map(|mut entry| {
            let both = entry.bm25_part > 0.0 && entry.vector_part > 0.0;
            entry.hit.score = match alpha {
                Some(alpha) if both => {
                    2.0 * ((1.0 - alpha) * entry.bm25_part + alpha * entry.vector_part)
                }
                _ => entry.bm25_part + entry.vector_part,
            };
            entry
        })
        .collect::<Vec<FusedEntry>>();

    fused.sort_by(compare_fused);
    fused.truncate(k);
    fused.into_iter().map(|entry| entry.hit).collect()
}

fn seed_entry(hit: &SearchHit) -> FusedEntry {
    let mut seeded = hit.clone();
    seeded.score = 0.0;
    seeded.sources = Vec::new();
    FusedEntry {
        hit: seeded,
        bm25_rank: None,
        bm25_part: 0.0,
        vector_part: 0.0,
    }
}

fn merge_source(hit: &mut SearchHit, source: HitSource) {
    if !hit.sources.contains(&source) {
        hit.sources.push(source);
        hit.sources.sort();
    }
}

fn compare_fused(left: &FusedEntry, right: &FusedEntry) -> Ordering {
    right
        .hit
        .score
        .partial_cmp(&left.hit.score)
        .unwrap_or(Ordering::Equal)
        .then_with(|| match (left.bm25_rank, right.bm25_rank) {
            (Some(left_rank), Some(right_rank)) => left_rank.cmp(&right_rank),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| left.hit.chunk_id.cmp(&right.hit.chunk_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(chunk_id: &str, source: HitSource) -> SearchHit {
        SearchHit {
            item_id: chunk_id.split('#').next().unwrap_or(chunk_id).to_string(),
            chunk_id: chunk_id.to_string(),
            heading: String::new(),
            preview: String::new(),
            score: 1.0,
            relevance: 0.5,
            item_type: None,
            sources: vec![source],
        }
    }

    fn ids(hits: &[SearchHit]) -> Vec<&str> {
        hits.iter().map(|hit| hit.chunk_id.as_str()).collect()
    }

    fn score_of(hits: &[SearchHit], chunk_id: &str) -> f64 {
        hits.iter()
            .find(|hit| hit.chunk_id == chunk_id)
            .map(|hit| hit.score)
            .unwrap_or(0.0)
    }

    #[test]
    fn empty_vector_list_preserves_bm25_order_and_truncation() {
        let bm25 = ["a#0", "b#0", "c#0", "d#0"]
            .iter()
            .map(|id| hit(id, HitSource::Bm25))
            .collect::<Vec<_>>();

        for alpha in [None, Some(0.0), Some(0.3), Some(1.0)] {
            let fused = fuse(&bm25, &[], 3, alpha, 60.0);
            assert_eq!(ids(&fused), vec!["a#0", "b#0", "c#0"]);
        }
    }

    #[test]
    fn empty_bm25_list_preserves_vector_order() {
        let vector = ["z#0", "y#0", "x#0"]
            .iter()
            .map(|id| hit(id, HitSource::Vector))
            .collect::<Vec<_>>();
        assert_eq!(ids(&fuse(&[], &vector, 5, None, 60.0)), vec!["z#0", "y#0", "x#0"]);
    }

    #[test]
    fn documents_in_both_lists_outrank_single_list_documents() {
        let bm25 = vec![hit("a#0", HitSource::Bm25), hit("b#0", HitSource::Bm25)];
        let vector = vec![hit("c#0", HitSource::Vector), hit("b#0", HitSource::Vector)];

        let fused = fuse(&bm25, &vector, 10, None, 60.0);
        assert_eq!(fused[0].chunk_id, "b#0");
        assert_eq!(fused[0].sources, vec![HitSource::Bm25, HitSource::Vector]);
        let expected = rrf_contribution(2, 60.0) * 2.0;
        assert!((fused[0].score - expected).abs() < 1e-12);
    }

    #[test]
    fn ties_break_on_bm25_rank_then_chunk_id() {
        let bm25 = vec![hit("m#0", HitSource::Bm25)];
        let vector = vec![hit("a#0", HitSource::Vector)];
        let fused = fuse(&bm25, &vector, 10, None, 60.0);
        assert_eq!(ids(&fused), vec!["m#0", "a#0"]);

        let vector_only = vec![hit("q#0", HitSource::Vector)];
        let more_vector = vec![hit("p#0", HitSource::Vector)];
        let left = fuse(&[], &vector_only, 10, None, 60.0);
        let right = fuse(&[], &more_vector, 10, None, 60.0);
        assert_eq!(left[0].score, right[0].score);
    }

    #[test]
    fn better_rank_never_lowers_fused_score() {
        let others = ["o1#0", "o2#0", "o3#0", "o4#0"];
        for alpha in [None, Some(0.0), Some(0.25), Some(0.5), Some(0.9)] {
            let mut previous = f64::MIN;
            for position in (0..=others.len()).rev() {
                let mut bm25 = others
                    .iter()
                    .map(|id| hit(id, HitSource::Bm25))
                    .collect::<Vec<_>>();
                bm25.insert(position, hit("t#0", HitSource::Bm25));
                let vector = vec![hit("o1#0", HitSource::Vector), hit("t#0", HitSource::Vector)];

                let score = score_of(&fuse(&bm25, &vector, 10, alpha, 60.0), "t#0");
                assert!(score >= previous, "score dropped at position {position}");
                previous = score;
            }
        }
    }

    #[test]
    fn alpha_reweights_documents_found_by_both_lists() {
        let bm25 = vec![hit("a#0", HitSource::Bm25), hit("b#0", HitSource::Bm25)];
        let vector = vec![hit("b#0", HitSource::Vector), hit("a#0", HitSource::Vector)];

        let lexical_heavy = fuse(&bm25, &vector, 2, Some(0.1), 60.0);
        assert_eq!(lexical_heavy[0].chunk_id, "a#0");
        let semantic_heavy = fuse(&bm25, &vector, 2, Some(0.9), 60.0);
        assert_eq!(semantic_heavy[0].chunk_id, "b#0");

        let even = fuse(&bm25, &vector, 2, Some(0.5), 60.0);
        let plain = fuse(&bm25, &vector, 2, None, 60.0);
        assert!((score_of(&even, "a#0") - score_of(&plain, "a#0")).abs() < 1e-12);
    }
}
