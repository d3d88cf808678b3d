//! Reciprocal Rank Fusion.

use super::{assign_ranks, dedup_ranked, RankedList, Weights};
use crate::model::Source;
use std::collections::HashMap;

/// `score(s) = sum over lists containing s of w_origin / (k_rrf + rank_in_list)`.
///
/// Ties are broken by: higher total score, then higher similarity, then
/// lower summed rank, then lexicographic id — applied in that order so the
/// fused order is fully deterministic for a given input.
pub(super) fn fuse_rrf(lists: Vec<RankedList>, k_rrf: u32, weights: &Weights) -> Vec<Source> {
    let mut scores: HashMap<String, f64> = HashMap::new();
    let mut rank_sums: HashMap<String, u32> = HashMap::new();
    let mut sources: HashMap<String, Source> = HashMap::new();

    for list in &lists {
        let w = weights.for_origin(list.origin) as f64;
        for (source, rank) in dedup_ranked(list) {
            let contribution = w / (k_rrf as f64 + rank as f64);
            *scores.entry(source.id.clone()).or_insert(0.0) += contribution;
            *rank_sums.entry(source.id.clone()).or_insert(0) += rank;
            sources
                .entry(source.id.clone())
                .and_modify(|existing| {
                    // Keep the richer similarity score if one origin carries it.
                    if existing.scores.similarity.is_none() {
                        existing.scores.similarity = source.scores.similarity;
                    }
                })
                .or_insert(source);
        }
    }

    let mut ordered: Vec<Source> = sources.into_values().collect();
    ordered.sort_by(|a, b| {
        let score_a = scores[&a.id];
        let score_b = scores[&b.id];
        score_b
            .partial_cmp(&score_a)
            .unwrap()
            .then_with(|| {
                let sim_a = a.scores.similarity.unwrap_or(0.0);
                let sim_b = b.scores.similarity.unwrap_or(0.0);
                sim_b.partial_cmp(&sim_a).unwrap()
            })
            .then_with(|| rank_sums[&a.id].cmp(&rank_sums[&b.id]))
            .then_with(|| a.id.cmp(&b.id))
    });

    for s in ordered.iter_mut() {
        s.scores.rerank = None;
    }
    for s in &mut ordered {
        // Stash the fused score as a quality signal for downstream stages.
        s.scores.quality = Some(scores[&s.id] as f32);
    }

    assign_ranks(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Origin, Source};

    fn src(id: &str) -> Source {
        Source::new(id, Origin::Vector, "c")
    }

    #[test]
    fn rrf_score_matches_reference_formula() {
        let weights = Weights {
            vector: 0.5,
            graph: 0.3,
            relational: 0.2,
        };
        let lists = vec![
            RankedList {
                origin: Origin::Vector,
                sources: vec![src("a"), src("b")],
            },
            RankedList {
                origin: Origin::Graph,
                sources: vec![src("b"), src("a")],
            },
        ];
        let fused = fuse_rrf(lists, 60, &weights);

        // a: vector rank 1 -> 0.5/61, graph rank 2 -> 0.3/62
        let expect_a = 0.5 / 61.0 + 0.3 / 62.0;
        // b: vector rank 2 -> 0.5/62, graph rank 1 -> 0.3/61
        let expect_b = 0.5 / 62.0 + 0.3 / 61.0;

        let a = fused.iter().find(|s| s.id == "a").unwrap();
        let b = fused.iter().find(|s| s.id == "b").unwrap();
        assert!((a.scores.quality.unwrap() as f64 - expect_a).abs() < 1e-9);
        assert!((b.scores.quality.unwrap() as f64 - expect_b).abs() < 1e-9);
        assert_eq!(fused[0].id, "a");
    }

    #[test]
    fn ties_break_by_lexicographic_id() {
        let weights = Weights {
            vector: 1.0,
            graph: 1.0,
            relational: 1.0,
        };
        let lists = vec![RankedList {
            origin: Origin::Vector,
            sources: vec![src("z"), src("a")],
        }];
        // Different ranks so not truly tied; use equal-rank case via two lists instead.
        let lists2 = vec![
            RankedList {
                origin: Origin::Vector,
                sources: vec![src("z")],
            },
            RankedList {
                origin: Origin::Graph,
                sources: vec![src("a")],
            },
        ];
        let fused = fuse_rrf(lists2, 60, &weights);
        assert_eq!(fused[0].id, "a");
        let _ = lists;
    }
}
