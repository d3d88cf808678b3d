//! Weighted-sum fusion: normalises each list's native score to [0,1] then
//! takes a weighted sum across origins, so stores with differently-scaled
//! relevance metrics (cosine similarity vs. graph distance vs. relational
//! rank) combine fairly.

use super::{assign_ranks, dedup_ranked, RankedList, Weights};
use crate::model::{Origin, Source};
use std::collections::HashMap;

fn native_score(source: &Source, list_len: usize, rank: u32) -> f32 {
    if let Some(sim) = source.scores.similarity {
        return sim;
    }
    // No native [0,1] score available (graph distance, relational rank) —
    // fall back to a position-based score so longer lists don't dominate.
    if list_len <= 1 {
        1.0
    } else {
        1.0 - ((rank - 1) as f32 / (list_len - 1) as f32)
    }
}

pub(super) fn fuse_weighted(lists: Vec<RankedList>, weights: &Weights) -> Vec<Source> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut sources: HashMap<String, Source> = HashMap::new();

    for list in &lists {
        let w = weights.for_origin(list.origin);
        let deduped = dedup_ranked(list);
        let n = deduped.len();
        for (source, rank) in deduped {
            let ns = native_score(&source, n, rank);
            *scores.entry(source.id.clone()).or_insert(0.0) += w * ns;
            sources.entry(source.id.clone()).or_insert(source);
        }
    }

    let mut ordered: Vec<Source> = sources.into_values().collect();
    ordered.sort_by(|a, b| {
        scores[&b.id]
            .partial_cmp(&scores[&a.id])
            .unwrap()
            .then_with(|| a.id.cmp(&b.id))
    });
    for s in &mut ordered {
        s.scores.quality = Some(scores[&s.id]);
    }
    let _ = Origin::Agent;
    assign_ranks(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    #[test]
    fn higher_similarity_ranks_first() {
        let weights = Weights {
            vector: 1.0,
            graph: 1.0,
            relational: 1.0,
        };
        let mut low = Source::new("low", Origin::Vector, "x");
        low.scores.similarity = Some(0.2);
        let mut high = Source::new("high", Origin::Vector, "x");
        high.scores.similarity = Some(0.9);

        let fused = fuse_weighted(
            vec![RankedList {
                origin: Origin::Vector,
                sources: vec![low, high],
            }],
            &weights,
        );
        assert_eq!(fused[0].id, "high");
    }
}
