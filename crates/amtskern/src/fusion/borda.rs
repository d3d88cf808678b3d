//! Borda count fusion: each list awards `list_len - rank + 1` points to its
//! members; points are weighted per origin and summed.

use super::{assign_ranks, dedup_ranked, RankedList, Weights};
use crate::model::Source;
use std::collections::HashMap;

pub(super) fn fuse_borda(lists: Vec<RankedList>, weights: &Weights) -> Vec<Source> {
    let mut scores: HashMap<String, f32> = HashMap::new();
    let mut sources: HashMap<String, Source> = HashMap::new();

    for list in &lists {
        let w = weights.for_origin(list.origin);
        let deduped = dedup_ranked(list);
        let n = deduped.len() as u32;
        for (source, rank) in deduped {
            let points = (n - rank + 1) as f32;
            *scores.entry(source.id.clone()).or_insert(0.0) += w * points;
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
    assign_ranks(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Origin, Source};

    #[test]
    fn top_ranked_in_every_list_wins() {
        let weights = Weights {
            vector: 1.0,
            graph: 1.0,
            relational: 1.0,
        };
        let lists = vec![
            RankedList {
                origin: Origin::Vector,
                sources: vec![Source::new("a", Origin::Vector, "x"), Source::new("b", Origin::Vector, "x")],
            },
            RankedList {
                origin: Origin::Graph,
                sources: vec![Source::new("a", Origin::Graph, "x"), Source::new("b", Origin::Graph, "x")],
            },
        ];
        let fused = fuse_borda(lists, &weights);
        assert_eq!(fused[0].id, "a");
    }
}
