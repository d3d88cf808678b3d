//! Fusion & reranking: merges several ranked retrieval lists into one.

mod borda;
mod rerank;
mod rrf;
mod weighted;

pub use rerank::{rerank_top_n, RerankError, Reranker, RerankedSource};

use crate::config::FusionConfig;
use crate::model::{Origin, Source};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FusionStrategy {
    Rrf,
    Weighted,
    Borda,
}

/// One store's ranked output, in ascending rank order (rank 1 first).
pub struct RankedList {
    pub origin: Origin,
    pub sources: Vec<Source>,
}

/// Fuse several per-origin ranked lists into one ranked, deduplicated list.
///
/// Deduplication key is `(origin, id)` *before* fusion: a source repeated
/// within the same origin's list contributes only its first occurrence, but
/// the same logical source surfacing from two different origins is fused as
/// two separate contributions (each origin's score participates).
pub fn fuse(lists: Vec<RankedList>, config: &FusionConfig) -> Vec<Source> {
    let weights = Weights {
        vector: config.weight_vector,
        graph: config.weight_graph,
        relational: config.weight_relational,
    };

    match config.strategy {
        FusionStrategy::Rrf => rrf::fuse_rrf(lists, config.k_rrf, &weights),
        FusionStrategy::Weighted => weighted::fuse_weighted(lists, &weights),
        FusionStrategy::Borda => borda::fuse_borda(lists, &weights),
    }
}

pub(crate) struct Weights {
    pub vector: f32,
    pub graph: f32,
    pub relational: f32,
}

impl Weights {
    pub(crate) fn for_origin(&self, origin: Origin) -> f32 {
        match origin {
            Origin::Vector => self.vector,
            Origin::Graph => self.graph,
            Origin::Relational => self.relational,
            // Agent-produced sources are fused alongside retrieval sources
            // with a neutral weight; they did not come from a ranked store list.
            Origin::Agent => 1.0,
        }
    }
}

/// Deduplicate each input list by `(origin, id)`, keeping first occurrence
/// and its 1-based position as that source's rank within its own list.
pub(crate) fn dedup_ranked(list: &RankedList) -> Vec<(Source, u32)> {
    let mut seen: HashMap<String, ()> = HashMap::new();
    let mut out = Vec::new();
    let mut rank = 0u32;
    for source in &list.sources {
        if seen.contains_key(&source.id) {
            continue;
        }
        rank += 1;
        seen.insert(source.id.clone(), ());
        out.push((source.clone(), rank));
    }
    out
}

/// Assigns final `rank` fields (1-based) to an already-ordered source list.
pub(crate) fn assign_ranks(mut sources: Vec<Source>) -> Vec<Source> {
    for (i, s) in sources.iter_mut().enumerate() {
        s.rank = (i + 1) as u32;
    }
    sources
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Source;

    fn src(id: &str, origin: Origin) -> Source {
        Source::new(id, origin, format!("content for {id}"))
    }

    #[test]
    fn fuse_is_idempotent_under_rrf() {
        let config = FusionConfig::default();
        let lists = vec![RankedList {
            origin: Origin::Vector,
            sources: vec![src("a", Origin::Vector), src("b", Origin::Vector)],
        }];
        let first = fuse(lists, &config);

        let lists2 = vec![RankedList {
            origin: Origin::Vector,
            sources: first.clone(),
        }];
        let second = fuse(lists2, &config);

        assert_eq!(
            first.iter().map(|s| &s.id).collect::<Vec<_>>(),
            second.iter().map(|s| &s.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn fuse_deduplicates_within_a_list() {
        let config = FusionConfig::default();
        let lists = vec![RankedList {
            origin: Origin::Vector,
            sources: vec![src("a", Origin::Vector), src("a", Origin::Vector)],
        }];
        let fused = fuse(lists, &config);
        assert_eq!(fused.len(), 1);
    }
}
