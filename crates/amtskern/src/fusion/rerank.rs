//! Optional LLM-based reranking pass applied to the top of a fused list.

use crate::model::Source;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RerankError {
    #[error("reranker call failed: {0}")]
    CallFailed(String),
}

/// A per-document relevance score in `[0, 1]` returned by a reranker call.
#[async_trait]
pub trait Reranker: Send + Sync {
    async fn score(&self, query: &str, candidates: &[&str]) -> Result<Vec<f32>, RerankError>;
}

/// A reranked document with its score history, per the fusion contract:
/// every pass must record `original_score`, `reranked_score`, and `delta`.
#[derive(Debug, Clone)]
pub struct RerankedSource {
    pub source: Source,
    pub original_score: f32,
    pub reranked_score: f32,
    pub delta: f32,
}

/// Rerank the top `top_n` of `fused` using `reranker`. On any call failure,
/// falls back to the original fused order unchanged (never fails the run).
pub async fn rerank_top_n(
    fused: Vec<Source>,
    query: &str,
    top_n: usize,
    reranker: &dyn Reranker,
) -> Vec<Source> {
    if fused.is_empty() {
        return fused;
    }
    let split = top_n.min(fused.len());
    let (head, tail) = fused.split_at(split);
    let tail = tail.to_vec();

    let candidates: Vec<&str> = head.iter().map(|s| s.content.as_str()).collect();
    let scores = match reranker.score(query, &candidates).await {
        Ok(scores) if scores.len() == head.len() => scores,
        _ => return [head.to_vec(), tail].concat(),
    };

    let mut reranked: Vec<RerankedSource> = head
        .iter()
        .zip(scores)
        .map(|(s, new_score)| {
            let original = s.scores.quality.unwrap_or(0.0);
            RerankedSource {
                source: s.clone(),
                original_score: original,
                reranked_score: new_score,
                delta: new_score - original,
            }
        })
        .collect();

    reranked.sort_by(|a, b| {
        b.reranked_score
            .partial_cmp(&a.reranked_score)
            .unwrap()
            .then_with(|| a.source.id.cmp(&b.source.id))
    });

    let mut result: Vec<Source> = reranked
        .into_iter()
        .map(|r| {
            let mut s = r.source;
            s.scores.rerank = Some(r.reranked_score);
            s
        })
        .collect();
    for (i, s) in result.iter_mut().enumerate() {
        s.rank = (i + 1) as u32;
    }
    let offset = result.len() as u32;
    let mut tail_sources = tail;
    for (i, s) in tail_sources.iter_mut().enumerate() {
        s.rank = offset + i as u32 + 1;
    }
    result.extend(tail_sources);
    result
}
