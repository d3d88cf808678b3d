//! Synthesis Driver: turns `{Query, AggregatedContext}` into a
//! [`SynthesizedResponse`] by streaming an LLM completion and post-processing
//! its text for citations and structured metadata.
//!
//! The streaming shape (`BoxTokenStream`/`StreamChunk`/`StreamError`) is
//! this workspace's provider-agnostic LLM streaming types, reused as-is —
//! they already generalize over any backend, which is exactly what's
//! needed here since the concrete LLM backend is wired in by the caller.

use crate::config::LlmConfig;
use crate::llm::streaming::{BoxTokenStream, StreamError};
use crate::model::{
    AggregatedContext, NextStep, Query, ResponseStatus, StructuredMetadata, SynthesizedResponse,
};
use crate::progress::ProgressBus;
use crate::template;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SynthesisError {
    #[error("LLM call failed before any text was produced: {0}")]
    Failed(String),
}

#[async_trait]
pub trait SynthesisLlm: Send + Sync {
    async fn stream(&self, prompt: &str, config: &LlmConfig) -> Result<BoxTokenStream, StreamError>;
}

const DEFAULT_PROMPT_TEMPLATE: &str = "Beantworte die folgende verwaltungsrechtliche Frage anhand des bereitgestellten Kontexts.\n\nFrage: {{query}}\n\nKontext:\n{{context}}\n\nBelege Aussagen mit [n]-Verweisen auf die Quellen. Gib am Ende optional einen JSON-Block mit \"next_steps\" und \"related_topics\" an.";

pub struct SynthesisDriver<'a> {
    llm: &'a dyn SynthesisLlm,
    progress: &'a ProgressBus,
    config: &'a LlmConfig,
}

impl<'a> SynthesisDriver<'a> {
    pub fn new(llm: &'a dyn SynthesisLlm, progress: &'a ProgressBus, config: &'a LlmConfig) -> Self {
        Self { llm, progress, config }
    }

    fn build_prompt(&self, query: &Query, context: &AggregatedContext) -> String {
        let rendered_context = context
            .sources
            .iter()
            .enumerate()
            .map(|(i, s)| format!("[{}] {}", i + 1, s.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut values = HashMap::new();
        values.insert("query".to_string(), query.text.clone());
        values.insert("context".to_string(), rendered_context);

        template::render(DEFAULT_PROMPT_TEMPLATE, &values)
            .unwrap_or_else(|_| format!("{}\n\n{}", query.text, query.session_id))
    }

    /// Streams the completion, forwarding each text delta to the progress
    /// bus as it arrives, then post-processes the accumulated text.
    /// `cancellation` is observed between chunks: if raised mid-stream, the
    /// LLM stream is dropped and a partial response is returned immediately
    /// with empty structured metadata, rather than waiting for more chunks.
    pub async fn synthesize(
        &self,
        query: &Query,
        context: &AggregatedContext,
        cancellation: CancellationToken,
    ) -> Result<SynthesizedResponse, SynthesisError> {
        let start = Instant::now();
        let prompt = self.build_prompt(query, context);

        let mut stream = self
            .llm
            .stream(&prompt, self.config)
            .await
            .map_err(|e| SynthesisError::Failed(e.to_string()))?;

        let mut accumulated = String::new();
        let mut stream_failed = false;
        let mut cancelled = false;

        loop {
            let item = tokio::select! {
                biased;
                _ = cancellation.cancelled() => {
                    cancelled = true;
                    break;
                }
                item = stream.next() => item,
            };
            match item {
                Some(Ok(chunk)) => {
                    if !chunk.delta.is_empty() {
                        accumulated.push_str(&chunk.delta);
                        self.progress
                            .publish(crate::model::ProgressEvent {
                                event_id: 0,
                                session_id: query.session_id.clone(),
                                stage: "synthesizing".to_string(),
                                status: crate::model::EventStatus::Progress,
                                payload: Value::String(chunk.delta.clone()),
                                ts_millis: 0,
                            })
                            .await;
                    }
                    if chunk.is_done() {
                        break;
                    }
                }
                Some(Err(err)) => {
                    warn!(error = %err, "synthesis stream errored");
                    stream_failed = true;
                    break;
                }
                None => break,
            }
        }

        if accumulated.is_empty() && stream_failed {
            return Err(SynthesisError::Failed("stream failed before any text was produced".into()));
        }

        let (answer_text, structured_metadata, citations) = if cancelled {
            (accumulated.trim().to_string(), StructuredMetadata::default(), Vec::new())
        } else {
            let (answer_text, structured_metadata) = extract_structured_metadata(&accumulated);
            let citations = extract_citations(&answer_text, context);
            (answer_text, structured_metadata, citations)
        };

        let status = if cancelled || stream_failed {
            ResponseStatus::Partial
        } else {
            ResponseStatus::Done
        };

        Ok(SynthesizedResponse {
            answer_text,
            citations,
            structured_metadata,
            confidence: if cancelled || stream_failed { 0.5 } else { 0.9 },
            model_id: self.config.model_id.clone(),
            duration_ms: start.elapsed().as_millis() as u64,
            agent_ids: context.agent_results.iter().map(|a| a.agent_id.clone()).collect(),
            source_ids: context.sources.iter().map(|s| s.id.clone()).collect(),
            status,
            part_index: None,
            part_count: None,
        })
    }
}

/// Strips the trailing/embedded JSON metadata block (if any) from `text`
/// and parses it into [`StructuredMetadata`]. Tries, in order: a fenced
/// ```json block, a trailing top-level object, any embedded object.
fn extract_structured_metadata(text: &str) -> (String, StructuredMetadata) {
    let Some((span, json_str)) = find_json_block(text) else {
        return (text.trim().to_string(), StructuredMetadata::default());
    };

    let Some(value) = parse_json_lenient(&json_str) else {
        return (text.trim().to_string(), StructuredMetadata::default());
    };

    let answer_text = format!("{}{}", &text[..span.0], &text[span.1..]).trim().to_string();

    let next_steps = value
        .get("next_steps")
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    Some(NextStep {
                        action: item.get("action")?.as_str()?.to_string(),
                        kind: item.get("type").and_then(|t| t.as_str()).unwrap_or("info").to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let related_topics = value
        .get("related_topics")
        .and_then(|v| v.as_array())
        .map(|arr| arr.iter().filter_map(|t| t.as_str().map(String::from)).collect())
        .unwrap_or_default();

    (
        answer_text,
        StructuredMetadata {
            next_steps,
            related_topics,
            raw_json: Some(value),
        },
    )
}

/// Locates a JSON object in `text`, returning its byte span and raw text.
fn find_json_block(text: &str) -> Option<((usize, usize), String)> {
    if let Some(fenced) = find_fenced_json(text) {
        return Some(fenced);
    }
    if let Some(trailing) = find_trailing_json_object(text) {
        return Some(trailing);
    }
    find_embedded_json_object(text)
}

fn find_fenced_json(text: &str) -> Option<((usize, usize), String)> {
    let start_marker = text.find("```json").or_else(|| text.find("```"))?;
    let body_start = start_marker + text[start_marker..].find('\n')? + 1;
    let end_marker = text[body_start..].find("```")? + body_start;
    let body = text[body_start..end_marker].to_string();
    let fence_end = end_marker + 3;
    Some(((start_marker, fence_end), body))
}

fn find_trailing_json_object(text: &str) -> Option<((usize, usize), String)> {
    let trimmed_end = text.trim_end();
    if !trimmed_end.ends_with('}') {
        return None;
    }
    let end = trimmed_end.len();
    let open = find_matching_open_brace(trimmed_end, end)?;
    Some(((open, end), text[open..end].to_string()))
}

fn find_embedded_json_object(text: &str) -> Option<((usize, usize), String)> {
    let open = text.find('{')?;
    let mut depth = 0i32;
    for (i, c) in text[open..].char_indices() {
        match c {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = open + i + 1;
                    return Some(((open, end), text[open..end].to_string()));
                }
            }
            _ => {}
        }
    }
    None
}

fn find_matching_open_brace(text: &str, end: usize) -> Option<usize> {
    let mut depth = 0i32;
    for (i, c) in text[..end].char_indices().rev() {
        match c {
            '}' => depth += 1,
            '{' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

/// Strict parse first; on failure, repairs trailing commas and single
/// quotes and retries once.
fn parse_json_lenient(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(raw) {
        return Some(value);
    }

    let no_trailing_commas = remove_trailing_commas(raw);
    if let Ok(value) = serde_json::from_str(&no_trailing_commas) {
        return Some(value);
    }

    let requoted = no_trailing_commas.replace('\'', "\"");
    serde_json::from_str(&requoted).ok()
}

fn remove_trailing_commas(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let chars: Vec<char> = raw.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ',' {
            let mut j = i + 1;
            while j < chars.len() && chars[j].is_whitespace() {
                j += 1;
            }
            if j < chars.len() && (chars[j] == '}' || chars[j] == ']') {
                i += 1;
                continue;
            }
        }
        out.push(chars[i]);
        i += 1;
    }
    out
}

/// Extracts `[n]`-style citation markers and resolves them against
/// `context.sources` by 1-based position. Out-of-range references are
/// dropped silently (logged, never surfaced as an error).
fn extract_citations(answer_text: &str, context: &AggregatedContext) -> Vec<String> {
    let mut citations = Vec::new();
    let mut chars = answer_text.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if c != '[' {
            continue;
        }
        let rest = &answer_text[i + 1..];
        let Some(close) = rest.find(']') else { continue };
        let digits = &rest[..close];
        if digits.is_empty() || !digits.chars().all(|d| d.is_ascii_digit()) {
            continue;
        }
        let Ok(index) = digits.parse::<usize>() else { continue };
        match context.sources.get(index.saturating_sub(1)) {
            Some(source) => {
                if !citations.contains(&source.id) {
                    citations.push(source.id.clone());
                }
            }
            None => {
                warn!(index, "citation marker references an out-of-range source, dropping");
            }
        }
    }

    citations
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Origin, Source};

    fn context_with_sources(n: usize) -> AggregatedContext {
        let mut context = AggregatedContext::default();
        for i in 0..n {
            context.sources.push(Source::new(format!("src-{i}"), Origin::Vector, "content"));
        }
        context
    }

    #[test]
    fn extracts_fenced_json_block_and_strips_it() {
        let text = "Die Antwort lautet so.\n\n```json\n{\"next_steps\": [{\"action\": \"Antrag stellen\", \"type\": \"action\"}], \"related_topics\": [\"Bauordnung\"]}\n```";
        let (answer, metadata) = extract_structured_metadata(text);
        assert_eq!(answer, "Die Antwort lautet so.");
        assert_eq!(metadata.next_steps.len(), 1);
        assert_eq!(metadata.next_steps[0].action, "Antrag stellen");
        assert_eq!(metadata.related_topics, vec!["Bauordnung".to_string()]);
    }

    #[test]
    fn falls_back_to_trailing_json_without_fence() {
        let text = r#"Die Antwort. {"next_steps": [], "related_topics": ["x"]}"#;
        let (answer, metadata) = extract_structured_metadata(text);
        assert_eq!(answer, "Die Antwort.");
        assert_eq!(metadata.related_topics, vec!["x".to_string()]);
    }

    #[test]
    fn tolerates_trailing_commas_and_single_quotes() {
        let text = "Antwort. {'next_steps': [], 'related_topics': ['y',],}";
        let (answer, metadata) = extract_structured_metadata(text);
        assert_eq!(answer, "Antwort.");
        assert_eq!(metadata.related_topics, vec!["y".to_string()]);
    }

    #[test]
    fn no_json_block_leaves_text_untouched() {
        let text = "Eine einfache Antwort ohne Metadaten.";
        let (answer, metadata) = extract_structured_metadata(text);
        assert_eq!(answer, text);
        assert!(metadata.raw_json.is_none());
    }

    #[test]
    fn resolves_citation_markers_to_source_ids() {
        let context = context_with_sources(2);
        let citations = extract_citations("Laut [1] und [2] gilt das.", &context);
        assert_eq!(citations, vec!["src-0".to_string(), "src-1".to_string()]);
    }

    #[test]
    fn drops_out_of_range_citation_markers() {
        let context = context_with_sources(1);
        let citations = extract_citations("Laut [1] und [9] gilt das.", &context);
        assert_eq!(citations, vec!["src-0".to_string()]);
    }
}
