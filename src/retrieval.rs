//! Retrieval engine for question answering.
//!
//! Embeds the query once, fans out one scoped index query per selected
//! document, deduplicates overlapping windows, merges the pools into a
//! single relevance ranking, and greedily packs whole context blocks into a
//! fixed character budget.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use tracing::debug;

use crate::config::RetrievalConfig;
use crate::embedding::{embed_query, Embedder};
use crate::extract::normalize_whitespace;
use crate::ingest::truncate_chars;
use crate::models::VectorMatch;
use crate::vector_index::VectorIndex;

/// Result of a retrieval pass. `context` is empty when nothing matched;
/// the caller proceeds unaugmented in that case.
#[derive(Debug, Default)]
pub struct Retrieval {
    pub matches: Vec<VectorMatch>,
    pub context: String,
    /// Heuristic confidence in percent, absent when nothing matched.
    pub confidence: Option<f32>,
}

pub struct RetrievalEngine {
    embedder: Arc<dyn Embedder>,
    index: Arc<dyn VectorIndex>,
    config: RetrievalConfig,
}

impl RetrievalEngine {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        index: Arc<dyn VectorIndex>,
        config: RetrievalConfig,
    ) -> Self {
        Self {
            embedder,
            index,
            config,
        }
    }

    /// Retrieve context for `query` over the given documents, all scoped to
    /// one tenant. Documents beyond the configured maximum are ignored.
    pub async fn retrieve(
        &self,
        query: &str,
        user_id: &str,
        document_ids: &[String],
    ) -> Result<Retrieval> {
        if query.trim().is_empty() || document_ids.is_empty() {
            return Ok(Retrieval::default());
        }

        let vector = embed_query(self.embedder.as_ref(), query).await?;

        let mut merged: Vec<VectorMatch> = Vec::new();
        for document_id in document_ids.iter().take(self.config.max_documents) {
            // Overfetch to survive the near-duplicates sliding windows produce.
            let candidates = self
                .index
                .query(
                    &vector,
                    self.config.per_doc_limit * 2,
                    user_id,
                    Some(document_id),
                )
                .await?;
            let kept = dedup_by_chunk_index(candidates, self.config.per_doc_limit);
            debug!(document_id = %document_id, kept = kept.len(), "per-document retrieval");
            merged.extend(kept);
        }

        // Stable: equal scores keep their per-document arrival order.
        merged.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let context = pack_context(
            &merged,
            self.config.context_budget_chars,
            self.config.block_cap_chars,
        );
        let confidence = confidence_percent(&merged);

        Ok(Retrieval {
            matches: merged,
            context,
            confidence,
        })
    }
}

/// Keep the first match per chunk index, in ranking order, up to `limit`.
pub fn dedup_by_chunk_index(candidates: Vec<VectorMatch>, limit: usize) -> Vec<VectorMatch> {
    let mut seen: HashSet<i64> = HashSet::new();
    let mut kept = Vec::with_capacity(limit);
    for candidate in candidates {
        if kept.len() >= limit {
            break;
        }
        if seen.insert(candidate.metadata.chunk_index) {
            kept.push(candidate);
        }
    }
    kept
}

/// Greedily pack labeled context blocks into `budget` characters. Each
/// block's text is whitespace-normalized and capped at `block_cap`; packing
/// stops at the first block that would overflow the remaining budget, and
/// blocks are never split.
pub fn pack_context(matches: &[VectorMatch], budget: usize, block_cap: usize) -> String {
    let mut out = String::new();
    let mut used = 0usize;

    for m in matches {
        let text = normalize_whitespace(&m.metadata.text);
        if text.is_empty() {
            continue;
        }
        let (text, _) = truncate_chars(&text, block_cap);

        let label = if m.metadata.title.is_empty() {
            m.metadata.document_id.clone()
        } else {
            m.metadata.title.clone()
        };
        let block = format!("[{}]\n{}", label, text);

        let cost = block.chars().count() + if out.is_empty() { 0 } else { 2 };
        if used + cost > budget {
            break;
        }
        if !out.is_empty() {
            out.push_str("\n\n");
        }
        out.push_str(&block);
        used += cost;
    }

    out
}

/// Mean match score mapped to percent, capped at 95.
pub fn confidence_percent(matches: &[VectorMatch]) -> Option<f32> {
    if matches.is_empty() {
        return None;
    }
    let mean: f32 = matches.iter().map(|m| m.score).sum::<f32>() / matches.len() as f32;
    Some((mean * 100.0).min(95.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ChunkMetadata;

    fn candidate(chunk_index: i64, score: f32, text: &str) -> VectorMatch {
        VectorMatch {
            id: format!("d1_{}", chunk_index),
            score,
            metadata: ChunkMetadata {
                user_id: "u1".into(),
                document_id: "d1".into(),
                chunk_index,
                text: text.into(),
                title: "Doc One".into(),
                file_name: "d1.pdf".into(),
                timestamp: 0,
            },
        }
    }

    #[test]
    fn dedup_keeps_first_per_chunk_index() {
        let pool = vec![
            candidate(3, 0.9, "a"),
            candidate(3, 0.8, "b"),
            candidate(1, 0.7, "c"),
            candidate(1, 0.6, "d"),
            candidate(2, 0.5, "e"),
        ];
        let kept = dedup_by_chunk_index(pool, 2);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].metadata.chunk_index, 3);
        assert_eq!(kept[0].score, 0.9);
        assert_eq!(kept[1].metadata.chunk_index, 1);
    }

    #[test]
    fn dedup_returns_fewer_when_pool_is_small() {
        let kept = dedup_by_chunk_index(vec![candidate(0, 0.5, "a")], 5);
        assert_eq!(kept.len(), 1);
    }

    #[test]
    fn packing_stops_at_the_first_overflowing_block() {
        let long = "word ".repeat(100);
        let matches = vec![
            candidate(0, 0.9, "lead text"),
            candidate(1, 0.8, &long),
            candidate(2, 0.7, "late text"),
        ];
        // The oversized second block ends packing; the lower-ranked third
        // block must not slip in behind it.
        let packed = pack_context(&matches, 60, 1000);
        assert!(packed.contains("lead text"));
        assert!(!packed.contains("word word"));
        assert!(!packed.contains("late text"));
    }

    #[test]
    fn packed_context_never_exceeds_budget() {
        let matches: Vec<VectorMatch> = (0..10)
            .map(|i| candidate(i, 0.9, "some chunk text here"))
            .collect();
        for budget in [0, 10, 40, 80, 200, 1000] {
            let packed = pack_context(&matches, budget, 1000);
            assert!(packed.chars().count() <= budget);
        }
    }

    #[test]
    fn larger_budgets_pack_supersets() {
        let matches: Vec<VectorMatch> = (0..6)
            .map(|i| candidate(i, 0.9, "block body"))
            .collect();
        let mut prev = String::new();
        for budget in [0, 30, 60, 120, 500] {
            let packed = pack_context(&matches, budget, 1000);
            assert!(packed.starts_with(&prev));
            prev = packed;
        }
    }

    #[test]
    fn packing_caps_individual_blocks() {
        let long = "x".repeat(5000);
        let matches = vec![candidate(0, 0.9, &long)];
        let packed = pack_context(&matches, 12_000, 1000);
        // Label line plus capped body.
        assert!(packed.chars().count() <= 1000 + "[Doc One]\n".len());
    }

    #[test]
    fn packing_labels_blocks_with_title() {
        let packed = pack_context(&[candidate(0, 0.9, "content")], 12_000, 1000);
        assert!(packed.starts_with("[Doc One]\n"));
    }

    #[test]
    fn empty_matches_pack_to_empty_context() {
        assert_eq!(pack_context(&[], 12_000, 1000), "");
    }

    #[test]
    fn confidence_is_mean_score_capped() {
        let matches = vec![candidate(0, 0.5, "a"), candidate(1, 0.7, "b")];
        let c = confidence_percent(&matches).unwrap();
        assert!((c - 60.0).abs() < 1e-3);

        let hot = vec![candidate(0, 0.99, "a"), candidate(1, 0.99, "b")];
        assert_eq!(confidence_percent(&hot), Some(95.0));

        assert_eq!(confidence_percent(&[]), None);
    }
}
