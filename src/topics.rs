//! Embedding-based topic classification.
//!
//! Documents are tagged against a fixed subject taxonomy by comparing an
//! excerpt embedding with precomputed label embeddings. Label vectors are
//! computed once per process through [`LabelCache`], which is injected so
//! tests can reset it and substitute deterministic embedders.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::RwLock;
use tracing::debug;

use crate::config::TopicsConfig;
use crate::embedding::{cosine_similarity, embed_query, Embedder};
use crate::ingest::truncate_chars;
use crate::store::Store;

/// Tag applied at upload time, removed once real topics are known.
pub const UPLOADED_TAG: &str = "uploaded";

/// Subject taxonomy. Each label embeds with a descriptive sentence so the
/// comparison is against the subject, not the bare word.
pub const TAXONOMY: &[(&str, &str)] = &[
    ("mathematics", "Mathematics: algebra, calculus, geometry, proofs, and mathematical notation."),
    ("physics", "Physics: mechanics, thermodynamics, electromagnetism, and quantum theory."),
    ("chemistry", "Chemistry: chemical reactions, molecules, compounds, and the periodic table."),
    ("biology", "Biology: cells, genetics, evolution, anatomy, and living organisms."),
    ("computer-science", "Computer science: algorithms, programming, data structures, and software."),
    ("engineering", "Engineering: mechanical, electrical, and civil design and construction."),
    ("medicine", "Medicine: diseases, treatments, pharmacology, and clinical practice."),
    ("psychology", "Psychology: cognition, behavior, mental health, and the human mind."),
    ("economics", "Economics: markets, finance, trade, supply and demand, and monetary policy."),
    ("business", "Business: management, marketing, entrepreneurship, and corporate strategy."),
    ("law", "Law: legislation, contracts, courts, rights, and legal procedure."),
    ("history", "History: past events, civilizations, wars, and historical figures."),
    ("philosophy", "Philosophy: ethics, logic, metaphysics, and schools of thought."),
    ("literature", "Literature: novels, poetry, literary analysis, and writing craft."),
    ("language", "Language learning: grammar, vocabulary, translation, and linguistics."),
    ("arts", "Arts: painting, music, film, design, and art history."),
    ("social-science", "Social science: sociology, anthropology, politics, and human society."),
];

struct LabelVector {
    label: String,
    vector: Vec<f32>,
}

/// Process-wide cache of taxonomy embeddings.
#[derive(Default)]
pub struct LabelCache {
    vectors: RwLock<Option<Arc<Vec<LabelVector>>>>,
}

impl LabelCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Embed the taxonomy on first use; later callers share the result.
    async fn get_or_init(&self, embedder: &dyn Embedder) -> Result<Arc<Vec<LabelVector>>> {
        if let Some(cached) = self.vectors.read().await.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let mut slot = self.vectors.write().await;
        if let Some(cached) = slot.as_ref() {
            return Ok(Arc::clone(cached));
        }

        let descriptions: Vec<String> =
            TAXONOMY.iter().map(|(_, d)| d.to_string()).collect();
        let embedded = embedder.embed(&descriptions).await?;
        if embedded.len() != TAXONOMY.len() {
            return Err(anyhow!(
                "expected {} label vectors, got {}",
                TAXONOMY.len(),
                embedded.len()
            ));
        }

        let vectors: Arc<Vec<LabelVector>> = Arc::new(
            TAXONOMY
                .iter()
                .zip(embedded)
                .map(|((label, _), vector)| LabelVector {
                    label: label.to_string(),
                    vector,
                })
                .collect(),
        );
        *slot = Some(Arc::clone(&vectors));
        debug!(labels = vectors.len(), "taxonomy embeddings initialized");
        Ok(vectors)
    }

    /// Drop cached vectors, forcing re-embedding on next use.
    pub async fn reset(&self) {
        *self.vectors.write().await = None;
    }
}

pub struct TopicClassifier {
    store: Store,
    embedder: Arc<dyn Embedder>,
    cache: Arc<LabelCache>,
    config: TopicsConfig,
}

impl TopicClassifier {
    pub fn new(
        store: Store,
        embedder: Arc<dyn Embedder>,
        cache: Arc<LabelCache>,
        config: TopicsConfig,
    ) -> Self {
        Self {
            store,
            embedder,
            cache,
            config,
        }
    }

    /// Classify a document and persist the merged tag set. Returns the tags
    /// now on the document. A document with no text to classify keeps its
    /// existing tags, including the provisional upload tag.
    pub async fn classify_document(&self, user_id: &str, document_id: &str) -> Result<Vec<String>> {
        let document = self
            .store
            .get_document(user_id, document_id)
            .await?
            .ok_or_else(|| anyhow!("document {} not found", document_id))?;

        let body = document.content_raw.as_deref().unwrap_or_default();
        let excerpt = {
            let combined = format!("{}\n{}", document.title, body);
            truncate_chars(combined.trim(), self.config.excerpt_chars).0
        };

        if excerpt.is_empty() {
            debug!(document_id, "no content to classify, keeping existing tags");
            return Ok(document.tags);
        }

        let label_vectors = self.cache.get_or_init(self.embedder.as_ref()).await?;
        let excerpt_vector = embed_query(self.embedder.as_ref(), &excerpt).await?;

        let scores: Vec<(String, f32)> = label_vectors
            .iter()
            .map(|lv| (lv.label.clone(), cosine_similarity(&excerpt_vector, &lv.vector)))
            .collect();
        let labels = select_labels(scores, self.config.threshold, self.config.max_labels);

        let tags = merge_tags(&document.tags, &labels);
        self.store.set_tags(user_id, document_id, &tags).await?;
        Ok(tags)
    }
}

/// Pick labels scoring at or above `threshold`, best first, up to `max`.
/// When nothing clears the threshold the single best label is used, so a
/// classified document always carries at least one topic.
pub fn select_labels(mut scores: Vec<(String, f32)>, threshold: f32, max: usize) -> Vec<String> {
    if scores.is_empty() {
        return Vec::new();
    }
    scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let passing: Vec<String> = scores
        .iter()
        .take_while(|(_, s)| *s >= threshold)
        .take(max)
        .map(|(l, _)| l.clone())
        .collect();

    if passing.is_empty() {
        vec![scores[0].0.clone()]
    } else {
        passing
    }
}

/// Union of existing tags and new labels, order-preserving, with the
/// provisional upload tag removed.
pub fn merge_tags(existing: &[String], labels: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = Vec::new();
    for tag in existing.iter().chain(labels.iter()) {
        if tag == UPLOADED_TAG {
            continue;
        }
        if !merged.iter().any(|t| t == tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn labels_above_threshold_win() {
        let scores = vec![
            ("physics".to_string(), 0.6),
            ("history".to_string(), 0.1),
            ("chemistry".to_string(), 0.4),
        ];
        assert_eq!(select_labels(scores, 0.25, 3), vec!["physics", "chemistry"]);
    }

    #[test]
    fn label_count_is_capped() {
        let scores = vec![
            ("a".to_string(), 0.9),
            ("b".to_string(), 0.8),
            ("c".to_string(), 0.7),
            ("d".to_string(), 0.6),
        ];
        assert_eq!(select_labels(scores, 0.25, 3).len(), 3);
    }

    #[test]
    fn best_label_wins_when_nothing_clears_threshold() {
        let scores = vec![("physics".to_string(), 0.2), ("history".to_string(), 0.1)];
        assert_eq!(select_labels(scores, 0.25, 3), vec!["physics"]);
    }

    #[test]
    fn merge_drops_upload_tag_and_duplicates() {
        let existing = vec![UPLOADED_TAG.to_string(), "physics".to_string()];
        let labels = vec!["physics".to_string(), "mathematics".to_string()];
        assert_eq!(merge_tags(&existing, &labels), vec!["physics", "mathematics"]);
    }

    struct CountingEmbedder {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for CountingEmbedder {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn model_name(&self) -> &str {
            "counting"
        }

        fn dims(&self) -> usize {
            2
        }
    }

    #[tokio::test]
    async fn label_cache_embeds_once_until_reset() {
        let embedder = CountingEmbedder {
            calls: AtomicUsize::new(0),
        };
        let cache = LabelCache::new();

        cache.get_or_init(&embedder).await.unwrap();
        cache.get_or_init(&embedder).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);

        cache.reset().await;
        cache.get_or_init(&embedder).await.unwrap();
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn taxonomy_labels_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for (label, _) in TAXONOMY {
            assert!(seen.insert(*label), "duplicate label {}", label);
        }
        assert_eq!(TAXONOMY.len(), 17);
    }
}
