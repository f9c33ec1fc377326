use std::sync::Arc;

use crate::embeddings::{EmbeddingsStore, ScoredRecord};
use crate::error::Result;

/// Query interface over an [`EmbeddingsStore`]
#[derive(Clone)]
pub struct Retriever {
    store: Arc<EmbeddingsStore>,
    top_k: usize,
}

impl Retriever {
    pub fn new(store: Arc<EmbeddingsStore>, top_k: usize) -> Self {
        Self { store, top_k }
    }

    pub fn top_k(&self) -> usize {
        self.top_k
    }

    /// The `top_k` stored records most similar to `query`, best first
    pub async fn retrieve(&self, query: &str) -> Result<Vec<ScoredRecord>> {
        let start = std::time::Instant::now();
        let results = self.store.similarity_search(query, self.top_k).await?;
        log::debug!(
            "Retrieved {} record(s) in {:?} for query: {}",
            results.len(),
            start.elapsed(),
            query
        );
        Ok(results)
    }

    /// Retrieve and render the results as prompt context
    pub async fn context_for(&self, query: &str) -> Result<String> {
        Ok(format_context(&self.retrieve(query).await?))
    }
}

/// Record texts separated by blank lines
pub fn format_context(records: &[ScoredRecord]) -> String {
    records
        .iter()
        .map(|r| r.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Cosine similarity; 0.0 when either vector has zero magnitude or the
/// lengths differ
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if mag_a == 0.0 || mag_b == 0.0 {
        return 0.0;
    }

    dot / (mag_a * mag_b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::element::Metadata;
    use crate::ingest::segmenter::StructuredRecord;
    use crate::testing::BagOfWordsEmbedder;
    use tempfile::TempDir;

    #[test]
    fn test_cosine_similarity() {
        assert!((cosine_similarity(&[1.0, 0.0], &[1.0, 0.0]) - 1.0).abs() < 1e-6);
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-6);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
    }

    #[test]
    fn test_format_context() {
        let record = |text: &str| ScoredRecord {
            record_id: "r".to_string(),
            text: text.to_string(),
            metadata: Metadata::new(),
            score: 1.0,
        };
        assert_eq!(format_context(&[record("one"), record("two")]), "one\n\ntwo");
        assert_eq!(format_context(&[]), "");
    }

    #[tokio::test]
    async fn test_retriever_respects_top_k() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(
            EmbeddingsStore::open(temp_dir.path(), Arc::new(BagOfWordsEmbedder::default()))
                .await
                .unwrap(),
        );
        let records: Vec<StructuredRecord> = (0..6)
            .map(|i| StructuredRecord {
                question: None,
                answer: format!("note number {}", i),
                metadata: Metadata::new(),
                file: "knowledge/notes.md".to_string(),
            })
            .collect();
        store.upsert(&records, Some("knowledge/notes.md")).await.unwrap();

        let retriever = store.retriever(4);
        assert_eq!(retriever.retrieve("note").await.unwrap().len(), 4);
        assert!(retriever.context_for("note").await.unwrap().contains("note number"));
    }
}
