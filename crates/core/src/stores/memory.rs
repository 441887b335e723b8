//! In-process [`VectorIndex`] with brute-force cosine search.

use crate::embeddings::cosine_similarity;
use crate::error::BackendError;
use crate::models::{IndexHit, KeywordDocument, Passage, QueryFilters};
use crate::traits::{ensure_unique_ids, VectorIndex};
use std::collections::BTreeMap;
use std::sync::RwLock;

#[derive(Default)]
pub struct InMemoryIndex {
    passages: RwLock<BTreeMap<String, Passage>>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.passages.read().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, id: &str) -> Option<Passage> {
        self.passages.read().ok()?.get(id).cloned()
    }

    /// Stored passages as keyword documents, in id order.
    pub fn keyword_corpus(&self) -> Vec<KeywordDocument> {
        self.passages
            .read()
            .map(|map| {
                map.values()
                    .map(|passage| KeywordDocument {
                        text: passage.text.clone(),
                        metadata: passage.metadata.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn poisoned() -> BackendError {
    BackendError::Unavailable("in-memory index lock poisoned".to_string())
}

impl VectorIndex for InMemoryIndex {
    fn upsert(&self, passages: &[Passage]) -> Result<(), BackendError> {
        ensure_unique_ids(passages)?;
        let mut stored = self.passages.write().map_err(|_| poisoned())?;
        for passage in passages {
            stored.insert(passage.id.clone(), passage.clone());
        }
        Ok(())
    }

    fn query(
        &self,
        embedding: &[f32],
        k: usize,
        filters: &QueryFilters,
    ) -> Result<Vec<IndexHit>, BackendError> {
        let stored = self.passages.read().map_err(|_| poisoned())?;

        let mut scored = stored
            .values()
            .filter(|passage| filters.matches(&passage.metadata))
            .map(|passage| (cosine_similarity(embedding, &passage.embedding), passage))
            .collect::<Vec<_>>();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        Ok(scored
            .into_iter()
            .take(k)
            .map(|(_, passage)| IndexHit {
                text: Some(passage.text.clone()),
                metadata: passage.metadata.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{PassageMetadata, Section};

    fn passage(id: &str, text: &str, embedding: Vec<f32>, section: Option<Section>) -> Passage {
        Passage {
            id: id.to_string(),
            text: text.to_string(),
            embedding,
            metadata: PassageMetadata {
                pdf_name: "a.pdf".to_string(),
                section,
                ..PassageMetadata::default()
            },
        }
    }

    #[test]
    fn upsert_replaces_by_id() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[passage("p0", "old", vec![1.0, 0.0], None)])
            .unwrap();
        index
            .upsert(&[passage("p0", "new", vec![1.0, 0.0], None)])
            .unwrap();

        assert_eq!(index.len(), 1);
        assert_eq!(index.get("p0").map(|passage| passage.text), Some("new".to_string()));
    }

    #[test]
    fn keyword_corpus_mirrors_stored_passages() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                passage("p1", "segundo", vec![1.0], None),
                passage("p0", "primeiro", vec![1.0], Some(Section::Method)),
            ])
            .unwrap();

        let corpus = index.keyword_corpus();
        assert_eq!(corpus.len(), 2);
        assert_eq!(corpus[0].text, "primeiro");
        assert_eq!(corpus[0].metadata.section, Some(Section::Method));
    }

    #[test]
    fn duplicate_ids_in_one_call_are_rejected() {
        let index = InMemoryIndex::new();
        let result = index.upsert(&[
            passage("p0", "a", vec![1.0], None),
            passage("p0", "b", vec![1.0], None),
        ]);
        assert!(result.is_err());
        assert!(index.is_empty());
    }

    #[test]
    fn query_ranks_by_cosine_and_applies_filters() {
        let index = InMemoryIndex::new();
        index
            .upsert(&[
                passage("p0", "near", vec![1.0, 0.1], Some(Section::Method)),
                passage("p1", "far", vec![0.0, 1.0], Some(Section::Method)),
                passage("p2", "other section", vec![1.0, 0.0], Some(Section::Results)),
            ])
            .unwrap();

        let filters = QueryFilters {
            section: Some(Section::Method),
            ..QueryFilters::default()
        };
        let hits = index.query(&[1.0, 0.0], 10, &filters).unwrap();
        let texts = hits
            .iter()
            .map(|hit| hit.text.clone().unwrap_or_default())
            .collect::<Vec<_>>();
        assert_eq!(texts, vec!["near", "far"]);

        let top = index.query(&[1.0, 0.0], 1, &QueryFilters::default()).unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].text.as_deref(), Some("other section"));
    }
}
