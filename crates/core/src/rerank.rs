use crate::error::BackendError;
use crate::http::{endpoint_url, ensure_success};
use crate::models::PassageMetadata;
use crate::similarity::{token_overlap, tokens, FuzzyMatcher};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Pairwise relevance model. Higher is more relevant; no fixed range.
pub trait Reranker {
    fn score(&self, query: &str, text: &str) -> Result<f64, BackendError>;

    /// One score per text, in input order.
    fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f64>, BackendError> {
        texts.iter().map(|text| self.score(query, text)).collect()
    }
}

/// Fraction of distinct query terms present in the text.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalReranker;

impl Reranker for LexicalReranker {
    fn score(&self, query: &str, text: &str) -> Result<f64, BackendError> {
        let terms = tokens(query)
            .into_iter()
            .filter(|term| term.chars().count() > 2)
            .collect::<HashSet<_>>();
        if terms.is_empty() {
            return Ok(0.0);
        }
        let present = tokens(text).into_iter().collect::<HashSet<_>>();
        Ok(terms.intersection(&present).count() as f64 / terms.len() as f64)
    }
}

#[derive(Debug, Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    texts: &'a [String],
    raw_scores: bool,
}

#[derive(Debug, Deserialize)]
struct RerankScore {
    index: usize,
    score: f64,
}

/// Cross-encoder served behind a `/rerank` endpoint that answers with
/// `[{"index": i, "score": s}, ...]`.
pub struct HttpReranker {
    client: Client,
    endpoint: url::Url,
}

impl HttpReranker {
    pub fn new(endpoint: &str) -> Result<Self, BackendError> {
        Ok(Self {
            client: Client::new(),
            endpoint: endpoint_url(endpoint, "rerank")?,
        })
    }
}

fn align_scores(scores: Vec<RerankScore>, expected: usize) -> Result<Vec<f64>, BackendError> {
    let mut aligned = vec![None; expected];
    for entry in scores {
        match aligned.get_mut(entry.index) {
            Some(slot) => *slot = Some(entry.score),
            None => {
                return Err(BackendError::BackendResponse {
                    backend: "reranker".to_string(),
                    details: format!("score index {} out of range {expected}", entry.index),
                })
            }
        }
    }
    aligned
        .into_iter()
        .enumerate()
        .map(|(index, score)| {
            score.ok_or_else(|| BackendError::BackendResponse {
                backend: "reranker".to_string(),
                details: format!("missing score for candidate {index}"),
            })
        })
        .collect()
}

impl Reranker for HttpReranker {
    fn score(&self, query: &str, text: &str) -> Result<f64, BackendError> {
        self.score_batch(query, &[text.to_string()])?
            .pop()
            .ok_or_else(|| BackendError::Request("empty rerank response".to_string()))
    }

    fn score_batch(&self, query: &str, texts: &[String]) -> Result<Vec<f64>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&RerankRequest {
                query,
                texts,
                raw_scores: false,
            })
            .send()?;
        let scores: Vec<RerankScore> = ensure_success("reranker", response)?.json()?;
        align_scores(scores, texts.len())
    }
}

/// Best similarity of the query to the passage's title or author, through
/// the fuzzy matcher when present and token overlap otherwise.
pub fn metadata_similarity(
    query: &str,
    metadata: &PassageMetadata,
    fuzzy: Option<&dyn FuzzyMatcher>,
) -> f64 {
    [Some(metadata.title.as_str()), metadata.author.as_deref()]
        .into_iter()
        .flatten()
        .filter(|field| !field.trim().is_empty())
        .map(|field| match fuzzy {
            Some(matcher) => matcher.similarity(query, field),
            None => token_overlap(query, field),
        })
        .fold(0.0, f64::max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::similarity::PartialRatioMatcher;

    #[test]
    fn lexical_reranker_counts_distinct_terms() {
        let reranker = LexicalReranker;
        let score = reranker
            .score("redes neurais profundas", "As redes neurais foram treinadas")
            .unwrap();
        assert!((score - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(reranker.score("a b", "a b").unwrap(), 0.0);
    }

    #[test]
    fn rerank_scores_are_aligned_by_index() {
        let scores = vec![
            RerankScore { index: 1, score: 0.2 },
            RerankScore { index: 0, score: 0.9 },
        ];
        assert_eq!(align_scores(scores, 2).unwrap(), vec![0.9, 0.2]);

        let missing = vec![RerankScore { index: 0, score: 0.9 }];
        assert!(align_scores(missing, 2).is_err());

        let out_of_range = vec![RerankScore { index: 5, score: 0.9 }];
        assert!(align_scores(out_of_range, 2).is_err());
    }

    #[test]
    fn metadata_similarity_prefers_best_field() {
        let metadata = PassageMetadata {
            pdf_name: "a.pdf".to_string(),
            title: "Detecção de pragas em soja".to_string(),
            author: Some("Roberta Souza".to_string()),
            ..PassageMetadata::default()
        };

        let fuzzy = metadata_similarity("souza", &metadata, Some(&PartialRatioMatcher));
        assert_eq!(fuzzy, 1.0);

        let overlap = metadata_similarity("pragas na soja", &metadata, None);
        assert!((overlap - 2.0 / 3.0).abs() < 1e-9);

        let blank = PassageMetadata::default();
        assert_eq!(metadata_similarity("anything", &blank, None), 0.0);
    }
}
