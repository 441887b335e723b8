//! Query-time funnel from a noisy vector neighbourhood to a small,
//! single-source, budget-bounded context.
//!
//! 1. Rewrite the query (identity unless a [`QueryRewriter`] is supplied).
//! 2. Resolve filters: explicit fields win; a missing section is inferred by
//!    lexicon, then generator, then embedding classifier.
//! 3. Vector search for `n_candidates` hits.
//! 4. Drop empty texts and exact-text duplicates.
//! 5. Append keyword hits from a caller-supplied corpus, if any.
//! 6. Rerank with `reranker + metadata_weight * title/author similarity`,
//!    keep `final_k`.
//! 7. Pin to the source document of the top hit.
//! 8. Cut at the first passage that would exceed `max_tokens`.

use crate::classifier::SectionClassifier;
use crate::config::RetrievalConfig;
use crate::embeddings::Embedder;
use crate::error::{BackendError, RetrievalError};
use crate::generation::TextGenerator;
use crate::models::{
    CandidateOrigin, IndexHit, KeywordDocument, PassageMetadata, QueryFilters, RetrievalRequest,
    RetrievalResult, RetrievedPassage, Section, SectionSource,
};
use crate::rerank::{metadata_similarity, Reranker};
use crate::similarity::{tokens, FuzzyMatcher};
use crate::traits::VectorIndex;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Normalizes or expands the query before it is embedded.
pub trait QueryRewriter {
    fn rewrite(&self, query: &str) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdentityRewriter;

impl QueryRewriter for IdentityRewriter {
    fn rewrite(&self, query: &str) -> String {
        query.to_string()
    }
}

/// Measures passages against the context budget.
pub trait TokenCounter {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

/// One tier of section inference.
pub trait SectionStrategy {
    fn source(&self) -> SectionSource;

    fn infer(&self, query: &str) -> Result<Option<Section>, BackendError>;
}

/// Keyword stems per section, Portuguese first, checked in label order.
pub const SECTION_STEMS: [(Section, &[&str]); 6] = [
    (
        Section::Introduction,
        &[
            "introdu",
            "contextualiza",
            "motivação",
            "motivacao",
            "objetivo",
            "motivation",
            "objective",
        ],
    ),
    (
        Section::Background,
        &[
            "referencial",
            "fundamenta",
            "trabalhos relacionados",
            "estado da arte",
            "revisão",
            "revisao",
            "background",
            "related work",
            "literature",
            "state of the art",
        ],
    ),
    (
        Section::Method,
        &[
            "metodolog",
            "método",
            "metodo",
            "modelo",
            "arquitetura",
            "abordagem",
            "procedimento",
            "conjunto de dados",
            "method",
            "model",
            "architecture",
            "approach",
            "dataset",
        ],
    ),
    (
        Section::Results,
        &[
            "resultado",
            "métrica",
            "metrica",
            "acurácia",
            "acuracia",
            "desempenho",
            "avaliação",
            "avaliacao",
            "result",
            "metric",
            "accuracy",
            "performance",
            "evaluation",
        ],
    ),
    (
        Section::Discussion,
        &["discuss", "discut", "interpreta", "limitaç", "limitac", "limitation"],
    ),
    (
        Section::Conclusion,
        &[
            "conclus",
            "conclu",
            "trabalhos futuros",
            "considerações finais",
            "consideracoes finais",
            "future work",
        ],
    ),
];

#[derive(Debug, Default, Clone, Copy)]
pub struct LexiconStrategy;

impl SectionStrategy for LexiconStrategy {
    fn source(&self) -> SectionSource {
        SectionSource::Lexicon
    }

    fn infer(&self, query: &str) -> Result<Option<Section>, BackendError> {
        let lowered = query.to_lowercase();
        Ok(SECTION_STEMS
            .iter()
            .find(|(_, stems)| stems.iter().any(|stem| lowered.contains(stem)))
            .map(|(section, _)| *section))
    }
}

pub struct GeneratorStrategy<'a> {
    generator: &'a dyn TextGenerator,
}

impl<'a> GeneratorStrategy<'a> {
    pub fn new(generator: &'a dyn TextGenerator) -> Self {
        Self { generator }
    }
}

fn query_label_prompt(query: &str) -> String {
    format!(
        "Which section of an academic work is most likely to answer the question below? \
         Choose exactly one of: introduction, background, method, results, discussion, \
         conclusion. Answer with that single word.\n\nQuestion: {query}\n\nSection:"
    )
}

impl SectionStrategy for GeneratorStrategy<'_> {
    fn source(&self) -> SectionSource {
        SectionSource::Generator
    }

    fn infer(&self, query: &str) -> Result<Option<Section>, BackendError> {
        let answer = self.generator.generate(&query_label_prompt(query))?;
        Ok(Section::find_in(&answer))
    }
}

pub struct ClassifierStrategy<'a> {
    classifier: &'a SectionClassifier<'a>,
}

impl<'a> ClassifierStrategy<'a> {
    pub fn new(classifier: &'a SectionClassifier<'a>) -> Self {
        Self { classifier }
    }
}

impl SectionStrategy for ClassifierStrategy<'_> {
    fn source(&self) -> SectionSource {
        SectionSource::Embedding
    }

    fn infer(&self, query: &str) -> Result<Option<Section>, BackendError> {
        self.classifier.classify(query).map(Some)
    }
}

#[derive(Debug, Clone)]
struct Candidate {
    text: String,
    metadata: PassageMetadata,
    origin: CandidateOrigin,
}

pub struct RetrievalEngine<'a> {
    embedder: &'a dyn Embedder,
    index: &'a dyn VectorIndex,
    reranker: &'a dyn Reranker,
    rewriter: Option<&'a dyn QueryRewriter>,
    lexicon: LexiconStrategy,
    generator: Option<GeneratorStrategy<'a>>,
    classifier: Option<ClassifierStrategy<'a>>,
    fuzzy: Option<&'a dyn FuzzyMatcher>,
    tokenizer: Option<&'a dyn TokenCounter>,
    max_tokens: usize,
    metadata_weight: f64,
}

impl<'a> RetrievalEngine<'a> {
    pub fn new(
        embedder: &'a dyn Embedder,
        index: &'a dyn VectorIndex,
        reranker: &'a dyn Reranker,
    ) -> Self {
        let defaults = RetrievalConfig::default();
        Self {
            embedder,
            index,
            reranker,
            rewriter: None,
            lexicon: LexiconStrategy,
            generator: None,
            classifier: None,
            fuzzy: None,
            tokenizer: None,
            max_tokens: defaults.max_tokens,
            metadata_weight: defaults.metadata_weight,
        }
    }

    pub fn with_config(mut self, config: &RetrievalConfig) -> Self {
        self.max_tokens = config.max_tokens;
        self.metadata_weight = config.metadata_weight;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_rewriter(mut self, rewriter: &'a dyn QueryRewriter) -> Self {
        self.rewriter = Some(rewriter);
        self
    }

    /// Enables the generator tier of section inference.
    pub fn with_generator(mut self, generator: &'a dyn TextGenerator) -> Self {
        self.generator = Some(GeneratorStrategy::new(generator));
        self
    }

    /// Enables the embedding tier of section inference.
    pub fn with_classifier(mut self, classifier: &'a SectionClassifier<'a>) -> Self {
        self.classifier = Some(ClassifierStrategy::new(classifier));
        self
    }

    pub fn with_fuzzy_matcher(mut self, fuzzy: &'a dyn FuzzyMatcher) -> Self {
        self.fuzzy = Some(fuzzy);
        self
    }

    pub fn with_tokenizer(mut self, tokenizer: &'a dyn TokenCounter) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Inference tiers in precedence order.
    fn section_tiers(&self) -> Vec<&dyn SectionStrategy> {
        let mut tiers: Vec<&dyn SectionStrategy> = vec![&self.lexicon];
        if let Some(generator) = &self.generator {
            tiers.push(generator);
        }
        if let Some(classifier) = &self.classifier {
            tiers.push(classifier);
        }
        tiers
    }

    fn infer_section(&self, query: &str) -> Option<(Section, SectionSource)> {
        for tier in self.section_tiers() {
            match tier.infer(query) {
                Ok(Some(section)) => return Some((section, tier.source())),
                Ok(None) => debug!(tier = ?tier.source(), "section tier found no label"),
                Err(error) => debug!(tier = ?tier.source(), %error, "section tier failed"),
            }
        }
        None
    }

    /// Explicit filters win field by field; only a missing section is
    /// inferred.
    pub fn resolve_filters(
        &self,
        query: &str,
        explicit: &QueryFilters,
    ) -> (QueryFilters, Option<SectionSource>) {
        let mut filters = explicit.clone();
        if filters.section.is_some() {
            return (filters, Some(SectionSource::Explicit));
        }

        match self.infer_section(query) {
            Some((section, source)) => {
                filters.section = Some(section);
                (filters, Some(source))
            }
            None => (filters, None),
        }
    }

    pub fn retrieve(&self, request: &RetrievalRequest) -> Result<RetrievalResult, RetrievalError> {
        let raw = request.query.trim();
        if raw.is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let rewritten = match self.rewriter {
            Some(rewriter) => rewriter.rewrite(raw),
            None => raw.to_string(),
        };
        if rewritten.trim().is_empty() {
            return Err(RetrievalError::EmptyQuery);
        }

        let (filters, section_source) = self.resolve_filters(&rewritten, &request.filters);
        debug!(?filters, ?section_source, "resolved retrieval filters");

        let query_vector = self
            .embedder
            .embed(&rewritten)
            .map_err(RetrievalError::Embedding)?;
        let hits = self
            .index
            .query(&query_vector, request.n_candidates, &filters)
            .map_err(RetrievalError::Index)?;
        let hit_count = hits.len();

        let mut candidates = dedupe_hits(hits);
        if let Some(corpus) = &request.keyword_corpus {
            append_keyword_hits(&mut candidates, &rewritten, corpus);
        }
        debug!(
            hits = hit_count,
            candidates = candidates.len(),
            "candidate set after dedup and keyword augmentation"
        );

        let ranked = self.rerank(&rewritten, candidates, request.final_k)?;
        let (pinned, pinned_source) = pin_to_top_source(ranked);
        let counter: &dyn TokenCounter = self.tokenizer.unwrap_or(&WordCounter);
        let documents = truncate_to_budget(pinned, self.max_tokens, counter);
        let pinned_source = pinned_source.filter(|_| !documents.is_empty());
        debug!(
            documents = documents.len(),
            pinned_source = pinned_source.as_deref().unwrap_or(""),
            "retrieval finished"
        );

        Ok(RetrievalResult::new(
            documents,
            raw.to_string(),
            rewritten,
            filters,
            section_source,
            pinned_source,
        ))
    }

    fn rerank(
        &self,
        query: &str,
        candidates: Vec<Candidate>,
        final_k: usize,
    ) -> Result<Vec<RetrievedPassage>, RetrievalError> {
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let texts = candidates
            .iter()
            .map(|candidate| candidate.text.clone())
            .collect::<Vec<_>>();
        let scores = self
            .reranker
            .score_batch(query, &texts)
            .map_err(RetrievalError::Rerank)?;
        if scores.len() != candidates.len() {
            return Err(RetrievalError::RerankMismatch {
                candidates: candidates.len(),
                scores: scores.len(),
            });
        }

        let mut ranked = candidates
            .into_iter()
            .zip(scores)
            .map(|(candidate, score)| {
                let boost = metadata_similarity(query, &candidate.metadata, self.fuzzy);
                RetrievedPassage {
                    score: score + self.metadata_weight * boost,
                    text: candidate.text,
                    metadata: candidate.metadata,
                    origin: candidate.origin,
                }
            })
            .collect::<Vec<_>>();
        ranked.sort_by(|left, right| right.score.total_cmp(&left.score));
        ranked.truncate(final_k);
        Ok(ranked)
    }
}

/// Trimmed, non-empty hits with byte-identical texts collapsed to their
/// first occurrence.
fn dedupe_hits(hits: Vec<IndexHit>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    hits.into_iter()
        .filter_map(|hit| {
            let text = hit.text?.trim().to_string();
            if text.is_empty() || !seen.insert(text.clone()) {
                return None;
            }
            Some(Candidate {
                text,
                metadata: hit.metadata,
                origin: CandidateOrigin::Vector,
            })
        })
        .collect()
}

/// Appends corpus documents containing query terms, most occurrences first.
/// Every query token counts, however short. Texts already among the
/// candidates are skipped.
fn append_keyword_hits(candidates: &mut Vec<Candidate>, query: &str, corpus: &[KeywordDocument]) {
    let terms = tokens(query).into_iter().collect::<HashSet<_>>();
    if terms.is_empty() {
        return;
    }

    let mut scored = corpus
        .iter()
        .filter_map(|document| {
            let mut counts: HashMap<String, usize> = HashMap::new();
            for token in tokens(&document.text) {
                if terms.contains(&token) {
                    *counts.entry(token).or_default() += 1;
                }
            }
            let score = counts.values().sum::<usize>();
            (score > 0).then_some((score, document))
        })
        .collect::<Vec<_>>();
    scored.sort_by(|left, right| right.0.cmp(&left.0));

    let mut seen = candidates
        .iter()
        .map(|candidate| candidate.text.clone())
        .collect::<HashSet<_>>();
    for (_, document) in scored {
        let text = document.text.trim().to_string();
        if text.is_empty() || !seen.insert(text.clone()) {
            continue;
        }
        candidates.push(Candidate {
            text,
            metadata: document.metadata.clone(),
            origin: CandidateOrigin::Keyword,
        });
    }
}

/// Keeps only passages from the same source as the rank-0 passage.
fn pin_to_top_source(ranked: Vec<RetrievedPassage>) -> (Vec<RetrievedPassage>, Option<String>) {
    let Some(source) = ranked.first().map(|top| top.source_id().to_string()) else {
        return (ranked, None);
    };
    let pinned = ranked
        .into_iter()
        .filter(|passage| passage.source_id() == source)
        .collect();
    (pinned, Some(source))
}

/// Longest rank-order prefix whose token total stays within `max_tokens`.
fn truncate_to_budget(
    ranked: Vec<RetrievedPassage>,
    max_tokens: usize,
    counter: &dyn TokenCounter,
) -> Vec<RetrievedPassage> {
    let mut total = 0usize;
    let mut kept = Vec::new();
    for passage in ranked {
        let tokens = counter.count(&passage.text);
        if total + tokens > max_tokens {
            break;
        }
        total += tokens;
        kept.push(passage);
    }
    kept
}
