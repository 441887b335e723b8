use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Coarse topical label of a passage of academic text.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Introduction,
    Background,
    Method,
    Results,
    Discussion,
    Conclusion,
}

impl Section {
    pub const ALL: [Section; 6] = [
        Section::Introduction,
        Section::Background,
        Section::Method,
        Section::Results,
        Section::Discussion,
        Section::Conclusion,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Introduction => "introduction",
            Section::Background => "background",
            Section::Method => "method",
            Section::Results => "results",
            Section::Discussion => "discussion",
            Section::Conclusion => "conclusion",
        }
    }

    /// Finds the label a free-form generator answer settles on: the valid
    /// label appearing earliest in the answer, if any.
    pub fn find_in(answer: &str) -> Option<Section> {
        let lowered = answer.to_lowercase();
        Section::ALL
            .iter()
            .filter_map(|section| lowered.find(section.as_str()).map(|at| (at, *section)))
            .min_by_key(|(at, _)| *at)
            .map(|(_, section)| section)
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        Section::ALL
            .iter()
            .copied()
            .find(|section| section.as_str() == normalized)
            .ok_or_else(|| format!("unknown section label: {value}"))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentFingerprint {
    /// File name of the source PDF; stored as `pdf_name`.
    pub source_id: String,
    pub title: String,
    pub author: Option<String>,
    pub page_count: u32,
    pub content_hash: String,
}

/// Metadata written next to every passage. Field names are the contract
/// between ingestion and retrieval and must not drift.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct PassageMetadata {
    pub pdf_name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub page: Option<u32>,
    #[serde(default)]
    pub page_number: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<Section>,
    #[serde(default)]
    pub content_hash: String,
    #[serde(default)]
    pub page_count: u32,
}

impl PassageMetadata {
    pub fn for_page(document: &DocumentFingerprint, page: u32, section: Option<Section>) -> Self {
        Self {
            pdf_name: document.source_id.clone(),
            title: document.title.clone(),
            author: document.author.clone(),
            page: Some(page),
            page_number: Some(page),
            section,
            content_hash: document.content_hash.clone(),
            page_count: document.page_count,
        }
    }

    /// Older records only carry `page_number`.
    pub fn resolved_page(&self) -> Option<u32> {
        self.page.or(self.page_number)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Passage {
    pub id: String,
    pub text: String,
    pub embedding: Vec<f32>,
    pub metadata: PassageMetadata,
}

impl Passage {
    pub fn source_id(&self) -> &str {
        &self.metadata.pdf_name
    }

    pub fn page(&self) -> u32 {
        self.metadata.resolved_page().unwrap_or_default()
    }

    pub fn section(&self) -> Option<Section> {
        self.metadata.section
    }
}

/// Deterministic passage id; re-ingesting the same bytes reproduces it.
pub fn passage_id(file_name: &str, content_hash: &str, index: usize) -> String {
    format!("{file_name}_{content_hash}_{index}")
}

/// Exact-match metadata predicates, combined with AND.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct QueryFilters {
    pub section: Option<Section>,
    pub pdf_name: Option<String>,
    pub author: Option<String>,
    pub title: Option<String>,
}

impl QueryFilters {
    pub fn is_empty(&self) -> bool {
        self.section.is_none()
            && self.pdf_name.is_none()
            && self.author.is_none()
            && self.title.is_none()
    }

    pub fn matches(&self, metadata: &PassageMetadata) -> bool {
        if let Some(section) = self.section {
            if metadata.section != Some(section) {
                return false;
            }
        }
        if let Some(pdf_name) = &self.pdf_name {
            if &metadata.pdf_name != pdf_name {
                return false;
            }
        }
        if let Some(author) = &self.author {
            if metadata.author.as_ref() != Some(author) {
                return false;
            }
        }
        if let Some(title) = &self.title {
            if &metadata.title != title {
                return false;
            }
        }
        true
    }

    /// `(field, value)` pairs in wire-schema names.
    pub fn predicates(&self) -> Vec<(&'static str, String)> {
        let mut predicates = Vec::new();
        if let Some(section) = self.section {
            predicates.push(("section", section.as_str().to_string()));
        }
        if let Some(pdf_name) = &self.pdf_name {
            predicates.push(("pdf_name", pdf_name.clone()));
        }
        if let Some(author) = &self.author {
            predicates.push(("author", author.clone()));
        }
        if let Some(title) = &self.title {
            predicates.push(("title", title.clone()));
        }
        predicates
    }
}

/// One retrieval request. `keyword_corpus` is searched by term counting
/// in addition to the vector index.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub n_candidates: usize,
    pub final_k: usize,
    pub filters: QueryFilters,
    pub keyword_corpus: Option<Vec<KeywordDocument>>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, n_candidates: usize, final_k: usize) -> Self {
        Self {
            query: query.into(),
            n_candidates,
            final_k,
            filters: QueryFilters::default(),
            keyword_corpus: None,
        }
    }

    pub fn with_filters(mut self, filters: QueryFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_keyword_corpus(mut self, corpus: Vec<KeywordDocument>) -> Self {
        self.keyword_corpus = Some(corpus);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KeywordDocument {
    pub text: String,
    pub metadata: PassageMetadata,
}

/// A `(text, metadata)` hit as returned by a vector index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexHit {
    pub text: Option<String>,
    pub metadata: PassageMetadata,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum CandidateOrigin {
    Vector,
    Keyword,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievedPassage {
    pub text: String,
    pub metadata: PassageMetadata,
    pub score: f64,
    pub origin: CandidateOrigin,
}

impl RetrievedPassage {
    pub fn source_id(&self) -> &str {
        &self.metadata.pdf_name
    }
}

/// Which inference tier produced the section filter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SectionSource {
    Explicit,
    Lexicon,
    Generator,
    Embedding,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalResult {
    documents: Vec<RetrievedPassage>,
    query: String,
    rewritten_query: String,
    applied_filters: QueryFilters,
    section_source: Option<SectionSource>,
    pinned_source: Option<String>,
}

impl RetrievalResult {
    pub(crate) fn new(
        documents: Vec<RetrievedPassage>,
        query: String,
        rewritten_query: String,
        applied_filters: QueryFilters,
        section_source: Option<SectionSource>,
        pinned_source: Option<String>,
    ) -> Self {
        Self {
            documents,
            query,
            rewritten_query,
            applied_filters,
            section_source,
            pinned_source,
        }
    }

    pub fn empty(query: impl Into<String>) -> Self {
        let query = query.into();
        Self {
            documents: Vec::new(),
            rewritten_query: query.clone(),
            query,
            applied_filters: QueryFilters::default(),
            section_source: None,
            pinned_source: None,
        }
    }

    /// Passages in rank order.
    pub fn documents(&self) -> &[RetrievedPassage] {
        &self.documents
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// The text that was actually embedded for the vector search.
    pub fn rewritten_query(&self) -> &str {
        &self.rewritten_query
    }

    pub fn applied_filters(&self) -> &QueryFilters {
        &self.applied_filters
    }

    pub fn section_source(&self) -> Option<SectionSource> {
        self.section_source
    }

    pub fn pinned_source(&self) -> Option<&str> {
        self.pinned_source.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn section_answer_parsing_takes_earliest_label() {
        assert_eq!(Section::find_in("Method."), Some(Section::Method));
        assert_eq!(
            Section::find_in("results, not the discussion"),
            Some(Section::Results)
        );
        assert_eq!(Section::find_in("I cannot tell"), None);
    }

    #[test]
    fn section_round_trips_through_its_label() {
        for section in Section::ALL {
            assert_eq!(section.as_str().parse::<Section>(), Ok(section));
        }
        assert!("appendix".parse::<Section>().is_err());
    }

    #[test]
    fn metadata_page_falls_back_to_page_number() {
        let metadata: PassageMetadata =
            serde_json::from_str(r#"{"pdf_name":"a.pdf","page_number":4}"#).unwrap();
        assert_eq!(metadata.resolved_page(), Some(4));
        assert_eq!(metadata.section, None);
    }

    #[test]
    fn filters_use_and_semantics() {
        let metadata = PassageMetadata {
            pdf_name: "a.pdf".to_string(),
            title: "Deep Nets".to_string(),
            section: Some(Section::Method),
            ..PassageMetadata::default()
        };

        let filters = QueryFilters {
            section: Some(Section::Method),
            pdf_name: Some("a.pdf".to_string()),
            ..QueryFilters::default()
        };
        assert!(filters.matches(&metadata));

        let mismatched = QueryFilters {
            pdf_name: Some("b.pdf".to_string()),
            ..filters
        };
        assert!(!mismatched.matches(&metadata));
        assert!(QueryFilters::default().matches(&metadata));
    }
}
