pub mod chunking;
pub mod classifier;
pub mod config;
pub mod embeddings;
pub mod error;
pub mod extractor;
pub mod generation;
mod http;
pub mod ingest;
pub mod models;
pub mod prompt;
pub mod rerank;
pub mod retrieval;
pub mod similarity;
pub mod stores;
pub mod traits;

pub use chunking::{normalize_whitespace, Chunker, SourceFile};
pub use classifier::SectionClassifier;
pub use config::{
    ChunkingConfig, EmbeddingConfig, GeneratorConfig, IndexConfig, RagConfig, RerankerConfig,
    RetrievalConfig,
};
pub use embeddings::{
    CharacterNgramEmbedder, Embedder, OllamaEmbedder, DEFAULT_EMBEDDING_DIMENSIONS,
};
pub use error::{BackendError, ConfigError, IngestError, PipelineError, RetrievalError};
pub use extractor::{LopdfExtractor, PageExtractor, PageText};
pub use generation::{build_generator, FragmentStream, OllamaGenerator, TextGenerator};
pub use ingest::{discover_pdf_files, ingest_folder, IngestedPdf, IngestionReport, SkippedPdf};
pub use models::{
    DocumentFingerprint, KeywordDocument, Passage, PassageMetadata, QueryFilters,
    RetrievalRequest, RetrievalResult, RetrievedPassage, Section, SectionSource,
};
pub use prompt::{PromptAssembler, RagPipeline, NO_CONTEXT_SENTINEL};
pub use rerank::{HttpReranker, LexicalReranker, Reranker};
pub use retrieval::{QueryRewriter, RetrievalEngine, SectionStrategy, TokenCounter};
pub use similarity::{FuzzyMatcher, PartialRatioMatcher};
pub use stores::{InMemoryIndex, QdrantStore};
pub use traits::VectorIndex;
