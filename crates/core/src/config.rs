use crate::error::ConfigError;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RagConfig {
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generator: GeneratorConfig,
    #[serde(default)]
    pub reranker: RerankerConfig,
    #[serde(default)]
    pub index: IndexConfig,
}

impl RagConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&raw)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: RagConfig = toml::from_str(raw)?;
        config.chunking.validate()?;
        config.retrieval.validate()?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ChunkingConfig {
    /// Words per window.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
    /// Words shared with the previous window.
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Pages with fewer characters are treated as noise.
    #[serde(default = "default_min_page_chars")]
    pub min_page_chars: usize,
    #[serde(default = "default_min_chars")]
    pub min_chars: usize,
    #[serde(default = "default_min_lines")]
    pub min_lines: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            overlap: default_overlap(),
            min_page_chars: default_min_page_chars(),
            min_chars: default_min_chars(),
            min_lines: default_min_lines(),
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("chunking.window_size must be > 0".to_string()));
        }
        if self.overlap >= self.window_size {
            return Err(ConfigError::Invalid(format!(
                "chunking.overlap ({}) must be smaller than window_size ({})",
                self.overlap, self.window_size
            )));
        }
        Ok(())
    }
}

fn default_window_size() -> usize {
    200
}
fn default_overlap() -> usize {
    40
}
fn default_min_page_chars() -> usize {
    100
}
fn default_min_chars() -> usize {
    300
}
fn default_min_lines() -> usize {
    2
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct RetrievalConfig {
    #[serde(default = "default_n_candidates")]
    pub n_candidates: usize,
    #[serde(default = "default_final_k")]
    pub final_k: usize,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: usize,
    /// Weight of the title/author similarity added to the reranker score.
    #[serde(default = "default_metadata_weight")]
    pub metadata_weight: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            n_candidates: default_n_candidates(),
            final_k: default_final_k(),
            max_tokens: default_max_tokens(),
            metadata_weight: default_metadata_weight(),
        }
    }
}

impl RetrievalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.n_candidates == 0 || self.final_k == 0 {
            return Err(ConfigError::Invalid(
                "retrieval.n_candidates and retrieval.final_k must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_n_candidates() -> usize {
    30
}
fn default_final_k() -> usize {
    5
}
fn default_max_tokens() -> usize {
    10_000
}
fn default_metadata_weight() -> f64 {
    0.2
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum EmbeddingConfig {
    Ngram {
        #[serde(default = "default_dimensions")]
        dimensions: usize,
    },
    Ollama {
        #[serde(default = "default_ollama_url")]
        endpoint: String,
        #[serde(default = "default_embedding_model")]
        model: String,
    },
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        EmbeddingConfig::Ngram {
            dimensions: default_dimensions(),
        }
    }
}

fn default_dimensions() -> usize {
    crate::embeddings::DEFAULT_EMBEDDING_DIMENSIONS
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum GeneratorConfig {
    Disabled,
    Ollama {
        #[serde(default = "default_ollama_url")]
        endpoint: String,
        #[serde(default = "default_generator_model")]
        model: String,
        #[serde(default)]
        system_prompt: Option<String>,
    },
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        GeneratorConfig::Ollama {
            endpoint: default_ollama_url(),
            model: default_generator_model(),
            system_prompt: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum RerankerConfig {
    #[default]
    Lexical,
    Http { endpoint: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum IndexConfig {
    #[default]
    Memory,
    Qdrant {
        #[serde(default = "default_qdrant_url")]
        endpoint: String,
        #[serde(default = "default_collection")]
        collection: String,
    },
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_embedding_model() -> String {
    "nomic-embed-text".to_string()
}
fn default_generator_model() -> String {
    "llama3.1:8b".to_string()
}
fn default_qdrant_url() -> String {
    "http://localhost:6333".to_string()
}
fn default_collection() -> String {
    "paper_passages".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = RagConfig::from_toml("").unwrap();
        assert_eq!(config.chunking.window_size, 200);
        assert_eq!(config.retrieval.n_candidates, 30);
        assert_eq!(config.retrieval.max_tokens, 10_000);
        assert!(matches!(config.embedding, EmbeddingConfig::Ngram { .. }));
        assert!(matches!(config.index, IndexConfig::Memory));
    }

    #[test]
    fn backends_are_selected_by_tag() {
        let config = RagConfig::from_toml(
            r#"
            [generator]
            backend = "disabled"

            [index]
            backend = "qdrant"
            collection = "theses"

            [reranker]
            backend = "http"
            endpoint = "http://localhost:8080"
            "#,
        )
        .unwrap();

        assert!(matches!(config.generator, GeneratorConfig::Disabled));
        match config.index {
            IndexConfig::Qdrant { endpoint, collection } => {
                assert_eq!(endpoint, "http://localhost:6333");
                assert_eq!(collection, "theses");
            }
            other => panic!("unexpected index config: {other:?}"),
        }
        assert!(matches!(config.reranker, RerankerConfig::Http { .. }));
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let result = RagConfig::from_toml(
            r#"
            [chunking]
            window_size = 10
            overlap = 10
            "#,
        );
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }
}
