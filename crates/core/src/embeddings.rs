use crate::error::BackendError;
use crate::http::{endpoint_url, ensure_success};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};

const DEFAULT: usize = 128;

pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = DEFAULT;

/// Text → vector capability. Implementations must return one vector per
/// input, in input order.
pub trait Embedder {
    fn dimensions(&self) -> usize;

    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError>;

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        texts.iter().map(|text| self.embed(text)).collect()
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let mag_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let mag_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if mag_a < f32::EPSILON || mag_b < f32::EPSILON {
        0.0
    } else {
        dot / (mag_a * mag_b)
    }
}

/// Hashed character-trigram embedder. Offline and deterministic, which makes
/// it the default for tests and for running without a model server.
#[derive(Debug, Clone, Copy)]
pub struct CharacterNgramEmbedder {
    pub dimensions: usize,
}

impl Default for CharacterNgramEmbedder {
    fn default() -> Self {
        Self {
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
        }
    }
}

impl Embedder for CharacterNgramEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        let mut vector = vec![0f32; self.dimensions.max(1)];
        let lowered = text.to_lowercase();
        let chars: Vec<char> = lowered.chars().collect();

        if chars.is_empty() {
            return Ok(vector);
        }

        for window in chars.windows(3) {
            let token = window.iter().collect::<String>();
            let mut hash = 1469598103934665603u64;
            for byte in token.bytes() {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(1099511628211);
            }
            let bucket = (hash % vector.len() as u64) as usize;
            vector[bucket] += 1.0;
        }

        let magnitude = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for value in &mut vector {
                *value /= magnitude;
            }
        }

        Ok(vector)
    }
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

/// Embeddings served by an Ollama instance through `/api/embed`.
pub struct OllamaEmbedder {
    client: Client,
    endpoint: url::Url,
    model: String,
    dimensions: usize,
}

impl OllamaEmbedder {
    /// Connects and learns the model's dimensionality from a probe request.
    pub fn connect(endpoint: &str, model: impl Into<String>) -> Result<Self, BackendError> {
        let mut embedder = Self {
            client: Client::new(),
            endpoint: endpoint_url(endpoint, "api/embed")?,
            model: model.into(),
            dimensions: 0,
        };
        let probe = embedder.embed("dimension probe")?;
        embedder.dimensions = probe.len();
        Ok(embedder)
    }

    fn request(&self, input: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&OllamaEmbedRequest {
                model: &self.model,
                input,
            })
            .send()?;

        let payload: OllamaEmbedResponse = ensure_success("ollama", response)?.json()?;
        if payload.embeddings.len() != input.len() {
            return Err(BackendError::BackendResponse {
                backend: "ollama".to_string(),
                details: format!(
                    "{} embeddings for {} inputs",
                    payload.embeddings.len(),
                    input.len()
                ),
            });
        }
        Ok(payload.embeddings)
    }
}

impl Embedder for OllamaEmbedder {
    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn embed(&self, text: &str) -> Result<Vec<f32>, BackendError> {
        self.request(&[text.to_string()])?
            .pop()
            .ok_or_else(|| BackendError::Request("empty embedding response".to_string()))
    }

    fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request(texts)
    }
}
