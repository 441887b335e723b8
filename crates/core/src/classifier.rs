use crate::embeddings::{cosine_similarity, Embedder};
use crate::error::BackendError;
use crate::models::Section;

/// Canonical description of each section, in tie-breaking order.
pub const SECTION_DESCRIPTIONS: [(Section, &str); 6] = [
    (
        Section::Introduction,
        "Introdução do trabalho e contextualização do problema",
    ),
    (
        Section::Background,
        "Referencial teórico e trabalhos relacionados, fundamentação teórica",
    ),
    (
        Section::Method,
        "Metodologia, modelo, arquitetura e experimento",
    ),
    (
        Section::Results,
        "Resultados experimentais, métricas e avaliação",
    ),
    (Section::Discussion, "Discussão dos resultados"),
    (
        Section::Conclusion,
        "Conclusão do trabalho e trabalhos futuros",
    ),
];

/// Nearest-label classifier in embedding space.
pub struct SectionClassifier<'a> {
    embedder: &'a dyn Embedder,
    labels: Vec<(Section, Vec<f32>)>,
}

impl<'a> SectionClassifier<'a> {
    /// Embeds every canonical description once.
    pub fn new(embedder: &'a dyn Embedder) -> Result<Self, BackendError> {
        let descriptions = SECTION_DESCRIPTIONS
            .iter()
            .map(|(_, description)| description.to_string())
            .collect::<Vec<_>>();
        let embeddings = embedder.embed_batch(&descriptions)?;

        if embeddings.len() != descriptions.len() {
            return Err(BackendError::BackendResponse {
                backend: "embedder".to_string(),
                details: format!(
                    "{} embeddings for {} section descriptions",
                    embeddings.len(),
                    descriptions.len()
                ),
            });
        }

        let labels = SECTION_DESCRIPTIONS
            .iter()
            .map(|(section, _)| *section)
            .zip(embeddings)
            .collect();

        Ok(Self { embedder, labels })
    }

    pub fn classify(&self, text: &str) -> Result<Section, BackendError> {
        let vector = self.embedder.embed(text)?;

        let mut best = self.labels[0].0;
        let mut best_score = f32::NEG_INFINITY;
        for (section, label_vector) in &self.labels {
            let score = cosine_similarity(&vector, label_vector);
            if score > best_score {
                best = *section;
                best_score = score;
            }
        }

        Ok(best)
    }
}
