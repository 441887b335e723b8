use crate::error::{PipelineError, RetrievalError};
use crate::generation::{FragmentStream, TextGenerator};
use crate::models::{RetrievalRequest, RetrievalResult};
use crate::retrieval::RetrievalEngine;

/// Context placed in the prompt when retrieval found nothing.
pub const NO_CONTEXT_SENTINEL: &str = "No context found.";

const INSTRUCTIONS: &str = "\
Use only ONE single excerpt as the basis for your answer.
Do not use any knowledge outside the provided excerpt.
Do not make inferences, deductions or assumptions.

If more than one excerpt mentions different models,
choose only the one explicitly described as used in the work.

At the end of the answer, state where the excerpt was taken from,
including the title of the work and the page number, if available.

Use the following context to answer the question.";

#[derive(Debug, Default, Clone, Copy)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn context(result: &RetrievalResult) -> String {
        if result.is_empty() {
            return NO_CONTEXT_SENTINEL.to_string();
        }
        result
            .documents()
            .iter()
            .map(|passage| passage.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn assemble(&self, query: &str, result: &RetrievalResult) -> String {
        format!(
            "{INSTRUCTIONS}\n\nContext:\n{}\n\nQuestion:\n{}\n\nAnswer:\n",
            Self::context(result),
            query.trim()
        )
    }
}

/// Retrieval followed by prompt assembly and generation.
pub struct RagPipeline<'a> {
    engine: &'a RetrievalEngine<'a>,
    generator: &'a dyn TextGenerator,
    assembler: PromptAssembler,
    n_candidates: usize,
}

impl<'a> RagPipeline<'a> {
    pub fn new(
        engine: &'a RetrievalEngine<'a>,
        generator: &'a dyn TextGenerator,
        n_candidates: usize,
    ) -> Self {
        Self {
            engine,
            generator,
            assembler: PromptAssembler,
            n_candidates,
        }
    }

    pub fn run(
        &self,
        request: &RetrievalRequest,
    ) -> Result<(String, RetrievalResult), RetrievalError> {
        let result = self.engine.retrieve(request)?;
        let prompt = self.assembler.assemble(&request.query, &result);
        Ok((prompt, result))
    }

    /// Convenience over [`RagPipeline::run`] with the configured candidate count.
    pub fn run_query(
        &self,
        query: &str,
        final_k: usize,
    ) -> Result<(String, RetrievalResult), RetrievalError> {
        self.run(&RetrievalRequest::new(query, self.n_candidates, final_k))
    }

    pub fn answer_stream(
        &self,
        request: &RetrievalRequest,
    ) -> Result<(FragmentStream<'a>, RetrievalResult), PipelineError> {
        let (prompt, result) = self.run(request)?;
        let stream = self.generator.generate_stream(&prompt)?;
        Ok((stream, result))
    }
}
