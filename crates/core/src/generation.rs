use crate::config::GeneratorConfig;
use crate::error::BackendError;
use crate::http::{endpoint_url, ensure_success};
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Lines};

/// Finite, single-pass sequence of generated text fragments.
pub type FragmentStream<'a> = Box<dyn Iterator<Item = Result<String, BackendError>> + 'a>;

/// Prompt → text capability.
pub trait TextGenerator {
    fn generate_stream<'a>(&'a self, prompt: &str) -> Result<FragmentStream<'a>, BackendError>;

    fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        self.generate_stream(prompt)?.collect()
    }
}

/// Builds the configured backend; `None` when generation is disabled.
pub fn build_generator(
    config: &GeneratorConfig,
) -> Result<Option<Box<dyn TextGenerator>>, BackendError> {
    match config {
        GeneratorConfig::Disabled => Ok(None),
        GeneratorConfig::Ollama {
            endpoint,
            model,
            system_prompt,
        } => {
            let generator = OllamaGenerator::new(endpoint, model.clone())?
                .with_system_prompt(system_prompt.clone());
            Ok(Some(Box::new(generator)))
        }
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateChunk {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

pub struct OllamaGenerator {
    client: Client,
    endpoint: url::Url,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaGenerator {
    pub fn new(endpoint: &str, model: impl Into<String>) -> Result<Self, BackendError> {
        // Long answers stream for minutes; the blocking client's 30s default would cut them.
        Ok(Self {
            client: Client::builder().timeout(None).build()?,
            endpoint: endpoint_url(endpoint, "api/generate")?,
            model: model.into(),
            system_prompt: None,
        })
    }

    pub fn with_system_prompt(mut self, system_prompt: Option<String>) -> Self {
        self.system_prompt = system_prompt;
        self
    }

    fn send(&self, prompt: &str, stream: bool) -> Result<Response, BackendError> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&GenerateRequest {
                model: &self.model,
                prompt,
                system: self.system_prompt.as_deref(),
                stream,
            })
            .send()?;
        ensure_success("ollama", response)
    }
}

impl TextGenerator for OllamaGenerator {
    fn generate_stream<'a>(&'a self, prompt: &str) -> Result<FragmentStream<'a>, BackendError> {
        let response = self.send(prompt, true)?;
        Ok(Box::new(NdjsonFragments {
            lines: BufReader::new(response).lines(),
            finished: false,
        }))
    }

    fn generate(&self, prompt: &str) -> Result<String, BackendError> {
        let chunk: GenerateChunk = self.send(prompt, false)?.json()?;
        match chunk.error {
            Some(error) => Err(BackendError::Request(error)),
            None => Ok(chunk.response),
        }
    }
}

struct NdjsonFragments<R> {
    lines: Lines<R>,
    finished: bool,
}

impl<R: BufRead> Iterator for NdjsonFragments<R> {
    type Item = Result<String, BackendError>;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.finished {
            let line = match self.lines.next()? {
                Ok(line) => line,
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error.into()));
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let chunk: GenerateChunk = match serde_json::from_str(&line) {
                Ok(chunk) => chunk,
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error.into()));
                }
            };
            if let Some(error) = chunk.error {
                self.finished = true;
                return Some(Err(BackendError::Request(error)));
            }
            self.finished = chunk.done;
            if !chunk.response.is_empty() {
                return Some(Ok(chunk.response));
            }
        }
        None
    }
}
