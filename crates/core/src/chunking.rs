use crate::config::ChunkingConfig;
use crate::embeddings::Embedder;
use crate::error::IngestError;
use crate::extractor::{PageExtractor, PageText};
use crate::generation::TextGenerator;
use crate::models::{passage_id, DocumentFingerprint, Passage, PassageMetadata, Section};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Headings of pages that never hold answerable content: tables of contents,
/// lists of figures, bibliographies and abstracts.
const NOISE_HEADINGS: &str = r"(?mi)^\s*(?:\d+(?:\.\d+)*\.?\s+)?(?:sumário|sumario|índice|indice|lista de figuras|lista de tabelas|lista de quadros|lista de abreviaturas(?: e siglas)?|lista de siglas|referências(?: bibliográficas)?|referencias(?: bibliograficas)?|bibliografia|resumo|abstract|table of contents|contents|list of figures|list of tables|references|bibliography)\s*[:.]?\s*$";

/// A PDF on disk with its content hash.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub file_name: String,
    pub content_hash: String,
}

impl SourceFile {
    pub fn open(path: &Path) -> Result<Self, IngestError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
            .to_string();

        Ok(Self {
            path: path.to_path_buf(),
            file_name,
            content_hash: digest_file(path)?,
        })
    }

    fn default_title(&self) -> String {
        self.path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or(&self.file_name)
            .to_string()
    }
}

pub fn digest_file(path: &Path) -> Result<String, IngestError> {
    let bytes = fs::read(path)?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Collapses runs of spaces and tabs; line breaks survive.
pub fn normalize_whitespace(line: &str) -> String {
    line.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .replace('\u{a0}', " ")
}

/// Normalized, non-empty lines of a page with consecutive duplicates removed.
pub fn clean_page_lines(text: &str) -> Vec<String> {
    let mut lines: Vec<String> = Vec::new();
    for line in text.lines().map(normalize_whitespace) {
        if line.is_empty() {
            continue;
        }
        if lines.last() == Some(&line) {
            continue;
        }
        lines.push(line);
    }
    lines
}

pub fn dedupe_consecutive_lines(text: &str) -> String {
    let mut kept: Vec<&str> = Vec::new();
    for line in text.lines() {
        if kept.last().map(|last| last.trim()) != Some(line.trim()) {
            kept.push(line);
        }
    }
    kept.join("\n")
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Word {
    page: u32,
    line: usize,
    text: String,
}

/// A run of words. `fresh` is where the words not shared with the previous
/// window start.
#[derive(Debug, Clone)]
struct Window {
    page: u32,
    words: Vec<Word>,
    fresh: usize,
}

impl Window {
    fn render(&self) -> String {
        let mut text = String::new();
        let mut previous: Option<(u32, usize)> = None;
        for word in &self.words {
            match previous {
                Some(position) if position == (word.page, word.line) => text.push(' '),
                Some(_) => text.push('\n'),
                None => {}
            }
            text.push_str(&word.text);
            previous = Some((word.page, word.line));
        }
        dedupe_consecutive_lines(&text)
    }

    fn absorb(&mut self, next: Window) {
        self.words.extend(next.words.into_iter().skip(next.fresh));
    }
}

/// Overlapping word windows over one page.
fn page_windows(page: u32, lines: &[String], window_size: usize, overlap: usize) -> Vec<Window> {
    let words = lines
        .iter()
        .enumerate()
        .flat_map(|(line, text)| {
            text.split_whitespace().map(move |word| Word {
                page,
                line,
                text: word.to_string(),
            })
        })
        .collect::<Vec<_>>();

    let step = window_size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    while start < words.len() {
        let end = (start + window_size).min(words.len());
        windows.push(Window {
            page,
            words: words[start..end].to_vec(),
            fresh: if start == 0 { 0 } else { overlap.min(end - start) },
        });
        if end == words.len() {
            break;
        }
        start += step;
    }
    windows
}

/// Below the size floor. The line count only applies to windows shorter than
/// `window_size` words, since layout extraction may render a page as one line.
fn is_small(window: &Window, config: &ChunkingConfig) -> bool {
    let text = window.render();
    if text.chars().count() < config.min_chars {
        return true;
    }
    window.words.len() < config.window_size && text.lines().count() < config.min_lines
}

/// Folds windows below the size floor into a neighbour. A fragment with no
/// predecessor is carried into the next window; only a document's sole
/// passage may stay below the floor.
fn merge_small_windows(windows: Vec<Window>, config: &ChunkingConfig) -> Vec<Window> {
    let mut merged: Vec<Window> = Vec::new();
    let mut pending: Option<Window> = None;

    for window in windows {
        let window = match pending.take() {
            Some(mut carried) => {
                carried.absorb(window);
                carried
            }
            None => window,
        };

        if !is_small(&window, config) {
            merged.push(window);
            continue;
        }

        match merged.last_mut() {
            Some(last) => last.absorb(window),
            None => pending = Some(window),
        }
    }

    if let Some(carried) = pending {
        merged.push(carried);
    }
    merged
}

fn label_prompt(text: &str) -> String {
    format!(
        "Classify the following excerpt of an academic work into exactly one of these \
         sections: introduction, background, method, results, discussion, conclusion.\n\
         Answer with the section word only.\n\nExcerpt:\n{text}\n\nSection:"
    )
}

/// Segments PDFs into embedded passages.
pub struct Chunker<'a> {
    extractor: &'a dyn PageExtractor,
    embedder: &'a dyn Embedder,
    labeler: Option<&'a dyn TextGenerator>,
    config: ChunkingConfig,
    noise_heading: Regex,
}

impl<'a> Chunker<'a> {
    pub fn new(
        extractor: &'a dyn PageExtractor,
        embedder: &'a dyn Embedder,
        config: ChunkingConfig,
    ) -> Result<Self, IngestError> {
        config
            .validate()
            .map_err(|error| IngestError::InvalidChunkConfig(error.to_string()))?;

        Ok(Self {
            extractor,
            embedder,
            labeler: None,
            config,
            noise_heading: Regex::new(NOISE_HEADINGS)?,
        })
    }

    /// Generator asked for each passage's section.
    pub fn with_labeler(mut self, labeler: &'a dyn TextGenerator) -> Self {
        self.labeler = Some(labeler);
        self
    }

    pub fn is_noise_page(&self, text: &str) -> bool {
        text.trim().chars().count() < self.config.min_page_chars
            || self.noise_heading.is_match(text)
    }

    fn label(&self, text: &str) -> Option<Section> {
        let labeler = self.labeler?;
        match labeler.generate(&label_prompt(text)) {
            Ok(answer) => Section::find_in(&answer),
            Err(error) => {
                debug!(%error, "section labeling failed, leaving section unset");
                None
            }
        }
    }

    fn windows(&self, pages: &[PageText]) -> Vec<Window> {
        let mut windows = Vec::new();
        for page in pages {
            let lines = clean_page_lines(&page.text);
            let cleaned = lines.join("\n");
            if self.is_noise_page(&cleaned) {
                debug!(page = page.number, "skipping noise page");
                continue;
            }
            windows.extend(page_windows(
                page.number,
                &lines,
                self.config.window_size,
                self.config.overlap,
            ));
        }
        merge_small_windows(windows, &self.config)
    }

    pub fn segment(&self, source: &SourceFile) -> Result<Vec<Passage>, IngestError> {
        let extracted = self.extractor.extract(&source.path)?;

        let fingerprint = DocumentFingerprint {
            source_id: source.file_name.clone(),
            title: extracted
                .info
                .title
                .clone()
                .unwrap_or_else(|| source.default_title()),
            author: extracted.info.author.clone(),
            page_count: extracted.info.page_count,
            content_hash: source.content_hash.clone(),
        };

        let drafts = self
            .windows(&extracted.pages)
            .into_iter()
            .map(|window| (window.page, window.render()))
            .filter(|(_, text)| !text.trim().is_empty())
            .collect::<Vec<_>>();

        if drafts.is_empty() {
            info!(source = %source.file_name, "no passages survived noise filtering");
            return Ok(Vec::new());
        }

        let texts = drafts.iter().map(|(_, text)| text.clone()).collect::<Vec<_>>();
        let embeddings = self.embedder.embed_batch(&texts)?;
        if embeddings.len() != drafts.len() {
            return Err(IngestError::EmbeddingMismatch {
                passages: drafts.len(),
                embeddings: embeddings.len(),
            });
        }

        let passages = drafts
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .map(|(index, ((page, text), embedding))| {
                let section = self.label(&text);
                Passage {
                    id: passage_id(&fingerprint.source_id, &fingerprint.content_hash, index),
                    metadata: PassageMetadata::for_page(&fingerprint, page, section),
                    text,
                    embedding,
                }
            })
            .collect::<Vec<_>>();

        info!(
            source = %source.file_name,
            pages = extracted.pages.len(),
            passages = passages.len(),
            "segmented document"
        );
        Ok(passages)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embeddings::CharacterNgramEmbedder;
    use crate::error::BackendError;
    use crate::extractor::{DocumentInfo, ExtractedDocument};
    use crate::generation::FragmentStream;
    use tempfile::tempdir;

    struct FakeExtractor {
        pages: Vec<String>,
    }

    impl PageExtractor for FakeExtractor {
        fn extract(&self, _path: &Path) -> Result<ExtractedDocument, IngestError> {
            Ok(ExtractedDocument {
                info: DocumentInfo {
                    title: Some("Redes Neurais".to_string()),
                    author: Some("Maria Silva".to_string()),
                    page_count: self.pages.len() as u32,
                },
                pages: self
                    .pages
                    .iter()
                    .enumerate()
                    .map(|(number, text)| PageText {
                        number: number as u32,
                        text: text.clone(),
                    })
                    .collect(),
            })
        }
    }

    struct ShortEmbedder;

    impl Embedder for ShortEmbedder {
        fn dimensions(&self) -> usize {
            1
        }

        fn embed(&self, _text: &str) -> Result<Vec<f32>, BackendError> {
            Ok(vec![1.0])
        }

        fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, BackendError> {
            Ok(vec![vec![1.0]; texts.len().saturating_sub(1)])
        }
    }

    struct FixedLabeler(&'static str);

    impl TextGenerator for FixedLabeler {
        fn generate_stream<'a>(&'a self, _prompt: &str) -> Result<FragmentStream<'a>, BackendError> {
            Ok(Box::new(std::iter::once(Ok::<_, BackendError>(self.0.to_string()))))
        }
    }

    struct FailingLabeler;

    impl TextGenerator for FailingLabeler {
        fn generate_stream<'a>(&'a self, _prompt: &str) -> Result<FragmentStream<'a>, BackendError> {
            Err(BackendError::Unavailable("generator offline".to_string()))
        }
    }

    fn small_config() -> ChunkingConfig {
        ChunkingConfig {
            window_size: 8,
            overlap: 2,
            min_page_chars: 20,
            min_chars: 20,
            min_lines: 1,
        }
    }

    fn body_page(prefix: &str, words: usize) -> String {
        (0..words)
            .map(|index| format!("{prefix}{index}"))
            .collect::<Vec<_>>()
            .chunks(5)
            .map(|line| line.join(" "))
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn source(dir: &Path, bytes: &[u8]) -> SourceFile {
        let path = dir.join("tese.pdf");
        fs::write(&path, bytes).unwrap();
        SourceFile::open(&path).unwrap()
    }

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\u{a0}of   spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn page_lines_drop_consecutive_duplicates() {
        let lines = clean_page_lines("Header line\nHeader line\n\nBody   text here\nHeader line");
        assert_eq!(
            lines,
            vec![
                "Header line".to_string(),
                "Body text here".to_string(),
                "Header line".to_string()
            ]
        );
    }

    #[test]
    fn windows_overlap_by_configured_words() {
        let lines = vec!["a b c d e f g h i j".to_string()];
        let windows = page_windows(0, &lines, 4, 1);
        let rendered = windows.iter().map(Window::render).collect::<Vec<_>>();
        assert_eq!(rendered, vec!["a b c d", "d e f g", "g h i j"]);
        assert_eq!(windows[1].fresh, 1);
    }

    #[test]
    fn merging_does_not_repeat_overlap_words() {
        let lines = vec!["a b c d e f".to_string()];
        let config = ChunkingConfig {
            window_size: 4,
            overlap: 2,
            min_page_chars: 0,
            min_chars: 10,
            min_lines: 1,
        };
        let merged = merge_small_windows(page_windows(0, &lines, 4, 2), &config);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].render(), "a b c d e f");
    }

    #[test]
    fn no_passage_is_below_the_floor_unless_it_is_alone() {
        let config = ChunkingConfig {
            window_size: 6,
            overlap: 0,
            min_page_chars: 0,
            min_chars: 30,
            min_lines: 1,
        };
        let lines = vec![
            "tiny".to_string(),
            "another rather long line with plenty of words in it".to_string(),
            "end".to_string(),
        ];
        let merged = merge_small_windows(page_windows(0, &lines, 6, 0), &config);
        assert!(!merged.is_empty());
        for window in &merged {
            assert!(window.render().chars().count() >= 30);
        }

        let sole = merge_small_windows(page_windows(0, &["short".to_string()], 6, 0), &config);
        assert_eq!(sole.len(), 1);
        assert_eq!(sole[0].render(), "short");
    }

    #[test]
    fn single_line_pages_keep_their_windows() {
        let config = ChunkingConfig::default();
        let windows = (0..5u32)
            .flat_map(|page| {
                let line = (0..600)
                    .map(|index| format!("palavra{index}"))
                    .collect::<Vec<_>>()
                    .join(" ");
                page_windows(page, &[line], config.window_size, config.overlap)
            })
            .collect::<Vec<_>>();
        assert_eq!(windows.len(), 20);

        let merged = merge_small_windows(windows, &config);

        assert_eq!(merged.len(), 15);
        for page in 0..5u32 {
            assert_eq!(merged.iter().filter(|window| window.page == page).count(), 3);
        }
        assert!(merged
            .iter()
            .all(|window| window.words.len() <= config.window_size + 80));
    }

    #[test]
    fn noise_pages_are_recognized() {
        let extractor = FakeExtractor { pages: Vec::new() };
        let embedder = CharacterNgramEmbedder::default();
        let chunker = Chunker::new(&extractor, &embedder, small_config()).unwrap();

        assert!(chunker.is_noise_page("SUMÁRIO\n1 Introdução ........ 12\n2 Métodos ........ 20"));
        assert!(chunker.is_noise_page("REFERÊNCIAS\nSILVA, M. Redes neurais. 2020."));
        assert!(chunker.is_noise_page("too short"));
        assert!(!chunker.is_noise_page(
            "O resumo dos resultados aparece na seção seguinte com mais detalhes."
        ));
    }

    #[test]
    fn segment_attaches_document_metadata() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = FakeExtractor {
            pages: vec![
                body_page("intro", 20),
                "Resumo\nEste trabalho apresenta uma rede neural.".to_string(),
                body_page("metodo", 12),
            ],
        };
        let embedder = CharacterNgramEmbedder::default();
        let chunker = Chunker::new(&extractor, &embedder, small_config())?;
        let source = source(dir.path(), b"%PDF-1.4 fixture");

        let passages = chunker.segment(&source)?;

        assert!(!passages.is_empty());
        assert!(passages.iter().all(|passage| passage.page() != 1));
        assert!(passages.iter().any(|passage| passage.page() == 2));
        for (index, passage) in passages.iter().enumerate() {
            assert_eq!(
                passage.id,
                format!("tese.pdf_{}_{index}", source.content_hash)
            );
            assert_eq!(passage.source_id(), "tese.pdf");
            assert_eq!(passage.metadata.title, "Redes Neurais");
            assert_eq!(passage.metadata.author.as_deref(), Some("Maria Silva"));
            assert_eq!(passage.metadata.page_count, 3);
            assert_eq!(passage.section(), None);
            assert_eq!(passage.embedding.len(), embedder.dimensions);
            assert!(!passage.text.trim().is_empty());
        }
        Ok(())
    }

    #[test]
    fn segment_is_idempotent_for_same_bytes() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = FakeExtractor {
            pages: vec![body_page("word", 30)],
        };
        let embedder = CharacterNgramEmbedder::default();
        let chunker = Chunker::new(&extractor, &embedder, small_config())?;
        let source = source(dir.path(), b"same bytes");

        let first = chunker.segment(&source)?;
        let second = chunker.segment(&SourceFile::open(&source.path)?)?;
        let first_ids = first.iter().map(|passage| &passage.id).collect::<Vec<_>>();
        let second_ids = second.iter().map(|passage| &passage.id).collect::<Vec<_>>();
        assert_eq!(first_ids, second_ids);
        assert_eq!(first, second);
        Ok(())
    }

    #[test]
    fn embedding_count_mismatch_aborts_document() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = FakeExtractor {
            pages: vec![body_page("word", 30)],
        };
        let chunker = Chunker::new(&extractor, &ShortEmbedder, small_config())?;

        let result = chunker.segment(&source(dir.path(), b"x"));
        assert!(matches!(result, Err(IngestError::EmbeddingMismatch { .. })));
        Ok(())
    }

    #[test]
    fn labeler_answers_set_section_and_failures_leave_it_unset(
    ) -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let extractor = FakeExtractor {
            pages: vec![body_page("word", 16)],
        };
        let embedder = CharacterNgramEmbedder::default();
        let source = source(dir.path(), b"y");

        let labeler = FixedLabeler("Method");
        let labeled = Chunker::new(&extractor, &embedder, small_config())?
            .with_labeler(&labeler)
            .segment(&source)?;
        assert!(labeled
            .iter()
            .all(|passage| passage.section() == Some(Section::Method)));

        let unlabeled = Chunker::new(&extractor, &embedder, small_config())?
            .with_labeler(&FailingLabeler)
            .segment(&source)?;
        assert!(unlabeled.iter().all(|passage| passage.section().is_none()));
        Ok(())
    }

    #[test]
    fn invalid_config_is_rejected() {
        let extractor = FakeExtractor { pages: Vec::new() };
        let embedder = CharacterNgramEmbedder::default();
        let config = ChunkingConfig {
            overlap: 8,
            ..small_config()
        };
        assert!(matches!(
            Chunker::new(&extractor, &embedder, config),
            Err(IngestError::InvalidChunkConfig(_))
        ));
    }
}
