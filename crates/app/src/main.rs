use anyhow::Context;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use paper_rag_core::{
    build_generator, ingest_folder, CharacterNgramEmbedder, Chunker, EmbeddingConfig, Embedder,
    GeneratorConfig, HttpReranker, IndexConfig, InMemoryIndex, KeywordDocument, LexicalReranker,
    LopdfExtractor, OllamaEmbedder, PartialRatioMatcher, QdrantStore, QueryFilters, RagConfig,
    RagPipeline, Reranker, RerankerConfig, RetrievalEngine, RetrievalRequest, RetrievalResult,
    Section, SectionClassifier, TextGenerator, VectorIndex,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "paper-rag", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// TOML config file; every section is optional.
    #[arg(long, env = "PAPER_RAG_CONFIG")]
    config: Option<PathBuf>,

    /// Qdrant base URL, used when the config selects the qdrant index.
    #[arg(long, env = "QDRANT_URL")]
    qdrant_url: Option<String>,

    /// Qdrant collection name.
    #[arg(long, env = "QDRANT_COLLECTION")]
    qdrant_collection: Option<String>,

    /// Ollama base URL for embedding and generation backends.
    #[arg(long, env = "OLLAMA_URL")]
    ollama_url: Option<String>,

    /// Cross-encoder base URL, used when the config selects the http reranker.
    #[arg(long, env = "RERANKER_URL")]
    reranker_url: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Segment every PDF under a folder and index its passages.
    Ingest {
        /// Folder that contains PDFs recursively.
        #[arg(long)]
        folder: PathBuf,
    },
    /// Run the retrieval funnel and print the surviving passages.
    Retrieve {
        #[command(flatten)]
        query: QueryArgs,
        /// Print the resolved filters and per-passage provenance.
        #[arg(long, default_value_t = false)]
        explain: bool,
    },
    /// Retrieve, then stream a grounded answer from the generator.
    Ask {
        #[command(flatten)]
        query: QueryArgs,
    },
}

#[derive(Args)]
struct QueryArgs {
    /// Question in natural language.
    #[arg(long)]
    query: String,
    /// Vector candidates fetched before reranking.
    #[arg(long)]
    n_candidates: Option<usize>,
    /// Passages kept after reranking.
    #[arg(long)]
    final_k: Option<usize>,
    /// Restrict to one section: introduction, background, method, results,
    /// discussion or conclusion.
    #[arg(long)]
    section: Option<Section>,
    #[arg(long)]
    pdf_name: Option<String>,
    #[arg(long)]
    author: Option<String>,
    #[arg(long)]
    title: Option<String>,
    /// Ingest this folder before querying. Needed with the in-memory index,
    /// which does not outlive the process.
    #[arg(long)]
    folder: Option<PathBuf>,
    /// Add keyword matches over the indexed passages (in-memory index only).
    #[arg(long, default_value_t = false)]
    hybrid: bool,
}

impl QueryArgs {
    fn request(
        &self,
        config: &RagConfig,
        corpus: Option<Vec<KeywordDocument>>,
    ) -> RetrievalRequest {
        let request = RetrievalRequest::new(
            self.query.clone(),
            self.n_candidates.unwrap_or(config.retrieval.n_candidates),
            self.final_k.unwrap_or(config.retrieval.final_k),
        )
        .with_filters(QueryFilters {
            section: self.section,
            pdf_name: self.pdf_name.clone(),
            author: self.author.clone(),
            title: self.title.clone(),
        });

        match corpus {
            Some(corpus) => request.with_keyword_corpus(corpus),
            None => request,
        }
    }
}

enum IndexBackend {
    Memory(InMemoryIndex),
    Qdrant(QdrantStore),
}

impl IndexBackend {
    fn as_index(&self) -> &dyn VectorIndex {
        match self {
            IndexBackend::Memory(index) => index,
            IndexBackend::Qdrant(store) => store,
        }
    }

    fn keyword_corpus(&self) -> Option<Vec<KeywordDocument>> {
        match self {
            IndexBackend::Memory(index) => Some(index.keyword_corpus()),
            IndexBackend::Qdrant(_) => None,
        }
    }

    fn is_ephemeral(&self) -> bool {
        matches!(self, IndexBackend::Memory(_))
    }
}

fn load_config(cli: &Cli) -> anyhow::Result<RagConfig> {
    let mut config = match &cli.config {
        Some(path) => RagConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => RagConfig::default(),
    };

    if let IndexConfig::Qdrant {
        endpoint,
        collection,
    } = &mut config.index
    {
        if let Some(url) = &cli.qdrant_url {
            *endpoint = url.clone();
        }
        if let Some(name) = &cli.qdrant_collection {
            *collection = name.clone();
        }
    }
    if let Some(url) = &cli.ollama_url {
        if let EmbeddingConfig::Ollama { endpoint, .. } = &mut config.embedding {
            *endpoint = url.clone();
        }
        if let GeneratorConfig::Ollama { endpoint, .. } = &mut config.generator {
            *endpoint = url.clone();
        }
    }
    if let (Some(url), RerankerConfig::Http { endpoint }) =
        (&cli.reranker_url, &mut config.reranker)
    {
        *endpoint = url.clone();
    }

    Ok(config)
}

fn build_embedder(config: &EmbeddingConfig) -> anyhow::Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match config {
        EmbeddingConfig::Ngram { dimensions } => Box::new(CharacterNgramEmbedder {
            dimensions: *dimensions,
        }),
        EmbeddingConfig::Ollama { endpoint, model } => Box::new(
            OllamaEmbedder::connect(endpoint, model.clone())
                .with_context(|| format!("connecting to embedding model {model} at {endpoint}"))?,
        ),
    };
    Ok(embedder)
}

fn build_index(config: &IndexConfig, dimensions: usize) -> anyhow::Result<IndexBackend> {
    Ok(match config {
        IndexConfig::Memory => IndexBackend::Memory(InMemoryIndex::new()),
        IndexConfig::Qdrant {
            endpoint,
            collection,
        } => {
            let store = QdrantStore::new(endpoint.clone(), collection.clone(), dimensions)?;
            store
                .ensure_collection()
                .with_context(|| format!("preparing qdrant collection {collection}"))?;
            IndexBackend::Qdrant(store)
        }
    })
}

fn build_reranker(config: &RerankerConfig) -> anyhow::Result<Box<dyn Reranker>> {
    let reranker: Box<dyn Reranker> = match config {
        RerankerConfig::Lexical => Box::new(LexicalReranker),
        RerankerConfig::Http { endpoint } => Box::new(HttpReranker::new(endpoint)?),
    };
    Ok(reranker)
}

fn run_ingest(folder: &Path, chunker: &Chunker<'_>, index: &IndexBackend) -> anyhow::Result<()> {
    let report = ingest_folder(folder, chunker, index.as_index())?;

    if !report.skipped_files.is_empty() {
        warn!(
            skipped = report.skipped_files.len(),
            folder = %folder.display(),
            "some pdfs were skipped"
        );
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped pdf");
        }
    }

    println!(
        "{} passages from {} pdf(s) ingested at {}",
        report.passage_count(),
        report.ingested_files.len(),
        Utc::now().to_rfc3339()
    );
    Ok(())
}

fn print_passages(result: &RetrievalResult, explain: bool) {
    if explain {
        println!("query: {}", result.query());
        println!("rewritten: {}", result.rewritten_query());
        let filters = result.applied_filters();
        println!(
            "filters: section={} pdf_name={} author={} title={}",
            filters.section.map(|section| section.as_str()).unwrap_or("-"),
            filters.pdf_name.as_deref().unwrap_or("-"),
            filters.author.as_deref().unwrap_or("-"),
            filters.title.as_deref().unwrap_or("-"),
        );
        if let Some(source) = result.section_source() {
            println!("section_source: {source:?}");
        }
        if let Some(pinned) = result.pinned_source() {
            println!("pinned_source: {pinned}");
        }
    }

    if result.is_empty() {
        println!("no passages found");
        return;
    }

    for (rank, passage) in result.documents().iter().enumerate() {
        let page = passage
            .metadata
            .resolved_page()
            .map(|page| page.to_string())
            .unwrap_or_else(|| "?".to_string());
        println!(
            "[{rank}] score={:.4} pdf={} page={page} title={}",
            passage.score, passage.metadata.pdf_name, passage.metadata.title
        );
        if explain {
            println!(
                "  origin={:?} section={}",
                passage.origin,
                passage
                    .metadata
                    .section
                    .map(|section| section.as_str())
                    .unwrap_or("-")
            );
        }
        println!("{}", passage.text);
    }
}

fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        "paper-rag boot"
    );

    let embedder = build_embedder(&config.embedding)?;
    let index = build_index(&config.index, embedder.dimensions())?;
    let reranker = build_reranker(&config.reranker)?;
    let generator = build_generator(&config.generator)?;
    let extractor = LopdfExtractor;

    let mut chunker = Chunker::new(&extractor, embedder.as_ref(), config.chunking)?;
    if let Some(labeler) = generator.as_deref() {
        chunker = chunker.with_labeler(labeler);
    }

    let query = match &cli.command {
        Command::Ingest { folder } => {
            if index.is_ephemeral() {
                warn!("the in-memory index is dropped on exit; use --folder with retrieve or ask");
            }
            return run_ingest(folder, &chunker, &index);
        }
        Command::Retrieve { query, .. } | Command::Ask { query } => query,
    };

    if let Some(folder) = &query.folder {
        run_ingest(folder, &chunker, &index)?;
    } else if index.is_ephemeral() {
        warn!("querying an empty in-memory index; pass --folder to ingest first");
    }

    let classifier = match SectionClassifier::new(embedder.as_ref()) {
        Ok(classifier) => Some(classifier),
        Err(error) => {
            warn!(%error, "section classifier unavailable");
            None
        }
    };

    let mut engine = RetrievalEngine::new(embedder.as_ref(), index.as_index(), reranker.as_ref())
        .with_config(&config.retrieval)
        .with_fuzzy_matcher(&PartialRatioMatcher);
    if let Some(generator) = generator.as_deref() {
        engine = engine.with_generator(generator);
    }
    if let Some(classifier) = &classifier {
        engine = engine.with_classifier(classifier);
    }

    let corpus = if query.hybrid {
        let corpus = index.keyword_corpus();
        if corpus.is_none() {
            warn!("--hybrid needs the in-memory index; keyword stage skipped");
        }
        corpus
    } else {
        None
    };
    let request = query.request(&config, corpus);

    match &cli.command {
        Command::Ask { .. } => {
            let generator: &dyn TextGenerator = generator
                .as_deref()
                .context("the generator is disabled in the config; ask needs one")?;
            let pipeline = RagPipeline::new(&engine, generator, config.retrieval.n_candidates);
            let (stream, result) = pipeline.answer_stream(&request)?;

            let mut stdout = std::io::stdout().lock();
            for fragment in stream {
                stdout.write_all(fragment?.as_bytes())?;
                stdout.flush()?;
            }
            writeln!(stdout)?;

            for passage in result.documents() {
                let page = passage
                    .metadata
                    .resolved_page()
                    .map(|page| format!(", page {page}"))
                    .unwrap_or_default();
                writeln!(stdout, "source: {}{page}", passage.metadata.title)?;
            }
        }
        Command::Retrieve { explain, .. } => {
            let result = engine.retrieve(&request)?;
            print_passages(&result, *explain);
        }
        Command::Ingest { .. } => {}
    }

    Ok(())
}
