use crate::chunking::{Chunker, SourceFile};
use crate::error::IngestError;
use crate::traits::VectorIndex;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

#[derive(Debug, Clone)]
pub struct IngestedPdf {
    pub path: PathBuf,
    pub passages: usize,
}

#[derive(Debug, Clone)]
pub struct SkippedPdf {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct IngestionReport {
    pub ingested_files: Vec<IngestedPdf>,
    pub skipped_files: Vec<SkippedPdf>,
}

impl IngestionReport {
    pub fn passage_count(&self) -> usize {
        self.ingested_files.iter().map(|file| file.passages).sum()
    }
}

/// Segments every PDF under `folder` and upserts its passages. A file that
/// fails to read, segment or store is recorded and skipped.
pub fn ingest_folder(
    folder: &Path,
    chunker: &Chunker<'_>,
    index: &dyn VectorIndex,
) -> Result<IngestionReport, IngestError> {
    let files = discover_pdf_files(folder);

    if files.is_empty() {
        return Err(IngestError::InvalidArgument(format!(
            "no pdf files found in {}",
            folder.display()
        )));
    }

    let mut report = IngestionReport::default();

    for path in files {
        let outcome = (|| {
            let source = SourceFile::open(&path)?;
            let passages = chunker.segment(&source)?;
            index.upsert(&passages)?;
            Ok::<_, IngestError>(passages.len())
        })();

        match outcome {
            Ok(passages) => {
                info!(path = %path.display(), passages, "ingested pdf");
                report.ingested_files.push(IngestedPdf { path, passages });
            }
            Err(error) => {
                warn!(path = %path.display(), %error, "skipping pdf");
                report.skipped_files.push(SkippedPdf {
                    path,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}
