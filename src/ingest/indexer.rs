use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::{Config, CorporaConfig};
use crate::embeddings::{normalize_id, EmbeddingsStore};
use crate::error::{RagchatError, Result};

use super::parsers::ParserRegistry;
use super::scanner::scan_directory;
use super::splitter::TextSplitter;

/// Uploads with these extensions are written as raw bytes
pub const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "tiff", "pdf", "zip", "rar", "7z", "mp3", "wav", "wma", "mp4",
    "mov", "avi", "flv", "mkv",
];

pub fn is_binary_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Outcome of one indexing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub stored: usize,
    pub skipped: usize,
    /// Files that produced no records (including parse failures)
    pub empty: usize,
    /// Files whose records could not be embedded or stored
    pub failed: usize,
}

impl IndexReport {
    pub fn merge(self, other: IndexReport) -> IndexReport {
        IndexReport {
            stored: self.stored + other.stored,
            skipped: self.skipped + other.skipped,
            empty: self.empty + other.empty,
            failed: self.failed + other.failed,
        }
    }
}

/// Feeds the training, knowledge and user corpora into the embeddings store
pub struct Indexer {
    store: Arc<EmbeddingsStore>,
    registry: ParserRegistry,
    splitter: TextSplitter,
    data_dir: PathBuf,
    corpora: CorporaConfig,
}

impl Indexer {
    pub fn new(
        store: Arc<EmbeddingsStore>,
        data_dir: impl Into<PathBuf>,
        corpora: CorporaConfig,
        splitter: TextSplitter,
    ) -> Self {
        Self {
            store,
            registry: ParserRegistry::new(),
            splitter,
            data_dir: data_dir.into(),
            corpora,
        }
    }

    pub fn from_config(config: &Config, store: Arc<EmbeddingsStore>) -> Result<Self> {
        Ok(Self::new(
            store,
            config.data_dir(),
            config.corpora.clone(),
            TextSplitter::from_config(&config.chunking)?,
        ))
    }

    pub fn store(&self) -> &Arc<EmbeddingsStore> {
        &self.store
    }

    /// Directory uploads are written to
    pub fn user_dir(&self) -> PathBuf {
        let dir = Path::new(&self.corpora.user).parent().unwrap_or_else(|| Path::new(""));
        self.data_dir.join(dir)
    }

    /// Ledger id for a scanned file: its path relative to the corpus root
    fn source_id(&self, file: &str) -> Result<String> {
        let path = Path::new(file);
        let relative = path
            .strip_prefix(&self.data_dir)
            .ok()
            .map(Path::to_path_buf)
            .or_else(|| {
                let file = path.canonicalize().ok()?;
                let root = self.data_dir.canonicalize().ok()?;
                file.strip_prefix(&root).ok().map(Path::to_path_buf)
            })
            .unwrap_or_else(|| path.to_path_buf());
        normalize_id(&relative.to_string_lossy())
    }

    /// Index every file matching `pattern` (relative to the corpus root)
    pub async fn index_files(&self, pattern: &str) -> Result<IndexReport> {
        let full_pattern = self.data_dir.join(pattern).to_string_lossy().to_string();
        let batches = scan_directory(&full_pattern, &self.registry, &self.splitter)?;

        let mut report = IndexReport::default();
        for records in batches {
            let Some(first) = records.first() else {
                report.empty += 1;
                continue;
            };
            let id = match self.source_id(&first.file) {
                Ok(id) => id,
                Err(e) => {
                    log::warn!("FAILED: {}: {}", first.file, e);
                    report.failed += 1;
                    continue;
                }
            };

            match self.store.upsert(&records, Some(id.as_str())).await {
                Ok(true) => {
                    log::info!("STORED: {}", id);
                    report.stored += 1;
                }
                Ok(false) => {
                    log::info!("SKIPPED: {}", id);
                    report.skipped += 1;
                }
                // File-scoped: the ledger has no marker, so the next run retries it
                Err(
                    e @ (RagchatError::StoreWriteFailure { .. }
                    | RagchatError::Embedding(_)
                    | RagchatError::InvalidInput(_)),
                ) => {
                    log::warn!("FAILED: {}: {}", id, e);
                    report.failed += 1;
                }
                Err(e) => return Err(e),
            }
        }

        Ok(report)
    }

    /// Training corpus, then knowledge corpus
    pub async fn system_index(&self) -> Result<IndexReport> {
        let training = self.index_files(&self.corpora.training).await?;
        let knowledge = self.index_files(&self.corpora.knowledge).await?;
        let report = training.merge(knowledge);
        log::info!(
            "System index: {} stored, {} skipped, {} empty, {} failed",
            report.stored,
            report.skipped,
            report.empty,
            report.failed
        );
        Ok(report)
    }

    pub async fn user_index(&self) -> Result<IndexReport> {
        let report = self.index_files(&self.corpora.user).await?;
        log::info!(
            "User index: {} stored, {} skipped, {} empty, {} failed",
            report.stored,
            report.skipped,
            report.empty,
            report.failed
        );
        Ok(report)
    }

    /// Write an uploaded file into the user corpus and re-run the user index.
    ///
    /// Binary extensions are written verbatim; everything else must be UTF-8.
    pub async fn add_file_to_user_index(&self, file_name: &str, content: &[u8]) -> Result<IndexReport> {
        let name = Path::new(file_name);
        if file_name.trim().is_empty() || name.file_name().map(|n| n != name.as_os_str()).unwrap_or(true) {
            return Err(RagchatError::InvalidInput(format!(
                "Upload name must be a plain file name: '{}'",
                file_name
            )));
        }

        let dir = self.user_dir();
        tokio::fs::create_dir_all(&dir).await?;
        let target = dir.join(name);

        if is_binary_extension(file_name) {
            tokio::fs::write(&target, content).await?;
        } else {
            let text = std::str::from_utf8(content).map_err(|e| {
                RagchatError::InvalidInput(format!("{} is not valid UTF-8 text: {}", file_name, e))
            })?;
            tokio::fs::write(&target, text).await?;
        }
        log::info!("Saved upload {} ({} bytes)", target.display(), content.len());

        self.user_index().await
    }
}
