use std::path::PathBuf;

use super::parsers::ParserRegistry;
use super::segmenter::{segment_file, StructuredRecord};
use super::splitter::TextSplitter;
use crate::error::{RagchatError, Result};

/// Expand a glob pattern (e.g. `data/training/*.md`) into matching files.
///
/// Directories are skipped, as are entries that cannot be read while
/// walking; the result is in lexical order.
pub fn find_files(pattern: &str) -> Result<Vec<PathBuf>> {
    let paths = glob::glob(pattern)
        .map_err(|e| RagchatError::InvalidInput(format!("Invalid glob pattern '{}': {}", pattern, e)))?;

    let mut files = Vec::new();
    for entry in paths {
        match entry {
            Ok(path) if path.is_file() => files.push(path),
            Ok(_) => {}
            Err(e) => log::warn!("Skipping unreadable path while scanning {}: {}", pattern, e),
        }
    }
    files.sort();

    log::info!("Discovered {} files matching {}", files.len(), pattern);
    Ok(files)
}

/// Segment every file matching `pattern`, one record batch per file.
///
/// A file that fails to parse is logged and yields an empty batch; the rest of
/// the directory is still processed.
pub fn scan_directory(
    pattern: &str,
    registry: &ParserRegistry,
    splitter: &TextSplitter,
) -> Result<Vec<Vec<StructuredRecord>>> {
    let files = find_files(pattern)?;
    let mut batches = Vec::with_capacity(files.len());

    for path in files {
        match segment_file(&path, registry, splitter) {
            Ok(records) => batches.push(records),
            Err(e @ RagchatError::ParseFailure { .. }) => {
                log::warn!("{}", e);
                batches.push(Vec::new());
            }
            Err(e) => return Err(e),
        }
    }

    Ok(batches)
}
