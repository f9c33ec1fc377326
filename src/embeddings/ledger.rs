use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Component, Path, PathBuf};

use crate::error::{RagchatError, Result};

/// Marker files recording which source ids have been embedded.
///
/// One empty-ish file per id lives under `<embeddings_path>/indexed/<id>`.
/// Markers are created with `create_new`, so two writers racing on the same
/// id cannot both claim it.
#[derive(Debug, Clone)]
pub struct IndexLedger {
    root: PathBuf,
}

impl IndexLedger {
    pub fn new(embeddings_path: &Path) -> Self {
        Self {
            root: embeddings_path.join("indexed"),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn marker_path(&self, id: &str) -> Result<PathBuf> {
        Ok(self.root.join(normalize_id(id)?))
    }

    pub fn is_indexed(&self, id: &str) -> Result<bool> {
        Ok(self.marker_path(id)?.is_file())
    }

    /// Record `id` as indexed. Returns false if a marker already existed.
    pub fn mark(&self, id: &str) -> Result<bool> {
        let path = self.marker_path(id)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(mut file) => {
                writeln!(file, "{}\t{}", id, chrono::Utc::now().to_rfc3339())?;
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Normalize a source id into a relative path usable under the ledger root.
///
/// Backslashes become forward slashes and leading `./` segments are dropped.
/// Empty ids, absolute paths and `..` segments are rejected.
pub fn normalize_id(id: &str) -> Result<String> {
    let unified = id.replace('\\', "/");
    let mut trimmed = unified.as_str();
    while let Some(rest) = trimmed.strip_prefix("./") {
        trimmed = rest;
    }

    if trimmed.trim().is_empty() {
        return Err(RagchatError::InvalidInput("Source id must not be empty".into()));
    }

    let path = Path::new(trimmed);
    for component in path.components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            _ => {
                return Err(RagchatError::InvalidInput(format!(
                    "Source id '{}' must be a relative path without '..'",
                    id
                )))
            }
        }
    }

    Ok(trimmed.to_string())
}
