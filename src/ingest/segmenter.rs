//! Turns parsed elements into question/answer records or prose chunks.
//!
//! Files named `*_qa.*` are grouped element by element: every `Title` opens a
//! question and the elements that follow form its answer. All other files are
//! treated as one document and split into overlapping windows.

use std::path::Path;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use super::element::{ContentElement, ElementCategory, Metadata};
use super::parsers::{ParseMode, ParserRegistry};
use super::splitter::TextSplitter;
use crate::error::Result;

/// Prefix used for list items folded into an answer
pub const BULLET: &str = "• ";

/// Unit of embedding produced by segmentation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuredRecord {
    /// `None` means plain prose rather than Q&A
    pub question: Option<String>,
    pub answer: String,
    pub metadata: Metadata,
    /// Originating file, shared by every record of a batch
    pub file: String,
}

/// Whether the file name selects element-mode (Q&A) segmentation
pub fn is_qa_file(path: &str) -> bool {
    static QA_PATTERN: OnceLock<Regex> = OnceLock::new();
    QA_PATTERN
        .get_or_init(|| Regex::new(r".+_qa\..+").expect("static pattern"))
        .is_match(path)
}

pub fn parse_mode_for(path: &str) -> ParseMode {
    if is_qa_file(path) {
        ParseMode::Elements
    } else {
        ParseMode::Single
    }
}

/// Group elements into question/answer records.
///
/// Uncategorized elements are emitted immediately as standalone prose and do
/// not touch the open question. A question still open at the end of the
/// stream is finalized with the metadata of the last element seen, even when
/// that element was a standalone emission.
pub fn segment_elements(elements: &[ContentElement], file: &str) -> Vec<StructuredRecord> {
    let mut records = Vec::new();
    let mut question: Option<String> = None;
    let mut answer_parts: Vec<String> = Vec::new();

    for element in elements {
        let content = element.text.trim();

        let Some(category) = &element.category else {
            records.push(StructuredRecord {
                question: None,
                answer: content.to_string(),
                metadata: element.metadata.clone(),
                file: file.to_string(),
            });
            continue;
        };

        match category {
            ElementCategory::Title => {
                if let Some(open) = question.take() {
                    records.push(finalize(&open, &answer_parts, &element.metadata, file));
                    answer_parts.clear();
                }
                question = Some(content.to_string());
            }
            ElementCategory::ListItem => answer_parts.push(format!("{}{}", BULLET, content)),
            _ => answer_parts.push(content.to_string()),
        }
    }

    if let (Some(open), Some(last)) = (question, elements.last()) {
        records.push(finalize(&open, &answer_parts, &last.metadata, file));
    }

    records
}

fn finalize(question: &str, parts: &[String], metadata: &Metadata, file: &str) -> StructuredRecord {
    StructuredRecord {
        question: Some(question.trim().to_string()),
        answer: parts.join("\n").trim().to_string(),
        metadata: metadata.clone(),
        file: file.to_string(),
    }
}

/// Split whole-document elements into overlapping prose windows.
/// Each window keeps the metadata of the element it came from.
pub fn segment_chunked(
    elements: &[ContentElement],
    file: &str,
    splitter: &TextSplitter,
) -> Vec<StructuredRecord> {
    elements
        .iter()
        .flat_map(|element| {
            splitter
                .split_text(&element.text)
                .into_iter()
                .map(move |chunk| StructuredRecord {
                    question: None,
                    answer: chunk,
                    metadata: element.metadata.clone(),
                    file: file.to_string(),
                })
        })
        .collect()
}

/// Load a file through the parser registry and segment it according to its name
pub fn segment_file(
    path: &Path,
    registry: &ParserRegistry,
    splitter: &TextSplitter,
) -> Result<Vec<StructuredRecord>> {
    let file = path.to_string_lossy().to_string();
    let mode = parse_mode_for(&file);
    let elements = registry.load(path, mode)?;

    let records = match mode {
        ParseMode::Elements => segment_elements(&elements, &file),
        ParseMode::Single => segment_chunked(&elements, &file, splitter),
    };
    log::debug!("Segmented {} into {} record(s) ({:?} mode)", file, records.len(), mode);

    Ok(records)
}
