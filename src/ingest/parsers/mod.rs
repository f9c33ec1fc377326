pub mod markdown;
pub mod plaintext;

use std::path::Path;

use serde_json::Value;

use super::element::{ContentElement, Metadata};
use crate::error::{RagchatError, Result};

/// How a file's elements are handed to the segmenter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// One element per title, paragraph, list item, ...
    Elements,
    /// The whole document as one uncategorized element
    Single,
}

/// Text clean-up applied to every element after parsing
pub type PostProcessor = fn(&str) -> String;

/// Capability interface for document parsers.
///
/// Parsers classify content into an ordered sequence of elements. They never
/// decide how elements are grouped into records; that belongs to the segmenter.
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Check if this parser can handle the given (lowercase) file extension
    fn can_parse(&self, extension: &str) -> bool;

    /// Split content into categorized elements. `base` carries file-level
    /// provenance and must be copied onto every element.
    fn parse_elements(&self, content: &str, base: &Metadata) -> Result<Vec<ContentElement>>;

    /// MIME-style type recorded as `filetype` metadata
    fn file_type(&self) -> &'static str;
}

/// Collapse newlines, non-breaking spaces and runs of spaces into single spaces
pub fn clean_extra_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parser registry that selects the appropriate parser by extension
pub struct ParserRegistry {
    parsers: Vec<Box<dyn DocumentParser>>,
    post_processors: Vec<PostProcessor>,
}

impl ParserRegistry {
    /// Registry with the built-in markdown and plain-text parsers
    pub fn new() -> Self {
        let mut registry = Self {
            parsers: Vec::new(),
            post_processors: vec![clean_extra_whitespace],
        };

        registry.register(Box::new(markdown::MarkdownParser));
        registry.register(Box::new(plaintext::PlainTextParser));

        registry
    }

    pub fn register(&mut self, parser: Box<dyn DocumentParser>) {
        self.parsers.push(parser);
    }

    pub fn find_parser(&self, extension: &str) -> Option<&dyn DocumentParser> {
        self.parsers
            .iter()
            .find(|p| p.can_parse(extension))
            .map(|p| p.as_ref())
    }

    /// Read and parse a file into elements.
    ///
    /// Any failure (unreadable file, non-UTF-8 content, unsupported extension)
    /// is reported as `ParseFailure` carrying the path.
    pub fn load(&self, path: &Path, mode: ParseMode) -> Result<Vec<ContentElement>> {
        let display = path.to_string_lossy().to_string();
        let failure = |reason: String| RagchatError::ParseFailure {
            path: display.clone(),
            reason,
        };

        let extension = path
            .extension()
            .and_then(|s| s.to_str())
            .unwrap_or("")
            .to_lowercase();

        let parser = self
            .find_parser(&extension)
            .ok_or_else(|| failure(format!("no parser for extension '{}'", extension)))?;

        let bytes = std::fs::read(path).map_err(|e| failure(e.to_string()))?;
        let content = String::from_utf8(bytes)
            .map_err(|_| failure("content is not valid UTF-8 text".to_string()))?;

        let base = base_metadata(path, parser.file_type());
        let elements = parser
            .parse_elements(&content, &base)
            .map_err(|e| failure(e.to_string()))?;

        let elements = self.post_process(elements);
        log::debug!("{} parsed {} element(s) from {}", parser.name(), elements.len(), display);

        Ok(match mode {
            ParseMode::Elements => elements,
            ParseMode::Single => into_single(elements, base),
        })
    }

    fn post_process(&self, elements: Vec<ContentElement>) -> Vec<ContentElement> {
        elements
            .into_iter()
            .map(|mut element| {
                for processor in &self.post_processors {
                    element.text = processor(&element.text);
                }
                element
            })
            .filter(|element| !element.text.is_empty())
            .collect()
    }
}

impl Default for ParserRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Paragraph breaks between elements survive so the splitter can use them.
fn into_single(elements: Vec<ContentElement>, mut base: Metadata) -> Vec<ContentElement> {
    if let Some(languages) = elements.iter().find_map(|e| e.metadata.get("languages")) {
        base.insert("languages".to_string(), languages.clone());
    }
    let text = elements
        .iter()
        .map(|e| e.text.as_str())
        .collect::<Vec<_>>()
        .join("\n\n");
    vec![ContentElement::new(text, None, base)]
}

fn base_metadata(path: &Path, file_type: &str) -> Metadata {
    let mut metadata = Metadata::new();
    metadata.insert(
        "source".to_string(),
        Value::String(path.to_string_lossy().to_string()),
    );
    if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
        metadata.insert("filename".to_string(), Value::String(name.to_string()));
    }
    metadata.insert("filetype".to_string(), Value::String(file_type.to_string()));
    metadata
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::element::ElementCategory;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_parser_registry() {
        let registry = ParserRegistry::new();

        assert_eq!(registry.find_parser("md").map(|p| p.name()), Some("markdown"));
        assert_eq!(registry.find_parser("txt").map(|p| p.name()), Some("plaintext"));
        assert!(registry.find_parser("pdf").is_none());
    }

    #[test]
    fn test_clean_extra_whitespace() {
        assert_eq!(clean_extra_whitespace("  a\u{a0}\u{a0}b\n\nc   d "), "a b c d");
    }

    #[test]
    fn test_load_elements_with_provenance() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("faq_qa.md");
        fs::write(&path, "# What is CEOS?\n\nAn energy   operating system.\n").unwrap();

        let elements = ParserRegistry::new().load(&path, ParseMode::Elements).unwrap();

        assert_eq!(elements.len(), 2);
        assert_eq!(elements[0].category, Some(ElementCategory::Title));
        assert_eq!(elements[1].text, "An energy operating system.");
        assert_eq!(
            elements[1].metadata.get("filename"),
            Some(&Value::String("faq_qa.md".to_string()))
        );
    }

    #[test]
    fn test_load_single_joins_paragraphs() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("notes.md");
        fs::write(&path, "# Notes\n\nFirst paragraph.\n\nSecond paragraph.\n").unwrap();

        let elements = ParserRegistry::new().load(&path, ParseMode::Single).unwrap();

        assert_eq!(elements.len(), 1);
        assert!(elements[0].category.is_none());
        assert_eq!(elements[0].text, "Notes\n\nFirst paragraph.\n\nSecond paragraph.");
        assert!(elements[0].metadata.get("category").is_none());
    }

    #[test]
    fn test_binary_content_is_parse_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("broken.txt");
        fs::write(&path, [0xff_u8, 0xfe, 0x00, 0x9f]).unwrap();

        let err = ParserRegistry::new().load(&path, ParseMode::Single).unwrap_err();
        assert!(matches!(err, RagchatError::ParseFailure { ref path, .. } if path.ends_with("broken.txt")));
    }

    #[test]
    fn test_unsupported_extension_is_parse_failure() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("scan.pdf");
        fs::write(&path, b"%PDF-1.4").unwrap();

        let err = ParserRegistry::new().load(&path, ParseMode::Elements).unwrap_err();
        assert!(matches!(err, RagchatError::ParseFailure { .. }));
    }
}
