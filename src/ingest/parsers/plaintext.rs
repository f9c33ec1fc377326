use super::DocumentParser;
use crate::error::Result;
use crate::ingest::element::{ContentElement, ElementCategory, Metadata};

/// Plain text parser.
///
/// Blocks are separated by blank lines. A block made only of bullet lines
/// becomes one list item per line; a short single line ending in `?` or `:`
/// (or written in capitals) is a title; everything else is narrative text.
pub struct PlainTextParser;

const MAX_TITLE_CHARS: usize = 120;
const BULLETS: [&str; 4] = ["- ", "* ", "• ", "+ "];

impl DocumentParser for PlainTextParser {
    fn name(&self) -> &'static str {
        "plaintext"
    }

    fn can_parse(&self, extension: &str) -> bool {
        matches!(extension, "txt" | "text" | "log" | "csv")
    }

    fn file_type(&self) -> &'static str {
        "text/plain"
    }

    fn parse_elements(&self, content: &str, base: &Metadata) -> Result<Vec<ContentElement>> {
        let mut elements = Vec::new();

        for block in blocks(content) {
            let lines: Vec<&str> = block.iter().map(|l| l.trim()).collect();

            if lines.iter().all(|l| strip_bullet(l).is_some()) {
                for line in &lines {
                    if let Some(item) = strip_bullet(line) {
                        elements.push(ContentElement::new(
                            item,
                            Some(ElementCategory::ListItem),
                            base.clone(),
                        ));
                    }
                }
                continue;
            }

            let text = lines.join("\n");
            let category = if lines.len() == 1 && looks_like_title(lines[0]) {
                ElementCategory::Title
            } else {
                ElementCategory::NarrativeText
            };
            elements.push(ContentElement::new(text, Some(category), base.clone()));
        }

        Ok(elements)
    }
}

fn blocks(content: &str) -> Vec<Vec<&str>> {
    let mut blocks = Vec::new();
    let mut current = Vec::new();
    for line in content.lines() {
        if line.trim().is_empty() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
        } else {
            current.push(line);
        }
    }
    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn strip_bullet(line: &str) -> Option<&str> {
    if let Some(rest) = BULLETS.iter().find_map(|b| line.strip_prefix(b)) {
        return Some(rest.trim());
    }
    // Numbered items: "1. ", "12) "
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits > 0 {
        let rest = &line[digits..];
        if let Some(item) = rest.strip_prefix(". ").or_else(|| rest.strip_prefix(") ")) {
            return Some(item.trim());
        }
    }
    None
}

fn looks_like_title(line: &str) -> bool {
    if line.chars().count() > MAX_TITLE_CHARS {
        return false;
    }
    if line.ends_with('?') || line.ends_with(':') {
        return true;
    }
    let letters: Vec<char> = line.chars().filter(|c| c.is_alphabetic()).collect();
    letters.len() >= 3 && letters.iter().all(|c| c.is_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plaintext_classification() {
        let content = "What does CEOS stand for?\n\nCrossbreed Energy Operating System.\nIt runs on the edge.\n\n- fast\n- local\n\nOVERVIEW\n";
        let elements = PlainTextParser.parse_elements(content, &Metadata::new()).unwrap();

        let categories: Vec<Option<ElementCategory>> =
            elements.iter().map(|e| e.category.clone()).collect();
        assert_eq!(
            categories,
            vec![
                Some(ElementCategory::Title),
                Some(ElementCategory::NarrativeText),
                Some(ElementCategory::ListItem),
                Some(ElementCategory::ListItem),
                Some(ElementCategory::Title),
            ]
        );
        assert_eq!(elements[2].text, "fast");
    }

    #[test]
    fn test_numbered_items() {
        assert_eq!(strip_bullet("1. first"), Some("first"));
        assert_eq!(strip_bullet("12) twelfth"), Some("twelfth"));
        assert_eq!(strip_bullet("2024 was a year"), None);
    }

    #[test]
    fn test_long_question_is_narrative() {
        let long = format!("{}?", "why ".repeat(40));
        assert!(!looks_like_title(&long));
    }
}
