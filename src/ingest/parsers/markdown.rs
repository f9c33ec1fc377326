use pulldown_cmark::{CodeBlockKind, Event, Options, Parser as CmarkParser, Tag, TagEnd};
use serde_json::Value;

use super::DocumentParser;
use crate::error::Result;
use crate::ingest::element::{ContentElement, ElementCategory, Metadata};

/// Markdown parser for Q&A files and knowledge articles
pub struct MarkdownParser;

impl DocumentParser for MarkdownParser {
    fn name(&self) -> &'static str {
        "markdown"
    }

    fn can_parse(&self, extension: &str) -> bool {
        matches!(extension, "md" | "markdown")
    }

    fn file_type(&self) -> &'static str {
        "text/markdown"
    }

    fn parse_elements(&self, content: &str, base: &Metadata) -> Result<Vec<ContentElement>> {
        let mut base = base.clone();
        let mut elements = Vec::new();
        let content = content.replace("\r\n", "\n");

        let body = match split_frontmatter(&content) {
            Some((frontmatter, body)) => {
                if let Some(languages) = frontmatter_languages(frontmatter) {
                    base.insert("languages".to_string(), languages);
                }
                // Frontmatter has no structural role, so it stays uncategorized
                elements.push(ContentElement::new(frontmatter, None, base.clone()));
                body
            }
            None => content.as_str(),
        };

        let mut builder = ElementBuilder::new(base);
        for event in CmarkParser::new_ext(body, Options::ENABLE_TABLES) {
            builder.handle(event);
        }
        elements.extend(builder.finish());

        Ok(elements)
    }
}

/// Returns (frontmatter, body) when the document opens with a `---` block
fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content.strip_prefix("---\n")?;
    let end = rest.find("\n---")?;
    let frontmatter = &rest[..end];
    let after = &rest[end + 4..];
    let body = after.strip_prefix('\n').unwrap_or(after);
    Some((frontmatter, body))
}

fn frontmatter_languages(frontmatter: &str) -> Option<Value> {
    let parsed: serde_yaml_ng::Value = serde_yaml_ng::from_str(frontmatter).ok()?;
    let languages = parsed.get("languages")?;
    let list = match languages {
        serde_yaml_ng::Value::Sequence(items) => items
            .iter()
            .filter_map(|item| item.as_str().map(|s| Value::String(s.to_string())))
            .collect(),
        serde_yaml_ng::Value::String(single) => vec![Value::String(single.clone())],
        _ => return None,
    };
    Some(Value::Array(list))
}

/// Element under construction
struct Pending {
    category: ElementCategory,
    extra: Metadata,
}

struct ElementBuilder {
    base: Metadata,
    elements: Vec<ContentElement>,
    pending: Option<Pending>,
    buffer: String,
    item_depth: usize,
}

impl ElementBuilder {
    fn new(base: Metadata) -> Self {
        Self {
            base,
            elements: Vec::new(),
            pending: None,
            buffer: String::new(),
            item_depth: 0,
        }
    }

    fn begin(&mut self, category: ElementCategory, extra: Metadata) {
        self.flush();
        self.pending = Some(Pending { category, extra });
    }

    fn flush(&mut self) {
        let text = std::mem::take(&mut self.buffer);
        let Some(pending) = self.pending.take() else {
            return;
        };
        if text.trim().is_empty() {
            return;
        }
        let mut metadata = self.base.clone();
        metadata.extend(pending.extra);
        self.elements
            .push(ContentElement::new(text.trim(), Some(pending.category), metadata));
    }

    fn push_text(&mut self, text: &str) {
        if self.pending.is_none() {
            let category = if self.item_depth > 0 {
                ElementCategory::ListItem
            } else {
                ElementCategory::NarrativeText
            };
            self.pending = Some(Pending { category, extra: Metadata::new() });
        }
        self.buffer.push_str(text);
    }

    fn handle(&mut self, event: Event<'_>) {
        match event {
            Event::Start(Tag::Heading { level, .. }) => {
                let mut extra = Metadata::new();
                extra.insert("category_depth".to_string(), Value::from(level as u32));
                self.begin(ElementCategory::Title, extra);
            }
            Event::End(TagEnd::Heading(_)) => self.flush(),
            Event::Start(Tag::Item) => {
                self.item_depth += 1;
                self.begin(ElementCategory::ListItem, Metadata::new());
            }
            Event::End(TagEnd::Item) => {
                self.flush();
                self.item_depth = self.item_depth.saturating_sub(1);
            }
            Event::Start(Tag::Paragraph) if self.item_depth == 0 => {
                self.begin(ElementCategory::NarrativeText, Metadata::new());
            }
            Event::End(TagEnd::Paragraph) => {
                if self.item_depth == 0 {
                    self.flush();
                } else {
                    self.buffer.push(' ');
                }
            }
            Event::Start(Tag::CodeBlock(kind)) => {
                let mut extra = Metadata::new();
                if let CodeBlockKind::Fenced(lang) = kind {
                    if !lang.is_empty() {
                        extra.insert("code_language".to_string(), Value::String(lang.to_string()));
                    }
                }
                self.begin(ElementCategory::CodeSnippet, extra);
            }
            Event::End(TagEnd::CodeBlock) => self.flush(),
            Event::Start(Tag::Table(_)) => self.begin(ElementCategory::Table, Metadata::new()),
            Event::End(TagEnd::TableCell) => self.buffer.push(' '),
            Event::End(TagEnd::TableHead) | Event::End(TagEnd::TableRow) => self.buffer.push('\n'),
            Event::End(TagEnd::Table) => self.flush(),
            Event::Text(text) | Event::Code(text) => self.push_text(&text),
            Event::SoftBreak | Event::HardBreak => self.buffer.push('\n'),
            _ => {}
        }
    }

    fn finish(mut self) -> Vec<ContentElement> {
        self.flush();
        self.elements
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(content: &str) -> Vec<ContentElement> {
        MarkdownParser.parse_elements(content, &Metadata::new()).unwrap()
    }

    fn categories(elements: &[ContentElement]) -> Vec<Option<ElementCategory>> {
        elements.iter().map(|e| e.category.clone()).collect()
    }

    #[test]
    fn test_markdown_parser_can_parse() {
        assert!(MarkdownParser.can_parse("md"));
        assert!(!MarkdownParser.can_parse("txt"));
    }

    #[test]
    fn test_qa_layout() {
        let elements = parse(
            r#"
# How do I reset my meter?

Open the settings page.

- Choose *Meters*
- Press `Reset`

## Who can see my data?

Only you.
"#,
        );

        assert_eq!(
            categories(&elements),
            vec![
                Some(ElementCategory::Title),
                Some(ElementCategory::NarrativeText),
                Some(ElementCategory::ListItem),
                Some(ElementCategory::ListItem),
                Some(ElementCategory::Title),
                Some(ElementCategory::NarrativeText),
            ]
        );
        assert_eq!(elements[0].text, "How do I reset my meter?");
        assert_eq!(elements[3].text, "Press Reset");
        assert_eq!(elements[4].metadata.get("category_depth"), Some(&Value::from(2u32)));
    }

    #[test]
    fn test_nested_list_items_are_separate() {
        let elements = parse("- outer\n  - inner\n- last\n");
        let texts: Vec<&str> = elements.iter().map(|e| e.text.as_str()).collect();
        assert_eq!(texts, vec!["outer", "inner", "last"]);
        assert!(elements
            .iter()
            .all(|e| e.category == Some(ElementCategory::ListItem)));
    }

    #[test]
    fn test_frontmatter_is_uncategorized_and_sets_languages() {
        let elements = parse("---\ntitle: FAQ\nlanguages: [eng, swe]\n---\n# Q\n\nA\n");

        assert!(elements[0].category.is_none());
        assert!(elements[0].text.contains("title: FAQ"));
        assert_eq!(
            elements[1].metadata.get("languages"),
            Some(&serde_json::json!(["eng", "swe"]))
        );
    }

    #[test]
    fn test_crlf_frontmatter_is_recognized() {
        let elements = parse("---\r\nlanguages: [swe]\r\n---\r\n# Fråga\r\n\r\nSvar\r\n");

        assert!(elements[0].category.is_none());
        assert_eq!(
            categories(&elements[1..]),
            vec![Some(ElementCategory::Title), Some(ElementCategory::NarrativeText)]
        );
        assert_eq!(elements[1].text, "Fråga");
        assert_eq!(elements[2].metadata.get("languages"), Some(&serde_json::json!(["swe"])));
    }

    #[test]
    fn test_code_block_and_table() {
        let elements = parse("```rust\nfn main() {}\n```\n\n| a | b |\n|---|---|\n| 1 | 2 |\n");

        assert_eq!(elements[0].category, Some(ElementCategory::CodeSnippet));
        assert_eq!(
            elements[0].metadata.get("code_language"),
            Some(&Value::String("rust".to_string()))
        );
        assert_eq!(elements[1].category, Some(ElementCategory::Table));
        assert!(elements[1].text.contains('1'));
    }
}
