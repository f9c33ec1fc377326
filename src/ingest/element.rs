use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Free-form provenance attached to elements and records
pub type Metadata = Map<String, Value>;

/// Category tag assigned by a document parser
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ElementCategory {
    Title,
    ListItem,
    NarrativeText,
    CodeSnippet,
    Table,
    Other(String),
}

impl ElementCategory {
    pub fn as_str(&self) -> &str {
        match self {
            ElementCategory::Title => "Title",
            ElementCategory::ListItem => "ListItem",
            ElementCategory::NarrativeText => "NarrativeText",
            ElementCategory::CodeSnippet => "CodeSnippet",
            ElementCategory::Table => "Table",
            ElementCategory::Other(name) => name,
        }
    }
}

impl fmt::Display for ElementCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of extracted content, in document order
#[derive(Debug, Clone, PartialEq)]
pub struct ContentElement {
    pub text: String,
    pub category: Option<ElementCategory>,
    pub metadata: Metadata,
}

impl ContentElement {
    /// Builds an element and mirrors the category into its metadata, the way
    /// downstream records expect to find it.
    pub fn new(text: impl Into<String>, category: Option<ElementCategory>, mut metadata: Metadata) -> Self {
        if let Some(category) = &category {
            metadata.insert("category".to_string(), Value::String(category.to_string()));
        }
        Self {
            text: text.into(),
            category,
            metadata,
        }
    }

    pub fn title(text: impl Into<String>) -> Self {
        Self::new(text, Some(ElementCategory::Title), Metadata::new())
    }

    pub fn list_item(text: impl Into<String>) -> Self {
        Self::new(text, Some(ElementCategory::ListItem), Metadata::new())
    }

    pub fn narrative(text: impl Into<String>) -> Self {
        Self::new(text, Some(ElementCategory::NarrativeText), Metadata::new())
    }

    pub fn uncategorized(text: impl Into<String>) -> Self {
        Self::new(text, None, Metadata::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_is_mirrored_into_metadata() {
        let element = ContentElement::title("What is CEOS?");
        assert_eq!(
            element.metadata.get("category"),
            Some(&Value::String("Title".to_string()))
        );

        let bare = ContentElement::uncategorized("loose text");
        assert!(bare.metadata.get("category").is_none());
    }

    #[test]
    fn test_other_category_display() {
        assert_eq!(ElementCategory::Other("Footer".into()).to_string(), "Footer");
    }
}
