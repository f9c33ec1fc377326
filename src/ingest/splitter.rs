use std::collections::VecDeque;

use crate::config::ChunkingConfig;
use crate::error::{RagchatError, Result};

const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

/// Recursive character splitter for free text.
///
/// Tries paragraph breaks first, then line breaks, then spaces, then single
/// characters, and merges the pieces back into windows of at most
/// `chunk_size` characters. Consecutive windows share up to `chunk_overlap`
/// characters of trailing context. Lengths are counted in `char`s, so
/// multi-byte text is never split inside a character.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagchatError::Config("chunk_size must be greater than 0".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagchatError::Config(format!(
                "chunk_overlap ({}) must be less than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    /// Split text into trimmed, non-empty windows in document order
    pub fn split_text(&self, text: &str) -> Vec<String> {
        let separators: Vec<&str> = self.separators.iter().map(|s| s.as_str()).collect();
        self.split_recursive(text, &separators)
    }

    fn split_recursive(&self, text: &str, separators: &[&str]) -> Vec<String> {
        // First separator present in the text; "" always matches
        let (index, separator) = separators
            .iter()
            .enumerate()
            .find(|(_, sep)| sep.is_empty() || text.contains(**sep))
            .map(|(i, sep)| (i, *sep))
            .unwrap_or((separators.len().saturating_sub(1), ""));
        let remaining = if separator.is_empty() { &[][..] } else { &separators[index + 1..] };

        let mut chunks = Vec::new();
        let mut small: Vec<String> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(&piece) < self.chunk_size {
                small.push(piece);
                continue;
            }
            if !small.is_empty() {
                chunks.extend(self.merge_splits(&small));
                small.clear();
            }
            if remaining.is_empty() {
                chunks.push(piece);
            } else {
                chunks.extend(self.split_recursive(&piece, remaining));
            }
        }
        if !small.is_empty() {
            chunks.extend(self.merge_splits(&small));
        }

        chunks
    }

    /// Greedily pack pieces into windows, carrying trailing pieces forward as overlap
    fn merge_splits(&self, pieces: &[String]) -> Vec<String> {
        let mut windows = Vec::new();
        let mut current: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !current.is_empty() {
                if total > self.chunk_size {
                    log::warn!(
                        "Created a chunk of {} characters, longer than the configured {}",
                        total,
                        self.chunk_size
                    );
                }
                push_window(&mut windows, &current);

                while total > self.chunk_overlap || (total + len > self.chunk_size && total > 0) {
                    match current.pop_front() {
                        Some(front) => total -= char_len(front),
                        None => break,
                    }
                }
            }
            current.push_back(piece);
            total += len;
        }
        push_window(&mut windows, &current);

        windows
    }
}

fn push_window(windows: &mut Vec<String>, current: &VecDeque<&str>) {
    let joined: String = current.iter().copied().collect();
    let trimmed = joined.trim();
    if !trimmed.is_empty() {
        windows.push(trimmed.to_string());
    }
}

/// Split on `separator`, attaching each separator to the piece that follows it
fn split_keeping_separator(text: &str, separator: &str) -> Vec<String> {
    if separator.is_empty() {
        return text.chars().map(String::from).collect();
    }
    let mut parts = text.split(separator);
    let mut pieces = Vec::new();
    if let Some(first) = parts.next() {
        pieces.push(first.to_string());
    }
    for part in parts {
        pieces.push(format!("{}{}", separator, part));
    }
    pieces.retain(|p| !p.is_empty());
    pieces
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_overlap_not_smaller_than_size() {
        assert!(matches!(TextSplitter::new(100, 100), Err(RagchatError::Config(_))));
        assert!(matches!(TextSplitter::new(0, 0), Err(RagchatError::Config(_))));
        assert!(TextSplitter::new(1024, 100).is_ok());
    }

    #[test]
    fn test_short_text_is_single_chunk() {
        let splitter = TextSplitter::new(1024, 100).unwrap();
        let chunks = splitter.split_text("  One paragraph.\n\nAnother one.  ");
        assert_eq!(chunks, vec!["One paragraph.\n\nAnother one.".to_string()]);
    }

    #[test]
    fn test_empty_text() {
        let splitter = TextSplitter::new(1024, 100).unwrap();
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("   \n\n ").is_empty());
    }

    #[test]
    fn test_windows_bounded_and_overlapping() {
        let splitter = TextSplitter::new(1024, 100).unwrap();
        let text = "a ".repeat(1000);
        let chunks = splitter.split_text(&text);

        assert!(chunks.len() >= 2);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1024, "chunk too long: {}", chunk.len());
        }
        // The start of each window repeats the tail of the previous one
        for pair in chunks.windows(2) {
            let head: String = pair[1].chars().take(51).collect();
            assert!(pair[0].ends_with(&head), "no overlap between consecutive windows");
        }
    }

    /// Longest suffix of `a` that is also a prefix of `b` (ASCII only)
    fn shared_overlap(a: &str, b: &str) -> usize {
        (1..=a.len().min(b.len()))
            .rev()
            .find(|&k| a.ends_with(&b[..k]))
            .unwrap_or(0)
    }

    #[test]
    fn test_overlap_is_bounded_and_nothing_is_lost() {
        let splitter = TextSplitter::new(1024, 100).unwrap();
        let text = (0..500).map(|i| format!("w{:04}", i)).collect::<Vec<_>>().join(" ");
        assert_eq!(text.len(), 2999);

        let chunks = splitter.split_text(&text);
        assert!(chunks.len() >= 3);
        assert!(chunks.iter().all(|c| c.len() <= 1024));

        let mut rebuilt = chunks[0].clone();
        for pair in chunks.windows(2) {
            let overlap = shared_overlap(&pair[0], &pair[1]);
            assert!(overlap > 0, "consecutive windows share no text");
            assert!(overlap <= 100, "overlap of {} exceeds chunk_overlap", overlap);
            rebuilt.push_str(&pair[1][overlap..]);
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let splitter = TextSplitter::new(40, 5).unwrap();
        let text = "First paragraph is here.\n\nSecond paragraph is here.";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec![
                "First paragraph is here.".to_string(),
                "Second paragraph is here.".to_string()
            ]
        );
    }

    #[test]
    fn test_multibyte_text_counts_chars() {
        let splitter = TextSplitter::new(10, 2).unwrap();
        let text = "åäöåäöåäöåäöåäöåäöåäö";
        let chunks = splitter.split_text(text);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
    }
}
