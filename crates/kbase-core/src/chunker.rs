//! Character-window chunking with optional paragraph packing.
//!
//! Lengths are counted in `char`s, never bytes, so CJK text is measured the
//! same way as ASCII.

use std::collections::VecDeque;

use crate::config::ChunkingSettings;
use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
    separator: Option<String>,
}

impl Chunker {
    /// Plain fixed windows. `chunk_overlap` must be smaller than `chunk_size`
    /// so every window advances.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(Error::InvalidConfig("chunk size must be positive".into()));
        }
        if chunk_overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunk overlap ({chunk_overlap}) must be smaller than chunk size ({chunk_size})"
            )));
        }
        Ok(Self { chunk_size, chunk_overlap, separator: None })
    }

    /// Split on `separator` first and pack whole paragraphs up to the chunk
    /// size. An empty separator keeps plain windows.
    #[must_use]
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        let separator = separator.into();
        self.separator = (!separator.is_empty()).then_some(separator);
        self
    }

    pub fn from_settings(settings: &ChunkingSettings) -> Result<Self> {
        Ok(Self::new(settings.chunk_size, settings.chunk_overlap)?.with_separator(settings.separator.clone()))
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }

    pub fn chunk_overlap(&self) -> usize { self.chunk_overlap }

    /// Splits `text` into chunks of at most `chunk_size` characters. Blank
    /// input yields no chunks.
    pub fn split(&self, text: &str) -> Vec<String> {
        let text = text.trim();
        if text.is_empty() {
            return Vec::new();
        }
        if text.chars().count() <= self.chunk_size {
            return vec![text.to_string()];
        }
        match &self.separator {
            None => self.windows(text),
            Some(sep) => {
                let pieces = text
                    .split(sep.as_str())
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .flat_map(|p| {
                        if p.chars().count() <= self.chunk_size { vec![p.to_string()] } else { self.windows(p) }
                    });
                self.pack(pieces, sep)
            }
        }
    }

    /// Consecutive windows share exactly `chunk_overlap` characters; only the
    /// last window may be shorter than `chunk_size`.
    fn windows(&self, text: &str) -> Vec<String> {
        let chars: Vec<char> = text.chars().collect();
        let step = self.chunk_size - self.chunk_overlap;
        let mut out = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(chars.len());
            let window: String = chars[start..end].iter().collect();
            if !window.trim().is_empty() {
                out.push(window);
            }
            if end == chars.len() {
                break;
            }
            start += step;
        }
        out
    }

    /// Packs pieces up to `chunk_size`. When a chunk is emitted, its trailing
    /// pieces that fit within `chunk_overlap` (separators included) start the
    /// next one.
    fn pack(&self, pieces: impl Iterator<Item = String>, sep: &str) -> Vec<String> {
        let sep_len = sep.chars().count();
        let mut out = Vec::new();
        let mut current: VecDeque<(String, usize)> = VecDeque::new();
        let mut current_len = 0;
        for piece in pieces {
            let len = piece.chars().count();
            let joined_len = |current: &VecDeque<(String, usize)>, total: usize| {
                total + len + if current.is_empty() { 0 } else { sep_len }
            };
            if joined_len(&current, current_len) > self.chunk_size && !current.is_empty() {
                out.push(join(&current, sep));
                while current_len > self.chunk_overlap
                    || (current_len > 0 && joined_len(&current, current_len) > self.chunk_size)
                {
                    let Some((_, head_len)) = current.pop_front() else { break };
                    current_len -= head_len + if current.is_empty() { 0 } else { sep_len };
                }
            }
            current_len = joined_len(&current, current_len);
            current.push_back((piece, len));
        }
        if !current.is_empty() {
            out.push(join(&current, sep));
        }
        out
    }
}

fn join(pieces: &VecDeque<(String, usize)>, sep: &str) -> String {
    pieces.iter().map(|(text, _)| text.as_str()).collect::<Vec<_>>().join(sep)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(Chunker::new(10, 10).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(10, 9).is_ok());
    }

    #[test]
    fn windows_step_by_size_minus_overlap() {
        let chunker = Chunker::new(4, 1).unwrap();
        assert_eq!(chunker.split("abcdefghij"), vec!["abcd", "defg", "ghij"]);
    }

    #[test]
    fn counts_chars_not_bytes() {
        let chunker = Chunker::new(3, 1).unwrap();
        assert_eq!(chunker.split("机器学习模型"), vec!["机器学", "学习模", "模型"]);
    }

    #[test]
    fn packs_paragraphs_until_full() {
        let chunker = Chunker::new(12, 2).unwrap().with_separator("\n\n");
        let chunks = chunker.split("aaaa\n\nbbbb\n\ncccccc\n\ndd");
        assert_eq!(chunks, vec!["aaaa\n\nbbbb", "cccccc\n\ndd"]);
    }

    #[test]
    fn short_trailing_paragraph_carries_into_next_chunk() {
        let chunker = Chunker::new(12, 4).unwrap().with_separator("\n\n");
        let chunks = chunker.split("aaaaaa\n\nbb\n\ncccccc\n\ndd");
        assert_eq!(chunks, vec!["aaaaaa\n\nbb", "bb\n\ncccccc", "dd"]);
    }

    #[test]
    fn oversized_paragraph_is_windowed() {
        let chunker = Chunker::new(5, 2).unwrap().with_separator("\n\n");
        let chunks = chunker.split("ab\n\n0123456789");
        assert_eq!(chunks, vec!["ab", "01234", "34567", "6789"]);
    }
}
