//! Byte/character offset conversion.
//!
//! The engine slices `&str` by byte offsets but reports spans in characters,
//! which is what annotators see.

/// Byte offset of every character in a text.
pub struct TextIndex<'a> {
    text: &'a str,
    char_starts: Vec<usize>,
}

impl<'a> TextIndex<'a> {
    pub fn new(text: &'a str) -> Self {
        Self {
            text,
            char_starts: text.char_indices().map(|(byte, _)| byte).collect(),
        }
    }

    pub fn text(&self) -> &'a str {
        self.text
    }

    /// Length of the text in characters.
    pub fn char_len(&self) -> usize {
        self.char_starts.len()
    }

    /// Character offset of a byte offset. Offsets inside a multi-byte
    /// character round up to the next character.
    pub fn char_offset(&self, byte: usize) -> usize {
        self.char_starts.partition_point(|&start| start < byte)
    }

    /// Byte offset of a character offset, clamped to the end of the text.
    pub fn byte_offset(&self, char_offset: usize) -> usize {
        self.char_starts
            .get(char_offset)
            .copied()
            .unwrap_or(self.text.len())
    }

    /// Slice by character offsets.
    pub fn slice(&self, start: usize, end: usize) -> &'a str {
        &self.text[self.byte_offset(start)..self.byte_offset(end)]
    }
}

/// Byte range of `segment.trim()` inside `segment`, or None if all whitespace.
pub fn trimmed_range(segment: &str) -> Option<(usize, usize)> {
    let trimmed_start = segment.trim_start();
    if trimmed_start.is_empty() {
        return None;
    }
    let start = segment.len() - trimmed_start.len();
    let end = start + trimmed_start.trim_end().len();
    Some((start, end))
}
