//! Token-window segmentation.
//!
//! Uses a character-based approximation of ~4 characters per token, prefers
//! to break on whitespace or sentence punctuation near the end of the window,
//! and reports each trimmed chunk at its exact position in the text.

use super::params::TokenWindowParams;
use super::text_index::{trimmed_range, TextIndex};
use crate::model::{ChunkMetadata, Segment};

pub const KIND: &str = "token_window";

/// Approximate characters per token.
const CHARS_PER_TOKEN: usize = 4;

/// Estimate token count from text (1 token ≈ 4 characters, rounded up).
pub fn estimate_tokens(text: &str) -> usize {
    (text.chars().count() + CHARS_PER_TOKEN - 1) / CHARS_PER_TOKEN
}

/// Chunk text into overlapping windows of roughly `chunk_size` tokens.
///
/// Chunk starts strictly increase; the cursor always moves forward even when
/// a word-boundary break shortens a window below the overlap.
pub fn chunk_token_windows(text: &str, params: &TokenWindowParams) -> Vec<Segment> {
    let index = TextIndex::new(text);
    let total = index.char_len();
    if text.trim().is_empty() {
        return Vec::new();
    }

    let char_size = (params.chunk_size * CHARS_PER_TOKEN).max(1);
    let char_overlap = params.chunk_overlap * CHARS_PER_TOKEN;
    let mut segments = Vec::new();
    let mut start = 0;

    while start < total {
        let window_end = (start + char_size).min(total);

        // Look for a boundary within the last 20% of the window.
        let chunk_end = if window_end < total {
            let search_start = window_end.saturating_sub(char_size / 5).max(start + 1);
            index
                .slice(search_start, window_end)
                .char_indices()
                .rev()
                .find(|(_, c)| c.is_whitespace() || matches!(c, '.' | '!' | '?'))
                .map(|(byte, _)| {
                    let boundary_byte = index.byte_offset(search_start) + byte;
                    index.char_offset(boundary_byte) + 1
                })
                .unwrap_or(window_end)
        } else {
            window_end
        };

        let start_byte = index.byte_offset(start);
        let end_byte = index.byte_offset(chunk_end);
        if let Some((lead, trail)) = trimmed_range(&text[start_byte..end_byte]) {
            segments.push(Segment {
                text: text[start_byte + lead..start_byte + trail].to_string(),
                start: index.char_offset(start_byte + lead),
                end: index.char_offset(start_byte + trail),
                metadata: Some(ChunkMetadata::tagged(KIND)),
            });
        }

        if chunk_end >= total {
            break;
        }

        // Never restart inside the leading whitespace of the chunk just
        // emitted, or the next chunk would trim to the same start.
        let floor = segments.last().map_or(start + 1, |s: &Segment| s.start + 1);
        let next_start = chunk_end.saturating_sub(char_overlap);
        start = if next_start <= start {
            chunk_end
        } else {
            next_start.max(floor).min(chunk_end)
        };
    }

    log::debug!(
        "Token window chunking ({} tokens, {} overlap) produced {} chunks",
        params.chunk_size,
        params.chunk_overlap,
        segments.len()
    );
    segments
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(chunk_size: usize, chunk_overlap: usize) -> TokenWindowParams {
        TokenWindowParams {
            chunk_size,
            chunk_overlap,
        }
    }

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("testtest"), 2);
        assert_eq!(estimate_tokens("testtest12"), 3);
    }

    #[test]
    fn test_chunk_offsets_are_exact() {
        let text = "word ".repeat(400);
        let segments = chunk_token_windows(&text, &params(50, 10));
        assert!(segments.len() >= 2);
        for segment in &segments {
            assert_eq!(&text[segment.start..segment.end], segment.text);
            assert!(segment.start < segment.end);
            assert!(segment.end <= text.len());
        }
        assert!(segments.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_chunks_overlap() {
        let text = "a ".repeat(1000);
        let segments = chunk_token_windows(&text, &params(300, 50));
        assert!(segments.len() >= 2);
        assert!(segments[1].start < segments[0].end);
    }

    #[test]
    fn test_unbroken_text_still_progresses() {
        let text = "x".repeat(1000);
        let segments = chunk_token_windows(&text, &params(10, 9));
        assert!(!segments.is_empty());
        assert_eq!(segments.last().unwrap().end, 1000);
        assert!(segments.windows(2).all(|w| w[0].start < w[1].start));
    }

    #[test]
    fn test_multibyte_text() {
        let text = "è".repeat(30) + " " + &"ù".repeat(30);
        let segments = chunk_token_windows(&text, &params(5, 1));
        let index = TextIndex::new(&text);
        for segment in &segments {
            assert_eq!(index.slice(segment.start, segment.end), segment.text);
        }
    }

    #[test]
    fn test_chunk_empty_text() {
        assert!(chunk_token_windows("", &params(300, 50)).is_empty());
        assert!(chunk_token_windows("   ", &params(300, 50)).is_empty());
    }
}
