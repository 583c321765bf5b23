//! Sentence tokenization and offset reconstruction.
//!
//! Tokenizers return sentence *text*; offsets are recovered afterwards by
//! locating each sentence in the document. A tokenizer that normalizes text
//! (collapses whitespace, rewrites quotes) still works: sentences that cannot
//! be found get approximate offsets instead of failing.

use super::text_index::TextIndex;
use crate::model::{ChunkMetadata, Segment};

/// Splits text into sentences.
pub trait SentenceTokenizer: Send + Sync {
    fn sentences(&self, text: &str) -> Vec<String>;
}

/// Tokens that end with a period without ending a sentence.
const ABBREVIATIONS: &[&str] = &[
    "mr", "mrs", "ms", "dr", "prof", "sr", "jr", "st", "vs", "e.g", "i.e", "inc", "ltd", "co",
    "fig", "no", "vol", "approx", "cf", "al", "ca", "jan", "feb", "mar", "apr", "jun", "jul",
    "aug", "sep", "sept", "oct", "nov", "dec",
];

/// Punctuation-driven tokenizer.
///
/// A boundary is `.`, `!` or `?` (optionally followed by closing quotes or
/// brackets) followed by whitespace and a character that is not lowercase.
/// Periods after known abbreviations and single-letter initials do not split.
#[derive(Debug, Clone, Default)]
pub struct PunctuationTokenizer;

fn is_terminal(c: char) -> bool {
    matches!(c, '.' | '!' | '?')
}

fn is_closing(c: char) -> bool {
    matches!(c, '"' | '\'' | ')' | ']' | '}' | '»' | '”' | '’')
}

fn is_abbreviation(token: &str) -> bool {
    let token = token
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .trim_end_matches('.');
    if token.chars().count() == 1 && token.chars().all(char::is_alphabetic) {
        return true;
    }
    let lower = token.to_lowercase();
    ABBREVIATIONS.contains(&lower.as_str())
}

impl SentenceTokenizer for PunctuationTokenizer {
    fn sentences(&self, text: &str) -> Vec<String> {
        let chars: Vec<(usize, char)> = text.char_indices().collect();
        let mut sentences = Vec::new();
        let mut start_byte = 0;
        let mut i = 0;

        let push = |from: usize, to: usize, out: &mut Vec<String>| {
            let sentence = text[from..to].trim();
            if !sentence.is_empty() {
                out.push(sentence.to_string());
            }
        };

        while i < chars.len() {
            let (byte, c) = chars[i];
            if !is_terminal(c) {
                i += 1;
                continue;
            }

            let mut j = i + 1;
            while j < chars.len() && is_terminal(chars[j].1) {
                j += 1;
            }
            while j < chars.len() && is_closing(chars[j].1) {
                j += 1;
            }
            if j >= chars.len() || !chars[j].1.is_whitespace() {
                i = j.max(i + 1);
                continue;
            }

            let mut next = j;
            while next < chars.len() && chars[next].1.is_whitespace() {
                next += 1;
            }
            if next >= chars.len() {
                break;
            }
            if chars[next].1.is_lowercase() {
                i = next;
                continue;
            }
            if c == '.' {
                let token_start = text[start_byte..byte]
                    .rfind(char::is_whitespace)
                    .map(|p| start_byte + p + 1)
                    .unwrap_or(start_byte);
                if is_abbreviation(&text[token_start..byte]) {
                    i = next;
                    continue;
                }
            }

            push(start_byte, chars[j].0, &mut sentences);
            start_byte = chars[next].0;
            i = next;
        }
        push(start_byte, text.len(), &mut sentences);
        sentences
    }
}

/// A sentence with character offsets in the source document.
#[derive(Debug, Clone, PartialEq)]
pub struct LocatedSentence {
    pub text: String,
    pub start: usize,
    pub end: usize,
    /// Not found verbatim; offsets were anchored at the cursor.
    pub approximate: bool,
}

/// Locate every sentence in document order.
///
/// Each sentence is searched forward from the end of the previously located
/// sentence, so repeated sentence text resolves to successive occurrences.
/// A sentence that cannot be found is anchored at the cursor with its own
/// length and marked approximate; the cursor does not move past it, so the
/// next sentence is still searched from the last trusted position.
pub fn locate_sentences(text: &str, sentences: Vec<String>) -> Vec<LocatedSentence> {
    let index = TextIndex::new(text);
    let total_chars = index.char_len();
    let mut cursor_byte = 0;
    let mut located = Vec::with_capacity(sentences.len());

    for sentence in sentences {
        match text[cursor_byte..].find(sentence.as_str()) {
            Some(relative) if !sentence.is_empty() => {
                let start_byte = cursor_byte + relative;
                let end_byte = start_byte + sentence.len();
                located.push(LocatedSentence {
                    start: index.char_offset(start_byte),
                    end: index.char_offset(end_byte),
                    text: sentence,
                    approximate: false,
                });
                cursor_byte = end_byte;
            }
            _ => {
                let preview: String = sentence.chars().take(50).collect();
                log::warn!(
                    "Sentence not found verbatim, using approximate offsets: '{}...'",
                    preview
                );
                let anchor = index.char_offset(cursor_byte).min(total_chars.saturating_sub(1));
                let length = sentence.chars().count().max(1);
                located.push(LocatedSentence {
                    start: anchor,
                    end: (anchor + length).min(total_chars).max(anchor + 1),
                    text: sentence,
                    approximate: true,
                });
            }
        }
    }
    located
}

/// Build a chunk from consecutive located sentences.
///
/// With exact offsets the chunk text is the document slice, so it matches its
/// span exactly; otherwise the sentences are joined with single spaces and the
/// span runs from the first sentence's start for the joined length.
pub fn segment_from_sentences(
    index: &TextIndex<'_>,
    group: &[LocatedSentence],
    kind: &str,
) -> Option<Segment> {
    let first = group.first()?;
    let last = group.last()?;
    let approximate = group.iter().any(|s| s.approximate) || last.end <= first.start;
    let total_chars = index.char_len();

    let (text, start, end) = if approximate {
        let joined = group
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let start = first.start;
        let end = (start + joined.chars().count()).min(total_chars).max(start + 1);
        (joined, start, end)
    } else {
        (index.slice(first.start, last.end).to_string(), first.start, last.end)
    };

    Some(Segment {
        text,
        start,
        end,
        metadata: Some(
            ChunkMetadata::tagged(kind)
                .with_sentences(group.len())
                .approximate(approximate),
        ),
    })
}
