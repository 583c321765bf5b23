//! Sentence windows bounded by character budgets.

use super::params::SentenceWindowParams;
use super::sentences::{locate_sentences, segment_from_sentences, SentenceTokenizer};
use super::text_index::TextIndex;
use crate::model::Segment;

pub const KIND: &str = "sentence_window";

/// A sentence may push a window past `max_chars` by at most this factor.
const MAX_OVERSHOOT: f64 = 1.1;

/// Budgeted length of a sentence: its characters plus one joining space.
fn cost(sentence: &str) -> usize {
    sentence.chars().count() + 1
}

/// Accumulate sentences up to `min_chars` (always at least one), keep adding
/// while under `max_chars` as long as the next sentence does not overshoot
/// `max_chars * 1.1`, then start the next window after the trailing sentences
/// that fit in `overlap_chars`. Every window advances by at least one sentence.
pub fn chunk_sentence_windows(
    text: &str,
    params: &SentenceWindowParams,
    tokenizer: &dyn SentenceTokenizer,
) -> Vec<Segment> {
    let located = locate_sentences(text, tokenizer.sentences(text));
    let index = TextIndex::new(text);
    let overshoot_limit = params.max_chars as f64 * MAX_OVERSHOOT;

    let mut segments = Vec::new();
    let mut start = 0;
    while start < located.len() {
        let mut end = start;
        let mut length = 0;

        while end < located.len() && (length < params.min_chars || end == start) {
            length += cost(&located[end].text);
            end += 1;
        }
        while end < located.len() && length < params.max_chars {
            let next = cost(&located[end].text);
            if (length + next) as f64 > overshoot_limit {
                break;
            }
            length += next;
            end += 1;
        }

        let window = &located[start..end];
        if let Some(segment) = segment_from_sentences(&index, window, KIND) {
            segments.push(segment);
        }

        let mut overlap_count = 0;
        let mut overlap_length = 0;
        for sentence in window.iter().rev() {
            let next = cost(&sentence.text);
            if overlap_length + next > params.overlap_chars {
                break;
            }
            overlap_length += next;
            overlap_count += 1;
        }
        start = (end - overlap_count).max(start + 1);
    }

    log::debug!(
        "Sentence window chunking (min {}, max {}, overlap {}) produced {} chunks",
        params.min_chars,
        params.max_chars,
        params.overlap_chars,
        segments.len()
    );
    segments
}
