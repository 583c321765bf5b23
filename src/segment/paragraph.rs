//! Paragraph segmentation on a delimiter pattern.

use super::params::ParagraphParams;
use super::text_index::{trimmed_range, TextIndex};
use crate::model::{ChunkMetadata, Segment};

pub const KIND: &str = "pure_paragraph";

/// Split on every delimiter match, trim each piece, drop empty pieces.
///
/// Offsets point at the trimmed substring in the original text. Empty pieces
/// still move the cursor past their delimiter.
pub fn split_paragraphs(text: &str, params: &ParagraphParams) -> Vec<Segment> {
    let index = TextIndex::new(text);
    let mut segments = Vec::new();
    let mut cursor = 0;

    let emit = |from: usize, to: usize, segments: &mut Vec<Segment>| {
        if let Some((lead, trail)) = trimmed_range(&text[from..to]) {
            let start_byte = from + lead;
            let end_byte = from + trail;
            segments.push(Segment {
                text: text[start_byte..end_byte].to_string(),
                start: index.char_offset(start_byte),
                end: index.char_offset(end_byte),
                metadata: Some(ChunkMetadata::tagged(KIND)),
            });
        }
    };

    for delimiter in params.separator().find_iter(text) {
        emit(cursor, delimiter.start(), &mut segments);
        cursor = delimiter.end();
    }
    emit(cursor, text.len(), &mut segments);

    log::debug!("Paragraph split produced {} chunks", segments.len());
    segments
}
