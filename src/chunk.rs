//! Recursive-boundary text chunker.
//!
//! Splits document text into chunks of at most `chunk_size` characters with
//! `chunk_overlap` characters shared between consecutive chunks of the same
//! document. Splitting prefers paragraph boundaries (`\n\n`), then line
//! boundaries, then word boundaries, and falls back to hard character cuts
//! only when a single unbroken run exceeds the budget.
//!
//! The split is lossless: concatenating the chunks of one document in order,
//! dropping each non-first chunk's overlap prefix, reconstructs the original
//! text byte for byte.

use crate::config::ChunkingConfig;
use crate::models::{DocumentChunk, SourceDocument};

const SEPARATORS: [&str; 3] = ["\n\n", "\n", " "];

/// Split each document's content, carrying the source path onto every chunk.
/// Documents with empty content produce no chunks.
pub fn split_documents(docs: &[SourceDocument], config: &ChunkingConfig) -> Vec<DocumentChunk> {
    let mut chunks = Vec::new();
    for doc in docs {
        for text in split_text(&doc.content, config.chunk_size, config.chunk_overlap) {
            chunks.push(DocumentChunk {
                path: doc.path.clone(),
                content: text,
            });
        }
    }
    chunks
}

/// Split one text into chunks of at most `chunk_size` bytes with
/// `chunk_overlap` bytes of context repeated between neighbours.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    split_with_overlaps(text, chunk_size, chunk_overlap)
        .into_iter()
        .map(|(chunk, _)| chunk)
        .collect()
}

/// Like [`split_text`], but each chunk is paired with the length of the
/// overlap prefix it shares with its predecessor (0 for the first chunk).
fn split_with_overlaps(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<(String, usize)> {
    if text.is_empty() {
        return Vec::new();
    }
    if text.len() <= chunk_size {
        return vec![(text.to_string(), 0)];
    }

    let pieces = fragment(text, chunk_size, &SEPARATORS);
    merge(&pieces, chunk_size, chunk_overlap)
}

/// Break `text` into pieces of at most `max_len` bytes whose concatenation
/// is exactly `text`. Tries each separator in order; separators stay
/// attached to the preceding piece so nothing is lost.
fn fragment<'a>(text: &'a str, max_len: usize, separators: &[&str]) -> Vec<&'a str> {
    if text.len() <= max_len {
        return vec![text];
    }

    let Some((sep, rest)) = separators.split_first() else {
        return hard_cut(text, max_len);
    };

    if !text.contains(sep) {
        return fragment(text, max_len, rest);
    }

    let mut pieces = Vec::new();
    for part in split_keep(text, sep) {
        if part.len() <= max_len {
            pieces.push(part);
        } else {
            pieces.extend(fragment(part, max_len, rest));
        }
    }
    pieces
}

/// Split on `sep`, keeping the separator attached to the piece before it.
fn split_keep<'a>(text: &'a str, sep: &str) -> Vec<&'a str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(sep) {
        let end = start + pos + sep.len();
        pieces.push(&text[start..end]);
        start = end;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Cut at the largest char boundary at or below `max_len` per slice.
fn hard_cut(text: &str, max_len: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut remaining = text;
    while remaining.len() > max_len {
        let mut cut = max_len;
        while !remaining.is_char_boundary(cut) {
            cut -= 1;
        }
        pieces.push(&remaining[..cut]);
        remaining = &remaining[cut..];
    }
    if !remaining.is_empty() {
        pieces.push(remaining);
    }
    pieces
}

/// Greedily pack pieces into chunks of at most `chunk_size` bytes, seeding
/// each chunk after the first with the previous chunk's overlap suffix.
fn merge(pieces: &[&str], chunk_size: usize, chunk_overlap: usize) -> Vec<(String, usize)> {
    let mut chunks: Vec<(String, usize)> = Vec::new();
    let mut current = String::new();
    let mut overlap_len = 0usize;

    for piece in pieces {
        let has_new_content = current.len() > overlap_len;
        if has_new_content && current.len() + piece.len() > chunk_size {
            // Flush and seed the next chunk with a trailing slice of this one
            let suffix = overlap_suffix(&current, chunk_overlap, chunk_size - piece.len().min(chunk_size));
            chunks.push((std::mem::take(&mut current), overlap_len));
            let prev = &chunks.last().unwrap().0;
            current = prev[prev.len() - suffix..].to_string();
            overlap_len = suffix;
        }
        current.push_str(piece);
    }

    if current.len() > overlap_len {
        chunks.push((current, overlap_len));
    }

    chunks
}

/// Length of the suffix of `chunk` to carry into the next chunk: at most
/// `overlap` bytes, shrunk to `budget` so the next chunk stays within size,
/// aligned to a char boundary.
fn overlap_suffix(chunk: &str, overlap: usize, budget: usize) -> usize {
    let mut len = overlap.min(budget).min(chunk.len());
    while len > 0 && !chunk.is_char_boundary(chunk.len() - len) {
        len -= 1;
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reassemble by dropping each chunk's overlap prefix.
    fn reconstruct(chunks: &[(String, usize)]) -> String {
        let mut out = String::new();
        for (chunk, overlap) in chunks {
            out.push_str(&chunk[*overlap..]);
        }
        out
    }

    #[test]
    fn test_small_text_single_chunk() {
        let chunks = split_text("Hello, world!", 2000, 200);
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_empty_text_no_chunks() {
        assert!(split_text("", 2000, 200).is_empty());
    }

    #[test]
    fn test_respects_chunk_size() {
        let text = (0..100)
            .map(|i| format!("Paragraph number {} with some filler text.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        for chunk in split_text(&text, 200, 20) {
            assert!(chunk.len() <= 200, "chunk too long: {} bytes", chunk.len());
        }
    }

    #[test]
    fn test_reconstruction_exact() {
        let text = (0..60)
            .map(|i| format!("Line {} of the document body.", i))
            .collect::<Vec<_>>()
            .join("\n");
        let chunks = split_with_overlaps(&text, 150, 30);
        assert!(chunks.len() > 1);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_reconstruction_with_paragraphs() {
        let text = "First paragraph here.\n\nSecond paragraph, a bit longer than the first one.\n\nThird.\n\nFourth paragraph closes the document.";
        let chunks = split_with_overlaps(text, 50, 10);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_overlap_prefix_matches_previous_suffix() {
        let text = (0..40)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let chunks = split_with_overlaps(&text, 60, 15);
        for pair in chunks.windows(2) {
            let (prev, _) = &pair[0];
            let (next, overlap) = &pair[1];
            assert!(*overlap <= 15);
            assert!(prev.ends_with(&next[..*overlap]));
        }
    }

    #[test]
    fn test_unbroken_line_hard_cut() {
        // One run with no separators at all, longer than the budget
        let text = "x".repeat(500);
        let chunks = split_with_overlaps(&text, 120, 20);
        assert!(chunks.len() >= 4);
        for (chunk, _) in &chunks {
            assert!(chunk.len() <= 120);
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let para = "alpha beta gamma delta.";
        let text = format!("{}\n\n{}\n\n{}", para, para, para);
        // Budget fits one paragraph (plus separator) but not two
        let chunks = split_text(&text, 30, 0);
        assert_eq!(chunks.len(), 3);
        assert!(chunks[0].starts_with("alpha"));
        assert!(chunks[0].ends_with("\n\n"));
    }

    #[test]
    fn test_multibyte_boundaries() {
        let text = "héllo wörld ".repeat(40);
        let chunks = split_with_overlaps(&text, 50, 10);
        for (chunk, _) in &chunks {
            assert!(chunk.len() <= 50);
            // Would panic mid-codepoint if boundaries were wrong
            let _ = chunk.chars().count();
        }
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_spec_sized_split() {
        // A 5000-char document at 2000/200 needs at least three chunks
        let text = "the quick brown fox jumps over the lazy dog. "
            .repeat(112)
            .trim_end()
            .to_string();
        assert!(text.len() >= 5000);
        let chunks = split_with_overlaps(&text, 2000, 200);
        assert!(chunks.len() >= 3);
        assert_eq!(reconstruct(&chunks), text);
    }

    #[test]
    fn test_split_documents_carries_path() {
        let docs = vec![
            SourceDocument {
                path: "src/a.rs".to_string(),
                content: "short file".to_string(),
            },
            SourceDocument {
                path: "src/b.rs".to_string(),
                content: String::new(),
            },
        ];
        let config = ChunkingConfig {
            chunk_size: 2000,
            chunk_overlap: 200,
        };
        let chunks = split_documents(&docs, &config);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].path, "src/a.rs");
        assert_eq!(chunks[0].content, "short file");
    }
}
