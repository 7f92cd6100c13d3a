//! Page-aware sentence chunking.
//!
//! Chunks accumulate whole sentences up to roughly 800 characters, carry a
//! word-based overlap of the previous chunk's tail into the next one, and
//! never cross a page boundary. Every chunk remembers the 1-based page it
//! came from, so citations can point at pages.

use crate::catalog::PageText;

/// Target chunk size in characters. Larger chunks preserve context better
/// for research papers.
pub const CHUNK_SIZE: usize = 800;
/// Overlap between adjacent chunks in characters; converted to a word count
/// when the overlap is spliced in.
pub const CHUNK_OVERLAP: usize = 200;

/// One chunk with its page of origin.
#[derive(Debug, Clone, PartialEq)]
pub struct PageChunk {
    /// Chunk text, whole sentences where the source allows it.
    pub text: String,
    /// 1-based page number.
    pub page: i64,
}

/// Split on sentence boundaries: `.`, `!` or `?` followed by whitespace.
fn split_sentences(text: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;
    let mut prev_was_terminal = false;

    for (idx, ch) in text.char_indices() {
        if prev_was_terminal && ch.is_whitespace() {
            sentences.push(&text[start..idx]);
            start = idx + ch.len_utf8();
        }
        prev_was_terminal = matches!(ch, '.' | '!' | '?');
    }
    if start < text.len() {
        sentences.push(&text[start..]);
    }
    sentences.into_iter().filter(|s| !s.trim().is_empty()).collect()
}

/// Tail of `text`, the last `overlap / 5` words, used to seed the next chunk.
fn overlap_tail(text: &str, overlap: usize) -> String {
    let words: Vec<&str> = text.split_whitespace().collect();
    let keep = overlap / 5;
    let start = words.len().saturating_sub(keep);
    words[start..].join(" ")
}

/// Chunk per-page text with the given size and overlap.
pub fn chunk_pages_with(pages: &[PageText], chunk_size: usize, overlap: usize) -> Vec<PageChunk> {
    let mut chunks = Vec::new();

    for page in pages {
        if page.text.trim().is_empty() {
            continue;
        }

        let mut current = String::new();
        for sentence in split_sentences(&page.text) {
            if current.len() + sentence.len() <= chunk_size {
                current.push_str(sentence);
                current.push(' ');
            } else {
                if !current.trim().is_empty() {
                    chunks.push(PageChunk {
                        text: current.trim().to_string(),
                        page: page.page_num,
                    });
                }
                if overlap > 0 && !current.is_empty() {
                    let tail = overlap_tail(&current, overlap);
                    current = format!("{tail} {sentence} ");
                } else {
                    current = format!("{sentence} ");
                }
            }
        }
        if !current.trim().is_empty() {
            chunks.push(PageChunk {
                text: current.trim().to_string(),
                page: page.page_num,
            });
        }
    }

    chunks
}

/// Chunk per-page text with the default size and overlap.
pub fn chunk_pages(pages: &[PageText]) -> Vec<PageChunk> {
    chunk_pages_with(pages, CHUNK_SIZE, CHUNK_OVERLAP)
}

// ============================================================================
// Tests
// ============================================================================
