//! Fixed-size, overlapping document chunking.
//!
//! [`chunk`] splits a single page; [`FixedSizeChunker`] holds validated
//! parameters and chunks whole documents through the [`Chunker`] trait.
//! Sizes and offsets are counted in characters, never bytes, so multi-byte
//! text is never split inside a code point.

use crate::document::{Chunk, Document, document_key};
use crate::error::{RagError, Result};

/// A strategy for splitting documents into chunks.
///
/// Implementations must be deterministic: re-indexing the same document
/// relies on producing the same chunk ids and texts.
pub trait Chunker: Send + Sync {
    /// Split a document into chunks, numbering them across all pages.
    ///
    /// Returns an empty `Vec` if every page is empty.
    fn chunk(&self, document: &Document) -> Vec<Chunk>;
}

/// Check that `chunk_size` and `overlap` allow forward progress.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if `chunk_size == 0` or `overlap >= chunk_size`.
pub fn validate_chunking(chunk_size: usize, overlap: usize) -> Result<()> {
    if chunk_size == 0 {
        return Err(RagError::ConfigError("chunk_size must be greater than zero".to_string()));
    }
    if overlap >= chunk_size {
        return Err(RagError::ConfigError(format!(
            "chunk_overlap ({overlap}) must be less than chunk_size ({chunk_size})"
        )));
    }
    Ok(())
}

/// A `[start, end)` character span of a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
}

/// Character spans advancing by `chunk_size - overlap`, stopping at the
/// first span that reaches the end of the text.
fn spans(char_count: usize, chunk_size: usize, overlap: usize) -> Vec<Span> {
    let stride = chunk_size - overlap;
    let mut spans = Vec::new();
    let mut start = 0;

    while start < char_count {
        let end = (start + chunk_size).min(char_count);
        spans.push(Span { start, end });
        if end == char_count {
            break;
        }
        start += stride;
    }

    spans
}

/// Split one page of text into overlapping chunks.
///
/// Chunks are numbered from zero; ids are `<document key>_<index>`, see
/// [`document_key`].
/// Empty text yields no chunks.
///
/// # Errors
///
/// Returns [`RagError::ConfigError`] if the parameters cannot make progress.
pub fn chunk(
    document_id: &str,
    text: &str,
    page_number: u32,
    chunk_size: usize,
    overlap: usize,
) -> Result<Vec<Chunk>> {
    validate_chunking(chunk_size, overlap)?;
    let key = document_key(document_id);
    Ok(chunk_page(document_id, &key, text, page_number, chunk_size, overlap, 0))
}

fn chunk_page(
    document_id: &str,
    key: &str,
    text: &str,
    page_number: u32,
    chunk_size: usize,
    overlap: usize,
    first_sequence: u32,
) -> Vec<Chunk> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char boundary, including the end of the text.
    let boundaries: Vec<usize> =
        text.char_indices().map(|(i, _)| i).chain(std::iter::once(text.len())).collect();
    let char_count = boundaries.len() - 1;

    spans(char_count, chunk_size, overlap)
        .into_iter()
        .zip(first_sequence..)
        .map(|(span, sequence)| Chunk {
            id: format!("{key}_{sequence}"),
            document_id: document_id.to_string(),
            page: page_number,
            sequence,
            overlap_offset: span.start,
            text: text[boundaries[span.start]..boundaries[span.end]].to_string(),
        })
        .collect()
}

/// Splits every page of a document into fixed-size chunks with overlap.
///
/// # Example
///
/// ```rust,ignore
/// use docqa_rag::FixedSizeChunker;
///
/// let chunker = FixedSizeChunker::new(1000, 200)?;
/// let chunks = chunker.chunk(&document);
/// ```
#[derive(Debug, Clone)]
pub struct FixedSizeChunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl FixedSizeChunker {
    /// Create a new `FixedSizeChunker`.
    ///
    /// # Errors
    ///
    /// Returns [`RagError::ConfigError`] unless `0 <= chunk_overlap < chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        validate_chunking(chunk_size, chunk_overlap)?;
        Ok(Self { chunk_size, chunk_overlap })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, document: &Document) -> Vec<Chunk> {
        let key = document_key(&document.id);
        let mut chunks = Vec::new();

        for page in &document.pages {
            let next_sequence = chunks.len() as u32;
            chunks.extend(chunk_page(
                &document.id,
                &key,
                &page.text,
                page.number,
                self.chunk_size,
                self.chunk_overlap,
                next_sequence,
            ));
        }

        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Page;

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert!(matches!(FixedSizeChunker::new(10, 10), Err(RagError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(10, 11), Err(RagError::ConfigError(_))));
        assert!(matches!(FixedSizeChunker::new(0, 0), Err(RagError::ConfigError(_))));
        assert!(matches!(chunk("d", "abc", 1, 3, 3), Err(RagError::ConfigError(_))));
    }

    #[test]
    fn empty_page_yields_no_chunks() {
        assert!(chunk("doc.txt", "", 1, 20, 5).unwrap().is_empty());
    }

    #[test]
    fn cats_and_dogs_overlap() {
        let text = "Chunk A about cats. Chunk B about dogs.";
        let chunks = chunk("pets.txt", text, 1, 20, 5).unwrap();

        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0].text, "Chunk A about cats. ");
        assert_eq!(chunks[1].overlap_offset, 15);
        assert_eq!(chunks[1].text, "ats. Chunk B about d");
        assert_eq!(chunks[2].text, "out dogs.");
        assert_eq!(chunks[2].id, format!("{}_2", document_key("pets.txt")));
        assert!(chunks.iter().all(|c| c.page == 1 && c.document_id == "pets.txt"));
    }

    #[test]
    fn stops_when_a_chunk_reaches_the_end() {
        let chunks = chunk("d", "abcdefghij", 1, 10, 3).unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "abcdefghij");
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunks = chunk("d", "ééééé", 1, 2, 0).unwrap();
        let texts: Vec<&str> = chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["éé", "éé", "é"]);
    }

    #[test]
    fn sequence_continues_across_pages() {
        let document = Document::new(
            "essay.pdf",
            vec![
                Page { number: 1, text: "a".repeat(25) },
                Page { number: 2, text: String::new() },
                Page { number: 3, text: "b".repeat(10) },
            ],
        );
        let chunker = FixedSizeChunker::new(10, 0).unwrap();
        let chunks = chunker.chunk(&document);

        let key = document_key("essay.pdf");
        let ids: Vec<String> = chunks.iter().map(|c| c.id.clone()).collect();
        let expected: Vec<String> = (0..4).map(|i| format!("{key}_{i}")).collect();
        assert_eq!(ids, expected);
        assert_eq!(chunks[3].page, 3);
        assert_eq!(chunks[3].overlap_offset, 0);
    }
}
