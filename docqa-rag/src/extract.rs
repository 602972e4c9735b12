//! Raw document bytes → [`Document`] pages.

use tracing::debug;

use crate::document::{Document, Page};
use crate::error::{RagError, Result};

/// Page separator emitted by PDF text extraction and honored in text files.
const FORM_FEED: char = '\x0C';

/// File extensions [`extract_document`] understands.
pub const SUPPORTED_EXTENSIONS: &[&str] = &["pdf", "txt", "text", "md", "markdown"];

fn extension(file_name: &str) -> Option<String> {
    let (_, ext) = file_name.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

/// Whether `file_name` has an extension [`extract_document`] can read.
pub fn is_supported(file_name: &str) -> bool {
    extension(file_name).is_some_and(|ext| SUPPORTED_EXTENSIONS.contains(&ext.as_str()))
}

/// Split text into pages on form feeds. Page numbers keep their position,
/// so a blank page leaves a gap instead of renumbering the rest.
fn paginate(text: &str) -> Vec<Page> {
    text.split(FORM_FEED)
        .enumerate()
        .filter(|(_, page)| !page.trim().is_empty())
        .map(|(i, page)| Page { number: i as u32 + 1, text: page.trim().to_string() })
        .collect()
}

/// Decode UTF-8, replacing invalid sequences.
fn decode_text(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => String::from_utf8_lossy(bytes).into_owned(),
    }
}

#[cfg(feature = "pdf")]
fn pdf_text(file_name: &str, bytes: &[u8]) -> Result<String> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| RagError::ExtractionError {
        file: file_name.to_string(),
        message: e.to_string(),
    })
}

#[cfg(not(feature = "pdf"))]
fn pdf_text(file_name: &str, _bytes: &[u8]) -> Result<String> {
    Err(RagError::ExtractionError {
        file: file_name.to_string(),
        message: "PDF support is not enabled (build with the `pdf` feature)".into(),
    })
}

/// Extract the pages of a document, using `file_name` as its id.
///
/// Text and Markdown files are decoded as UTF-8; PDFs need the `pdf`
/// feature. Either way pages are split on form feeds and blank pages are
/// dropped. A document with no text yields zero pages, which indexes to
/// zero chunks.
///
/// # Errors
///
/// Returns [`RagError::ExtractionError`] for unsupported or unreadable files.
pub fn extract_document(file_name: &str, bytes: &[u8]) -> Result<Document> {
    let text = match extension(file_name).as_deref() {
        Some("pdf") => pdf_text(file_name, bytes)?,
        Some("txt" | "text" | "md" | "markdown") => decode_text(bytes),
        other => {
            return Err(RagError::ExtractionError {
                file: file_name.to_string(),
                message: format!("unsupported file type '{}'", other.unwrap_or("")),
            });
        }
    };

    let pages = paginate(&text);
    debug!(file = file_name, pages = pages.len(), "extracted document");
    Ok(Document::new(file_name, pages))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pages_on_form_feed() {
        let document = extract_document("essay.md", b"page one\x0C \n\x0Cpage three").unwrap();
        assert_eq!(document.id, "essay.md");
        let numbers: Vec<u32> = document.pages.iter().map(|p| p.number).collect();
        assert_eq!(numbers, vec![1, 3]);
        assert_eq!(document.pages[1].text, "page three");
    }

    #[test]
    fn tolerates_invalid_utf8() {
        let document = extract_document("notes.TXT", b"caf\xff ok").unwrap();
        assert!(document.pages[0].text.ends_with("ok"));
    }

    #[test]
    fn rejects_unknown_types() {
        assert!(!is_supported("image.png"));
        assert!(is_supported("Article.PDF"));
        let err = extract_document("image.png", b"\x89PNG").unwrap_err();
        assert!(matches!(err, RagError::ExtractionError { .. }));
    }

    #[test]
    fn empty_file_has_no_pages() {
        assert!(extract_document("blank.txt", b"   ").unwrap().pages.is_empty());
    }
}
