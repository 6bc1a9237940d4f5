//! PDF text extraction module
//!
//! Extracts text content from PDF files using lopdf.

use crate::errors::IngestionError;
use tracing::{debug, warn};

/// Extract the text of every page, in page order.
///
/// Pages that fail to decode are skipped with a warning. A document with
/// no extractable text at all (scanned images) is an error. `origin` is
/// only used in error messages.
pub fn extract_text_from_pdf(bytes: &[u8], origin: &str) -> Result<String, IngestionError> {
    let doc = lopdf::Document::load_mem(bytes).map_err(|e| IngestionError::PdfParseError {
        path: origin.to_string(),
        message: format!("Failed to load PDF: {}", e),
    })?;

    if doc.is_encrypted() {
        return Err(IngestionError::PdfParseError {
            path: origin.to_string(),
            message: "Encrypted PDFs are not supported".to_string(),
        });
    }

    let pages = doc.get_pages();
    debug!(page_count = pages.len(), "Extracting text from PDF");

    let mut text = String::new();
    for page_num in pages.keys() {
        match doc.extract_text(&[*page_num]) {
            Ok(page_text) => {
                text.push_str(&page_text);
                text.push('\n');
            }
            Err(e) => {
                warn!(page = page_num, error = %e, "Failed to extract text from page, skipping");
            }
        }
    }

    let text = normalize_extracted(&text);
    if text.trim().is_empty() {
        return Err(IngestionError::PdfParseError {
            path: origin.to_string(),
            message: "No text content extracted from PDF".to_string(),
        });
    }

    debug!(chars = text.chars().count(), "Text extraction complete");
    Ok(text)
}

/// Undo common extraction artifacts: BOMs, soft hyphens and words broken
/// across lines with a hyphen.
fn normalize_extracted(text: &str) -> String {
    text.replace('\u{FEFF}', "")
        .replace('\u{00AD}', "")
        .replace("-\n", "")
}
