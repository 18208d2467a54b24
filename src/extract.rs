//! Page-level text extraction for PDF documents.
//!
//! Extraction is pipeline-layer: the processor supplies raw bytes and this
//! module returns one UTF-8 string per page. Errors never panic; the caller
//! logs them and skips the file.

/// MIME type of the only binary format the loader understands.
pub const MIME_PDF: &str = "application/pdf";

/// Extraction error. The processor skips the file that produced it.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedContentType(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedContentType(ct) => {
                write!(f, "unsupported content-type: {}", ct)
            }
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts the text of every page, in page order. Whitespace runs inside a
/// page are collapsed to single spaces; blank pages come back as empty strings
/// so page numbers stay aligned with the file.
pub fn extract_pages(bytes: &[u8], content_type: &str) -> Result<Vec<String>, ExtractError> {
    match content_type {
        MIME_PDF => extract_pdf_pages(bytes),
        _ => Err(ExtractError::UnsupportedContentType(
            content_type.to_string(),
        )),
    }
}

fn extract_pdf_pages(bytes: &[u8]) -> Result<Vec<String>, ExtractError> {
    let pages = pdf_extract::extract_text_from_mem_by_pages(bytes)
        .map_err(|e| ExtractError::Pdf(e.to_string()))?;
    Ok(pages.iter().map(|p| normalize_whitespace(p)).collect())
}

/// Collapses every whitespace run (including line breaks) to one space.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unsupported_content_type_returns_error() {
        let err = extract_pages(b"hello", "text/plain").unwrap_err();
        assert!(matches!(err, ExtractError::UnsupportedContentType(_)));
    }

    #[test]
    fn invalid_pdf_returns_error() {
        let err = extract_pages(b"not a pdf", MIME_PDF).unwrap_err();
        assert!(matches!(err, ExtractError::Pdf(_)));
        assert!(err.to_string().contains("PDF extraction failed"));
    }

    #[test]
    fn whitespace_is_collapsed() {
        assert_eq!(
            normalize_whitespace("  Annual\nleave  is\t21 days.\r\n"),
            "Annual leave is 21 days."
        );
        assert_eq!(normalize_whitespace("\n\n  "), "");
    }
}
