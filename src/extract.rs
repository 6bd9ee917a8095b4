//! PDF text extraction.
//!
//! Ingestion treats extraction as an external capability: bytes in, plain
//! UTF-8 text out. Only PDF is an ingestible type; everything else is
//! rejected up front by the coordinator.

/// Extraction error. No panic; the run fails and the document is marked so.
#[derive(Debug)]
pub enum ExtractError {
    UnsupportedDocType(String),
    Pdf(String),
}

impl std::fmt::Display for ExtractError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExtractError::UnsupportedDocType(t) => write!(f, "unsupported document type: {}", t),
            ExtractError::Pdf(e) => write!(f, "PDF extraction failed: {}", e),
        }
    }
}

impl std::error::Error for ExtractError {}

/// Extracts plain text from document bytes.
pub fn extract_text(bytes: &[u8], doc_type: &str) -> Result<String, ExtractError> {
    match doc_type {
        "pdf" => extract_pdf(bytes),
        other => Err(ExtractError::UnsupportedDocType(other.to_string())),
    }
}

fn extract_pdf(bytes: &[u8]) -> Result<String, ExtractError> {
    pdf_extract::extract_text_from_mem(bytes).map_err(|e| ExtractError::Pdf(e.to_string()))
}

/// Collapse runs of whitespace into single spaces.
pub fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
