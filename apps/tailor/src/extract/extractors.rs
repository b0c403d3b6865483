use crate::errors::PipelineError;
use crate::ooxml;
use crate::storage::keys;

pub const ENCRYPTED_MESSAGE: &str = "Encrypted or password-protected PDF cannot be parsed";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    Pdf,
    WordProcessing,
    PlainText,
}

impl DocumentKind {
    /// Picks an extractor from the declared mime type, falling back to the
    /// key's extension when the mime type is missing or generic.
    pub fn detect(mime_type: Option<&str>, key: &str) -> Result<Self, PipelineError> {
        let declared = mime_type.map(str::to_ascii_lowercase).unwrap_or_default();
        if let Some(kind) = Self::from_mime(&declared) {
            return Ok(kind);
        }
        Self::from_mime(&keys::detect_mime(key)).ok_or_else(|| {
            PipelineError::Input(format!(
                "Unsupported file type: {}",
                if declared.is_empty() { key } else { declared.as_str() }
            ))
        })
    }

    fn from_mime(mime: &str) -> Option<Self> {
        if mime.contains("pdf") {
            Some(Self::Pdf)
        } else if mime.contains("wordprocessingml")
            || mime.contains("officedocument")
            || mime.contains("msword")
            || mime.contains("docx")
        {
            Some(Self::WordProcessing)
        } else if mime.starts_with("text/") {
            Some(Self::PlainText)
        } else {
            None
        }
    }
}

fn looks_encrypted(bytes: &[u8]) -> bool {
    bytes.windows(b"/Encrypt".len()).any(|w| w == b"/Encrypt")
}

fn extraction_failure(detail: impl std::fmt::Display) -> PipelineError {
    let detail = detail.to_string();
    let lower = detail.to_ascii_lowercase();
    if lower.contains("encrypted") || lower.contains("incorrect password") {
        PipelineError::Extraction(ENCRYPTED_MESSAGE.to_string())
    } else {
        PipelineError::Extraction(format!("Extraction error: {detail}"))
    }
}

pub fn extract_pdf(bytes: &[u8]) -> Result<String, PipelineError> {
    if looks_encrypted(bytes) {
        return Err(PipelineError::Extraction(ENCRYPTED_MESSAGE.to_string()));
    }
    pdf_extract::extract_text_from_mem(bytes).map_err(extraction_failure)
}

pub fn extract_docx(bytes: &[u8]) -> Result<String, PipelineError> {
    match ooxml::read_part(bytes, ooxml::DOCUMENT_PART) {
        Ok(Some(xml)) => Ok(ooxml::part_text(&xml)),
        Ok(None) => Err(extraction_failure("document has no word/document.xml part")),
        Err(e) => Err(extraction_failure(e)),
    }
}

/// Raw text of a document. CPU-bound; call from a blocking task.
pub fn extract_text(kind: DocumentKind, bytes: &[u8]) -> Result<String, PipelineError> {
    match kind {
        DocumentKind::Pdf => extract_pdf(bytes),
        DocumentKind::WordProcessing => extract_docx(bytes),
        DocumentKind::PlainText => Ok(String::from_utf8_lossy(bytes).into_owned()),
    }
}
