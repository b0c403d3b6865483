use std::path::Path;

use super::StorageError;

/// Extensions accepted for uploaded résumés, in status probe order.
pub const RAW_EXTENSIONS: [&str; 4] = ["pdf", "doc", "docx", "txt"];

pub const DOCX_MIME: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";
pub const PDF_MIME: &str = "application/pdf";
pub const TEXT_MIME: &str = "text/plain; charset=utf-8";
pub const JSON_MIME: &str = "application/json";

pub fn raw(job_id: &str, ext: &str) -> String {
    format!("raw/{job_id}.{ext}")
}

pub fn raw_jd(job_id: &str, ext: &str) -> String {
    format!("raw-jd/{job_id}.{ext}")
}

pub fn text(job_id: &str) -> String {
    format!("text/{job_id}.txt")
}

pub fn extract_meta(job_id: &str) -> String {
    format!("meta/{job_id}.extract.json")
}

pub fn jd_text(job_id: &str) -> String {
    format!("jd/{job_id}.txt")
}

pub fn jd_analysis(job_id: &str) -> String {
    format!("jd/{job_id}.json")
}

pub fn structured(job_id: &str, label: &str) -> String {
    format!("json/{job_id}.{label}.json")
}

/// Prefix shared by every labelled result of a job.
pub fn structured_prefix(job_id: &str) -> String {
    format!("json/{job_id}.")
}

/// Unlabelled key written by older deployments, still probed by status.
pub fn legacy_structured(job_id: &str) -> String {
    format!("json/{job_id}.json")
}

pub fn metrics(job_id: &str, label: &str) -> String {
    format!("metrics/{job_id}.{label}.json")
}

pub fn docx(job_id: &str) -> String {
    format!("docx/{job_id}.docx")
}

pub fn pdf(job_id: &str) -> String {
    format!("pdf/{job_id}.pdf")
}

/// Validates a caller-supplied segment (job id or prompt label) before it is
/// spliced into a key. Allowed: ASCII alphanumerics, `.`, `_`, `-`; 1..=128 chars;
/// no leading dot.
pub fn validate_segment(segment: &str) -> Result<&str, StorageError> {
    let valid = !segment.is_empty()
        && segment.len() <= 128
        && !segment.starts_with('.')
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));
    if valid {
        Ok(segment)
    } else {
        Err(StorageError::InvalidKey(segment.to_string()))
    }
}

/// Rejects keys that could escape the store root.
pub fn validate_key(key: &str) -> Result<&str, StorageError> {
    let bad = key.is_empty()
        || key.starts_with('/')
        || key.contains('\\')
        || key.split('/').any(|part| part.is_empty() || part == "." || part == "..");
    if bad {
        Err(StorageError::InvalidKey(key.to_string()))
    } else {
        Ok(key)
    }
}

/// Lower-cased extension of a key or file name, if any.
pub fn extension(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

/// Content type for a file name, by extension.
pub fn detect_mime(name: &str) -> String {
    match extension(name).as_deref() {
        Some("pdf") => PDF_MIME.to_string(),
        Some("doc") | Some("docx") => DOCX_MIME.to_string(),
        Some("txt") => TEXT_MIME.to_string(),
        Some("json") => JSON_MIME.to_string(),
        _ => mime_guess::from_path(name)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}
