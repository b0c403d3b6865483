//! Best-effort hyperlink and email detection.
//!
//! Structured sources first (PDF link annotations, DOCX hyperlink
//! relationships); when those yield nothing the extracted text is scanned.

use std::sync::OnceLock;

use lopdf::{Dictionary, Document, Object};
use regex::Regex;
use serde::Serialize;

use super::extractors::DocumentKind;
use crate::ooxml;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DetectedLinks {
    pub urls: Vec<String>,
    pub emails: Vec<String>,
}

impl DetectedLinks {
    pub fn is_empty(&self) -> bool {
        self.urls.is_empty() && self.emails.is_empty()
    }
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)\b((?:https?://|www\.)[^\s<>{}\[\]|\\^`"']+)"#)
            .expect("url pattern compiles")
    })
}

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b[A-Z0-9._%+-]+@[A-Z0-9.-]+\.[A-Z]{2,}\b").expect("email pattern compiles")
    })
}

fn relationship_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<Relationship\s[^>]*>").expect("relationship pattern compiles"))
}

fn attribute<'a>(element: &'a str, name: &str) -> Option<&'a str> {
    let needle = format!(" {name}=\"");
    let start = element.find(&needle)? + needle.len();
    let len = element[start..].find('"')?;
    Some(&element[start..start + len])
}

/// URLs (trailing `),.;` trimmed) and emails found in free text, in order, deduplicated.
pub fn links_from_text(text: &str) -> DetectedLinks {
    let mut found = DetectedLinks::default();
    for caps in url_regex().captures_iter(text) {
        let url = caps[1].trim_end_matches([')', ',', '.', ';']).to_string();
        if !url.is_empty() && !found.urls.contains(&url) {
            found.urls.push(url);
        }
    }
    for m in email_regex().find_iter(text) {
        let email = m.as_str().to_string();
        if !found.emails.contains(&email) {
            found.emails.push(email);
        }
    }
    found
}

/// External hyperlink targets from `word/_rels/document.xml.rels`.
pub fn links_from_docx(bytes: &[u8]) -> Result<DetectedLinks, String> {
    let Some(rels) = ooxml::read_part(bytes, ooxml::DOCUMENT_RELS_PART)
        .map_err(|e| format!("cannot read DOCX relationships: {e}"))?
    else {
        return Ok(DetectedLinks::default());
    };

    let targets: Vec<String> = relationship_regex()
        .find_iter(&rels)
        .map(|m| m.as_str())
        .filter(|el| attribute(el, "Type").is_some_and(|t| t.ends_with("/hyperlink")))
        .filter_map(|el| attribute(el, "Target"))
        .map(ooxml::unescape)
        .collect();

    // mailto: targets surface through the email pattern.
    Ok(links_from_text(&targets.join(" ")))
}

fn uri_from_action(doc: &Document, action: &Dictionary) -> Option<String> {
    let uri = match action.get(b"URI").ok()? {
        Object::Reference(id) => doc.get_object(*id).ok()?,
        other => other,
    };
    match uri {
        Object::String(bytes, _) => Some(String::from_utf8_lossy(bytes).into_owned()),
        _ => None,
    }
}

/// URI actions of `/Link` annotations on every page.
pub fn links_from_pdf(bytes: &[u8]) -> Result<DetectedLinks, String> {
    let doc = Document::load_mem(bytes).map_err(|e| format!("cannot parse PDF: {e}"))?;
    let mut uris = Vec::new();

    for page_id in doc.get_pages().into_values() {
        for annotation in doc.get_page_annotations(page_id) {
            let is_link = annotation
                .get(b"Subtype")
                .and_then(Object::as_name)
                .is_ok_and(|name| name == b"Link");
            if !is_link {
                continue;
            }
            let action = match annotation.get(b"A") {
                Ok(Object::Dictionary(dict)) => Some(dict),
                Ok(Object::Reference(id)) => doc.get_dictionary(*id).ok(),
                _ => None,
            };
            if let Some(uri) = action.and_then(|a| uri_from_action(&doc, a)) {
                uris.push(uri);
            }
        }
    }

    Ok(links_from_text(&uris.join(" ")))
}

/// Dispatches on document kind; falls back to scanning `text` when the
/// structured source has nothing.
pub fn detect_links(kind: DocumentKind, bytes: &[u8], text: &str) -> Result<DetectedLinks, String> {
    let structured = match kind {
        DocumentKind::Pdf => links_from_pdf(bytes)?,
        DocumentKind::WordProcessing => links_from_docx(bytes)?,
        DocumentKind::PlainText => DetectedLinks::default(),
    };
    if structured.is_empty() {
        Ok(links_from_text(text))
    } else {
        Ok(structured)
    }
}

/// Caller-supplied links followed by detected URLs, without duplicates.
pub fn merge_links(supplied: &[String], detected: &DetectedLinks) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(supplied.len() + detected.urls.len());
    for link in supplied.iter().chain(&detected.urls) {
        let link = link.trim();
        if !link.is_empty() && !out.iter().any(|l| l == link) {
            out.push(link.to_string());
        }
    }
    out
}
