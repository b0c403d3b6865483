//! Minimal WordprocessingML helpers shared by extraction and templating.

use std::io::{Cursor, Read};
use std::sync::OnceLock;

use regex::Regex;
use zip::result::ZipError;
use zip::ZipArchive;

pub const DOCUMENT_PART: &str = "word/document.xml";
pub const DOCUMENT_RELS_PART: &str = "word/_rels/document.xml.rels";

fn text_token_regex() -> &'static Regex {
    static TOKENS: OnceLock<Regex> = OnceLock::new();
    TOKENS.get_or_init(|| {
        Regex::new(r"(?s)<w:t(?:\s[^>]*)?>(.*?)</w:t>|<w:tab\s*/>|<w:br(?:\s[^>]*)?/>|<w:cr\s*/>|</w:p>")
            .expect("text token pattern compiles")
    })
}

/// Reads one part of an OOXML package as UTF-8. `None` when the part is absent.
pub fn read_part(package: &[u8], name: &str) -> Result<Option<String>, ZipError> {
    let mut archive = ZipArchive::new(Cursor::new(package))?;
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(ZipError::FileNotFound) => return Ok(None),
        Err(e) => return Err(e),
    };
    let mut xml = String::new();
    file.read_to_string(&mut xml)?;
    Ok(Some(xml))
}

/// Visible text of a WordprocessingML part: runs joined, tabs and breaks kept,
/// one line per paragraph.
pub fn part_text(xml: &str) -> String {
    let mut out = String::with_capacity(xml.len() / 4);
    for caps in text_token_regex().captures_iter(xml) {
        match caps.get(1) {
            Some(text) => out.push_str(&unescape(text.as_str())),
            None => {
                let token = &caps[0];
                if token.starts_with("<w:tab") {
                    out.push('\t');
                } else {
                    out.push('\n');
                }
            }
        }
    }
    out
}

pub fn unescape(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    s.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

pub fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}
